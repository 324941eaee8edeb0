use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                    TEXT PRIMARY KEY,
                username              TEXT NOT NULL UNIQUE,
                avatar_url            TEXT,
                password              TEXT,
                created_at            TEXT NOT NULL,
                status                TEXT,
                last_seen_at          TEXT,
                last_username_change  TEXT
            );

            CREATE TABLE servers (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE server_members (
                id          TEXT PRIMARY KEY,
                server_id   TEXT NOT NULL REFERENCES servers(id),
                user_id     TEXT NOT NULL REFERENCES users(id),
                joined_at   TEXT NOT NULL,
                UNIQUE(server_id, user_id)
            );

            CREATE TABLE channels (
                id               TEXT PRIMARY KEY,
                server_id        TEXT REFERENCES servers(id),
                name             TEXT NOT NULL,
                is_dm            INTEGER NOT NULL DEFAULT 0,
                created_at       TEXT NOT NULL,
                last_message_at  TEXT
            );

            CREATE INDEX idx_channels_server ON channels(server_id, created_at);

            -- One row per DM pair; the name encodes the sorted pair.
            CREATE UNIQUE INDEX idx_channels_dm_name ON channels(name) WHERE is_dm = 1;

            CREATE TABLE messages (
                id                   TEXT PRIMARY KEY,
                channel_id           TEXT NOT NULL REFERENCES channels(id),
                user_id              TEXT NOT NULL REFERENCES users(id),
                content              TEXT NOT NULL,
                media_url            TEXT,
                media_type           TEXT,
                reactions            TEXT NOT NULL DEFAULT '{}',
                reply_to_message_id  TEXT REFERENCES messages(id),
                created_at           TEXT NOT NULL
            );

            CREATE INDEX idx_messages_channel ON messages(channel_id, created_at);

            CREATE TABLE channel_reads (
                user_id       TEXT NOT NULL REFERENCES users(id),
                channel_id    TEXT NOT NULL REFERENCES channels(id),
                last_read_at  TEXT NOT NULL,
                PRIMARY KEY (user_id, channel_id)
            );

            CREATE TABLE app_config (
                key    TEXT PRIMARY KEY,
                value  TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
