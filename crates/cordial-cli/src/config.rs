use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};

/// Values shipped in `.env.example` that must be replaced before use.
const PLACEHOLDER_MARKERS: &[&str] = &["your-project", "your-anon-key", "change-me"];

pub enum BackendMode {
    /// Hosted table API plus its realtime feed.
    Hosted { url: String, anon_key: String },
    /// Embedded SQLite file; everything stays on this machine.
    Local { db_path: PathBuf },
}

pub struct Config {
    pub mode: BackendMode,
    pub session_path: PathBuf,
    pub giphy_key: Option<String>,
    pub unsplash_key: Option<String>,
    pub admins: Vec<String>,
    pub unread_poll: Duration,
    pub heartbeat: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mode = match (var("CORDIAL_URL"), var("CORDIAL_ANON_KEY")) {
            (Some(url), Some(anon_key)) => {
                if is_placeholder(&url) || is_placeholder(&anon_key) {
                    bail!("CORDIAL_URL / CORDIAL_ANON_KEY are still placeholders");
                }
                BackendMode::Hosted { url, anon_key }
            }
            (Some(_), None) => bail!("CORDIAL_URL is set but CORDIAL_ANON_KEY is not"),
            (None, _) => BackendMode::Local {
                db_path: var("CORDIAL_DB_PATH")
                    .unwrap_or_else(|| "cordial.db".into())
                    .into(),
            },
        };

        let secs = |key: &str, default: u64| -> Result<Duration> {
            let value = match var(key) {
                Some(raw) => raw
                    .parse()
                    .map_err(|e| anyhow::anyhow!("{} must be a number of seconds: {}", key, e))?,
                None => default,
            };
            if value == 0 {
                bail!("{} must be greater than zero", key);
            }
            Ok(Duration::from_secs(value))
        };

        Ok(Self {
            mode,
            session_path: var("CORDIAL_SESSION_PATH")
                .unwrap_or_else(|| ".cordial-session.json".into())
                .into(),
            giphy_key: var("CORDIAL_GIPHY_KEY"),
            unsplash_key: var("CORDIAL_UNSPLASH_KEY"),
            admins: var("CORDIAL_ADMINS")
                .map(|list| {
                    list.split(',')
                        .map(|name| name.trim().to_lowercase())
                        .filter(|name| !name.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            unread_poll: secs("CORDIAL_UNREAD_POLL_SECS", 5)?,
            heartbeat: secs("CORDIAL_HEARTBEAT_SECS", 60)?,
        })
    }

    pub fn is_admin(&self, username: &str) -> bool {
        let username = username.to_lowercase();
        self.admins.iter().any(|admin| *admin == username)
    }
}

fn is_placeholder(value: &str) -> bool {
    let lower = value.to_lowercase();
    PLACEHOLDER_MARKERS.iter().any(|marker| lower.contains(marker))
}
