use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use cordial_api::{Backend, LocalBackend, SharedBackend};
use cordial_client::ClientError;
use cordial_client::announcement::AnnouncementBar;
use cordial_client::channels::ChannelList;
use cordial_client::chat::ChatView;
use cordial_client::forward::{forward, forward_targets};
use cordial_client::members::MemberList;
use cordial_client::presence::Presence;
use cordial_client::servers::{DEFAULT_CHANNEL, ServerList};
use cordial_client::session::{Session, SessionStore};
use cordial_client::settings::{change_password, change_username};
use cordial_client::unread::UnreadTracker;
use cordial_types::api::{NewMessage, NewUser, UserPatch};
use cordial_types::events::{ChangeEvent, ChangeFilter, ChangeKind, Table};
use cordial_types::models::{MediaType, Reactions, User};

fn backend() -> SharedBackend {
    Arc::new(LocalBackend::in_memory().unwrap())
}

fn session_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("cordial-session-{}.json", Uuid::new_v4()))
}

async fn user(backend: &SharedBackend, name: &str) -> User {
    backend.insert_user(&NewUser::new(name, None)).await.unwrap()
}

/// A server with its default channel, joined by `owner`, open in a chat view.
async fn open_general(backend: &SharedBackend, owner: &User) -> (ServerList, ChannelList, ChatView) {
    let mut servers = ServerList::new(backend.clone());
    let server = servers.create("Guild", owner.id).await.unwrap();

    let mut channels = ChannelList::new(backend.clone());
    channels.load(server.id).await.unwrap();

    let mut chat = ChatView::new(backend.clone());
    chat.open(channels.selected().unwrap()).await.unwrap();
    (servers, channels, chat)
}

#[tokio::test]
async fn sending_appends_one_row_and_clears_the_input() {
    let backend = backend();
    let alice = user(&backend, "alice").await;
    let (_, _, mut chat) = open_general(&backend, &alice).await;

    let mut feed = backend.subscribe(chat.filter().unwrap()).await.unwrap();
    chat.set_input("  hello there ");
    let id = chat.send(&alice).await.unwrap().unwrap();

    assert_eq!(chat.input(), "");
    assert_eq!(chat.messages().len(), 1);
    assert_eq!(chat.messages()[0].id, id);
    assert_eq!(chat.messages()[0].content, "hello there");

    // The echoed insert must not add a second copy.
    let echo = feed.next().await.unwrap();
    assert_eq!(echo.row_id(), Some(id));
    assert!(!chat.apply(&echo).await);
    assert_eq!(chat.messages().len(), 1);
}

#[tokio::test]
async fn blank_input_sends_nothing() {
    let backend = backend();
    let alice = user(&backend, "alice").await;
    let (_, _, mut chat) = open_general(&backend, &alice).await;

    chat.set_input("   \n ");
    assert_eq!(chat.send(&alice).await.unwrap(), None);
    assert!(chat.messages().is_empty());
}

#[tokio::test]
async fn failed_send_restores_the_draft() {
    let backend = backend();
    let alice = user(&backend, "alice").await;

    // No such channel: the insert violates the channel foreign key.
    let mut chat = ChatView::new(backend.clone());
    chat.open(Uuid::new_v4()).await.unwrap();
    chat.set_input("lost message");
    chat.attach_media("https://media.example/cat.gif", MediaType::Image);

    assert!(chat.send(&alice).await.is_err());
    assert!(chat.messages().is_empty());
    assert_eq!(chat.input(), "lost message");
    assert!(chat.attachment().is_some());
}

#[tokio::test]
async fn other_users_messages_arrive_with_their_author() {
    let backend = backend();
    let alice = user(&backend, "alice").await;
    let bob = user(&backend, "bob").await;
    let (_, _, mut chat) = open_general(&backend, &alice).await;
    let channel_id = chat.channel_id().unwrap();

    let mut feed = backend.subscribe(chat.filter().unwrap()).await.unwrap();
    chat.set_input("first");
    let first = chat.send(&alice).await.unwrap().unwrap();
    feed.next().await.unwrap();

    let mut reply = NewMessage::text(channel_id, bob.id, "second");
    reply.reply_to_message_id = Some(first);
    backend.insert_message(&reply).await.unwrap();

    let event = feed.next().await.unwrap();
    assert!(chat.apply(&event).await);

    let received = chat.messages().last().unwrap();
    assert_eq!(received.author_name(), "bob");
    assert_eq!(
        received.reply_to_message.as_ref().map(|r| r.content.as_str()),
        Some("first")
    );
}

#[tokio::test]
async fn updates_merge_and_deletes_remove_messages() {
    let backend = backend();
    let alice = user(&backend, "alice").await;
    let bob = user(&backend, "bob").await;
    let (_, _, mut chat) = open_general(&backend, &alice).await;

    chat.set_input("hello");
    let id = chat.send(&alice).await.unwrap().unwrap();
    let mut feed = backend.subscribe(chat.filter().unwrap()).await.unwrap();

    let mut reactions = Reactions::default();
    reactions.toggle("👍", bob.id);
    backend.update_reactions(id, &reactions).await.unwrap();

    let event = feed.next().await.unwrap();
    assert_eq!(event.kind, ChangeKind::Update);
    assert!(chat.apply(&event).await);
    let updated = chat.message(id).unwrap();
    assert_eq!(updated.reactions.count("👍"), 1);
    // Feed rows carry no joins; the author we already had is kept.
    assert_eq!(updated.author_name(), "alice");

    let removed = ChangeEvent::delete(Table::Messages, chat.message(id).unwrap()).unwrap();
    assert!(chat.apply(&removed).await);
    assert!(chat.message(id).is_none());
    assert!(!chat.apply(&removed).await);
}

#[tokio::test]
async fn cancelled_reply_sends_a_plain_message() {
    let backend = backend();
    let alice = user(&backend, "alice").await;
    let (_, _, mut chat) = open_general(&backend, &alice).await;

    chat.set_input("first");
    let first = chat.send(&alice).await.unwrap().unwrap();

    chat.reply_to(first);
    assert_eq!(chat.reply_target().map(|m| m.id), Some(first));
    chat.cancel_reply();
    assert!(chat.reply_target().is_none());

    chat.set_input("second");
    let second = chat.send(&alice).await.unwrap().unwrap();
    let sent = chat.message(second).unwrap();
    assert_eq!(sent.reply_to_message_id, None);
    assert!(sent.reply_to_message.is_none());
}

#[tokio::test]
async fn toggling_a_reaction_twice_restores_the_map() {
    let backend = backend();
    let alice = user(&backend, "alice").await;
    let bob = user(&backend, "bob").await;
    let (_, _, mut chat) = open_general(&backend, &alice).await;

    chat.set_input("react to me");
    let id = chat.send(&alice).await.unwrap().unwrap();
    chat.toggle_reaction(id, "🔥", bob.id).await.unwrap();
    let before = backend.message_by_id(id).await.unwrap().unwrap().reactions;

    assert!(chat.toggle_reaction(id, "🔥", alice.id).await.unwrap());
    assert_eq!(chat.message(id).unwrap().reactions.count("🔥"), 2);
    assert!(!chat.toggle_reaction(id, "🔥", alice.id).await.unwrap());

    let after = backend.message_by_id(id).await.unwrap().unwrap().reactions;
    assert_eq!(after, before);
    assert_eq!(chat.message(id).unwrap().reactions, before);
}

#[tokio::test]
async fn selecting_a_channel_clears_unread_and_records_the_read() {
    let backend = backend();
    let alice = user(&backend, "alice").await;
    let bob = user(&backend, "bob").await;
    let (servers, _, mut bob_chat) = open_general(&backend, &bob).await;
    let channel_id = bob_chat.channel_id().unwrap();

    let mut alice_servers = ServerList::new(backend.clone());
    alice_servers.load().await.unwrap();
    alice_servers
        .select(servers.selected().unwrap(), alice.id)
        .await
        .unwrap();

    bob_chat.set_input("anyone here?");
    bob_chat.send(&bob).await.unwrap();

    let mut unread = UnreadTracker::new(backend.clone(), alice.id);
    unread.poll().await.unwrap();
    assert!(unread.is_unread(channel_id));

    unread.select(channel_id).await.unwrap();
    assert!(!unread.is_unread(channel_id));

    let reads = backend.channel_reads(alice.id).await.unwrap();
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].channel_id, channel_id);

    // Still read after the next poll, even from a fresh tracker.
    let mut fresh = UnreadTracker::new(backend.clone(), alice.id);
    fresh.poll().await.unwrap();
    assert!(!fresh.is_unread(channel_id));
}

#[tokio::test]
async fn own_messages_do_not_leave_a_channel_unread() {
    let backend = backend();
    let alice = user(&backend, "alice").await;
    let (_, mut channels, mut chat) = open_general(&backend, &alice).await;
    let general = chat.channel_id().unwrap();
    let other = channels.create("other").await.unwrap();

    let mut unread = UnreadTracker::new(backend.clone(), alice.id);
    unread.select(general).await.unwrap();
    chat.set_input("my own message");
    chat.send(&alice).await.unwrap();

    unread.select(other.id).await.unwrap();
    unread.poll().await.unwrap();
    assert!(!unread.is_unread(general));
    assert!(!unread.is_unread(other.id));
}

#[tokio::test]
async fn channel_list_ignores_other_peoples_dms_and_servers() {
    let backend = backend();
    let alice = user(&backend, "alice").await;
    let bob = user(&backend, "bob").await;
    let carol = user(&backend, "carol").await;
    let (_, mut channels, _) = open_general(&backend, &alice).await;
    channels.load_dms(alice.id).await.unwrap();

    let mut feed = backend
        .subscribe(ChangeFilter::table(Table::Channels))
        .await
        .unwrap();

    ChannelList::new(backend.clone())
        .open_dm(bob.id, carol.id)
        .await
        .unwrap();
    let event = feed.next().await.unwrap();
    assert!(!channels.apply(&event));
    assert!(channels.dm_channels().is_empty());

    let dm = ChannelList::new(backend.clone())
        .open_dm(carol.id, alice.id)
        .await
        .unwrap();
    let event = feed.next().await.unwrap();
    assert!(channels.dm_filter().matches(&event));
    assert!(channels.apply(&event));
    assert_eq!(channels.dm_channels().len(), 1);
    assert_eq!(channels.dm_channels()[0].id, dm.id);
    // The echo of a row we already hold changes nothing.
    assert!(!channels.apply(&event));

    ServerList::new(backend.clone())
        .create("Elsewhere", bob.id)
        .await
        .unwrap();
    let event = feed.next().await.unwrap();
    assert!(!channels.apply(&event));
    assert_eq!(channels.channels().len(), 1);
}

#[tokio::test]
async fn opening_a_dm_twice_reuses_the_channel() {
    let backend = backend();
    let alice = user(&backend, "alice").await;
    let bob = user(&backend, "bob").await;

    let mut alice_channels = ChannelList::new(backend.clone());
    let first = alice_channels.open_dm(alice.id, bob.id).await.unwrap();
    let again = alice_channels.open_dm(alice.id, bob.id).await.unwrap();
    assert_eq!(first.id, again.id);

    let mut bob_channels = ChannelList::new(backend.clone());
    let from_bob = bob_channels.open_dm(bob.id, alice.id).await.unwrap();
    assert_eq!(from_bob.id, first.id);
    assert_eq!(from_bob.dm_peer(bob.id), Some(alice.id));

    bob_channels.load_dms(bob.id).await.unwrap();
    assert_eq!(bob_channels.dm_channels().len(), 1);

    assert!(matches!(
        alice_channels.open_dm(alice.id, alice.id).await,
        Err(ClientError::SelfDirectMessage)
    ));
}

#[tokio::test]
async fn new_servers_come_with_a_general_channel() {
    let backend = backend();
    let alice = user(&backend, "alice").await;
    let (servers, mut channels, _) = open_general(&backend, &alice).await;
    let server_id = servers.selected().unwrap();

    assert!(backend.membership(server_id, alice.id).await.unwrap().is_some());
    assert_eq!(channels.selected_channel().unwrap().name, DEFAULT_CHANNEL);

    let created = channels.create("  Voice   Lounge ").await.unwrap();
    assert_eq!(created.name, "voice-lounge");
    channels.create("Off Topic").await.unwrap();

    let text: Vec<&str> = channels.text_channels().map(|c| c.name.as_str()).collect();
    assert_eq!(text, vec!["general", "off-topic"]);
}

#[tokio::test]
async fn username_changes_respect_the_cooldown() {
    let backend = backend();
    let alice = user(&backend, "alice").await;
    user(&backend, "bob").await;
    let now = Utc::now();

    let renamed = change_username(backend.as_ref(), &alice, "alicia", now)
        .await
        .unwrap();
    assert_eq!(renamed.username, "alicia");
    assert!(renamed.last_username_change.is_some());

    let too_soon = change_username(backend.as_ref(), &renamed, "ally", now + Duration::days(10)).await;
    assert!(matches!(
        too_soon,
        Err(ClientError::UsernameCooldown { days_left: 20 })
    ));

    // Same name is a no-op, cooldown or not.
    let same = change_username(backend.as_ref(), &renamed, "alicia", now).await.unwrap();
    assert_eq!(same, renamed);

    let later = now + Duration::days(31);
    assert!(matches!(
        change_username(backend.as_ref(), &renamed, "bob", later).await,
        Err(ClientError::UsernameTaken(_))
    ));
    assert_eq!(
        change_username(backend.as_ref(), &renamed, "ally", later)
            .await
            .unwrap()
            .username,
        "ally"
    );
}

#[tokio::test]
async fn passwords_are_validated_and_hashed() {
    let backend = backend();
    let path = session_path();
    let mut session = Session::new(backend.clone(), SessionStore::new(&path));
    let alice = session.enter("alice", None).await.unwrap().clone();

    assert!(matches!(
        change_password(backend.as_ref(), &alice, "secret1", "secret2").await,
        Err(ClientError::PasswordMismatch)
    ));
    assert!(matches!(
        change_password(backend.as_ref(), &alice, "short", "short").await,
        Err(ClientError::PasswordTooShort(6))
    ));
    change_password(backend.as_ref(), &alice, "secret1", "secret1")
        .await
        .unwrap();

    let stored = backend.user_by_id(alice.id).await.unwrap().unwrap();
    assert_ne!(stored.password_hash.as_deref(), Some("secret1"));

    let mut other = Session::new(backend.clone(), SessionStore::new(&path));
    assert!(matches!(
        other.enter("alice", Some("wrong")).await,
        Err(ClientError::WrongPassword)
    ));
    assert_eq!(other.enter("alice", Some("secret1")).await.unwrap().id, alice.id);

    other.logout().await.unwrap();
}

#[tokio::test]
async fn sessions_restore_and_clear_stale_ids() {
    let backend = backend();
    let path = session_path();

    let mut session = Session::new(backend.clone(), SessionStore::new(&path));
    let alice = session.enter("  alice ", None).await.unwrap().clone();
    assert_eq!(alice.username, "alice");

    let mut restored = Session::new(backend.clone(), SessionStore::new(&path));
    assert_eq!(restored.restore().await.unwrap().map(|u| u.id), Some(alice.id));

    // Same file, different store: the stored id points nowhere.
    let mut stale = Session::new(self::backend(), SessionStore::new(&path));
    assert!(stale.restore().await.unwrap().is_none());
    assert_eq!(SessionStore::new(&path).load().await.unwrap(), None);
}

#[tokio::test]
async fn forwarding_targets_member_servers_and_prefixes_content() {
    let backend = backend();
    let alice = user(&backend, "alice").await;
    let (_, mut channels, mut chat) = open_general(&backend, &alice).await;
    let announcements = channels.create("announcements").await.unwrap();

    let mut other = ServerList::new(backend.clone());
    other.create("Elsewhere", user(&backend, "bob").await.id).await.unwrap();

    let targets = forward_targets(backend.as_ref(), alice.id).await.unwrap();
    assert_eq!(targets.len(), 1);
    let names: Vec<&str> = targets[0].channels.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["announcements", "general"]);

    chat.set_input("look");
    chat.attach_media("https://media.example/cat.gif", MediaType::Image);
    let id = chat.send(&alice).await.unwrap().unwrap();

    let original = chat.message(id).unwrap().clone();
    let sent = forward(backend.as_ref(), &original, announcements.id, alice.id)
        .await
        .unwrap();
    assert_eq!(sent.content, "**Forwarded:** look");
    assert_eq!(sent.media_url, original.media_url);
    assert_eq!(sent.channel_id, announcements.id);
}

#[tokio::test]
async fn member_list_tracks_presence() {
    let backend = backend();
    let alice = user(&backend, "alice").await;
    let (servers, _, _) = open_general(&backend, &alice).await;
    let server_id = servers.selected().unwrap();

    let mut members = MemberList::new(backend.clone());
    members.load(server_id).await.unwrap();
    assert_eq!(members.members().len(), 1);
    assert_eq!(members.online(Utc::now()), 0);

    let mut feed = backend.subscribe(members.user_filter()).await.unwrap();
    let mut presence = Presence::new(backend.clone(), alice.id);
    presence.focus().await.unwrap();
    assert!(presence.is_focused());

    let event = feed.next().await.unwrap();
    assert!(members.apply(&event).await.unwrap());
    assert_eq!(members.online(Utc::now()), 1);
    assert_eq!(members.online(Utc::now() + Duration::minutes(6)), 0);

    presence.blur().await.unwrap();
    assert!(!presence.is_focused());
    let event = feed.next().await.unwrap();
    assert!(members.apply(&event).await.unwrap());
    assert_eq!(members.online(Utc::now()), 0);

    // Updates to people outside the server are ignored.
    let stranger = user(&backend, "stranger").await;
    let patch = UserPatch {
        avatar_url: Some("https://media.example/me.png".into()),
        ..Default::default()
    };
    backend.update_user(stranger.id, &patch).await.unwrap();
    let event = feed.next().await.unwrap();
    assert!(!members.apply(&event).await.unwrap());
}

#[tokio::test]
async fn announcements_are_admin_controlled() {
    let backend = backend();
    let mut admin = AnnouncementBar::new(backend.clone(), true);
    let mut member = AnnouncementBar::new(backend.clone(), false);
    member.load().await.unwrap();
    assert!(!member.visible());
    assert!(admin.visible());

    let mut feed = backend.subscribe(member.filter()).await.unwrap();
    assert!(matches!(member.publish("hi").await, Err(ClientError::NotAdmin)));

    admin.publish("Maintenance tonight").await.unwrap();
    while let Some(event) = feed.try_next() {
        member.apply(&event);
    }
    assert!(member.visible());
    assert_eq!(member.message(), "Maintenance tonight");

    member.dismiss();
    assert!(!member.visible());

    admin.disable().await.unwrap();
    let mut reloaded = AnnouncementBar::new(backend.clone(), false);
    reloaded.load().await.unwrap();
    assert!(!reloaded.is_active());
    assert_eq!(reloaded.message(), "Maintenance tonight");
}
