mod commands;
mod config;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Local, Utc};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use cordial_api::{Backend, LocalBackend, MediaSearch, RestBackend, SharedBackend};
use cordial_client::announcement::AnnouncementBar;
use cordial_client::channels::ChannelList;
use cordial_client::chat::{ChatView, format_timestamp, is_continuation};
use cordial_client::forward::{forward, forward_targets};
use cordial_client::members::MemberList;
use cordial_client::presence::Presence;
use cordial_client::servers::ServerList;
use cordial_client::session::{Session, SessionStore};
use cordial_client::settings::{change_password, change_username};
use cordial_client::unread::UnreadTracker;
use cordial_gateway::Subscription;
use cordial_types::api::MediaResult;
use cordial_types::events::{ChangeEvent, ChangeFilter, ChangeKind};
use cordial_types::models::{Message, User};

use crate::commands::{Command, HELP};
use crate::config::{BackendMode, Config};

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout is the chat.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cordial=info,cordial_api=info,cordial_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Fix your .env file and restart.");
            std::process::exit(1);
        }
    };

    let backend: SharedBackend = match &config.mode {
        BackendMode::Hosted { url, anon_key } => {
            info!("Using hosted backend at {}", url);
            Arc::new(RestBackend::new(url, anon_key)?)
        }
        BackendMode::Local { db_path } => {
            info!("Using local store at {}", db_path.display());
            Arc::new(LocalBackend::open(db_path)?)
        }
    };

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut session = Session::new(backend.clone(), SessionStore::new(&config.session_path));

    let restored = session.restore().await?.cloned();
    let user = match restored {
        Some(user) => user,
        None => match sign_in(&mut session, &mut input).await? {
            Some(user) => user,
            None => return Ok(()),
        },
    };
    println!("Signed in as {}. Type /help for commands.", user.username);

    let mut app = App::new(backend, config, session, user);
    app.start().await?;
    let result = app.run(&mut input).await;

    if let Err(e) = app.presence.blur().await {
        warn!("Failed to mark offline: {}", e);
    }
    result
}

async fn prompt(input: &mut Input, label: &str) -> anyhow::Result<Option<String>> {
    print!("{}", label);
    std::io::stdout().flush()?;
    Ok(input.next_line().await?)
}

async fn sign_in(session: &mut Session, input: &mut Input) -> anyhow::Result<Option<User>> {
    loop {
        let Some(username) = prompt(input, "Username: ").await? else {
            return Ok(None);
        };
        let Some(password) = prompt(input, "Password (blank for none): ").await? else {
            return Ok(None);
        };
        let password = Some(password.trim()).filter(|p| !p.is_empty());

        match session.enter(&username, password).await {
            Ok(user) => return Ok(Some(user.clone())),
            Err(e) => println!("! {}", e),
        }
    }
}

enum Flow {
    Continue,
    Quit,
}

struct App {
    backend: SharedBackend,
    config: Config,
    session: Session,
    user: User,
    servers: ServerList,
    channels: ChannelList,
    chat: ChatView,
    members: MemberList,
    unread: Arc<Mutex<UnreadTracker>>,
    presence: Presence,
    announcement: AnnouncementBar,
    media: MediaSearch,

    server_feed: Option<Subscription>,
    channel_feed: Option<Subscription>,
    dm_feed: Option<Subscription>,
    chat_feed: Option<Subscription>,
    member_feed: Option<Subscription>,
    user_feed: Option<Subscription>,
    config_feed: Option<Subscription>,
}

/// Resolves when the subscription yields; never resolves without one.
async fn next_event(feed: &mut Option<Subscription>) -> Option<ChangeEvent> {
    match feed {
        Some(feed) => feed.next().await,
        None => std::future::pending().await,
    }
}

impl App {
    fn new(backend: SharedBackend, config: Config, session: Session, user: User) -> Self {
        let is_admin = config.is_admin(&user.username);
        let media = MediaSearch::new(config.giphy_key.clone(), config.unsplash_key.clone());

        Self {
            servers: ServerList::new(backend.clone()),
            channels: ChannelList::new(backend.clone()),
            chat: ChatView::new(backend.clone()),
            members: MemberList::new(backend.clone()),
            unread: Arc::new(Mutex::new(UnreadTracker::new(backend.clone(), user.id))),
            presence: Presence::new(backend.clone(), user.id),
            announcement: AnnouncementBar::new(backend.clone(), is_admin),
            media,
            backend,
            config,
            session,
            user,
            server_feed: None,
            channel_feed: None,
            dm_feed: None,
            chat_feed: None,
            member_feed: None,
            user_feed: None,
            config_feed: None,
        }
    }

    async fn subscribe(&self, filter: Option<ChangeFilter>) -> Option<Subscription> {
        let filter = filter?;
        match self.backend.subscribe(filter).await {
            Ok(feed) => Some(feed),
            Err(e) => {
                warn!("Live updates unavailable: {}", e);
                None
            }
        }
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        self.presence.focus().await?;

        self.announcement.load().await?;
        self.config_feed = self.subscribe(Some(self.announcement.filter())).await;
        self.show_announcement();

        self.servers.load().await?;
        self.server_feed = self.subscribe(Some(self.servers.filter())).await;
        self.user_feed = self.subscribe(Some(self.members.user_filter())).await;
        self.channels.load_dms(self.user.id).await?;
        self.dm_feed = self.subscribe(Some(self.channels.dm_filter())).await;

        if let Some(server_id) = self.servers.selected() {
            self.switch_server(server_id).await?;
        } else {
            println!("No servers yet. Create one with /new-server <name>.");
        }

        tokio::spawn(UnreadTracker::run(self.unread.clone(), self.config.unread_poll));
        Ok(())
    }

    async fn run(&mut self, input: &mut Input) -> anyhow::Result<()> {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                line = input.next_line() => {
                    let Some(line) = line? else { break };
                    match self.handle_line(&line).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Quit) => break,
                        Err(e) => println!("! {:#}", e),
                    }
                }
                event = next_event(&mut self.chat_feed) => match event {
                    Some(event) => self.on_chat_event(&event).await,
                    None => self.chat_feed = None,
                },
                event = next_event(&mut self.server_feed) => match event {
                    Some(event) => {
                        if self.servers.apply(&event) {
                            if let Some(server) = self.servers.servers().last() {
                                println!("* New server: {}", server.name);
                            }
                        }
                    }
                    None => self.server_feed = None,
                },
                event = next_event(&mut self.channel_feed) => match event {
                    Some(event) => self.on_channel_event(&event).await,
                    None => self.channel_feed = None,
                },
                event = next_event(&mut self.dm_feed) => match event {
                    Some(event) => self.on_channel_event(&event).await,
                    None => self.dm_feed = None,
                },
                event = next_event(&mut self.member_feed) => match event {
                    Some(event) => self.on_member_event(&event).await,
                    None => self.member_feed = None,
                },
                event = next_event(&mut self.user_feed) => match event {
                    Some(event) => self.on_member_event(&event).await,
                    None => self.user_feed = None,
                },
                event = next_event(&mut self.config_feed) => match event {
                    Some(event) => {
                        if self.announcement.apply(&event) {
                            self.show_announcement();
                        }
                    }
                    None => self.config_feed = None,
                },
                _ = heartbeat.tick() => {
                    if let Err(e) = self.presence.heartbeat().await {
                        warn!("Presence heartbeat failed: {}", e);
                    }
                    self.resubscribe().await;
                }
            }
        }
        Ok(())
    }

    /// Re-opens any feed whose stream ended, e.g. after the socket dropped.
    async fn resubscribe(&mut self) {
        if self.server_feed.is_none() {
            self.server_feed = self.subscribe(Some(self.servers.filter())).await;
        }
        if self.channel_feed.is_none() {
            self.channel_feed = self.subscribe(self.channels.filter()).await;
        }
        if self.dm_feed.is_none() {
            self.dm_feed = self.subscribe(Some(self.channels.dm_filter())).await;
        }
        if self.chat_feed.is_none() {
            self.chat_feed = self.subscribe(self.chat.filter()).await;
        }
        if self.member_feed.is_none() {
            self.member_feed = self.subscribe(self.members.member_filter()).await;
        }
        if self.user_feed.is_none() {
            self.user_feed = self.subscribe(Some(self.members.user_filter())).await;
        }
        if self.config_feed.is_none() {
            self.config_feed = self.subscribe(Some(self.announcement.filter())).await;
        }
    }

    async fn on_channel_event(&mut self, event: &ChangeEvent) {
        if !self.channels.apply(event) || event.kind != ChangeKind::Insert {
            return;
        }
        let Some(id) = event.row_id() else { return };
        let Some(channel) = self
            .channels
            .channels()
            .iter()
            .chain(self.channels.dm_channels())
            .find(|c| c.id == id)
        else {
            return;
        };

        if !channel.is_direct() {
            println!("* New channel: #{}", channel.name);
            return;
        }
        let Some(peer) = channel.dm_peer(self.user.id) else { return };
        match self.backend.user_by_id(peer).await {
            Ok(Some(user)) => println!(
                "* {} started a direct message. /dm {} to open it.",
                user.username, user.username
            ),
            Ok(None) => {}
            Err(e) => warn!("Failed to load DM participant {}: {}", peer, e),
        }
    }

    async fn on_chat_event(&mut self, event: &ChangeEvent) {
        let before = self.chat.messages().len();
        if self.chat.apply(event).await && self.chat.messages().len() > before {
            if let Some(message) = self.chat.messages().last() {
                if message.user_id != self.user.id {
                    println!("{}", render(self.chat.messages().len(), None, message));
                }
            }
        }
    }

    async fn on_member_event(&mut self, event: &ChangeEvent) {
        if let Err(e) = self.members.apply(event).await {
            warn!("Failed to refresh members: {}", e);
        }
    }

    fn show_announcement(&self) {
        if self.announcement.visible() && !self.announcement.message().is_empty() {
            let hidden = if self.announcement.is_active() { "" } else { " (hidden from users)" };
            println!("📣 {}{}", self.announcement.message(), hidden);
        }
    }

    async fn switch_server(&mut self, server_id: Uuid) -> anyhow::Result<()> {
        self.servers.select(server_id, self.user.id).await?;
        self.channels.load(server_id).await?;
        self.members.load(server_id).await?;
        self.channel_feed = self.subscribe(self.channels.filter()).await;
        self.member_feed = self.subscribe(self.members.member_filter()).await;

        if let Some(server) = self.servers.selected_server() {
            println!("== {} ==", server.name);
        }
        match self.channels.selected() {
            Some(channel_id) => self.open_channel(channel_id).await,
            None => {
                println!("This server has no text channels yet.");
                Ok(())
            }
        }
    }

    async fn open_channel(&mut self, channel_id: Uuid) -> anyhow::Result<()> {
        self.channels.select(channel_id);
        self.chat.open(channel_id).await?;
        self.chat_feed = self.subscribe(self.chat.filter()).await;
        self.unread.lock().await.select(channel_id).await?;

        let title = match self.channels.selected_channel() {
            Some(channel) if channel.is_direct() => match channel.dm_peer(self.user.id) {
                Some(peer) => match self.backend.user_by_id(peer).await? {
                    Some(user) => format!("@{}", user.username),
                    None => "direct message".to_string(),
                },
                None => "direct message".to_string(),
            },
            Some(channel) => format!("#{}", channel.name),
            None => "channel".to_string(),
        };
        println!("-- {} --", title);

        let mut previous: Option<&Message> = None;
        for (i, message) in self.chat.messages().iter().enumerate() {
            println!("{}", render(i + 1, previous, message));
            previous = Some(message);
        }
        Ok(())
    }

    fn message_at(&self, index: usize) -> anyhow::Result<&Message> {
        self.chat
            .messages()
            .get(index)
            .with_context(|| format!("no message #{}", index + 1))
    }

    async fn handle_line(&mut self, line: &str) -> anyhow::Result<Flow> {
        let command = match Command::parse(line.trim_end()) {
            Ok(command) => command,
            Err(usage) => {
                println!("! {}", usage);
                return Ok(Flow::Continue);
            }
        };

        match command {
            Command::Say(text) => {
                self.chat.set_input(&text);
                self.chat.send(&self.user).await?;
            }
            Command::Servers => {
                let selected = self.servers.selected();
                for (i, server) in self.servers.servers().iter().enumerate() {
                    let marker = if Some(server.id) == selected { "*" } else { " " };
                    println!("{} {}. {}", marker, i + 1, server.name);
                }
            }
            Command::Server(index) => {
                let server_id = self
                    .servers
                    .servers()
                    .get(index)
                    .map(|s| s.id)
                    .with_context(|| format!("no server #{}", index + 1))?;
                self.switch_server(server_id).await?;
            }
            Command::NewServer(name) => {
                let server = self.servers.create(&name, self.user.id).await?;
                self.switch_server(server.id).await?;
            }
            Command::Channels => {
                let unread = self.unread.lock().await;
                let selected = self.channels.selected();
                for (i, channel) in self.channels.text_channels().enumerate() {
                    let marker = if Some(channel.id) == selected {
                        "*"
                    } else if unread.is_unread(channel.id) {
                        "•"
                    } else {
                        " "
                    };
                    println!("{} {}. #{}", marker, i + 1, channel.name);
                }
            }
            Command::Channel(index) => {
                let channel_id = self
                    .channels
                    .text_channels()
                    .nth(index)
                    .map(|c| c.id)
                    .with_context(|| format!("no channel #{}", index + 1))?;
                self.open_channel(channel_id).await?;
            }
            Command::NewChannel(name) => {
                let channel = self.channels.create(&name).await?;
                self.open_channel(channel.id).await?;
            }
            Command::Dm(username) => {
                let other = self
                    .backend
                    .user_by_username(&username)
                    .await?
                    .with_context(|| format!("no user named '{}'", username))?;
                let channel = self.channels.open_dm(self.user.id, other.id).await?;
                self.open_channel(channel.id).await?;
            }
            Command::React { index, emoji } => {
                let message_id = self.message_at(index)?.id;
                let added = self
                    .chat
                    .toggle_reaction(message_id, &emoji, self.user.id)
                    .await?;
                println!("{} {}", if added { "+" } else { "-" }, emoji);
            }
            Command::Reply(index) => {
                let message_id = self.message_at(index)?.id;
                self.chat.reply_to(message_id);
                if let Some(target) = self.chat.reply_target() {
                    println!("Replying to {}: {}", target.author_name(), target.content);
                }
            }
            Command::CancelReply => {
                if self.chat.reply_target().is_some() {
                    self.chat.cancel_reply();
                    println!("Reply cancelled.");
                } else {
                    println!("Not replying to anything.");
                }
            }
            Command::Forward { index, channel } => {
                let message = self.message_at(index)?.clone();
                let name = channel.trim_start_matches('#');
                let targets = forward_targets(self.backend.as_ref(), self.user.id).await?;
                let target = targets
                    .iter()
                    .flat_map(|t| t.channels.iter())
                    .find(|c| c.name == name)
                    .with_context(|| format!("no channel named '{}' in your servers", name))?;
                forward(self.backend.as_ref(), &message, target.id, self.user.id).await?;
                println!("Forwarded to #{}", target.name);
            }
            Command::Gif(query) => {
                let first = self.media.gifs(&query).await?.into_iter().next();
                self.attach(first);
            }
            Command::Image(query) => {
                let first = self.media.images(&query).await?.into_iter().next();
                self.attach(first);
            }
            Command::Members => {
                let now = Utc::now();
                for member in self.members.members() {
                    let name = member.user.as_ref().map_or("unknown", |u| u.username.as_str());
                    let dot = if MemberList::is_online(member, now) { "●" } else { "○" };
                    println!("{} {}", dot, name);
                }
                println!("{} online", self.members.online(now));
            }
            Command::Unread => {
                let unread = self.unread.lock().await;
                let names: Vec<String> = self
                    .channels
                    .channels()
                    .iter()
                    .chain(self.channels.dm_channels())
                    .filter(|c| unread.is_unread(c.id))
                    .map(|c| c.name.clone())
                    .collect();
                let elsewhere = unread.unread().len().saturating_sub(names.len());
                if names.is_empty() && elsewhere == 0 {
                    println!("All caught up.");
                } else {
                    for name in names {
                        println!("• {}", name);
                    }
                    if elsewhere > 0 {
                        println!("• {} more in other servers", elsewhere);
                    }
                }
            }
            Command::Username(name) => {
                let user = change_username(self.backend.as_ref(), &self.user, &name, Utc::now()).await?;
                println!("You are now {}", user.username);
                self.session.set_user(user.clone());
                self.user = user;
            }
            Command::Password { new, confirm } => {
                change_password(self.backend.as_ref(), &self.user, &new, &confirm).await?;
                println!("Password updated.");
            }
            Command::Announce(text) => {
                self.announcement.publish(&text).await?;
                self.show_announcement();
            }
            Command::AnnounceOff => {
                self.announcement.disable().await?;
                println!("Announcement hidden.");
            }
            Command::Dismiss => self.announcement.dismiss(),
            Command::Logout => {
                self.presence.blur().await?;
                self.session.logout().await?;
                println!("Signed out.");
                return Ok(Flow::Quit);
            }
            Command::Quit => return Ok(Flow::Quit),
            Command::Help => println!("{}", HELP),
        }
        Ok(Flow::Continue)
    }

    fn attach(&mut self, result: Option<MediaResult>) {
        match result {
            Some(media) => {
                println!("Attached {} (sent with your next message)", media.url);
                self.chat.attach_media(&media.url, media.media_type);
            }
            None => println!("No results."),
        }
    }
}

fn render(number: usize, previous: Option<&Message>, message: &Message) -> String {
    let mut out = String::new();

    if let Some(reply) = &message.reply_to_message {
        let author = reply.author.as_ref().map_or("unknown", |a| a.username.as_str());
        let snippet: String = reply.content.chars().take(60).collect();
        out.push_str(&format!("     ↪ {}: {}\n", author, snippet));
    }

    let grouped = message.reply_to_message.is_none()
        && previous.is_some_and(|prev| is_continuation(prev, message));
    if grouped {
        out.push_str(&format!("{:>3}. {}", number, message.content));
    } else {
        let at = message.created_at.with_timezone(&Local);
        out.push_str(&format!(
            "{:>3}. {} [{}]: {}",
            number,
            message.author_name(),
            format_timestamp(&at, &Local::now()),
            message.content
        ));
    }

    if let Some(url) = &message.media_url {
        out.push_str(&format!(" [{}]", url));
    }
    if !message.reactions.is_empty() {
        let summary: Vec<String> = message
            .reactions
            .iter()
            .map(|(emoji, users)| format!("{} {}", emoji, users.len()))
            .collect();
        out.push_str(&format!("  ({})", summary.join(", ")));
    }
    out
}
