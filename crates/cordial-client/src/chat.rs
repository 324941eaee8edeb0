use std::collections::HashMap;
use std::fmt::Display;

use chrono::{DateTime, TimeZone};
use tracing::{debug, warn};
use uuid::Uuid;

use cordial_api::SharedBackend;
use cordial_types::api::NewMessage;
use cordial_types::events::{ChangeEvent, ChangeFilter, ChangeKind, Table};
use cordial_types::models::{AuthorSummary, MediaType, Message, ReplyPreview, User};

use crate::error::{ClientError, ClientResult};

/// How many messages a channel shows when opened.
pub const HISTORY_LIMIT: u32 = 100;

/// Messages by the same author closer together than this render as one group.
const GROUP_WINDOW_SECS: i64 = 5 * 60;

pub struct ChatView {
    pub(crate) backend: SharedBackend,
    channel_id: Option<Uuid>,
    pub(crate) messages: Vec<Message>,
    input: String,
    reply_to: Option<Uuid>,
    attachment: Option<(String, MediaType)>,
    authors: HashMap<Uuid, AuthorSummary>,
}

impl ChatView {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            channel_id: None,
            messages: Vec::new(),
            input: String::new(),
            reply_to: None,
            attachment: None,
            authors: HashMap::new(),
        }
    }

    pub fn channel_id(&self) -> Option<Uuid> {
        self.channel_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: &str) {
        self.input = text.to_string();
    }

    pub fn reply_target(&self) -> Option<&Message> {
        self.message(self.reply_to?)
    }

    pub fn reply_to(&mut self, message_id: Uuid) {
        self.reply_to = Some(message_id);
    }

    pub fn cancel_reply(&mut self) {
        self.reply_to = None;
    }

    pub fn attachment(&self) -> Option<&(String, MediaType)> {
        self.attachment.as_ref()
    }

    pub fn attach_media(&mut self, url: &str, media_type: MediaType) {
        self.attachment = Some((url.to_string(), media_type));
    }

    pub fn filter(&self) -> Option<ChangeFilter> {
        self.channel_id
            .map(|id| ChangeFilter::table(Table::Messages).eq("channel_id", id))
    }

    /// Opens a channel with its latest messages. Drafts do not carry over.
    pub async fn open(&mut self, channel_id: Uuid) -> ClientResult<()> {
        let messages = self.backend.list_messages(channel_id, HISTORY_LIMIT).await?;
        for message in &messages {
            if let Some(author) = &message.author {
                self.authors.insert(message.user_id, author.clone());
            }
        }

        self.channel_id = Some(channel_id);
        self.messages = messages;
        self.reply_to = None;
        self.attachment = None;
        Ok(())
    }

    /// Merges a message change into the open channel. Returns `true` when
    /// the visible list changed.
    pub async fn apply(&mut self, event: &ChangeEvent) -> bool {
        if event.table != Table::Messages {
            return false;
        }

        match event.kind {
            ChangeKind::Delete => {
                let Some(id) = event.row_id() else {
                    return false;
                };
                let before = self.messages.len();
                self.messages.retain(|m| m.id != id);
                self.messages.len() != before
            }
            ChangeKind::Insert => match decode(event) {
                Some(message) if Some(message.channel_id) == self.channel_id => {
                    self.insert(message).await
                }
                _ => false,
            },
            ChangeKind::Update => match decode(event) {
                Some(message) => self.update(message),
                None => false,
            },
        }
    }

    async fn insert(&mut self, mut message: Message) -> bool {
        // Our own optimistic row already holds this id.
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }

        if message.author.is_none() {
            message.author = self.author(message.user_id).await;
        }
        if message.reply_to_message.is_none() {
            message.reply_to_message = message
                .reply_to_message_id
                .and_then(|id| self.preview(id))
                .map(Box::new);
        }

        self.push(message);
        true
    }

    fn update(&mut self, changed: Message) -> bool {
        let Some(existing) = self.messages.iter_mut().find(|m| m.id == changed.id) else {
            return false;
        };
        let author = existing.author.take().or(changed.author.clone());
        let reply = existing.reply_to_message.take().or(changed.reply_to_message.clone());
        *existing = Message {
            author,
            reply_to_message: reply,
            ..changed
        };
        true
    }

    fn push(&mut self, message: Message) {
        let newer_exists = self
            .messages
            .last()
            .is_some_and(|last| last.created_at > message.created_at);
        self.messages.push(message);
        if newer_exists {
            self.messages.sort_by_key(|m| m.created_at);
        }
    }

    async fn author(&mut self, user_id: Uuid) -> Option<AuthorSummary> {
        if let Some(author) = self.authors.get(&user_id) {
            return Some(author.clone());
        }
        match self.backend.user_by_id(user_id).await {
            Ok(Some(user)) => {
                let summary = user.summary();
                self.authors.insert(user_id, summary.clone());
                Some(summary)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to load author {}: {}", user_id, e);
                None
            }
        }
    }

    fn preview(&self, id: Uuid) -> Option<ReplyPreview> {
        self.message(id).map(|m| ReplyPreview {
            id: m.id,
            user_id: m.user_id,
            content: m.content.clone(),
            created_at: m.created_at,
            author: m.author.clone(),
        })
    }

    /// Sends the current input to the open channel.
    ///
    /// The message shows up immediately under a fresh id; if the write fails
    /// it is taken back out and the input, reply target and attachment are
    /// restored. Returns `None` when there was nothing to send.
    pub async fn send(&mut self, user: &User) -> ClientResult<Option<Uuid>> {
        let channel_id = self.channel_id.ok_or(ClientError::NothingSelected("channel"))?;
        let content = self.input.trim().to_string();
        if content.is_empty() && self.attachment.is_none() {
            return Ok(None);
        }

        let draft = std::mem::take(&mut self.input);
        let reply_to = self.reply_to.take();
        let attachment = self.attachment.take();

        let mut new = NewMessage::text(channel_id, user.id, &content);
        new.reply_to_message_id = reply_to;
        if let Some((url, media_type)) = &attachment {
            new.media_url = Some(url.clone());
            new.media_type = Some(*media_type);
        }

        let optimistic = Message {
            id: new.id,
            channel_id,
            user_id: user.id,
            content: new.content.clone(),
            media_url: new.media_url.clone(),
            media_type: new.media_type,
            created_at: new.created_at,
            author: Some(user.summary()),
            reactions: Default::default(),
            reply_to_message_id: reply_to,
            reply_to_message: reply_to.and_then(|id| self.preview(id)).map(Box::new),
        };
        self.push(optimistic);

        match self.backend.insert_message(&new).await {
            Ok(stored) => {
                if let Some(row) = self.messages.iter_mut().find(|m| m.id == stored.id) {
                    *row = stored;
                }
                if let Err(e) = self.backend.touch_channel(channel_id, new.created_at).await {
                    warn!("Failed to update activity for channel {}: {}", channel_id, e);
                }
                debug!("Sent message {}", new.id);
                Ok(Some(new.id))
            }
            Err(e) => {
                self.messages.retain(|m| m.id != new.id);
                self.input = draft;
                self.reply_to = reply_to;
                self.attachment = attachment;
                Err(e.into())
            }
        }
    }
}

fn decode(event: &ChangeEvent) -> Option<Message> {
    match event.record_as::<Message>() {
        Ok(message) => message,
        Err(e) => {
            warn!("Undecodable message change: {}", e);
            None
        }
    }
}

/// Whether `message` continues the group started by `previous`.
pub fn is_continuation(previous: &Message, message: &Message) -> bool {
    previous.user_id == message.user_id
        && (message.created_at - previous.created_at).num_seconds() < GROUP_WINDOW_SECS
}

/// `Today at 3:04 PM`, `Yesterday at 9:15 AM`, or `05/01/2024` for anything older.
pub fn format_timestamp<Tz>(at: &DateTime<Tz>, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let day = at.date_naive();
    let today = now.date_naive();

    if day == today {
        format!("Today at {}", at.format("%-I:%M %p"))
    } else if today.pred_opt() == Some(day) {
        format!("Yesterday at {}", at.format("%-I:%M %p"))
    } else {
        at.format("%m/%d/%Y").to_string()
    }
}
