//! Scripted fakes shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::api::{
    Channel, ChannelId, ChatApi, Guild, OutgoingMessage, RawMessage, UploadSlot, User,
};
use crate::config::Config;
use crate::error::{Result, TencordError};
use crate::message::Message;
use crate::session::Session;
use crate::screen::Screen;

pub(crate) fn raw_message(id: &str, content: &str) -> RawMessage {
    let minute = id.bytes().map(u32::from).sum::<u32>() % 60;
    serde_json::from_value(json!({
        "id": id,
        "timestamp": format!("2023-06-01T10:{minute:02}:00+00:00"),
        "author": {"id": "1", "username": "alice"},
        "content": content,
        "attachments": []
    }))
    .expect("valid message payload")
}

/// Config with a short poll interval so loop tests finish quickly.
pub(crate) fn fast_config() -> Config {
    let mut config = Config::default();
    config.poll.interval_ms = 20;
    config
}

pub(crate) fn test_session(
    api: Arc<FakeApi>,
    screen: Arc<RecordingScreen>,
    config: &Config,
) -> Arc<Session> {
    Arc::new(Session::new(api, screen, config).expect("session"))
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// FakeApi
// ---------------------------------------------------------------------------

enum Page {
    Messages(Vec<RawMessage>),
    Failure(String),
}

#[derive(Default)]
pub(crate) struct FakeApi {
    pages: Mutex<HashMap<String, VecDeque<Page>>>,
    last_page: Mutex<HashMap<String, Vec<RawMessage>>>,
    fetches: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, OutgoingMessage)>>,
    negotiations: Mutex<Vec<(String, String, u64)>>,
    transfers: Mutex<Vec<(String, Vec<u8>)>>,
    lookups: Mutex<Vec<String>>,
    downloads: Mutex<Vec<String>>,
    usernames: HashMap<String, String>,
    files: HashMap<String, Vec<u8>>,
    upload_slot: Option<UploadSlot>,
    reject_negotiation: bool,
    reject_transfer: bool,
    reject_send: bool,
    stall_send: bool,
    guilds: Vec<Guild>,
    guild_channels: HashMap<String, Vec<Channel>>,
    private_channels: Vec<Channel>,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_username(mut self, id: &str, name: &str) -> Self {
        self.usernames.insert(id.into(), name.into());
        self
    }

    pub(crate) fn with_download(mut self, url: &str, bytes: &[u8]) -> Self {
        self.files.insert(url.into(), bytes.to_vec());
        self
    }

    pub(crate) fn with_upload_slot(mut self, upload_url: &str, upload_filename: &str) -> Self {
        self.upload_slot = Some(UploadSlot {
            upload_url: upload_url.into(),
            upload_filename: upload_filename.into(),
        });
        self
    }

    pub(crate) fn rejecting_negotiation(mut self) -> Self {
        self.reject_negotiation = true;
        self
    }

    pub(crate) fn rejecting_transfer(mut self) -> Self {
        self.reject_transfer = true;
        self
    }

    pub(crate) fn rejecting_send(mut self) -> Self {
        self.reject_send = true;
        self
    }

    /// Record sends but never answer them.
    pub(crate) fn stalling_send(mut self) -> Self {
        self.stall_send = true;
        self
    }

    pub(crate) fn with_guild(mut self, id: &str, name: &str, channels: &[(&str, &str)]) -> Self {
        self.guilds.push(Guild {
            id: id.into(),
            name: name.into(),
            owner: false,
        });
        let channels = channels
            .iter()
            .map(|(cid, cname)| Channel {
                id: (*cid).into(),
                kind: crate::api::types::CHANNEL_TYPE_GUILD_TEXT,
                name: Some((*cname).into()),
                recipients: vec![],
            })
            .collect();
        self.guild_channels.insert(id.into(), channels);
        self
    }

    /// A guild whose channel list cannot be fetched.
    pub(crate) fn with_unreachable_guild(mut self, id: &str, name: &str) -> Self {
        self.guilds.push(Guild {
            id: id.into(),
            name: name.into(),
            owner: false,
        });
        self
    }

    pub(crate) fn with_private_channel(mut self, id: &str, kind: u8, recipient: &str) -> Self {
        self.private_channels.push(Channel {
            id: id.into(),
            kind,
            name: None,
            recipients: vec![User {
                id: format!("u-{recipient}"),
                username: recipient.into(),
                extra: Default::default(),
            }],
        });
        self
    }

    /// Queue the next page for a channel, in service order (newest first).
    /// Once the queue runs dry the last page is served again.
    pub(crate) fn push_page(&self, channel: &str, newest_first: Vec<RawMessage>) {
        lock(&self.pages)
            .entry(channel.into())
            .or_default()
            .push_back(Page::Messages(newest_first));
    }

    pub(crate) fn push_failure(&self, channel: &str, reason: &str) {
        lock(&self.pages)
            .entry(channel.into())
            .or_default()
            .push_back(Page::Failure(reason.into()));
    }

    pub(crate) fn fetch_count(&self, channel: &str) -> usize {
        lock(&self.fetches).iter().filter(|c| *c == channel).count()
    }

    pub(crate) fn sent(&self) -> Vec<(String, OutgoingMessage)> {
        lock(&self.sent).clone()
    }

    pub(crate) fn negotiations(&self) -> Vec<(String, String, u64)> {
        lock(&self.negotiations).clone()
    }

    pub(crate) fn transfers(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.transfers).clone()
    }

    pub(crate) fn lookups(&self) -> Vec<String> {
        lock(&self.lookups).clone()
    }

    pub(crate) fn downloads(&self) -> Vec<String> {
        lock(&self.downloads).clone()
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn fetch_messages(&self, channel: &ChannelId, _limit: u32) -> Result<Vec<RawMessage>> {
        let key = channel.as_str().to_string();
        lock(&self.fetches).push(key.clone());
        let next = lock(&self.pages).get_mut(&key).and_then(|q| q.pop_front());
        match next {
            Some(Page::Messages(page)) => {
                lock(&self.last_page).insert(key, page.clone());
                Ok(page)
            }
            Some(Page::Failure(reason)) => Err(TencordError::Server(reason)),
            None => Ok(lock(&self.last_page).get(&key).cloned().unwrap_or_default()),
        }
    }

    async fn send_message(
        &self,
        channel: &ChannelId,
        message: &OutgoingMessage,
    ) -> Result<RawMessage> {
        if self.reject_send {
            return Err(TencordError::Server("send rejected".into()));
        }
        let count = {
            let mut sent = lock(&self.sent);
            sent.push((channel.as_str().to_string(), message.clone()));
            sent.len()
        };
        if self.stall_send {
            std::future::pending::<()>().await;
        }
        Ok(raw_message(&format!("sent-{count}"), &message.content))
    }

    async fn resolve_username(&self, user_id: &str) -> Result<String> {
        lock(&self.lookups).push(user_id.to_string());
        self.usernames
            .get(user_id)
            .cloned()
            .ok_or_else(|| TencordError::NotFound(format!("user {user_id}")))
    }

    async fn negotiate_upload(
        &self,
        channel: &ChannelId,
        filename: &str,
        size: u64,
    ) -> Result<UploadSlot> {
        lock(&self.negotiations).push((channel.as_str().to_string(), filename.to_string(), size));
        if self.reject_negotiation {
            return Err(TencordError::InvalidRequest("file too large".into()));
        }
        Ok(self.upload_slot.clone().unwrap_or_else(|| UploadSlot {
            upload_url: format!("https://storage.example/up/{filename}?upload_id=abc"),
            upload_filename: format!("up/{filename}"),
        }))
    }

    async fn transfer(&self, upload_url: &str, bytes: Vec<u8>) -> Result<()> {
        lock(&self.transfers).push((upload_url.to_string(), bytes));
        if self.reject_transfer {
            return Err(TencordError::Server("503 Service Unavailable".into()));
        }
        Ok(())
    }

    async fn current_user(&self) -> Result<User> {
        Ok(User {
            id: "1".into(),
            username: "alice".into(),
            extra: Default::default(),
        })
    }

    async fn list_private_channels(&self) -> Result<Vec<Channel>> {
        Ok(self.private_channels.clone())
    }

    async fn list_guilds(&self) -> Result<Vec<Guild>> {
        Ok(self.guilds.clone())
    }

    async fn list_guild_channels(&self, guild_id: &str) -> Result<Vec<Channel>> {
        self.guild_channels
            .get(guild_id)
            .cloned()
            .ok_or_else(|| TencordError::NotFound(format!("guild {guild_id}")))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        lock(&self.downloads).push(url.to_string());
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| TencordError::NotFound(url.to_string()))
    }
}

// ---------------------------------------------------------------------------
// RecordingScreen
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ScreenEvent {
    Clear,
    Render { id: String, content: String },
    Notice(String),
    Preview(PathBuf),
}

#[derive(Default)]
pub(crate) struct RecordingScreen {
    events: Mutex<Vec<ScreenEvent>>,
}

impl RecordingScreen {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn events(&self) -> Vec<ScreenEvent> {
        lock(&self.events).clone()
    }

    pub(crate) fn rendered_ids(&self) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                ScreenEvent::Render { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn notices(&self) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                ScreenEvent::Notice(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn clears(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|e| matches!(e, ScreenEvent::Clear))
            .count()
    }
}

#[async_trait]
impl Screen for RecordingScreen {
    fn clear(&self) {
        lock(&self.events).push(ScreenEvent::Clear);
    }

    fn render(&self, message: &Message) {
        lock(&self.events).push(ScreenEvent::Render {
            id: message.id.clone(),
            content: message.content.clone(),
        });
    }

    fn notice(&self, text: &str) {
        lock(&self.events).push(ScreenEvent::Notice(text.to_string()));
    }

    async fn preview(&self, path: &Path) {
        lock(&self.events).push(ScreenEvent::Preview(path.to_path_buf()));
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    cond()
}
