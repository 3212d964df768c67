pub mod client;
pub mod types;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use client::Client;
pub use types::{
    Channel, Guild, OutgoingAttachment, OutgoingMessage, RawAttachment, RawMessage, UploadSlot,
    User,
};

/// Opaque identifier of a message destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Every remote action the client performs.
///
/// Implementations map non-2xx responses onto the transport variants of
/// [`crate::error::TencordError`] and bound every call with a timeout.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Latest messages of a channel, newest first.
    async fn fetch_messages(&self, channel: &ChannelId, limit: u32) -> Result<Vec<RawMessage>>;

    async fn send_message(
        &self,
        channel: &ChannelId,
        message: &OutgoingMessage,
    ) -> Result<RawMessage>;

    /// Display name of a user. Retries once when rate limited.
    async fn resolve_username(&self, user_id: &str) -> Result<String>;

    async fn negotiate_upload(
        &self,
        channel: &ChannelId,
        filename: &str,
        size: u64,
    ) -> Result<UploadSlot>;

    /// PUT raw bytes to a negotiated storage URL.
    async fn transfer(&self, upload_url: &str, bytes: Vec<u8>) -> Result<()>;

    async fn current_user(&self) -> Result<User>;

    async fn list_private_channels(&self) -> Result<Vec<Channel>>;

    async fn list_guilds(&self) -> Result<Vec<Guild>>;

    async fn list_guild_channels(&self, guild_id: &str) -> Result<Vec<Channel>>;

    /// Fetch the body of an attachment URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}
