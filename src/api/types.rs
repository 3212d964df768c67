use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Channel type of a guild text channel.
pub const CHANNEL_TYPE_GUILD_TEXT: u8 = 0;
/// Channel type of a one-to-one direct message.
pub const CHANNEL_TYPE_DM: u8 = 1;

// ---------------------------------------------------------------------------
// Messages (as served)
// ---------------------------------------------------------------------------

/// A message exactly as the service returned it.
///
/// The typed fields are the ones the client reads; everything else lands in
/// `extra`, so `PartialEq` compares the whole payload. The diff engine relies
/// on that: two payloads are the same message only if every field matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub author: User,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<RawAttachment>,
    #[serde(default)]
    pub mentions: Vec<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_message: Option<Box<RawMessage>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAttachment {
    pub url: String,
    pub filename: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub recipients: Vec<User>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guild {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub owner: bool,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMessage {
    pub content: String,
    pub attachments: Vec<OutgoingAttachment>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachments: Vec::new(),
        }
    }
}

/// Reference to an object already uploaded to storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingAttachment {
    pub id: String,
    pub filename: String,
    pub uploaded_filename: String,
}

// ---------------------------------------------------------------------------
// Upload negotiation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct UploadRequest {
    pub files: Vec<UploadFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadFile {
    pub filename: String,
    pub file_size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub attachments: Vec<UploadSlot>,
}

/// Storage destination handed out by the negotiation endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadSlot {
    pub upload_url: String,
    pub upload_filename: String,
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
    pub undelete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: String,
    pub token: String,
}
