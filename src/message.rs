use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::api::{ChatApi, RawAttachment, RawMessage, User};

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// A message ready for display: mentions resolved, reference flattened.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub referenced: Option<ReferencedMessage>,
}

/// The message a reply points at. Carries no reference of its own: the
/// service never nests replies deeper than one level.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencedMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
}

impl From<&RawAttachment> for Attachment {
    fn from(raw: &RawAttachment) -> Self {
        Self {
            url: raw.url.clone(),
            filename: raw.filename.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// UsernameCache
// ---------------------------------------------------------------------------

/// User id → display name. Append-only for the life of a session.
#[derive(Default)]
pub struct UsernameCache {
    names: RwLock<HashMap<String, String>>,
}

impl UsernameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, user_id: &str) -> Option<String> {
        self.names.read().await.get(user_id).cloned()
    }

    /// Record a name unless one is already known.
    pub async fn insert(&self, user_id: &str, name: &str) {
        self.names
            .write()
            .await
            .entry(user_id.to_string())
            .or_insert_with(|| name.to_string());
    }

    /// Learn the names a payload already carries.
    pub async fn seed(&self, users: &[User]) {
        if users.is_empty() {
            return;
        }
        let mut names = self.names.write().await;
        for user in users {
            names
                .entry(user.id.clone())
                .or_insert_with(|| user.username.clone());
        }
    }

    pub async fn len(&self) -> usize {
        self.names.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.names.read().await.is_empty()
    }

    /// Cached name, else a lookup. A failed lookup falls back to the raw id
    /// and is not cached, so the next render tries again.
    pub async fn resolve(&self, api: &dyn ChatApi, user_id: &str) -> String {
        if let Some(name) = self.get(user_id).await {
            return name;
        }
        match api.resolve_username(user_id).await {
            Ok(name) => {
                self.insert(user_id, &name).await;
                name
            }
            Err(e) => {
                warn!("Could not resolve user {user_id}: {e}");
                user_id.to_string()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<@!?(\d+)>").expect("static regex"))
}

/// Replace `<@id>` and `<@!id>` tokens with `@name`. Role mentions (`<@&id>`)
/// are left as they are.
pub async fn resolve_mentions(content: &str, api: &dyn ChatApi, names: &UsernameCache) -> String {
    let re = mention_regex();
    let ids: Vec<String> = re
        .captures_iter(content)
        .map(|caps| caps[1].to_string())
        .collect();

    let mut resolved: HashMap<String, String> = HashMap::new();
    for id in ids {
        if !resolved.contains_key(&id) {
            let name = names.resolve(api, &id).await;
            resolved.insert(id, name);
        }
    }
    if resolved.is_empty() {
        return content.to_string();
    }

    re.replace_all(content, |caps: &regex::Captures| {
        let id = &caps[1];
        let name = resolved.get(id).map(String::as_str).unwrap_or(id);
        format!("@{name}")
    })
    .into_owned()
}

/// Turn a service payload into a display-ready [`Message`].
pub async fn normalize(raw: &RawMessage, api: &dyn ChatApi, names: &UsernameCache) -> Message {
    names.seed(&raw.mentions).await;

    let referenced = match raw.referenced_message.as_deref() {
        Some(parent) => {
            names.seed(&parent.mentions).await;
            if parent.referenced_message.is_some() {
                debug!("Not expanding nested reference of message {}", parent.id);
            }
            Some(ReferencedMessage {
                id: parent.id.clone(),
                timestamp: parent.timestamp,
                author: parent.author.username.clone(),
                content: resolve_mentions(&parent.content, api, names).await,
                attachments: parent.attachments.iter().map(Attachment::from).collect(),
            })
        }
        None => None,
    };

    Message {
        id: raw.id.clone(),
        timestamp: raw.timestamp,
        author: raw.author.username.clone(),
        content: resolve_mentions(&raw.content, api, names).await,
        attachments: raw.attachments.iter().map(Attachment::from).collect(),
        referenced,
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Service order (newest first) → reading order (oldest first).
pub fn chronological(mut newest_first: Vec<RawMessage>) -> Vec<RawMessage> {
    newest_first.reverse();
    newest_first
}

/// Members of `current` absent from `previous`, in `current`'s order.
///
/// Membership is full structural equality. Both sides are bounded by the page
/// size, so the quadratic scan is fine.
pub fn diff<T: PartialEq + Clone>(previous: &[T], current: &[T]) -> Vec<T> {
    current
        .iter()
        .filter(|item| !previous.contains(item))
        .cloned()
        .collect()
}
