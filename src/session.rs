use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::{ChatApi, RawMessage};
use crate::config::{AttachmentsConfig, Config, PollConfig};
use crate::error::Result;
use crate::message::{self, Message, UsernameCache};
use crate::scratch::ScratchDir;
use crate::screen::Screen;

/// Everything one chat session shares: transport, display, caches, settings.
///
/// Built once at startup and handed to each component behind an `Arc`, so two
/// sessions in one process never see each other's state.
pub struct Session {
    pub api: Arc<dyn ChatApi>,
    pub screen: Arc<dyn Screen>,
    pub usernames: UsernameCache,
    pub scratch: Option<ScratchDir>,
    pub poll: PollConfig,
    pub attachments: AttachmentsConfig,
}

impl Session {
    pub fn new(api: Arc<dyn ChatApi>, screen: Arc<dyn Screen>, config: &Config) -> Result<Self> {
        let scratch = if config.attachments.download {
            Some(ScratchDir::new()?)
        } else {
            None
        };
        Ok(Self {
            api,
            screen,
            usernames: UsernameCache::new(),
            scratch,
            poll: config.poll.clone(),
            attachments: config.attachments.clone(),
        })
    }

    pub async fn normalize(&self, raw: &RawMessage) -> Message {
        message::normalize(raw, self.api.as_ref(), &self.usernames).await
    }

    /// Normalize, draw, then preview any attachments not seen before,
    /// including those of the message being replied to.
    pub async fn render(&self, raw: &RawMessage) {
        let message = self.normalize(raw).await;
        self.screen.render(&message);

        let Some(scratch) = &self.scratch else {
            return;
        };
        let quoted = message.referenced.iter().flat_map(|r| &r.attachments);
        for attachment in message.attachments.iter().chain(quoted) {
            match scratch.fetch(self.api.as_ref(), attachment).await {
                Ok(Some(path)) => self.screen.preview(&path).await,
                Ok(None) => debug!("Attachment {} already cached", attachment.url),
                Err(e) => warn!("Failed to download {}: {e}", attachment.url),
            }
        }
    }

    /// Release scoped resources. Safe to call more than once.
    pub fn cleanup(&self) {
        if let Some(scratch) = &self.scratch {
            if let Err(e) = scratch.cleanup() {
                warn!("Failed to remove scratch directory: {e}");
            }
        }
    }
}
