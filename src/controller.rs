use std::sync::Arc;

use tracing::info;

use crate::api::ChannelId;
use crate::error::{Result, TencordError};
use crate::poller::{Poller, PollerState};
use crate::session::Session;

/// Owns the session's one live poller and the channel it targets.
///
/// Every operation takes `&mut self`, so whoever drives the controller (the
/// input loop) cannot issue a second command while a switch is in flight.
pub struct ChannelController {
    session: Arc<Session>,
    target: Option<ChannelId>,
    active: Option<Poller>,
}

impl ChannelController {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            target: None,
            active: None,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn current_channel(&self) -> Option<&ChannelId> {
        self.target.as_ref()
    }

    pub fn poller_state(&self) -> PollerState {
        self.active
            .as_ref()
            .map_or(PollerState::Stopped, Poller::state)
    }

    /// Retarget the session. The old poller is joined before the screen is
    /// cleared and the new channel rendered in full.
    ///
    /// The new channel stays targeted even if its first fetch fails, so a
    /// later refresh retries it.
    pub async fn switch_to(&mut self, channel: ChannelId) -> Result<()> {
        self.stop_active().await;

        info!("Switching to channel {channel}");
        self.target = Some(channel.clone());
        self.session.screen.clear();

        let poller = Poller::start(self.session.clone(), channel).await?;
        self.active = Some(poller);
        Ok(())
    }

    /// Clear and re-render the current channel, restarting a stopped poller.
    pub async fn refresh(&mut self) -> Result<()> {
        let channel = self
            .target
            .clone()
            .ok_or_else(|| TencordError::InvalidRequest("no channel selected".to_string()))?;
        self.switch_to(channel).await
    }

    /// Stop polling and release the session's scratch space.
    pub async fn shutdown(&mut self) {
        self.stop_active().await;
        self.session.cleanup();
    }

    async fn stop_active(&mut self) {
        if let Some(poller) = self.active.take() {
            poller.stop().await;
        }
    }
}
