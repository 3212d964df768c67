use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::api::{ChannelId, RawMessage};
use crate::error::Result;
use crate::message::{chronological, diff};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Running,
    Stopping,
    Stopped,
}

/// Live view of one channel: a spawned loop that fetches on a fixed interval
/// and renders whatever it has not rendered before.
pub struct Poller {
    channel: ChannelId,
    cancel: CancellationToken,
    state: Arc<watch::Sender<PollerState>>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    /// Fetch and render the whole channel, then start polling it.
    ///
    /// Returns once the initial render is on screen. If the initial fetch
    /// fails nothing is spawned.
    pub async fn start(session: Arc<Session>, channel: ChannelId) -> Result<Self> {
        let snapshot = fetch_chronological(&session, &channel).await?;
        for raw in &snapshot {
            session.render(raw).await;
        }

        info!(
            "Polling channel {channel} every {}ms ({} messages)",
            session.poll.interval().as_millis(),
            snapshot.len()
        );

        let cancel = CancellationToken::new();
        let (state, _) = watch::channel(PollerState::Running);
        let state = Arc::new(state);
        let handle = tokio::spawn(run(
            session,
            channel.clone(),
            snapshot,
            cancel.clone(),
            state.clone(),
        ));

        Ok(Self {
            channel,
            cancel,
            state,
            handle: Some(handle),
        })
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    /// Cancel the loop and wait for it to exit. No timeout: a fetch in flight
    /// is abandoned at once, a username lookup runs out its request timeout.
    pub async fn stop(mut self) {
        self.state.send_if_modified(|s| {
            if *s == PollerState::Running {
                *s = PollerState::Stopping;
                true
            } else {
                false
            }
        });
        self.cancel.cancel();

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Poller for {} ended abnormally: {e}", self.channel);
            }
        }
        self.state.send_replace(PollerState::Stopped);
        info!("Stopped polling channel {}", self.channel);
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        // A poller dropped without `stop` must not keep running.
        self.cancel.cancel();
    }
}

async fn fetch_chronological(session: &Session, channel: &ChannelId) -> Result<Vec<RawMessage>> {
    let page = session
        .api
        .fetch_messages(channel, session.poll.limit())
        .await?;
    Ok(chronological(page))
}

async fn run(
    session: Arc<Session>,
    channel: ChannelId,
    mut snapshot: Vec<RawMessage>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<PollerState>>,
) {
    let period = session.poll.interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = fetch_chronological(&session, &channel) => result,
        };

        let current = match fetched {
            Ok(current) => current,
            Err(e) => {
                error!("Polling channel {channel} failed, stopping: {e}");
                session.screen.notice(&format!(
                    "Stopped polling channel {channel}: {e} (use :cr to restart)"
                ));
                break;
            }
        };

        let fresh = diff(&snapshot, &current);
        if !fresh.is_empty() {
            debug!("{} new messages in {channel}", fresh.len());
        }
        for raw in &fresh {
            session.render(raw).await;
        }
        snapshot = current;
    }

    state.send_replace(PollerState::Stopped);
}
