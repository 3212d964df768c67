use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::{ChannelId, OutgoingMessage};
use crate::commands::{Command, HELP};
use crate::controller::ChannelController;
use crate::directory::{self, Listing};
use crate::error::Result;
use crate::session::Session;
use crate::upload::AttachmentPipeline;

const SELECT_FIRST: &str = "Select a channel first (:li, :fr or :sw:<channel id>)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Routes input lines to the controller, the upload pipeline and the
/// directory. One line is handled to completion before the next.
pub struct App {
    controller: ChannelController,
    /// Set by `:li`/`:fr`; a following numeric line picks from it.
    pending: Option<Listing>,
}

impl App {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            controller: ChannelController::new(session),
            pending: None,
        }
    }

    pub fn controller(&self) -> &ChannelController {
        &self.controller
    }

    fn session(&self) -> &Arc<Session> {
        self.controller.session()
    }

    fn notice(&self, text: &str) {
        self.session().screen.notice(text);
    }

    pub async fn handle_line(&mut self, line: &str) -> Flow {
        if let Some(listing) = self.pending.take() {
            if let Ok(number) = line.trim().parse::<usize>() {
                match listing.select(number).cloned() {
                    Some(channel) => self.run(Command::Switch(channel)).await,
                    None => self.notice(&format!("No channel numbered {number}")),
                }
                return Flow::Continue;
            }
            debug!("Selection abandoned");
        }

        match Command::parse(line) {
            Some(command) => self.execute(command).await,
            None => Flow::Continue,
        }
    }

    pub async fn execute(&mut self, command: Command) -> Flow {
        if command == Command::Quit {
            self.shutdown().await;
            return Flow::Quit;
        }
        self.run(command).await;
        Flow::Continue
    }

    /// Handle lines until `:q`, end of input or `interrupt`. The interrupt
    /// also abandons a command still in flight. Every exit leaves the
    /// session shut down.
    pub async fn read_loop(
        &mut self,
        lines: &mut mpsc::Receiver<String>,
        interrupt: impl Future<Output = ()>,
    ) {
        tokio::pin!(interrupt);
        loop {
            let line = tokio::select! {
                _ = &mut interrupt => break,
                line = lines.recv() => line,
            };
            let Some(line) = line else {
                warn!("Input closed");
                break;
            };
            let flow = tokio::select! {
                _ = &mut interrupt => {
                    info!("Interrupted while handling {line:?}");
                    break;
                }
                flow = self.handle_line(&line) => flow,
            };
            if flow == Flow::Quit {
                return;
            }
        }
        self.shutdown().await;
    }

    /// Stop the poller and release session resources.
    pub async fn shutdown(&mut self) {
        info!("Shutting down");
        self.controller.shutdown().await;
    }

    /// Failures are shown and the loop carries on.
    async fn run(&mut self, command: Command) {
        if let Err(e) = self.dispatch(command).await {
            warn!("Command failed: {e}");
            self.notice(&format!("Error: {e}"));
        }
    }

    async fn dispatch(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Help => self.notice(HELP),
            Command::Quit => self.controller.shutdown().await,
            Command::Welcome => self.welcome().await?,
            Command::Switch(channel) => self.controller.switch_to(channel).await?,
            Command::ListChannels => {
                let listing = directory::guild_channels(self.session().api.as_ref()).await?;
                self.offer(listing);
            }
            Command::ListFriends => {
                let listing = directory::friends(self.session().api.as_ref()).await?;
                self.offer(listing);
            }
            Command::Refresh => {
                if self.selected().is_some() {
                    self.controller.refresh().await?;
                }
            }
            Command::Send(text) => {
                if let Some(channel) = self.selected() {
                    self.session()
                        .api
                        .send_message(&channel, &OutgoingMessage::text(text))
                        .await?;
                }
            }
            Command::Attach { path, caption } => {
                if let Some(channel) = self.selected() {
                    self.attach(&channel, &path, &caption).await?;
                }
            }
        }
        Ok(())
    }

    /// The current channel, or a notice that there is none yet.
    fn selected(&self) -> Option<ChannelId> {
        let channel = self.controller.current_channel().cloned();
        if channel.is_none() {
            self.notice(SELECT_FIRST);
        }
        channel
    }

    fn offer(&mut self, listing: Listing) {
        self.notice(&listing.render());
        if !listing.is_empty() {
            self.notice("Type a number to open that channel.");
            self.pending = Some(listing);
        }
    }

    async fn attach(&self, channel: &ChannelId, path: &Path, caption: &str) -> Result<()> {
        let session = self.session();
        let pipeline =
            AttachmentPipeline::new(session.api.as_ref(), session.attachments.max_upload_bytes);
        pipeline.send(channel, path, caption).await?;
        Ok(())
    }

    async fn welcome(&self) -> Result<()> {
        let user = self.session().api.current_user().await?;
        self.notice(&format!("Welcome {}!\n\n{HELP}", user.username));
        Ok(())
    }
}
