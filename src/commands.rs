use std::path::PathBuf;

use crate::api::ChannelId;

pub const HELP: &str = "\
Commands:
  :help                       Show this help
  :q                          Quit
  :cr                         Clear the screen and reload the channel
  :attach:<path>[:<caption>]  Upload a file, e.g. :attach:/tmp/cat.png:Look, it's you!
  :sw:<channel id>            Switch to a channel by id
  :li                         List guilds and channels, then type a number to open one
  :fr                         List direct messages, then type a number to open one
  :we                         Show the welcome banner
Anything else is sent to the current channel.";

/// One line of user input, interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Quit,
    Refresh,
    Attach { path: PathBuf, caption: String },
    Switch(ChannelId),
    ListChannels,
    ListFriends,
    Welcome,
    Send(String),
}

impl Command {
    /// `None` for a blank line. Text that is not a known directive is a message,
    /// including lines that merely start with `:`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }

        let command = match line.trim() {
            ":help" => Self::Help,
            ":q" => Self::Quit,
            ":cr" => Self::Refresh,
            ":li" => Self::ListChannels,
            ":fr" => Self::ListFriends,
            ":we" => Self::Welcome,
            trimmed => {
                if let Some(rest) = trimmed.strip_prefix(":attach:") {
                    // Path runs to the next colon; the caption keeps any colons it has.
                    let (path, caption) = rest.split_once(':').unwrap_or((rest, ""));
                    if path.is_empty() {
                        return Some(Self::Send(line.to_string()));
                    }
                    Self::Attach {
                        path: PathBuf::from(path),
                        caption: caption.to_string(),
                    }
                } else if let Some(id) = trimmed.strip_prefix(":sw:").map(str::trim) {
                    if id.is_empty() {
                        return Some(Self::Send(line.to_string()));
                    }
                    Self::Switch(ChannelId::new(id))
                } else {
                    Self::Send(line.to_string())
                }
            }
        };
        Some(command)
    }
}
