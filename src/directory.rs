use std::fmt::Write as _;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use crate::api::types::{CHANNEL_TYPE_DM, CHANNEL_TYPE_GUILD_TEXT};
use crate::api::{Channel, ChannelId, ChatApi, Guild};
use crate::error::{Result, TencordError};

/// Guild channel lists fetched at once.
const GUILD_FETCH_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub number: usize,
    pub channel: ChannelId,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: String,
    pub entries: Vec<Entry>,
}

/// Channels numbered from 1 in display order, so a typed number can pick one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    sections: Vec<Section>,
}

impl Listing {
    fn push(&mut self, title: String, channels: impl IntoIterator<Item = (ChannelId, String)>) {
        let mut number = self.len();
        let entries = channels
            .into_iter()
            .map(|(channel, label)| {
                number += 1;
                Entry {
                    number,
                    channel,
                    label,
                }
            })
            .collect();
        self.sections.push(Section { title, entries });
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.iter().map(|s| s.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn select(&self, number: usize) -> Option<&ChannelId> {
        self.sections
            .iter()
            .flat_map(|s| &s.entries)
            .find(|e| e.number == number)
            .map(|e| &e.channel)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            let _ = writeln!(out, "== {} ==", section.title);
            for entry in &section.entries {
                let _ = writeln!(out, "  {:>3} - {} - {}", entry.number, entry.label, entry.channel);
            }
        }
        if self.is_empty() {
            out.push_str("(no channels)\n");
        }
        out
    }
}

/// Text channels of every guild the user is in, in guild order.
pub async fn guild_channels(api: &dyn ChatApi) -> Result<Listing> {
    let guilds = api.list_guilds().await?;
    debug!("Listing channels of {} guilds", guilds.len());

    let per_guild: Vec<(Guild, Vec<Channel>)> = stream::iter(guilds)
        .map(|guild| async move {
            let channels = api.list_guild_channels(&guild.id).await?;
            Ok::<_, TencordError>((guild, channels))
        })
        .buffered(GUILD_FETCH_CONCURRENCY)
        .try_collect()
        .await?;

    let mut listing = Listing::default();
    for (guild, channels) in per_guild {
        let title = if guild.owner {
            format!("{} (owner)", guild.name)
        } else {
            guild.name
        };
        let text_channels = channels
            .into_iter()
            .filter(|c| c.kind == CHANNEL_TYPE_GUILD_TEXT)
            .map(|c| {
                let label = c.name.clone().unwrap_or_else(|| c.id.clone());
                (ChannelId::new(c.id), label)
            });
        listing.push(title, text_channels);
    }
    Ok(listing)
}

/// One-to-one direct message channels, labelled with the other user's name.
pub async fn friends(api: &dyn ChatApi) -> Result<Listing> {
    let channels = api.list_private_channels().await?;
    let dms = channels
        .into_iter()
        .filter(|c| c.kind == CHANNEL_TYPE_DM)
        .map(|c| {
            let label = c
                .recipients
                .first()
                .map(|u| u.username.clone())
                .unwrap_or_else(|| c.id.clone());
            (ChannelId::new(c.id), label)
        });

    let mut listing = Listing::default();
    listing.push("Direct messages".to_string(), dms);
    Ok(listing)
}
