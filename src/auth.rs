use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::Client;
use crate::config::{non_empty, Config};
use crate::error::{Result, TencordError};

/// Token persisted after a login, reused until it ages past the TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCache {
    pub user_id: String,
    pub token: String,
    pub timestamp: DateTime<Utc>,
}

impl TokenCache {
    /// Read the cache file. A missing or unreadable file is treated as no cache.
    pub fn load(path: &Path) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!("No token cache at {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!("Ignoring corrupt token cache {}: {e}", path.display());
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn is_fresh(&self, ttl_secs: u64, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.timestamp).num_seconds();
        // A timestamp in the future (clock skew) counts as fresh.
        u64::try_from(age).map_or(true, |age| age < ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Flag,
    Config,
    Cache,
    Login,
}

/// Find a token: explicit flag, then config, then a fresh cache file, then
/// a login with the configured credentials (which refreshes the cache).
pub async fn resolve_token(
    flag: Option<&str>,
    config: &Config,
    cache_path: &Path,
) -> Result<(String, TokenSource)> {
    if let Some(token) = flag.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok((token.to_string(), TokenSource::Flag));
    }
    if let Some(token) = non_empty(&config.auth.token) {
        return Ok((token.to_string(), TokenSource::Config));
    }
    if let Some(cache) = TokenCache::load(cache_path) {
        if cache.is_fresh(config.auth.token_ttl_secs, Utc::now()) {
            debug!("Using cached token for user {}", cache.user_id);
            return Ok((cache.token, TokenSource::Cache));
        }
        info!("Cached token is older than {}s, logging in again", config.auth.token_ttl_secs);
    }

    let (Some(email), Some(password)) = (
        non_empty(&config.auth.email),
        non_empty(&config.auth.password),
    ) else {
        return Err(TencordError::Config(
            "no token available: pass --token, set auth.token, or set auth.email and auth.password"
                .to_string(),
        ));
    };

    let login = Client::login(&config.api, email, password).await?;
    let cache = TokenCache {
        user_id: login.user_id,
        token: login.token,
        timestamp: Utc::now(),
    };
    if let Err(e) = cache.save(cache_path) {
        warn!("Failed to write token cache {}: {e}", cache_path.display());
    }
    info!("Logged in as user {}", cache.user_id);
    Ok((cache.token, TokenSource::Login))
}
