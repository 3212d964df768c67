use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TencordError};

/// Largest page the messages endpoint will return.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub attachments: AttachmentsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_rate_limit_retry_ms")]
    pub rate_limit_retry_ms: u64,
    /// Bound for attachment bodies (storage PUT, download), which can be
    /// far larger than API payloads.
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://discord.com/api/v9".to_string()
}
fn default_timeout() -> u64 {
    5
}
fn default_user_agent() -> String {
    format!("tencord/{}", env!("CARGO_PKG_VERSION"))
}
fn default_rate_limit_retry_ms() -> u64 {
    1000
}
fn default_transfer_timeout() -> u64 {
    300
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
            rate_limit_retry_ms: default_rate_limit_retry_ms(),
            transfer_timeout_secs: default_transfer_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn rate_limit_retry(&self) -> Duration {
        Duration::from_millis(self.rate_limit_retry_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

fn default_token_ttl() -> u64 {
    3600
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: None,
            email: None,
            password: None,
            token_ttl_secs: default_token_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub channel: Option<String>,
}

fn default_interval_ms() -> u64 {
    3000
}
fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            page_size: default_page_size(),
            channel: None,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    /// Page size clamped to what the service accepts.
    pub fn limit(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentsConfig {
    #[serde(default)]
    pub download: bool,
    #[serde(default)]
    pub preview_command: Vec<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_max_upload_bytes() -> u64 {
    25 * 1024 * 1024 // 25 MiB
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            download: false,
            preview_command: vec![],
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TencordError::Config(format!("Failed to read config: {e}")))?;
        let content = substitute_env_vars(&content);
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tencord")
    }

    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    pub fn token_cache_path() -> PathBuf {
        Self::home_dir().join("token.json")
    }

    pub fn log_file_path() -> PathBuf {
        Self::home_dir().join("tencord.log")
    }

    pub fn default_toml() -> &'static str {
        r#"[api]
base_url = "https://discord.com/api/v9"
timeout_secs = 5
rate_limit_retry_ms = 1000
transfer_timeout_secs = 300

[auth]
token = "${TENCORD_TOKEN}"
# email = "you@example.com"
# password = "${TENCORD_PASSWORD}"
token_ttl_secs = 3600

[poll]
interval_ms = 3000
page_size = 100
# channel = "123456789012345678"

[attachments]
download = false
# preview_command = ["chafa", "--size=50x50", "--animate=off"]
max_upload_bytes = 26214400
"#
    }
}

/// Substitute `${VAR_NAME}` patterns with environment variable values.
pub fn substitute_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .to_string()
}

/// Treat empty strings (e.g. an unset `${VAR}`) as absent.
pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
