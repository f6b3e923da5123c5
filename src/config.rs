//! Configuration management
//!
//! This module handles loading and validating configuration from TOML files.
//! Every `[[accounts]]` entry becomes one independently running session.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36";
pub const DEFAULT_KEEP_ALIVE_LINK: &str = "http://3.3.3.3";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Values used for logout when no login succeeded this run
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Session timing shared by all accounts
    #[serde(default)]
    pub session: SessionConfig,

    /// Accounts to keep logged in
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// Configuration for a single account
#[derive(Debug, Deserialize, Clone)]
pub struct AccountConfig {
    pub username: String,

    pub password: String,

    /// Empty for the default route, otherwise an interface name or IPv4
    #[serde(default)]
    pub interface: String,

    #[serde(default)]
    pub user_agent: String,

    /// Seconds between checks
    pub keep_alive: u64,

    /// URL probed to detect the portal
    #[serde(default)]
    pub keep_alive_link: String,

    /// Consecutive failures before pausing, 0 = never pause
    #[serde(default)]
    pub retry_max: u32,

    /// Seconds to wait after a failed login
    pub retry_time: u64,
}

impl AccountConfig {
    /// `username@interface`, with `Auto` for the default route
    pub fn key(&self) -> String {
        let iface = if self.interface.trim().is_empty() {
            "Auto"
        } else {
            self.interface.trim()
        };
        format!("{}@{}", self.username, iface)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds, covering the whole exchange
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_accept_language")]
    pub accept_language: String,

    /// Also bind sockets to the interface device (Linux only)
    #[serde(default)]
    pub bind_device: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            accept_language: default_accept_language(),
            bind_device: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FallbackConfig {
    #[serde(default = "default_login_host")]
    pub login_host: String,

    #[serde(default = "default_wlanac_ip")]
    pub wlanac_ip: String,

    #[serde(default = "default_wlanacname")]
    pub wlanacname: String,

    #[serde(default = "default_portal_version")]
    pub portal_version: i64,

    #[serde(default = "default_group_id")]
    pub group_id: i64,

    /// Logout user id is `username@user_suffix`
    #[serde(default = "default_user_suffix")]
    pub user_suffix: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            login_host: default_login_host(),
            wlanac_ip: default_wlanac_ip(),
            wlanacname: default_wlanacname(),
            portal_version: default_portal_version(),
            group_id: default_group_id(),
            user_suffix: default_user_suffix(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Seconds spent paused once `retry_max` is reached
    #[serde(default = "default_pause_cooldown")]
    pub pause_cooldown: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pause_cooldown: default_pause_cooldown(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file path
    #[serde(default)]
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

// Default value functions
fn default_timeout() -> u64 {
    5
}

fn default_accept_language() -> String {
    "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7,ja;q=0.6".to_string()
}

fn default_login_host() -> String {
    "10.20.16.5".to_string()
}

fn default_wlanac_ip() -> String {
    "10.20.16.2".to_string()
}

fn default_wlanacname() -> String {
    "NFV-BASE-01".to_string()
}

fn default_portal_version() -> i64 {
    4
}

fn default_group_id() -> i64 {
    19
}

fn default_user_suffix() -> String {
    "SSGSXY".to_string()
}

fn default_pause_cooldown() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `path`, or from the first standard location
    /// that exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::search_paths()
                .into_iter()
                .find(|p| p.exists())
                .context("No config file found (tried ./config.toml, /etc/quickauthd/config.toml, ~/.config/quickauthd/config.toml)")?,
        };

        tracing::debug!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(contents).context("Failed to parse config file")?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("config.toml"),
            PathBuf::from("/etc/quickauthd/config.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("quickauthd/config.toml"));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config/quickauthd/config.toml"));
        }
        paths
    }

    /// Replace empty optional strings with their defaults
    fn normalize(&mut self) {
        for account in &mut self.accounts {
            account.interface = account.interface.trim().to_string();
            if account.user_agent.is_empty() {
                account.user_agent = DEFAULT_USER_AGENT.to_string();
            }
            if account.keep_alive_link.is_empty() {
                account.keep_alive_link = DEFAULT_KEEP_ALIVE_LINK.to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.accounts.is_empty() {
            bail!("at least one [[accounts]] entry is required");
        }
        if self.http.timeout == 0 {
            bail!("http.timeout must be greater than 0");
        }
        if self.session.pause_cooldown == 0 {
            bail!("session.pause_cooldown must be greater than 0");
        }

        for (i, account) in self.accounts.iter().enumerate() {
            if account.username.is_empty() {
                bail!("accounts[{}]: username cannot be empty", i);
            }
            if account.password.is_empty() {
                bail!("accounts[{}]: password cannot be empty", i);
            }
            if account.keep_alive == 0 {
                bail!("accounts[{}]: keep_alive must be greater than 0", i);
            }
            if account.retry_time == 0 {
                bail!("accounts[{}]: retry_time must be greater than 0", i);
            }
        }
        Ok(())
    }
}
