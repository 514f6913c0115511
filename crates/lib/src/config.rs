//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.hostrelay/config.json`) and environment.
//! `BOT_TOKEN`, `ALLOWED_USER_IDS` and `WEBAPP_URL` are required; env overrides the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channels::TelegramChannel;
use crate::error::ConfigError;
use crate::exec::ExecLimits;

pub const BOT_TOKEN_ENV: &str = "BOT_TOKEN";
pub const ALLOWED_USER_IDS_ENV: &str = "ALLOWED_USER_IDS";
pub const WEBAPP_URL_ENV: &str = "WEBAPP_URL";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Relay HTTP server settings (health + webhook).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Telegram bot settings.
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Execution engine settings.
    #[serde(default)]
    pub exec: ExecConfig,
}

/// Relay bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 15152).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    15152
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Telegram config. The three required values may live here or in the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    /// Bot token from BotFather. Overridden by BOT_TOKEN env.
    pub bot_token: Option<String>,
    /// Principals allowed to run commands. Overridden by ALLOWED_USER_IDS env.
    #[serde(default)]
    pub allowed_user_ids: Vec<i64>,
    /// Control panel mini-app URL. Overridden by WEBAPP_URL env.
    pub webapp_url: Option<String>,
    /// When set, use webhook mode: Telegram POSTs updates to this URL. If unset, long-poll getUpdates is used.
    pub webhook_url: Option<String>,
    /// Optional secret for webhook verification (X-Telegram-Bot-Api-Secret-Token). Used only when webhook_url is set.
    pub webhook_secret: Option<String>,
    /// Bot API base (default https://api.telegram.org). Overridden by TELEGRAM_API_BASE env.
    pub api_base: Option<String>,
}

/// Execution engine config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecConfig {
    /// Working directory for every command and root for log fallbacks. Default: current directory at startup.
    pub base_dir: Option<PathBuf>,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Commands allowed to run at the same time; the rest queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
    /// Files tried in order for the `logs` key when running in a container.
    #[serde(default = "default_log_fallback_paths")]
    pub log_fallback_paths: Vec<PathBuf>,
    /// How long shutdown waits for running commands before killing them.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    3
}

fn default_workers() -> usize {
    2
}

fn default_log_tail_lines() -> usize {
    30
}

fn default_log_fallback_paths() -> Vec<PathBuf> {
    ["logs/hostrelay.log", "hostrelay.log", "bot.log"]
        .iter()
        .map(PathBuf::from)
        .collect()
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            command_timeout_secs: default_command_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            workers: default_workers(),
            log_tail_lines: default_log_tail_lines(),
            log_fallback_paths: default_log_fallback_paths(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl ExecConfig {
    pub fn limits(&self) -> ExecLimits {
        ExecLimits {
            command_timeout: Duration::from_secs(self.command_timeout_secs.max(1)),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs.max(1)),
            workers: self.workers.max(1),
            log_tail_lines: self.log_tail_lines.max(1),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Validated startup values. Built once; the relay refuses to start without them.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub bot_token: String,
    pub allowed_user_ids: Vec<i64>,
    pub webapp_url: String,
    pub api_base: String,
    pub base_dir: PathBuf,
}

impl RelaySettings {
    /// Resolve required values from `env` (wins) and `config`. `env` is a lookup so tests need no process env.
    pub fn resolve(config: &Config, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env_value = |name: &str| {
            env(name)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let file_value = |v: &Option<String>| {
            v.as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let bot_token = env_value(BOT_TOKEN_ENV)
            .or_else(|| file_value(&config.telegram.bot_token))
            .ok_or(ConfigError::Missing {
                name: BOT_TOKEN_ENV,
            })?;

        let allowed_user_ids = match env_value(ALLOWED_USER_IDS_ENV) {
            Some(raw) => parse_allowed_user_ids(&raw)?,
            None => config.telegram.allowed_user_ids.clone(),
        };
        if allowed_user_ids.is_empty() {
            return Err(ConfigError::Missing {
                name: ALLOWED_USER_IDS_ENV,
            });
        }

        let webapp_url = env_value(WEBAPP_URL_ENV)
            .or_else(|| file_value(&config.telegram.webapp_url))
            .ok_or(ConfigError::Missing {
                name: WEBAPP_URL_ENV,
            })?;

        let api_base = env_value("TELEGRAM_API_BASE")
            .or_else(|| file_value(&config.telegram.api_base))
            .unwrap_or_else(|| crate::channels::TELEGRAM_API_BASE.to_string());

        let base_dir = match &config.exec.base_dir {
            Some(d) if !d.as_os_str().is_empty() => d.clone(),
            _ => std::env::current_dir()
                .context("resolving current directory for exec.baseDir")?,
        };

        Ok(Self {
            bot_token,
            allowed_user_ids,
            webapp_url,
            api_base,
            base_dir,
        })
    }

    /// Resolve against the process environment.
    pub fn from_env(config: &Config) -> Result<Self, ConfigError> {
        Self::resolve(config, |name| std::env::var(name).ok())
    }

    pub fn telegram_channel(&self) -> TelegramChannel {
        TelegramChannel::new(
            self.bot_token.clone(),
            self.api_base.clone(),
            self.webapp_url.clone(),
        )
    }
}

/// Accepts a JSON array (`[123, 456]`) or a comma-separated list (`123,456`).
pub fn parse_allowed_user_ids(raw: &str) -> Result<Vec<i64>, ConfigError> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        return serde_json::from_str::<Vec<i64>>(raw)
            .map_err(|e| ConfigError::InvalidAllowList(e.to_string()));
    }
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| ConfigError::InvalidAllowList(s.to_string()))
        })
        .collect()
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("HOSTRELAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".hostrelay").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, or the default path (or HOSTRELAY_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = read_config(&path)?;
    Ok((config, path))
}

fn read_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        return Ok(Config::default());
    }
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing config from {}", path.display()))
}
