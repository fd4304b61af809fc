//! Layered configuration for the AgentBoard client.
//!
//! Values are resolved in order, later layers winning:
//! defaults → `agentboard.toml` → environment → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! api_url = "https://board.example.com"
//! ws_url = "wss://board.example.com"   # optional, derived from api_url
//!
//! [connection]
//! reconnect_base_ms = 3000
//! reconnect_max_ms = 30000
//! heartbeat_secs = 30
//!
//! [storage]
//! data_dir = "/var/lib/agentboard"
//!
//! [logging]
//! level = "info"
//! json = false
//! log_dir = "/var/log/agentboard"
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::ws::ConnectionSettings;

pub const CONFIG_FILE: &str = "agentboard.toml";

pub const ENV_API_URL: &str = "AGENTBOARD_API_URL";
pub const ENV_WS_URL: &str = "AGENTBOARD_WS_URL";
pub const ENV_TOKEN: &str = "AGENTBOARD_TOKEN";
pub const ENV_DATA_DIR: &str = "AGENTBOARD_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Defaults to `api_url` with `http→ws` / `https→wss`.
    #[serde(default)]
    pub ws_url: Option<String>,
}

fn default_api_url() -> String {
    "http://localhost:8080".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSection {
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_reconnect_base_ms() -> u64 {
    3_000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_heartbeat_secs() -> u64 {
    30
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    /// Defaults to the platform data directory plus `agentboard`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Daily-rolling log files go here when set.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            log_dir: None,
        }
    }
}

/// Contents of `agentboard.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentboardToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl AgentboardToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("In {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse agentboard.toml")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize agentboard.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// `./agentboard.toml`, then `<config_dir>/agentboard/agentboard.toml`.
    pub fn discover(cwd: &Path) -> Option<PathBuf> {
        let local = cwd.join(CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        let global = dirs::config_dir()?.join("agentboard").join(CONFIG_FILE);
        global.is_file().then_some(global)
    }
}

/// Values read from `AGENTBOARD_*` variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOverrides {
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
    pub token: Option<String>,
    pub data_dir: Option<PathBuf>,
}

impl EnvOverrides {
    /// Read the process environment. Callers load `.env` first.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            api_url: get(ENV_API_URL),
            ws_url: get(ENV_WS_URL),
            token: get(ENV_TOKEN),
            data_dir: get(ENV_DATA_DIR).map(PathBuf::from),
        }
    }
}

/// Flags given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
    pub token: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub json_logs: bool,
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: Url,
    pub ws_url: Url,
    pub token: Option<String>,
    pub data_dir: PathBuf,
    pub reconnect_base: Duration,
    pub reconnect_ceiling: Duration,
    pub heartbeat_interval: Duration,
    pub logging: LoggingSection,
    /// The file the values came from, if any.
    pub source: Option<PathBuf>,
}

impl Settings {
    /// Resolve from an explicit config path (which must exist) or the
    /// discovered one, the process environment, and `cli`.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides) -> Result<Self> {
        let source = match config_path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let cwd = std::env::current_dir().context("Failed to resolve working directory")?;
                AgentboardToml::discover(&cwd)
            }
        };
        let file = match &source {
            Some(path) => AgentboardToml::load(path)?,
            None => AgentboardToml::default(),
        };
        let mut settings = Self::resolve(file, EnvOverrides::from_env(), cli)?;
        settings.source = source;
        Ok(settings)
    }

    pub fn resolve(file: AgentboardToml, env: EnvOverrides, cli: CliOverrides) -> Result<Self> {
        let api_raw = cli.api_url.or(env.api_url).unwrap_or(file.server.api_url);
        let api_url = parse_http_url(&api_raw)?;

        let ws_url = match cli.ws_url.or(env.ws_url).or(file.server.ws_url) {
            Some(raw) => parse_ws_url(&raw)?,
            None => derive_ws_url(&api_url)?,
        };

        let data_dir = cli
            .data_dir
            .or(env.data_dir)
            .or(file.storage.data_dir)
            .unwrap_or_else(default_data_dir);

        let conn = file.connection;
        if conn.reconnect_base_ms == 0 {
            bail!("connection.reconnect_base_ms must be greater than zero");
        }
        if conn.reconnect_max_ms < conn.reconnect_base_ms {
            bail!(
                "connection.reconnect_max_ms ({}) is below reconnect_base_ms ({})",
                conn.reconnect_max_ms,
                conn.reconnect_base_ms
            );
        }
        if conn.heartbeat_secs == 0 {
            bail!("connection.heartbeat_secs must be greater than zero");
        }

        let mut logging = file.logging;
        if let Some(level) = cli.log_level {
            logging.level = level;
        }
        logging.json |= cli.json_logs;

        Ok(Self {
            api_url,
            ws_url,
            token: cli.token.or(env.token),
            data_dir,
            reconnect_base: Duration::from_millis(conn.reconnect_base_ms),
            reconnect_ceiling: Duration::from_millis(conn.reconnect_max_ms),
            heartbeat_interval: Duration::from_secs(conn.heartbeat_secs),
            logging,
            source: None,
        })
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            ws_base: self.ws_url.clone(),
            reconnect_base: self.reconnect_base,
            reconnect_ceiling: self.reconnect_ceiling,
            heartbeat_interval: self.heartbeat_interval,
        }
    }

    pub fn require_token(&self) -> Result<&str> {
        match self.token.as_deref() {
            Some(token) => Ok(token),
            None => bail!("No API token configured. Set {} or pass --token", ENV_TOKEN),
        }
    }

    /// Token with all but the last four characters masked.
    pub fn redacted_token(&self) -> String {
        match &self.token {
            None => "(not set)".to_string(),
            Some(token) => {
                let chars: Vec<char> = token.chars().collect();
                if chars.len() <= 8 {
                    "****".to_string()
                } else {
                    let tail: String = chars[chars.len() - 4..].iter().collect();
                    format!("****{}", tail)
                }
            }
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("agentboard"))
        .unwrap_or_else(|| PathBuf::from(".agentboard"))
}

fn parse_http_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("Invalid API URL '{}'", raw))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => bail!("API URL must use http or https, got '{}'", other),
    }
}

fn parse_ws_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("Invalid WebSocket URL '{}'", raw))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => bail!("WebSocket URL must use ws or wss, got '{}'", other),
    }
}

/// `http://h` → `ws://h`, `https://h` → `wss://h`.
pub fn derive_ws_url(api_url: &Url) -> Result<Url> {
    let scheme = match api_url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => bail!("Cannot derive a WebSocket URL from scheme '{}'", other),
    };
    let mut ws = api_url.clone();
    if ws.set_scheme(scheme).is_err() {
        bail!("Cannot derive a WebSocket URL from {}", api_url);
    }
    Ok(ws)
}
