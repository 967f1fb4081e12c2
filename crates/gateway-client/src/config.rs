use std::env;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use realmwire_core::packets::logon::LogonChallenge;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "realmwire.toml";
/// Explicit config file; must exist when set.
pub const CONFIG_ENV: &str = "REALMWIRE_CONFIG";
/// Extra directory searched first for `DEFAULT_CONFIG_PATH`.
pub const CONFIG_DIR_ENV: &str = "REALMWIRE_CONFIG_DIR";

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub connection: Connection,
    #[serde(default)]
    pub client: ClientInfo,
    #[serde(default)]
    pub world: WorldOptions,
}

#[derive(Clone, Deserialize)]
pub struct Connection {
    pub host: String,
    #[serde(default = "default_logon_port")]
    pub port: u16,
    pub account_name: String,
    pub password: String,
}

// Keeps the password out of logs.
impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("account_name", &self.account_name)
            .finish_non_exhaustive()
    }
}

/// Identity the client presents to the logon server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientInfo {
    pub game: String,
    pub platform: String,
    pub os: String,
    pub country: String,
    pub version: [u8; 3],
    pub build: u16,
    pub timezone_bias: u32,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            game: "WoW".to_string(),
            platform: "x86".to_string(),
            os: "Win".to_string(),
            country: "enUS".to_string(),
            version: [4, 3, 4],
            build: 15595,
            timezone_bias: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorldOptions {
    pub read_buffer_size: usize,
    pub capture_path: Option<PathBuf>,
}

impl Default for WorldOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: default_read_buffer_size(),
            capture_path: None,
        }
    }
}

fn default_logon_port() -> u16 {
    3724
}

fn default_read_buffer_size() -> usize {
    4096
}

impl ClientConfig {
    /// Loads the file named by `REALMWIRE_CONFIG`, or else the first
    /// `realmwire.toml` found by `locate`.
    pub fn from_env() -> anyhow::Result<Self> {
        let explicit = env::var_os(CONFIG_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let dir = env::var_os(CONFIG_DIR_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        Self::load(locate(explicit, dir)?)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text).context("parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.connection.account_name.trim().is_empty() {
            anyhow::bail!("[connection].account_name must not be empty");
        }
        if self.connection.account_name.len() > u8::MAX as usize {
            anyhow::bail!("[connection].account_name is longer than 255 bytes");
        }
        if self.world.read_buffer_size == 0 {
            anyhow::bail!("[world].read_buffer_size must be positive");
        }
        Ok(())
    }

    /// `local_ip` is the address the logon connection leaves from.
    pub fn logon_challenge(&self, local_ip: Ipv4Addr) -> LogonChallenge {
        LogonChallenge {
            game: self.client.game.clone(),
            version: self.client.version,
            build: self.client.build,
            platform: self.client.platform.clone(),
            os: self.client.os.clone(),
            country: self.client.country.clone(),
            timezone_bias: self.client.timezone_bias,
            ip: local_ip,
            account: self.connection.account_name.to_uppercase(),
        }
    }
}

/// Resolves the config file. An `explicit` path is taken as-is. Otherwise
/// `DEFAULT_CONFIG_PATH` is searched in `dir`, the working directory and the
/// repository's `config/` directory, in that order.
pub fn locate(explicit: Option<PathBuf>, dir: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_ENV} names {}, which is not a file", path.display());
    }

    let mut searched = Vec::new();
    searched.extend(dir.map(|dir| dir.join(DEFAULT_CONFIG_PATH)));
    if let Ok(cwd) = env::current_dir() {
        searched.push(cwd.join(DEFAULT_CONFIG_PATH));
    }
    // <repo>/crates/gateway-client
    if let Some(root) = Path::new(env!("CARGO_MANIFEST_DIR")).ancestors().nth(2) {
        searched.push(root.join("config").join(DEFAULT_CONFIG_PATH));
    }

    if let Some(found) = searched.iter().find(|path| path.is_file()) {
        return Ok(found.clone());
    }
    let tried: Vec<String> = searched.iter().map(|path| path.display().to_string()).collect();
    anyhow::bail!("no {DEFAULT_CONFIG_PATH} found; tried {}", tried.join(", "))
}
