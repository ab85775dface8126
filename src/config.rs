use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CACHED: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub radio_handshake: String,
    pub post_handshake: String,
    pub user_feed: String,
    pub xmlrpc: String,
    pub radio_xspf: String,
    pub radio_adjust: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            radio_handshake: "http://ws.audioscrobbler.com/radio/handshake.php".to_string(),
            post_handshake: "http://post.audioscrobbler.com/".to_string(),
            user_feed: "http://ws.audioscrobbler.com/1.0/user".to_string(),
            xmlrpc: "http://ws.audioscrobbler.com/1.0/rw/xmlrpc.php".to_string(),
            radio_xspf: "http://ws.audioscrobbler.com/radio/xspf.php".to_string(),
            radio_adjust: "http://ws.audioscrobbler.com/radio/adjust.php".to_string(),
        }
    }
}

impl Endpoints {
    fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("radio_handshake", self.radio_handshake.as_str()),
            ("post_handshake", self.post_handshake.as_str()),
            ("user_feed", self.user_feed.as_str()),
            ("xmlrpc", self.xmlrpc.as_str()),
            ("radio_xspf", self.radio_xspf.as_str()),
            ("radio_adjust", self.radio_adjust.as_str()),
        ]
        .into_iter()
    }
}

/// How this client introduces itself during handshakes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientIdentity {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
    pub platform: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            name: "tst".to_string(),
            version: "0.1".to_string(),
            protocol_version: "1.2".to_string(),
            platform: "linux".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoints: Endpoints,
    pub client: ClientIdentity,
    pub max_cached: usize,
    pub prefs_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            client: ClientIdentity::default(),
            max_cached: DEFAULT_MAX_CACHED,
            prefs_path: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.max_cached == 0 {
            bail!("max_cached must be greater than 0");
        }
        for (name, url) in self.endpoints.iter() {
            if url.trim().is_empty() {
                bail!("Endpoint {name} must not be empty");
            }
        }
        Ok(())
    }

    pub fn prefs_path(&self) -> PathBuf {
        self.prefs_path.clone().unwrap_or_else(default_prefs_path)
    }
}

fn config_dir() -> PathBuf {
    let fallback = PathBuf::from(".config/scrobbled");
    dirs::home_dir().map_or(fallback, |home| home.join(".config/scrobbled"))
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.json")
}

pub fn default_prefs_path() -> PathBuf {
    config_dir().join("prefs.json")
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed reading config at {}", path.display()))?;
    let config: Config = serde_json::from_str(&raw)
        .with_context(|| format!("Failed parsing config at {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config at {}", path.display()))?;
    Ok(config)
}

/// Writes `config` as pretty JSON, creating the scrobbled config directory
/// on first use.
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    config.validate().context("Refusing to save an invalid scrobbled config")?;
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed creating scrobbled config dir {}", dir.display()))?;
    }
    let mut json = serde_json::to_string_pretty(config).context("Failed encoding scrobbled config")?;
    json.push('\n');
    fs::write(path, json)
        .with_context(|| format!("Failed writing scrobbled config to {}", path.display()))
}
