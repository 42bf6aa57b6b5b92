use std::{env, fs, io, time::Duration};

use camino::Utf8Path;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, warn};

pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8501";

/// Values shipped in sample configs that must be replaced before use.
const PLACEHOLDER_CLIENT_ID: &str = "your-client-id";
const PLACEHOLDER_CLIENT_SECRET: &str = "your-client-secret";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file")]
    Io(#[from] io::Error),
    #[error("could not parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub google: GoogleConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Run a local listener on `redirect_uri` during login. When off, the
    /// user pastes the redirect address into the shell instead.
    #[serde(default = "default_true")]
    pub listen_for_callback: bool,
}

/// Limits applied by the search engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of candidate files requested from Drive per search.
    pub max_candidates: u32,
    /// Number of ranked results kept.
    pub max_results: usize,
    /// Length, in characters, of the content snippet stored per result.
    pub snippet_chars: usize,
    /// Binary downloads larger than this are skipped.
    pub max_file_size: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            max_candidates: 20,
            max_results: 10,
            snippet_chars: 500,
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
    /// How long `login` waits for the browser to hit the redirect address.
    pub callback_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_retries: 3,
            callback_timeout_secs: 300,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_owned()
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.to_owned()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_owned()
}

fn default_scopes() -> Vec<String> {
    vec![
        "https://www.googleapis.com/auth/drive.readonly".to_owned(),
        "https://www.googleapis.com/auth/documents.readonly".to_owned(),
        "https://www.googleapis.com/auth/spreadsheets.readonly".to_owned(),
    ]
}

impl Config {
    /// Parse a config from TOML text. Environment overrides are not applied.
    pub fn from_toml(data: &str) -> Result<Config, ConfigError> {
        Ok(toml::from_str(data)?)
    }

    /// Read a config file, then apply `GOOGLE_CLIENT_ID` and `GOOGLE_CLIENT_SECRET`
    /// from the environment if they are set.
    pub fn load(path: &Utf8Path) -> Result<Config, ConfigError> {
        let data = fs::read_to_string(path)?;
        let mut cfg = Config::from_toml(&data)?;
        cfg.apply_env_overrides(|key| env::var(key).ok());
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(client_id) = lookup("GOOGLE_CLIENT_ID").filter(|v| !v.is_empty()) {
            self.google.client_id = client_id;
        }
        if let Some(client_secret) = lookup("GOOGLE_CLIENT_SECRET").filter(|v| !v.is_empty()) {
            self.google.client_secret = client_secret;
        }
    }
}

impl GoogleConfig {
    /// Whether the OAuth client credentials look usable.
    pub fn has_credentials(&self) -> bool {
        let id = self.client_id.trim();
        let secret = self.client_secret.trim();
        !id.is_empty()
            && !secret.is_empty()
            && id != PLACEHOLDER_CLIENT_ID
            && secret != PLACEHOLDER_CLIENT_SECRET
    }
}

/// Check a loaded config for values that would only fail later.
///
/// Missing OAuth credentials are only a warning here: the shell can still
/// start, and `login` reports the problem to the user.
pub fn validate_config(cfg: &Config) -> bool {
    let mut valid = true;

    if !cfg.google.has_credentials() {
        warn!("google.client_id / google.client_secret are not set; login will fail");
    }

    if !cfg.google.redirect_uri.starts_with("http://") {
        error!(
            "google.redirect_uri must be a local http:// address, got {}",
            cfg.google.redirect_uri
        );
        valid = false;
    }

    if cfg.search.max_candidates == 0 || cfg.search.max_candidates > 1000 {
        error!("search.max_candidates must be between 1 and 1000");
        valid = false;
    }

    if cfg.search.max_results == 0 {
        error!("search.max_results must be at least 1");
        valid = false;
    }

    if cfg.search.snippet_chars == 0 {
        error!("search.snippet_chars must be at least 1");
        valid = false;
    }

    if cfg.http.timeout_secs == 0 {
        error!("http.timeout_secs must be at least 1");
        valid = false;
    }

    valid
}
