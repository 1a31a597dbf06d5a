//! Layered runtime settings.
//!
//! Precedence, highest first: explicit CLI flags, environment variables
//! (`DRAFTSYNC_*`, with `.env` loaded via `dotenvy`), an optional
//! `draftsync.toml` next to the working directory, then built-in
//! defaults. The token has no default: commands that talk to the
//! backend fail fast without one.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_REALTIME_URL: &str = "ws://localhost:8000/realtime";

/// Resolved settings, after all layers are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub realtime_url: String,
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub verbose: bool,
}

/// The subset of settings a caller may override explicitly (CLI flags).
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub realtime_url: Option<String>,
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub verbose: bool,
}

/// `draftsync.toml` shape. Every field optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
struct FileConfig {
    api_url: Option<String>,
    realtime_url: Option<String>,
    user_id: Option<String>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

/// Environment layer, read once so resolution stays a pure function.
#[derive(Debug, Clone, Default)]
struct EnvConfig {
    api_url: Option<String>,
    realtime_url: Option<String>,
    token: Option<String>,
    user_id: Option<String>,
}

impl EnvConfig {
    fn capture() -> Self {
        Self {
            api_url: std::env::var("DRAFTSYNC_API_URL").ok(),
            realtime_url: std::env::var("DRAFTSYNC_REALTIME_URL").ok(),
            token: std::env::var("DRAFTSYNC_TOKEN").ok(),
            user_id: std::env::var("DRAFTSYNC_USER_ID").ok(),
        }
    }
}

impl Settings {
    /// Resolve settings for the current process.
    pub fn load(overrides: Overrides) -> Result<Self> {
        // A missing .env is the normal case, not an error.
        let _ = dotenvy::dotenv();
        let env = EnvConfig::capture();
        let file = FileConfig::load(Path::new("draftsync.toml"))?;
        Ok(Self::resolve(overrides, env, file))
    }

    fn resolve(overrides: Overrides, env: EnvConfig, file: FileConfig) -> Self {
        Self {
            api_url: overrides
                .api_url
                .or(env.api_url)
                .or(file.api_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            realtime_url: overrides
                .realtime_url
                .or(env.realtime_url)
                .or(file.realtime_url)
                .unwrap_or_else(|| DEFAULT_REALTIME_URL.to_string()),
            token: overrides.token.or(env.token),
            user_id: overrides.user_id.or(env.user_id).or(file.user_id),
            verbose: overrides.verbose,
        }
    }

    /// The token, or a helpful error for commands that need one.
    pub fn require_token(&self) -> Result<&str> {
        self.token.as_deref().context(
            "No API token configured. Pass --token or set DRAFTSYNC_TOKEN \
             (a .env file next to the working directory also works).",
        )
    }

    /// The user id, or a helpful error for commands that need one.
    pub fn require_user_id(&self) -> Result<&str> {
        self.user_id
            .as_deref()
            .context("No user id configured. Pass --user-id or set DRAFTSYNC_USER_ID.")
    }
}
