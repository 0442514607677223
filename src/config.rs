//! Service settings.
//!
//! Settings load from an optional TOML file; every field has a
//! default so the service starts with no file at all (embedded store,
//! local bind).

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VerbaError};
use crate::store::memory::InMemoryStore;
use crate::store::VectorStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub store: StoreSettings,
    pub server: ServerSettings,
    pub cache: CacheSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            server: ServerSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSettings {
    /// `embedded` keeps everything in process memory; `remote` would
    /// bind an external store deployment.
    pub mode: String,
    pub url: String,
    pub api_key: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            mode: "embedded".to_string(),
            url: String::new(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub enabled: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Load settings from `path`, or defaults when `path` is `None`.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let settings = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                VerbaError::Config(format!("cannot read '{}': {e}", path.display()))
            })?;
            toml::from_str(&raw).map_err(|e| {
                VerbaError::Config(format!("cannot parse '{}': {e}", path.display()))
            })?
        }
        None => Settings::default(),
    };
    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<()> {
    match settings.store.mode.as_str() {
        "embedded" => Ok(()),
        "remote" if settings.store.url.is_empty() => Err(VerbaError::Config(
            "store.mode = \"remote\" needs store.url".into(),
        )),
        "remote" => Ok(()),
        other => Err(VerbaError::Config(format!(
            "unknown store.mode '{other}' (expected 'embedded' or 'remote')"
        ))),
    }?;
    settings
        .server
        .bind
        .parse::<std::net::SocketAddr>()
        .map_err(|e| VerbaError::Config(format!("invalid server.bind: {e}")))?;
    Ok(())
}

/// Open the configured store backend.
pub fn connect(settings: &Settings) -> Result<Arc<dyn VectorStore>> {
    match settings.store.mode.as_str() {
        "embedded" => Ok(Arc::new(InMemoryStore::new())),
        // remote deployments bring their own store binding; nothing
        // ships with the embedded build
        other => Err(VerbaError::Store(format!(
            "store mode '{other}' has no backend in this build"
        ))),
    }
}
