use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{EngineError, Result};

/// Connection details for the headless content source.
///
/// The client id/secret pair is never read from the config file; it is
/// injected from the environment so the YAML stays secret-free.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    /// Tenant/application identifier under which entity types and assets live.
    pub namespace: String,
    #[serde(skip)]
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: String,
}

/// Where and under what names the archives land in object storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub folder: String,
    pub prefix: String,
    pub version: String,
    /// Whether the run also retrieves and ships asset binaries.
    #[serde(default = "default_true")]
    pub include_assets: bool,
}

impl ArchiveConfig {
    /// `{folder}/{prefix}{version}/{prefix}{version}_json.zip`
    pub fn data_key(&self) -> String {
        format!(
            "{}/{}{}/{}{}_json.zip",
            self.folder, self.prefix, self.version, self.prefix, self.version
        )
    }

    /// `{folder}/{prefix}{version}/{prefix}{version}.zip`
    pub fn assets_key(&self) -> String {
        format!(
            "{}/{}{}/{}{}.zip",
            self.folder, self.prefix, self.version, self.prefix, self.version
        )
    }
}

/// Switches for the final empty-pruning pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneConfig {
    #[serde(default = "default_true")]
    pub drop_null: bool,
    #[serde(default)]
    pub drop_empty_string: bool,
    #[serde(default)]
    pub drop_empty_array: bool,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            drop_null: true,
            drop_empty_string: false,
            drop_empty_array: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Top-level configuration for a publish run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub prune: PruneConfig,
    /// Entity types exported by a publish run, in output order.
    pub entity_types: Vec<String>,
}

impl Config {
    pub fn trace_loaded(&self) {
        info!(
            namespace = %self.source.namespace,
            entity_types = self.entity_types.len(),
            folder = %self.archive.folder,
            "Loaded Config"
        );
        debug!(?self, "Config loaded (full debug)");
    }
}

/// Loads a static YAML config file (no secrets) and injects the source
/// credentials from `CMS_CLIENT_ID` / `CMS_CLIENT_SECRET`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = std::fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        EngineError::Config(format!("failed to read config file {:?}: {e}", path_ref))
    })?;

    let mut config: Config = serde_yaml::from_str(&config_content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        EngineError::Config(format!("failed to parse config YAML: {e}"))
    })?;

    config.source.client_id = std::env::var("CMS_CLIENT_ID").map_err(|_| {
        error!("CMS_CLIENT_ID environment variable not set");
        EngineError::Config("CMS_CLIENT_ID environment variable not set".into())
    })?;
    config.source.client_secret = std::env::var("CMS_CLIENT_SECRET").map_err(|_| {
        error!("CMS_CLIENT_SECRET environment variable not set");
        EngineError::Config("CMS_CLIENT_SECRET environment variable not set".into())
    })?;

    config.trace_loaded();
    Ok(config)
}
