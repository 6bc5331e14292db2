//! Connection and vault configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

const CONFIG_FILE: &str = "vault_sync.json";

/// Environment overrides, applied on top of the config file
const ENV_BUCKET: &str = "VAULT_SYNC_BUCKET";
const ENV_PREFIX: &str = "VAULT_SYNC_PREFIX";
const ENV_REGION: &str = "VAULT_SYNC_REGION";
const ENV_ENDPOINT: &str = "VAULT_SYNC_ENDPOINT";
const ENV_ACCESS_KEY_ID: &str = "VAULT_SYNC_ACCESS_KEY_ID";
const ENV_SECRET_ACCESS_KEY: &str = "VAULT_SYNC_SECRET_ACCESS_KEY";

fn default_branch() -> String {
    "main".to_string()
}

/// Everything needed to sync one vault with one bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Local vault root (the git working tree)
    #[serde(default)]
    pub local_root: PathBuf,

    /// Target bucket
    #[serde(default)]
    pub bucket: String,

    /// Key prefix inside the bucket under which the vault lives
    #[serde(default)]
    pub prefix: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible services
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,

    /// Branch the vault history lives on
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl SyncConfig {
    pub fn new(local_root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            local_root: local_root.into(),
            bucket: bucket.into(),
            branch: default_branch(),
            ..Self::default()
        }
    }

    /// Default directory holding the config file
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("vault-sync"))
    }

    /// Load configuration from disk. A missing file yields the defaults.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self {
                branch: default_branch(),
                ..Self::default()
            });
        }

        let contents = std::fs::read_to_string(&config_path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save configuration to disk
    pub fn save(&self, config_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(config_dir)?;
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(config_dir.join(CONFIG_FILE), contents)?;
        Ok(())
    }

    /// Overlay `VAULT_SYNC_*` environment variables
    pub fn apply_env(mut self) -> Self {
        self.apply_vars(|name| std::env::var(name).ok());
        self
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_BUCKET) {
            self.bucket = v;
        }
        if let Some(v) = get(ENV_PREFIX) {
            self.prefix = v;
        }
        if let Some(v) = get(ENV_REGION) {
            self.region = Some(v);
        }
        if let Some(v) = get(ENV_ENDPOINT) {
            self.endpoint = Some(v);
        }
        if let Some(v) = get(ENV_ACCESS_KEY_ID) {
            self.access_key_id = Some(v);
        }
        if let Some(v) = get(ENV_SECRET_ACCESS_KEY) {
            self.secret_access_key = Some(v);
        }
    }

    /// Prefix with surrounding slashes removed
    pub fn normalized_prefix(&self) -> String {
        self.prefix.trim_matches('/').to_string()
    }

    /// Check that every required connection parameter is present
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();

        if self.local_root.as_os_str().is_empty() {
            missing.push("localRoot");
        }
        if self.bucket.trim().is_empty() {
            missing.push("bucket");
        }
        if self.branch.trim().is_empty() {
            missing.push("branch");
        }
        // Keys only make sense as a pair
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(_), None) => missing.push("secretAccessKey"),
            (None, Some(_)) => missing.push("accessKeyId"),
            _ => {}
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )))
        }
    }
}
