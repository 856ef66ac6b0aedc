//! Runtime configuration.
//!
//! Loaded once from a JSON file at startup. Secrets never live in the file:
//! the file names an environment variable and the value is read when the
//! component that needs it is built.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{WorldgraphError, WorldgraphResult};
use crate::world::ActorKind;

pub const DEFAULT_BASE_DIR: &str = "./worldgraph-data";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;
pub const DEFAULT_USAGE_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldgraphConfig {
    pub storage: StorageConfig,
    /// SQLite file holding the world catalog, token buckets and usage records.
    /// `:memory:` keeps everything in process.
    pub control_plane_path: String,
    pub embedding: EmbeddingConfig,
    pub rate_limits: RateLimitConfig,
    pub usage_queue_capacity: usize,
}

impl Default for WorldgraphConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            control_plane_path: format!("{DEFAULT_BASE_DIR}/control.db"),
            embedding: EmbeddingConfig::default(),
            rate_limits: RateLimitConfig::default(),
            usage_queue_capacity: DEFAULT_USAGE_QUEUE_CAPACITY,
        }
    }
}

impl WorldgraphConfig {
    /// Read a config file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> WorldgraphResult<Self> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err.into()),
        };
        let config: Self = serde_json::from_str(&text).map_err(|err| {
            WorldgraphError::invalid(format!("config {}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> WorldgraphResult<()> {
        if self.embedding.dimensions == 0 {
            return Err(WorldgraphError::invalid("embedding.dimensions must be > 0"));
        }
        if self.usage_queue_capacity == 0 {
            return Err(WorldgraphError::invalid("usage_queue_capacity must be > 0"));
        }
        if self.control_plane_path.trim().is_empty() {
            return Err(WorldgraphError::invalid("control_plane_path is empty"));
        }
        self.storage.validate()?;
        self.embedding.validate()?;
        self.rate_limits.default.validate("rate_limits.default")?;
        for rule in &self.rate_limits.rules {
            rule.policy
                .validate(&format!("rate_limits.rules[{}:{}]", rule.actor_kind.as_str(), rule.feature))?;
        }
        Ok(())
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendConfig::LocalFile {
                base_dir: PathBuf::from(DEFAULT_BASE_DIR).join("worlds"),
            },
        }
    }
}

impl StorageConfig {
    fn validate(&self) -> WorldgraphResult<()> {
        match &self.backend {
            StorageBackendConfig::LocalFile { base_dir } => {
                if base_dir.as_os_str().is_empty() {
                    return Err(WorldgraphError::invalid("storage.base_dir is empty"));
                }
            }
            StorageBackendConfig::Remote {
                replica_dir,
                provisioning,
            } => {
                if replica_dir.as_os_str().is_empty() {
                    return Err(WorldgraphError::invalid("storage.replica_dir is empty"));
                }
                provisioning.validate()?;
            }
        }
        Ok(())
    }
}

/// Which DatabaseManager backend to build at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageBackendConfig {
    /// One SQLite file per world under `base_dir`.
    LocalFile { base_dir: PathBuf },
    /// Databases provisioned through a platform API; a local replica file per
    /// world lives under `replica_dir`.
    Remote {
        replica_dir: PathBuf,
        provisioning: ProvisioningConfig,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    pub base_url: String,
    pub organization: String,
    #[serde(default = "default_group")]
    pub group: String,
    /// Environment variable holding the platform API token.
    pub api_token_env: String,
}

fn default_group() -> String {
    "default".to_string()
}

impl ProvisioningConfig {
    fn validate(&self) -> WorldgraphResult<()> {
        for (name, value) in [
            ("base_url", &self.base_url),
            ("organization", &self.organization),
            ("group", &self.group),
            ("api_token_env", &self.api_token_env),
        ] {
            if value.trim().is_empty() {
                return Err(WorldgraphError::invalid(format!(
                    "storage.provisioning.{name} is empty"
                )));
            }
        }
        Ok(())
    }

    /// Read the API token from the configured environment variable.
    pub fn api_token(&self) -> WorldgraphResult<String> {
        read_secret(&self.api_token_env)
    }
}

// ============================================================================
// Embedding
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackendConfig,
    /// Fixed when a world's index is created; a mismatch on reopen is rejected.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackendConfig::TokenHash,
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl EmbeddingConfig {
    fn validate(&self) -> WorldgraphResult<()> {
        if let EmbeddingBackendConfig::OpenAi {
            base_url,
            model,
            api_key_env,
        } = &self.backend
        {
            if base_url.trim().is_empty() || model.trim().is_empty() || api_key_env.trim().is_empty()
            {
                return Err(WorldgraphError::invalid(
                    "embedding.openai requires base_url, model and api_key_env",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbeddingBackendConfig {
    /// Deterministic feature hashing; no network.
    TokenHash,
    /// Any OpenAI-compatible `/embeddings` endpoint.
    #[serde(rename = "openai")]
    OpenAi {
        base_url: String,
        model: String,
        api_key_env: String,
    },
}

// ============================================================================
// Rate limits
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Applied to any (actor kind, feature) pair without a rule.
    pub default: RateLimitPolicy,
    #[serde(default)]
    pub rules: Vec<RateLimitRule>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default: RateLimitPolicy::per_second(100.0, 10.0),
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub actor_kind: ActorKind,
    pub feature: String,
    #[serde(flatten)]
    pub policy: RateLimitPolicy,
}

/// Token-bucket policy.
///
/// The refill rate is either given directly (`refill_rate`, tokens per second)
/// or derived from a window (`capacity` tokens every `interval_secs`). With
/// neither, the bucket never refills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub capacity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refill_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
}

impl RateLimitPolicy {
    pub fn per_second(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate: Some(refill_rate),
            interval_secs: None,
        }
    }

    pub fn per_interval(capacity: f64, interval_secs: u64) -> Self {
        Self {
            capacity,
            refill_rate: None,
            interval_secs: Some(interval_secs),
        }
    }

    pub fn tokens_per_second(&self) -> f64 {
        if let Some(rate) = self.refill_rate {
            return rate;
        }
        match self.interval_secs {
            Some(secs) if secs > 0 => self.capacity / secs as f64,
            _ => 0.0,
        }
    }

    fn validate(&self, at: &str) -> WorldgraphResult<()> {
        if !(self.capacity.is_finite() && self.capacity >= 1.0) {
            return Err(WorldgraphError::invalid(format!("{at}: capacity must be >= 1")));
        }
        if let Some(rate) = self.refill_rate {
            if !(rate.is_finite() && rate >= 0.0) {
                return Err(WorldgraphError::invalid(format!(
                    "{at}: refill_rate must be a non-negative number"
                )));
            }
        }
        Ok(())
    }
}

fn read_secret(var: &str) -> WorldgraphResult<String> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(WorldgraphError::invalid(format!(
            "environment variable {var} is not set"
        ))),
    }
}

impl EmbeddingBackendConfig {
    /// API key for remote embedding backends.
    pub fn api_key(&self) -> WorldgraphResult<Option<String>> {
        match self {
            EmbeddingBackendConfig::TokenHash => Ok(None),
            EmbeddingBackendConfig::OpenAi { api_key_env, .. } => read_secret(api_key_env).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn default_config_is_valid() {
        let config = WorldgraphConfig::default();
        config.validate().unwrap();
        assert_eq!(config.embedding.dimensions, 128);
        assert_eq!(config.rate_limits.default.capacity, 100.0);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorldgraphConfig::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, WorldgraphConfig::default());
    }

    #[test]
    fn parses_remote_backend_and_rules() {
        let json = r#"{
            "storage": {
                "backend": {
                    "kind": "remote",
                    "replica_dir": "/var/lib/worldgraph/replicas",
                    "provisioning": {
                        "base_url": "https://api.example.io",
                        "organization": "acme",
                        "api_token_env": "WG_PLATFORM_TOKEN"
                    }
                }
            },
            "control_plane_path": ":memory:",
            "embedding": { "backend": { "kind": "token_hash" }, "dimensions": 64 },
            "rate_limits": {
                "default": { "capacity": 5, "refill_rate": 1 },
                "rules": [
                    { "actor_kind": "service_account", "feature": "search", "capacity": 60, "interval_secs": 60 }
                ]
            },
            "usage_queue_capacity": 16
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worldgraph.json");
        std::fs::write(&path, json).unwrap();
        let config = WorldgraphConfig::load(&path).unwrap();

        match &config.storage.backend {
            StorageBackendConfig::Remote { provisioning, .. } => {
                assert_eq!(provisioning.organization, "acme");
                assert_eq!(provisioning.group, "default");
            }
            other => panic!("unexpected backend {other:?}"),
        }
        let rule = &config.rate_limits.rules[0];
        assert_eq!(rule.actor_kind, ActorKind::ServiceAccount);
        assert_eq!(rule.policy.tokens_per_second(), 1.0);
    }

    #[test]
    fn rejects_zero_dimensions() {
        let mut config = WorldgraphConfig::default();
        config.embedding.dimensions = 0;
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn rejects_negative_refill_rate() {
        let mut config = WorldgraphConfig::default();
        config.rate_limits.default = RateLimitPolicy::per_second(10.0, -1.0);
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn policy_without_rate_never_refills() {
        let policy = RateLimitPolicy {
            capacity: 2.0,
            refill_rate: None,
            interval_secs: None,
        };
        assert_eq!(policy.tokens_per_second(), 0.0);
        assert_eq!(RateLimitPolicy::per_interval(60.0, 60).tokens_per_second(), 1.0);
    }
}
