use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use elder_core::{SignatureAlgorithm, SigningIdentity};
use elder_keys::{ElderEnrollment, MasterKey, ThresholdPolicy, DEFAULT_AUTHORIZATION_WINDOW_MS};
use serde::{Deserialize, Serialize};
use tracing::Level;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node data directory (key store, revocations, snapshots, audit log)
    pub data_dir: PathBuf,

    /// Log level: trace, debug, info, warn, error
    pub log_level: String,

    /// Elder set as supplied by governance
    pub elders: Vec<ElderEnrollment>,

    /// Quorum threshold policy
    pub threshold: ThresholdPolicy,

    /// Signature collection window in milliseconds
    pub collection_timeout_ms: u64,

    /// Lifetime of newly generated keys in milliseconds
    pub key_lifetime_ms: u64,

    /// How far ahead of expiry a key is reported as due for rotation
    pub rotation_notice_ms: u64,

    /// Algorithm for newly enrolled keys
    pub algorithm: SignatureAlgorithm,

    /// Who may authorize revocations
    pub revocation_authority: AuthorityConfig,

    /// How long a revocation authorization stays usable after issue
    #[serde(default = "default_revocation_window_ms")]
    pub revocation_window_ms: u64,

    /// Environment variable holding the key store master secret (hex)
    pub master_key_env: String,

    /// Inline master secret (hex) - development only
    pub master_key: Option<String>,
}

fn default_revocation_window_ms() -> u64 {
    DEFAULT_AUTHORIZATION_WINDOW_MS
}

/// Revocation authority policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthorityConfig {
    /// A single designated security authority key
    Designated {
        name: String,
        algorithm: SignatureAlgorithm,
        /// Public key (hex)
        public_key: String,
    },
    /// A threshold of enrolled Elders must co-sign
    ElderQuorum,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            data_dir: PathBuf::from("./elder-data"),
            log_level: "info".to_string(),
            elders: Vec::new(),
            threshold: ThresholdPolicy::TwoThirds,
            collection_timeout_ms: 10_000,
            key_lifetime_ms: 90 * DAY_MS,
            rotation_notice_ms: 7 * DAY_MS,
            algorithm: SignatureAlgorithm::Ed25519,
            revocation_authority: AuthorityConfig::ElderQuorum,
            revocation_window_ms: DEFAULT_AUTHORIZATION_WINDOW_MS,
            master_key_env: "ELDER_MASTER_KEY".to_string(),
            master_key: None,
        }
    }
}

impl NodeConfig {
    /// Load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn collection_timeout(&self) -> Duration {
        Duration::from_millis(self.collection_timeout_ms)
    }

    pub fn log_level(&self) -> Result<Level> {
        self.log_level
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid log level: {}", self.log_level))
    }

    /// Master secret from the environment, falling back to the inline value
    pub fn master_key(&self) -> Result<MasterKey> {
        let hex = match std::env::var(&self.master_key_env) {
            Ok(value) => value,
            Err(_) => self.master_key.clone().ok_or_else(|| {
                anyhow::anyhow!(
                    "no master key: set {} or master_key in the config",
                    self.master_key_env
                )
            })?,
        };
        Ok(MasterKey::from_hex(&hex)?)
    }

    pub fn key_store_path(&self) -> PathBuf {
        self.data_dir.join("keys.bin")
    }

    pub fn revocations_path(&self) -> PathBuf {
        self.data_dir.join("revocations.bin")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir.join("audit.jsonl")
    }
}

/// Generate a sample configuration for testing: five Elders, 3-of-5, and a
/// designated revocation authority whose identity is returned alongside
pub fn generate_sample_config() -> (NodeConfig, SigningIdentity) {
    let authority = SigningIdentity::generate(SignatureAlgorithm::Ed25519);
    let master = MasterKey::generate();

    let config = NodeConfig {
        elders: (0..5)
            .map(|i| ElderEnrollment::enrolled_at(format!("elder_{}", i), 0))
            .collect(),
        threshold: ThresholdPolicy::Fixed { m: 3 },
        revocation_authority: AuthorityConfig::Designated {
            name: "security".to_string(),
            algorithm: authority.algorithm(),
            public_key: hex::encode(authority.public_key()),
        },
        master_key: Some(master.to_hex().to_string()),
        ..NodeConfig::default()
    };
    (config, authority)
}
