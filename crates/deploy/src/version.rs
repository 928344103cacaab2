use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::settings::PipelineOverrides;

/// The inputs that determine what a pipeline run deploys.
///
/// Only caller-controlled inputs take part: the built-in defaults are versioned with the
/// binary itself, which `DeploymentVersion::tool_version` already captures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsFingerprint {
    /// Name of the pipeline.
    pub pipeline: String,
    /// Chain the pipeline targets.
    pub chain_id: u64,
    /// Caller overrides, per scope.
    pub overrides: PipelineOverrides,
}

impl SettingsFingerprint {
    pub fn new(pipeline: &str, chain_id: u64, overrides: &PipelineOverrides) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            chain_id,
            overrides: overrides.clone(),
        }
    }

    /// Compute a SHA-256 hash of these inputs.
    ///
    /// Overrides are kept in ordered maps, so the JSON serialization (and thus the hash)
    /// does not depend on insertion order.
    pub fn compute_hash(&self) -> String {
        let json = serde_json::to_string(self)
            .expect("SettingsFingerprint serialization should never fail");

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Version metadata stored next to a deployment record.
///
/// Used to warn when a record is reused even though the caller's settings changed since
/// it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentVersion {
    /// SHA-256 hash of the settings fingerprint.
    pub settings_hash: String,
    /// Chain id the record was deployed to.
    pub chain_id: u64,
    /// Unix timestamp when this deployment was created.
    pub deployed_at: i64,
    /// Version of this tool that created the deployment.
    pub tool_version: String,
}

impl DeploymentVersion {
    /// Create version metadata for a fingerprint, stamped with the current time.
    pub fn new(fingerprint: &SettingsFingerprint) -> Self {
        Self {
            settings_hash: fingerprint.compute_hash(),
            chain_id: fingerprint.chain_id,
            deployed_at: chrono::Utc::now().timestamp(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Whether the record was produced from the same inputs as `fingerprint`.
    pub fn matches(&self, fingerprint: &SettingsFingerprint) -> bool {
        self.chain_id == fingerprint.chain_id && self.settings_hash == fingerprint.compute_hash()
    }
}
