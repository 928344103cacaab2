//! Compiled contract artifacts.

use std::path::{Path, PathBuf};

use alloy_core::primitives::Bytes;
use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Deserialize)]
struct Artifact {
    bytecode: ArtifactBytecode,
}

#[derive(Deserialize)]
struct ArtifactBytecode {
    object: String,
}

/// Reads creation bytecode from a Foundry `out/` directory.
///
/// Foundry writes one artifact per contract at `<root>/<Contract>.sol/<Contract>.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, contract: &str) -> Result<PathBuf> {
        if contract.is_empty()
            || !contract
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            anyhow::bail!("Invalid contract name '{}'", contract);
        }
        Ok(self
            .root
            .join(format!("{contract}.sol"))
            .join(format!("{contract}.json")))
    }

    /// Creation bytecode of `contract`, without constructor arguments.
    pub fn bytecode(&self, contract: &str) -> Result<Bytes> {
        let path = self.artifact_path(contract)?;
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let artifact: Artifact = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

        let object = artifact.bytecode.object;
        let hex_code = object.strip_prefix("0x").unwrap_or(&object);
        if hex_code.is_empty() {
            anyhow::bail!(
                "Artifact for {} has no bytecode (abstract contract or interface?)",
                contract
            );
        }
        if hex_code.contains("__") {
            anyhow::bail!("Artifact for {} contains unlinked library references", contract);
        }

        let code = hex::decode(hex_code)
            .with_context(|| format!("Artifact for {} has malformed bytecode", contract))?;
        Ok(code.into())
    }
}
