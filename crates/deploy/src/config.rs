//! Configuration file of the deployment tool.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    network::NetworkDefaults, pipeline::Pipeline, record::FileRecordStore,
    settings::PipelineOverrides,
};

/// Default name of the configuration file.
pub const CONFIG_FILENAME: &str = "openxai.toml";

/// Default RPC endpoint (a local anvil node).
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Tool configuration, usually stored as `openxai.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// JSON-RPC endpoint of the node sending transactions.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Directory holding deployment records, one sub-directory per chain id.
    #[serde(default = "default_deployments")]
    pub deployments: PathBuf,

    /// Foundry output directory holding the compiled contracts.
    #[serde(default = "default_artifacts")]
    pub artifacts: PathBuf,

    /// Extra network defaults layered on top of the built-in table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults_file: Option<PathBuf>,

    /// Sending account. Defaults to the node's first account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,

    /// Caller overrides, keyed by pipeline name, then scope id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, PipelineOverrides>,

    /// Custom pipelines. A custom pipeline shadows a built-in one of the same name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipelines: Vec<Pipeline>,
}

fn default_rpc_url() -> String {
    DEFAULT_RPC_URL.to_string()
}

fn default_deployments() -> PathBuf {
    PathBuf::from("deployments")
}

fn default_artifacts() -> PathBuf {
    PathBuf::from("out")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            deployments: default_deployments(),
            artifacts: default_artifacts(),
            defaults_file: None,
            from: None,
            overrides: BTreeMap::new(),
            pipelines: Vec::new(),
        }
    }
}

impl Config {
    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file, or from `openxai.toml` inside a directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!(
                "Configuration file or directory not found: {}",
                path.display()
            );
        }

        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse config file as TOML")?;
        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn rpc_url(&self) -> Result<Url> {
        Url::parse(&self.rpc_url).with_context(|| format!("Invalid RPC URL '{}'", self.rpc_url))
    }

    /// Built-in and custom pipelines, sorted by name.
    pub fn pipelines(&self) -> Vec<Pipeline> {
        let mut pipelines: BTreeMap<String, Pipeline> = Pipeline::builtins()
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        for custom in &self.pipelines {
            pipelines.insert(custom.name.clone(), custom.clone());
        }
        pipelines.into_values().collect()
    }

    pub fn pipeline(&self, name: &str) -> Option<Pipeline> {
        self.pipelines
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .or_else(|| Pipeline::builtin(name))
    }

    pub fn is_custom(&self, name: &str) -> bool {
        self.pipelines.iter().any(|p| p.name == name)
    }

    pub fn overrides_for(&self, pipeline: &str) -> PipelineOverrides {
        self.overrides.get(pipeline).cloned().unwrap_or_default()
    }

    /// The built-in defaults table, extended with `defaults_file` when set.
    pub fn network_defaults(&self) -> Result<NetworkDefaults> {
        let mut defaults = NetworkDefaults::builtin();
        if let Some(path) = &self.defaults_file {
            defaults.extend(NetworkDefaults::load_from_file(path)?);
        }
        Ok(defaults)
    }

    /// Record store for `chain_id`, so records of different chains never mix.
    pub fn record_store(&self, chain_id: u64) -> FileRecordStore {
        FileRecordStore::new(self.deployments.join(chain_id.to_string()))
    }
}
