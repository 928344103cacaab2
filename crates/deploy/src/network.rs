//! Hardcoded and network-conditional default settings.

use std::{collections::BTreeMap, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    error::{DeployError, DeployResult},
    settings::RawLayer,
};

/// The defaults table bundled with the binary.
const BUILTIN_DEFAULTS: &str = include_str!("../defaults.toml");

/// Raw settings keyed by pipeline name, then by scope id.
pub type PipelineTable = BTreeMap<String, BTreeMap<String, RawLayer>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct DefaultsFile {
    #[serde(default)]
    defaults: PipelineTable,
    #[serde(default)]
    networks: BTreeMap<String, PipelineTable>,
}

/// The two lowest settings layers: hardcoded defaults, and defaults specific to a chain.
///
/// Only chains listed under `networks` are deployable. A chain that is absent is
/// rejected by [`NetworkDefaults::select`] rather than falling back to some other
/// network's oracles and stablecoins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkDefaults {
    defaults: PipelineTable,
    networks: BTreeMap<u64, PipelineTable>,
}

impl NetworkDefaults {
    /// The defaults table embedded at build time.
    pub fn builtin() -> Self {
        Self::from_toml_str(BUILTIN_DEFAULTS).expect("embedded defaults table should parse")
    }

    /// Parse a defaults table in the `[defaults.*]` / `[networks."<chain id>".*]` layout.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let file: DefaultsFile =
            toml::from_str(content).context("Failed to parse network defaults table")?;

        let networks = file
            .networks
            .into_iter()
            .map(|(chain_id, table)| -> anyhow::Result<(u64, PipelineTable)> {
                let id = chain_id
                    .parse::<u64>()
                    .with_context(|| format!("Invalid chain id '{chain_id}' in network defaults"))?;
                Ok((id, table))
            })
            .collect::<anyhow::Result<_>>()?;

        Ok(Self {
            defaults: file.defaults,
            networks,
        })
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read network defaults from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid network defaults file {}", path.display()))
    }

    /// Layer `other` on top of this table.
    ///
    /// Values are overridden key by key within each scope. Chains only present in
    /// `other` become deployable.
    pub fn extend(&mut self, other: NetworkDefaults) {
        merge_table(&mut self.defaults, other.defaults);
        for (chain_id, table) in other.networks {
            merge_table(self.networks.entry(chain_id).or_default(), table);
        }
    }

    /// Chain ids with a network entry, in ascending order.
    pub fn chain_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.networks.keys().copied()
    }

    /// Select the defaults for `chain_id`, failing with
    /// [`DeployError::UnrecognizedNetwork`] if the chain is unknown.
    pub fn select(&self, chain_id: u64) -> DeployResult<SelectedNetwork<'_>> {
        let network = self
            .networks
            .get(&chain_id)
            .ok_or(DeployError::UnrecognizedNetwork { chain_id })?;

        Ok(SelectedNetwork {
            chain_id,
            defaults: &self.defaults,
            network,
        })
    }
}

fn merge_table(into: &mut PipelineTable, from: PipelineTable) {
    for (pipeline, scopes) in from {
        let target = into.entry(pipeline).or_default();
        for (scope, layer) in scopes {
            target.entry(scope).or_default().extend(layer);
        }
    }
}

/// The defaults that apply on one recognized chain.
#[derive(Debug, Clone, Copy)]
pub struct SelectedNetwork<'a> {
    chain_id: u64,
    defaults: &'a PipelineTable,
    network: &'a PipelineTable,
}

impl SelectedNetwork<'_> {
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Hardcoded defaults of `scope` in `pipeline`.
    pub fn hardcoded(&self, pipeline: &str, scope: &str) -> RawLayer {
        lookup(self.defaults, pipeline, scope)
    }

    /// Chain-specific defaults of `scope` in `pipeline`.
    pub fn network(&self, pipeline: &str, scope: &str) -> RawLayer {
        lookup(self.network, pipeline, scope)
    }
}

fn lookup(table: &PipelineTable, pipeline: &str, scope: &str) -> RawLayer {
    table
        .get(pipeline)
        .and_then(|scopes| scopes.get(scope))
        .cloned()
        .unwrap_or_default()
}
