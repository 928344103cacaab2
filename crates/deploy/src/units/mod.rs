//! Unit deployers.
//!
//! A unit is one logical contract of a pipeline. Its [`UnitKind`] declares the parameters
//! it reads, the outputs it produces, and how resolved settings become constructor
//! arguments. Each artifact of a unit is handed to the deploy primitive exactly once.

mod claimer;
mod genesis;
mod token;

use std::collections::BTreeMap;

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

pub use claimer::ClaimerUnit;
pub use genesis::{GenesisLayout, GenesisUnit};
pub use token::TokenUnit;

use crate::{
    chain::{ContractDeployer, DeployableUnit, NetworkContext},
    error::{DeployError, DeployResult},
    settings::{ParamSpec, ResolvedSettings},
};

/// Addresses produced by one unit, keyed by output name.
pub type UnitOutputs = BTreeMap<String, Address>;

/// The kinds of contract a pipeline can deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UnitKind {
    Token(TokenUnit),
    Genesis(GenesisUnit),
    Claimer(ClaimerUnit),
}

/// Everything a unit needs to deploy itself.
pub struct UnitContext<'a, D> {
    pub pipeline: &'a str,
    /// Scope id of the unit within the pipeline.
    pub id: &'a str,
    /// Scope ids of the units this one is linked to.
    pub depends_on: &'a [String],
    pub settings: &'a ResolvedSettings,
    pub deployer: &'a D,
    pub network: &'a NetworkContext,
}

impl<D: ContractDeployer> UnitContext<'_, D> {
    /// Hand one artifact to the deploy primitive.
    ///
    /// `artifact` suffixes the unit id when a unit deploys more than one contract.
    pub(crate) async fn deploy_artifact(
        &self,
        artifact: Option<&str>,
        contract: &str,
        constructor_args: Vec<alloy_core::dyn_abi::DynSolValue>,
        depends_on: Vec<String>,
    ) -> DeployResult<Address> {
        let id = match artifact {
            Some(artifact) => format!("{}.{artifact}", self.id),
            None => self.id.to_string(),
        };
        let unit = DeployableUnit {
            id: id.clone(),
            contract: contract.to_string(),
            constructor_args,
            depends_on,
        };

        tracing::debug!(pipeline = %self.pipeline, unit = %id, contract = %contract, "Deploying contract");

        let address = self
            .deployer
            .deploy(&unit, self.network)
            .await
            .map_err(|source| DeployError::DeploymentFailed {
                pipeline: self.pipeline.to_string(),
                unit: id.clone(),
                source,
            })?;

        tracing::info!(pipeline = %self.pipeline, unit = %id, address = %address, "Contract deployed");
        Ok(address)
    }
}

impl UnitKind {
    /// Parameters read by this unit.
    pub fn params(&self) -> Vec<ParamSpec> {
        match self {
            UnitKind::Token(_) => Vec::new(),
            UnitKind::Genesis(unit) => unit.params(),
            UnitKind::Claimer(_) => ClaimerUnit::params(),
        }
    }

    /// Names of the addresses this unit produces.
    pub fn outputs(&self) -> &'static [&'static str] {
        match self {
            UnitKind::Token(_) => TokenUnit::OUTPUTS,
            UnitKind::Genesis(_) => &["address"],
            UnitKind::Claimer(_) => &["address"],
        }
    }

    /// Check that resolved settings can be encoded, without touching the chain.
    pub fn check(&self, settings: &ResolvedSettings) -> DeployResult<()> {
        match self {
            UnitKind::Token(_) => Ok(()),
            UnitKind::Genesis(unit) => unit.constructor_args(settings).map(drop),
            UnitKind::Claimer(unit) => unit.constructor_args(settings).map(drop),
        }
    }

    pub async fn deploy<D: ContractDeployer>(
        &self,
        ctx: &UnitContext<'_, D>,
    ) -> DeployResult<UnitOutputs> {
        match self {
            UnitKind::Token(unit) => unit.deploy(ctx).await,
            UnitKind::Genesis(unit) => {
                let args = unit.constructor_args(ctx.settings)?;
                let address = ctx
                    .deploy_artifact(None, &unit.contract, args, ctx.depends_on.to_vec())
                    .await?;
                Ok(UnitOutputs::from([("address".to_string(), address)]))
            }
            UnitKind::Claimer(unit) => {
                let args = unit.constructor_args(ctx.settings)?;
                let address = ctx
                    .deploy_artifact(None, &unit.contract, args, ctx.depends_on.to_vec())
                    .await?;
                Ok(UnitOutputs::from([("address".to_string(), address)]))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::sync::Mutex;

    use super::*;

    /// Deployer handing out sequential addresses and remembering every unit it saw.
    #[derive(Default)]
    pub struct RecordingDeployer {
        pub units: Mutex<Vec<DeployableUnit>>,
        pub fail_on: Option<String>,
    }

    impl RecordingDeployer {
        pub fn failing_on(id: &str) -> Self {
            Self {
                units: Mutex::default(),
                fail_on: Some(id.to_string()),
            }
        }

        pub fn deployed(&self) -> Vec<DeployableUnit> {
            self.units.lock().unwrap().clone()
        }
    }

    impl ContractDeployer for RecordingDeployer {
        async fn deploy(
            &self,
            unit: &DeployableUnit,
            _network: &NetworkContext,
        ) -> anyhow::Result<Address> {
            if self.fail_on.as_deref() == Some(unit.id.as_str()) {
                anyhow::bail!("out of gas");
            }
            let mut units = self.units.lock().unwrap();
            units.push(unit.clone());
            Ok(Address::with_last_byte(units.len() as u8))
        }
    }

    pub fn network() -> NetworkContext {
        NetworkContext {
            chain_id: 31337,
            deployer: Address::with_last_byte(0xde),
        }
    }
}
