use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::Bytes,
    sol,
    sol_types::SolCall,
};
use serde::{Deserialize, Serialize};

use super::{UnitContext, UnitOutputs};
use crate::{chain::ContractDeployer, error::DeployResult};

sol! {
    interface IOpenxAI {
        function initialize() external;
    }
}

/// Upgradeable token: an implementation contract behind an ERC-1967 proxy.
///
/// The proxy is initialized in its constructor, so the token is usable as soon as the
/// proxy is mined. The proxy address is the token address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUnit {
    pub implementation: String,
    pub proxy: String,
}

impl Default for TokenUnit {
    fn default() -> Self {
        Self {
            implementation: "OpenxAI".to_string(),
            proxy: "ERC1967Proxy".to_string(),
        }
    }
}

impl TokenUnit {
    pub const OUTPUTS: &'static [&'static str] = &["implementation", "proxy"];

    pub fn new(implementation: &str) -> Self {
        Self {
            implementation: implementation.to_string(),
            ..Default::default()
        }
    }

    /// Calldata of `initialize()`, run by the proxy constructor.
    pub fn initializer() -> Bytes {
        IOpenxAI::initializeCall {}.abi_encode().into()
    }

    pub(super) async fn deploy<D: ContractDeployer>(
        &self,
        ctx: &UnitContext<'_, D>,
    ) -> DeployResult<UnitOutputs> {
        let implementation = ctx
            .deploy_artifact(
                Some("implementation"),
                &self.implementation,
                Vec::new(),
                ctx.depends_on.to_vec(),
            )
            .await?;

        let proxy = ctx
            .deploy_artifact(
                Some("proxy"),
                &self.proxy,
                vec![
                    DynSolValue::Address(implementation),
                    DynSolValue::Bytes(Self::initializer().to_vec()),
                ],
                vec![format!("{}.implementation", ctx.id)],
            )
            .await?;

        Ok(UnitOutputs::from([
            ("implementation".to_string(), implementation),
            ("proxy".to_string(), proxy),
        ]))
    }
}
