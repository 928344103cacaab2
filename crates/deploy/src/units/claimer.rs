use alloy_core::dyn_abi::DynSolValue;
use serde::{Deserialize, Serialize};

use crate::{
    error::DeployResult,
    settings::{ParamKind, ParamSpec, ResolvedSettings},
};

/// Rate-limited claim contract minting tokens against signed claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimerUnit {
    pub contract: String,
}

impl Default for ClaimerUnit {
    fn default() -> Self {
        Self {
            contract: "OpenxAIClaimer".to_string(),
        }
    }
}

impl ClaimerUnit {
    pub fn params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("token", ParamKind::Address),
            ParamSpec::required("spendingLimit", ParamKind::Uint),
            ParamSpec::required("spendingPeriod", ParamKind::Uint),
            ParamSpec::required("signer", ParamKind::Address),
        ]
    }

    /// `(address token, uint256 spendingLimit, uint256 spendingPeriod, address signer)`
    pub fn constructor_args(&self, settings: &ResolvedSettings) -> DeployResult<Vec<DynSolValue>> {
        Ok(vec![
            DynSolValue::Address(settings.address("token")?),
            DynSolValue::Uint(settings.uint("spendingLimit")?, 256),
            DynSolValue::Uint(settings.uint("spendingPeriod")?, 256),
            DynSolValue::Address(settings.address("signer")?),
        ])
    }
}
