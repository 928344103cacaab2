use alloy_core::{dyn_abi::DynSolValue, primitives::U256};
use serde::{Deserialize, Serialize};

use crate::{
    error::{DeployError, DeployResult},
    settings::{ParamKind, ParamSpec, ResolvedSettings},
};

/// Constructor layout of a genesis contract.
///
/// The fundraising contract changed its constructor between releases, so the layout is
/// chosen per pipeline instead of being inferred from the contract name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum GenesisLayout {
    /// `(address ethOracle, address[] wrappedEth, address[] stableCoins,
    /// (uint96 amount, address escrow)[] tiers)`
    #[default]
    Tiered,
    /// `(address receiver, address ethOracle, address[] wrappedEth, address[] stableCoins,
    /// uint256[] tiers)`
    Receiver,
}

/// Fundraising contract accepting ETH, wrapped ETH and stablecoins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisUnit {
    #[serde(default = "default_contract")]
    pub contract: String,
    #[serde(default)]
    pub layout: GenesisLayout,
}

fn default_contract() -> String {
    "OpenxAIGenesis".to_string()
}

impl Default for GenesisUnit {
    fn default() -> Self {
        Self {
            contract: default_contract(),
            layout: GenesisLayout::default(),
        }
    }
}

impl GenesisUnit {
    pub fn new(contract: &str, layout: GenesisLayout) -> Self {
        Self {
            contract: contract.to_string(),
            layout,
        }
    }

    pub fn params(&self) -> Vec<ParamSpec> {
        let mut params = vec![
            ParamSpec::required("ethOracle", ParamKind::Address),
            ParamSpec::required("wrappedEth", ParamKind::Addresses),
            ParamSpec::required("stableCoins", ParamKind::Addresses),
        ];
        match self.layout {
            GenesisLayout::Tiered => {
                params.push(ParamSpec::required("tiers", ParamKind::Tiers));
            }
            GenesisLayout::Receiver => {
                params.insert(0, ParamSpec::required("receiver", ParamKind::Address));
                params.push(ParamSpec::required("tiers", ParamKind::Uints));
            }
        }
        params
    }

    pub fn constructor_args(&self, settings: &ResolvedSettings) -> DeployResult<Vec<DynSolValue>> {
        let oracle = settings.address("ethOracle")?;
        let wrapped_eth = addresses(settings.addresses("wrappedEth")?);
        let stable_coins = addresses(settings.addresses("stableCoins")?);

        match self.layout {
            GenesisLayout::Tiered => {
                let max = (U256::from(1u8) << 96usize) - U256::from(1u8);
                let tiers = settings.tiers("tiers")?;
                let overflowing = tiers.iter().enumerate().find(|(_, t)| t.amount > max);
                if let Some((index, tier)) = overflowing {
                    return Err(DeployError::invalid_parameter(
                        settings.scope(),
                        "tiers",
                        format!("tier {index} amount {} does not fit in uint96", tier.amount),
                    ));
                }
                let tiers = tiers
                    .iter()
                    .map(|t| {
                        DynSolValue::Tuple(vec![
                            DynSolValue::Uint(t.amount, 96),
                            DynSolValue::Address(t.escrow),
                        ])
                    })
                    .collect();

                Ok(vec![
                    DynSolValue::Address(oracle),
                    wrapped_eth,
                    stable_coins,
                    DynSolValue::Array(tiers),
                ])
            }
            GenesisLayout::Receiver => {
                let tiers = settings
                    .uints("tiers")?
                    .into_iter()
                    .map(|amount| DynSolValue::Uint(amount, 256))
                    .collect();

                Ok(vec![
                    DynSolValue::Address(settings.address("receiver")?),
                    DynSolValue::Address(oracle),
                    wrapped_eth,
                    stable_coins,
                    DynSolValue::Array(tiers),
                ])
            }
        }
    }
}

fn addresses(list: Vec<alloy_core::primitives::Address>) -> DynSolValue {
    DynSolValue::Array(list.into_iter().map(DynSolValue::Address).collect())
}
