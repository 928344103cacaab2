//! Post-deploy actions.
//!
//! An action is a single state-changing call issued once every unit of its pipeline is
//! deployed, typically a role grant. Actions are scopes of their own: they may declare
//! parameters, resolved through the same settings layers as units.

use alloy_core::{json_abi::Function, primitives::Address};
use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    chain::{CallReceipt, ContractCall, ContractExecutor, NetworkContext},
    pipeline::{Bindings, Link, Operand},
    settings::ParamSpec,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDeployAction {
    /// Scope id of the action.
    pub id: String,
    /// Contract receiving the call.
    pub target: Operand,
    /// Solidity signature of the called function, e.g. `grantRole(bytes32,address)`.
    pub function: String,
    #[serde(default)]
    pub args: Vec<Operand>,
    /// Sender of the call; the network deployer when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Operand>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl PostDeployAction {
    pub fn parse_function(&self) -> anyhow::Result<Function> {
        Function::parse(&self.function)
            .with_context(|| format!("Invalid function signature '{}'", self.function))
    }

    /// Resolve every operand of the action into a call.
    pub fn build_call(&self, bindings: &Bindings) -> anyhow::Result<ContractCall> {
        let function = self.parse_function()?;
        let to = self
            .target
            .resolve_address(bindings)
            .context("Failed to resolve call target")?;
        let args = self
            .args
            .iter()
            .enumerate()
            .map(|(i, arg)| {
                arg.resolve(bindings)
                    .with_context(|| format!("Failed to resolve argument {i}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let from: Option<Address> = self
            .sender
            .as_ref()
            .map(|sender| sender.resolve_address(bindings))
            .transpose()
            .context("Failed to resolve sender")?;

        Ok(ContractCall {
            id: self.id.clone(),
            to,
            function,
            args,
            from,
        })
    }

    pub async fn run<E: ContractExecutor>(
        &self,
        bindings: &Bindings,
        executor: &E,
        network: &NetworkContext,
    ) -> anyhow::Result<CallReceipt> {
        let call = self.build_call(bindings)?;

        tracing::debug!(
            action = %self.id,
            to = %call.to,
            from = %call.sender(network),
            function = %self.function,
            "Executing post-deploy action"
        );

        let receipt = executor.execute(&call, network).await?;

        tracing::info!(action = %self.id, tx_hash = %receipt.tx_hash, "Post-deploy action executed");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        settings::{ParamKind, ScopeLayers, SettingValue, SettingsLayer, resolve},
        units::UnitOutputs,
    };
    use alloy_core::{
        dyn_abi::DynSolValue,
        primitives::{B256, address, keccak256},
    };

    fn minting_role() -> PostDeployAction {
        PostDeployAction {
            id: "claimer-minting-role".to_string(),
            target: Operand::output("token", "proxy"),
            function: "grantRole(bytes32,address)".to_string(),
            args: vec![Operand::role("MINT"), Operand::output("claimer", "address")],
            sender: None,
            params: vec![],
            links: vec![],
        }
    }

    fn bindings() -> Bindings {
        let mut bindings = Bindings::default();
        bindings.insert_outputs(
            "token",
            UnitOutputs::from([(
                "proxy".to_string(),
                address!("1111111111111111111111111111111111111111"),
            )]),
        );
        bindings.insert_outputs(
            "claimer",
            UnitOutputs::from([(
                "address".to_string(),
                address!("2222222222222222222222222222222222222222"),
            )]),
        );
        bindings
    }

    #[test]
    fn test_build_role_grant() {
        let call = minting_role().build_call(&bindings()).unwrap();

        assert_eq!(call.to, address!("1111111111111111111111111111111111111111"));
        assert_eq!(call.function.signature(), "grantRole(bytes32,address)");
        assert_eq!(
            call.args,
            vec![
                DynSolValue::FixedBytes(keccak256("MINT"), 32),
                DynSolValue::Address(address!("2222222222222222222222222222222222222222")),
            ]
        );
        assert_eq!(call.from, None);
    }

    #[test]
    fn test_sender_from_param() {
        let params = vec![
            ParamSpec::required("token", ParamKind::Address),
            ParamSpec::required("multisig", ParamKind::Address),
            ParamSpec::required("from", ParamKind::Address),
        ];
        let mut layer = SettingsLayer::new();
        let token = address!("1111111111111111111111111111111111111111");
        let multisig = address!("1807f6f41c8f7E886E3D325F5fb1F496446D4bCc");
        let from = address!("3e166454c7781d3fD4ceaB18055cad87136970Ea");
        layer.insert("token", SettingValue::Address(token));
        layer.insert("multisig", SettingValue::Address(multisig));
        layer.insert("from", SettingValue::Address(from));
        let settings = resolve(
            "transfer-admin",
            "multisig-admin-role",
            &params,
            &ScopeLayers {
                overrides: layer,
                ..Default::default()
            },
        )
        .unwrap();

        let mut bindings = Bindings::default();
        bindings.insert_settings(settings);

        let action = PostDeployAction {
            id: "multisig-admin-role".to_string(),
            target: Operand::param("multisig-admin-role", "token"),
            function: "grantRole(bytes32,address)".to_string(),
            args: vec![Operand::ZeroHash, Operand::param("multisig-admin-role", "multisig")],
            sender: Some(Operand::param("multisig-admin-role", "from")),
            params,
            links: vec![],
        };

        let call = action.build_call(&bindings).unwrap();
        assert_eq!(call.from, Some(address!("3e166454c7781d3fD4ceaB18055cad87136970Ea")));
        assert_eq!(call.args[0], DynSolValue::FixedBytes(B256::ZERO, 32));
    }

    #[test]
    fn test_unresolved_output_is_an_error() {
        let err = minting_role().build_call(&Bindings::default()).unwrap_err();
        assert!(format!("{err:#}").contains("token"));
    }

    #[test]
    fn test_invalid_signature() {
        let mut action = minting_role();
        action.function = "grantRole(bytes32,".to_string();
        assert!(action.parse_function().is_err());
    }
}
