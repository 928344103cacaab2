//! Chain primitives the orchestrator is written against.
//!
//! The orchestrator never talks to a node directly. It builds [`DeployableUnit`]s and
//! [`ContractCall`]s and hands them to a backend implementing [`ContractDeployer`] and
//! [`ContractExecutor`]. [`crate::RpcBackend`] is the JSON-RPC implementation used by the
//! binary; tests substitute an in-memory chain.

use std::future::Future;

use alloy_core::{
    dyn_abi::{DynSolValue, JsonAbiExt},
    json_abi::Function,
    primitives::{Address, B256, Bytes},
};
use anyhow::Context;

/// The network a pipeline is deployed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkContext {
    /// Chain id reported by the node.
    pub chain_id: u64,
    /// Account that sends deployments and, unless overridden, post-deploy calls.
    pub deployer: Address,
}

/// One contract creation, ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployableUnit {
    /// Identifier of the unit within its pipeline, e.g. `token.proxy`.
    pub id: String,
    /// Name of the compiled contract artifact.
    pub contract: String,
    /// Constructor arguments, in declaration order.
    pub constructor_args: Vec<DynSolValue>,
    /// Units whose outputs this one consumes.
    pub depends_on: Vec<String>,
}

impl DeployableUnit {
    /// ABI-encoded constructor arguments, to be appended to the creation bytecode.
    pub fn encoded_args(&self) -> Bytes {
        if self.constructor_args.is_empty() {
            return Bytes::new();
        }
        DynSolValue::Tuple(self.constructor_args.clone())
            .abi_encode_params()
            .into()
    }
}

/// A state-changing call to an already deployed contract.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractCall {
    /// Identifier of the post-deploy action issuing the call.
    pub id: String,
    pub to: Address,
    pub function: Function,
    pub args: Vec<DynSolValue>,
    /// Sender of the call. `None` sends from [`NetworkContext::deployer`].
    pub from: Option<Address>,
}

impl ContractCall {
    /// Selector followed by the ABI-encoded arguments.
    pub fn calldata(&self) -> anyhow::Result<Bytes> {
        self.function
            .abi_encode_input(&self.args)
            .map(Bytes::from)
            .with_context(|| format!("Failed to encode arguments of {}", self.function.signature()))
    }

    pub fn sender(&self, network: &NetworkContext) -> Address {
        self.from.unwrap_or(network.deployer)
    }
}

/// Outcome of a mined call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallReceipt {
    pub tx_hash: B256,
}

/// Deploy primitive: create one contract and return its address.
pub trait ContractDeployer: Send + Sync {
    fn deploy(
        &self,
        unit: &DeployableUnit,
        network: &NetworkContext,
    ) -> impl Future<Output = anyhow::Result<Address>> + Send;
}

/// Execute primitive: send one state-changing call and wait for it to be mined.
pub trait ContractExecutor: Send + Sync {
    fn execute(
        &self,
        call: &ContractCall,
        network: &NetworkContext,
    ) -> impl Future<Output = anyhow::Result<CallReceipt>> + Send;
}
