//! openxai-deploy - Deployment orchestrator for the OpenxAI contracts.
//!
//! This crate deploys the OpenxAI token, genesis and claimer contracts as idempotent
//! pipelines: settings are resolved from layered defaults, units are deployed in order,
//! post-deploy role grants are executed, and the resulting addresses are recorded so that
//! a second run is a no-op.

mod actions;
mod artifacts;
mod chain;
mod config;
mod error;
mod network;
mod orchestrator;
mod pipeline;
mod record;
mod rpc;
mod settings;
pub mod units;
mod version;

pub use actions::PostDeployAction;
pub use artifacts::ArtifactStore;
pub use chain::{
    CallReceipt, ContractCall, ContractDeployer, ContractExecutor, DeployableUnit, NetworkContext,
};
pub use config::{CONFIG_FILENAME, Config, DEFAULT_RPC_URL};
pub use error::{DeployError, DeployResult};
pub use network::{NetworkDefaults, PipelineTable, SelectedNetwork};
pub use orchestrator::{Orchestrator, Plan, PlannedScope};
pub use pipeline::{Bindings, Link, LinkSource, Operand, Pipeline, RecordEntry, UnitDef};
pub use record::{
    DeploymentRecord, FileRecordStore, MemoryRecordStore, RecordStore, VERSION_SUFFIX,
};
pub use rpc::{ReceiptPolling, RpcBackend, create_client, json_rpc_call};
pub use settings::{
    ParamKind, ParamSpec, PipelineOverrides, RawLayer, ResolvedSettings, ScopeLayers,
    SettingValue, SettingsLayer, Tier, resolve,
};
pub use units::{ClaimerUnit, GenesisLayout, GenesisUnit, TokenUnit, UnitKind, UnitOutputs};
pub use version::{DeploymentVersion, SettingsFingerprint};
