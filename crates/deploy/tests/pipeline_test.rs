//! End-to-end tests of the orchestrator against an in-memory chain.
//!
//! Run with: cargo test --test pipeline_test

use std::{collections::BTreeMap, sync::Mutex};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, address, keccak256},
};
use openxai_deploy::{
    CallReceipt, ContractCall, ContractDeployer, ContractExecutor, DeployError, DeployableUnit,
    DeploymentRecord, FileRecordStore, MemoryRecordStore, NetworkContext, NetworkDefaults,
    Orchestrator, Pipeline, PipelineOverrides, RecordStore, TokenUnit,
};
use serde_json::json;
use tempdir::TempDir;

const SEPOLIA: u64 = 11155111;
const BASE: u64 = 8453;
const LOCAL: u64 = 31337;

const DEPLOYER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

/// A chain that hands out sequential addresses and records every primitive call.
#[derive(Default)]
struct MockChain {
    deployed: Mutex<Vec<DeployableUnit>>,
    executed: Mutex<Vec<ContractCall>>,
    fail_deploy: Mutex<Option<String>>,
    fail_execute: Mutex<Option<String>>,
    next: Mutex<u8>,
}

impl MockChain {
    fn failing_deploy(unit: &str) -> Self {
        let chain = Self::default();
        chain.set_fail_deploy(Some(unit));
        chain
    }

    fn failing_execute(action: &str) -> Self {
        let chain = Self::default();
        *chain.fail_execute.lock().unwrap() = Some(action.to_string());
        chain
    }

    fn set_fail_deploy(&self, unit: Option<&str>) {
        *self.fail_deploy.lock().unwrap() = unit.map(str::to_string);
    }

    fn deployed(&self) -> Vec<DeployableUnit> {
        self.deployed.lock().unwrap().clone()
    }

    fn executed(&self) -> Vec<ContractCall> {
        self.executed.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.deployed.lock().unwrap().len() + self.executed.lock().unwrap().len()
    }
}

impl ContractDeployer for MockChain {
    async fn deploy(
        &self,
        unit: &DeployableUnit,
        network: &NetworkContext,
    ) -> anyhow::Result<Address> {
        assert_eq!(network.deployer, DEPLOYER);
        if self.fail_deploy.lock().unwrap().as_deref() == Some(unit.id.as_str()) {
            anyhow::bail!("execution reverted");
        }
        self.deployed.lock().unwrap().push(unit.clone());

        let mut next = self.next.lock().unwrap();
        *next += 1;
        Ok(Address::with_last_byte(*next))
    }
}

impl ContractExecutor for MockChain {
    async fn execute(
        &self,
        call: &ContractCall,
        _network: &NetworkContext,
    ) -> anyhow::Result<CallReceipt> {
        if self.fail_execute.lock().unwrap().as_deref() == Some(call.id.as_str()) {
            anyhow::bail!("AccessControlUnauthorizedAccount");
        }
        self.executed.lock().unwrap().push(call.clone());
        Ok(CallReceipt {
            tx_hash: keccak256(call.id.as_bytes()),
        })
    }
}

fn orchestrator<S: RecordStore>(
    chain: MockChain,
    store: S,
    chain_id: u64,
) -> Orchestrator<MockChain, S> {
    let network = NetworkContext {
        chain_id,
        deployer: DEPLOYER,
    };
    Orchestrator::new(chain, store, network, NetworkDefaults::builtin())
}

fn builtin(name: &str) -> Pipeline {
    Pipeline::builtin(name).unwrap()
}

fn overrides(value: serde_json::Value) -> PipelineOverrides {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_scenario_a_first_token_run() {
    let temp_dir = TempDir::new("openxai-pipeline").expect("Failed to create temp dir");
    let orchestrator = orchestrator(
        MockChain::default(),
        FileRecordStore::new(temp_dir.path()),
        SEPOLIA,
    );

    let record = orchestrator
        .deploy(&builtin("token"), &PipelineOverrides::new(), false)
        .await
        .unwrap();

    let deployed = orchestrator.backend().deployed();
    assert_eq!(deployed.len(), 2);
    assert_eq!(deployed[0].contract, "OpenxAI");
    assert_eq!(deployed[1].contract, "ERC1967Proxy");

    let implementation = Address::with_last_byte(1);
    let proxy = Address::with_last_byte(2);
    assert_eq!(
        deployed[1].constructor_args,
        vec![
            DynSolValue::Address(implementation),
            DynSolValue::Bytes(TokenUnit::initializer().to_vec()),
        ],
        "Proxy must be constructed with the implementation address and initialize()"
    );

    assert_eq!(record.len(), 1);
    assert_eq!(record.get("token"), Some(proxy));

    let stored = orchestrator.store().load("token.json").await.unwrap();
    assert_eq!(stored, Some(record));
    assert!(temp_dir.path().join("token.json.version").exists());
}

#[tokio::test]
async fn test_scenario_b_second_run_is_a_no_op() {
    let temp_dir = TempDir::new("openxai-pipeline").expect("Failed to create temp dir");
    let pipeline = builtin("token");

    let first = orchestrator(MockChain::default(), FileRecordStore::new(temp_dir.path()), SEPOLIA)
        .deploy(&pipeline, &PipelineOverrides::new(), false)
        .await
        .unwrap();

    let second_run = orchestrator(
        MockChain::default(),
        FileRecordStore::new(temp_dir.path()),
        SEPOLIA,
    );
    let second = second_run
        .deploy(&pipeline, &PipelineOverrides::new(), false)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(second_run.backend().call_count(), 0);
}

#[tokio::test]
async fn test_existing_record_returned_without_chain_calls() {
    let existing: DeploymentRecord = [
        ("token", address!("32fee802CA56DC9544CF239DD8092C1AeC88953d")),
        ("claimer", address!("84599c907B42e9bc21F9FE26D9e5A5D3747109D3")),
    ]
    .into_iter()
    .collect();
    let store = MemoryRecordStore::new().with_record("launch.json", existing.clone());
    let orchestrator = orchestrator(MockChain::default(), store, BASE);

    // Overrides differing from the first run only produce a warning.
    let record = orchestrator
        .deploy(
            &builtin("launch"),
            &overrides(json!({ "claimer": { "spendingPeriod": 1 } })),
            false,
        )
        .await
        .unwrap();

    assert_eq!(record, existing);
    assert_eq!(orchestrator.backend().call_count(), 0);
    assert_eq!(orchestrator.store().save_count(), 0);
}

#[tokio::test]
async fn test_force_redeploy_replaces_record() {
    let stale: DeploymentRecord = [("token", address!("32fee802CA56DC9544CF239DD8092C1AeC88953d"))]
        .into_iter()
        .collect();
    let store = MemoryRecordStore::new().with_record("token.json", stale.clone());
    let orchestrator = orchestrator(MockChain::default(), store, SEPOLIA);

    let record = orchestrator
        .deploy(&builtin("token"), &PipelineOverrides::new(), true)
        .await
        .unwrap();

    assert_ne!(record, stale);
    assert_eq!(orchestrator.backend().deployed().len(), 2);
    assert_eq!(orchestrator.store().get("token.json"), Some(record));
    assert_eq!(orchestrator.store().save_count(), 1);
}

#[tokio::test]
async fn test_scenario_c_claimer_receives_deployed_token() {
    let orchestrator = orchestrator(MockChain::default(), MemoryRecordStore::new(), BASE);

    let record = orchestrator
        .deploy(&builtin("launch"), &PipelineOverrides::new(), false)
        .await
        .unwrap();

    let proxy = Address::with_last_byte(2);
    let claimer = Address::with_last_byte(3);

    let deployed = orchestrator.backend().deployed();
    assert_eq!(deployed.len(), 3);
    assert_eq!(deployed[2].contract, "OpenxAIClaimer");
    assert_eq!(deployed[2].depends_on, vec!["token".to_string()]);
    assert_eq!(deployed[2].constructor_args[0], DynSolValue::Address(proxy));

    // Defaults fill the rest of the claimer constructor.
    assert_eq!(
        deployed[2].constructor_args[3],
        DynSolValue::Address(address!("B2834b9001F9E24226172731f34Dc0A6B0940c41"))
    );

    let executed = orchestrator.backend().executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].to, proxy);
    assert_eq!(executed[0].from, None);
    assert_eq!(
        executed[0].args,
        vec![
            DynSolValue::FixedBytes(keccak256("MINT"), 32),
            DynSolValue::Address(claimer),
        ]
    );

    assert_eq!(record.get("token"), Some(proxy));
    assert_eq!(record.get("claimer"), Some(claimer));
}

#[tokio::test]
async fn test_scenario_d_failed_unit_saves_nothing_and_rerun_starts_over() {
    let orchestrator = orchestrator(
        MockChain::failing_deploy("genesis"),
        MemoryRecordStore::new(),
        SEPOLIA,
    );
    let pipeline = builtin("v1");

    let err = orchestrator
        .deploy(&pipeline, &PipelineOverrides::new(), false)
        .await
        .unwrap_err();

    match err {
        DeployError::DeploymentFailed { pipeline, unit, .. } => {
            assert_eq!(pipeline, "v1");
            assert_eq!(unit, "genesis");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(orchestrator.backend().deployed().len(), 2, "Token was deployed");
    assert_eq!(orchestrator.store().get("V1.json"), None);
    assert_eq!(orchestrator.store().save_count(), 0);

    orchestrator.backend().set_fail_deploy(None);
    let record = orchestrator
        .deploy(&pipeline, &PipelineOverrides::new(), false)
        .await
        .unwrap();

    let deployed = orchestrator.backend().deployed();
    let ids: Vec<&str> = deployed.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "token.implementation",
            "token.proxy",
            "token.implementation",
            "token.proxy",
            "genesis",
        ]
    );
    assert_eq!(deployed[2].contract, "OpenXAI");
    assert_eq!(deployed[4].contract, "OpenXAIGenesis");
    assert_eq!(record.get("token"), Some(Address::with_last_byte(4)));
    assert_eq!(record.get("genesis"), Some(Address::with_last_byte(5)));
}

#[tokio::test]
async fn test_unrecognized_network_fails_before_chain_calls() {
    let orchestrator = orchestrator(MockChain::default(), MemoryRecordStore::new(), 137);

    let err = orchestrator
        .deploy(&builtin("genesis"), &PipelineOverrides::new(), false)
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::UnrecognizedNetwork { chain_id: 137 }));
    assert_eq!(orchestrator.backend().call_count(), 0);
}

#[tokio::test]
async fn test_unrecognized_network_even_without_network_settings() {
    // The token pipeline reads nothing network-specific, but an unknown chain is
    // still refused.
    let orchestrator = orchestrator(MockChain::default(), MemoryRecordStore::new(), 10);

    let err = orchestrator
        .deploy(&builtin("token"), &PipelineOverrides::new(), false)
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::UnrecognizedNetwork { chain_id: 10 }));
}

#[tokio::test]
async fn test_missing_parameter_fails_before_chain_calls() {
    // The local chain has no oracle or stablecoins configured.
    let orchestrator = orchestrator(MockChain::default(), MemoryRecordStore::new(), LOCAL);

    let err = orchestrator
        .deploy(&builtin("genesis"), &PipelineOverrides::new(), false)
        .await
        .unwrap_err();

    match err {
        DeployError::MissingRequiredParameter { pipeline, scope, param } => {
            assert_eq!(pipeline, "genesis");
            assert_eq!(scope, "genesis");
            assert_eq!(param, "ethOracle");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(orchestrator.backend().call_count(), 0);
}

#[tokio::test]
async fn test_claimer_token_comes_from_token_record() {
    let token = address!("32fee802CA56DC9544CF239DD8092C1AeC88953d");
    let store = MemoryRecordStore::new()
        .with_record("token.json", [("token", token)].into_iter().collect());
    let orchestrator = orchestrator(MockChain::default(), store, BASE);

    let record = orchestrator
        .deploy(&builtin("claimer"), &PipelineOverrides::new(), false)
        .await
        .unwrap();

    let deployed = orchestrator.backend().deployed();
    assert_eq!(deployed.len(), 1);
    assert_eq!(deployed[0].constructor_args[0], DynSolValue::Address(token));

    let executed = orchestrator.backend().executed();
    assert_eq!(executed[0].to, token, "Minting role is granted on the token");

    assert_eq!(record.get("claimer"), Some(Address::with_last_byte(1)));
}

#[tokio::test]
async fn test_claimer_without_token_record_needs_override() {
    let orchestrator = orchestrator(MockChain::default(), MemoryRecordStore::new(), BASE);

    let err = orchestrator
        .deploy(&builtin("claimer"), &PipelineOverrides::new(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::MissingRequiredParameter { ref param, .. } if param == "token"));

    let token = address!("84599c907B42e9bc21F9FE26D9e5A5D3747109D3");
    orchestrator
        .deploy(
            &builtin("claimer"),
            &overrides(json!({ "claimer": { "token": token.to_checksum(None) } })),
            false,
        )
        .await
        .unwrap();
    assert_eq!(
        orchestrator.backend().deployed()[0].constructor_args[0],
        DynSolValue::Address(token)
    );
}

#[tokio::test]
async fn test_override_wins_and_leaves_other_keys() {
    let orchestrator = orchestrator(MockChain::default(), MemoryRecordStore::new(), BASE);

    orchestrator
        .deploy(
            &builtin("launch"),
            &overrides(json!({ "claimer": { "spendingLimit": "5" } })),
            false,
        )
        .await
        .unwrap();

    let claimer = &orchestrator.backend().deployed()[2];
    assert_eq!(
        claimer.constructor_args[1],
        DynSolValue::Uint(alloy_core::primitives::U256::from(5), 256)
    );
    assert_eq!(
        claimer.constructor_args[2],
        DynSolValue::Uint(alloy_core::primitives::U256::from(604800), 256),
        "Spending period keeps its default"
    );
}

#[tokio::test]
async fn test_network_defaults_reach_genesis_constructor() {
    let orchestrator = orchestrator(MockChain::default(), MemoryRecordStore::new(), BASE);

    orchestrator
        .deploy(&builtin("genesis"), &PipelineOverrides::new(), false)
        .await
        .unwrap();

    let genesis = &orchestrator.backend().deployed()[0];
    assert_eq!(
        genesis.constructor_args[0],
        DynSolValue::Address(address!("71041dddad3595F9CEd3DcCFBe3D1F4b0a16Bb70"))
    );
    match &genesis.constructor_args[3] {
        DynSolValue::Array(tiers) => assert_eq!(tiers.len(), 6),
        other => panic!("unexpected tiers: {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_override_key_is_rejected() {
    let orchestrator = orchestrator(MockChain::default(), MemoryRecordStore::new(), BASE);

    let err = orchestrator
        .deploy(
            &builtin("launch"),
            &overrides(json!({ "claimer": { "spendinglimit": "5" } })),
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::InvalidParameter { ref param, .. } if param == "spendinglimit"));

    let err = orchestrator
        .deploy(
            &builtin("launch"),
            &overrides(json!({ "genesis": { "ethOracle": "0x71041dddad3595F9CEd3DcCFBe3D1F4b0a16Bb70" } })),
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::InvalidParameter { ref scope, .. } if scope == "genesis"));
    assert_eq!(orchestrator.backend().call_count(), 0);
}

#[tokio::test]
async fn test_failed_action_reports_deployed_contracts_and_saves_nothing() {
    let orchestrator = orchestrator(
        MockChain::failing_execute("claimer-minting-role"),
        MemoryRecordStore::new(),
        BASE,
    );

    let err = orchestrator
        .deploy(&builtin("launch"), &PipelineOverrides::new(), false)
        .await
        .unwrap_err();

    match err {
        DeployError::PostDeployActionFailed { pipeline, action, deployed, .. } => {
            assert_eq!(pipeline, "launch");
            assert_eq!(action, "claimer-minting-role");
            assert_eq!(deployed.len(), 3);
            assert_eq!(deployed.get("token.proxy"), Some(Address::with_last_byte(2)));
            assert_eq!(deployed.get("claimer.address"), Some(Address::with_last_byte(3)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(orchestrator.store().save_count(), 0);
}

#[tokio::test]
async fn test_transfer_admin_sends_from_configured_account() {
    let token = address!("32fee802CA56DC9544CF239DD8092C1AeC88953d");
    let store = MemoryRecordStore::new()
        .with_record("token.json", [("token", token)].into_iter().collect());
    let orchestrator = orchestrator(MockChain::default(), store, BASE);

    let record = orchestrator
        .deploy(&builtin("transfer-admin"), &PipelineOverrides::new(), false)
        .await
        .unwrap();

    assert!(orchestrator.backend().deployed().is_empty());
    let executed = orchestrator.backend().executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].to, token);
    assert_eq!(
        executed[0].from,
        Some(address!("3e166454c7781d3fD4ceaB18055cad87136970Ea"))
    );
    assert_eq!(
        executed[0].args,
        vec![
            DynSolValue::FixedBytes(B256::ZERO, 32),
            DynSolValue::Address(address!("1807f6f41c8f7E886E3D325F5fb1F496446D4bCc")),
        ]
    );

    let expected: BTreeMap<&str, Address> = BTreeMap::from([
        ("multisig", address!("1807f6f41c8f7E886E3D325F5fb1F496446D4bCc")),
        ("token", token),
    ]);
    assert_eq!(record.iter().collect::<BTreeMap<_, _>>(), expected);
}

#[tokio::test]
async fn test_plan_previews_pending_links() {
    let orchestrator = orchestrator(MockChain::default(), MemoryRecordStore::new(), BASE);

    let plan = orchestrator
        .plan(&builtin("launch"), &PipelineOverrides::new())
        .await
        .unwrap();

    assert_eq!(plan.chain_id, BASE);
    let ids: Vec<&str> = plan.scopes.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["token", "claimer", "claimer-minting-role"]);

    let claimer = &plan.scopes[1];
    assert_eq!(claimer.pending.len(), 1);
    assert_eq!(claimer.preview.address("token").unwrap(), Address::ZERO);
    assert_eq!(claimer.pending_output("token"), Some(("token", "proxy")));
    assert_eq!(claimer.pending_output("signer"), None);
    assert_eq!(orchestrator.backend().call_count(), 0);
}

#[tokio::test]
async fn test_plan_shows_override_instead_of_pending_link() {
    let token = address!("0x1111111111111111111111111111111111111111");
    let orchestrator = orchestrator(MockChain::default(), MemoryRecordStore::new(), BASE);
    let overrides = overrides(json!({ "claimer": { "token": token.to_checksum(None) } }));

    let plan = orchestrator.plan(&builtin("launch"), &overrides).await.unwrap();

    let claimer = &plan.scopes[1];
    assert_eq!(claimer.pending_output("token"), None);
    assert_eq!(claimer.preview.address("token").unwrap(), token);
}

#[tokio::test]
async fn test_invalid_pipeline_is_rejected_before_anything_else() {
    let mut pipeline = builtin("launch");
    pipeline.units.reverse();
    let orchestrator = orchestrator(MockChain::default(), MemoryRecordStore::new(), BASE);

    let err = orchestrator
        .deploy(&pipeline, &PipelineOverrides::new(), false)
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::InvalidPipeline { .. }));
    assert_eq!(orchestrator.backend().call_count(), 0);
}
