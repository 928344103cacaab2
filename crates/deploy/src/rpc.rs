//! JSON-RPC backend for the chain primitives.
//!
//! Transactions are sent with `eth_sendTransaction`, so signing stays with the node (an
//! unlocked account on anvil, a remote signer such as clef or a wallet proxy elsewhere).

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use crate::{
    artifacts::ArtifactStore,
    chain::{
        CallReceipt, ContractCall, ContractDeployer, ContractExecutor, DeployableUnit,
        NetworkContext,
    },
};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
///
/// # Returns
/// The deserialized result, or an error if the request failed or returned an error response.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    parse_response(method, result)
}

fn parse_response<T: DeserializeOwned>(method: &str, result: Value) -> Result<T, anyhow::Error> {
    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error: {}",
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Parse a hex quantity such as `0x2105`.
fn parse_quantity(quantity: &str) -> anyhow::Result<u64> {
    let digits = quantity
        .strip_prefix("0x")
        .with_context(|| format!("Quantity '{}' is not 0x-prefixed", quantity))?;
    u64::from_str_radix(digits, 16).with_context(|| format!("Invalid quantity '{}'", quantity))
}

/// How long to wait for a transaction to be mined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptPolling {
    pub interval: Duration,
    pub max_attempts: usize,
}

impl Default for ReceiptPolling {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 150,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    transaction_hash: B256,
    status: Option<String>,
    contract_address: Option<Address>,
}

impl TransactionReceipt {
    fn ensure_success(&self) -> anyhow::Result<()> {
        match self.status.as_deref() {
            Some("0x1") => Ok(()),
            Some(status) => anyhow::bail!(
                "Transaction {} reverted (status {})",
                self.transaction_hash,
                status
            ),
            None => anyhow::bail!("Receipt of {} has no status", self.transaction_hash),
        }
    }
}

/// [`ContractDeployer`] and [`ContractExecutor`] over a node's JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcBackend {
    client: reqwest::Client,
    url: Url,
    artifacts: ArtifactStore,
    polling: ReceiptPolling,
}

impl RpcBackend {
    pub fn new(url: Url, artifacts: ArtifactStore) -> anyhow::Result<Self> {
        Ok(Self {
            client: create_client()?,
            url,
            artifacts,
            polling: ReceiptPolling::default(),
        })
    }

    pub fn with_polling(mut self, polling: ReceiptPolling) -> Self {
        self.polling = polling;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> anyhow::Result<T> {
        json_rpc_call(&self.client, self.url.as_str(), method, params).await
    }

    pub async fn chain_id(&self) -> anyhow::Result<u64> {
        let chain_id: String = self.call("eth_chainId", vec![]).await?;
        parse_quantity(&chain_id)
    }

    /// Accounts the node can sign for.
    pub async fn accounts(&self) -> anyhow::Result<Vec<Address>> {
        self.call("eth_accounts", vec![]).await
    }

    /// Query the node for its chain id and pick the sending account.
    ///
    /// Without an explicit `from`, the node's first account is used.
    pub async fn network_context(&self, from: Option<Address>) -> anyhow::Result<NetworkContext> {
        let chain_id = self
            .chain_id()
            .await
            .with_context(|| format!("Failed to query chain id from {}", self.url))?;

        let deployer = match from {
            Some(from) => from,
            None => self
                .accounts()
                .await
                .context("Failed to list node accounts")?
                .into_iter()
                .next()
                .context("Node has no unlocked accounts; set `from` in the configuration")?,
        };

        Ok(NetworkContext { chain_id, deployer })
    }

    async fn send_transaction(&self, tx: Value) -> anyhow::Result<B256> {
        self.call("eth_sendTransaction", vec![tx])
            .await
            .context("Failed to send transaction")
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> anyhow::Result<TransactionReceipt> {
        let backend = self;
        let fetch = move || async move {
            let receipt: Option<TransactionReceipt> = backend
                .call("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
                .await?;
            receipt.with_context(|| format!("Transaction {} is not mined yet", tx_hash))
        };

        let receipt = fetch
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.polling.interval)
                    .with_max_times(self.polling.max_attempts),
            )
            .notify(|err: &anyhow::Error, _| {
                tracing::trace!(tx_hash = %tx_hash, error = %err, "Waiting for receipt...");
            })
            .await
            .with_context(|| format!("Timeout waiting for receipt of {}", tx_hash))?;

        receipt.ensure_success()?;
        Ok(receipt)
    }
}

impl ContractDeployer for RpcBackend {
    async fn deploy(
        &self,
        unit: &DeployableUnit,
        network: &NetworkContext,
    ) -> anyhow::Result<Address> {
        let bytecode = self.artifacts.bytecode(&unit.contract)?;
        let data: Bytes = [bytecode.as_ref(), unit.encoded_args().as_ref()].concat().into();

        let tx_hash = self
            .send_transaction(serde_json::json!({
                "from": network.deployer,
                "data": data,
            }))
            .await?;
        tracing::debug!(unit = %unit.id, tx_hash = %tx_hash, "Deployment transaction sent");

        self.wait_for_receipt(tx_hash)
            .await?
            .contract_address
            .with_context(|| format!("Receipt of {} has no contract address", tx_hash))
    }
}

impl ContractExecutor for RpcBackend {
    async fn execute(
        &self,
        call: &ContractCall,
        network: &NetworkContext,
    ) -> anyhow::Result<CallReceipt> {
        let data = call.calldata()?;

        let tx_hash = self
            .send_transaction(serde_json::json!({
                "from": call.sender(network),
                "to": call.to,
                "data": data,
            }))
            .await?;
        tracing::debug!(action = %call.id, tx_hash = %tx_hash, "Transaction sent");

        let receipt = self.wait_for_receipt(tx_hash).await?;
        Ok(CallReceipt {
            tx_hash: receipt.transaction_hash,
        })
    }
}
