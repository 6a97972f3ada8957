//! JSON-RPC anchor client
//!
//! Talks to the anchor gateway over HTTP. Every request names the rollup
//! contract it targets and carries the sequencer's single bearer credential.

use super::{AnchorClient, AnchorReceipt};
use crate::config::AnchorConfig;
use crate::types::{hex_hash, Address, BalanceUpdate, Block, Hash32};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a P,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
struct ContractParams {
    contract: Address,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockParams {
    contract: Address,
    block_number: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBlockParams<'a> {
    contract: Address,
    block: &'a Block,
    account_update: Option<&'a BalanceUpdate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChallengeParams {
    contract: Address,
    block_number: u64,
    #[serde(with = "hex_hash")]
    recalculated_state_root: Hash32,
}

#[derive(Debug, Serialize)]
struct BalanceCorrectionParams<'a> {
    contract: Address,
    #[serde(flatten)]
    update: &'a BalanceUpdate,
}

/// Anchor gateway client
#[derive(Debug)]
pub struct HttpAnchorClient {
    endpoint: String,
    contract: Address,
    credential: Option<String>,
    client: Client,
    next_id: AtomicU64,
}

impl HttpAnchorClient {
    /// Create client from configuration
    pub fn new(config: &AnchorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build anchor client: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            contract: config.contract_address,
            credential: config.credential.clone(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<P, T>(&self, method: &str, params: &P) -> Result<T>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(credential) = &self.credential {
            builder = builder.bearer_auth(credential);
        }

        let response = builder.send().await.map_err(|e| {
            error!("Anchor call {} failed: {}", method, e);
            Error::AnchorUnavailable(format!("{} request failed: {}", method, e))
        })?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AnchorUnavailable(format!(
                "{} failed with status {}: {}",
                method, status, body
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AnchorRejected(format!(
                "{} failed with status {}: {}",
                method, status, body
            )));
        }

        let envelope = response.json::<RpcResponse<T>>().await.map_err(|e| {
            Error::AnchorUnavailable(format!("Failed to parse {} response: {}", method, e))
        })?;

        if let Some(rpc_error) = envelope.error {
            return Err(Error::AnchorRejected(format!(
                "{} returned error {}: {}",
                method, rpc_error.code, rpc_error.message
            )));
        }

        debug!("Anchor call {} succeeded", method);
        envelope
            .result
            .ok_or_else(|| Error::AnchorRejected(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl AnchorClient for HttpAnchorClient {
    async fn block_count(&self) -> Result<u64> {
        let params = ContractParams {
            contract: self.contract,
        };
        self.call("getBlockCount", &params).await
    }

    async fn block(&self, index: u64) -> Result<Block> {
        let params = BlockParams {
            contract: self.contract,
            block_number: index,
        };
        self.call("getBlock", &params).await
    }

    async fn submit_block(
        &self,
        block: &Block,
        account_update: Option<&BalanceUpdate>,
    ) -> Result<AnchorReceipt> {
        let params = SubmitBlockParams {
            contract: self.contract,
            block,
            account_update,
        };
        self.call("submitBlock", &params).await
    }

    async fn balances(&self) -> Result<BalanceUpdate> {
        let params = ContractParams {
            contract: self.contract,
        };
        self.call("getBalances", &params).await
    }

    async fn submit_challenge(&self, index: u64, state_root: Hash32) -> Result<AnchorReceipt> {
        let params = ChallengeParams {
            contract: self.contract,
            block_number: index,
            recalculated_state_root: state_root,
        };
        self.call("challengeBlock", &params).await
    }

    async fn submit_balance_correction(&self, update: &BalanceUpdate) -> Result<AnchorReceipt> {
        let params = BalanceCorrectionParams {
            contract: self.contract,
            update,
        };
        self.call("updateBalances", &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpAnchorClient {
        let config = AnchorConfig {
            endpoint: format!("{}/rpc", server.uri()),
            credential: Some("sequencer-secret".to_string()),
            timeout_ms: 2_000,
            ..AnchorConfig::default()
        };
        HttpAnchorClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_block_count_sends_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .and(header("authorization", "Bearer sequencer-secret"))
            .and(body_partial_json(json!({ "method": "getBlockCount" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": 4 })),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.block_count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_get_block_decodes_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "getBlock", "params": { "blockNumber": 2 } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "index": 2,
                    "previousBlockHash": format!("0x{}", "ab".repeat(32)),
                    "stateRoot": format!("0x{}", "cd".repeat(32)),
                    "payload": "0x5b5d",
                    "timestamp": 1700000000u64
                }
            })))
            .mount(&server)
            .await;

        let block = client_for(&server).block(2).await.unwrap();
        assert_eq!(block.index, 2);
        assert_eq!(block.state_root, [0xcd; 32]);
        assert!(block.transactions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rpc_error_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "invalid previous block hash" }
            })))
            .mount(&server)
            .await;

        let result = client_for(&server).submit_challenge(0, [1u8; 32]).await;
        assert!(matches!(result, Err(Error::AnchorRejected(_))));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server).balances().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_balance_correction_sends_base_unit_balances() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "updateBalances",
                "params": { "balances": ["100000000000000000000", "70"] }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": { "reference": format!("0x{}", "ef".repeat(32)) }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let update = BalanceUpdate {
            addresses: vec![Address::ZERO, Address::from_bytes([0x11; 20])],
            balances: vec![100 * 10u128.pow(18), 70],
        };
        let receipt = client_for(&server)
            .submit_balance_correction(&update)
            .await
            .unwrap();
        assert!(receipt.reference.starts_with("0xefef"));
    }

    #[tokio::test]
    async fn test_balances_decode_base_units() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "getBalances" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "addresses": [Address::ZERO],
                    "balances": ["250000000000000000000"]
                }
            })))
            .mount(&server)
            .await;

        let update = client_for(&server).balances().await.unwrap();
        assert_eq!(update.balances, vec![250 * 10u128.pow(18)]);
    }
}
