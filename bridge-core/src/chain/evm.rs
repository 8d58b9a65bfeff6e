//! JSON-RPC adapter for the EVM-style chain (`eth_call`-shaped requests
//! against a deployed HTLC escrow contract).

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use crate::config::ChainConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::hash::{HashLock, Secret};
use crate::types::{Chain, EventKind, NormalizedEvent};

use super::{AdapterStats, ChainAdapter, EscrowOnChainStatus, EscrowRecord};

pub struct EvmAdapter {
    client: reqwest::Client,
    rpc_url: String,
    contract: String,
    calls_total: AtomicU64,
    calls_failed: AtomicU64,
    last_block_height: AtomicU64,
}

impl EvmAdapter {
    pub fn new(config: &ChainConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.call_timeout)
            .build()
            .expect("reqwest client config is always valid");
        Self {
            client,
            rpc_url: config.rpc_url.clone(),
            contract: config.contract.clone(),
            calls_total: AtomicU64::new(0),
            calls_failed: AtomicU64::new(0),
            last_block_height: AtomicU64::new(0),
        }
    }

    async fn rpc_call(&self, method: &str, params: serde_json::Value) -> BridgeResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct RpcResponse {
            result: Option<serde_json::Value>,
            error: Option<RpcErrorBody>,
        }
        #[derive(Deserialize)]
        struct RpcErrorBody {
            message: String,
        }

        self.calls_total.fetch_add(1, Ordering::Relaxed);

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let sent = self.client.post(&self.rpc_url).json(&body).send().await;
        let response = match sent {
            Ok(r) => r,
            Err(e) => {
                self.calls_failed.fetch_add(1, Ordering::Relaxed);
                return Err(self.transport_error(e));
            }
        };
        let resp: RpcResponse = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                self.calls_failed.fetch_add(1, Ordering::Relaxed);
                return Err(self.transport_error(e));
            }
        };

        if let Some(err) = resp.error {
            self.calls_failed.fetch_add(1, Ordering::Relaxed);
            return Err(BridgeError::ChainUnavailable {
                chain: Chain::A,
                reason: err.message,
            });
        }
        resp.result
            .ok_or_else(|| BridgeError::Internal("empty RPC result".to_string()))
    }

    fn transport_error(&self, err: reqwest::Error) -> BridgeError {
        if err.is_timeout() {
            BridgeError::Timeout {
                op_name: "rpc_call".to_string(),
                elapsed_ms: 0,
            }
        } else if err.is_status() && err.status().map(|s| s.as_u16()) == Some(429) {
            BridgeError::RateLimited {
                chain: Chain::A,
                reason: err.to_string(),
            }
        } else {
            BridgeError::ChainUnavailable {
                chain: Chain::A,
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain(&self) -> Chain {
        Chain::A
    }

    async fn latest_block_height(&self) -> BridgeResult<u64> {
        let result = self.rpc_call("eth_blockNumber", json!([])).await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| BridgeError::Internal("eth_blockNumber: not a string".to_string()))?;
        let height = u64::from_str_radix(hex_str.trim_start_matches("0x"), 16)
            .map_err(|e| BridgeError::Internal(format!("eth_blockNumber: {e}")))?;
        self.last_block_height.store(height, Ordering::Relaxed);
        Ok(height)
    }

    async fn create_escrow(
        &self,
        counterparty_address: &str,
        amount: Decimal,
        asset: &str,
        hash_lock: HashLock,
        withdrawal_deadline_unix: i64,
        refund_deadline_unix: i64,
    ) -> BridgeResult<(String, String)> {
        let result = self
            .rpc_call(
                "eth_sendTransaction",
                json!({
                    "to": self.contract,
                    "data": {
                        "method": "createEscrow",
                        "counterparty": counterparty_address,
                        "amount": amount.to_string(),
                        "asset": asset,
                        "hashLock": hex::encode(hash_lock),
                        "withdrawalDeadline": withdrawal_deadline_unix,
                        "refundDeadline": refund_deadline_unix,
                    }
                }),
            )
            .await?;
        let escrow_id = result
            .get("escrowId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| BridgeError::Internal("createEscrow: missing escrow id".to_string()))?;
        let tx_hash = result
            .get("txHash")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| BridgeError::Internal("createEscrow: missing tx hash".to_string()))?;
        Ok((escrow_id, tx_hash))
    }

    async fn lock_escrow(&self, escrow_id: &str, resolver: &str) -> BridgeResult<String> {
        let result = self
            .rpc_call(
                "eth_sendTransaction",
                json!({
                    "to": self.contract,
                    "data": {
                        "method": "lockEscrow",
                        "id": escrow_id,
                        "resolver": resolver,
                    }
                }),
            )
            .await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| BridgeError::Internal("lockEscrow: missing tx hash".to_string()))
    }

    async fn get_escrow(&self, escrow_id: &str) -> BridgeResult<EscrowRecord> {
        let result = self
            .rpc_call(
                "eth_call",
                json!({ "to": self.contract, "data": { "method": "getEscrow", "id": escrow_id } }),
            )
            .await?;

        let status = match result.get("status").and_then(|v| v.as_str()) {
            Some("created") => EscrowOnChainStatus::Created,
            Some("locked") => EscrowOnChainStatus::Locked,
            Some("completed") => EscrowOnChainStatus::Completed,
            Some("refunded") => EscrowOnChainStatus::Refunded,
            _ => EscrowOnChainStatus::NotFound,
        };
        let hash_lock = result
            .get("hashLock")
            .and_then(|v| v.as_str())
            .and_then(|s| hex::decode(s).ok())
            .and_then(|bytes| bytes.try_into().ok());
        let block_height = result.get("blockHeight").and_then(|v| v.as_u64()).unwrap_or(0);

        Ok(EscrowRecord {
            escrow_id: escrow_id.to_string(),
            chain: Chain::A,
            status,
            hash_lock,
            block_height,
        })
    }

    async fn complete_escrow(&self, escrow_id: &str, secret: Secret) -> BridgeResult<String> {
        let result = self
            .rpc_call(
                "eth_sendTransaction",
                json!({
                    "to": self.contract,
                    "data": {
                        "method": "completeEscrow",
                        "id": escrow_id,
                        "secret": hex::encode(secret),
                    }
                }),
            )
            .await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| BridgeError::Internal("completeEscrow: missing tx hash".to_string()))
    }

    async fn refund_escrow(&self, escrow_id: &str) -> BridgeResult<String> {
        let result = self
            .rpc_call(
                "eth_sendTransaction",
                json!({ "to": self.contract, "data": { "method": "refundEscrow", "id": escrow_id } }),
            )
            .await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| BridgeError::Internal("refundEscrow: missing tx hash".to_string()))
    }

    async fn poll_events(&self, from_block: u64) -> BridgeResult<Vec<NormalizedEvent>> {
        let result = self
            .rpc_call(
                "eth_getLogs",
                json!({
                    "address": self.contract,
                    "fromBlock": format!("0x{:x}", from_block),
                }),
            )
            .await?;

        let logs = result.as_array().cloned().unwrap_or_default();
        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let kind = match log.get("eventName").and_then(|v| v.as_str()) {
                Some("EscrowCreated") => EventKind::EscrowCreated,
                Some("EscrowLocked") => EventKind::EscrowLocked,
                Some("EscrowCompleted") => EventKind::EscrowCompleted,
                Some("EscrowRefunded") => EventKind::EscrowRefunded,
                _ => continue,
            };
            let escrow_id = log
                .get("escrowId")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let maker = log.get("maker").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let amount = log
                .get("amount")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<Decimal>().ok())
                .unwrap_or_default();
            let asset = log.get("asset").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let hash_lock = log
                .get("hashLock")
                .and_then(|v| v.as_str())
                .and_then(|s| hex::decode(s).ok())
                .and_then(|bytes| bytes.try_into().ok());
            let tx_hash = log.get("txHash").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let block_height = log.get("blockNumber").and_then(|v| v.as_u64()).unwrap_or(from_block);

            events.push(NormalizedEvent {
                chain: Chain::A,
                kind,
                escrow_id,
                maker,
                amount,
                asset,
                hash_lock,
                timelock_sec: None,
                tx_hash,
                block_height,
                ts: Utc::now(),
            });
        }
        Ok(events)
    }

    fn get_stats(&self) -> AdapterStats {
        AdapterStats {
            calls_total: self.calls_total.load(Ordering::Relaxed),
            calls_failed: self.calls_failed.load(Ordering::Relaxed),
            last_block_height: self.last_block_height.load(Ordering::Relaxed),
        }
    }
}
