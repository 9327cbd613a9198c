use std::time::Duration;

use async_trait::async_trait;
use common::Chain;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::domain::error::IngestError;
use crate::domain::gateways::{BlockchainClient, TransferPage, TxFinality, TxHashStream};
use crate::domain::types::WalletAddress;
use crate::infrastructure::gateways::json_rpc;

/// Cliente Solana sobre JSON-RPC + WebSocket.
///
/// La finalidad usa el commitment `finalized` (~32 slots); una firma con
/// `confirmations: null` en `getSignatureStatuses` ya está enraizada.
pub struct SolanaClient {
    http: reqwest::Client,
    rpc_url: String,
    ws_url: String,
    finality_threshold: u32,
}

impl SolanaClient {
    pub fn new(rpc_url: String, ws_url: String, finality_threshold: u32) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            rpc_url,
            ws_url,
            finality_threshold,
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, IngestError> {
        json_rpc(&self.http, &self.rpc_url, Chain::Solana, method, params).await
    }
}

#[async_trait]
impl BlockchainClient for SolanaClient {
    fn chain(&self) -> Chain {
        Chain::Solana
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<Value, IngestError> {
        let result = self
            .rpc(
                "getTransaction",
                json!([tx_hash, {
                    "encoding": "json",
                    "commitment": "confirmed",
                    "maxSupportedTransactionVersion": 0
                }]),
            )
            .await?;
        if result.is_null() {
            return Err(IngestError::Rpc {
                chain: Chain::Solana,
                message: format!("Transaction not found: {}", tx_hash),
            });
        }
        Ok(result)
    }

    async fn get_finality(&self, tx_hash: &str) -> Result<TxFinality, IngestError> {
        let result = self
            .rpc(
                "getSignatureStatuses",
                json!([[tx_hash], { "searchTransactionHistory": true }]),
            )
            .await?;

        let status = &result["value"][0];
        if status.is_null() {
            return Ok(TxFinality {
                confirmations: 0,
                finalized: false,
            });
        }

        let finalized = status["confirmationStatus"].as_str() == Some("finalized");
        let confirmations = if finalized {
            // Rooted signatures report null confirmations
            self.finality_threshold as u64
        } else {
            status["confirmations"].as_u64().unwrap_or(0)
        };

        Ok(TxFinality {
            confirmations,
            finalized,
        })
    }

    async fn get_native_balance(&self, address: &WalletAddress) -> Result<Decimal, IngestError> {
        let result = self
            .rpc("getBalance", json!([address.as_str()]))
            .await?;
        let lamports = result["value"].as_u64().ok_or_else(|| IngestError::Rpc {
            chain: Chain::Solana,
            message: "getBalance: missing value".to_string(),
        })?;
        Ok(Decimal::from(lamports))
    }

    async fn get_token_balance(
        &self,
        address: &WalletAddress,
        token_contract: &str,
    ) -> Result<Decimal, IngestError> {
        let result = self
            .rpc(
                "getTokenAccountsByOwner",
                json!([address.as_str(), { "mint": token_contract }, { "encoding": "jsonParsed" }]),
            )
            .await?;

        let mut total = Decimal::ZERO;
        if let Some(accounts) = result["value"].as_array() {
            for account in accounts {
                let amount =
                    &account["account"]["data"]["parsed"]["info"]["tokenAmount"]["amount"];
                if let Some(base_units) = amount.as_str().and_then(|a| a.parse::<u128>().ok()) {
                    total += Decimal::from_i128_with_scale(base_units as i128, 0);
                }
            }
        }
        Ok(total)
    }

    async fn recent_transfers(
        &self,
        address: &WalletAddress,
        cursor: Option<&str>,
    ) -> Result<TransferPage, IngestError> {
        let mut options = json!({ "limit": 100, "commitment": "confirmed" });
        if let Some(until) = cursor {
            options["until"] = json!(until);
        }

        let result = self
            .rpc(
                "getSignaturesForAddress",
                json!([address.as_str(), options]),
            )
            .await?;

        // Newest first; the consumer prefers oldest first and the newest
        // signature becomes the committed cursor.
        let mut tx_hashes: Vec<String> = result
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e["err"].is_null())
                    .filter_map(|e| e["signature"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let next_cursor = tx_hashes.first().cloned();
        tx_hashes.reverse();

        Ok(TransferPage {
            tx_hashes,
            next_cursor,
        })
    }

    async fn subscribe(&self, address: &WalletAddress) -> Result<TxHashStream, IngestError> {
        if self.ws_url.is_empty() {
            return Err(IngestError::SubscriptionUnsupported(Chain::Solana));
        }
        let (mut socket, _) =
            connect_async(&self.ws_url)
                .await
                .map_err(|e| IngestError::Subscription {
                    chain: Chain::Solana,
                    message: e.to_string(),
                })?;

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "logsSubscribe",
            "params": [
                { "mentions": [address.as_str()] },
                { "commitment": "confirmed" }
            ]
        });
        socket
            .send(Message::Text(request.to_string().into()))
            .await
            .map_err(|e| IngestError::Subscription {
                chain: Chain::Solana,
                message: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel::<Result<String, IngestError>>(256);
        tokio::spawn(async move {
            while let Some(message) = socket.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        let Ok(payload) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        let signature = &payload["params"]["result"]["value"]["signature"];
                        if let Some(sig) = signature.as_str() {
                            debug!("Solana WS notification: {}", sig);
                            if tx.send(Ok(sig.to_string())).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => {}
                    Ok(Message::Close(_)) | Ok(Message::Frame(_)) => break,
                    Err(e) => {
                        warn!("Solana WS error: {}", e);
                        let _ = tx
                            .send(Err(IngestError::Subscription {
                                chain: Chain::Solana,
                                message: e.to_string(),
                            }))
                            .await;
                        return;
                    }
                }
            }
            // Stream ends; the producer loop reconnects with backoff
        });

        Ok(Box::pin(futures_util::stream::unfold(rx, |mut rx| async {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}
