use std::time::Duration;

use async_trait::async_trait;
use common::Chain;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

use crate::domain::error::IngestError;
use crate::domain::gateways::{BlockchainClient, TransferPage, TxFinality, TxHashStream};
use crate::domain::types::WalletAddress;
use crate::infrastructure::gateways::{hex_to_u128, json_rpc};

/// Firma del evento ERC-20 `Transfer(address,address,uint256)`.
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Cliente BSC sobre JSON-RPC (eth_*) + suscripción WS de logs.
///
/// La finalidad exige >= 15 confirmaciones; BSC no reorganiza más allá
/// de esa profundidad en la práctica.
pub struct BscClient {
    http: reqwest::Client,
    rpc_url: String,
    ws_url: String,
    finality_threshold: u32,
}

impl BscClient {
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
        json_rpc(&self.http, &self.rpc_url, Chain::Bsc, method, params).await
    }

    async fn latest_block(&self) -> Result<u128, IngestError> {
        let result = self.rpc("eth_blockNumber", json!([])).await?;
        hex_to_u128(&result).ok_or_else(|| IngestError::Rpc {
            chain: Chain::Bsc,
            message: "eth_blockNumber: invalid response".to_string(),
        })
    }

    /// Topic de 32 bytes para filtrar por dirección destinataria.
    fn address_topic(address: &WalletAddress) -> String {
        let bare = address.as_str().trim_start_matches("0x").to_lowercase();
        format!("0x{:0>64}", bare)
    }
}

#[async_trait]
impl BlockchainClient for BscClient {
    fn chain(&self) -> Chain {
        Chain::Bsc
    }

    /// Transacción + receipt en un solo payload: el parser necesita los
    /// logs del receipt para las transferencias ERC-20 y el campo
    /// `value` para BNB nativo.
    async fn get_transaction(&self, tx_hash: &str) -> Result<Value, IngestError> {
        let tx = self
            .rpc("eth_getTransactionByHash", json!([tx_hash]))
            .await?;
        if tx.is_null() {
            return Err(IngestError::Rpc {
                chain: Chain::Bsc,
                message: format!("Transaction not found: {}", tx_hash),
            });
        }
        let receipt = self
            .rpc("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        Ok(json!({ "tx": tx, "receipt": receipt }))
    }

    async fn get_finality(&self, tx_hash: &str) -> Result<TxFinality, IngestError> {
        let receipt = self
            .rpc("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        let Some(block) = hex_to_u128(&receipt["blockNumber"]) else {
            return Ok(TxFinality {
                confirmations: 0,
                finalized: false,
            });
        };

        let latest = self.latest_block().await?;
        let confirmations = latest.saturating_sub(block).saturating_add(1) as u64;
        Ok(TxFinality {
            confirmations,
            finalized: confirmations >= self.finality_threshold as u64,
        })
    }

    async fn get_native_balance(&self, address: &WalletAddress) -> Result<Decimal, IngestError> {
        let result = self
            .rpc("eth_getBalance", json!([address.as_str(), "latest"]))
            .await?;
        let wei = hex_to_u128(&result).ok_or_else(|| IngestError::Rpc {
            chain: Chain::Bsc,
            message: "eth_getBalance: invalid response".to_string(),
        })?;
        Ok(Decimal::from_i128_with_scale(wei as i128, 0))
    }

    async fn get_token_balance(
        &self,
        address: &WalletAddress,
        token_contract: &str,
    ) -> Result<Decimal, IngestError> {
        // balanceOf(address) selector + padded owner
        let bare = address.as_str().trim_start_matches("0x").to_lowercase();
        let data = format!("0x70a08231{:0>64}", bare);
        let result = self
            .rpc(
                "eth_call",
                json!([{ "to": token_contract, "data": data }, "latest"]),
            )
            .await?;
        let units = hex_to_u128(&result).ok_or_else(|| IngestError::Rpc {
            chain: Chain::Bsc,
            message: "eth_call balanceOf: invalid response".to_string(),
        })?;
        Ok(Decimal::from_i128_with_scale(units as i128, 0))
    }

    /// Escaneo de logs `Transfer` hacia la billetera desde el bloque del
    /// cursor; el cursor es el último bloque visto.
    async fn recent_transfers(
        &self,
        address: &WalletAddress,
        cursor: Option<&str>,
    ) -> Result<TransferPage, IngestError> {
        let latest = self.latest_block().await?;
        let from_block = match cursor.and_then(|c| c.parse::<u128>().ok()) {
            Some(last_seen) => last_seen + 1,
            // First run: look a finality window back
            None => latest.saturating_sub(self.finality_threshold as u128 * 4),
        };
        if from_block > latest {
            return Ok(TransferPage {
                tx_hashes: Vec::new(),
                next_cursor: cursor.map(str::to_string),
            });
        }

        let result = self
            .rpc(
                "eth_getLogs",
                json!([{
                    "fromBlock": format!("0x{:x}", from_block),
                    "toBlock": format!("0x{:x}", latest),
                    "topics": [TRANSFER_TOPIC, Value::Null, Self::address_topic(address)]
                }]),
            )
            .await?;

        let mut tx_hashes: Vec<String> = result
            .as_array()
            .map(|logs| {
                logs.iter()
                    .filter_map(|log| log["transactionHash"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        tx_hashes.dedup();

        Ok(TransferPage {
            tx_hashes,
            next_cursor: Some(latest.to_string()),
        })
    }

    async fn subscribe(&self, address: &WalletAddress) -> Result<TxHashStream, IngestError> {
        if self.ws_url.is_empty() {
            return Err(IngestError::SubscriptionUnsupported(Chain::Bsc));
        }
        let (mut socket, _) =
            connect_async(&self.ws_url)
                .await
                .map_err(|e| IngestError::Subscription {
                    chain: Chain::Bsc,
                    message: e.to_string(),
                })?;

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": [
                "logs",
                { "topics": [TRANSFER_TOPIC, Value::Null, Self::address_topic(address)] }
            ]
        });
        socket
            .send(Message::Text(request.to_string().into()))
            .await
            .map_err(|e| IngestError::Subscription {
                chain: Chain::Bsc,
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
                        let hash = &payload["params"]["result"]["transactionHash"];
                        if let Some(hash) = hash.as_str() {
                            if tx.send(Ok(hash.to_string())).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => {}
                    Ok(Message::Close(_)) | Ok(Message::Frame(_)) => break,
                    Err(e) => {
                        warn!("BSC WS error: {}", e);
                        let _ = tx
                            .send(Err(IngestError::Subscription {
                                chain: Chain::Bsc,
                                message: e.to_string(),
                            }))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(futures_util::stream::unfold(rx, |mut rx| async {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}
