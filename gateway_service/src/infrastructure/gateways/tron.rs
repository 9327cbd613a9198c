use std::time::Duration;

use async_trait::async_trait;
use common::Chain;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::domain::error::IngestError;
use crate::domain::gateways::{BlockchainClient, TransferPage, TxFinality, TxHashStream};
use crate::domain::types::WalletAddress;

/// Cliente TRON sobre la API HTTP del full node (estilo TronGrid).
///
/// TRON no expone un feed de suscripción público: `subscribe` reporta
/// `SubscriptionUnsupported` y el ingestor opera solo con polling. La
/// finalidad exige >= 19 confirmaciones (ventana SR).
pub struct TronClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    finality_threshold: u32,
}

impl TronClient {
    pub fn new(base_url: String, api_key: Option<String>, finality_threshold: u32) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            finality_threshold,
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, IngestError> {
        let mut request = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("TRON-PRO-API-KEY", key);
        }

        let response = request.send().await.map_err(|e| IngestError::Rpc {
            chain: Chain::Tron,
            message: format!("{}: {}", path, e),
        })?;
        response.json().await.map_err(|e| IngestError::Rpc {
            chain: Chain::Tron,
            message: format!("{}: invalid JSON response: {}", path, e),
        })
    }

    async fn get(&self, path: &str) -> Result<Value, IngestError> {
        let mut request = self.http.get(format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            request = request.header("TRON-PRO-API-KEY", key);
        }

        let response = request.send().await.map_err(|e| IngestError::Rpc {
            chain: Chain::Tron,
            message: format!("{}: {}", path, e),
        })?;
        response.json().await.map_err(|e| IngestError::Rpc {
            chain: Chain::Tron,
            message: format!("{}: invalid JSON response: {}", path, e),
        })
    }

    async fn now_block_number(&self) -> Result<u64, IngestError> {
        let block = self.post("/wallet/getnowblock", json!({})).await?;
        block["block_header"]["raw_data"]["number"]
            .as_u64()
            .ok_or_else(|| IngestError::Rpc {
                chain: Chain::Tron,
                message: "getnowblock: missing block number".to_string(),
            })
    }
}

#[async_trait]
impl BlockchainClient for TronClient {
    fn chain(&self) -> Chain {
        Chain::Tron
    }

    /// Transacción + info de ejecución (bloque, logs) en un payload.
    async fn get_transaction(&self, tx_hash: &str) -> Result<Value, IngestError> {
        let tx = self
            .post("/wallet/gettransactionbyid", json!({ "value": tx_hash }))
            .await?;
        if tx.as_object().map(|o| o.is_empty()).unwrap_or(true) {
            return Err(IngestError::Rpc {
                chain: Chain::Tron,
                message: format!("Transaction not found: {}", tx_hash),
            });
        }
        let info = self
            .post("/wallet/gettransactioninfobyid", json!({ "value": tx_hash }))
            .await?;

        Ok(json!({ "tx": tx, "info": info }))
    }

    async fn get_finality(&self, tx_hash: &str) -> Result<TxFinality, IngestError> {
        let info = self
            .post("/wallet/gettransactioninfobyid", json!({ "value": tx_hash }))
            .await?;
        let Some(block) = info["blockNumber"].as_u64() else {
            return Ok(TxFinality {
                confirmations: 0,
                finalized: false,
            });
        };

        let now = self.now_block_number().await?;
        let confirmations = now.saturating_sub(block).saturating_add(1);
        Ok(TxFinality {
            confirmations,
            finalized: confirmations >= self.finality_threshold as u64,
        })
    }

    async fn get_native_balance(&self, address: &WalletAddress) -> Result<Decimal, IngestError> {
        let account = self
            .post(
                "/wallet/getaccount",
                json!({ "address": address.as_str(), "visible": true }),
            )
            .await?;
        // Balance in SUN (1 TRX = 10^6 SUN); absent for empty accounts
        Ok(Decimal::from(account["balance"].as_u64().unwrap_or(0)))
    }

    async fn get_token_balance(
        &self,
        address: &WalletAddress,
        token_contract: &str,
    ) -> Result<Decimal, IngestError> {
        let result = self
            .post(
                "/wallet/triggerconstantcontract",
                json!({
                    "owner_address": address.as_str(),
                    "contract_address": token_contract,
                    "function_selector": "balanceOf(address)",
                    "parameter": tron_address_parameter(address.as_str()),
                    "visible": true
                }),
            )
            .await?;

        let hex = result["constant_result"][0].as_str().unwrap_or("0");
        let units = u128::from_str_radix(hex, 16).unwrap_or(0);
        Ok(Decimal::from_i128_with_scale(units as i128, 0))
    }

    /// Transferencias TRC-20 recientes vía el endpoint de cuenta; el
    /// cursor es el timestamp del último lote comprometido.
    async fn recent_transfers(
        &self,
        address: &WalletAddress,
        cursor: Option<&str>,
    ) -> Result<TransferPage, IngestError> {
        let min_timestamp = cursor.and_then(|c| c.parse::<u64>().ok()).unwrap_or(0);
        let path = format!(
            "/v1/accounts/{}/transactions/trc20?only_to=true&limit=100&min_timestamp={}",
            address.as_str(),
            min_timestamp
        );
        let result = self.get(&path).await?;

        let mut tx_hashes = Vec::new();
        let mut max_timestamp = min_timestamp;
        if let Some(entries) = result["data"].as_array() {
            for entry in entries {
                if let Some(id) = entry["transaction_id"].as_str() {
                    tx_hashes.push(id.to_string());
                }
                if let Some(ts) = entry["block_timestamp"].as_u64() {
                    max_timestamp = max_timestamp.max(ts);
                }
            }
        }

        // Advance past the newest seen transfer to avoid refetching it
        let next_cursor = if tx_hashes.is_empty() {
            cursor.map(str::to_string)
        } else {
            Some((max_timestamp + 1).to_string())
        };

        Ok(TransferPage {
            tx_hashes,
            next_cursor,
        })
    }

    async fn subscribe(&self, _address: &WalletAddress) -> Result<TxHashStream, IngestError> {
        Err(IngestError::SubscriptionUnsupported(Chain::Tron))
    }
}

/// Parámetro ABI de 32 bytes para una dirección TRON (base58check).
///
/// La dirección decodificada lleva el prefijo 0x41 de mainnet; el ABI
/// espera los últimos 20 bytes alineados a la derecha.
fn tron_address_parameter(address: &str) -> String {
    match bs58::decode(address).with_check(None).into_vec() {
        Ok(bytes) if bytes.len() == 21 => {
            format!("{:0>64}", hex::encode(&bytes[1..]))
        }
        _ => format!("{:0>64}", ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parameter_is_right_aligned() {
        // TUoHaVjx7n5xz8LwPRDckgFrDWhMhuSuJM decodes to 21 bytes with 0x41 prefix
        let param = tron_address_parameter("TUoHaVjx7n5xz8LwPRDckgFrDWhMhuSuJM");
        assert_eq!(param.len(), 64);
        assert!(param.starts_with("000000000000000000000000"));
    }

    #[test]
    fn test_invalid_address_yields_zero_parameter() {
        assert_eq!(tron_address_parameter("not-base58!"), "0".repeat(64));
    }
}
