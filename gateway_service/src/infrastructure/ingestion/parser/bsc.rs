use common::Chain;
use serde_json::Value;

use crate::domain::error::IngestError;
use crate::domain::types::WalletAddress;
use crate::infrastructure::gateways::bsc::TRANSFER_TOPIC;
use crate::infrastructure::ingestion::{ChainParser, ParsedTransfer, NATIVE_MINT};

/// Decimales de BNB nativo.
const BNB_DECIMALS: u8 = 18;

/// Parser de transacciones BSC.
///
/// Escanea los logs del receipt buscando eventos ERC-20
/// `Transfer(address,address,uint256)` dirigidos a la billetera; las
/// transferencias de BNB nativo se leen del campo `value` de la
/// transacción. Para transferencias nativas, el `input` se intenta
/// decodificar como memo UTF-8.
pub struct BscParser;

impl BscParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BscParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainParser for BscParser {
    fn chain(&self) -> Chain {
        Chain::Bsc
    }

    fn parse(
        &self,
        tx_hash: &str,
        raw: &Value,
        wallet: &WalletAddress,
    ) -> Result<Option<ParsedTransfer>, IngestError> {
        let tx = &raw["tx"];
        let receipt = &raw["receipt"];

        // Reverted transactions carry no value
        if receipt["status"].as_str() == Some("0x0") {
            return Ok(None);
        }

        let wallet_bare = bare_address(wallet.as_str());
        let block_height = hex_i64(&receipt["blockNumber"]).or_else(|| hex_i64(&tx["blockNumber"]));

        // ERC-20 logs first: that is what invoices are denominated in
        if let Some(logs) = receipt["logs"].as_array() {
            for log in logs {
                let topics = log["topics"].as_array().cloned().unwrap_or_default();
                if topics.len() != 3 || topics[0].as_str() != Some(TRANSFER_TOPIC) {
                    continue;
                }
                let Some(to_topic) = topics[2].as_str() else {
                    continue;
                };
                if !topic_matches_address(to_topic, &wallet_bare) {
                    continue;
                }

                let amount = hex_u128(&log["data"]).ok_or_else(|| IngestError::Parse {
                    tx_hash: tx_hash.to_string(),
                    message: "invalid Transfer amount".to_string(),
                })?;
                let from = topics[1]
                    .as_str()
                    .map(topic_to_address)
                    .unwrap_or_default();
                let contract = log["address"].as_str().unwrap_or_default().to_lowercase();

                return Ok(Some(ParsedTransfer {
                    tx_hash: tx_hash.to_string(),
                    from_address: from,
                    to_address: wallet.as_str().to_lowercase(),
                    token_mint: contract,
                    amount_base_units: amount,
                    // BEP-20 stablecoins use 18; the whitelist overrides
                    decimals: 18,
                    memo: None,
                    block_height,
                }));
            }
        }

        // Native BNB: direct value transfer to the wallet
        let to = tx["to"].as_str().map(bare_address);
        let value = hex_u128(&tx["value"]).unwrap_or(0);
        if to.as_deref() == Some(wallet_bare.as_str()) && value > 0 {
            let memo = tx["input"]
                .as_str()
                .filter(|input| *input != "0x")
                .and_then(|input| hex::decode(input.trim_start_matches("0x")).ok())
                .and_then(|bytes| String::from_utf8(bytes).ok());

            return Ok(Some(ParsedTransfer {
                tx_hash: tx_hash.to_string(),
                from_address: tx["from"].as_str().unwrap_or_default().to_lowercase(),
                to_address: wallet.as_str().to_lowercase(),
                token_mint: NATIVE_MINT.to_string(),
                amount_base_units: value,
                decimals: BNB_DECIMALS,
                memo,
                block_height,
            }));
        }

        Ok(None)
    }
}

fn bare_address(address: &str) -> String {
    address.trim_start_matches("0x").to_lowercase()
}

fn topic_matches_address(topic: &str, bare: &str) -> bool {
    bare_address(topic).ends_with(bare) && bare.len() == 40
}

fn topic_to_address(topic: &str) -> String {
    let bare = bare_address(topic);
    let start = bare.len().saturating_sub(40);
    format!("0x{}", &bare[start..])
}

fn hex_u128(value: &Value) -> Option<u128> {
    let raw = value.as_str()?.trim_start_matches("0x");
    if raw.is_empty() {
        return Some(0);
    }
    // 256-bit words: reject anything beyond u128 range
    let trimmed = raw.trim_start_matches('0');
    if trimmed.len() > 32 {
        return None;
    }
    if trimmed.is_empty() {
        return Some(0);
    }
    u128::from_str_radix(trimmed, 16).ok()
}

fn hex_i64(value: &Value) -> Option<i64> {
    let raw = value.as_str()?.trim_start_matches("0x");
    i64::from_str_radix(raw, 16).ok()
}
