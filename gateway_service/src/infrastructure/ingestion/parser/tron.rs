use common::Chain;
use serde_json::Value;

use crate::domain::error::IngestError;
use crate::domain::types::WalletAddress;
use crate::infrastructure::ingestion::{ChainParser, ParsedTransfer, NATIVE_MINT};

/// Selector ABI de `transfer(address,uint256)`.
const TRANSFER_SELECTOR: &str = "a9059cbb";

/// Decimales de TRX: 1 TRX = 10^6 SUN.
const TRX_DECIMALS: u8 = 6;

/// Parser de transacciones TRON.
///
/// `TransferContract` es TRX nativo con monto en SUN.
/// `TriggerSmartContract` cuyo data empieza con `a9059cbb` es un
/// `transfer(address,uint256)` TRC-20: destinatario de 20 bytes (con
/// prefijo 0x41 de mainnet) y monto de 32 bytes big-endian; el mint es
/// la dirección del contrato. El memo viaja en `raw_data.data`.
pub struct TronParser;

impl TronParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TronParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainParser for TronParser {
    fn chain(&self) -> Chain {
        Chain::Tron
    }

    fn parse(
        &self,
        tx_hash: &str,
        raw: &Value,
        wallet: &WalletAddress,
    ) -> Result<Option<ParsedTransfer>, IngestError> {
        let tx = &raw["tx"];
        let info = &raw["info"];

        // Reverted contract calls never count as transfers
        if info["receipt"]["result"]
            .as_str()
            .is_some_and(|r| r != "SUCCESS")
        {
            return Ok(None);
        }

        let contract = &tx["raw_data"]["contract"][0];
        let contract_type = contract["type"].as_str().unwrap_or("");
        let value = &contract["parameter"]["value"];

        let memo = tx["raw_data"]["data"]
            .as_str()
            .and_then(decode_hex_utf8);
        let block_height = info["blockNumber"].as_i64();

        let transfer = match contract_type {
            "TransferContract" => {
                let to = address_to_base58(value["to_address"].as_str().unwrap_or(""));
                if to.as_deref() != Some(wallet.as_str()) {
                    return Ok(None);
                }
                let from = address_to_base58(value["owner_address"].as_str().unwrap_or(""))
                    .ok_or_else(|| parse_error(tx_hash, "invalid owner address"))?;
                let amount = value["amount"].as_u64().unwrap_or(0);

                ParsedTransfer {
                    tx_hash: tx_hash.to_string(),
                    from_address: from,
                    to_address: wallet.as_str().to_string(),
                    token_mint: NATIVE_MINT.to_string(),
                    amount_base_units: amount as u128,
                    decimals: TRX_DECIMALS,
                    memo,
                    block_height,
                }
            }
            "TriggerSmartContract" => {
                let data = value["data"].as_str().unwrap_or("");
                if !data.starts_with(TRANSFER_SELECTOR) || data.len() < 8 + 64 + 64 {
                    return Ok(None);
                }

                // arg1: 32 bytes, address in the last 20 with 0x41 prefix
                let recipient_hex = format!("41{}", &data[8 + 24..8 + 64]);
                let to = address_to_base58(&recipient_hex);
                if to.as_deref() != Some(wallet.as_str()) {
                    return Ok(None);
                }

                // arg2: 32 bytes big-endian amount
                let amount_hex = &data[8 + 64..8 + 128];
                let amount = u128::from_str_radix(amount_hex.trim_start_matches('0'), 16)
                    .or_else(|_| {
                        if amount_hex.chars().all(|c| c == '0') {
                            Ok(0)
                        } else {
                            Err(parse_error(tx_hash, "amount out of range"))
                        }
                    })?;

                let from = address_to_base58(value["owner_address"].as_str().unwrap_or(""))
                    .ok_or_else(|| parse_error(tx_hash, "invalid owner address"))?;
                let contract_address =
                    address_to_base58(value["contract_address"].as_str().unwrap_or(""))
                        .ok_or_else(|| parse_error(tx_hash, "invalid contract address"))?;

                ParsedTransfer {
                    tx_hash: tx_hash.to_string(),
                    from_address: from,
                    to_address: wallet.as_str().to_string(),
                    token_mint: contract_address,
                    amount_base_units: amount,
                    // Resolved from token metadata and cached in the
                    // whitelist; unknown contracts stay at 0
                    decimals: 0,
                    memo,
                    block_height,
                }
            }
            _ => return Ok(None),
        };

        Ok(Some(transfer))
    }
}

fn parse_error(tx_hash: &str, message: impl Into<String>) -> IngestError {
    IngestError::Parse {
        tx_hash: tx_hash.to_string(),
        message: message.into(),
    }
}

/// Dirección TRON en hex (prefijo 0x41) o ya en base58 → base58check.
fn address_to_base58(address: &str) -> Option<String> {
    if address.is_empty() {
        return None;
    }
    if address.starts_with('T') && bs58::decode(address).with_check(None).into_vec().is_ok() {
        return Some(address.to_string());
    }
    let bytes = hex::decode(address).ok()?;
    if bytes.len() != 21 || bytes[0] != 0x41 {
        return None;
    }
    Some(bs58::encode(bytes).with_check().into_string())
}

fn decode_hex_utf8(data: &str) -> Option<String> {
    let bytes = hex::decode(data).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // 41-prefixed hex forms of real-shaped addresses
    fn wallet_hex() -> String {
        hex::encode(
            bs58::decode("TUoHaVjx7n5xz8LwPRDckgFrDWhMhuSuJM")
                .with_check(None)
                .into_vec()
                .unwrap(),
        )
    }

    fn sender_hex() -> String {
        hex::encode(
            bs58::decode("TN3W4H6rK2ce4vX9YnFQHwKENnHjoxb3m9")
                .with_check(None)
                .into_vec()
                .unwrap(),
        )
    }

    fn contract_hex() -> String {
        hex::encode(
            bs58::decode("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t")
                .with_check(None)
                .into_vec()
                .unwrap(),
        )
    }

    #[test]
    fn test_native_transfer_in_sun() {
        let raw = json!({
            "tx": {
                "raw_data": {
                    "contract": [{
                        "type": "TransferContract",
                        "parameter": { "value": {
                            "owner_address": sender_hex(),
                            "to_address": wallet_hex(),
                            "amount": 5_000_000
                        }}
                    }],
                    "data": hex::encode("PAY-4f1c")
                }
            },
            "info": { "blockNumber": 68_000_000 }
        });

        let parser = TronParser::new();
        let parsed = parser
            .parse(
                "abc123",
                &raw,
                &WalletAddress::new("TUoHaVjx7n5xz8LwPRDckgFrDWhMhuSuJM"),
            )
            .unwrap()
            .unwrap();

        assert_eq!(parsed.token_mint, NATIVE_MINT);
        assert_eq!(parsed.amount_base_units, 5_000_000);
        assert_eq!(parsed.decimals, 6);
        assert_eq!(parsed.memo.as_deref(), Some("PAY-4f1c"));
        assert_eq!(parsed.from_address, "TN3W4H6rK2ce4vX9YnFQHwKENnHjoxb3m9");
    }

    #[test]
    fn test_trc20_transfer_decoded() {
        // transfer(address,uint256): recipient padded to 32 bytes,
        // amount 100_000_000 big-endian
        let recipient_word = format!("{:0>64}", &wallet_hex()[2..]);
        let amount_word = format!("{:0>64x}", 100_000_000u128);
        let data = format!("{}{}{}", TRANSFER_SELECTOR, recipient_word, amount_word);

        let raw = json!({
            "tx": {
                "raw_data": {
                    "contract": [{
                        "type": "TriggerSmartContract",
                        "parameter": { "value": {
                            "owner_address": sender_hex(),
                            "contract_address": contract_hex(),
                            "data": data
                        }}
                    }]
                }
            },
            "info": { "blockNumber": 68_000_001, "receipt": { "result": "SUCCESS" } }
        });

        let parser = TronParser::new();
        let parsed = parser
            .parse(
                "abc124",
                &raw,
                &WalletAddress::new("TUoHaVjx7n5xz8LwPRDckgFrDWhMhuSuJM"),
            )
            .unwrap()
            .unwrap();

        assert_eq!(parsed.token_mint, "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t");
        assert_eq!(parsed.amount_base_units, 100_000_000);
        assert_eq!(parsed.block_height, Some(68_000_001));
    }

    #[test]
    fn test_transfer_to_other_wallet_ignored() {
        let raw = json!({
            "tx": {
                "raw_data": {
                    "contract": [{
                        "type": "TransferContract",
                        "parameter": { "value": {
                            "owner_address": sender_hex(),
                            "to_address": sender_hex(),
                            "amount": 1
                        }}
                    }]
                }
            },
            "info": {}
        });

        let parser = TronParser::new();
        assert!(parser
            .parse(
                "abc125",
                &raw,
                &WalletAddress::new("TUoHaVjx7n5xz8LwPRDckgFrDWhMhuSuJM"),
            )
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_reverted_contract_call_ignored() {
        let raw = json!({
            "tx": { "raw_data": { "contract": [{ "type": "TriggerSmartContract" }] } },
            "info": { "receipt": { "result": "REVERT" } }
        });

        let parser = TronParser::new();
        assert!(parser
            .parse(
                "abc126",
                &raw,
                &WalletAddress::new("TUoHaVjx7n5xz8LwPRDckgFrDWhMhuSuJM"),
            )
            .unwrap()
            .is_none());
    }
}
