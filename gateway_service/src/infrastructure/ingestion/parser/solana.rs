use common::Chain;
use serde_json::Value;

use crate::domain::error::IngestError;
use crate::domain::types::WalletAddress;
use crate::infrastructure::ingestion::{ChainParser, ParsedTransfer};

/// Programa SPL Token.
const SPL_TOKEN_PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
/// Programas de memo (v1 y v2).
const MEMO_PROGRAMS: [&str; 2] = [
    "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr",
    "Memo1UhkJRfHyvLMcVucJwxXeuD728EqVDDwQDxFMNo",
];

/// Discriminadores de instrucción SPL.
const IX_TRANSFER: u8 = 3;
const IX_TRANSFER_CHECKED: u8 = 12;

/// Parser de transacciones Solana (encoding "json").
///
/// Camina las instrucciones buscando `Transfer` (monto u64 LE) y
/// `TransferChecked` (monto + decimales). El destinatario es el dueño de
/// la cuenta de token destino según `postTokenBalances`, o la cuenta
/// destino misma cuando la billetera monitoreada ES la cuenta de token
/// (`wallet_is_token_account`). El memo es el payload UTF-8 de cualquier
/// instrucción del programa de memo.
pub struct SolanaParser {
    wallet_is_token_account: bool,
}

impl SolanaParser {
    pub fn new(wallet_is_token_account: bool) -> Self {
        Self {
            wallet_is_token_account,
        }
    }

    fn parse_error(tx_hash: &str, message: impl Into<String>) -> IngestError {
        IngestError::Parse {
            tx_hash: tx_hash.to_string(),
            message: message.into(),
        }
    }
}

struct SplTransfer {
    destination_index: usize,
    authority_index: usize,
    mint: Option<String>,
    amount: u64,
    decimals: Option<u8>,
}

fn decode_spl_instruction(data: &[u8], accounts: &[usize]) -> Option<SplTransfer> {
    match data.first()? {
        &IX_TRANSFER if data.len() >= 9 && accounts.len() >= 3 => Some(SplTransfer {
            destination_index: accounts[1],
            authority_index: accounts[2],
            mint: None,
            amount: u64::from_le_bytes(data[1..9].try_into().ok()?),
            decimals: None,
        }),
        &IX_TRANSFER_CHECKED if data.len() >= 10 && accounts.len() >= 4 => Some(SplTransfer {
            destination_index: accounts[2],
            authority_index: accounts[3],
            mint: Some(String::new()), // resolved from the mint slot below
            amount: u64::from_le_bytes(data[1..9].try_into().ok()?),
            decimals: Some(data[9]),
        }),
        _ => None,
    }
}

impl ChainParser for SolanaParser {
    fn chain(&self) -> Chain {
        Chain::Solana
    }

    fn parse(
        &self,
        tx_hash: &str,
        raw: &Value,
        wallet: &WalletAddress,
    ) -> Result<Option<ParsedTransfer>, IngestError> {
        if !raw["meta"]["err"].is_null() {
            return Ok(None);
        }

        let message = &raw["transaction"]["message"];
        let account_keys: Vec<&str> = message["accountKeys"]
            .as_array()
            .ok_or_else(|| Self::parse_error(tx_hash, "missing accountKeys"))?
            .iter()
            .filter_map(Value::as_str)
            .collect();
        let instructions = message["instructions"]
            .as_array()
            .ok_or_else(|| Self::parse_error(tx_hash, "missing instructions"))?;
        let post_token_balances = raw["meta"]["postTokenBalances"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let key_at = |index: usize| -> Result<&str, IngestError> {
            account_keys
                .get(index)
                .copied()
                .ok_or_else(|| Self::parse_error(tx_hash, format!("account index {} out of range", index)))
        };

        let mut memo: Option<String> = None;
        let mut transfer: Option<ParsedTransfer> = None;

        for instruction in instructions {
            let program_index = instruction["programIdIndex"].as_u64().unwrap_or(u64::MAX);
            let Ok(program) = key_at(program_index as usize) else {
                continue;
            };
            let data_b58 = instruction["data"].as_str().unwrap_or("");

            if MEMO_PROGRAMS.contains(&program) {
                if let Ok(bytes) = bs58::decode(data_b58).into_vec() {
                    if let Ok(text) = String::from_utf8(bytes) {
                        memo = Some(text);
                    }
                }
                continue;
            }

            if program != SPL_TOKEN_PROGRAM || transfer.is_some() {
                continue;
            }

            let Ok(data) = bs58::decode(data_b58).into_vec() else {
                continue;
            };
            let accounts: Vec<usize> = instruction["accounts"]
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_u64)
                        .map(|v| v as usize)
                        .collect()
                })
                .unwrap_or_default();

            let Some(decoded) = decode_spl_instruction(&data, &accounts) else {
                continue;
            };

            let destination = key_at(decoded.destination_index)?;
            let authority = key_at(decoded.authority_index)?;

            // Token balance entry for the destination account carries
            // mint, owner and decimals; plain Transfer depends on it.
            let balance_entry = post_token_balances.iter().find(|entry| {
                entry["accountIndex"].as_u64() == Some(decoded.destination_index as u64)
            });

            let owner = balance_entry.and_then(|e| e["owner"].as_str());
            let recipient = if self.wallet_is_token_account {
                destination
            } else {
                owner.unwrap_or(destination)
            };
            if recipient != wallet.as_str() {
                continue;
            }

            let mint = match decoded.mint {
                // TransferChecked: the mint is an instruction account
                Some(_) => {
                    let mint_index = instruction["accounts"][1]
                        .as_u64()
                        .ok_or_else(|| Self::parse_error(tx_hash, "missing mint slot"))?;
                    key_at(mint_index as usize)?.to_string()
                }
                // Plain Transfer: inferred from the token-account lookup
                None => balance_entry
                    .and_then(|e| e["mint"].as_str())
                    .ok_or_else(|| {
                        Self::parse_error(tx_hash, "cannot infer mint for plain Transfer")
                    })?
                    .to_string(),
            };

            let decimals = decoded.decimals.or_else(|| {
                balance_entry
                    .and_then(|e| e["uiTokenAmount"]["decimals"].as_u64())
                    .map(|d| d as u8)
            });

            transfer = Some(ParsedTransfer {
                tx_hash: tx_hash.to_string(),
                from_address: authority.to_string(),
                to_address: wallet.as_str().to_string(),
                token_mint: mint,
                amount_base_units: decoded.amount as u128,
                decimals: decimals.unwrap_or(0),
                memo: None,
                block_height: raw["slot"].as_i64(),
            });
        }

        Ok(transfer.map(|mut t| {
            t.memo = memo;
            t
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WALLET: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";
    const TOKEN_ACCOUNT: &str = "7UX2i7SucgLMQcfZ75s3VXmZZY4YRUyJN9X1RgfMoDUi";
    const MINT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";
    const SENDER: &str = "GDfnEsia2WLAW5t8yx2X5j2mkfA74i5kwGdDuZHt7XmG";
    const SENDER_TOKEN_ACCOUNT: &str = "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T";

    fn transfer_checked_data(amount: u64, decimals: u8) -> String {
        let mut data = vec![12u8];
        data.extend_from_slice(&amount.to_le_bytes());
        data.push(decimals);
        bs58::encode(data).into_string()
    }

    fn transfer_data(amount: u64) -> String {
        let mut data = vec![3u8];
        data.extend_from_slice(&amount.to_le_bytes());
        bs58::encode(data).into_string()
    }

    fn memo_data(text: &str) -> String {
        bs58::encode(text.as_bytes()).into_string()
    }

    /// accountKeys: 0 sender, 1 sender token acct, 2 mint, 3 dest token
    /// acct, 4 token program, 5 memo program
    fn base_tx(instructions: Value) -> Value {
        json!({
            "slot": 250_000_000,
            "transaction": {
                "message": {
                    "accountKeys": [
                        SENDER,
                        SENDER_TOKEN_ACCOUNT,
                        MINT,
                        TOKEN_ACCOUNT,
                        SPL_TOKEN_PROGRAM,
                        MEMO_PROGRAMS[0]
                    ],
                    "instructions": instructions
                }
            },
            "meta": {
                "err": null,
                "postTokenBalances": [{
                    "accountIndex": 3,
                    "mint": MINT,
                    "owner": WALLET,
                    "uiTokenAmount": { "amount": "100000000", "decimals": 6 }
                }]
            }
        })
    }

    #[test]
    fn test_transfer_checked_with_memo() {
        let raw = base_tx(json!([
            {
                "programIdIndex": 4,
                // source, mint, destination, authority
                "accounts": [1, 2, 3, 0],
                "data": transfer_checked_data(100_000_000, 6)
            },
            {
                "programIdIndex": 5,
                "accounts": [],
                "data": memo_data("PAY-4f1c")
            }
        ]));

        let parser = SolanaParser::new(false);
        let parsed = parser
            .parse("5VfYt1", &raw, &WalletAddress::new(WALLET))
            .unwrap()
            .unwrap();

        assert_eq!(parsed.amount_base_units, 100_000_000);
        assert_eq!(parsed.decimals, 6);
        assert_eq!(parsed.token_mint, MINT);
        assert_eq!(parsed.from_address, SENDER);
        assert_eq!(parsed.memo.as_deref(), Some("PAY-4f1c"));
        assert_eq!(parsed.block_height, Some(250_000_000));
    }

    #[test]
    fn test_plain_transfer_infers_mint_from_balances() {
        let raw = base_tx(json!([
            {
                "programIdIndex": 4,
                // source, destination, authority
                "accounts": [1, 3, 0],
                "data": transfer_data(42_000_000)
            }
        ]));

        let parser = SolanaParser::new(false);
        let parsed = parser
            .parse("5VfYt1", &raw, &WalletAddress::new(WALLET))
            .unwrap()
            .unwrap();

        assert_eq!(parsed.amount_base_units, 42_000_000);
        assert_eq!(parsed.token_mint, MINT);
        assert_eq!(parsed.decimals, 6);
        assert!(parsed.memo.is_none());
    }

    #[test]
    fn test_transfer_to_other_wallet_ignored() {
        let raw = base_tx(json!([
            {
                "programIdIndex": 4,
                "accounts": [1, 2, 3, 0],
                "data": transfer_checked_data(100_000_000, 6)
            }
        ]));

        let parser = SolanaParser::new(false);
        let parsed = parser
            .parse("5VfYt1", &raw, &WalletAddress::new("somebody-else"))
            .unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_token_account_mode_matches_destination_account() {
        let raw = base_tx(json!([
            {
                "programIdIndex": 4,
                "accounts": [1, 2, 3, 0],
                "data": transfer_checked_data(7, 6)
            }
        ]));

        // The monitored wallet IS the destination token account
        let parser = SolanaParser::new(true);
        let parsed = parser
            .parse("5VfYt1", &raw, &WalletAddress::new(TOKEN_ACCOUNT))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.amount_base_units, 7);
    }

    #[test]
    fn test_failed_transaction_skipped() {
        let mut raw = base_tx(json!([]));
        raw["meta"]["err"] = json!({ "InstructionError": [0, "Custom"] });

        let parser = SolanaParser::new(false);
        assert!(parser
            .parse("5VfYt1", &raw, &WalletAddress::new(WALLET))
            .unwrap()
            .is_none());
    }
}
