pub mod bsc;
pub mod compliance;
pub mod rate_source;
pub mod settlement;
pub mod solana;
pub mod tron;
pub mod webhook_transport;

use common::Chain;
use serde_json::{json, Value};

use crate::domain::error::IngestError;

/// Llamada JSON-RPC 2.0 compartida por los clientes de Solana y BSC.
pub(crate) async fn json_rpc(
    http: &reqwest::Client,
    url: &str,
    chain: Chain,
    method: &str,
    params: Value,
) -> Result<Value, IngestError> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });

    let response = http
        .post(url)
        .json(&body)
        .send()
        .await
        .map_err(|e| IngestError::Rpc {
            chain,
            message: format!("{}: {}", method, e),
        })?;

    let payload: Value = response.json().await.map_err(|e| IngestError::Rpc {
        chain,
        message: format!("{}: invalid JSON response: {}", method, e),
    })?;

    if let Some(error) = payload.get("error") {
        if !error.is_null() {
            return Err(IngestError::Rpc {
                chain,
                message: format!("{}: {}", method, error),
            });
        }
    }

    Ok(payload.get("result").cloned().unwrap_or(Value::Null))
}

/// Decodifica un entero hex `0x...` de las respuestas EVM.
pub(crate) fn hex_to_u128(value: &Value) -> Option<u128> {
    let raw = value.as_str()?.trim_start_matches("0x");
    if raw.is_empty() {
        return Some(0);
    }
    u128::from_str_radix(raw, 16).ok()
}
