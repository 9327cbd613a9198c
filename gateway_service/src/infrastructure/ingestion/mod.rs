pub mod dedup;
pub mod parser;
pub mod pipeline;

use std::collections::HashMap;

use common::{Chain, TokenSymbol};
use serde_json::Value;

use crate::domain::error::IngestError;
use crate::domain::types::WalletAddress;

/// Transferencia normalizada producida por un parser de cadena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTransfer {
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    /// Mint (Solana) o dirección de contrato (BSC/TRON); `native` para
    /// la moneda de la cadena.
    pub token_mint: String,
    pub amount_base_units: u128,
    /// Mejor esfuerzo del parser; la lista blanca manda para tokens
    /// conocidos.
    pub decimals: u8,
    pub memo: Option<String>,
    pub block_height: Option<i64>,
}

/// Mint/contrato sintético para transferencias de moneda nativa.
pub const NATIVE_MINT: &str = "native";

// Parser por cadena: de la transacción cruda del RPC a la forma
// normalizada. Se selecciona por tag de cadena al construir el ingestor.
pub trait ChainParser: Send + Sync {
    fn chain(&self) -> Chain;

    /// `None` cuando la transacción no contiene una transferencia
    /// entrante hacia la billetera monitoreada.
    fn parse(
        &self,
        tx_hash: &str,
        raw: &Value,
        wallet: &WalletAddress,
    ) -> Result<Option<ParsedTransfer>, IngestError>;
}

/// Token de la lista blanca con su precisión nativa.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub symbol: TokenSymbol,
    pub decimals: u8,
}

/// Lista blanca de mints/contratos aceptados, por cadena.
///
/// También funciona como caché de decimales: la metadata on-chain se
/// resuelve una vez al configurar el despliegue, no por transacción.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    by_contract: HashMap<(Chain, String), TokenInfo>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, chain: Chain, contract: impl Into<String>, info: TokenInfo) {
        self.by_contract.insert((chain, contract.into()), info);
    }

    pub fn lookup(&self, chain: Chain, contract: &str) -> Option<&TokenInfo> {
        self.by_contract.get(&(chain, contract.to_string()))
    }
}
