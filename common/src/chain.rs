use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("Unknown chain: {0}")]
pub struct ChainParseError(String);

/// Cadenas soportadas por el gateway.
///
/// Cada variante conoce su profundidad de finalidad por defecto; los
/// valores pueden sobreescribirse por configuración (`FINALITY_<CHAIN>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Solana,
    Bsc,
    Tron,
}

impl Chain {
    pub const ALL: [Chain; 3] = [Chain::Solana, Chain::Bsc, Chain::Tron];

    /// Confirmaciones mínimas para tratar una transacción como irreversible.
    pub fn default_finality_threshold(&self) -> u32 {
        match self {
            // Solana: commitment `finalized` (~32 slots)
            Chain::Solana => 32,
            Chain::Bsc => 15,
            Chain::Tron => 19,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Solana => "solana",
            Chain::Bsc => "bsc",
            Chain::Tron => "tron",
        }
    }

    /// Sufijo usado en variables de entorno (`SOLANA_RPC_URL`, etc.).
    pub fn env_suffix(&self) -> &'static str {
        match self {
            Chain::Solana => "SOLANA",
            Chain::Bsc => "BSC",
            Chain::Tron => "TRON",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = ChainParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "solana" => Ok(Chain::Solana),
            "bsc" => Ok(Chain::Bsc),
            "tron" => Ok(Chain::Tron),
            other => Err(ChainParseError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_roundtrip() {
        for chain in Chain::ALL {
            assert_eq!(chain.as_str().parse::<Chain>().unwrap(), chain);
        }
    }

    #[test]
    fn test_finality_thresholds() {
        assert_eq!(Chain::Solana.default_finality_threshold(), 32);
        assert_eq!(Chain::Bsc.default_finality_threshold(), 15);
        assert_eq!(Chain::Tron.default_finality_threshold(), 19);
    }

    #[test]
    fn test_unknown_chain_rejected() {
        assert!("ethereum".parse::<Chain>().is_err());
    }
}
