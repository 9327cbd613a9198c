use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefijo legible de toda referencia de pago generada por el gateway.
pub const REFERENCE_PREFIX: &str = "PAY-";

/// Prefijo opcional que algunos pagadores anteponen en el memo.
const MEMO_PREFIX: &str = "PAYMENT:";

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid payment reference: {0}")]
pub struct ReferenceParseError(String);

/// Referencia de pago: la llave de correlación entre una factura y la
/// transferencia on-chain que la paga.
///
/// Se genera con 128 bits de aleatoriedad bajo un prefijo legible, por
/// lo que la probabilidad de colisión es despreciable; un índice único
/// en base de datos la resguarda de todas formas.
///
/// # Examples
/// ```
/// use common::reference::PaymentReference;
///
/// let reference = PaymentReference::generate();
/// assert!(reference.as_str().starts_with("PAY-"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentReference(String);

impl PaymentReference {
    /// Genera una referencia nueva: `PAY-` + 128 bits en hexadecimal.
    pub fn generate() -> Self {
        let raw: u128 = rand::random();
        Self(format!("{}{:032x}", REFERENCE_PREFIX, raw))
    }

    /// Valida y normaliza una referencia recibida (memo o persistencia).
    pub fn parse(raw: &str) -> Result<Self, ReferenceParseError> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix(REFERENCE_PREFIX)
            .ok_or_else(|| ReferenceParseError(trimmed.to_string()))?;
        let valid_len = (4..=32).contains(&body.len());
        let valid_chars = body.chars().all(|c| c.is_ascii_hexdigit());
        if !valid_len || !valid_chars {
            return Err(ReferenceParseError(trimmed.to_string()));
        }
        Ok(Self(format!(
            "{}{}",
            REFERENCE_PREFIX,
            body.to_ascii_lowercase()
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Política de extracción de referencias desde el memo on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoPolicy {
    /// Acepta el memo con o sin el prefijo `PAYMENT:`.
    #[default]
    Permissive,
    /// Exige el prefijo `PAYMENT:` antes de la referencia.
    StrictPrefix,
}

impl MemoPolicy {
    /// Extrae una referencia válida del payload de memo, si existe.
    pub fn extract(&self, memo: &str) -> Option<PaymentReference> {
        let trimmed = memo.trim();
        match (self, trimmed.strip_prefix(MEMO_PREFIX)) {
            (_, Some(rest)) => PaymentReference::parse(rest).ok(),
            (MemoPolicy::Permissive, None) => PaymentReference::parse(trimmed).ok(),
            (MemoPolicy::StrictPrefix, None) => None,
        }
    }
}
