use std::fmt;

use rust_decimal::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Amount must be positive")]
    NonPositive,

    #[error("Arithmetic overflow")]
    Overflow,

    #[error("Exchange rate must be positive")]
    InvalidRate,

    #[error("Amount has more precision than the token supports: {0}")]
    ExcessPrecision(Decimal),

    #[error("Invalid token symbol: {0}")]
    InvalidSymbol(String),
}

/// Monto en Dong vietnamita (VND), en unidades menores enteras.
///
/// El VND no tiene subunidad en circulación, por lo que la unidad menor
/// es el dong entero. Nunca se representa con punto flotante binario.
///
/// # Examples
/// ```
/// use common::money::VndAmount;
///
/// let amount = VndAmount::new(2_300_000).unwrap();
/// let (net, fee) = amount.split_fee_bps(100).unwrap();
/// assert_eq!(net.minor_units(), 2_277_000);
/// assert_eq!(fee.minor_units(), 23_000);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct VndAmount(i64);

impl VndAmount {
    /// Crea un monto validando que sea estrictamente positivo.
    pub fn new(minor_units: i64) -> Result<Self, MoneyError> {
        if minor_units <= 0 {
            return Err(MoneyError::NonPositive);
        }
        Ok(Self(minor_units))
    }

    /// Reconstruye un monto persistido (acepta cero, p.ej. comisiones nulas).
    pub fn from_minor_units(minor_units: i64) -> Self {
        Self(minor_units)
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }

    pub fn to_decimal(&self) -> Decimal {
        Decimal::from(self.0)
    }

    pub fn checked_add(&self, other: VndAmount) -> Result<VndAmount, MoneyError> {
        self.0
            .checked_add(other.0)
            .map(VndAmount)
            .ok_or(MoneyError::Overflow)
    }

    pub fn checked_sub(&self, other: VndAmount) -> Result<VndAmount, MoneyError> {
        self.0
            .checked_sub(other.0)
            .map(VndAmount)
            .ok_or(MoneyError::Overflow)
    }

    /// Separa la comisión expresada en basis points (1 bp = 0.01%).
    ///
    /// Retorna `(neto, comision)`. La comisión se trunca hacia abajo; el
    /// neto absorbe el residuo para que `neto + comision == total`.
    pub fn split_fee_bps(&self, fee_bps: u32) -> Result<(VndAmount, VndAmount), MoneyError> {
        let fee = (self.0 as i128)
            .checked_mul(fee_bps as i128)
            .ok_or(MoneyError::Overflow)?
            / 10_000;
        let fee = i64::try_from(fee).map_err(|_| MoneyError::Overflow)?;
        let net = self.0.checked_sub(fee).ok_or(MoneyError::Overflow)?;
        Ok((VndAmount(net), VndAmount(fee)))
    }
}

impl fmt::Display for VndAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} VND", self.0)
    }
}

/// Símbolo de token estable (p.ej. "USDT"), normalizado a mayúsculas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSymbol(String);

impl TokenSymbol {
    pub fn new(symbol: impl AsRef<str>) -> Result<Self, MoneyError> {
        let symbol = symbol.as_ref().trim().to_ascii_uppercase();
        if symbol.is_empty() || symbol.len() > 12 || !symbol.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(MoneyError::InvalidSymbol(symbol));
        }
        Ok(Self(symbol))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monto de token en unidades base enteras con precisión explícita.
///
/// Las unidades base son la menor denominación nativa del token
/// (p.ej. 1 USDT en Solana = 1_000_000 unidades base con 6 decimales).
/// Se usa `u128` porque los tokens BEP-20 manejan 18 decimales y
/// desbordan `u64` con montos cotidianos.
///
/// # Examples
/// ```
/// use common::money::TokenAmount;
/// use rust_decimal::Decimal;
///
/// let amount = TokenAmount::from_base_units(100_000_000, 6);
/// assert_eq!(amount.to_decimal(), Decimal::from(100));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenAmount {
    base_units: u128,
    decimals: u8,
}

impl TokenAmount {
    pub fn from_base_units(base_units: u128, decimals: u8) -> Self {
        Self {
            base_units,
            decimals,
        }
    }

    /// Convierte un monto en unidades de token (p.ej. `100.5` USDT) a
    /// unidades base, rechazando precisión excedente.
    pub fn from_token_units(units: Decimal, decimals: u8) -> Result<Self, MoneyError> {
        if units <= Decimal::ZERO {
            return Err(MoneyError::NonPositive);
        }
        let scaled = units
            .checked_mul(Decimal::from(10u128.pow(decimals as u32)))
            .ok_or(MoneyError::Overflow)?;
        if scaled.fract() != Decimal::ZERO {
            return Err(MoneyError::ExcessPrecision(units));
        }
        let base_units = scaled.to_u128().ok_or(MoneyError::Overflow)?;
        Ok(Self {
            base_units,
            decimals,
        })
    }

    pub fn base_units(&self) -> u128 {
        self.base_units
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Valor en unidades de token como decimal exacto.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::from_u128(self.base_units)
            .map(|d| d / Decimal::from(10u128.pow(self.decimals as u32)))
            .unwrap_or(Decimal::MAX)
    }

    /// Unidades base como decimal integral (para persistencia NUMERIC).
    pub fn base_units_decimal(&self) -> Decimal {
        Decimal::from_u128(self.base_units).unwrap_or(Decimal::MAX)
    }

    pub fn checked_add(&self, other: TokenAmount) -> Result<TokenAmount, MoneyError> {
        if self.decimals != other.decimals {
            return Err(MoneyError::ExcessPrecision(other.to_decimal()));
        }
        self.base_units
            .checked_add(other.base_units)
            .map(|base_units| TokenAmount {
                base_units,
                decimals: self.decimals,
            })
            .ok_or(MoneyError::Overflow)
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

/// Calcula el monto de token equivalente a una factura en VND a una tasa
/// bloqueada (`vnd_per_token`), redondeando al alza en la última unidad
/// base para nunca facturar de menos.
pub fn token_amount_for_vnd(
    amount: VndAmount,
    vnd_per_token: Decimal,
    decimals: u8,
) -> Result<TokenAmount, MoneyError> {
    if vnd_per_token <= Decimal::ZERO {
        return Err(MoneyError::InvalidRate);
    }
    if amount.minor_units() <= 0 {
        return Err(MoneyError::NonPositive);
    }
    let units = amount
        .to_decimal()
        .checked_div(vnd_per_token)
        .ok_or(MoneyError::Overflow)?;
    let rounded = units.round_dp_with_strategy(decimals as u32, RoundingStrategy::AwayFromZero);
    TokenAmount::from_token_units(rounded, decimals)
}
