use std::collections::HashMap;

use async_trait::async_trait;
use common::TokenSymbol;
use rust_decimal::Decimal;

use crate::domain::error::PaymentError;
use crate::domain::gateways::RateSource;

/// Fuente de tasas fija, cargada de configuración.
///
/// Los feeds de mercado quedan fuera del núcleo; en despliegues reales
/// esta implementación se sustituye detrás del mismo port.
pub struct FixedRateSource {
    rates: HashMap<TokenSymbol, Decimal>,
}

impl FixedRateSource {
    pub fn new(rates: HashMap<TokenSymbol, Decimal>) -> Self {
        Self { rates }
    }
}

#[async_trait]
impl RateSource for FixedRateSource {
    async fn lock_rate(&self, token: &TokenSymbol) -> Result<Decimal, PaymentError> {
        self.rates
            .get(token)
            .copied()
            .ok_or_else(|| PaymentError::RateUnavailable(token.to_string()))
    }
}
