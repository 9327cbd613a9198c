use async_trait::async_trait;
use tracing::info;

use crate::domain::entities::Payout;
use crate::domain::error::PayoutError;
use crate::domain::gateways::SettlementWallet;
use crate::domain::types::TxHash;

/// Billetera de liquidación simulada para desarrollo y testing.
///
/// El componente real firma y emite fuera del núcleo; aquí solo se
/// honra el contrato del port.
pub struct FakeSettlementWallet;

impl FakeSettlementWallet {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FakeSettlementWallet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettlementWallet for FakeSettlementWallet {
    async fn submit_transfer(&self, payout: &Payout) -> Result<TxHash, PayoutError> {
        info!(
            " [FakeSettlementWallet] Submitting payout {} for {}",
            payout.id, payout.amount_vnd
        );
        Ok(TxHash::new(format!("fake-settlement-{}", payout.id)))
    }
}
