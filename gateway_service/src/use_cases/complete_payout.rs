use std::sync::Arc;

use crate::domain::entities::{Payout, PayoutStatus};
use crate::domain::error::PayoutError;
use crate::domain::gateways::SettlementWallet;
use crate::domain::ledger::PostingGroup;
use crate::domain::repository::PayoutRepository;
use crate::domain::types::{LedgerGroupId, PayoutId};

/// Caso de uso: cerrar un retiro aprobado.
///
/// Delega la emisión firmada a la billetera de liquidación (el núcleo no
/// custodia llaves) y, con el hash en mano, postea el grupo de cierre
/// que limpia `available` del comercio en la misma transacción que el
/// cambio de estado.
pub struct CompletePayoutUseCase {
    payout_repo: Arc<dyn PayoutRepository>,
    settlement: Arc<dyn SettlementWallet>,
}

impl CompletePayoutUseCase {
    pub fn new(
        payout_repo: Arc<dyn PayoutRepository>,
        settlement: Arc<dyn SettlementWallet>,
    ) -> Self {
        Self {
            payout_repo,
            settlement,
        }
    }

    #[tracing::instrument(name = "CompletePayoutUseCase::execute", skip(self))]
    pub async fn execute(&self, payout_id: PayoutId) -> Result<Payout, PayoutError> {
        let payout = self
            .payout_repo
            .find_by_id(payout_id)
            .await?
            .ok_or(PayoutError::NotFound(payout_id))?;

        if payout.status != PayoutStatus::APPROVED {
            return Err(PayoutError::InvalidState(payout_id));
        }

        let tx_hash = self.settlement.submit_transfer(&payout).await?;

        let group = PostingGroup::payout(
            LedgerGroupId::new(),
            payout.id,
            payout.merchant_id,
            payout.amount_vnd,
        )?;

        self.payout_repo
            .complete_with_ledger(payout.id, group, Some(tx_hash))
            .await
    }
}
