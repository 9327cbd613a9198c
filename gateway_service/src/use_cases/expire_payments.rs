use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::error::PaymentError;
use crate::domain::gateways::{StatusFanout, StatusUpdate};
use crate::domain::repository::PaymentRepository;

/// Caso de uso: barrido determinista de expiración.
///
/// Reclama un lote acotado de pagos `PENDING` con `expires_at` vencido y
/// los transiciona a EXPIRED; los webhooks `payment.expired` quedan
/// encolados en la misma transacción del reclamo. El barrido usa locks
/// de fila, por lo que varias instancias pueden correrlo en paralelo sin
/// expirar dos veces el mismo pago.
pub struct ExpirePaymentsUseCase {
    payment_repo: Arc<dyn PaymentRepository>,
    fanout: Arc<dyn StatusFanout>,
    batch_size: i64,
}

impl ExpirePaymentsUseCase {
    pub fn new(
        payment_repo: Arc<dyn PaymentRepository>,
        fanout: Arc<dyn StatusFanout>,
        batch_size: i64,
    ) -> Self {
        Self {
            payment_repo,
            fanout,
            batch_size,
        }
    }

    #[tracing::instrument(name = "ExpirePaymentsUseCase::execute", skip(self))]
    pub async fn execute(&self, now: DateTime<Utc>) -> Result<usize, PaymentError> {
        let expired = self.payment_repo.claim_expired(now, self.batch_size).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        info!("Expired {} overdue payments", expired.len());
        for payment in &expired {
            let update = StatusUpdate {
                payment_id: payment.id,
                status: payment.status,
                tx_hash: None,
                timestamp: now,
            };
            if let Err(e) = self.fanout.publish(&update).await {
                warn!("Failed to publish expiry for {}: {}", payment.id, e);
            }
        }
        Ok(expired.len())
    }
}
