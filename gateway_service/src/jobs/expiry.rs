use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::domain::entities::QueueJob;
use crate::jobs::worker_pool::{JobFailure, JobHandler};
use crate::use_cases::expire_payments::ExpirePaymentsUseCase;

/// Tipo de trabajo del barrido de expiración (cola `periodic`).
pub const JOB_TYPE_EXPIRY_SWEEP: &str = "expiry.sweep";

/// Handler del barrido de facturas PENDING vencidas.
///
/// El scheduler encola un tick por minuto; el reclamo con locks de fila
/// permite varias instancias en paralelo sin expirar dos veces el mismo
/// pago. Un barrido fallido simplemente reintenta con el próximo tick.
pub struct ExpirySweeperJob {
    use_case: Arc<ExpirePaymentsUseCase>,
}

impl ExpirySweeperJob {
    pub fn new(use_case: Arc<ExpirePaymentsUseCase>) -> Self {
        Self { use_case }
    }
}

#[async_trait]
impl JobHandler for ExpirySweeperJob {
    fn job_type(&self) -> &'static str {
        JOB_TYPE_EXPIRY_SWEEP
    }

    async fn handle(&self, _job: &QueueJob) -> Result<(), JobFailure> {
        let count = self
            .use_case
            .execute(Utc::now())
            .await
            .map_err(|e| JobFailure(e.to_string()))?;
        if count > 0 {
            info!("Expiry sweep transitioned {} payments", count);
        }
        Ok(())
    }
}
