use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::domain::entities::QueueJob;
use crate::domain::error::PayoutError;
use crate::domain::types::PayoutId;
use crate::jobs::worker_pool::{JobFailure, JobHandler};
use crate::use_cases::complete_payout::CompletePayoutUseCase;

/// Tipo de trabajo que cierra un retiro ya aprobado.
pub const JOB_TYPE_PAYOUT_COMPLETE: &str = "payout.complete";

/// Handler de cierre de retiros.
///
/// La aprobación ocurre fuera del núcleo; el flujo externo encola este
/// trabajo y aquí se emite la transferencia y se postea el grupo de
/// cierre. Un retiro ya cerrado por otra pasada se consume sin error.
pub struct PayoutCompletionHandler {
    use_case: Arc<CompletePayoutUseCase>,
}

impl PayoutCompletionHandler {
    pub fn new(use_case: Arc<CompletePayoutUseCase>) -> Self {
        Self { use_case }
    }
}

#[async_trait]
impl JobHandler for PayoutCompletionHandler {
    fn job_type(&self) -> &'static str {
        JOB_TYPE_PAYOUT_COMPLETE
    }

    async fn handle(&self, job: &QueueJob) -> Result<(), JobFailure> {
        let payout_id = job.payload["payout_id"]
            .as_str()
            .and_then(|id| Uuid::from_str(id).ok())
            .map(PayoutId)
            .ok_or_else(|| JobFailure("payload missing payout_id".to_string()))?;

        match self.use_case.execute(payout_id).await {
            Ok(payout) => {
                info!("Payout {} completed", payout.id);
                Ok(())
            }
            // Idempotency under redelivery: already past APPROVED
            Err(PayoutError::InvalidState(_)) => Ok(()),
            Err(e) => Err(JobFailure(e.to_string())),
        }
    }
}
