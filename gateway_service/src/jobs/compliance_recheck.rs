use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::domain::entities::QueueJob;
use crate::domain::repository::BlockchainTxRepository;
use crate::jobs::worker_pool::{JobFailure, JobHandler};
use crate::use_cases::match_transaction::MatchTransactionUseCase;
use crate::use_cases::payment_engine::JOB_TYPE_COMPLIANCE_RECHECK;

/// Handler que reintenta observaciones retenidas por veredicto REVIEW.
///
/// Recarga la transferencia y vuelve a pasarla por el matcher; si el
/// veredicto sigue en REVIEW, el motor encola otro recheck y este
/// trabajo termina bien (el backoff vive en el nuevo trabajo).
pub struct ComplianceRecheckHandler {
    blockchain_tx_repo: Arc<dyn BlockchainTxRepository>,
    matcher: Arc<MatchTransactionUseCase>,
}

impl ComplianceRecheckHandler {
    pub fn new(
        blockchain_tx_repo: Arc<dyn BlockchainTxRepository>,
        matcher: Arc<MatchTransactionUseCase>,
    ) -> Self {
        Self {
            blockchain_tx_repo,
            matcher,
        }
    }
}

#[async_trait]
impl JobHandler for ComplianceRecheckHandler {
    fn job_type(&self) -> &'static str {
        JOB_TYPE_COMPLIANCE_RECHECK
    }

    async fn handle(&self, job: &QueueJob) -> Result<(), JobFailure> {
        let tx_id = job.payload["blockchain_tx_id"]
            .as_str()
            .and_then(|id| Uuid::from_str(id).ok())
            .ok_or_else(|| JobFailure("payload missing blockchain_tx_id".to_string()))?;

        let tx = self
            .blockchain_tx_repo
            .find_by_id(tx_id)
            .await
            .map_err(|e| JobFailure(e.to_string()))?
            .ok_or_else(|| JobFailure(format!("unknown blockchain tx {}", tx_id)))?;

        if tx.is_matched {
            // Another observer already resolved it
            return Ok(());
        }

        info!("Rechecking held observation {}", tx.tx_hash);
        self.matcher
            .execute(tx)
            .await
            .map(|_| ())
            .map_err(|e| JobFailure(e.to_string()))
    }
}
