use async_trait::async_trait;
use tracing::warn;

use crate::domain::entities::QueueJob;
use crate::jobs::balance_monitor::JOB_TYPE_BALANCE_ALERT;
use crate::jobs::reconciliation::JOB_TYPE_RECONCILIATION_ALERT;
use crate::jobs::worker_pool::{JobFailure, JobHandler};

/// Handler de alertas operativas.
///
/// Los canales de notificación (email/SMS) viven fuera del núcleo; aquí
/// la alerta se registra de forma prominente y el trabajo se consume.
pub struct BalanceAlertHandler;

#[async_trait]
impl JobHandler for BalanceAlertHandler {
    fn job_type(&self) -> &'static str {
        JOB_TYPE_BALANCE_ALERT
    }

    async fn handle(&self, job: &QueueJob) -> Result<(), JobFailure> {
        warn!("WALLET BALANCE ALERT: {}", job.payload);
        Ok(())
    }
}

pub struct ReconciliationAlertHandler;

#[async_trait]
impl JobHandler for ReconciliationAlertHandler {
    fn job_type(&self) -> &'static str {
        JOB_TYPE_RECONCILIATION_ALERT
    }

    async fn handle(&self, job: &QueueJob) -> Result<(), JobFailure> {
        warn!("RECONCILIATION ALERT: {}", job.payload);
        Ok(())
    }
}
