use std::sync::Arc;

use chrono::{Duration, Utc};
use common::TokenSymbol;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::entities::{QueueName, ReconciliationLog};
use crate::domain::ledger::LedgerAccount;
use crate::domain::repository::{
    BlockchainTxRepository, Ledger, NewQueueJob, QueueJobRepository, ReconciliationRepository,
};

/// Tipo de trabajo de alerta de conciliación.
pub const JOB_TYPE_RECONCILIATION_ALERT: &str = "reconciliation.alert";

/// Tipo de trabajo de la corrida diaria (cola `reports`).
pub const JOB_TYPE_RECONCILIATION_RUN: &str = "reconciliation.run";

/// Job diario de conciliación.
///
/// Compara la suma on-chain finalizada por token contra el saldo
/// contable de `crypto_pool`, escribe el registro y alerta ante
/// cualquier delta distinto de cero. También verifica que la proyección
/// materializada coincida con el diario del último día; una
/// discrepancia ahí es una invariante fatal y se reporta como crítica.
pub struct ReconciliationJob {
    tokens: Vec<TokenSymbol>,
    blockchain_tx_repo: Arc<dyn BlockchainTxRepository>,
    ledger: Arc<dyn Ledger>,
    reconciliation_repo: Arc<dyn ReconciliationRepository>,
    queue_repo: Arc<dyn QueueJobRepository>,
}

impl ReconciliationJob {
    pub fn new(
        tokens: Vec<TokenSymbol>,
        blockchain_tx_repo: Arc<dyn BlockchainTxRepository>,
        ledger: Arc<dyn Ledger>,
        reconciliation_repo: Arc<dyn ReconciliationRepository>,
        queue_repo: Arc<dyn QueueJobRepository>,
    ) -> Self {
        Self {
            tokens,
            blockchain_tx_repo,
            ledger,
            reconciliation_repo,
            queue_repo,
        }
    }

    pub async fn run(&self) {
        for token in &self.tokens {
            if let Err(e) = self.reconcile_token(token).await {
                error!("Reconciliation failed for {}: {}", token, e);
            }
        }
        self.verify_projection().await;
    }
}

#[async_trait::async_trait]
impl crate::jobs::worker_pool::JobHandler for ReconciliationJob {
    fn job_type(&self) -> &'static str {
        JOB_TYPE_RECONCILIATION_RUN
    }

    async fn handle(
        &self,
        _job: &crate::domain::entities::QueueJob,
    ) -> Result<(), crate::jobs::worker_pool::JobFailure> {
        self.run().await;
        Ok(())
    }
}

impl ReconciliationJob {
    async fn reconcile_token(&self, token: &TokenSymbol) -> Result<(), String> {
        let observed = self
            .blockchain_tx_repo
            .sum_finalized_base_units(token)
            .await
            .map_err(|e| e.to_string())?;

        // Balances store credits - debits; crypto_pool is debit-normal,
        // so its holdings are the negated stored balance.
        let stored = self
            .ledger
            .account_balance(&LedgerAccount::CryptoPool, token.as_str())
            .await
            .map_err(|e| e.to_string())?;
        let ledger_balance = -stored;

        let delta = observed - ledger_balance;
        let alerted = delta != Decimal::ZERO;

        let log = self
            .reconciliation_repo
            .insert(ReconciliationLog {
                id: Uuid::new_v4(),
                token: token.clone(),
                ledger_balance,
                observed_balance: observed,
                delta,
                alerted,
                created_at: Utc::now(),
            })
            .await
            .map_err(|e| e.to_string())?;

        if alerted {
            warn!(
                "Reconciliation delta for {}: observed {} vs ledger {}",
                token, observed, ledger_balance
            );
            self.queue_repo
                .enqueue(NewQueueJob {
                    queue: QueueName::MONITORING,
                    job_type: JOB_TYPE_RECONCILIATION_ALERT.to_string(),
                    payload: json!({
                        "reconciliation_id": log.id,
                        "token": token,
                        "delta": delta.to_string(),
                    }),
                    max_attempts: 3,
                    not_before: Utc::now(),
                })
                .await
                .map_err(|e| e.to_string())?;
        } else {
            info!("Reconciliation clean for {}: {}", token, observed);
        }

        Ok(())
    }

    /// Proyección vs diario: nunca debe divergir.
    async fn verify_projection(&self) {
        let to = Utc::now();
        let from = to - Duration::days(1);
        match self.ledger.reconcile(from, to).await {
            Ok(deltas) if deltas.is_empty() => {}
            Ok(deltas) => {
                for delta in deltas {
                    error!(
                        "FATAL: balance projection drift on {} {}: stored {} vs computed {}",
                        delta.account_key, delta.currency, delta.stored, delta.computed
                    );
                }
            }
            Err(e) => error!("Projection verification failed: {}", e),
        }
    }
}
