use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::{ReconciliationLog, WalletBalanceSnapshot};
use crate::domain::error::{LedgerError, MonitorError};
use crate::domain::repository::{ReconciliationRepository, SnapshotRepository};
use crate::infrastructure::persistence::models::{
    ReconciliationLogModel, WalletBalanceSnapshotModel,
};

/// Repositorio de snapshots de saldo para PostgreSQL.
pub struct PostgresSnapshotRepository {
    pool: PgPool,
}

impl PostgresSnapshotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotRepository for PostgresSnapshotRepository {
    async fn insert(
        &self,
        snapshot: WalletBalanceSnapshot,
    ) -> Result<WalletBalanceSnapshot, MonitorError> {
        let model = sqlx::query_as::<_, WalletBalanceSnapshotModel>(
            r#"
            INSERT INTO wallet_balance_snapshots (
                id, chain, wallet_address, native_balance, token_balances,
                is_below_min_threshold, is_above_max_threshold, alert_sent, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(snapshot.id)
        .bind(snapshot.chain.as_str())
        .bind(snapshot.wallet_address.as_str())
        .bind(snapshot.native_balance)
        .bind(&snapshot.token_balances)
        .bind(snapshot.is_below_min_threshold)
        .bind(snapshot.is_above_max_threshold)
        .bind(snapshot.alert_sent)
        .bind(snapshot.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MonitorError::RepositoryError(e.to_string()))?;

        WalletBalanceSnapshot::try_from(model).map_err(MonitorError::RepositoryError)
    }

    async fn mark_alert_sent(&self, id: Uuid) -> Result<(), MonitorError> {
        sqlx::query(r#"UPDATE wallet_balance_snapshots SET alert_sent = TRUE WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| MonitorError::RepositoryError(e.to_string()))?;
        Ok(())
    }
}

/// Repositorio del registro de conciliación para PostgreSQL.
pub struct PostgresReconciliationRepository {
    pool: PgPool,
}

impl PostgresReconciliationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReconciliationRepository for PostgresReconciliationRepository {
    async fn insert(&self, log: ReconciliationLog) -> Result<ReconciliationLog, LedgerError> {
        let model = sqlx::query_as::<_, ReconciliationLogModel>(
            r#"
            INSERT INTO reconciliation_logs (
                id, token, ledger_balance, observed_balance, delta, alerted, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(log.id)
        .bind(log.token.as_str())
        .bind(log.ledger_balance)
        .bind(log.observed_balance)
        .bind(log.delta)
        .bind(log.alerted)
        .bind(log.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::RepositoryError(e.to_string()))?;

        ReconciliationLog::try_from(model).map_err(LedgerError::RepositoryError)
    }
}
