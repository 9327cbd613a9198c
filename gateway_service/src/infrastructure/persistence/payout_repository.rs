use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::entities::{Payout, PayoutStatus};
use crate::domain::error::PayoutError;
use crate::domain::ledger::PostingGroup;
use crate::domain::repository::PayoutRepository;
use crate::domain::types::{PayoutId, TxHash};
use crate::infrastructure::persistence::ledger_repository::post_group;
use crate::infrastructure::persistence::models::PayoutModel;

/// Repositorio de retiros para PostgreSQL.
pub struct PostgresPayoutRepository {
    pool: PgPool,
}

impl PostgresPayoutRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PayoutRepository for PostgresPayoutRepository {
    async fn create(&self, payout: Payout) -> Result<Payout, PayoutError> {
        let saved = sqlx::query_as::<_, PayoutModel>(
            r#"
            INSERT INTO payouts (id, merchant_id, amount_vnd, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(payout.id)
        .bind(payout.merchant_id)
        .bind(payout.amount_vnd.minor_units())
        .bind(payout.status)
        .bind(payout.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PayoutError::RepositoryError(e.to_string()))?;

        Ok(saved.into())
    }

    async fn find_by_id(&self, id: PayoutId) -> Result<Option<Payout>, PayoutError> {
        let model = sqlx::query_as::<_, PayoutModel>(r#"SELECT * FROM payouts WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PayoutError::RepositoryError(e.to_string()))?;

        Ok(model.map(Payout::from))
    }

    /// APPROVED→COMPLETED con el grupo de cierre en la misma
    /// transacción; un posteo fallido revierte también el estado.
    async fn complete_with_ledger(
        &self,
        id: PayoutId,
        group: PostingGroup,
        settlement_tx_hash: Option<TxHash>,
    ) -> Result<Payout, PayoutError> {
        let mut txn = self
            .pool
            .begin()
            .await
            .map_err(|e| PayoutError::RepositoryError(e.to_string()))?;

        let current = sqlx::query_as::<_, PayoutModel>(
            r#"SELECT * FROM payouts WHERE id = $1 FOR UPDATE"#,
        )
        .bind(id)
        .fetch_optional(&mut *txn)
        .await
        .map_err(|e| PayoutError::RepositoryError(e.to_string()))?
        .ok_or(PayoutError::NotFound(id))?;

        if current.status != PayoutStatus::APPROVED {
            return Err(PayoutError::InvalidState(id));
        }

        post_group(&mut txn, &group).await?;

        let model = sqlx::query_as::<_, PayoutModel>(
            r#"
            UPDATE payouts
            SET status = 'COMPLETED',
                ledger_group_id = $2,
                settlement_tx_hash = $3,
                completed_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(group.id())
        .bind(settlement_tx_hash.as_ref().map(|h| h.as_str()))
        .fetch_one(&mut *txn)
        .await
        .map_err(|e| PayoutError::RepositoryError(e.to_string()))?;

        txn.commit()
            .await
            .map_err(|e| PayoutError::RepositoryError(e.to_string()))?;

        Ok(model.into())
    }
}
