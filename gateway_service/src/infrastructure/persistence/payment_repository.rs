use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Chain, PaymentReference};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::entities::{
    ComplianceVerdict, Payment, PaymentEvent, PaymentStatus, WebhookEventType,
};
use crate::domain::error::PaymentError;
use crate::domain::ledger::PostingGroup;
use crate::domain::repository::{NewQueueJob, PaymentRepository, TransitionRequest};
use crate::domain::types::{PaymentId, TxHash};
use crate::domain::webhooks::delivery_job;
use crate::infrastructure::persistence::ledger_repository::post_group;
use crate::infrastructure::persistence::models::{PaymentEventModel, PaymentModel};

/// Repositorio de pagos implementado para PostgreSQL.
///
/// Las operaciones compuestas toman un lock de fila (`FOR UPDATE`) sobre
/// el pago y escriben estado, stream de eventos, marca de matching,
/// asiento contable y webhook en una sola transacción: o todo queda
/// persistido o nada.
pub struct PostgresPaymentRepository {
    pool: PgPool,
    webhook_max_attempts: i32,
}

impl PostgresPaymentRepository {
    pub fn new(pool: PgPool, webhook_max_attempts: i32) -> Self {
        Self {
            pool,
            webhook_max_attempts,
        }
    }

    async fn fetch_for_update(
        &self,
        txn: &mut Transaction<'_, Postgres>,
        id: PaymentId,
    ) -> Result<Payment, PaymentError> {
        let model = sqlx::query_as::<_, PaymentModel>(
            r#"SELECT * FROM payments WHERE id = $1 FOR UPDATE"#,
        )
        .bind(id)
        .fetch_optional(&mut **txn)
        .await
        .map_err(|e| PaymentError::RepositoryError(e.to_string()))?
        .ok_or(PaymentError::NotFound(id))?;

        Payment::try_from(model).map_err(PaymentError::RepositoryError)
    }

    async fn apply_status(
        &self,
        txn: &mut Transaction<'_, Postgres>,
        id: PaymentId,
        to: PaymentStatus,
        failure_reason: Option<&str>,
    ) -> Result<Payment, PaymentError> {
        let model = sqlx::query_as::<_, PaymentModel>(
            r#"
            UPDATE payments
            SET status = $2,
                failure_reason = COALESCE($3, failure_reason),
                completed_at = CASE WHEN $2 = 'COMPLETED'::payment_status
                                    THEN now() ELSE completed_at END,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(to)
        .bind(failure_reason)
        .fetch_one(&mut **txn)
        .await
        .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;

        Payment::try_from(model).map_err(PaymentError::RepositoryError)
    }

    async fn insert_event(
        &self,
        txn: &mut Transaction<'_, Postgres>,
        payment_id: PaymentId,
        from_status: Option<PaymentStatus>,
        to_status: PaymentStatus,
        reason: Option<&str>,
    ) -> Result<(), PaymentError> {
        sqlx::query(
            r#"
            INSERT INTO payment_events (id, payment_id, from_status, to_status, reason)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(payment_id)
        .bind(from_status)
        .bind(to_status)
        .bind(reason)
        .execute(&mut **txn)
        .await
        .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;
        Ok(())
    }

    /// Encola el webhook de la transición dentro de la transacción: la
    /// entrega al-menos-una-vez nace del mismo commit que el estado.
    async fn enqueue_webhook(
        &self,
        txn: &mut Transaction<'_, Postgres>,
        payment: &Payment,
        event: WebhookEventType,
    ) -> Result<(), PaymentError> {
        let job = delivery_job(payment, event, self.webhook_max_attempts);
        insert_job(txn, job)
            .await
            .map_err(PaymentError::RepositoryError)
    }

    async fn mark_tx_matched(
        &self,
        txn: &mut Transaction<'_, Postgres>,
        blockchain_tx_id: Uuid,
        payment_id: PaymentId,
    ) -> Result<(), PaymentError> {
        sqlx::query(
            r#"
            UPDATE blockchain_transactions
            SET payment_id = $2,
                is_matched = TRUE,
                matched_at = COALESCE(matched_at, now()),
                unmatched_reason = NULL,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(blockchain_tx_id)
        .bind(payment_id)
        .execute(&mut **txn)
        .await
        .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;
        Ok(())
    }
}

/// Inserta un trabajo en `queue_jobs` dentro de una transacción abierta.
pub(crate) async fn insert_job(
    txn: &mut Transaction<'_, Postgres>,
    job: NewQueueJob,
) -> Result<(), String> {
    sqlx::query(
        r#"
        INSERT INTO queue_jobs (id, queue, job_type, payload, attempt, max_attempts, not_before)
        VALUES ($1, $2, $3, $4, 0, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(job.queue)
    .bind(&job.job_type)
    .bind(&job.payload)
    .bind(job.max_attempts)
    .bind(job.not_before)
    .execute(&mut **txn)
    .await
    .map_err(|e| e.to_string())?;
    Ok(())
}

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
    async fn create(&self, payment: Payment) -> Result<Payment, PaymentError> {
        let model = PaymentModel::from(&payment);
        let mut txn = self
            .pool
            .begin()
            .await
            .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;

        let saved = sqlx::query_as::<_, PaymentModel>(
            r#"
            INSERT INTO payments (
                id, merchant_id, amount_vnd, crypto_amount_base_units, crypto_amount_decimals,
                token, chain, wallet_address, reference, locked_rate, status, order_id,
                created_at, updated_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING *
            "#,
        )
        .bind(model.id)
        .bind(model.merchant_id)
        .bind(model.amount_vnd)
        .bind(model.crypto_amount_base_units)
        .bind(model.crypto_amount_decimals)
        .bind(&model.token)
        .bind(&model.chain)
        .bind(&model.wallet_address)
        .bind(&model.reference)
        .bind(model.locked_rate)
        .bind(model.status)
        .bind(&model.order_id)
        .bind(model.created_at)
        .bind(model.updated_at)
        .bind(model.expires_at)
        .fetch_one(&mut *txn)
        .await
        .map_err(|e| {
            if e.to_string().contains("idx_payments_reference") {
                // 128-bit references colliding is storage corruption in
                // practice; surface it loudly.
                PaymentError::ValidationError("Payment reference collision".to_string())
            } else {
                PaymentError::RepositoryError(e.to_string())
            }
        })?;

        self.insert_event(&mut txn, payment.id, None, PaymentStatus::CREATED, None)
            .await?;

        txn.commit()
            .await
            .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;

        Payment::try_from(saved).map_err(PaymentError::RepositoryError)
    }

    async fn find_by_id(&self, id: PaymentId) -> Result<Option<Payment>, PaymentError> {
        let model = sqlx::query_as::<_, PaymentModel>(r#"SELECT * FROM payments WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;

        model
            .map(|m| Payment::try_from(m).map_err(PaymentError::RepositoryError))
            .transpose()
    }

    async fn find_by_reference(
        &self,
        chain: Chain,
        reference: &PaymentReference,
    ) -> Result<Option<Payment>, PaymentError> {
        let model = sqlx::query_as::<_, PaymentModel>(
            r#"SELECT * FROM payments WHERE chain = $1 AND reference = $2"#,
        )
        .bind(chain.as_str())
        .bind(reference.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;

        model
            .map(|m| Payment::try_from(m).map_err(PaymentError::RepositoryError))
            .transpose()
    }

    async fn transition(
        &self,
        id: PaymentId,
        expected: PaymentStatus,
        request: TransitionRequest,
        webhook: Option<WebhookEventType>,
    ) -> Result<Payment, PaymentError> {
        let mut txn = self
            .pool
            .begin()
            .await
            .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;

        let current = self.fetch_for_update(&mut txn, id).await?;
        if current.status != expected {
            return Err(PaymentError::ConflictingState {
                expected,
                actual: current.status,
            });
        }
        if !expected.can_transition_to(request.to) {
            return Err(PaymentError::InvalidTransition {
                from: expected,
                to: request.to,
            });
        }

        let updated = self
            .apply_status(&mut txn, id, request.to, request.reason.as_deref())
            .await?;
        self.insert_event(
            &mut txn,
            id,
            Some(expected),
            request.to,
            request.reason.as_deref(),
        )
        .await?;
        if let Some(event) = webhook {
            self.enqueue_webhook(&mut txn, &updated, event).await?;
        }

        txn.commit()
            .await
            .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;
        Ok(updated)
    }

    async fn bind_transaction(
        &self,
        id: PaymentId,
        blockchain_tx_id: Uuid,
        tx_hash: &TxHash,
        block_height: Option<i64>,
        verdict: ComplianceVerdict,
        webhook: Option<WebhookEventType>,
    ) -> Result<Payment, PaymentError> {
        let mut txn = self
            .pool
            .begin()
            .await
            .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;

        let current = self.fetch_for_update(&mut txn, id).await?;
        if current.status != PaymentStatus::PENDING {
            return Err(PaymentError::ConflictingState {
                expected: PaymentStatus::PENDING,
                actual: current.status,
            });
        }
        if let Some(bound) = &current.tx_hash {
            if bound != tx_hash {
                return Err(PaymentError::AlreadyBound(id));
            }
        }

        let model = sqlx::query_as::<_, PaymentModel>(
            r#"
            UPDATE payments
            SET status = 'CONFIRMING',
                tx_hash = $2,
                block_height = $3,
                compliance_verdict = $4,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tx_hash.as_str())
        .bind(block_height)
        .bind(verdict)
        .fetch_one(&mut *txn)
        .await
        .map_err(|e| {
            // Unique index: no two payments bind the same transaction.
            if e.to_string().contains("idx_payments_tx_hash") {
                PaymentError::AlreadyBound(id)
            } else {
                PaymentError::RepositoryError(e.to_string())
            }
        })?;
        let updated = Payment::try_from(model).map_err(PaymentError::RepositoryError)?;

        self.insert_event(
            &mut txn,
            id,
            Some(PaymentStatus::PENDING),
            PaymentStatus::CONFIRMING,
            None,
        )
        .await?;
        self.mark_tx_matched(&mut txn, blockchain_tx_id, id).await?;
        if let Some(event) = webhook {
            self.enqueue_webhook(&mut txn, &updated, event).await?;
        }

        txn.commit()
            .await
            .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;
        Ok(updated)
    }

    async fn complete_with_ledger(
        &self,
        id: PaymentId,
        blockchain_tx_id: Uuid,
        groups: Vec<PostingGroup>,
        overpayment_note: Option<String>,
        webhook: Option<WebhookEventType>,
    ) -> Result<Payment, PaymentError> {
        let mut txn = self
            .pool
            .begin()
            .await
            .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;

        let current = self.fetch_for_update(&mut txn, id).await?;
        if current.status != PaymentStatus::CONFIRMING {
            return Err(PaymentError::ConflictingState {
                expected: PaymentStatus::CONFIRMING,
                actual: current.status,
            });
        }

        let invoice_group_id = groups
            .first()
            .map(|g| g.id())
            .ok_or_else(|| PaymentError::ValidationError("No posting groups".to_string()))?;

        // Ledger first: a failed post aborts the whole transaction and
        // the payment stays CONFIRMING for the observer to retry.
        for group in &groups {
            post_group(&mut txn, group).await?;
        }

        let model = sqlx::query_as::<_, PaymentModel>(
            r#"
            UPDATE payments
            SET status = 'COMPLETED',
                ledger_group_id = $2,
                overpayment_note = $3,
                completed_at = now(),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(invoice_group_id)
        .bind(&overpayment_note)
        .fetch_one(&mut *txn)
        .await
        .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;
        let updated = Payment::try_from(model).map_err(PaymentError::RepositoryError)?;

        self.insert_event(
            &mut txn,
            id,
            Some(PaymentStatus::CONFIRMING),
            PaymentStatus::COMPLETED,
            overpayment_note.as_deref(),
        )
        .await?;
        self.mark_tx_matched(&mut txn, blockchain_tx_id, id).await?;
        if let Some(event) = webhook {
            self.enqueue_webhook(&mut txn, &updated, event).await?;
        }

        txn.commit()
            .await
            .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;
        Ok(updated)
    }

    async fn fail_compliance_blocked(
        &self,
        id: PaymentId,
        blockchain_tx_id: Uuid,
        reason: &str,
        webhook: Option<WebhookEventType>,
    ) -> Result<Payment, PaymentError> {
        let mut txn = self
            .pool
            .begin()
            .await
            .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;

        let current = self.fetch_for_update(&mut txn, id).await?;
        if current.status.is_terminal() {
            return Err(PaymentError::ConflictingState {
                expected: PaymentStatus::PENDING,
                actual: current.status,
            });
        }

        let model = sqlx::query_as::<_, PaymentModel>(
            r#"
            UPDATE payments
            SET status = 'FAILED',
                failure_reason = $2,
                compliance_verdict = 'BLOCKED',
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(reason)
        .fetch_one(&mut *txn)
        .await
        .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;
        let updated = Payment::try_from(model).map_err(PaymentError::RepositoryError)?;

        self.insert_event(
            &mut txn,
            id,
            Some(current.status),
            PaymentStatus::FAILED,
            Some(reason),
        )
        .await?;
        // The transaction is matched to the payment for audit, but no
        // ledger group is ever posted for it.
        self.mark_tx_matched(&mut txn, blockchain_tx_id, id).await?;
        if let Some(event) = webhook {
            self.enqueue_webhook(&mut txn, &updated, event).await?;
        }

        txn.commit()
            .await
            .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;
        Ok(updated)
    }

    async fn claim_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, PaymentError> {
        let mut txn = self
            .pool
            .begin()
            .await
            .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;

        // SKIP LOCKED: concurrent sweepers claim disjoint batches.
        let due = sqlx::query_as::<_, PaymentModel>(
            r#"
            SELECT * FROM payments
            WHERE status = 'PENDING' AND expires_at <= $1
            ORDER BY expires_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *txn)
        .await
        .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;

        let mut expired = Vec::with_capacity(due.len());
        for model in due {
            let id = model.id;
            let updated = self.apply_status(&mut txn, id, PaymentStatus::EXPIRED, None).await?;
            self.insert_event(
                &mut txn,
                id,
                Some(PaymentStatus::PENDING),
                PaymentStatus::EXPIRED,
                None,
            )
            .await?;
            self.enqueue_webhook(&mut txn, &updated, WebhookEventType::PaymentExpired)
                .await?;
            expired.push(updated);
        }

        txn.commit()
            .await
            .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;
        Ok(expired)
    }

    async fn list_events(&self, id: PaymentId) -> Result<Vec<PaymentEvent>, PaymentError> {
        let models = sqlx::query_as::<_, PaymentEventModel>(
            r#"
            SELECT * FROM payment_events
            WHERE payment_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;

        Ok(models.into_iter().map(PaymentEvent::from).collect())
    }
}
