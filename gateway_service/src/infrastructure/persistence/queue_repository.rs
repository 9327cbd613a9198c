use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::{QueueJob, QueueName};
use crate::domain::error::QueueError;
use crate::domain::repository::{NewQueueJob, QueueJobRepository};
use crate::domain::types::JobId;
use crate::infrastructure::persistence::models::QueueJobModel;

/// Cola de trabajos sobre PostgreSQL.
///
/// El reclamo usa `FOR UPDATE SKIP LOCKED` más un timeout de
/// visibilidad (`locked_until`): el trabajo de un worker caído reaparece
/// solo cuando el timeout vence, nunca se entrega dos veces en paralelo.
pub struct PostgresQueueJobRepository {
    pool: PgPool,
}

impl PostgresQueueJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueJobRepository for PostgresQueueJobRepository {
    async fn enqueue(&self, job: NewQueueJob) -> Result<QueueJob, QueueError> {
        let model = sqlx::query_as::<_, QueueJobModel>(
            r#"
            INSERT INTO queue_jobs (id, queue, job_type, payload, attempt, max_attempts, not_before)
            VALUES ($1, $2, $3, $4, 0, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job.queue)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.max_attempts)
        .bind(job.not_before)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueueError::RepositoryError(e.to_string()))?;

        Ok(model.into())
    }

    async fn claim(
        &self,
        queue: QueueName,
        limit: i64,
        visibility: Duration,
    ) -> Result<Vec<QueueJob>, QueueError> {
        let visible_until = Utc::now() + visibility;

        let models = sqlx::query_as::<_, QueueJobModel>(
            r#"
            UPDATE queue_jobs
            SET locked_until = $3, attempt = attempt + 1
            WHERE id IN (
                SELECT id FROM queue_jobs
                WHERE queue = $1
                  AND NOT dead_letter
                  AND not_before <= now()
                  AND (locked_until IS NULL OR locked_until < now())
                ORDER BY not_before ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(queue)
        .bind(limit)
        .bind(visible_until)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QueueError::RepositoryError(e.to_string()))?;

        Ok(models.into_iter().map(QueueJob::from).collect())
    }

    async fn complete(&self, id: JobId) -> Result<(), QueueError> {
        sqlx::query(r#"DELETE FROM queue_jobs WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::RepositoryError(e.to_string()))?;
        Ok(())
    }

    async fn retry_later(
        &self,
        id: JobId,
        queue: QueueName,
        not_before: DateTime<Utc>,
        error: &str,
    ) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE queue_jobs
            SET queue = $2, not_before = $3, locked_until = NULL, last_error = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(queue)
        .bind(not_before)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::RepositoryError(e.to_string()))?;
        Ok(())
    }

    /// El trabajo queda retenido para inspección del operador.
    async fn mark_dead_letter(&self, id: JobId, error: &str) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE queue_jobs
            SET dead_letter = TRUE, locked_until = NULL, last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::RepositoryError(e.to_string()))?;
        Ok(())
    }
}
