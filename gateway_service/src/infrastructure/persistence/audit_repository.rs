use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::error::AuditError;
use crate::domain::repository::AuditLogRepository;
use crate::domain::types::MerchantId;

/// Registro de auditoría del API sobre la tabla particionada por año.
pub struct PostgresAuditLogRepository {
    pool: PgPool,
}

impl PostgresAuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLogRepository for PostgresAuditLogRepository {
    async fn record(
        &self,
        merchant_id: Option<MerchantId>,
        action: &str,
        detail: Value,
    ) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, merchant_id, action, detail)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(merchant_id)
        .bind(action)
        .bind(&detail)
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError::RepositoryError(e.to_string()))?;
        Ok(())
    }
}
