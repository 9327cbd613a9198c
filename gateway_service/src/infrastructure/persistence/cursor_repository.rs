use async_trait::async_trait;
use common::Chain;
use sqlx::PgPool;

use crate::domain::error::IngestError;
use crate::domain::repository::CursorRepository;

/// Cursores de ingestión persistidos por (cadena, productor).
///
/// Se comprometen después de cada lote exitoso, así un ingestor
/// interrumpido retoma sin pérdida.
pub struct PostgresCursorRepository {
    pool: PgPool,
}

impl PostgresCursorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorRepository for PostgresCursorRepository {
    async fn get(&self, chain: Chain, producer: &str) -> Result<Option<String>, IngestError> {
        sqlx::query_scalar(
            r#"SELECT cursor FROM ingestion_cursors WHERE chain = $1 AND producer = $2"#,
        )
        .bind(chain.as_str())
        .bind(producer)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IngestError::RepositoryError(e.to_string()))
    }

    async fn commit(
        &self,
        chain: Chain,
        producer: &str,
        cursor: &str,
    ) -> Result<(), IngestError> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_cursors (chain, producer, cursor, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (chain, producer)
            DO UPDATE SET cursor = EXCLUDED.cursor, updated_at = now()
            "#,
        )
        .bind(chain.as_str())
        .bind(producer)
        .bind(cursor)
        .execute(&self.pool)
        .await
        .map_err(|e| IngestError::RepositoryError(e.to_string()))?;
        Ok(())
    }
}
