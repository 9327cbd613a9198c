use async_trait::async_trait;
use common::{Chain, TokenSymbol};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::BlockchainTransaction;
use crate::domain::error::IngestError;
use crate::domain::repository::BlockchainTxRepository;
use crate::domain::types::TxHash;
use crate::infrastructure::persistence::models::BlockchainTransactionModel;

/// Repositorio de transferencias observadas para PostgreSQL.
pub struct PostgresBlockchainTxRepository {
    pool: PgPool,
}

impl PostgresBlockchainTxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlockchainTxRepository for PostgresBlockchainTxRepository {
    /// Inserta la transferencia; el índice único `(chain, tx_hash)`
    /// absorbe el duplicado cuando ambos productores observan el mismo
    /// hash. `None` significa "ya la teníamos".
    async fn insert_if_new(
        &self,
        tx: BlockchainTransaction,
    ) -> Result<Option<BlockchainTransaction>, IngestError> {
        let model = BlockchainTransactionModel::from(&tx);

        let inserted = sqlx::query_as::<_, BlockchainTransactionModel>(
            r#"
            INSERT INTO blockchain_transactions (
                id, chain, network, tx_hash, from_address, to_address, token_mint,
                token_symbol, amount_base_units, amount_decimals, memo, reference,
                confirmations, is_finalized, block_height, status, raw, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (chain, tx_hash) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(model.id)
        .bind(&model.chain)
        .bind(&model.network)
        .bind(&model.tx_hash)
        .bind(&model.from_address)
        .bind(&model.to_address)
        .bind(&model.token_mint)
        .bind(&model.token_symbol)
        .bind(model.amount_base_units)
        .bind(model.amount_decimals)
        .bind(&model.memo)
        .bind(&model.reference)
        .bind(model.confirmations)
        .bind(model.is_finalized)
        .bind(model.block_height)
        .bind(model.status)
        .bind(&model.raw)
        .bind(model.created_at)
        .bind(model.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IngestError::RepositoryError(e.to_string()))?;

        inserted
            .map(|m| BlockchainTransaction::try_from(m).map_err(IngestError::RepositoryError))
            .transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<BlockchainTransaction>, IngestError> {
        let model = sqlx::query_as::<_, BlockchainTransactionModel>(
            r#"SELECT * FROM blockchain_transactions WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IngestError::RepositoryError(e.to_string()))?;

        model
            .map(|m| BlockchainTransaction::try_from(m).map_err(IngestError::RepositoryError))
            .transpose()
    }

    async fn find_by_hash(
        &self,
        chain: Chain,
        tx_hash: &TxHash,
    ) -> Result<Option<BlockchainTransaction>, IngestError> {
        let model = sqlx::query_as::<_, BlockchainTransactionModel>(
            r#"SELECT * FROM blockchain_transactions WHERE chain = $1 AND tx_hash = $2"#,
        )
        .bind(chain.as_str())
        .bind(tx_hash.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IngestError::RepositoryError(e.to_string()))?;

        model
            .map(|m| BlockchainTransaction::try_from(m).map_err(IngestError::RepositoryError))
            .transpose()
    }

    async fn mark_unmatched(&self, id: Uuid, reason: &str) -> Result<(), IngestError> {
        sqlx::query(
            r#"
            UPDATE blockchain_transactions
            SET unmatched_reason = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| IngestError::RepositoryError(e.to_string()))?;
        Ok(())
    }

    async fn update_confirmations(&self, id: Uuid, confirmations: i64) -> Result<(), IngestError> {
        sqlx::query(
            r#"
            UPDATE blockchain_transactions
            SET confirmations = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(confirmations)
        .execute(&self.pool)
        .await
        .map_err(|e| IngestError::RepositoryError(e.to_string()))?;
        Ok(())
    }

    /// `is_finalized` y `status` cambian en la misma escritura; no existe
    /// un estado intermedio observable.
    async fn mark_finalized(&self, id: Uuid) -> Result<BlockchainTransaction, IngestError> {
        let model = sqlx::query_as::<_, BlockchainTransactionModel>(
            r#"
            UPDATE blockchain_transactions
            SET is_finalized = TRUE, status = 'finalized', updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IngestError::RepositoryError(e.to_string()))?
        .ok_or_else(|| IngestError::RepositoryError(format!("Unknown blockchain tx: {}", id)))?;

        BlockchainTransaction::try_from(model).map_err(IngestError::RepositoryError)
    }

    async fn list_unfinalized(
        &self,
        chain: Chain,
        limit: i64,
    ) -> Result<Vec<BlockchainTransaction>, IngestError> {
        let models = sqlx::query_as::<_, BlockchainTransactionModel>(
            r#"
            SELECT * FROM blockchain_transactions
            WHERE chain = $1 AND NOT is_finalized AND status = 'confirmed'
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(chain.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IngestError::RepositoryError(e.to_string()))?;

        models
            .into_iter()
            .map(|m| BlockchainTransaction::try_from(m).map_err(IngestError::RepositoryError))
            .collect()
    }

    async fn sum_finalized_base_units(
        &self,
        token: &TokenSymbol,
    ) -> Result<Decimal, IngestError> {
        let sum: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT SUM(amount_base_units)
            FROM blockchain_transactions
            WHERE token_symbol = $1 AND is_finalized
            "#,
        )
        .bind(token.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| IngestError::RepositoryError(e.to_string()))?;

        Ok(sum.unwrap_or(Decimal::ZERO))
    }
}
