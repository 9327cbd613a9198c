use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::entities::Merchant;
use crate::domain::error::MerchantError;
use crate::domain::ledger::LedgerAccount;
use crate::domain::repository::MerchantRepository;
use crate::domain::types::MerchantId;
use crate::infrastructure::persistence::models::MerchantModel;

/// Repositorio de comercios para PostgreSQL.
///
/// Crear un comercio también registra sus dos cuentas contables
/// (`available` y `pending`) en el plan de cuentas, en la misma
/// transacción: el ledger nunca ve un comercio sin cuentas.
pub struct PostgresMerchantRepository {
    pool: PgPool,
}

impl PostgresMerchantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MerchantRepository for PostgresMerchantRepository {
    async fn create(&self, merchant: Merchant) -> Result<Merchant, MerchantError> {
        let mut txn = self
            .pool
            .begin()
            .await
            .map_err(|e| MerchantError::RepositoryError(e.to_string()))?;

        let saved = sqlx::query_as::<_, MerchantModel>(
            r#"
            INSERT INTO merchants (
                id, name, api_key_hash, webhook_url, webhook_secret,
                kyc_approved, is_active, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(merchant.id)
        .bind(&merchant.name)
        .bind(&merchant.api_key_hash)
        .bind(&merchant.webhook_url)
        .bind(&merchant.webhook_secret)
        .bind(merchant.kyc_approved)
        .bind(merchant.is_active)
        .bind(merchant.created_at)
        .fetch_one(&mut *txn)
        .await
        .map_err(|e| MerchantError::RepositoryError(e.to_string()))?;

        for (account, account_type) in [
            (LedgerAccount::MerchantAvailable(merchant.id), "merchant_available"),
            (LedgerAccount::MerchantPending(merchant.id), "merchant_pending"),
        ] {
            sqlx::query(
                r#"
                INSERT INTO accounts (account_key, account_type)
                VALUES ($1, $2)
                ON CONFLICT (account_key) DO NOTHING
                "#,
            )
            .bind(account.key())
            .bind(account_type)
            .execute(&mut *txn)
            .await
            .map_err(|e| MerchantError::RepositoryError(e.to_string()))?;
        }

        txn.commit()
            .await
            .map_err(|e| MerchantError::RepositoryError(e.to_string()))?;

        Ok(saved.into())
    }

    async fn find_by_id(&self, id: MerchantId) -> Result<Option<Merchant>, MerchantError> {
        let model = sqlx::query_as::<_, MerchantModel>(r#"SELECT * FROM merchants WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MerchantError::RepositoryError(e.to_string()))?;

        Ok(model.map(Merchant::from))
    }

    async fn find_by_api_key_hash(
        &self,
        api_key_hash: &str,
    ) -> Result<Option<Merchant>, MerchantError> {
        let model = sqlx::query_as::<_, MerchantModel>(
            r#"SELECT * FROM merchants WHERE api_key_hash = $1"#,
        )
        .bind(api_key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MerchantError::RepositoryError(e.to_string()))?;

        Ok(model.map(Merchant::from))
    }
}
