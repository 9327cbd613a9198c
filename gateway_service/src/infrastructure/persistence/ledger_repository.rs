use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::VndAmount;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::error::LedgerError;
use crate::domain::ledger::{
    EntryDirection, LedgerAccount, LedgerEntry, MerchantBalance, PostingGroup,
    ReconciliationDelta, CURRENCY_VND,
};
use crate::domain::repository::Ledger;
use crate::domain::types::{LedgerGroupId, MerchantId};
use crate::infrastructure::persistence::models::{AccountBalanceModel, LedgerEntryModel};

/// Libro mayor implementado sobre PostgreSQL.
///
/// El diario (`ledger_entries`) y la proyección (`account_balances`) se
/// escriben en la misma transacción; la fila de `ledger_groups` es la
/// llave de idempotencia del posteo. Los asientos nunca se mutan.
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Postea un grupo dentro de una transacción ya abierta.
///
/// Lo comparten `PostgresLedger::post` y las operaciones compuestas del
/// repositorio de pagos (estado + asiento en un solo commit).
pub(crate) async fn post_group(
    txn: &mut Transaction<'_, Postgres>,
    group: &PostingGroup,
) -> Result<(), LedgerError> {
    // Idempotency key: a replayed group id is a duplicate, not a repost.
    let inserted = sqlx::query(
        r#"
        INSERT INTO ledger_groups (id, payment_id, payout_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(group.id())
    .bind(group.payment_id())
    .bind(group.payout_id())
    .execute(&mut **txn)
    .await
    .map_err(|e| LedgerError::RepositoryError(e.to_string()))?;

    if inserted.rows_affected() == 0 {
        return Err(LedgerError::Duplicate(group.id()));
    }

    for leg in group.legs() {
        let account_key = leg.account.key();

        let known: bool = sqlx::query_scalar(
            r#"SELECT EXISTS (SELECT 1 FROM accounts WHERE account_key = $1)"#,
        )
        .bind(&account_key)
        .fetch_one(&mut **txn)
        .await
        .map_err(|e| LedgerError::RepositoryError(e.to_string()))?;
        if !known {
            return Err(LedgerError::AccountMissing(account_key));
        }

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, group_id, account_key, direction, amount, currency, payment_id, payout_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(group.id())
        .bind(&account_key)
        .bind(leg.direction)
        .bind(leg.amount)
        .bind(&leg.currency)
        .bind(group.payment_id())
        .bind(group.payout_id())
        .execute(&mut **txn)
        .await
        .map_err(|e| LedgerError::RepositoryError(e.to_string()))?;

        // Projection: balance = credits - debits. The upsert takes the
        // row lock that serializes contending posters per account.
        let delta = match leg.direction {
            EntryDirection::CREDIT => leg.amount,
            EntryDirection::DEBIT => -leg.amount,
        };
        sqlx::query(
            r#"
            INSERT INTO account_balances (account_key, currency, balance, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (account_key, currency)
            DO UPDATE SET balance = account_balances.balance + EXCLUDED.balance,
                          updated_at = now()
            "#,
        )
        .bind(&account_key)
        .bind(&leg.currency)
        .bind(delta)
        .execute(&mut **txn)
        .await
        .map_err(|e| LedgerError::RepositoryError(e.to_string()))?;
    }

    Ok(())
}

#[derive(sqlx::FromRow)]
struct ReconcileRow {
    account_key: String,
    currency: String,
    stored: Decimal,
    computed: Decimal,
}

#[async_trait]
impl Ledger for PostgresLedger {
    async fn post(&self, group: &PostingGroup) -> Result<(), LedgerError> {
        let mut txn = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::RepositoryError(e.to_string()))?;

        post_group(&mut txn, group).await?;

        txn.commit()
            .await
            .map_err(|e| LedgerError::RepositoryError(e.to_string()))
    }

    async fn merchant_balance(
        &self,
        merchant_id: MerchantId,
    ) -> Result<MerchantBalance, LedgerError> {
        let available_key = LedgerAccount::MerchantAvailable(merchant_id).key();
        let pending_key = LedgerAccount::MerchantPending(merchant_id).key();

        let known: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM accounts WHERE account_key IN ($1, $2)"#,
        )
        .bind(&available_key)
        .bind(&pending_key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::RepositoryError(e.to_string()))?;
        if known < 2 {
            return Err(LedgerError::AccountMissing(available_key));
        }

        let available = self
            .read_balance(&available_key, CURRENCY_VND)
            .await?
            .unwrap_or(Decimal::ZERO);
        let pending = self
            .read_balance(&pending_key, CURRENCY_VND)
            .await?
            .unwrap_or(Decimal::ZERO);

        Ok(MerchantBalance {
            available: VndAmount::from_minor_units(decimal_to_i64(available)?),
            pending: VndAmount::from_minor_units(decimal_to_i64(pending)?),
        })
    }

    async fn account_balance(
        &self,
        account: &LedgerAccount,
        currency: &str,
    ) -> Result<Decimal, LedgerError> {
        let key = account.key();
        let known: bool = sqlx::query_scalar(
            r#"SELECT EXISTS (SELECT 1 FROM accounts WHERE account_key = $1)"#,
        )
        .bind(&key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::RepositoryError(e.to_string()))?;
        if !known {
            return Err(LedgerError::AccountMissing(key));
        }

        Ok(self.read_balance(&key, currency).await?.unwrap_or(Decimal::ZERO))
    }

    async fn reconcile(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ReconciliationDelta>, LedgerError> {
        let rows = sqlx::query_as::<_, ReconcileRow>(
            r#"
            WITH affected AS (
                SELECT DISTINCT account_key, currency
                FROM ledger_entries
                WHERE posted_at >= $1 AND posted_at < $2
            )
            SELECT a.account_key,
                   a.currency,
                   COALESCE(b.balance, 0) AS stored,
                   COALESCE((
                       SELECT SUM(CASE WHEN e.direction = 'CREDIT' THEN e.amount ELSE -e.amount END)
                       FROM ledger_entries e
                       WHERE e.account_key = a.account_key AND e.currency = a.currency
                   ), 0) AS computed
            FROM affected a
            LEFT JOIN account_balances b
                ON b.account_key = a.account_key AND b.currency = a.currency
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::RepositoryError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter(|row| row.stored != row.computed)
            .map(|row| ReconciliationDelta {
                account_key: row.account_key,
                currency: row.currency,
                stored: row.stored,
                computed: row.computed,
            })
            .collect())
    }

    async fn entries_for_group(
        &self,
        group_id: LedgerGroupId,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let models = sqlx::query_as::<_, LedgerEntryModel>(
            r#"
            SELECT * FROM ledger_entries
            WHERE group_id = $1
            ORDER BY posted_at ASC, id ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::RepositoryError(e.to_string()))?;

        Ok(models.into_iter().map(LedgerEntry::from).collect())
    }
}

impl PostgresLedger {
    async fn read_balance(
        &self,
        account_key: &str,
        currency: &str,
    ) -> Result<Option<Decimal>, LedgerError> {
        let model = sqlx::query_as::<_, AccountBalanceModel>(
            r#"SELECT * FROM account_balances WHERE account_key = $1 AND currency = $2"#,
        )
        .bind(account_key)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::RepositoryError(e.to_string()))?;

        Ok(model.map(|m| m.balance))
    }
}

fn decimal_to_i64(value: Decimal) -> Result<i64, LedgerError> {
    use rust_decimal::prelude::ToPrimitive;
    value
        .to_i64()
        .ok_or_else(|| LedgerError::InvalidEntry(format!("Balance out of i64 range: {}", value)))
}
