use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{Chain, PaymentReference, TokenAmount, TokenSymbol};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::entities::{
    BlockchainTransaction, BlockchainTxStatus, ComplianceVerdict, Merchant, Payment, PaymentEvent,
    PaymentStatus, Payout, PayoutStatus, QueueJob, QueueName, ReconciliationLog,
    WalletBalanceSnapshot,
};
use crate::domain::ledger::{EntryDirection, LedgerEntry};
use crate::domain::types::{
    JobId, LedgerGroupId, MerchantId, PaymentId, PayoutId, TxHash, WalletAddress,
};

/// Modelo de persistencia de `payments`.
///
/// La cadena y la referencia se guardan como TEXT; la reconstrucción a
/// dominio valida ambas y falla ante datos corruptos en lugar de
/// propagarlos.
#[derive(Debug, FromRow)]
pub struct PaymentModel {
    pub id: PaymentId,
    pub merchant_id: MerchantId,
    pub amount_vnd: i64,
    pub crypto_amount_base_units: Decimal,
    pub crypto_amount_decimals: i16,
    pub token: String,
    pub chain: String,
    pub wallet_address: String,
    pub reference: String,
    pub locked_rate: Decimal,
    pub status: PaymentStatus,
    pub order_id: Option<String>,
    pub compliance_verdict: Option<ComplianceVerdict>,
    pub tx_hash: Option<String>,
    pub block_height: Option<i64>,
    pub ledger_group_id: Option<LedgerGroupId>,
    pub overpayment_note: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Payment> for PaymentModel {
    fn from(p: &Payment) -> Self {
        Self {
            id: p.id,
            merchant_id: p.merchant_id,
            amount_vnd: p.amount_vnd.minor_units(),
            crypto_amount_base_units: p.crypto_amount.base_units_decimal(),
            crypto_amount_decimals: p.crypto_amount.decimals() as i16,
            token: p.token.as_str().to_string(),
            chain: p.chain.as_str().to_string(),
            wallet_address: p.wallet_address.as_str().to_string(),
            reference: p.reference.as_str().to_string(),
            locked_rate: p.locked_rate,
            status: p.status,
            order_id: p.order_id.clone(),
            compliance_verdict: p.compliance_verdict,
            tx_hash: p.tx_hash.as_ref().map(|h| h.as_str().to_string()),
            block_height: p.block_height,
            ledger_group_id: p.ledger_group_id,
            overpayment_note: p.overpayment_note.clone(),
            failure_reason: p.failure_reason.clone(),
            created_at: p.created_at,
            updated_at: p.updated_at,
            expires_at: p.expires_at,
            completed_at: p.completed_at,
        }
    }
}

impl TryFrom<PaymentModel> for Payment {
    type Error = String;

    fn try_from(m: PaymentModel) -> Result<Self, Self::Error> {
        Ok(Self {
            id: m.id,
            merchant_id: m.merchant_id,
            amount_vnd: common::VndAmount::from_minor_units(m.amount_vnd),
            crypto_amount: decimal_to_token_amount(
                m.crypto_amount_base_units,
                m.crypto_amount_decimals,
            )?,
            token: TokenSymbol::new(&m.token).map_err(|e| e.to_string())?,
            chain: Chain::from_str(&m.chain).map_err(|e| e.to_string())?,
            wallet_address: WalletAddress::new(m.wallet_address),
            reference: PaymentReference::parse(&m.reference).map_err(|e| e.to_string())?,
            locked_rate: m.locked_rate,
            status: m.status,
            order_id: m.order_id,
            compliance_verdict: m.compliance_verdict,
            tx_hash: m.tx_hash.map(TxHash::new),
            block_height: m.block_height,
            ledger_group_id: m.ledger_group_id,
            overpayment_note: m.overpayment_note,
            failure_reason: m.failure_reason,
            created_at: m.created_at,
            updated_at: m.updated_at,
            expires_at: m.expires_at,
            completed_at: m.completed_at,
        })
    }
}

/// Modelo de persistencia de `blockchain_transactions`.
#[derive(Debug, FromRow)]
pub struct BlockchainTransactionModel {
    pub id: Uuid,
    pub chain: String,
    pub network: String,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub token_mint: String,
    pub token_symbol: Option<String>,
    pub amount_base_units: Decimal,
    pub amount_decimals: i16,
    pub memo: Option<String>,
    pub reference: Option<String>,
    pub confirmations: i64,
    pub is_finalized: bool,
    pub block_height: Option<i64>,
    pub payment_id: Option<PaymentId>,
    pub is_matched: bool,
    pub matched_at: Option<DateTime<Utc>>,
    pub unmatched_reason: Option<String>,
    pub status: BlockchainTxStatus,
    pub raw: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&BlockchainTransaction> for BlockchainTransactionModel {
    fn from(t: &BlockchainTransaction) -> Self {
        Self {
            id: t.id,
            chain: t.chain.as_str().to_string(),
            network: t.network.clone(),
            tx_hash: t.tx_hash.as_str().to_string(),
            from_address: t.from_address.as_str().to_string(),
            to_address: t.to_address.as_str().to_string(),
            token_mint: t.token_mint.clone(),
            token_symbol: t.token_symbol.as_ref().map(|s| s.as_str().to_string()),
            amount_base_units: t.amount.base_units_decimal(),
            amount_decimals: t.amount.decimals() as i16,
            memo: t.memo.clone(),
            reference: t.reference.as_ref().map(|r| r.as_str().to_string()),
            confirmations: t.confirmations,
            is_finalized: t.is_finalized,
            block_height: t.block_height,
            payment_id: t.payment_id,
            is_matched: t.is_matched,
            matched_at: t.matched_at,
            unmatched_reason: t.unmatched_reason.clone(),
            status: t.status,
            raw: t.raw.clone(),
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

impl TryFrom<BlockchainTransactionModel> for BlockchainTransaction {
    type Error = String;

    fn try_from(m: BlockchainTransactionModel) -> Result<Self, Self::Error> {
        let token_symbol = match m.token_symbol {
            Some(s) => Some(TokenSymbol::new(&s).map_err(|e| e.to_string())?),
            None => None,
        };
        let reference = match m.reference {
            Some(r) => Some(PaymentReference::parse(&r).map_err(|e| e.to_string())?),
            None => None,
        };
        Ok(Self {
            id: m.id,
            chain: Chain::from_str(&m.chain).map_err(|e| e.to_string())?,
            network: m.network,
            tx_hash: TxHash::new(m.tx_hash),
            from_address: WalletAddress::new(m.from_address),
            to_address: WalletAddress::new(m.to_address),
            token_mint: m.token_mint,
            token_symbol,
            amount: decimal_to_token_amount(m.amount_base_units, m.amount_decimals)?,
            memo: m.memo,
            reference,
            confirmations: m.confirmations,
            is_finalized: m.is_finalized,
            block_height: m.block_height,
            payment_id: m.payment_id,
            is_matched: m.is_matched,
            matched_at: m.matched_at,
            unmatched_reason: m.unmatched_reason,
            status: m.status,
            raw: m.raw,
            created_at: m.created_at,
            updated_at: m.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct MerchantModel {
    pub id: MerchantId,
    pub name: String,
    pub api_key_hash: String,
    pub webhook_url: Option<String>,
    pub webhook_secret: String,
    pub kyc_approved: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<MerchantModel> for Merchant {
    fn from(m: MerchantModel) -> Self {
        Self {
            id: m.id,
            name: m.name,
            api_key_hash: m.api_key_hash,
            webhook_url: m.webhook_url,
            webhook_secret: m.webhook_secret,
            kyc_approved: m.kyc_approved,
            is_active: m.is_active,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct PaymentEventModel {
    pub id: Uuid,
    pub payment_id: PaymentId,
    pub from_status: Option<PaymentStatus>,
    pub to_status: PaymentStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<PaymentEventModel> for PaymentEvent {
    fn from(m: PaymentEventModel) -> Self {
        Self {
            id: m.id,
            payment_id: m.payment_id,
            from_status: m.from_status,
            to_status: m.to_status,
            reason: m.reason,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct QueueJobModel {
    pub id: JobId,
    pub queue: QueueName,
    pub job_type: String,
    pub payload: Value,
    pub attempt: i32,
    pub max_attempts: i32,
    pub not_before: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub dead_letter: bool,
    pub created_at: DateTime<Utc>,
}

impl From<QueueJobModel> for QueueJob {
    fn from(m: QueueJobModel) -> Self {
        Self {
            id: m.id,
            queue: m.queue,
            job_type: m.job_type,
            payload: m.payload,
            attempt: m.attempt,
            max_attempts: m.max_attempts,
            not_before: m.not_before,
            locked_until: m.locked_until,
            last_error: m.last_error,
            dead_letter: m.dead_letter,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct LedgerEntryModel {
    pub id: Uuid,
    pub group_id: LedgerGroupId,
    pub account_key: String,
    pub direction: EntryDirection,
    pub amount: Decimal,
    pub currency: String,
    pub payment_id: Option<PaymentId>,
    pub payout_id: Option<PayoutId>,
    pub posted_at: DateTime<Utc>,
}

impl From<LedgerEntryModel> for LedgerEntry {
    fn from(m: LedgerEntryModel) -> Self {
        Self {
            id: m.id,
            group_id: m.group_id,
            account_key: m.account_key,
            direction: m.direction,
            amount: m.amount,
            currency: m.currency,
            payment_id: m.payment_id,
            payout_id: m.payout_id,
            posted_at: m.posted_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct AccountBalanceModel {
    pub account_key: String,
    pub currency: String,
    pub balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct PayoutModel {
    pub id: PayoutId,
    pub merchant_id: MerchantId,
    pub amount_vnd: i64,
    pub status: PayoutStatus,
    pub ledger_group_id: Option<LedgerGroupId>,
    pub settlement_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<PayoutModel> for Payout {
    fn from(m: PayoutModel) -> Self {
        Self {
            id: m.id,
            merchant_id: m.merchant_id,
            amount_vnd: common::VndAmount::from_minor_units(m.amount_vnd),
            status: m.status,
            ledger_group_id: m.ledger_group_id,
            settlement_tx_hash: m.settlement_tx_hash.map(TxHash::new),
            created_at: m.created_at,
            completed_at: m.completed_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct WalletBalanceSnapshotModel {
    pub id: Uuid,
    pub chain: String,
    pub wallet_address: String,
    pub native_balance: Decimal,
    pub token_balances: Value,
    pub is_below_min_threshold: bool,
    pub is_above_max_threshold: bool,
    pub alert_sent: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<WalletBalanceSnapshotModel> for WalletBalanceSnapshot {
    type Error = String;

    fn try_from(m: WalletBalanceSnapshotModel) -> Result<Self, Self::Error> {
        Ok(Self {
            id: m.id,
            chain: Chain::from_str(&m.chain).map_err(|e| e.to_string())?,
            wallet_address: WalletAddress::new(m.wallet_address),
            native_balance: m.native_balance,
            token_balances: m.token_balances,
            is_below_min_threshold: m.is_below_min_threshold,
            is_above_max_threshold: m.is_above_max_threshold,
            alert_sent: m.alert_sent,
            created_at: m.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct ReconciliationLogModel {
    pub id: Uuid,
    pub token: String,
    pub ledger_balance: Decimal,
    pub observed_balance: Decimal,
    pub delta: Decimal,
    pub alerted: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ReconciliationLogModel> for ReconciliationLog {
    type Error = String;

    fn try_from(m: ReconciliationLogModel) -> Result<Self, Self::Error> {
        Ok(Self {
            id: m.id,
            token: TokenSymbol::new(&m.token).map_err(|e| e.to_string())?,
            ledger_balance: m.ledger_balance,
            observed_balance: m.observed_balance,
            delta: m.delta,
            alerted: m.alerted,
            created_at: m.created_at,
        })
    }
}

/// Reconstruye un `TokenAmount` desde la columna NUMERIC de unidades base.
fn decimal_to_token_amount(base_units: Decimal, decimals: i16) -> Result<TokenAmount, String> {
    let units = base_units
        .to_u128()
        .ok_or_else(|| format!("Invalid base units in storage: {}", base_units))?;
    if !(0..=38).contains(&decimals) {
        return Err(format!("Invalid token decimals in storage: {}", decimals));
    }
    Ok(TokenAmount::from_base_units(units, decimals as u8))
}
