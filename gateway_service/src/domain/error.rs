use common::Chain;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::entities::PaymentStatus;
use crate::domain::types::{LedgerGroupId, MerchantId, PaymentId, PayoutId};

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Payment not found with ID: {0}")]
    NotFound(PaymentId),

    #[error("No payment found for reference {reference} on chain {chain}")]
    ReferenceNotFound { chain: Chain, reference: String },

    #[error("Conflicting state: expected {expected:?}, found {actual:?}")]
    ConflictingState {
        expected: PaymentStatus,
        actual: PaymentStatus,
    },

    #[error("Illegal transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("Payment {0} already bound to a different transaction")]
    AlreadyBound(PaymentId),

    #[error("Sender address blocked by compliance screening: {0}")]
    ComplianceBlocked(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Exchange rate unavailable: {0}")]
    RateUnavailable(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Payment repository error: {0}")]
    RepositoryError(String),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Unbalanced group in {currency}: debits {debits} != credits {credits}")]
    Unbalanced {
        currency: String,
        debits: Decimal,
        credits: Decimal,
    },

    #[error("Unknown ledger account: {0}")]
    AccountMissing(String),

    #[error("Ledger group already posted: {0}")]
    Duplicate(LedgerGroupId),

    #[error("Invalid ledger entry: {0}")]
    InvalidEntry(String),

    #[error("Ledger repository error: {0}")]
    RepositoryError(String),
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("RPC error on {chain}: {message}")]
    Rpc { chain: Chain, message: String },

    #[error("Failed to parse transaction {tx_hash}: {message}")]
    Parse { tx_hash: String, message: String },

    #[error("Subscription error on {chain}: {message}")]
    Subscription { chain: Chain, message: String },

    #[error("Chain {0} does not expose a subscription feed")]
    SubscriptionUnsupported(Chain),

    #[error("Ingestion repository error: {0}")]
    RepositoryError(String),
}

#[derive(Error, Debug)]
pub enum MerchantError {
    #[error("Merchant not found with ID: {0}")]
    NotFound(MerchantId),

    #[error("Unknown API key")]
    UnknownApiKey,

    #[error("Merchant {0} is not active")]
    Inactive(MerchantId),

    #[error("Merchant {0} has not completed KYC")]
    KycNotApproved(MerchantId),

    #[error("Merchant repository error: {0}")]
    RepositoryError(String),
}

#[derive(Error, Debug)]
pub enum PayoutError {
    #[error("Payout not found with ID: {0}")]
    NotFound(PayoutId),

    #[error("Payout {0} is not in an approvable state")]
    InvalidState(PayoutId),

    #[error("Insufficient available balance for merchant {0}")]
    InsufficientFunds(MerchantId),

    #[error("Settlement wallet error: {0}")]
    SettlementError(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Payout repository error: {0}")]
    RepositoryError(String),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to serialize job payload: {0}")]
    Serialization(String),

    #[error("Queue repository error: {0}")]
    RepositoryError(String),
}

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Non-success response: HTTP {0}")]
    NonSuccessStatus(u16),
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Snapshot repository error: {0}")]
    RepositoryError(String),
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit repository error: {0}")]
    RepositoryError(String),
}

#[derive(Error, Debug)]
pub enum ComplianceError {
    #[error("Wallet screening failed: {0}")]
    ScreeningFailed(String),
}

#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("Status bus error: {0}")]
    Bus(String),
}

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Rate limit store error: {0}")]
    StoreError(String),
}
