pub mod audit_repository;
pub mod blockchain_tx_repository;
pub mod cursor_repository;
pub mod ledger_repository;
pub mod merchant_repository;
pub mod models;
pub mod payment_repository;
pub mod payout_repository;
pub mod queue_repository;
pub mod snapshot_repository;
