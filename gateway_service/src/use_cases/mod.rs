pub mod complete_payout;
pub mod create_payment;
pub mod expire_payments;
pub mod get_payment;
pub mod match_transaction;
pub mod payment_engine;
