//! Common Library
//!
//! Shared primitives for the payment gateway services: chain tags,
//! fixed-point money types and payment reference handling.

pub mod chain;
pub mod money;
pub mod reference;

pub use chain::Chain;
pub use money::{MoneyError, TokenAmount, TokenSymbol, VndAmount};
pub use reference::{MemoPolicy, PaymentReference};
