pub mod entities;
pub mod error;
pub mod gateways;
pub mod ledger;
pub mod repository;
pub mod types;
pub mod webhooks;
