pub mod cache;
pub mod gateways;
pub mod ingestion;
pub mod persistence;
