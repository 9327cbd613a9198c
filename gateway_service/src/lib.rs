//! Gateway Service Library
//!
//! This library acts as the core of the payment gateway, exporting the
//! modules used by the application binary and the integration tests.
//!
//! # Modules
//!
//! * `api` - HTTP/WebSocket interfaces of the merchant API.
//! * `config` - Environment-driven process configuration.
//! * `domain` - Entities, ledger types, business rules and ports.
//! * `infrastructure` - Postgres repositories, blockchain clients,
//!   ingestion pipeline and Redis-backed shared state.
//! * `jobs` - Worker pool and background job handlers.
//! * `use_cases` - Application workflows (payment engine, matcher,
//!   invoicing, expiry, payouts).

pub mod api;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod jobs;
pub mod use_cases;
