//! Database layer for data persistence and access.
//!
//! This module implements the data access layer using SQLx with PostgreSQL.
//! Each entity has a store trait with two implementations: a Postgres-backed
//! one used in production and an in-memory one used by the test suite, so
//! handler and middleware tests never need a live database.
//!
//! # Modules
//!
//! - [`users`]: User accounts (signup, credentials, liveness)
//! - [`snippets`]: Snippets with publication expiry
//! - [`errors`]: Database-specific error types

pub mod errors;
pub mod snippets;
pub mod users;
