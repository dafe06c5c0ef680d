//! # anonchat-store
//!
//! Durable local state for the anonchat client, backed by SQLite.
//!
//! The board persists two values between runs: the anonymous identity and
//! the time of the last accepted submission. Both live in a small key-value
//! table, so the same data directory always yields the same identity (and
//! keeps its posting cooldown) until its database is removed.

pub mod cooldown;
pub mod database;
pub mod identity;
pub mod kv;
pub mod migrations;

mod error;

pub use cooldown::{last_submission, record_submission};
pub use database::LocalDatabase;
pub use error::StoreError;
pub use identity::get_or_create_identity;
