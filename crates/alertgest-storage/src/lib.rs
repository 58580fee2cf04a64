//! Persistence for alerts, capture windows and digests.
//!
//! [`store::Store`] wraps a SeaORM connection (SQLite by default, PostgreSQL
//! when the URL says so) and runs the schema migrations on connect. Every
//! window status change is a compare-and-set against the stored status, and
//! multi-row state changes happen inside a single transaction.

pub mod entities;
pub mod error;
pub mod store;


pub use error::{Result, StorageError};
pub use store::{AttemptOutcome, Reconciliation, Store};
