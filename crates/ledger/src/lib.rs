//! Durable progress records for migrations.
//!
//! The [`Ledger`] keeps exactly one [`LedgerEntry`](reindexer_core::LedgerEntry)
//! per migration id. Every write is a compare-and-set on the entry's
//! `version`, so two drivers racing on the same migration cannot both win.

pub mod api;
pub mod error;
pub mod store;
pub mod store_db;

pub use api::LedgerEngine;
pub use error::LedgerError;
pub use store::{EngineType, Ledger};
