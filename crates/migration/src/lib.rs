//! Phase-by-phase index migration on top of a [`ClusterGateway`] and a
//! [`Ledger`].
//!
//! [`ClusterGateway`]: reindexer_gateway::ClusterGateway
//! [`Ledger`]: reindexer_ledger::Ledger

pub mod copier;
pub mod error;
pub mod orchestrator;

pub use copier::BulkCopyEngine;
pub use error::{MigrationFailure, OrchestratorError};
pub use orchestrator::{MigrationOutcome, Orchestrator};
