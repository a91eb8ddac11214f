//! Narrow interface to the search cluster.
//!
//! [`ClusterGateway`] is the only way the migration code touches the cluster.
//! Two engines implement it: [`ElasticsearchGateway`] talks JSON over HTTP,
//! [`InMemoryCluster`] keeps indices and aliases in process.

pub mod api;
pub mod elasticsearch;
pub mod error;
pub mod in_memory;
pub mod mapping;
pub mod retry;

pub use api::{ClusterGateway, CreateIndexOutcome, DeleteIndexOutcome};
pub use elasticsearch::{ElasticsearchGateway, GatewayConfig};
pub use error::{ErrorKind, GatewayError};
pub use in_memory::InMemoryCluster;
pub use retry::{RetryFailure, RetryPolicy, retry_async};
