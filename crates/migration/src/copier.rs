use std::sync::Arc;

use reindexer_core::{BatchResult, Checkpoint};
use reindexer_gateway::{ClusterGateway, GatewayError, RetryFailure, RetryPolicy, retry_async};
use tracing::{debug, warn};

/// Moves documents from one index to another, one checkpointed chunk at a time.
///
/// Delivery is at-least-once: a chunk that fails halfway is read and written
/// again from the same checkpoint, and writes overwrite by document id.
#[derive(Debug, Clone)]
pub struct BulkCopyEngine {
    gateway: Arc<dyn ClusterGateway>,
    policy: RetryPolicy,
}

impl BulkCopyEngine {
    pub fn new(gateway: Arc<dyn ClusterGateway>, policy: RetryPolicy) -> Self {
        Self { gateway, policy }
    }

    /// Copies up to `batch_size` documents found strictly after `checkpoint`.
    ///
    /// Documents the cluster rejects individually are reported in the result;
    /// only a whole-chunk failure is an error, after the retry policy gave up.
    pub async fn copy_batch(
        &self,
        source: &str,
        target: &str,
        checkpoint: Option<&Checkpoint>,
        batch_size: usize,
    ) -> Result<BatchResult, RetryFailure> {
        let (batch, attempts) = retry_async(self.policy, "copy batch", move || {
            self.try_copy_batch(source, target, checkpoint, batch_size)
        })
        .await?;

        if attempts > 1 {
            debug!(source, target, attempts, "batch copied after retries");
        }
        if !batch.documents_failed.is_empty() {
            warn!(
                source,
                target,
                failed = batch.failed_count(),
                attempted = batch.documents_attempted,
                "documents rejected by the target index"
            );
        }
        Ok(batch)
    }

    async fn try_copy_batch(
        &self,
        source: &str,
        target: &str,
        checkpoint: Option<&Checkpoint>,
        batch_size: usize,
    ) -> Result<BatchResult, GatewayError> {
        // one extra document tells us whether another chunk follows
        let mut documents = self
            .gateway
            .read_page(source, checkpoint, batch_size.saturating_add(1))
            .await?;
        let exhausted = documents.len() <= batch_size;
        documents.truncate(batch_size);

        let Some(last) = documents.last() else {
            return Ok(BatchResult::empty(checkpoint.cloned()));
        };
        let next_checkpoint = Some(last.sort_key.clone());

        let failures = self.gateway.write_page(target, &documents).await?;
        let attempted = documents.len() as u64;
        Ok(BatchResult {
            documents_attempted: attempted,
            documents_succeeded: attempted.saturating_sub(failures.len() as u64),
            documents_failed: failures,
            next_checkpoint,
            exhausted,
        })
    }
}
