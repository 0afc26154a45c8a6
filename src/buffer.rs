//! Update buffer: pending status transitions written to the store in bulk.
//!
//! A flush always empties the buffer, even when the write fails. A lost
//! transition leaves its profile in `processing`, where the next startup
//! sweep releases it for another attempt.

use opentelemetry::KeyValue;
use tracing::{error, info};

use crate::lease::LeaseStore;
use crate::model::PendingUpdate;
use crate::telemetry::metrics;

pub struct UpdateBuffer {
    pending: Vec<PendingUpdate>,
    threshold: usize,
    flushes: u64,
}

impl UpdateBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            pending: Vec::with_capacity(threshold),
            threshold: threshold.max(1),
            flushes: 0,
        }
    }

    /// Queue a transition. Returns true once the buffer is due for a flush.
    pub fn enqueue(&mut self, update: PendingUpdate) -> bool {
        self.pending.push(update);
        self.should_flush()
    }

    pub fn should_flush(&self) -> bool {
        self.pending.len() >= self.threshold
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> &[PendingUpdate] {
        &self.pending
    }

    /// Number of non-empty flushes sent to the store, failed ones included.
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Write everything pending in one bulk operation and clear the buffer.
    ///
    /// Returns false if the store rejected the write; the updates are
    /// dropped either way.
    pub async fn flush(&mut self, store: &dyn LeaseStore) -> bool {
        if self.pending.is_empty() {
            return true;
        }

        let batch = std::mem::take(&mut self.pending);
        self.flushes += 1;
        info!(count = batch.len(), "flushing pending updates");

        match store.apply_updates(&batch).await {
            Ok(applied) => {
                info!(count = batch.len(), applied, "batch flushed");
                metrics::flushes().add(1, &[KeyValue::new("result", "ok")]);
                true
            }
            Err(e) => {
                error!(count = batch.len(), error = %e, "batch flush failed, dropping updates");
                metrics::flushes().add(1, &[KeyValue::new("result", "failed")]);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;

    use super::*;
    use crate::config::{ClaimStrategy, SweepPolicy};
    use crate::error::{Error, Result};
    use crate::lease::MemoryStore;
    use crate::model::{Owner, Status, WorkItem};

    /// Rejects every bulk write.
    struct RejectingStore;

    #[async_trait]
    impl LeaseStore for RejectingStore {
        async fn claim_batch(&self, _: &Owner, _: ClaimStrategy, _: usize) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn reset_stale_claims(&self, _: SweepPolicy) -> Result<u64> {
            Ok(0)
        }

        async fn apply_updates(&self, _: &[PendingUpdate]) -> Result<u64> {
            Err(Error::Database(sqlx::Error::PoolTimedOut))
        }

        async fn count_by_status(&self) -> Result<BTreeMap<Status, u64>> {
            Ok(BTreeMap::new())
        }

        async fn seed(&self, _: &[String]) -> Result<u64> {
            Ok(0)
        }

        async fn get(&self, key: &str) -> Result<WorkItem> {
            Err(Error::NotFound(key.to_string()))
        }
    }

    #[test]
    fn reports_due_exactly_at_threshold() {
        let mut buffer = UpdateBuffer::new(3);
        assert!(!buffer.enqueue(PendingUpdate::new("a", Status::Collected)));
        assert!(!buffer.enqueue(PendingUpdate::new("b", Status::Collected)));
        assert!(buffer.enqueue(PendingUpdate::new("c", Status::Collected)));
    }

    #[tokio::test]
    async fn empty_flush_skips_the_store() {
        let store = MemoryStore::new();
        let mut buffer = UpdateBuffer::new(2);
        assert!(buffer.flush(&store).await);
        assert_eq!(buffer.flushes(), 0);
    }

    #[tokio::test]
    async fn flush_applies_and_clears() {
        let store = MemoryStore::with_keys(["a", "b"]);
        let mut buffer = UpdateBuffer::new(10);
        buffer.enqueue(PendingUpdate::new("a", Status::NotFound));
        buffer.enqueue(PendingUpdate::new("b", Status::Private));

        assert!(buffer.flush(&store).await);
        assert!(buffer.is_empty());
        assert_eq!(buffer.flushes(), 1);
        assert_eq!(store.get("a").await.unwrap().status, Status::NotFound);
        assert_eq!(store.get("b").await.unwrap().status, Status::Private);
    }

    #[tokio::test]
    async fn failed_flush_drops_the_batch() {
        let mut buffer = UpdateBuffer::new(10);
        buffer.enqueue(PendingUpdate::new("a", Status::Collected));
        buffer.enqueue(PendingUpdate::new("b", Status::NotFound));

        assert!(!buffer.flush(&RejectingStore).await);
        assert!(buffer.is_empty());
        assert_eq!(buffer.flushes(), 1);

        // The buffer stays usable after a failure.
        assert!(!buffer.enqueue(PendingUpdate::new("c", Status::Private)));
        assert_eq!(buffer.len(), 1);
    }
}
