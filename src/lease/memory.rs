//! In-process lease store with the same claim semantics as Postgres.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::IteratorRandom;
use tokio::sync::Mutex;

use super::LeaseStore;
use crate::config::{ClaimStrategy, SweepPolicy, partition_slot};
use crate::error::{Error, Result};
use crate::model::{Owner, PendingUpdate, Status, WorkItem};

/// Profiles held in a mutex-guarded map. Selection and status swap happen
/// under one lock, which makes each claim atomic.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<String, WorkItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-loaded with unclaimed profiles.
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = keys
            .into_iter()
            .map(|key| {
                let item = WorkItem::new(key);
                (item.key.clone(), item)
            })
            .collect();
        Self {
            items: Mutex::new(items),
        }
    }

    /// Put an item in place as-is, replacing any existing one.
    pub async fn insert(&self, item: WorkItem) {
        self.items.lock().await.insert(item.key.clone(), item);
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn claim_batch(
        &self,
        owner: &Owner,
        strategy: ClaimStrategy,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut items = self.items.lock().await;

        let unclaimed = items
            .values()
            .filter(|item| item.status == Status::NotCollected)
            .filter(|item| match strategy {
                ClaimStrategy::Sample => true,
                ClaimStrategy::Partition { index, count } => {
                    partition_slot(&item.key, count) == index
                }
            })
            .map(|item| item.key.clone());

        let selected: Vec<String> = match strategy {
            ClaimStrategy::Sample => unclaimed.choose_multiple(&mut rand::rng(), limit),
            ClaimStrategy::Partition { .. } => unclaimed.take(limit).collect(),
        };

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(selected.len());
        for key in selected {
            if let Some(item) = items.get_mut(&key) {
                if item.status != Status::NotCollected {
                    continue;
                }
                item.status = Status::Processing;
                item.owner = Some(owner.hostname.clone());
                item.instance_id = Some(owner.instance_id);
                item.claimed_at = Some(now);
                item.updated_at = now;
                claimed.push(key);
            }
        }
        Ok(claimed)
    }

    async fn reset_stale_claims(&self, policy: SweepPolicy) -> Result<u64> {
        let cutoff = policy.cutoff(Utc::now())?;

        let now = Utc::now();
        let mut released = 0;
        for item in self.items.lock().await.values_mut() {
            if item.status != Status::Processing {
                continue;
            }
            let stale = match (cutoff, item.claimed_at) {
                (None, _) => true,
                (Some(cutoff), Some(claimed_at)) => claimed_at < cutoff,
                // A claim without a timestamp can never be attributed; release it.
                (Some(_), None) => true,
            };
            if stale {
                item.status = Status::NotCollected;
                item.owner = None;
                item.instance_id = None;
                item.claimed_at = None;
                item.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn apply_updates(&self, updates: &[PendingUpdate]) -> Result<u64> {
        let mut items = self.items.lock().await;
        let mut applied = 0;
        for update in updates {
            let Some(item) = items.get_mut(&update.key) else {
                continue;
            };
            if update.expected.is_some_and(|expected| item.status != expected) {
                continue;
            }
            if update
                .expected_instance
                .is_some_and(|holder| item.instance_id != Some(holder))
            {
                continue;
            }
            item.status = update.status;
            item.owner = None;
            item.instance_id = None;
            item.claimed_at = None;
            item.updated_at = update.stamped_at;
            if update.processed_by.is_some() {
                item.processed_by = update.processed_by.clone();
            }
            if update.profile.is_some() {
                item.profile = update.profile.clone();
            }
            applied += 1;
        }
        Ok(applied)
    }

    async fn count_by_status(&self) -> Result<BTreeMap<Status, u64>> {
        let mut counts = BTreeMap::new();
        for item in self.items.lock().await.values() {
            *counts.entry(item.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn seed(&self, keys: &[String]) -> Result<u64> {
        let mut items = self.items.lock().await;
        let mut inserted = 0;
        for key in keys {
            if !items.contains_key(key) {
                items.insert(key.clone(), WorkItem::new(key.clone()));
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn get(&self, key: &str) -> Result<WorkItem> {
        self.items
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }
}
