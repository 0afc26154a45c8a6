//! The lease store: shared profile list, atomic claims, bulk resolution.
//!
//! Workers never talk to each other. Every claim is a compare-and-swap on
//! the stored status, so two workers racing for the same profile cannot
//! both win it.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::{ClaimStrategy, SweepPolicy};
use crate::error::Result;
use crate::model::{Owner, PendingUpdate, Status, WorkItem};

pub use memory::MemoryStore;

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Claim up to `limit` unclaimed profiles for `owner`.
    ///
    /// Returns only the keys this call actually moved to `processing`.
    /// Profiles won by a concurrent claimant are skipped silently. An empty
    /// result means nothing was left to claim.
    async fn claim_batch(
        &self,
        owner: &Owner,
        strategy: ClaimStrategy,
        limit: usize,
    ) -> Result<Vec<String>>;

    /// Release claims back to `not_collected`, clearing the owner fields.
    /// Returns how many were released.
    async fn reset_stale_claims(&self, policy: SweepPolicy) -> Result<u64>;

    /// Apply independent status transitions in one bulk write.
    /// Returns how many matched their guard and were written.
    async fn apply_updates(&self, updates: &[PendingUpdate]) -> Result<u64>;

    /// Number of profiles per status. Statuses with no profiles are absent.
    async fn count_by_status(&self) -> Result<BTreeMap<Status, u64>>;

    /// Insert profiles that are not yet tracked, as `not_collected`.
    /// Returns how many were new.
    async fn seed(&self, keys: &[String]) -> Result<u64>;

    /// Look up a single profile.
    async fn get(&self, key: &str) -> Result<WorkItem>;
}
