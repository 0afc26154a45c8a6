//! Work item, status lifecycle, and deferred status transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::ProfileRecord;

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// One profile tracked in the lease store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// The username. Stable for the item's lifetime.
    pub key: String,

    /// Current lifecycle status.
    pub status: Status,

    /// Hostname of the worker holding the claim, if claimed.
    pub owner: Option<String>,

    /// Process instance holding the claim, if claimed.
    pub instance_id: Option<Uuid>,

    /// When the current claim began.
    pub claimed_at: Option<DateTime<Utc>>,

    /// Hostname of the worker that last resolved the item.
    pub processed_by: Option<String>,

    /// Collected attributes. Only set once the item resolved as collected.
    pub profile: Option<ProfileRecord>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// A fresh, unclaimed item.
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            status: Status::NotCollected,
            owner: None,
            instance_id: None,
            claimed_at: None,
            processed_by: None,
            profile: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a work item, stored under its label.
///
/// `NotCollected` is the unclaimed state, `Processing` the claimed one; all
/// other variants are done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Waiting for a worker.
    NotCollected,
    /// Claimed by a worker.
    Processing,
    /// Fetched and forwarded downstream.
    Collected,
    /// The profile does not exist.
    #[serde(rename = "profile_not_exists")]
    NotFound,
    /// The profile exists but is not accessible.
    #[serde(rename = "private_profile")]
    Private,
    /// Gave up after an unclassified failure.
    Error,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::NotCollected,
        Status::Processing,
        Status::Collected,
        Status::NotFound,
        Status::Private,
        Status::Error,
    ];

    /// Is this a done state?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Collected | Status::NotFound | Status::Private | Status::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::NotCollected => "not_collected",
            Status::Processing => "processing",
            Status::Collected => "collected",
            Status::NotFound => "profile_not_exists",
            Status::Private => "private_profile",
            Status::Error => "error",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::InvalidStatus(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Owner
// ---------------------------------------------------------------------------

/// Identity of one worker process: the host plus a per-process instance id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub hostname: String,
    pub instance_id: Uuid,
}

impl Owner {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            instance_id: Uuid::new_v4(),
        }
    }

    /// Hostname from `HOSTNAME`, then `COMPUTERNAME`, else "unknown".
    pub fn from_env() -> Self {
        let hostname = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        Self::new(hostname)
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.hostname, &self.instance_id.to_string()[..8])
    }
}

// ---------------------------------------------------------------------------
// Pending Update
// ---------------------------------------------------------------------------

/// A deferred status transition, applied on the next buffer flush.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    pub key: String,
    /// Apply only while the item is still in this status.
    pub expected: Option<Status>,
    /// Apply only while this process instance still holds the claim.
    pub expected_instance: Option<Uuid>,
    pub status: Status,
    pub processed_by: Option<String>,
    pub profile: Option<ProfileRecord>,
    pub stamped_at: DateTime<Utc>,
}

impl PendingUpdate {
    pub fn new(key: impl Into<String>, status: Status) -> Self {
        Self {
            key: key.into(),
            expected: None,
            expected_instance: None,
            status,
            processed_by: None,
            profile: None,
            stamped_at: Utc::now(),
        }
    }

    /// Resolve a claim held by `owner`. Guarded on the item still being
    /// claimed by that same process instance.
    pub fn resolve(key: impl Into<String>, status: Status, owner: &Owner) -> Self {
        let mut update = Self::new(key, status)
            .guarded(Status::Processing)
            .processed_by(&owner.hostname);
        update.expected_instance = Some(owner.instance_id);
        update
    }

    pub fn guarded(mut self, status: Status) -> Self {
        self.expected = Some(status);
        self
    }

    pub fn processed_by(mut self, hostname: impl Into<String>) -> Self {
        self.processed_by = Some(hostname.into());
        self
    }

    pub fn profile(mut self, profile: ProfileRecord) -> Self {
        self.profile = Some(profile);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_round_trip() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("queued".parse::<Status>().is_err());
    }

    #[test]
    fn serde_uses_stored_labels() {
        let json = serde_json::to_string(&Status::NotFound).unwrap();
        assert_eq!(json, "\"profile_not_exists\"");
        let json = serde_json::to_string(&Status::NotCollected).unwrap();
        assert_eq!(json, "\"not_collected\"");
    }

    #[test]
    fn only_resolved_statuses_are_terminal() {
        assert!(!Status::NotCollected.is_terminal());
        assert!(!Status::Processing.is_terminal());
        assert!(Status::Collected.is_terminal());
        assert!(Status::Private.is_terminal());
    }

    #[test]
    fn resolve_guards_on_processing() {
        let owner = Owner::new("host-a");
        let update = PendingUpdate::resolve("alice", Status::Collected, &owner);
        assert_eq!(update.expected, Some(Status::Processing));
        assert_eq!(update.expected_instance, Some(owner.instance_id));
        assert_eq!(update.processed_by.as_deref(), Some("host-a"));
    }
}
