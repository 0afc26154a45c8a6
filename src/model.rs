//! Core data model.
//!
//! A work item is one profile to crawl. It has identity (the username), a
//! lifecycle status, and, while claimed, the owner holding the lease.

pub mod profile;
pub mod work;

pub use profile::ProfileRecord;
pub use work::{Owner, PendingUpdate, Status, WorkItem};
