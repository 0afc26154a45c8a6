//! # biocrawl
//!
//! Distributed profile-bio crawler. Many worker processes share one
//! Postgres work list: each claims a batch of usernames, fetches the public
//! profile, forwards it to an ingestion API, and records the outcome.
//! Workers pace themselves against the upstream's rate limits and ask to be
//! restarted on a new network identity when throttled.

pub mod buffer;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod governor;
pub mod ingest;
pub mod lease;
pub mod model;
pub mod rotation;
pub mod seed;
pub mod telemetry;
