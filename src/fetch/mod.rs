//! Fetch adapter: wraps a profile source and classifies every lookup into a
//! fixed outcome taxonomy with a request-budget cost.
//!
//! Throttling is not always a typed failure. Some sources only mention it in
//! text they emit while working, so each lookup gets a [`Diagnostics`] buffer
//! and the adapter matches both the error message and the captured text
//! against [`RateLimitRules`].

pub mod instagram;
pub mod rules;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::model::ProfileRecord;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

pub use instagram::InstagramSource;
pub use rules::RateLimitRules;

// ---------------------------------------------------------------------------
// Source boundary
// ---------------------------------------------------------------------------

/// Side-channel text captured during one lookup.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    lines: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// How a source failed, as far as the source itself can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    NotFound,
    Private,
    Connection,
    BadRequest,
    Throttled,
    Other,
}

#[derive(Debug, Clone)]
pub struct SourceError {
    pub kind: SourceErrorKind,
    pub message: String,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Something that, given a username, returns its public profile summary.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn lookup(
        &self,
        username: &str,
        diagnostics: &mut Diagnostics,
    ) -> std::result::Result<ProfileRecord, SourceError>;
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Classified result of one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Collected,
    NotFound,
    Private,
    TransientError,
    RateLimited,
    UnknownError,
}

impl Outcome {
    /// Request-budget units charged for this outcome.
    pub fn cost(self) -> u32 {
        match self {
            Outcome::Collected | Outcome::NotFound | Outcome::Private => 1,
            Outcome::TransientError => 5,
            Outcome::UnknownError => 10,
            Outcome::RateLimited => 15,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Collected => "collected",
            Outcome::NotFound => "not_found",
            Outcome::Private => "private",
            Outcome::TransientError => "transient_error",
            Outcome::RateLimited => "rate_limited",
            Outcome::UnknownError => "unknown_error",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The normalized (data, outcome, cost) triple.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub record: Option<ProfileRecord>,
    pub outcome: Outcome,
    pub cost: u32,
}

impl FetchResult {
    fn new(record: Option<ProfileRecord>, outcome: Outcome) -> Self {
        Self {
            record,
            outcome,
            cost: outcome.cost(),
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct FetchAdapter {
    source: Arc<dyn ProfileSource>,
    rules: RateLimitRules,
}

impl FetchAdapter {
    pub fn new(source: Arc<dyn ProfileSource>, rules: RateLimitRules) -> Self {
        Self { source, rules }
    }

    /// Look up one profile. Never fails: every failure becomes an outcome.
    pub async fn fetch(&self, key: &str) -> FetchResult {
        let username = key.trim();
        let mut diagnostics = Diagnostics::new();

        info!(username, "fetching profile");
        let result = match self.source.lookup(username, &mut diagnostics).await {
            Ok(record) => FetchResult::new(Some(record), Outcome::Collected),
            Err(err) => {
                let outcome = self.classify(&err, &diagnostics);
                match outcome {
                    Outcome::NotFound => warn!(username, "profile does not exist"),
                    Outcome::Private => warn!(username, "profile is private"),
                    Outcome::RateLimited => warn!(username, error = %err, "rate limit detected"),
                    Outcome::TransientError => {
                        warn!(username, error = %err, "connection or request error")
                    }
                    _ => error!(username, error = %err, "unclassified fetch error"),
                }
                FetchResult::new(None, outcome)
            }
        };

        metrics::fetch_outcomes().add(1, &[KeyValue::new("outcome", result.outcome.as_str())]);
        result
    }

    /// Map a source failure onto the outcome taxonomy.
    pub fn classify(&self, err: &SourceError, diagnostics: &Diagnostics) -> Outcome {
        match err.kind {
            SourceErrorKind::NotFound => return Outcome::NotFound,
            SourceErrorKind::Private => return Outcome::Private,
            SourceErrorKind::Throttled => return Outcome::RateLimited,
            _ => {}
        }

        let noticed = !diagnostics.is_empty() && self.rules.matches(&diagnostics.text());
        if noticed || self.rules.matches(&err.message) {
            return Outcome::RateLimited;
        }

        match err.kind {
            SourceErrorKind::Connection | SourceErrorKind::BadRequest => Outcome::TransientError,
            _ => Outcome::UnknownError,
        }
    }
}
