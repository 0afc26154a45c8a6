//! Per-profile span helpers.
//!
//! Provides span creation and status-transition recording for profiles
//! flowing through the worker loop.

use tracing::Span;

use crate::model::Owner;

/// Start a span covering one profile, from gate check to enqueued update.
///
/// The `profile.outcome` field is declared empty and filled in once the
/// fetch is classified.
pub fn start_profile_span(username: &str, owner: &Owner) -> Span {
    tracing::info_span!(
        "profile.process",
        "profile.username" = username,
        "worker.host" = %owner.hostname,
        "worker.instance" = %owner.instance_id,
        "profile.outcome" = tracing::field::Empty,
    )
}

/// Record the classified outcome on a profile span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("profile.outcome", outcome);
}

/// Record a status transition event on the given span.
///
/// Emits a tracing `info` event scoped to the given span.
pub fn record_status_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "status_transition");
    });
}
