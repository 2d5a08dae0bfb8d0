//! Span helpers for job transitions.

use tracing::Span;

use crate::entity::EntityKey;

/// Start a span for one transactional transition.
///
/// `job.from` is declared empty and filled by [`record_status_change`] once
/// the current record has been read.
pub fn start_transition_span(transition: &str, key: &EntityKey) -> Span {
    tracing::info_span!(
        "job.transition",
        "job.transition" = transition,
        "job.kind" = %key.kind,
        "job.id" = %key.id,
        "job.from" = tracing::field::Empty,
    )
}

/// Record the status change on the span and emit an event inside it.
pub fn record_status_change(span: &Span, from: &str, to: &str) {
    span.record("job.from", from);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "status_change");
    });
}
