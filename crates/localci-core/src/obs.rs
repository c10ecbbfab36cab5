//! Structured lifecycle events for revision monitoring.
//!
//! Every event carries an `event` field so JSON log pipelines can filter on
//! it. Events are emitted inside the repository span from [`repo_span`], so
//! they inherit the `repo` field.

use tracing::{debug, error, info, warn};

/// Span covering everything a monitor does for one repository.
pub fn repo_span(url: &str) -> tracing::Span {
    tracing::info_span!("localci.repo", repo = %url)
}

/// Emit event: a revision was handed to the dispatcher.
pub fn emit_revision_dispatched(revision: &str, fingerprint: &str) {
    info!(event = "revision.dispatched", revision = %revision, fingerprint = %fingerprint);
}

/// Emit event: a revision was not dispatched this cycle.
pub fn emit_revision_skipped(revision: &str, reason: &str) {
    debug!(event = "revision.skipped", revision = %revision, reason = %reason);
}

/// Emit event: a change request failed its eligibility gate.
pub fn emit_revision_ineligible(revision: &str, reason: &str) {
    debug!(event = "revision.ineligible", revision = %revision, reason = %reason);
}

/// Emit event: the stage pipeline of a revision finished.
pub fn emit_test_finished(revision: &str, success: bool, duration_ms: u64) {
    if success {
        info!(event = "test.finished", revision = %revision, success, duration_ms);
    } else {
        warn!(event = "test.finished", revision = %revision, success, duration_ms);
    }
}

/// Emit event: a revision could not be tested at all.
pub fn emit_test_error(revision: &str, error: &dyn std::fmt::Display) {
    error!(event = "test.error", revision = %revision, error = %error);
}

/// Emit event: a source-control query failed during discovery.
pub fn emit_discovery_failed(what: &str, error: &dyn std::fmt::Display) {
    warn!(event = "discovery.failed", what = %what, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_span_enter() {
        let span = repo_span("https://github.com/org/project");
        let _entered = span.enter();
        emit_revision_dispatched("pr-1", "abc");
    }
}
