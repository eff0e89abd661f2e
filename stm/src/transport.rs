//! Backend transport abstraction.
//!
//! The [`CoqTransport`] trait enables dependency injection for testing:
//! production code wires in a process-backed implementation while tests use
//! [`MockCoqBackend`](crate::test::MockCoqBackend). The transport owns the
//! wire codec and the backend process handle; the state machine only sees
//! decoded values.

use crate::protocol::{
    AddOutcome, EditAtOutcome, Feedback, GoalAnswer, LtacProfResults, StateId, TextSpan,
};
use async_trait::async_trait;
use futures::Stream;
use snafu::Snafu;
use std::pin::Pin;

/// Result type for transport requests.
pub type CallResult<T> = Result<T, CallFailure>;

/// How a backend request can fail.
///
/// Callers branch on the variants: a [`CallFailure::Fail`] is a recoverable
/// command rejection, [`CallFailure::Interrupted`] yields a neutral result,
/// and [`CallFailure::Closed`] means the backend is gone.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum CallFailure {
    /// The backend rejected the request.
    #[snafu(display("command rejected: {message}"))]
    Fail {
        /// State to edit-at before retrying, when the backend names one.
        state_id: Option<StateId>,
        message: String,
        /// Error location within the submitted text.
        span: Option<TextSpan>,
    },

    /// The request was aborted by an interrupt.
    #[snafu(display("request interrupted"))]
    Interrupted,

    /// The backend connection is closed.
    #[snafu(display("backend closed: {}", error.as_deref().unwrap_or("no error reported")))]
    Closed { error: Option<String> },
}

/// Request/response plus feedback-stream interface to the proof assistant.
///
/// Implementations must be safe to share behind an `Arc`; the state machine
/// serializes its own requests, so no request-level locking is required
/// here beyond what the wire demands.
#[async_trait]
pub trait CoqTransport: Send + Sync {
    /// Submit one command for the given parent state.
    ///
    /// `version` is the editor document version the command was read from.
    async fn add(
        &self,
        text: &str,
        version: u64,
        parent: StateId,
        verbose: bool,
    ) -> CallResult<AddOutcome>;

    /// Move backend execution to an earlier state, cancelling later work.
    async fn edit_at(&self, state_id: StateId) -> CallResult<EditAtOutcome>;

    /// Fetch the goal structure at the current execution tip.
    async fn goal(&self) -> CallResult<GoalAnswer>;

    /// Run a read-only query, optionally scoped to a state.
    async fn query(&self, text: &str, state_id: Option<StateId>) -> CallResult<String>;

    /// Ask the backend to abort in-progress work.
    async fn interrupt(&self) -> CallResult<()>;

    /// Request a graceful backend exit.
    async fn quit(&self) -> CallResult<()>;

    /// Reset the backend, returning the fresh root state.
    async fn reset(&self) -> CallResult<StateId>;

    /// Inform the backend pretty-printer of the display width.
    async fn resize_window(&self, columns: u16) -> CallResult<()>;

    /// Fetch Ltac profiling results, scoped to a state or global.
    async fn ltac_profiling(&self, state_id: Option<StateId>) -> CallResult<LtacProfResults>;

    /// Subscribe to asynchronous feedback events.
    ///
    /// Returns a stream that ends when the backend connection closes.
    fn subscribe_feedback(&self) -> Pin<Box<dyn Stream<Item = Feedback> + Send>>;

    /// Tear the transport down immediately.
    async fn dispose(&self);

    /// Feedback events buffered but not yet consumed via subscription.
    ///
    /// Only implemented by test transports; production transports push
    /// through the subscription stream and return nothing here.
    #[cfg(any(test, feature = "test-support"))]
    fn buffered_feedback(&self) -> Vec<Feedback> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_trait_is_object_safe() {
        // Compile-time check that CoqTransport can be used as a trait object
        let _: Option<Box<dyn CoqTransport>> = None;
    }

    #[test]
    fn call_failure_displays_fallback_state() {
        let failure = CallFailure::Fail {
            state_id: Some(2),
            message: "syntax error".to_string(),
            span: None,
        };
        assert_eq!(failure.to_string(), "command rejected: syntax error");

        let closed = CallFailure::Closed { error: None };
        assert!(closed.to_string().contains("no error reported"));
    }
}
