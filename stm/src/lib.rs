//! Sentence-level session management for a Coq-style proof assistant.
//!
//! The state machine keeps an in-memory model of which prefixes and
//! sub-trees of a proof script the backend has accepted, issues
//! add/edit-at/query requests one at a time over an asynchronous protocol,
//! and reconciles concurrent document edits against in-flight and accepted
//! work.
//!
//! # Architecture
//!
//! ```text
//! CoqTransport trait (abstraction)
//!   |
//!   +-- process-backed transport (embedder-provided)
//!   +-- MockCoqBackend (testing)
//!
//! Stm -- owns --> SentenceTree / FeedbackBuffer
//!     -- notifies --> EditorCallbacks (editor adapter)
//!     -- consumes --> CommandSource (sentence parser)
//! ```
//!
//! # Testing Strategy
//!
//! Mock-first: the scripted [`test::MockCoqBackend`] stands in for the
//! backend, with feedback delivered either through a background listener or
//! drained synchronously for deterministic tests.

pub mod editor;
pub mod error;
pub mod feedback;
pub mod machine;
pub mod protocol;
pub mod sentence;
pub mod transport;
pub mod tree;

// Make test utilities available for both unit and integration tests
#[cfg(any(test, feature = "test-support"))]
pub mod test;

pub use editor::*;
pub use error::*;
pub use feedback::*;
pub use lsp_types;
pub use machine::*;
pub use protocol::*;
pub use sentence::*;
pub use transport::*;
pub use tree::*;
