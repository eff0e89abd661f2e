//! Backend protocol value types.
//!
//! The shapes exchanged with the proof-assistant process: add/edit-at
//! outcomes, asynchronous feedback events, goal structures, and Ltac
//! profiling results. The wire codec itself lives behind
//! [`CoqTransport`](crate::transport::CoqTransport); these are the decoded
//! values.

use serde::{Deserialize, Serialize};

/// Identifier the backend assigns to each accepted sentence.
///
/// Stable until the sentence is cancelled by an edit-at.
pub type StateId = u64;

/// Feedback route identifier.
///
/// Carried on feedback events; this client runs a single route and does not
/// branch on it.
pub type RouteId = u32;

/// Identifier of an in-flight edit, echoed by edit feedback.
pub type EditId = u32;

/// A character span within a submitted command's text.
///
/// Offsets count characters from the start of the command, half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub stop: usize,
}

/// Successful response to an add-command request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOutcome {
    /// State assigned to the newly accepted sentence.
    pub state_id: StateId,
    /// When present, the backend moved its focus to this pre-existing state
    /// instead of the new sentence (continuing an open proof branch).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unfocused_state_id: Option<StateId>,
}

/// Successful response to an edit-at request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EditAtOutcome {
    /// Present when the edit-at landed inside an existing proof: the target
    /// keeps its closing stack, delimited by the named Qed state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_focus: Option<FocusJump>,
}

/// Delimits the closing stack kept by an in-proof edit-at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusJump {
    pub qed_state_id: StateId,
}

/// Execution status of a sentence, as reported by backend feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentenceStatus {
    /// Submitted, not yet picked up by a worker.
    ProcessingInput,
    Processed,
    Incomplete,
    Complete,
    InProgress,
    Error,
}

/// Severity of a backend message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
}

/// Asynchronous event pushed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Feedback {
    /// A sentence's execution status changed.
    StateStatus {
        state_id: StateId,
        route: RouteId,
        status: SentenceStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        worker: Option<String>,
    },
    /// A sentence failed; `span` locates the error within its text and
    /// `rich` carries the pretty-printer's markup rendering of the message.
    StateError {
        state_id: StateId,
        route: RouteId,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        span: Option<TextSpan>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rich: Option<String>,
    },
    /// Echo for an in-flight edit. Received but not acted upon.
    EditFeedback {
        edit_id: EditId,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Free-form output to surface in the editor; `rich` carries the markup
    /// rendering when the backend produced one.
    Message {
        level: MessageLevel,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        rich: Option<String>,
    },
    /// A proof worker changed state.
    WorkerStatus { worker: String, status: String },
    /// A compiled dependency was recorded for a file.
    FileDependency {
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        dependency: String,
    },
    /// A module finished loading.
    FileLoaded { module: String, filename: String },
    /// Ltac profiling results for a sentence.
    LtacProf {
        state_id: StateId,
        route: RouteId,
        results: LtacProfResults,
    },
    /// The backend connection closed; `error` is set on abnormal closure.
    Closed {
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Aggregated Ltac profiling data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LtacProfResults {
    pub total_time: f64,
    pub tactics: Vec<LtacProfTactic>,
}

/// Per-tactic profiling entry; children are nested invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LtacProfTactic {
    pub name: String,
    pub total: f64,
    pub local: f64,
    pub num_calls: u32,
    pub max_total: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<LtacProfTactic>,
}

/// Response to a goal request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GoalAnswer {
    /// No proof is open at the current state.
    NoProof,
    /// An open proof with its goal stacks.
    Proof(ProofState),
}

/// Goal stacks of an open proof.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProofState {
    pub goals: Vec<Goal>,
    pub background: Vec<Goal>,
    pub shelved: Vec<Goal>,
    pub abandoned: Vec<Goal>,
}

/// A single goal: hypotheses above the line, conclusion below.
///
/// Text is carried as produced by the backend pretty-printer; rendering is
/// the editor's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: u32,
    pub hypotheses: Vec<String>,
    pub conclusion: String,
}
