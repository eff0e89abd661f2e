//! The sentence state machine.
//!
//! [`Stm`] mediates between the editor and the proof-assistant backend: it
//! owns the sentence tree, issues add/edit-at/query requests one at a time,
//! demultiplexes asynchronous feedback onto sentences, and reconciles
//! document edits against accepted work.
//!
//! # Serialization
//!
//! Every public operation serializes on one async guard, so a new operation
//! always observes the state left by the previous one. The mutable state
//! itself lives in an inner struct behind a `parking_lot::Mutex` that is
//! never held across an await; feedback handlers therefore mutate the same
//! state whether they run on the background listener task or inline from a
//! test drain.

use crate::editor::{CommandSource, CommandToken, EditorCallbacks, TextEdit};
use crate::error::{FailValue, Result, StmError};
use crate::feedback::{BufferedFeedback, FeedbackBuffer};
use crate::protocol::{Feedback, GoalAnswer, ProofState, SentenceStatus, StateId};
use crate::sentence::{Sentence, SentenceId};
use crate::transport::{CallFailure, CoqTransport};
use crate::tree::SentenceTree;
use futures::lock::Mutex as AsyncMutex;
use futures::StreamExt;
use lsp_types::{Position, Range};
use parking_lot::Mutex;
use serde::Deserialize;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use text_util::{
    position_at_relative, position_is_after, position_is_after_or_equal, position_is_before,
    position_is_equal, range_delta, RangeDelta,
};

/// Construction-time options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StmOptions {
    /// Verbosity flag passed to the backend for adds issued by
    /// [`Stm::interpret_to_point`].
    pub verbose_default: bool,
    /// Pretty-printer width applied during lazy initialization.
    pub display_columns: Option<u16>,
}

/// Outcome of a single forward step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// One sentence was accepted under this state id.
    Added(StateId),
    /// The parser produced no command starting at the focus.
    NoCommand,
    /// The backend was interrupted; nothing was added.
    Interrupted,
}

/// Goal structure at the execution tip, in a shape stable across backends.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProofView {
    /// Where the execution tip sits in the document.
    pub focus: Option<Position>,
    /// The open proof, absent outside proofs or when the backend is not
    /// ready.
    pub proof: Option<ProofState>,
}

/// One row of [`Stm::get_sentences`] diagnostic output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceSummary {
    pub state_id: StateId,
    pub range: Range,
    pub status: SentenceStatus,
    pub elapsed: Duration,
}

/// One row of [`Stm::get_sentence_errors`] diagnostic output.
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceErrorReport {
    pub sentence_range: Range,
    pub error_range: Option<Range>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Running,
    Disposed,
}

struct DocState {
    tree: SentenceTree,
    /// The backend's execution tip; where the next add attaches.
    focused: SentenceId,
    /// Greatest range end across the tree; anchor for edit reconciliation.
    last: SentenceId,
    pending_feedback: FeedbackBuffer,
}

impl DocState {
    /// Ids stored in `focused`, `last`, and parent/child links always name
    /// live arena slots.
    fn sentence(&self, id: SentenceId) -> &Sentence {
        self.tree.get(id).expect("held sentence ids are live")
    }
}

struct StmInner {
    phase: Phase,
    /// Latest editor document version, stamped on add requests.
    version: u64,
    doc: Option<DocState>,
}

/// The sentence transactional machine.
///
/// Both collaborators are injected at construction: the backend transport
/// and the editor callback set. There are no globals, so multiple machines
/// can coexist (one per document).
pub struct Stm {
    transport: Arc<dyn CoqTransport>,
    callbacks: Arc<dyn EditorCallbacks>,
    options: StmOptions,
    /// Serializes public operations across their suspension points.
    op_guard: AsyncMutex<()>,
    inner: Arc<Mutex<StmInner>>,
}

impl Stm {
    pub fn new(
        transport: Arc<dyn CoqTransport>,
        callbacks: Arc<dyn EditorCallbacks>,
        options: StmOptions,
    ) -> Self {
        Self {
            transport,
            callbacks,
            options,
            op_guard: AsyncMutex::new(()),
            inner: Arc::new(Mutex::new(StmInner {
                phase: Phase::Uninitialized,
                version: 0,
                doc: None,
            })),
        }
    }

    /// Spawn the background task that pumps the transport's feedback stream
    /// into this machine.
    ///
    /// The task ends when the stream does. Tests that want deterministic
    /// delivery use [`Stm::drain_pending_feedback`] instead.
    pub fn start_feedback_listener(&self) {
        let mut stream = self.transport.subscribe_feedback();
        let inner = Arc::clone(&self.inner);
        let callbacks = Arc::clone(&self.callbacks);
        let transport = Arc::clone(&self.transport);

        smol::spawn(async move {
            while let Some(event) = stream.next().await {
                if Self::handle_feedback(&inner, callbacks.as_ref(), event) {
                    // The backend is gone; drop the transport's process
                    // handle as well, as the request-failure path does.
                    transport.dispose().await;
                    break;
                }
            }
        })
        .detach();
    }

    /// Synchronously process feedback buffered by a test transport.
    ///
    /// Returns the number of events processed.
    #[cfg(any(test, feature = "test-support"))]
    pub fn drain_pending_feedback(&self) -> usize {
        let events = self.transport.buffered_feedback();
        let count = events.len();
        for event in events {
            if Self::handle_feedback(&self.inner, self.callbacks.as_ref(), event) {
                smol::block_on(self.transport.dispose());
            }
        }
        count
    }

    // ---- Public operations -------------------------------------------------

    /// Submit the next command if the parser produces one starting exactly at
    /// the focus.
    pub async fn step_forward(
        &self,
        commands: &dyn CommandSource,
        verbose: bool,
    ) -> Result<StepResult> {
        let _op = self.op_guard.lock().await;
        self.validate().await?;

        let focus_end = self.with_doc(|doc| doc.sentence(doc.focused).range.end)?;
        let mut iter = commands.commands(focus_end, None);
        let Some(token) = iter.next() else {
            return Ok(StepResult::NoCommand);
        };
        if !position_is_equal(token.range.start, focus_end) {
            return Ok(StepResult::NoCommand);
        }

        self.submit_command(token, verbose).await
    }

    /// Cancel the focused sentence, moving the focus to its parent.
    pub async fn step_backward(&self) -> Result<()> {
        let _op = self.op_guard.lock().await;
        self.validate().await?;

        let parent = self.with_doc(|doc| doc.sentence(doc.focused).parent)?;
        match parent {
            Some(parent) => self.focus_sentence(parent).await,
            None => Ok(()), // already at the root
        }
    }

    /// Advance or rewind so the focus lands on the sentence nearest to `pos`.
    ///
    /// Returns the resulting focus position. The parser iterator is advanced
    /// one step ahead of each backend await and restarted whenever the focus
    /// jumps non-contiguously.
    pub async fn interpret_to_point(
        &self,
        pos: Position,
        commands: &dyn CommandSource,
    ) -> Result<Position> {
        let _op = self.op_guard.lock().await;
        self.validate().await?;

        let mut focus_end = self.with_doc(|doc| doc.sentence(doc.focused).range.end)?;
        let mut iter = commands.commands(focus_end, Some(pos));
        let mut pending = iter.next();

        while let Some(token) = pending.take() {
            if position_is_after(token.range.end, pos) {
                break;
            }
            // Pull the next candidate before awaiting so parsing overlaps
            // backend work.
            pending = iter.next();

            match self
                .submit_command(token, self.options.verbose_default)
                .await?
            {
                StepResult::Added(_) => {
                    focus_end = self.with_doc(|doc| doc.sentence(doc.focused).range.end)?;
                    let contiguous = pending
                        .as_ref()
                        .is_some_and(|next| position_is_equal(next.range.start, focus_end));
                    if !contiguous {
                        iter = commands.commands(focus_end, Some(pos));
                        pending = iter.next();
                    }
                }
                StepResult::Interrupted | StepResult::NoCommand => break,
            }
        }

        let focus_end = self.with_doc(|doc| doc.sentence(doc.focused).range.end)?;
        if position_is_after(focus_end, pos) {
            // The last accepted sentence overshot: fall back to the nearest
            // sentence ending at or before pos. The root always qualifies.
            let target = self.with_doc(|doc| {
                let mut target = doc.focused;
                for id in doc.tree.ancestors(doc.focused) {
                    target = id;
                    if doc.sentence(id).is_before(pos) {
                        break;
                    }
                }
                target
            })?;
            self.focus_sentence(target).await?;
        }

        self.with_doc(|doc| doc.sentence(doc.focused).range.end)
    }

    /// Reconcile a batch of document edits against the sentence tree.
    ///
    /// Edits are processed greatest start first, walking sentences from the
    /// last sentence up through its ancestors; sentences the edits land
    /// inside are cancelled, sentences after them are shifted.
    pub async fn apply_changes(&self, edits: &[TextEdit], new_version: u64) -> Result<()> {
        let _op = self.op_guard.lock().await;

        let running = {
            let mut guard = self.inner.lock();
            if guard.phase == Phase::Disposed {
                return Err(StmError::Disposed);
            }
            guard.version = new_version;
            guard.phase == Phase::Running
        };
        if !running || edits.is_empty() {
            return Ok(());
        }

        let mut deltas: Vec<RangeDelta> =
            edits.iter().map(|e| range_delta(e.range, &e.text)).collect();
        // Greatest start first: earlier edits then never shift later ones.
        deltas.sort_by(|a, b| {
            if position_is_before(a.range.start, b.range.start) {
                std::cmp::Ordering::Greater
            } else if position_is_equal(a.range.start, b.range.start) {
                std::cmp::Ordering::Equal
            } else {
                std::cmp::Ordering::Less
            }
        });

        let chain: Vec<SentenceId> =
            self.with_doc(|doc| doc.tree.ancestors(doc.last).collect())?;

        enum Walk {
            Continue,
            Stop,
            Cancel(SentenceId),
        }

        for id in chain {
            let step = self.with_doc(|doc| {
                let Some(sentence) = doc.tree.get(id) else {
                    // Removed by an earlier cancellation in this walk.
                    return Walk::Continue;
                };
                let end = sentence.range.end;
                deltas.retain(|d| position_is_before(d.range.start, end));
                if deltas.is_empty() {
                    return Walk::Stop;
                }
                match doc.tree.get_mut(id) {
                    Some(sentence) => {
                        if sentence.apply_text_changes(&deltas) {
                            Walk::Cancel(id)
                        } else {
                            Walk::Continue
                        }
                    }
                    None => Walk::Continue,
                }
            })?;

            match step {
                Walk::Stop => break,
                Walk::Cancel(id) => self.cancel_sentence(id).await?,
                Walk::Continue => {}
            }
        }

        Ok(())
    }

    /// Fetch the goal structure at the execution tip.
    ///
    /// Returns an empty view when the backend has not been started yet or
    /// the request was interrupted.
    pub async fn get_goal(&self) -> Result<ProofView> {
        let _op = self.op_guard.lock().await;

        {
            let guard = self.inner.lock();
            match guard.phase {
                Phase::Disposed => return Err(StmError::Disposed),
                Phase::Uninitialized => return Ok(ProofView::default()),
                Phase::Running => {}
            }
        }
        let focus = self.with_doc(|doc| doc.sentence(doc.focused).range.end).ok();

        match self.transport.goal().await {
            Ok(GoalAnswer::Proof(proof)) => Ok(ProofView {
                focus,
                proof: Some(proof),
            }),
            Ok(GoalAnswer::NoProof) => Ok(ProofView { focus, proof: None }),
            Err(CallFailure::Interrupted) => Ok(ProofView::default()),
            Err(CallFailure::Fail { message, .. }) => {
                tracing::debug!(%message, "goal request rejected");
                Ok(ProofView { focus, proof: None })
            }
            Err(CallFailure::Closed { error }) => Err(self.fatal_closed(error).await),
        }
    }

    /// Run a read-only query at the tip, or at the sentence containing `at`.
    pub async fn query(&self, text: &str, at: Option<Position>) -> Result<String> {
        let _op = self.op_guard.lock().await;
        self.validate().await?;

        let state_id = self.with_doc(|doc| {
            at.and_then(|pos| Self::sentence_at(doc, pos).map(|(state_id, _)| state_id))
        })?;

        match self.transport.query(text, state_id).await {
            Ok(answer) => Ok(answer),
            Err(CallFailure::Interrupted) => Ok(String::new()),
            Err(failure) => Err(self.lift_failure(failure).await),
        }
    }

    /// Ask the backend to abort in-progress work.
    ///
    /// Deliberately does not take the operation guard: the whole point is to
    /// run while another operation is in flight. That operation observes a
    /// neutral result instead of an error.
    pub async fn interrupt(&self) -> Result<()> {
        {
            let guard = self.inner.lock();
            match guard.phase {
                Phase::Disposed => return Err(StmError::Disposed),
                Phase::Uninitialized => return Ok(()),
                Phase::Running => {}
            }
        }
        if let Err(failure) = self.transport.interrupt().await {
            tracing::warn!(%failure, "interrupt request failed");
        }
        Ok(())
    }

    /// Request Ltac profiling data, scoped to the sentence containing `at`
    /// or global when `at` is `None`. Results arrive through
    /// [`EditorCallbacks::ltac_prof_results`].
    pub async fn request_ltac_prof(&self, at: Option<Position>) -> Result<()> {
        let _op = self.op_guard.lock().await;
        self.validate().await?;

        let scoped =
            self.with_doc(|doc| at.and_then(|pos| Self::sentence_at(doc, pos)))?;

        match self
            .transport
            .ltac_profiling(scoped.map(|(state_id, _)| state_id))
            .await
        {
            Ok(results) => {
                self.callbacks
                    .ltac_prof_results(scoped.map(|(_, range)| range), &results);
                Ok(())
            }
            Err(CallFailure::Interrupted) => Ok(()),
            Err(failure) => Err(self.lift_failure(failure).await),
        }
    }

    /// Tell the backend pretty-printer how wide the goal display is.
    pub async fn set_display_width(&self, columns: u16) -> Result<()> {
        let _op = self.op_guard.lock().await;
        self.validate().await?;

        match self.transport.resize_window(columns).await {
            Ok(()) | Err(CallFailure::Interrupted) => Ok(()),
            Err(failure) => Err(self.lift_failure(failure).await),
        }
    }

    /// Snapshot of every sentence for diagnostic reporting, in document
    /// order. The root is omitted.
    pub fn get_sentences(&self) -> Vec<SentenceSummary> {
        let guard = self.inner.lock();
        let Some(doc) = guard.doc.as_ref() else {
            return Vec::new();
        };
        doc.tree
            .descendants(doc.tree.root())
            .filter_map(|id| doc.tree.get(id))
            .map(|s| SentenceSummary {
                state_id: s.state_id,
                range: s.range,
                status: s.status,
                elapsed: s.started_at.elapsed(),
            })
            .collect()
    }

    /// Every recorded sentence error, in document order.
    pub fn get_sentence_errors(&self) -> Vec<SentenceErrorReport> {
        let guard = self.inner.lock();
        let Some(doc) = guard.doc.as_ref() else {
            return Vec::new();
        };
        doc.tree
            .descendants(doc.tree.root())
            .filter_map(|id| doc.tree.get(id))
            .filter_map(|s| {
                s.error.as_ref().map(|e| SentenceErrorReport {
                    sentence_range: s.range,
                    error_range: e.range,
                    message: e.message.clone(),
                })
            })
            .collect()
    }

    /// Document position of the execution tip, once running.
    pub fn focused_position(&self) -> Option<Position> {
        let guard = self.inner.lock();
        let doc = guard.doc.as_ref()?;
        doc.tree.get(doc.focused).map(|s| s.range.end)
    }

    /// Latest document version seen via [`Stm::apply_changes`].
    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().phase == Phase::Running
    }

    /// Graceful teardown: ask the backend to quit, then dispose.
    pub async fn shutdown(&self) -> Result<()> {
        let _op = self.op_guard.lock().await;

        let phase = self.inner.lock().phase;
        match phase {
            Phase::Disposed => return Err(StmError::Disposed),
            Phase::Running => {
                if let Err(failure) = self.transport.quit().await {
                    tracing::warn!(%failure, "quit request failed during shutdown");
                }
            }
            Phase::Uninitialized => {}
        }

        self.dispose_internal().await;
        Ok(())
    }

    /// Immediate teardown. Idempotent; afterwards every operation is refused.
    pub async fn dispose(&self) {
        self.dispose_internal().await;
    }

    // ---- Lifecycle ---------------------------------------------------------

    /// Readiness gate run by every backend-touching operation: fast check
    /// once running, backend reset plus root construction on first use.
    async fn validate(&self) -> Result<()> {
        {
            let guard = self.inner.lock();
            match guard.phase {
                Phase::Running => return Ok(()),
                Phase::Disposed => return Err(StmError::Disposed),
                Phase::Uninitialized => {}
            }
        }

        let root_state = match self.transport.reset().await {
            Ok(state_id) => state_id,
            Err(failure) => return Err(self.lift_failure(failure).await),
        };
        if let Some(columns) = self.options.display_columns {
            if let Err(failure) = self.transport.resize_window(columns).await {
                tracing::warn!(%failure, "failed to set display width during initialization");
            }
        }

        let mut guard = self.inner.lock();
        if guard.phase == Phase::Disposed {
            return Err(StmError::Disposed);
        }
        let tree = SentenceTree::new_root(root_state);
        let root = tree.root();
        guard.doc = Some(DocState {
            tree,
            focused: root,
            last: root,
            pending_feedback: FeedbackBuffer::new(),
        });
        guard.phase = Phase::Running;
        tracing::info!(root_state, "backend session initialized");
        Ok(())
    }

    async fn dispose_internal(&self) {
        let first = {
            let mut guard = self.inner.lock();
            let first = guard.phase != Phase::Disposed;
            guard.phase = Phase::Disposed;
            guard.doc = None;
            first
        };
        if first {
            self.transport.dispose().await;
            tracing::info!("session disposed");
        }
    }

    /// Fatal path for internal invariant violations: notify the editor,
    /// dispose, and hand back the error to re-raise.
    async fn fail_inconsistent(&self, detail: String) -> StmError {
        tracing::error!(%detail, "inconsistent state");
        self.callbacks
            .coq_died(Some(&format!("Inconsistent state: {detail}")));
        self.dispose_internal().await;
        StmError::Inconsistent { detail }
    }

    /// Fatal path for an unexpectedly closed backend.
    async fn fatal_closed(&self, error: Option<String>) -> StmError {
        let notify = {
            let mut guard = self.inner.lock();
            let was_running = guard.phase == Phase::Running;
            guard.phase = Phase::Disposed;
            guard.doc = None;
            was_running && error.is_some()
        };
        if notify {
            self.callbacks.coq_died(error.as_deref());
        }
        self.transport.dispose().await;
        StmError::BackendClosed { error }
    }

    /// Map a transport failure outside the add path onto an operation error.
    async fn lift_failure(&self, failure: CallFailure) -> StmError {
        match failure {
            CallFailure::Fail { message, .. } => StmError::Backend { message },
            CallFailure::Interrupted => StmError::Backend {
                message: "request interrupted".to_string(),
            },
            CallFailure::Closed { error } => self.fatal_closed(error).await,
        }
    }

    // ---- Add / focus / rewind ----------------------------------------------

    /// Submit one command whose range starts at the focus.
    async fn submit_command(&self, token: CommandToken, verbose: bool) -> Result<StepResult> {
        let (parent_state, focus_end, version) = {
            let guard = self.inner.lock();
            if guard.phase == Phase::Disposed {
                return Err(StmError::Disposed);
            }
            let Some(doc) = guard.doc.as_ref() else {
                return Err(StmError::Disposed);
            };
            let focus = doc.sentence(doc.focused);
            (focus.state_id, focus.range.end, guard.version)
        };

        if !position_is_equal(token.range.start, focus_end) {
            return Err(self
                .fail_inconsistent(format!(
                    "command at {}:{} does not start at the focused position {}:{}",
                    token.range.start.line,
                    token.range.start.character,
                    focus_end.line,
                    focus_end.character
                ))
                .await);
        }

        match self
            .transport
            .add(&token.text, version, parent_state, verbose)
            .await
        {
            Ok(outcome) => {
                let mut replayed: Vec<(Range, SentenceStatus)> = Vec::new();
                let added = {
                    let mut guard = self.inner.lock();
                    let Some(doc) = guard.doc.as_mut() else {
                        return Err(StmError::Disposed);
                    };
                    match doc.tree.add(
                        doc.focused,
                        token.text,
                        outcome.state_id,
                        token.range,
                        Instant::now(),
                    ) {
                        Some(id) => {
                            let last_end = doc.sentence(doc.last).range.end;
                            if position_is_after_or_equal(token.range.start, last_end) {
                                doc.last = id;
                            }

                            doc.focused = match outcome.unfocused_state_id {
                                Some(unfocused) => match doc.tree.by_state_id(unfocused) {
                                    Some(prior) => prior,
                                    None => {
                                        tracing::warn!(
                                            unfocused,
                                            "unknown unfocused state id; focusing new sentence"
                                        );
                                        id
                                    }
                                },
                                None => id,
                            };

                            // New ids become known exactly here: replay
                            // whatever feedback arrived early.
                            for entry in doc.pending_feedback.drain() {
                                match doc.tree.by_state_id(entry.state_id) {
                                    Some(sid) => {
                                        if let Some(s) = doc.tree.get_mut(sid) {
                                            s.update_status(entry.status);
                                            replayed.push((s.range, entry.status));
                                        }
                                    }
                                    None => doc.pending_feedback.push(entry),
                                }
                            }
                            true
                        }
                        None => false,
                    }
                };
                if !added {
                    return Err(self
                        .fail_inconsistent(
                            "focused sentence disappeared during add".to_string(),
                        )
                        .await);
                }
                for (range, status) in replayed {
                    self.callbacks.sentence_status_update(range, status);
                }
                Ok(StepResult::Added(outcome.state_id))
            }
            Err(CallFailure::Fail {
                state_id,
                message,
                span,
            }) => {
                if let Some(fallback) = state_id {
                    self.rewind_to_state(fallback).await;
                }
                let range = match span {
                    Some(sp) => Range::new(
                        position_at_relative(token.range.start, &token.text, sp.start),
                        position_at_relative(token.range.start, &token.text, sp.stop),
                    ),
                    None => token.range,
                };
                Err(StmError::Fail {
                    value: FailValue { message, range },
                })
            }
            Err(CallFailure::Interrupted) => Ok(StepResult::Interrupted),
            Err(CallFailure::Closed { error }) => Err(self.fatal_closed(error).await),
        }
    }

    /// Move the focus to `target`, telling the backend to edit-at it.
    ///
    /// No-op when `target` already has focus.
    async fn focus_sentence(&self, target: SentenceId) -> Result<()> {
        let already = self.with_doc(|doc| doc.focused == target)?;
        if already {
            return Ok(());
        }
        self.edit_at_and_rewind(target).await
    }

    /// Cancel one sentence (and thereby its descendants) by editing at its
    /// parent.
    async fn cancel_sentence(&self, id: SentenceId) -> Result<()> {
        let parent = self.with_doc(|doc| doc.tree.get(id).and_then(|s| s.parent))?;
        let Some(parent) = parent else {
            return Ok(()); // the root, or already removed
        };
        // Even when the focus already sits at the parent (cancelling inside
        // a kept closing stack), the backend still holds the later states.
        self.edit_at_and_rewind(parent).await
    }

    /// Issue edit-at for `target` and mirror the backend's answer in the
    /// tree: either keep the closing stack the backend names, or rewind the
    /// whole tree past `target`.
    async fn edit_at_and_rewind(&self, target: SentenceId) -> Result<()> {
        let state_id = self.with_doc(|doc| doc.sentence(target).state_id)?;

        match self.transport.edit_at(state_id).await {
            Ok(outcome) => {
                let cleared = self.with_doc(|doc| {
                    let removed = match outcome.new_focus {
                        Some(jump) => match doc.tree.by_state_id(jump.qed_state_id) {
                            Some(qed) if qed != target => {
                                let removed =
                                    doc.tree.remove_descendants_between(target, qed);
                                doc.focused = target;
                                removed
                            }
                            _ => {
                                tracing::warn!(
                                    qed_state_id = jump.qed_state_id,
                                    "unusable qed state id in edit-at answer; rewinding fully"
                                );
                                Self::rewind_doc(doc, target)
                            }
                        },
                        None => Self::rewind_doc(doc, target),
                    };
                    removed.into_iter().map(|s| s.range).collect::<Vec<_>>()
                })?;
                for range in cleared {
                    self.callbacks.clear_sentence(range);
                }
                Ok(())
            }
            Err(CallFailure::Fail {
                state_id: fallback,
                message,
                ..
            }) => {
                tracing::warn!(%message, "edit-at rejected by the backend");
                if let Some(fallback) = fallback {
                    self.rewind_to_state(fallback).await;
                }
                Ok(())
            }
            Err(CallFailure::Interrupted) => Ok(()),
            Err(CallFailure::Closed { error }) => Err(self.fatal_closed(error).await),
        }
    }

    /// Error-fallback path: edit-at the backend-named state and rewind the
    /// tree to it. Failures here are logged, not propagated; the original
    /// failure is what the caller reports.
    async fn rewind_to_state(&self, state_id: StateId) {
        let target = self
            .with_doc(|doc| doc.tree.by_state_id(state_id))
            .ok()
            .flatten();
        let Some(target) = target else {
            tracing::warn!(state_id, "fallback state id is unknown; skipping rewind");
            return;
        };

        if let Err(failure) = self.transport.edit_at(state_id).await {
            tracing::warn!(%failure, state_id, "edit-at to fallback state failed");
            return;
        }

        let cleared = self
            .with_doc(|doc| {
                Self::rewind_doc(doc, target)
                    .into_iter()
                    .map(|s| s.range)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        for range in cleared {
            self.callbacks.clear_sentence(range);
        }
    }

    /// Client-side rewind: drop everything past `target`.
    fn rewind_doc(doc: &mut DocState, target: SentenceId) -> Vec<Sentence> {
        let removed = doc.tree.truncate(target);
        doc.focused = target;
        doc.last = target;
        removed
    }

    // ---- Feedback ----------------------------------------------------------

    /// Demultiplex one feedback event onto the sentence tree.
    ///
    /// Runs on the listener task or inline from a test drain; either way the
    /// inner lock makes it atomic with respect to operations. Returns true
    /// when the event was a fatal backend closure: the caller owns the
    /// transport and must tear it down, as the request-failure path does.
    fn handle_feedback(
        inner: &Mutex<StmInner>,
        callbacks: &dyn EditorCallbacks,
        event: Feedback,
    ) -> bool {
        match event {
            Feedback::StateStatus {
                state_id,
                status,
                worker,
                ..
            } => {
                let range = {
                    let mut guard = inner.lock();
                    let Some(doc) = guard.doc.as_mut() else {
                        return false;
                    };
                    match doc.tree.by_state_id(state_id) {
                        Some(id) => doc.tree.get_mut(id).map(|s| {
                            s.update_status(status);
                            s.range
                        }),
                        None => {
                            tracing::debug!(state_id, "buffering status for unknown state id");
                            doc.pending_feedback.push(BufferedFeedback {
                                state_id,
                                status,
                                worker,
                            });
                            None
                        }
                    }
                };
                if let Some(range) = range {
                    callbacks.sentence_status_update(range, status);
                }
                false
            }

            Feedback::StateError {
                state_id,
                message,
                span,
                rich,
                ..
            } => {
                let located = {
                    let mut guard = inner.lock();
                    let Some(doc) = guard.doc.as_mut() else {
                        return false;
                    };
                    match doc.tree.by_state_id(state_id) {
                        Some(id) => doc.tree.get_mut(id).map(|s| {
                            let error_range = span.map(|sp| {
                                Range::new(
                                    position_at_relative(s.range.start, &s.text, sp.start),
                                    position_at_relative(s.range.start, &s.text, sp.stop),
                                )
                            });
                            s.update_status(SentenceStatus::Error);
                            s.set_error(message.clone(), error_range);
                            (s.range, error_range)
                        }),
                        None => {
                            tracing::warn!(
                                state_id,
                                %message,
                                "dropping error feedback for unknown state id"
                            );
                            None
                        }
                    }
                };
                if let Some((sentence_range, error_range)) = located {
                    callbacks.error(sentence_range, error_range, &message, rich.as_deref());
                }
                false
            }

            Feedback::Message { level, text, rich } => {
                callbacks.message(level, &text, rich.as_deref());
                false
            }

            Feedback::LtacProf {
                state_id, results, ..
            } => {
                let range = {
                    let guard = inner.lock();
                    guard.doc.as_ref().and_then(|doc| {
                        doc.tree
                            .by_state_id(state_id)
                            .and_then(|id| doc.tree.get(id))
                            .map(|s| s.range)
                    })
                };
                callbacks.ltac_prof_results(range, &results);
                false
            }

            Feedback::EditFeedback { edit_id, .. } => {
                tracing::debug!(edit_id, "ignoring edit feedback");
                false
            }

            Feedback::WorkerStatus { .. }
            | Feedback::FileDependency { .. }
            | Feedback::FileLoaded { .. } => {
                tracing::debug!("ignoring informational feedback");
                false
            }

            Feedback::Closed { error } => {
                let fatal = {
                    let mut guard = inner.lock();
                    if guard.phase == Phase::Running && error.is_some() {
                        guard.phase = Phase::Disposed;
                        guard.doc = None;
                        true
                    } else {
                        false
                    }
                };
                if fatal {
                    tracing::error!(error = ?error, "backend closed unexpectedly");
                    callbacks.coq_died(error.as_deref());
                }
                fatal
            }
        }
    }

    // ---- Shared helpers ----------------------------------------------------

    /// Run `f` against the document state, refusing once disposed.
    fn with_doc<T>(&self, f: impl FnOnce(&mut DocState) -> T) -> Result<T> {
        let mut guard = self.inner.lock();
        if guard.phase == Phase::Disposed {
            return Err(StmError::Disposed);
        }
        match guard.doc.as_mut() {
            Some(doc) => Ok(f(doc)),
            None => Err(StmError::Disposed),
        }
    }

    /// The sentence containing `pos`, if any.
    fn sentence_at(doc: &DocState, pos: Position) -> Option<(StateId, Range)> {
        let root = doc.tree.root();
        std::iter::once(root)
            .chain(doc.tree.descendants(root))
            .filter_map(|id| doc.tree.get(id))
            .find(|s| s.contains(pos))
            .map(|s| (s.state_id, s.range))
    }
}
