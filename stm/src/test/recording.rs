//! Recording editor-callback double.

use crate::editor::EditorCallbacks;
use crate::protocol::{LtacProfResults, MessageLevel, SentenceStatus};
use lsp_types::Range;
use parking_lot::Mutex;
use std::sync::Arc;

/// One notification observed by [`RecordingCallbacks`], in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackEvent {
    StatusUpdate {
        range: Range,
        status: SentenceStatus,
    },
    ClearSentence {
        range: Range,
    },
    Error {
        sentence_range: Range,
        error_range: Option<Range>,
        message: String,
        rich: Option<String>,
    },
    Message {
        level: MessageLevel,
        text: String,
        rich: Option<String>,
    },
    LtacProf {
        range: Option<Range>,
    },
    CoqDied {
        error: Option<String>,
    },
}

/// Editor-callback double that records every notification for assertions.
#[derive(Clone, Default)]
pub struct RecordingCallbacks {
    events: Arc<Mutex<Vec<CallbackEvent>>>,
}

impl RecordingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything observed so far, in order.
    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().clone()
    }

    /// Everything observed since the last call to this method.
    pub fn take_events(&self) -> Vec<CallbackEvent> {
        std::mem::take(&mut self.events.lock())
    }

    /// Ranges passed to `clear_sentence`, in order.
    pub fn cleared_ranges(&self) -> Vec<Range> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                CallbackEvent::ClearSentence { range } => Some(*range),
                _ => None,
            })
            .collect()
    }

    /// Status updates observed, in order.
    pub fn status_updates(&self) -> Vec<(Range, SentenceStatus)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                CallbackEvent::StatusUpdate { range, status } => Some((*range, *status)),
                _ => None,
            })
            .collect()
    }

    /// Whether `coq_died` has fired.
    pub fn died(&self) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| matches!(e, CallbackEvent::CoqDied { .. }))
    }
}

impl EditorCallbacks for RecordingCallbacks {
    fn sentence_status_update(&self, range: Range, status: SentenceStatus) {
        self.events
            .lock()
            .push(CallbackEvent::StatusUpdate { range, status });
    }

    fn clear_sentence(&self, range: Range) {
        self.events.lock().push(CallbackEvent::ClearSentence { range });
    }

    fn error(
        &self,
        sentence_range: Range,
        error_range: Option<Range>,
        message: &str,
        rich: Option<&str>,
    ) {
        self.events.lock().push(CallbackEvent::Error {
            sentence_range,
            error_range,
            message: message.to_string(),
            rich: rich.map(str::to_string),
        });
    }

    fn message(&self, level: MessageLevel, text: &str, rich: Option<&str>) {
        self.events.lock().push(CallbackEvent::Message {
            level,
            text: text.to_string(),
            rich: rich.map(str::to_string),
        });
    }

    fn ltac_prof_results(&self, range: Option<Range>, _results: &LtacProfResults) {
        self.events.lock().push(CallbackEvent::LtacProf { range });
    }

    fn coq_died(&self, error: Option<&str>) {
        self.events.lock().push(CallbackEvent::CoqDied {
            error: error.map(str::to_string),
        });
    }
}
