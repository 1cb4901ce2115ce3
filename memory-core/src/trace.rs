//! Structured reflection trace records.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a reflection ran against an empty or populated fact store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceMode {
    /// No prior facts existed for the session
    Initial,
    /// Prior facts were consolidated with the new turns
    Consolidation,
}

/// Record of a single reflection run. Emitted at most once per reflection,
/// including the skip-short-episode and provider-failure paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionTrace {
    /// Episode the reflection ran for
    pub episode_id: Uuid,
    /// Initial or consolidation run
    pub mode: TraceMode,
    /// Turns given to the reflector (episode turns plus carried-forward)
    pub input_turn_count: usize,
    /// Active facts before the run
    pub prior_fact_ids: Vec<Uuid>,
    /// Facts scoped to the episode centroid and sent to the provider
    pub scoped_fact_ids: Vec<Uuid>,
    /// Raw provider output, or the error message on permanent failure
    pub raw_output: serde_json::Value,
    /// Facts persisted by this run
    pub saved_fact_ids: Vec<Uuid>,
    /// Facts superseded by this run
    pub superseded_fact_ids: Vec<Uuid>,
    /// Actions skipped as unknown, malformed, or capped
    pub skipped_actions: usize,
    /// Proposed facts discarded as duplicates of active facts
    pub discarded_duplicates: usize,
    /// Wall time of the run in milliseconds
    pub elapsed_ms: u64,
}

/// Callback invoked with each reflection trace.
pub type TraceCallback = dyn Fn(ReflectionTrace) + Send + Sync;

/// Shared, swappable trace callback slot.
#[derive(Clone, Default)]
pub struct TraceSink {
    callback: Arc<parking_lot::RwLock<Option<Arc<TraceCallback>>>>,
}

impl TraceSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the callback.
    pub fn set(&self, callback: Arc<TraceCallback>) {
        *self.callback.write() = Some(callback);
    }

    /// Remove the callback.
    pub fn clear(&self) {
        *self.callback.write() = None;
    }

    /// Deliver a trace to the installed callback, if any.
    pub fn emit(&self, trace: ReflectionTrace) {
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(trace);
        }
    }
}

impl std::fmt::Debug for TraceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let installed = self.callback.read().is_some();
        f.debug_struct("TraceSink").field("installed", &installed).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn sample_trace() -> ReflectionTrace {
        ReflectionTrace {
            episode_id: Uuid::new_v4(),
            mode: TraceMode::Initial,
            input_turn_count: 4,
            prior_fact_ids: vec![],
            scoped_fact_ids: vec![],
            raw_output: serde_json::Value::Null,
            saved_fact_ids: vec![Uuid::new_v4()],
            superseded_fact_ids: vec![],
            skipped_actions: 0,
            discarded_duplicates: 0,
            elapsed_ms: 12,
        }
    }

    #[test]
    fn sink_delivers_to_installed_callback() {
        let sink = TraceSink::new();
        let seen: Arc<Mutex<Vec<ReflectionTrace>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in_cb = Arc::clone(&seen);
        sink.set(Arc::new(move |trace| {
            seen_in_cb.lock().unwrap().push(trace);
        }));
        sink.emit(sample_trace());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn sink_without_callback_is_silent() {
        let sink = TraceSink::new();
        sink.emit(sample_trace());
    }

    #[test]
    fn trace_serializes_to_structured_json() {
        let trace = sample_trace();
        let value = serde_json::to_value(&trace).unwrap();
        assert_eq!(value["mode"], "initial");
        assert_eq!(value["input_turn_count"], 4);
    }
}
