//! The session facade: one instance per session, owning the open-episode
//! state and the ingest ordering.
//!
//! `ingest`, `recall`, and episode closes are logically serialized through
//! one async lock on the session state; reflection runs on its own worker
//! task and only touches shared state through storage and the carry-forward
//! buffer.

mod builder;

pub use builder::SessionMemoryBuilder;

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::embeddings::EmbeddingProvider;
use crate::episode::EpisodeManager;
use crate::error::{Error, Result};
use crate::markers::{Marker, MarkerDetector};
use crate::recall::{self, RecallContext, RecallOptions};
use crate::reflection::{ReflectionQueue, ReflectionRunner};
use crate::retry::{RetryMetrics, RetryPolicy};
use crate::storage::{EmbeddingKind, EmbeddingMetadata, StorageBackend};
use crate::tokens::TokenCounter;
use crate::trace::{ReflectionTrace, TraceSink};
use crate::types::{ContextItem, EpisodeStatus, MemoryConfig, Role, SessionStats, Turn};

/// Optional per-ingest inputs: explicit markers and caller metadata.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    /// Explicit markers, merged with auto-detected ones
    pub markers: Vec<Marker>,
    /// Opaque caller metadata stored with the turn
    pub metadata: HashMap<String, String>,
}

pub(crate) struct SessionState {
    pub initialized: bool,
    pub episodes: EpisodeManager,
    pub last_created_at: Option<DateTime<Utc>>,
}

/// Session-scoped memory: episodic grouping of turns, reflection into
/// facts, and token-budgeted recall.
///
/// One facade instance serves exactly one session. Build with
/// [`SessionMemory::builder`] inside a tokio runtime, call
/// [`initialize`](SessionMemory::initialize) once, and
/// [`close`](SessionMemory::close) when done.
pub struct SessionMemory {
    session_id: String,
    config: MemoryConfig,
    storage: Arc<dyn StorageBackend>,
    embedder: Arc<dyn EmbeddingProvider>,
    counter: Arc<dyn TokenCounter>,
    clock: Arc<dyn Clock>,
    detector: MarkerDetector,
    retry: RetryPolicy,
    state: AsyncMutex<SessionState>,
    runner: Option<Arc<ReflectionRunner>>,
    queue: Option<ReflectionQueue>,
    trace: TraceSink,
    retry_metrics: Arc<RetryMetrics>,
    turns_ingested: AtomicU64,
    tokens_ingested: AtomicU64,
    closed: AtomicBool,
}

impl SessionMemory {
    /// Start building a facade for `session_id`.
    #[must_use]
    pub fn builder(session_id: impl Into<String>) -> SessionMemoryBuilder {
        SessionMemoryBuilder::new(session_id)
    }

    /// The session this facade serves.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Ensure storage is ready and an open episode exists. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        self.ensure_not_closed()?;
        let mut state = self.state.lock().await;
        if state.initialized {
            return Ok(());
        }
        self.storage.initialize().await?;
        let open = self
            .storage
            .get_episodes(&self.session_id, Some(EpisodeStatus::Open), None)
            .await?;
        if let Some(episode) = open.into_iter().next() {
            // Resume the persisted open episode; stored turns are the
            // authoritative ordering.
            let turns = self.storage.get_turns_by_episode(episode.episode_id).await?;
            let last_turn_at = turns.last().map(|t| t.created_at);
            let mut record = episode;
            record.turn_ids = turns.iter().map(|t| t.turn_id).collect();
            record.turn_count = record.turn_ids.len();
            state.episodes.adopt(&record, last_turn_at);
            state.last_created_at = last_turn_at;
            debug!(session_id = %self.session_id, episode_id = %record.episode_id, "resumed open episode");
        } else if let Some(record) = state.episodes.ensure_open(self.clock.now()) {
            self.storage.save_episode(&record).await?;
            debug!(session_id = %self.session_id, episode_id = %record.episode_id, "opened first episode");
        }
        state.initialized = true;
        Ok(())
    }

    /// Ingest a turn with no explicit markers or metadata.
    pub async fn ingest(&self, role: Role, content: &str) -> Result<Uuid> {
        self.ingest_with(role, content, IngestRequest::default()).await
    }

    /// Ingest a turn: validate, mark, count, assign to an episode, persist,
    /// embed, and trigger reflection for any episode the assignment closed.
    ///
    /// The embedding call is awaited; its permanent failure is logged and
    /// swallowed (the turn stays retrievable through the current-episode and
    /// marked paths). Persistence failures are returned to the caller.
    pub async fn ingest_with(
        &self,
        role: Role,
        content: &str,
        request: IngestRequest,
    ) -> Result<Uuid> {
        self.ensure_not_closed()?;
        if content.is_empty() {
            return Err(Error::Validation("turn content must be non-empty".to_string()));
        }

        let mut state = self.state.lock().await;
        if !state.initialized {
            return Err(Error::InvalidState(
                "session is not initialized; call initialize() first".to_string(),
            ));
        }

        let mut markers: BTreeSet<Marker> = request.markers.into_iter().collect();
        if self.config.auto_detect_markers {
            markers.extend(self.detector.detect(content));
        }
        let token_count = self.counter.count(content);
        let created_at = next_monotonic(&mut state, self.clock.now());
        let turn_id = Uuid::new_v4();

        let assignment = state.episodes.assign(turn_id, role, content, created_at);
        for episode in &assignment.closed {
            self.storage.save_episode(episode).await?;
        }
        for episode in &assignment.opened {
            self.storage.save_episode(episode).await?;
        }

        let turn = Turn {
            turn_id,
            session_id: self.session_id.clone(),
            episode_id: assignment.episode_id,
            role,
            content: content.to_string(),
            markers: markers.clone(),
            token_count,
            created_at,
            metadata: request.metadata,
        };
        self.storage.save_turn(&turn).await?;
        self.turns_ingested.fetch_add(1, Ordering::SeqCst);
        self.tokens_ingested.fetch_add(token_count as u64, Ordering::SeqCst);

        let batch = vec![turn.content.clone()];
        match self
            .retry
            .execute(|| async { self.embedder.embed(&batch).await.map_err(Error::from) })
            .await
        {
            Ok(mut vectors) if !vectors.is_empty() => {
                let metadata = EmbeddingMetadata {
                    session_id: self.session_id.clone(),
                    kind: EmbeddingKind::Turn,
                    episode_id: Some(assignment.episode_id),
                    markers,
                };
                self.storage
                    .save_embedding(turn_id, vectors.swap_remove(0), metadata)
                    .await?;
            }
            Ok(_) => {
                warn!(%turn_id, "embedder returned no vector; turn stored without embedding");
            }
            Err(e) => {
                warn!(%turn_id, error = %e, "embedding failed permanently; turn stored without embedding");
            }
        }

        if let Some(queue) = &self.queue {
            for episode in &assignment.closed {
                queue.enqueue(episode.episode_id);
            }
        }

        Ok(turn_id)
    }

    /// Recall relevant context under a token budget.
    pub async fn recall(&self, query: &str, token_budget: usize) -> Result<Vec<ContextItem>> {
        self.recall_with_options(
            query,
            RecallOptions {
                token_budget: Some(token_budget),
                ..RecallOptions::default()
            },
        )
        .await
    }

    /// Recall with full per-call options.
    pub async fn recall_with_options(
        &self,
        query: &str,
        options: RecallOptions,
    ) -> Result<Vec<ContextItem>> {
        self.ensure_not_closed()?;
        let open_episode_id = {
            let state = self.state.lock().await;
            if !state.initialized {
                return Err(Error::InvalidState(
                    "session is not initialized; call initialize() first".to_string(),
                ));
            }
            state.episodes.open_episode_id()
        };
        let ctx = RecallContext {
            storage: self.storage.as_ref(),
            embedder: self.embedder.as_ref(),
            counter: self.counter.as_ref(),
            retry: &self.retry,
            weights: &self.config.marker_weights,
            config: &self.config.recall,
            session_id: &self.session_id,
            open_episode_id,
            facts_enabled: self.runner.is_some(),
        };
        recall::run(&ctx, query, &options).await
    }

    /// Force-close the open episode, trigger reflection, and open a fresh
    /// one. Returns the closed episode id, or `None` when the open episode
    /// has no turns (nothing changes in that case).
    pub async fn close_episode(&self, reason: &str) -> Result<Option<Uuid>> {
        self.ensure_not_closed()?;
        let mut state = self.state.lock().await;
        if !state.initialized {
            return Err(Error::InvalidState(
                "session is not initialized; call initialize() first".to_string(),
            ));
        }
        let Some(assignment) = state.episodes.close_explicit(reason, self.clock.now()) else {
            return Ok(None);
        };
        for episode in &assignment.closed {
            self.storage.save_episode(episode).await?;
        }
        for episode in &assignment.opened {
            self.storage.save_episode(episode).await?;
        }
        if let Some(queue) = &self.queue {
            for episode in &assignment.closed {
                queue.enqueue(episode.episode_id);
            }
        }
        Ok(Some(assignment.episode_id))
    }

    /// Counts of turns, episodes, facts, tokens, and completed reflections.
    pub async fn get_session_stats(&self) -> Result<SessionStats> {
        self.ensure_not_closed()?;
        let open = self
            .storage
            .get_episodes(&self.session_id, Some(EpisodeStatus::Open), None)
            .await?
            .len();
        let closed = self
            .storage
            .get_episodes(&self.session_id, Some(EpisodeStatus::Closed), None)
            .await?
            .len();
        let facts = self.storage.get_facts_by_session(&self.session_id, None).await?;
        let active_facts = facts.iter().filter(|f| f.is_active()).count();
        let superseded_facts = facts.len() - active_facts;
        Ok(SessionStats {
            session_id: self.session_id.clone(),
            turn_count: self.turns_ingested.load(Ordering::SeqCst),
            open_episodes: open,
            closed_episodes: closed,
            active_facts,
            superseded_facts,
            tokens_ingested: self.tokens_ingested.load(Ordering::SeqCst),
            reflections_completed: self.runner.as_ref().map_or(0, |r| r.completed_count()),
        })
    }

    /// Install the reflection trace callback.
    pub fn set_trace_callback(
        &self,
        callback: impl Fn(ReflectionTrace) + Send + Sync + 'static,
    ) {
        self.trace.set(Arc::new(callback));
    }

    /// Remove the reflection trace callback.
    pub fn clear_trace_callback(&self) {
        self.trace.clear();
    }

    /// Retry counters shared by this session's provider and transport
    /// calls, including the reflection worker's.
    #[must_use]
    pub fn retry_metrics(&self) -> &RetryMetrics {
        &self.retry_metrics
    }

    /// Wait for every queued reflection to complete.
    pub async fn flush_reflections(&self) {
        if let Some(queue) = &self.queue {
            queue.flush().await;
        }
    }

    /// Await pending reflections and release resources. Idempotent; other
    /// operations fail with an invalid-state error afterwards.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(queue) = &self.queue {
            queue.shutdown().await;
        }
        self.storage.close().await
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::InvalidState("session memory is closed".to_string()));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        session_id: String,
        config: MemoryConfig,
        storage: Arc<dyn StorageBackend>,
        embedder: Arc<dyn EmbeddingProvider>,
        counter: Arc<dyn TokenCounter>,
        clock: Arc<dyn Clock>,
        state: SessionState,
        runner: Option<Arc<ReflectionRunner>>,
        queue: Option<ReflectionQueue>,
        trace: TraceSink,
        retry_metrics: Arc<RetryMetrics>,
    ) -> Self {
        let retry =
            RetryPolicy::new(config.retry.clone()).with_metrics(Arc::clone(&retry_metrics));
        Self {
            session_id,
            config,
            storage,
            embedder,
            counter,
            clock,
            detector: MarkerDetector::new(),
            retry,
            state: AsyncMutex::new(state),
            runner,
            queue,
            trace,
            retry_metrics,
            turns_ingested: AtomicU64::new(0),
            tokens_ingested: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }
}

/// Clamp a new timestamp so `created_at` is strictly increasing within the
/// session even under coarse or non-monotone wall clocks.
fn next_monotonic(state: &mut SessionState, now: DateTime<Utc>) -> DateTime<Utc> {
    let ts = match state.last_created_at {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    };
    state.last_created_at = Some(ts);
    ts
}
