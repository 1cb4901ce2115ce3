//! The reflection runner: load, scope, reflect, apply.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::embeddings::{centroid, cosine_similarity, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::reflector::{ReflectionAction, Reflector};
use crate::retry::RetryPolicy;
use crate::storage::{EmbeddingKind, EmbeddingMetadata, StorageBackend};
use crate::trace::{ReflectionTrace, TraceMode, TraceSink};
use crate::types::{Fact, FactStatus, ReflectionConfig, Turn};

use super::MAX_SCOPED_FACTS;

/// Applies one closed episode's worth of reflection.
///
/// Owns the carry-forward buffer: turns from episodes too short to reflect
/// on their own (or whose reflection failed) are retained and prepended to
/// the next run's input, so no closed turn is ever dropped silently.
pub(crate) struct ReflectionRunner {
    session_id: String,
    storage: Arc<dyn StorageBackend>,
    embedder: Arc<dyn EmbeddingProvider>,
    reflector: Arc<dyn Reflector>,
    clock: Arc<dyn Clock>,
    config: ReflectionConfig,
    retry: RetryPolicy,
    carry_forward: Mutex<Vec<Uuid>>,
    trace: TraceSink,
    completed: AtomicU64,
}

impl ReflectionRunner {
    pub fn new(
        session_id: String,
        storage: Arc<dyn StorageBackend>,
        embedder: Arc<dyn EmbeddingProvider>,
        reflector: Arc<dyn Reflector>,
        clock: Arc<dyn Clock>,
        config: ReflectionConfig,
        retry: RetryPolicy,
        trace: TraceSink,
    ) -> Self {
        Self {
            session_id,
            storage,
            embedder,
            reflector,
            clock,
            config,
            retry,
            carry_forward: Mutex::new(Vec::new()),
            trace,
            completed: AtomicU64::new(0),
        }
    }

    /// Reflections that ran to completion.
    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Run reflection for a closed episode.
    pub async fn run(&self, episode_id: Uuid) -> Result<()> {
        let started = Instant::now();

        let carried: Vec<Uuid> = self.carry_forward.lock().await.clone();
        let mut turns: Vec<Turn> = Vec::new();
        for id in &carried {
            if let Some(turn) = self.storage.get_turn(*id).await? {
                turns.push(turn);
            }
        }
        let episode_turns = self.storage.get_turns_by_episode(episode_id).await?;
        let episode_turn_ids: Vec<Uuid> = episode_turns.iter().map(|t| t.turn_id).collect();
        turns.extend(episode_turns);

        let prior_facts = self
            .storage
            .get_facts_by_session(&self.session_id, Some(FactStatus::Active))
            .await?;
        let prior_fact_ids: Vec<Uuid> = prior_facts.iter().map(|f| f.fact_id).collect();
        let mode = if prior_facts.is_empty() {
            TraceMode::Initial
        } else {
            TraceMode::Consolidation
        };

        if turns.len() < self.config.min_episode_turns && prior_facts.is_empty() {
            debug!(
                %episode_id,
                turn_count = turns.len(),
                min = self.config.min_episode_turns,
                "episode too short to reflect; carrying turns forward"
            );
            self.retain_carry(&episode_turn_ids).await;
            self.trace.emit(ReflectionTrace {
                episode_id,
                mode,
                input_turn_count: turns.len(),
                prior_fact_ids,
                scoped_fact_ids: Vec::new(),
                raw_output: serde_json::Value::Null,
                saved_fact_ids: Vec::new(),
                superseded_fact_ids: Vec::new(),
                skipped_actions: 0,
                discarded_duplicates: 0,
                elapsed_ms: elapsed_ms(started),
            });
            return Ok(());
        }

        let centroid_vector = self.episode_centroid(&turns).await?;

        let mut scoped: Vec<(Fact, f32)> = Vec::new();
        if let Some(cv) = &centroid_vector {
            for fact in &prior_facts {
                if let Some(fv) = self.storage.get_embedding(fact.fact_id).await? {
                    let similarity = cosine_similarity(cv, &fv);
                    if similarity >= self.config.consolidation_similarity_threshold {
                        scoped.push((fact.clone(), similarity));
                    }
                }
            }
            scoped.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scoped.truncate(MAX_SCOPED_FACTS);
        }
        let scoped_facts: Vec<Fact> = scoped.into_iter().map(|(f, _)| f).collect();
        let scoped_fact_ids: Vec<Uuid> = scoped_facts.iter().map(|f| f.fact_id).collect();

        let output = self
            .retry
            .execute(|| async {
                self.reflector
                    .reflect(&scoped_facts, &turns)
                    .await
                    .map_err(Error::from)
            })
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!(%episode_id, error = %e, "reflection provider failed; retaining turns for next run");
                self.retain_carry(&episode_turn_ids).await;
                self.trace.emit(ReflectionTrace {
                    episode_id,
                    mode,
                    input_turn_count: turns.len(),
                    prior_fact_ids,
                    scoped_fact_ids,
                    raw_output: json!({ "error": e.to_string() }),
                    saved_fact_ids: Vec::new(),
                    superseded_fact_ids: Vec::new(),
                    skipped_actions: 0,
                    discarded_duplicates: 0,
                    elapsed_ms: elapsed_ms(started),
                });
                return Ok(());
            }
        };

        let raw_output =
            serde_json::to_value(&output).unwrap_or_else(|_| json!(format!("{output:?}")));
        let applied = self.apply_actions(episode_id, output.into_actions(), &prior_facts).await;

        self.carry_forward.lock().await.clear();
        self.completed.fetch_add(1, Ordering::SeqCst);

        self.trace.emit(ReflectionTrace {
            episode_id,
            mode,
            input_turn_count: turns.len(),
            prior_fact_ids,
            scoped_fact_ids,
            raw_output,
            saved_fact_ids: applied.saved,
            superseded_fact_ids: applied.superseded,
            skipped_actions: applied.skipped,
            discarded_duplicates: applied.duplicates,
            elapsed_ms: elapsed_ms(started),
        });
        Ok(())
    }

    /// Mean of the turns' stored embeddings, or an embedding of their
    /// concatenation when none are stored.
    async fn episode_centroid(&self, turns: &[Turn]) -> Result<Option<Vec<f32>>> {
        let vectors: Vec<Vec<f32>> = futures::future::try_join_all(
            turns.iter().map(|t| self.storage.get_embedding(t.turn_id)),
        )
        .await?
        .into_iter()
        .flatten()
        .collect();
        if let Some(mean) = centroid(&vectors) {
            return Ok(Some(mean));
        }
        let joined = vec![turns
            .iter()
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")];
        match self
            .retry
            .execute(|| async { self.embedder.embed(&joined).await.map_err(Error::from) })
            .await
        {
            Ok(mut vectors) if !vectors.is_empty() => Ok(Some(vectors.swap_remove(0))),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(error = %e, "centroid embedding failed; reflecting without fact scoping");
                Ok(None)
            }
        }
    }

    async fn apply_actions(
        &self,
        episode_id: Uuid,
        actions: Vec<ReflectionAction>,
        prior_facts: &[Fact],
    ) -> AppliedActions {
        let mut active: HashMap<Uuid, Fact> =
            prior_facts.iter().map(|f| (f.fact_id, f.clone())).collect();
        let mut vectors: HashMap<Uuid, Vec<f32>> = HashMap::new();
        for fact_id in active.keys() {
            if let Ok(Some(vector)) = self.storage.get_embedding(*fact_id).await {
                vectors.insert(*fact_id, vector);
            }
        }

        let mut applied = AppliedActions::default();
        for action in actions {
            match action {
                ReflectionAction::Add { content, markers } => {
                    if applied.saved.len() >= self.config.max_facts_per_episode {
                        warn!(%episode_id, "per-episode fact cap reached; skipping add");
                        applied.skipped += 1;
                        continue;
                    }
                    let Some(vector) = self.embed_content(&content).await else {
                        applied.skipped += 1;
                        continue;
                    };
                    let duplicate = active.keys().any(|id| {
                        vectors.get(id).is_some_and(|fv| {
                            cosine_similarity(&vector, fv) >= self.config.dedup_similarity_threshold
                        })
                    });
                    if duplicate {
                        debug!(%episode_id, "proposed fact duplicates an active fact; discarding");
                        applied.duplicates += 1;
                        continue;
                    }
                    let fact = Fact::new(
                        self.session_id.clone(),
                        vec![episode_id],
                        content,
                        markers,
                        self.clock.now(),
                    );
                    if let Err(e) = self.storage.save_fact(&fact).await {
                        warn!(error = %e, "failed to save fact; skipping action");
                        applied.skipped += 1;
                        continue;
                    }
                    self.save_fact_embedding(&fact, vector.clone()).await;
                    applied.saved.push(fact.fact_id);
                    vectors.insert(fact.fact_id, vector);
                    active.insert(fact.fact_id, fact);
                }
                ReflectionAction::Update {
                    target,
                    content,
                    markers,
                } => {
                    let Some(old) = active.get(&target) else {
                        warn!(%target, "update target is not an active fact; ignoring");
                        applied.skipped += 1;
                        continue;
                    };
                    let Some(vector) = self.embed_content(&content).await else {
                        applied.skipped += 1;
                        continue;
                    };
                    let mut sources = old.source_episode_ids.clone();
                    if !sources.contains(&episode_id) {
                        sources.push(episode_id);
                    }
                    let fact = Fact::new(
                        self.session_id.clone(),
                        sources,
                        content,
                        markers,
                        self.clock.now(),
                    );
                    if let Err(e) = self.storage.save_fact(&fact).await {
                        warn!(error = %e, "failed to save updated fact; skipping action");
                        applied.skipped += 1;
                        continue;
                    }
                    // The update counts only if this run wins the CAS on the
                    // target; a lost race must stay a no-op, so the
                    // replacement row written above is retired again.
                    match self
                        .storage
                        .update_fact_supersession(target, Some(fact.fact_id), self.clock.now())
                        .await
                    {
                        Ok(true) => {
                            self.save_fact_embedding(&fact, vector.clone()).await;
                            active.remove(&target);
                            vectors.remove(&target);
                            applied.superseded.push(target);
                            applied.saved.push(fact.fact_id);
                            vectors.insert(fact.fact_id, vector);
                            active.insert(fact.fact_id, fact);
                        }
                        Ok(false) => {
                            warn!(%target, "fact was already superseded; update is a no-op");
                            self.retire_replacement(&fact).await;
                            applied.skipped += 1;
                        }
                        Err(e) => {
                            warn!(%target, error = %e, "supersession write failed; update rolled back");
                            self.retire_replacement(&fact).await;
                            applied.skipped += 1;
                        }
                    }
                }
                ReflectionAction::Remove { target, reason } => {
                    if !active.contains_key(&target) {
                        warn!(%target, "remove target is not an active fact; ignoring");
                        applied.skipped += 1;
                        continue;
                    }
                    match self
                        .storage
                        .update_fact_supersession(target, None, self.clock.now())
                        .await
                    {
                        Ok(true) => {
                            debug!(%target, reason = %reason, "fact retired");
                            active.remove(&target);
                            vectors.remove(&target);
                            applied.superseded.push(target);
                        }
                        Ok(false) => {
                            warn!(%target, "fact was already superseded; remove was a no-op");
                        }
                        Err(e) => {
                            warn!(%target, error = %e, "supersession write failed");
                            applied.skipped += 1;
                        }
                    }
                }
                ReflectionAction::Keep { target } => {
                    if !active.contains_key(&target) {
                        debug!(%target, "keep target is not an active fact");
                    }
                }
            }
        }
        applied
    }

    async fn embed_content(&self, content: &str) -> Option<Vec<f32>> {
        let batch = vec![content.to_string()];
        match self
            .retry
            .execute(|| async { self.embedder.embed(&batch).await.map_err(Error::from) })
            .await
        {
            Ok(mut vectors) if !vectors.is_empty() => Some(vectors.swap_remove(0)),
            Ok(_) => {
                warn!("embedder returned no vector for fact content");
                None
            }
            Err(e) => {
                warn!(error = %e, "fact embedding failed; skipping action");
                None
            }
        }
    }

    /// Retire a replacement fact whose supersession CAS was lost, keeping
    /// the row for audit while hiding it from recall.
    async fn retire_replacement(&self, fact: &Fact) {
        if let Err(e) = self
            .storage
            .update_fact_supersession(fact.fact_id, None, self.clock.now())
            .await
        {
            warn!(fact_id = %fact.fact_id, error = %e, "failed to retire replacement fact");
        }
    }

    async fn save_fact_embedding(&self, fact: &Fact, vector: Vec<f32>) {
        let metadata = EmbeddingMetadata {
            session_id: self.session_id.clone(),
            kind: EmbeddingKind::Fact,
            episode_id: None,
            markers: fact.markers.clone(),
        };
        if let Err(e) = self.storage.save_embedding(fact.fact_id, vector, metadata).await {
            warn!(fact_id = %fact.fact_id, error = %e, "failed to save fact embedding");
        }
    }

    /// Retain the episode's turns (after any already-carried ones) for the
    /// next reflection.
    async fn retain_carry(&self, episode_turn_ids: &[Uuid]) {
        let mut carry = self.carry_forward.lock().await;
        for id in episode_turn_ids {
            if !carry.contains(id) {
                carry.push(*id);
            }
        }
    }
}

#[derive(Debug, Default)]
struct AppliedActions {
    saved: Vec<Uuid>,
    superseded: Vec<Uuid>,
    skipped: usize,
    duplicates: usize,
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
