//! Recall: gather candidates, score, pack under a token budget, assemble.
//!
//! Candidates come from four sources: the current episode (chronological,
//! unscored), marked past turns, active facts, and unmarked past turns via
//! vector search. Past items are scored `cosine(query, item) + marker
//! boost`; `min_relevance` filters on relevance alone. If query embedding
//! fails, recall degrades to the current-episode and marked-past sources.

mod packing;

use std::collections::HashSet;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::embeddings::{cosine_similarity, EmbeddingProvider};
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::storage::{EmbeddingKind, MarkerPresence, StorageBackend, VectorFilter};
use crate::tokens::TokenCounter;
use crate::types::{ContextItem, Fact, FactStatus, MarkerWeights, RecallConfig, SourceType, Turn};

use packing::{
    fill_skipping_oversize, fill_until_overflow, pack_current_episode, sort_by_score, CurrentTurn,
    ScoredCandidate,
};

/// Per-call recall options. `None` fields fall back to configuration.
#[derive(Debug, Clone)]
pub struct RecallOptions {
    /// Token budget for the assembled context
    pub token_budget: Option<usize>,
    /// Include current-episode turns
    pub include_current_episode: bool,
    /// Minimum relevance (cosine only, before marker boost)
    pub min_relevance: f32,
    /// Override for the current-episode budget reservation
    pub current_episode_budget_pct: Option<f32>,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            token_budget: None,
            include_current_episode: true,
            min_relevance: 0.0,
            current_episode_budget_pct: None,
        }
    }
}

/// Everything the recall pipeline needs from the facade.
pub(crate) struct RecallContext<'a> {
    pub storage: &'a dyn StorageBackend,
    pub embedder: &'a dyn EmbeddingProvider,
    pub counter: &'a dyn TokenCounter,
    pub retry: &'a RetryPolicy,
    pub weights: &'a MarkerWeights,
    pub config: &'a RecallConfig,
    pub session_id: &'a str,
    pub open_episode_id: Option<Uuid>,
    /// Whether active facts are a candidate source (reflection configured)
    pub facts_enabled: bool,
}

pub(crate) async fn run(
    ctx: &RecallContext<'_>,
    query: &str,
    options: &RecallOptions,
) -> Result<Vec<ContextItem>> {
    let budget = options.token_budget.unwrap_or(ctx.config.default_token_budget);
    let pct = options
        .current_episode_budget_pct
        .unwrap_or(ctx.config.current_episode_budget_pct)
        .clamp(0.0, 1.0);

    // Current episode, chronological.
    let current_turns = match (options.include_current_episode, ctx.open_episode_id) {
        (true, Some(episode_id)) => ctx.storage.get_turns_by_episode(episode_id).await?,
        _ => Vec::new(),
    };

    // Query embedding; failure degrades to the non-vector path.
    let query_batch = vec![query.to_string()];
    let query_vector = match ctx
        .retry
        .execute(|| async {
            ctx.embedder
                .embed(&query_batch)
                .await
                .map_err(crate::error::Error::from)
        })
        .await
    {
        Ok(mut vectors) if !vectors.is_empty() => Some(vectors.swap_remove(0)),
        Ok(_) => {
            warn!("embedder returned no vector for recall query; degrading to non-vector recall");
            None
        }
        Err(e) => {
            warn!(error = %e, "query embedding failed; degrading to non-vector recall");
            None
        }
    };
    let degraded = query_vector.is_none();

    let mut seen: HashSet<Uuid> = current_turns.iter().map(|t| t.turn_id).collect();

    // Marked past turns.
    let marked_past = ctx
        .storage
        .get_marked_turns(ctx.session_id, ctx.open_episode_id)
        .await?;
    let mut marked_candidates: Vec<ScoredCandidate<Turn>> = Vec::new();
    for turn in marked_past {
        if !seen.insert(turn.turn_id) {
            continue;
        }
        let relevance = match &query_vector {
            Some(qv) => ctx
                .storage
                .get_embedding(turn.turn_id)
                .await?
                .map_or(0.0, |v| cosine_similarity(qv, &v)),
            None => 0.0,
        };
        if relevance < options.min_relevance {
            continue;
        }
        marked_candidates.push(ScoredCandidate {
            score: relevance + ctx.weights.boost(&turn.markers),
            token_count: turn.token_count,
            created_at: turn.created_at,
            payload: turn,
        });
    }
    sort_by_score(&mut marked_candidates);

    // Active facts and unmarked past turns are vector-scored sources; both
    // are skipped in degraded mode.
    let mut fact_candidates: Vec<ScoredCandidate<Fact>> = Vec::new();
    let mut vector_candidates: Vec<ScoredCandidate<Turn>> = Vec::new();
    if let Some(qv) = &query_vector {
        if ctx.facts_enabled {
            let facts = ctx
                .storage
                .get_facts_by_session(ctx.session_id, Some(FactStatus::Active))
                .await?;
            for fact in facts {
                if !seen.insert(fact.fact_id) {
                    continue;
                }
                let relevance = ctx
                    .storage
                    .get_embedding(fact.fact_id)
                    .await?
                    .map_or(0.0, |v| cosine_similarity(qv, &v));
                if relevance < options.min_relevance {
                    continue;
                }
                fact_candidates.push(ScoredCandidate {
                    score: relevance + ctx.weights.boost(&fact.markers),
                    token_count: ctx.counter.count(&fact.content),
                    created_at: fact.created_at,
                    payload: fact,
                });
            }
        }

        let filter = VectorFilter {
            session_id: Some(ctx.session_id.to_string()),
            kind: Some(EmbeddingKind::Turn),
            markers: MarkerPresence::Empty,
            exclude_episode: ctx.open_episode_id,
        };
        let matches = ctx
            .storage
            .vector_search(qv, ctx.config.vector_search_k, &filter)
            .await?;
        for hit in matches {
            if hit.score < options.min_relevance {
                continue;
            }
            let Some(turn) = ctx.storage.get_turn(hit.id).await? else {
                debug!(turn_id = %hit.id, "vector hit without a stored turn; skipping");
                continue;
            };
            if !seen.insert(turn.turn_id) {
                continue;
            }
            vector_candidates.push(ScoredCandidate {
                score: hit.score + ctx.weights.boost(&turn.markers),
                token_count: turn.token_count,
                created_at: turn.created_at,
                payload: turn,
            });
        }
    }

    // Pack: current episode reservation, then marked past, then the rest.
    let reservation = ((budget as f32) * pct).floor() as usize;
    let current_packed = pack_current_episode(
        current_turns
            .into_iter()
            .map(|turn| CurrentTurn {
                boost: ctx.weights.boost(&turn.markers),
                turn,
            })
            .collect(),
        reservation.min(budget),
        budget,
    );
    let current_tokens: usize = current_packed.iter().map(|t| t.token_count).sum();
    let remaining = budget.saturating_sub(current_tokens);

    let (marked_taken, remaining) = fill_until_overflow(marked_candidates, remaining);

    let mut rest: Vec<ScoredCandidate<RestPayload>> = fact_candidates
        .into_iter()
        .map(|c| ScoredCandidate {
            payload: RestPayload::Fact(c.payload),
            score: c.score,
            token_count: c.token_count,
            created_at: c.created_at,
        })
        .chain(vector_candidates.into_iter().map(|c| ScoredCandidate {
            payload: RestPayload::Turn(c.payload),
            score: c.score,
            token_count: c.token_count,
            created_at: c.created_at,
        }))
        .collect();
    sort_by_score(&mut rest);
    let (rest_taken, _remaining) = fill_skipping_oversize(rest, remaining);

    // Assemble: facts first, then past turns by descending score, then the
    // current episode chronologically.
    let mut facts_out: Vec<ScoredCandidate<Fact>> = Vec::new();
    let mut past_turns_out: Vec<ScoredCandidate<Turn>> = marked_taken;
    for candidate in rest_taken {
        match candidate.payload {
            RestPayload::Fact(fact) => facts_out.push(ScoredCandidate {
                payload: fact,
                score: candidate.score,
                token_count: candidate.token_count,
                created_at: candidate.created_at,
            }),
            RestPayload::Turn(turn) => past_turns_out.push(ScoredCandidate {
                payload: turn,
                score: candidate.score,
                token_count: candidate.token_count,
                created_at: candidate.created_at,
            }),
        }
    }
    sort_by_score(&mut facts_out);
    sort_by_score(&mut past_turns_out);

    let mut items = Vec::with_capacity(facts_out.len() + past_turns_out.len() + current_packed.len());
    for fact in facts_out {
        items.push(ContextItem {
            content: fact.payload.content,
            role: None,
            markers: fact.payload.markers,
            score: fact.score,
            token_count: fact.token_count,
            source_type: SourceType::Fact,
            source_id: fact.payload.fact_id,
        });
    }
    for turn in past_turns_out {
        items.push(ContextItem {
            content: turn.payload.content,
            role: Some(turn.payload.role),
            markers: turn.payload.markers,
            score: turn.score,
            token_count: turn.token_count,
            source_type: SourceType::Turn,
            source_id: turn.payload.turn_id,
        });
    }
    for turn in current_packed {
        items.push(ContextItem {
            content: turn.content,
            role: Some(turn.role),
            markers: turn.markers,
            score: 0.0,
            token_count: turn.token_count,
            source_type: SourceType::Turn,
            source_id: turn.turn_id,
        });
    }

    debug!(
        session_id = ctx.session_id,
        items = items.len(),
        budget,
        degraded,
        "recall assembled"
    );
    Ok(items)
}

enum RestPayload {
    Fact(Fact),
    Turn(Turn),
}
