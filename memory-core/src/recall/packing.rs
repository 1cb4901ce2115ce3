//! Token-budget packing for recall results.
//!
//! Packing never overflows the budget and never truncates an item. The
//! current episode gets a reservation first; marked past turns fill next in
//! score order, stopping at the first item that would overflow; facts and
//! unmarked past turns fill last, skipping items that do not fit.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::types::Turn;

/// A current-episode turn with its packing inputs.
#[derive(Debug, Clone)]
pub(crate) struct CurrentTurn {
    pub turn: Turn,
    /// Marker boost, used only to rank marked turns in the overflow path
    pub boost: f32,
}

/// A scored past candidate (marked turn, fact, or vector hit).
#[derive(Debug, Clone)]
pub(crate) struct ScoredCandidate<T> {
    pub payload: T,
    /// Relevance plus marker boost
    pub score: f32,
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Sort candidates descending by score, newest-first on ties.
pub(crate) fn sort_by_score<T>(candidates: &mut [ScoredCandidate<T>]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

/// Select current-episode turns under the reservation, preserving
/// chronological order.
///
/// Oldest unmarked turns are dropped first. The most recent turn is kept
/// whenever it fits the full budget, and marked turns are retained past the
/// reservation as long as the full budget allows; if marked turns alone
/// exceed the budget, the highest-boost ones are kept and the rest dropped
/// with a warning.
pub(crate) fn pack_current_episode(turns: Vec<CurrentTurn>, reservation: usize, budget: usize) -> Vec<Turn> {
    if turns.is_empty() {
        return Vec::new();
    }
    let newest_id = turns[turns.len() - 1].turn.turn_id;
    let mut selected = turns;
    let mut total: usize = selected.iter().map(|t| t.turn.token_count).sum();

    // Drop oldest unmarked first, sparing the most recent turn.
    while total > reservation {
        let victim = selected
            .iter()
            .position(|t| !t.turn.is_marked() && t.turn.turn_id != newest_id);
        match victim {
            Some(index) => {
                total -= selected[index].turn.token_count;
                selected.remove(index);
            }
            None => break,
        }
    }

    if total > budget {
        warn!(
            total_tokens = total,
            budget, "current episode exceeds the full token budget; dropping turns"
        );
        // Seed with the newest turn when it fits, then keep marked turns by
        // descending boost.
        let mut by_boost: Vec<CurrentTurn> = selected.clone();
        by_boost.sort_by(|a, b| {
            b.boost
                .partial_cmp(&a.boost)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.turn.created_at.cmp(&a.turn.created_at))
        });
        let mut kept_ids = Vec::new();
        let mut kept_total = 0usize;
        if let Some(newest) = selected.iter().find(|t| t.turn.turn_id == newest_id) {
            if newest.turn.token_count <= budget {
                kept_total += newest.turn.token_count;
                kept_ids.push(newest_id);
            }
        }
        for candidate in &by_boost {
            if candidate.turn.turn_id == newest_id && kept_ids.contains(&newest_id) {
                continue;
            }
            if kept_total + candidate.turn.token_count <= budget {
                kept_total += candidate.turn.token_count;
                kept_ids.push(candidate.turn.turn_id);
            }
        }
        selected.retain(|t| kept_ids.contains(&t.turn.turn_id));
    }

    selected.into_iter().map(|t| t.turn).collect()
}

/// Fill from candidates in order, stopping at the first item that would
/// overflow `remaining`. Returns the taken candidates and the budget left.
pub(crate) fn fill_until_overflow<T>(
    candidates: Vec<ScoredCandidate<T>>,
    mut remaining: usize,
) -> (Vec<ScoredCandidate<T>>, usize) {
    let mut taken = Vec::new();
    for candidate in candidates {
        if candidate.token_count > remaining {
            break;
        }
        remaining -= candidate.token_count;
        taken.push(candidate);
    }
    (taken, remaining)
}

/// Fill from candidates in order, skipping items that do not fit. Returns
/// the taken candidates and the budget left.
pub(crate) fn fill_skipping_oversize<T>(
    candidates: Vec<ScoredCandidate<T>>,
    mut remaining: usize,
) -> (Vec<ScoredCandidate<T>>, usize) {
    let mut taken = Vec::new();
    for candidate in candidates {
        if candidate.token_count > remaining {
            continue;
        }
        remaining -= candidate.token_count;
        taken.push(candidate);
    }
    (taken, remaining)
}
