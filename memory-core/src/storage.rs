//! Storage backend abstraction.
//!
//! The backend is the single source of truth for turns, episodes, facts, and
//! embeddings. All operations are async; list operations must be
//! snapshot-consistent per read so recall can run concurrently with a
//! pending reflection.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::markers::Marker;
use crate::types::{Episode, EpisodeStatus, Fact, FactStatus, Turn};

/// What an embedding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    Turn,
    Fact,
}

/// Metadata persisted alongside an embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    /// Owning session
    pub session_id: String,
    /// Turn or fact embedding
    pub kind: EmbeddingKind,
    /// Episode of the source turn (None for facts)
    pub episode_id: Option<Uuid>,
    /// Marker set of the source turn or fact
    #[serde(default)]
    pub markers: BTreeSet<Marker>,
}

/// Filter on the marker set of vector-search candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkerPresence {
    /// No constraint
    #[default]
    Any,
    /// Only sources with an empty marker set
    Empty,
    /// Only sources with at least one marker
    NonEmpty,
}

impl MarkerPresence {
    /// Whether a marker set passes this filter.
    #[must_use]
    pub fn matches(&self, markers: &BTreeSet<Marker>) -> bool {
        match self {
            MarkerPresence::Any => true,
            MarkerPresence::Empty => markers.is_empty(),
            MarkerPresence::NonEmpty => !markers.is_empty(),
        }
    }
}

/// Metadata filter for [`StorageBackend::vector_search`].
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    /// Equality on session id
    pub session_id: Option<String>,
    /// Equality on embedding kind
    pub kind: Option<EmbeddingKind>,
    /// Marker-set emptiness constraint
    pub markers: MarkerPresence,
    /// Exclude sources from this episode (used to keep current-episode
    /// turns out of past-turn candidates)
    pub exclude_episode: Option<Uuid>,
}

impl VectorFilter {
    /// Whether an embedding's metadata passes this filter.
    #[must_use]
    pub fn matches(&self, metadata: &EmbeddingMetadata) -> bool {
        if let Some(session_id) = &self.session_id {
            if metadata.session_id != *session_id {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if metadata.kind != kind {
                return false;
            }
        }
        if let Some(excluded) = self.exclude_episode {
            if metadata.episode_id == Some(excluded) {
                return false;
            }
        }
        self.markers.matches(&metadata.markers)
    }
}

/// One vector-search hit, ordered descending by similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    /// Source turn or fact id
    pub id: Uuid,
    /// Cosine similarity to the query vector
    pub score: f32,
    /// Metadata stored with the embedding
    pub metadata: EmbeddingMetadata,
}

/// Unified storage backend trait.
///
/// Core logic never deletes turns or facts; fact supersession is the only
/// visibility-changing mutation and must be atomic per fact.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Prepare the backend for use. Idempotent.
    async fn initialize(&self) -> Result<()>;

    /// Flush and release resources. Idempotent.
    async fn close(&self) -> Result<()>;

    // ========== Turns ==========

    /// Persist a turn.
    async fn save_turn(&self, turn: &Turn) -> Result<()>;

    /// Fetch a turn by id.
    async fn get_turn(&self, id: Uuid) -> Result<Option<Turn>>;

    /// All turns of an episode, ordered by `created_at`.
    async fn get_turns_by_episode(&self, episode_id: Uuid) -> Result<Vec<Turn>>;

    /// Marked turns of a session, optionally excluding one episode,
    /// ordered by `created_at`.
    async fn get_marked_turns(
        &self,
        session_id: &str,
        exclude_episode: Option<Uuid>,
    ) -> Result<Vec<Turn>>;

    // ========== Episodes ==========

    /// Persist an episode record (insert or replace by id).
    async fn save_episode(&self, episode: &Episode) -> Result<()>;

    /// Fetch an episode by id.
    async fn get_episode(&self, id: Uuid) -> Result<Option<Episode>>;

    /// Episodes of a session, optionally filtered by status, ordered by
    /// `opened_at`, newest-first, truncated to `limit` when given.
    async fn get_episodes(
        &self,
        session_id: &str,
        status: Option<EpisodeStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<Episode>>;

    // ========== Facts ==========

    /// Persist a fact.
    async fn save_fact(&self, fact: &Fact) -> Result<()>;

    /// Atomically supersede a fact: compare-and-set `status` from active to
    /// superseded, recording `superseded_by` and `superseded_at`.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// fact was already superseded (the caller must treat that as a no-op).
    async fn update_fact_supersession(
        &self,
        target_id: Uuid,
        superseded_by: Option<Uuid>,
        superseded_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Facts of a session, optionally filtered by status, ordered by
    /// `created_at`.
    async fn get_facts_by_session(
        &self,
        session_id: &str,
        status: Option<FactStatus>,
    ) -> Result<Vec<Fact>>;

    // ========== Embeddings ==========

    /// Persist the embedding for a turn or fact (one active embedding per
    /// source id; saving again replaces).
    async fn save_embedding(
        &self,
        id: Uuid,
        vector: Vec<f32>,
        metadata: EmbeddingMetadata,
    ) -> Result<()>;

    /// Fetch the embedding for a source id.
    async fn get_embedding(&self, id: Uuid) -> Result<Option<Vec<f32>>>;

    /// k-nearest-neighbor search, descending by cosine similarity,
    /// honoring the metadata filter.
    async fn vector_search(
        &self,
        vector: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorMatch>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(markers: BTreeSet<Marker>) -> EmbeddingMetadata {
        EmbeddingMetadata {
            session_id: "s1".to_string(),
            kind: EmbeddingKind::Turn,
            episode_id: Some(Uuid::new_v4()),
            markers,
        }
    }

    #[test]
    fn filter_matches_on_session_and_kind() {
        let meta = metadata(BTreeSet::new());
        let mut filter = VectorFilter {
            session_id: Some("s1".to_string()),
            kind: Some(EmbeddingKind::Turn),
            ..VectorFilter::default()
        };
        assert!(filter.matches(&meta));
        filter.session_id = Some("other".to_string());
        assert!(!filter.matches(&meta));
        filter.session_id = Some("s1".to_string());
        filter.kind = Some(EmbeddingKind::Fact);
        assert!(!filter.matches(&meta));
    }

    #[test]
    fn filter_matches_marker_presence() {
        let unmarked = metadata(BTreeSet::new());
        let marked = metadata(BTreeSet::from([Marker::Decision]));
        let empty_only = VectorFilter {
            markers: MarkerPresence::Empty,
            ..VectorFilter::default()
        };
        assert!(empty_only.matches(&unmarked));
        assert!(!empty_only.matches(&marked));
        let non_empty_only = VectorFilter {
            markers: MarkerPresence::NonEmpty,
            ..VectorFilter::default()
        };
        assert!(!non_empty_only.matches(&unmarked));
        assert!(non_empty_only.matches(&marked));
    }

    #[test]
    fn filter_excludes_episode() {
        let meta = metadata(BTreeSet::new());
        let filter = VectorFilter {
            exclude_episode: meta.episode_id,
            ..VectorFilter::default()
        };
        assert!(!filter.matches(&meta));
    }
}
