//! # In-Memory Storage Backend
//!
//! Reference [`StorageBackend`] implementation backed by hash maps behind a
//! single async `RwLock`, so every list operation reads one coherent
//! point-in-time view. Vector search is a brute-force cosine scan honoring
//! the metadata filter. Suitable for tests, examples, and small sessions;
//! durable backends implement the same trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use session_memory_core::{
    cosine_similarity, EmbeddingMetadata, Episode, EpisodeStatus, Fact, FactStatus, Result,
    StorageBackend, Turn, VectorFilter, VectorMatch,
};

#[derive(Default)]
struct Tables {
    turns: HashMap<Uuid, Turn>,
    episodes: HashMap<Uuid, Episode>,
    facts: HashMap<Uuid, Fact>,
    embeddings: HashMap<Uuid, (Vec<f32>, EmbeddingMetadata)>,
}

/// In-memory storage backend.
#[derive(Default, Clone)]
pub struct InMemoryStorage {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored embeddings (test observability).
    pub async fn embedding_count(&self) -> usize {
        self.tables.read().await.embeddings.len()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn save_turn(&self, turn: &Turn) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.turns.insert(turn.turn_id, turn.clone());
        Ok(())
    }

    async fn get_turn(&self, id: Uuid) -> Result<Option<Turn>> {
        Ok(self.tables.read().await.turns.get(&id).cloned())
    }

    async fn get_turns_by_episode(&self, episode_id: Uuid) -> Result<Vec<Turn>> {
        let tables = self.tables.read().await;
        let mut turns: Vec<Turn> = tables
            .turns
            .values()
            .filter(|t| t.episode_id == episode_id)
            .cloned()
            .collect();
        turns.sort_by_key(|t| t.created_at);
        Ok(turns)
    }

    async fn get_marked_turns(
        &self,
        session_id: &str,
        exclude_episode: Option<Uuid>,
    ) -> Result<Vec<Turn>> {
        let tables = self.tables.read().await;
        let mut turns: Vec<Turn> = tables
            .turns
            .values()
            .filter(|t| {
                t.session_id == session_id
                    && t.is_marked()
                    && exclude_episode != Some(t.episode_id)
            })
            .cloned()
            .collect();
        turns.sort_by_key(|t| t.created_at);
        Ok(turns)
    }

    async fn save_episode(&self, episode: &Episode) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.episodes.insert(episode.episode_id, episode.clone());
        Ok(())
    }

    async fn get_episode(&self, id: Uuid) -> Result<Option<Episode>> {
        Ok(self.tables.read().await.episodes.get(&id).cloned())
    }

    async fn get_episodes(
        &self,
        session_id: &str,
        status: Option<EpisodeStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<Episode>> {
        let tables = self.tables.read().await;
        let mut episodes: Vec<Episode> = tables
            .episodes
            .values()
            .filter(|e| e.session_id == session_id && status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();
        episodes.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        if let Some(limit) = limit {
            episodes.truncate(limit);
        }
        Ok(episodes)
    }

    async fn save_fact(&self, fact: &Fact) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.facts.insert(fact.fact_id, fact.clone());
        Ok(())
    }

    async fn update_fact_supersession(
        &self,
        target_id: Uuid,
        superseded_by: Option<Uuid>,
        superseded_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.facts.get_mut(&target_id) {
            Some(fact) if fact.status == FactStatus::Active => {
                fact.status = FactStatus::Superseded;
                fact.superseded_by = superseded_by;
                fact.superseded_at = Some(superseded_at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(session_memory_core::Error::FactNotFound(target_id)),
        }
    }

    async fn get_facts_by_session(
        &self,
        session_id: &str,
        status: Option<FactStatus>,
    ) -> Result<Vec<Fact>> {
        let tables = self.tables.read().await;
        let mut facts: Vec<Fact> = tables
            .facts
            .values()
            .filter(|f| f.session_id == session_id && status.is_none_or(|s| f.status == s))
            .cloned()
            .collect();
        facts.sort_by_key(|f| f.created_at);
        Ok(facts)
    }

    async fn save_embedding(
        &self,
        id: Uuid,
        vector: Vec<f32>,
        metadata: EmbeddingMetadata,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.embeddings.insert(id, (vector, metadata));
        Ok(())
    }

    async fn get_embedding(&self, id: Uuid) -> Result<Option<Vec<f32>>> {
        Ok(self
            .tables
            .read()
            .await
            .embeddings
            .get(&id)
            .map(|(vector, _)| vector.clone()))
    }

    async fn vector_search(
        &self,
        vector: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorMatch>> {
        let tables = self.tables.read().await;
        let mut matches: Vec<VectorMatch> = tables
            .embeddings
            .iter()
            .filter(|(_, (_, metadata))| filter.matches(metadata))
            .map(|(id, (candidate, metadata))| VectorMatch {
                id: *id,
                score: cosine_similarity(vector, candidate),
                metadata: metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(k);
        Ok(matches)
    }
}
