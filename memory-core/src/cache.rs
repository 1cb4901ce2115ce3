//! Optional write-through LRU cache in front of a storage backend.
//!
//! One cache per session facade. Reads check the cache before the inner
//! backend; writes go through to the backend first and then update the
//! cache. The cache is non-authoritative: entries can be evicted at any
//! time and are rebuilt from storage on the next read. Fact supersession
//! invalidates the cached active-fact set.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::{EmbeddingMetadata, StorageBackend, VectorFilter, VectorMatch};
use crate::types::{CacheConfig, Episode, EpisodeStatus, Fact, FactStatus, Turn};

/// Hit/miss counters across all cached tables.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheMetrics {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n.max(1)).unwrap_or(NonZeroUsize::MIN)
}

/// Write-through cache decorator implementing [`StorageBackend`].
pub struct CachedStorage {
    inner: Arc<dyn StorageBackend>,
    turns: Mutex<LruCache<Uuid, Turn>>,
    episodes: Mutex<LruCache<Uuid, Episode>>,
    episode_turns: Mutex<LruCache<Uuid, Vec<Turn>>>,
    embeddings: Mutex<LruCache<Uuid, Vec<f32>>>,
    /// All marked turns per session; readers filter by excluded episode.
    marked_turns: Mutex<LruCache<String, Vec<Turn>>>,
    /// Active facts per session.
    active_facts: Mutex<LruCache<String, Vec<Fact>>>,
    metrics: CacheMetrics,
}

impl CachedStorage {
    #[must_use]
    pub fn new(inner: Arc<dyn StorageBackend>, config: &CacheConfig) -> Self {
        Self {
            inner,
            turns: Mutex::new(LruCache::new(capacity(config.turn_capacity))),
            episodes: Mutex::new(LruCache::new(capacity(config.episode_capacity))),
            episode_turns: Mutex::new(LruCache::new(capacity(config.episode_capacity))),
            embeddings: Mutex::new(LruCache::new(capacity(config.embedding_capacity))),
            marked_turns: Mutex::new(LruCache::new(capacity(config.session_capacity))),
            active_facts: Mutex::new(LruCache::new(capacity(config.session_capacity))),
            metrics: CacheMetrics::default(),
        }
    }

    /// Hit/miss counters.
    #[must_use]
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

#[async_trait]
impl StorageBackend for CachedStorage {
    async fn initialize(&self) -> Result<()> {
        self.inner.initialize().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    async fn save_turn(&self, turn: &Turn) -> Result<()> {
        self.inner.save_turn(turn).await?;
        self.turns.lock().put(turn.turn_id, turn.clone());
        {
            let mut episode_turns = self.episode_turns.lock();
            if let Some(list) = episode_turns.get_mut(&turn.episode_id) {
                list.retain(|t| t.turn_id != turn.turn_id);
                list.push(turn.clone());
            }
        }
        if turn.is_marked() {
            let mut marked = self.marked_turns.lock();
            if let Some(list) = marked.get_mut(&turn.session_id) {
                list.retain(|t| t.turn_id != turn.turn_id);
                list.push(turn.clone());
            }
        }
        Ok(())
    }

    async fn get_turn(&self, id: Uuid) -> Result<Option<Turn>> {
        if let Some(turn) = self.turns.lock().get(&id).cloned() {
            self.metrics.hit();
            return Ok(Some(turn));
        }
        self.metrics.miss();
        let turn = self.inner.get_turn(id).await?;
        if let Some(turn) = &turn {
            self.turns.lock().put(id, turn.clone());
        }
        Ok(turn)
    }

    async fn get_turns_by_episode(&self, episode_id: Uuid) -> Result<Vec<Turn>> {
        if let Some(list) = self.episode_turns.lock().get(&episode_id).cloned() {
            self.metrics.hit();
            return Ok(list);
        }
        self.metrics.miss();
        let list = self.inner.get_turns_by_episode(episode_id).await?;
        self.episode_turns.lock().put(episode_id, list.clone());
        Ok(list)
    }

    async fn get_marked_turns(
        &self,
        session_id: &str,
        exclude_episode: Option<Uuid>,
    ) -> Result<Vec<Turn>> {
        let cached = self.marked_turns.lock().get(session_id).cloned();
        let all = if let Some(list) = cached {
            self.metrics.hit();
            list
        } else {
            self.metrics.miss();
            let list = self.inner.get_marked_turns(session_id, None).await?;
            self.marked_turns.lock().put(session_id.to_string(), list.clone());
            list
        };
        Ok(match exclude_episode {
            Some(excluded) => all.into_iter().filter(|t| t.episode_id != excluded).collect(),
            None => all,
        })
    }

    async fn save_episode(&self, episode: &Episode) -> Result<()> {
        self.inner.save_episode(episode).await?;
        self.episodes.lock().put(episode.episode_id, episode.clone());
        Ok(())
    }

    async fn get_episode(&self, id: Uuid) -> Result<Option<Episode>> {
        if let Some(episode) = self.episodes.lock().get(&id).cloned() {
            self.metrics.hit();
            return Ok(Some(episode));
        }
        self.metrics.miss();
        let episode = self.inner.get_episode(id).await?;
        if let Some(episode) = &episode {
            self.episodes.lock().put(id, episode.clone());
        }
        Ok(episode)
    }

    async fn get_episodes(
        &self,
        session_id: &str,
        status: Option<EpisodeStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<Episode>> {
        self.inner.get_episodes(session_id, status, limit).await
    }

    async fn save_fact(&self, fact: &Fact) -> Result<()> {
        self.inner.save_fact(fact).await?;
        let mut active = self.active_facts.lock();
        if fact.is_active() {
            if let Some(list) = active.get_mut(&fact.session_id) {
                list.retain(|f| f.fact_id != fact.fact_id);
                list.push(fact.clone());
            }
        } else {
            active.pop(&fact.session_id);
        }
        Ok(())
    }

    async fn update_fact_supersession(
        &self,
        target_id: Uuid,
        superseded_by: Option<Uuid>,
        superseded_at: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self
            .inner
            .update_fact_supersession(target_id, superseded_by, superseded_at)
            .await?;
        if changed {
            // The superseded fact must disappear from the active set; the
            // session key is unknown here, so drop all cached sets (one
            // session per facade in practice).
            self.active_facts.lock().clear();
        }
        Ok(changed)
    }

    async fn get_facts_by_session(
        &self,
        session_id: &str,
        status: Option<FactStatus>,
    ) -> Result<Vec<Fact>> {
        if status != Some(FactStatus::Active) {
            return self.inner.get_facts_by_session(session_id, status).await;
        }
        if let Some(list) = self.active_facts.lock().get(session_id).cloned() {
            self.metrics.hit();
            return Ok(list);
        }
        self.metrics.miss();
        let list = self
            .inner
            .get_facts_by_session(session_id, Some(FactStatus::Active))
            .await?;
        self.active_facts.lock().put(session_id.to_string(), list.clone());
        Ok(list)
    }

    async fn save_embedding(
        &self,
        id: Uuid,
        vector: Vec<f32>,
        metadata: EmbeddingMetadata,
    ) -> Result<()> {
        self.inner.save_embedding(id, vector.clone(), metadata).await?;
        self.embeddings.lock().put(id, vector);
        Ok(())
    }

    async fn get_embedding(&self, id: Uuid) -> Result<Option<Vec<f32>>> {
        if let Some(vector) = self.embeddings.lock().get(&id).cloned() {
            self.metrics.hit();
            return Ok(Some(vector));
        }
        self.metrics.miss();
        let vector = self.inner.get_embedding(id).await?;
        if let Some(vector) = &vector {
            self.embeddings.lock().put(id, vector.clone());
        }
        Ok(vector)
    }

    async fn vector_search(
        &self,
        vector: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorMatch>> {
        self.inner.vector_search(vector, k, filter).await
    }
}
