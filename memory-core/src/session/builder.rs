//! Builder for [`SessionMemory`].

use std::sync::Arc;

use crate::cache::CachedStorage;
use crate::clock::{Clock, SystemClock};
use crate::embeddings::EmbeddingProvider;
use crate::episode::EpisodeManager;
use crate::error::{Error, Result};
use crate::reflection::{ReflectionQueue, ReflectionRunner};
use crate::reflector::Reflector;
use crate::retry::{RetryMetrics, RetryPolicy};
use crate::storage::StorageBackend;
use crate::tokens::{HeuristicTokenCounter, TokenCounter};
use crate::trace::TraceSink;
use crate::types::MemoryConfig;

use super::{SessionMemory, SessionState};

/// Assembles a [`SessionMemory`] from its collaborators.
///
/// Storage and embedder are required; the reflector is optional (without it,
/// episodes close without producing facts). `build` validates the
/// configuration and, when reflection is configured, spawns the session's
/// reflection worker, so it must run inside a tokio runtime.
pub struct SessionMemoryBuilder {
    session_id: String,
    config: MemoryConfig,
    storage: Option<Arc<dyn StorageBackend>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    reflector: Option<Arc<dyn Reflector>>,
    counter: Arc<dyn TokenCounter>,
    clock: Arc<dyn Clock>,
}

impl SessionMemoryBuilder {
    pub(crate) fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            config: MemoryConfig::default(),
            storage: None,
            embedder: None,
            reflector: None,
            counter: Arc::new(HeuristicTokenCounter),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn config(mut self, config: MemoryConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[must_use]
    pub fn reflector(mut self, reflector: Arc<dyn Reflector>) -> Self {
        self.reflector = Some(reflector);
        self
    }

    #[must_use]
    pub fn token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate configuration and assemble the facade.
    pub fn build(self) -> Result<SessionMemory> {
        if self.session_id.is_empty() {
            return Err(Error::Validation("session_id must be non-empty".to_string()));
        }
        self.config.validate()?;
        let storage = self
            .storage
            .ok_or_else(|| Error::Configuration("a storage backend is required".to_string()))?;
        let embedder = self
            .embedder
            .ok_or_else(|| Error::Configuration("an embedding provider is required".to_string()))?;

        let storage: Arc<dyn StorageBackend> = match &self.config.cache {
            Some(cache_config) => Arc::new(CachedStorage::new(storage, cache_config)),
            None => storage,
        };

        let trace = TraceSink::new();
        let retry_metrics = Arc::new(RetryMetrics::new());
        let state = SessionState {
            initialized: false,
            episodes: EpisodeManager::new(self.session_id.clone(), self.config.episode.clone())?,
            last_created_at: None,
        };

        let (runner, queue) = match (&self.reflector, self.config.reflection.enabled) {
            (Some(reflector), true) => {
                let runner = Arc::new(ReflectionRunner::new(
                    self.session_id.clone(),
                    Arc::clone(&storage),
                    Arc::clone(&embedder),
                    Arc::clone(reflector),
                    Arc::clone(&self.clock),
                    self.config.reflection.clone(),
                    RetryPolicy::new(self.config.retry.clone())
                        .with_metrics(Arc::clone(&retry_metrics)),
                    trace.clone(),
                ));
                let queue = ReflectionQueue::spawn(Arc::clone(&runner));
                (Some(runner), Some(queue))
            }
            _ => (None, None),
        };

        Ok(SessionMemory::from_parts(
            self.session_id,
            self.config,
            storage,
            embedder,
            self.counter,
            self.clock,
            state,
            runner,
            queue,
            trace,
            retry_metrics,
        ))
    }
}
