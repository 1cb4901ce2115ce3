//! Deterministic mock providers and fixtures for session-memory tests.
//!
//! The mock embedder produces hash-seeded unit vectors, so equal texts get
//! equal embeddings and tests can pin exact vectors per text where cosine
//! relationships matter. The scripted reflector replays queued outputs or
//! closures. The manual clock makes time-gap boundaries and timestamps
//! deterministic without sleeping.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};

use session_memory_core::{
    Clock, EmbeddingProvider, Fact, Reflector, ReflectorOutput, Turn,
};

/// Deterministic embedding provider for tests.
///
/// Texts without a pinned fixture get a normalized pseudo-random vector
/// seeded by the text's hash.
pub struct MockEmbedder {
    dimension: usize,
    fixtures: RwLock<HashMap<String, Vec<f32>>>,
    calls: AtomicUsize,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fixtures: RwLock::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Pin the vector returned for an exact text.
    #[must_use]
    pub fn with_fixture(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.fixtures.write().insert(text.into(), vector);
        self
    }

    /// Pin a vector after construction.
    pub fn set_fixture(&self, text: impl Into<String>, vector: Vec<f32>) {
        self.fixtures.write().insert(text.into(), vector);
    }

    /// Number of `embed` calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The deterministic vector for a text (fixture or hash-seeded).
    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(vector) = self.fixtures.read().get(text) {
            return vector.clone();
        }
        hash_embedding(text, self.dimension)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Generate a deterministic normalized embedding from a text hash.
#[must_use]
pub fn hash_embedding(text: &str, dimension: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    let mut seed = hasher.finish();

    let mut embedding = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let value = ((seed >> 16) as f32) / 32768.0 - 1.0;
        embedding.push(value);
    }
    let magnitude = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for x in &mut embedding {
            *x /= magnitude;
        }
    }
    embedding
}

/// Embedding provider that fails the first `failures` calls, then delegates.
pub struct FlakyEmbedder {
    inner: Arc<MockEmbedder>,
    remaining_failures: AtomicUsize,
}

impl FlakyEmbedder {
    #[must_use]
    pub fn new(inner: Arc<MockEmbedder>, failures: usize) -> Self {
        Self {
            inner,
            remaining_failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow!("simulated transient embedder failure"));
        }
        self.inner.embed(texts).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// Embedding provider that always fails.
pub struct FailingEmbedder {
    dimension: usize,
}

impl FailingEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(anyhow!("simulated permanent embedder failure"))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

type ReflectorScript = Box<dyn Fn(&[Fact], &[Turn]) -> Result<ReflectorOutput> + Send + Sync>;

/// Reflector replaying queued outputs or closures, one per call.
///
/// When the queue is empty, reflect returns an empty action list.
#[derive(Default)]
pub struct ScriptedReflector {
    scripts: Mutex<VecDeque<ReflectorScript>>,
    calls: AtomicUsize,
}

impl ScriptedReflector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fixed output for the next call.
    pub fn push_output(&self, output: ReflectorOutput) {
        self.scripts
            .lock()
            .push_back(Box::new(move |_, _| Ok(output.clone())));
    }

    /// Queue a closure computing the next call's output from its inputs.
    pub fn push_script(
        &self,
        script: impl Fn(&[Fact], &[Turn]) -> Result<ReflectorOutput> + Send + Sync + 'static,
    ) {
        self.scripts.lock().push_back(Box::new(script));
    }

    /// Queue a failure for the next call.
    pub fn push_failure(&self, message: impl Into<String>) {
        let message = message.into();
        self.scripts
            .lock()
            .push_back(Box::new(move |_, _| Err(anyhow!(message.clone()))));
    }

    /// Number of `reflect` calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reflector for ScriptedReflector {
    async fn reflect(&self, existing_facts: &[Fact], turns: &[Turn]) -> Result<ReflectorOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().pop_front();
        match script {
            Some(script) => script(existing_facts, turns),
            None => Ok(ReflectorOutput::Actions(Vec::new())),
        }
    }
}

/// Manually advanced clock.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Start at a fixed, arbitrary epoch.
    #[must_use]
    pub fn default_epoch() -> Self {
        Self::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_else(Utc::now))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
