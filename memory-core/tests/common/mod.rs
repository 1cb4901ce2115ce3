//! Shared fixtures for integration tests.

// Each test binary uses a subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use session_memory_core::{
    MemoryConfig, ReflectionTrace, SessionMemory,
};
use session_memory_storage_mem::InMemoryStorage;
use session_memory_test_utils::{ManualClock, MockEmbedder, ScriptedReflector};

pub const DIM: usize = 8;

/// A facade wired to in-memory storage, the mock embedder, a scripted
/// reflector, and a manual clock.
pub struct TestHarness {
    pub memory: SessionMemory,
    pub storage: Arc<InMemoryStorage>,
    pub embedder: Arc<MockEmbedder>,
    pub reflector: Arc<ScriptedReflector>,
    pub clock: ManualClock,
}

/// Fast retries so provider-failure tests do not sleep for real.
pub fn fast_retry(config: &mut MemoryConfig) {
    config.retry.base_delay = std::time::Duration::from_millis(1);
    config.retry.max_delay = std::time::Duration::from_millis(5);
    config.retry.jitter = 0.0;
}

/// Build an initialized harness with a reflector attached.
pub async fn harness(mut config: MemoryConfig) -> TestHarness {
    fast_retry(&mut config);
    let storage = Arc::new(InMemoryStorage::new());
    let embedder = Arc::new(MockEmbedder::new(DIM));
    let reflector = Arc::new(ScriptedReflector::new());
    let clock = ManualClock::default_epoch();
    let memory = SessionMemory::builder("test-session")
        .config(config)
        .storage(Arc::clone(&storage) as Arc<dyn session_memory_core::StorageBackend>)
        .embedder(Arc::clone(&embedder) as Arc<dyn session_memory_core::EmbeddingProvider>)
        .reflector(Arc::clone(&reflector) as Arc<dyn session_memory_core::Reflector>)
        .clock(Arc::new(clock.clone()))
        .build()
        .expect("harness build");
    memory.initialize().await.expect("initialize");
    TestHarness {
        memory,
        storage,
        embedder,
        reflector,
        clock,
    }
}

/// Build an initialized harness without a reflector (no facts).
pub async fn harness_without_reflector(mut config: MemoryConfig) -> TestHarness {
    fast_retry(&mut config);
    let storage = Arc::new(InMemoryStorage::new());
    let embedder = Arc::new(MockEmbedder::new(DIM));
    let clock = ManualClock::default_epoch();
    let memory = SessionMemory::builder("test-session")
        .config(config)
        .storage(Arc::clone(&storage) as Arc<dyn session_memory_core::StorageBackend>)
        .embedder(Arc::clone(&embedder) as Arc<dyn session_memory_core::EmbeddingProvider>)
        .clock(Arc::new(clock.clone()))
        .build()
        .expect("harness build");
    memory.initialize().await.expect("initialize");
    TestHarness {
        memory,
        storage,
        embedder,
        reflector: Arc::new(ScriptedReflector::new()),
        clock,
    }
}

/// Collects reflection traces emitted through the callback.
#[derive(Clone, Default)]
pub struct TraceCollector {
    traces: Arc<Mutex<Vec<ReflectionTrace>>>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, memory: &SessionMemory) {
        let traces = Arc::clone(&self.traces);
        memory.set_trace_callback(move |trace| {
            traces.lock().push(trace);
        });
    }

    pub fn traces(&self) -> Vec<ReflectionTrace> {
        self.traces.lock().clone()
    }
}

/// A content string whose heuristic token count is exactly `tokens`.
pub fn content_with_tokens(tag: usize, tokens: usize) -> String {
    let mut s = format!("{tag}-");
    while s.chars().count() < tokens * 4 {
        s.push('x');
    }
    s
}
