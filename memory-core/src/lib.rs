#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]

//! # Session Memory Core
//!
//! A session-scoped memory layer for conversational agents. Every turn of a
//! conversation is ingested, grouped into *episodes* by boundary rules,
//! optionally distilled into durable *facts* by a reflection provider, and
//! recalled on demand as a token-budgeted, ranked context assembly.
//!
//! ## Core Concepts
//!
//! - **Turns**: atomic user/assistant/tool messages, tagged with markers
//! - **Episodes**: ordered, time-bounded turn groups with an open/closed
//!   lifecycle; the unit of reflection input
//! - **Facts**: durable statements distilled from closed episodes, subject
//!   to supersession (old facts are kept for audit, never deleted)
//! - **Recall**: four candidate sources scored and packed under a budget
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use session_memory_core::{Role, SessionMemory};
//!
//! # async fn example(
//! #     storage: Arc<dyn session_memory_core::StorageBackend>,
//! #     embedder: Arc<dyn session_memory_core::EmbeddingProvider>,
//! # ) -> session_memory_core::Result<()> {
//! let memory = SessionMemory::builder("session-1")
//!     .storage(storage)
//!     .embedder(embedder)
//!     .build()?;
//! memory.initialize().await?;
//!
//! memory.ingest(Role::User, "Let's pick a database.").await?;
//! memory.ingest(Role::Assistant, "Decision: We'll use PostgreSQL.").await?;
//!
//! let context = memory.recall("What database?", 200).await?;
//! for item in &context {
//!     println!("[{:?}] {}", item.source_type, item.content);
//! }
//! memory.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`session`]: the per-session facade (ingest, recall, lifecycle)
//! - [`episode`]: boundary detection and the open-episode state machine
//! - [`recall`]: candidate gathering, scoring, and budget packing
//! - [`reflection`]: the consolidation runner and its FIFO queue
//! - [`markers`]: marker tags and prefix detection
//! - [`storage`]: the backend trait the core is written against
//! - [`embeddings`] / [`reflector`]: provider traits
//! - [`cache`]: optional write-through LRU in front of storage
//! - [`retry`]: backoff policy for provider and transport calls

pub mod cache;
pub mod clock;
pub mod embeddings;
pub mod episode;
pub mod error;
pub mod markers;
pub mod recall;
pub mod reflection;
pub mod reflector;
pub mod retry;
pub mod session;
pub mod storage;
pub mod tokens;
pub mod trace;
pub mod tracing;
pub mod types;

// Re-export commonly used types
pub use cache::{CacheMetrics, CachedStorage};
pub use clock::{Clock, SystemClock};
pub use embeddings::{centroid, cosine_similarity, EmbeddingProvider};
pub use error::{Error, Result};
pub use markers::{Marker, MarkerDetector};
pub use recall::RecallOptions;
pub use reflector::{FactProposal, ReflectionAction, Reflector, ReflectorOutput};
pub use retry::{RetryMetrics, RetryPolicy, Retryable};
pub use session::{IngestRequest, SessionMemory, SessionMemoryBuilder};
pub use storage::{
    EmbeddingKind, EmbeddingMetadata, MarkerPresence, StorageBackend, VectorFilter, VectorMatch,
};
pub use self::tracing::init_tracing;
pub use tokens::{HeuristicTokenCounter, TokenCounter};
pub use trace::{ReflectionTrace, TraceMode, TraceSink};
pub use types::{
    CacheConfig, CloseReason, ContextItem, Episode, EpisodeConfig, EpisodeStatus, Fact, FactStatus,
    MarkerWeights, MemoryConfig, RecallConfig, ReflectionConfig, RetryConfig, Role, SessionStats,
    SourceType, Turn,
};
