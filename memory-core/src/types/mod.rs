//! Common value types shared across the session memory system.

mod config;
mod enums;
mod structs;

pub use config::{
    CacheConfig, EpisodeConfig, MarkerWeights, MemoryConfig, RecallConfig, ReflectionConfig,
    RetryConfig,
};
pub use enums::{CloseReason, EpisodeStatus, FactStatus, Role, SourceType};
pub use structs::{ContextItem, Episode, Fact, SessionStats, Turn};
