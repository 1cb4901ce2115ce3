//! Validated configuration for the session memory system.
//!
//! Every option has a default; `MemoryConfig::validate` surfaces bad values
//! as `Configuration` errors at construction time.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::markers::Marker;

/// Per-marker score boosts applied during recall scoring.
///
/// `overrides` wins over the family defaults and is keyed by the canonical
/// marker string (e.g. `custom:billing`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerWeights {
    pub decision: f32,
    pub constraint: f32,
    pub failure: f32,
    pub goal: f32,
    /// Default weight for any `custom:<label>` marker
    pub custom: f32,
    /// Per-marker overrides keyed by canonical marker string
    #[serde(default)]
    pub overrides: HashMap<String, f32>,
}

impl Default for MarkerWeights {
    fn default() -> Self {
        Self {
            decision: 0.3,
            constraint: 0.4,
            failure: 0.2,
            goal: 0.3,
            custom: 0.2,
            overrides: HashMap::new(),
        }
    }
}

impl MarkerWeights {
    /// Weight for a single marker.
    #[must_use]
    pub fn weight(&self, marker: &Marker) -> f32 {
        if let Some(w) = self.overrides.get(&marker.as_str()) {
            return *w;
        }
        match marker {
            Marker::Decision => self.decision,
            Marker::Constraint => self.constraint,
            Marker::Failure => self.failure,
            Marker::Goal => self.goal,
            Marker::Custom(_) => self.custom,
        }
    }

    /// Total boost for a marker set.
    #[must_use]
    pub fn boost<'a, I: IntoIterator<Item = &'a Marker>>(&self, markers: I) -> f32 {
        markers.into_iter().map(|m| self.weight(m)).sum()
    }
}

/// Episode boundary detection options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeConfig {
    /// Close after this many turns
    pub max_turns_per_episode: usize,
    /// Close before appending a turn this many seconds after the previous one
    pub max_time_gap_seconds: u64,
    /// Close after appending a tool turn
    pub close_on_tool_result: bool,
    /// Close after appending a turn whose content matches any of these regexes
    pub close_on_patterns: Vec<String>,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            max_turns_per_episode: 6,
            max_time_gap_seconds: 1800,
            close_on_tool_result: false,
            close_on_patterns: Vec::new(),
        }
    }
}

impl EpisodeConfig {
    /// Time gap as a chrono duration.
    #[must_use]
    pub fn max_time_gap(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.max_time_gap_seconds).unwrap_or(i64::MAX))
    }
}

/// Recall pipeline options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallConfig {
    /// Budget used when the caller does not pass one
    pub default_token_budget: usize,
    /// Fraction of the budget reserved for current-episode turns
    pub current_episode_budget_pct: f32,
    /// k for the unmarked-past vector search
    pub vector_search_k: usize,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            default_token_budget: 2048,
            current_episode_budget_pct: 0.4,
            vector_search_k: 10,
        }
    }
}

/// Reflection (fact distillation) options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// Whether closed episodes are reflected into facts
    pub enabled: bool,
    /// Episodes with fewer turns carry forward instead of reflecting alone
    pub min_episode_turns: usize,
    /// Cap on facts saved per reflection
    pub max_facts_per_episode: usize,
    /// Cosine similarity floor for scoping prior facts to the episode centroid
    pub consolidation_similarity_threshold: f32,
    /// Cosine similarity at which a proposed fact is a duplicate
    pub dedup_similarity_threshold: f32,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_episode_turns: 3,
            max_facts_per_episode: 10,
            consolidation_similarity_threshold: 0.3,
            dedup_similarity_threshold: 0.95,
        }
    }
}

/// Retry policy options for provider and transport calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// First backoff delay
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
    /// Exponential growth factor
    pub exponential_base: f64,
    /// Jitter fraction in [0, 1]; 0 disables jitter
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: 0.25,
        }
    }
}

/// Capacities for the optional write-through storage cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Individual turns by id
    pub turn_capacity: usize,
    /// Episode records and per-episode turn lists
    pub episode_capacity: usize,
    /// Embedding vectors by source id
    pub embedding_capacity: usize,
    /// Per-session active-fact and marked-turn sets
    pub session_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            turn_capacity: 1024,
            episode_capacity: 128,
            embedding_capacity: 1024,
            session_capacity: 16,
        }
    }
}

/// Top-level configuration for a session memory instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Run the marker detector on every ingested turn
    pub auto_detect_markers: bool,
    /// Recall score boosts per marker
    pub marker_weights: MarkerWeights,
    /// Episode boundary rules
    pub episode: EpisodeConfig,
    /// Recall pipeline options
    pub recall: RecallConfig,
    /// Reflection options
    pub reflection: ReflectionConfig,
    /// Retry policy for provider calls
    pub retry: RetryConfig,
    /// Write-through cache in front of storage; None disables caching
    pub cache: Option<CacheConfig>,
}

impl MemoryConfig {
    /// Validate option ranges and close patterns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first offending option.
    pub fn validate(&self) -> Result<()> {
        if self.episode.max_turns_per_episode == 0 {
            return Err(Error::Configuration(
                "max_turns_per_episode must be at least 1".to_string(),
            ));
        }
        if self.reflection.min_episode_turns == 0 {
            return Err(Error::Configuration(
                "min_episode_turns must be at least 1".to_string(),
            ));
        }
        if self.recall.vector_search_k == 0 {
            return Err(Error::Configuration(
                "vector_search_k must be at least 1".to_string(),
            ));
        }
        let pct = self.recall.current_episode_budget_pct;
        if !(0.0..=1.0).contains(&pct) || !pct.is_finite() {
            return Err(Error::Configuration(format!(
                "current_episode_budget_pct must be in [0, 1], got {pct}"
            )));
        }
        for (name, value) in [
            (
                "consolidation_similarity_threshold",
                self.reflection.consolidation_similarity_threshold,
            ),
            (
                "dedup_similarity_threshold",
                self.reflection.dedup_similarity_threshold,
            ),
        ] {
            if !(-1.0..=1.0).contains(&value) || !value.is_finite() {
                return Err(Error::Configuration(format!(
                    "{name} must be in [-1, 1], got {value}"
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.exponential_base < 1.0 || !self.retry.exponential_base.is_finite() {
            return Err(Error::Configuration(format!(
                "exponential_base must be >= 1, got {}",
                self.retry.exponential_base
            )));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) || !self.retry.jitter.is_finite() {
            return Err(Error::Configuration(format!(
                "jitter must be in [0, 1], got {}",
                self.retry.jitter
            )));
        }
        for pattern in &self.episode.close_on_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                Error::Configuration(format!("close_on_patterns entry {pattern:?}: {e}"))
            })?;
        }
        Ok(())
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            auto_detect_markers: true,
            marker_weights: MarkerWeights::default(),
            episode: EpisodeConfig::default(),
            recall: RecallConfig::default(),
            reflection: ReflectionConfig::default(),
            retry: RetryConfig::default(),
            cache: None,
        }
    }
}

impl MemoryConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
