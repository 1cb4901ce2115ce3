//! Value records: turns, episodes, facts, context items, session stats.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::markers::Marker;
use crate::types::enums::{CloseReason, EpisodeStatus, FactStatus, Role, SourceType};

/// An atomic message event ingested into a session.
///
/// Every turn belongs to exactly one episode of the same session, and
/// `token_count` is always the counter's value for `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn identifier
    pub turn_id: Uuid,
    /// Owning session
    pub session_id: String,
    /// Episode this turn was assigned to
    pub episode_id: Uuid,
    /// Who produced the turn
    pub role: Role,
    /// Message content
    pub content: String,
    /// Effective marker set (explicit plus auto-detected)
    pub markers: BTreeSet<Marker>,
    /// Token count of `content`
    pub token_count: usize,
    /// Creation time, monotone within the session
    pub created_at: DateTime<Utc>,
    /// Additional caller metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Turn {
    /// Whether this turn carries any markers.
    #[must_use]
    pub fn is_marked(&self) -> bool {
        !self.markers.is_empty()
    }
}

/// An ordered, time-bounded group of turns with an open/closed lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Unique episode identifier
    pub episode_id: Uuid,
    /// Owning session
    pub session_id: String,
    /// Open or closed; at most one open episode per session
    pub status: EpisodeStatus,
    /// When the episode was opened
    pub opened_at: DateTime<Utc>,
    /// When the episode was closed (None while open)
    pub closed_at: Option<DateTime<Utc>>,
    /// Why the episode was closed (None while open)
    pub close_reason: Option<CloseReason>,
    /// Number of turns assigned to the episode
    pub turn_count: usize,
    /// Turn ids ordered by `created_at`
    pub turn_ids: Vec<Uuid>,
}

impl Episode {
    /// Create a fresh open episode for a session.
    #[must_use]
    pub fn open(session_id: impl Into<String>, opened_at: DateTime<Utc>) -> Self {
        Self {
            episode_id: Uuid::new_v4(),
            session_id: session_id.into(),
            status: EpisodeStatus::Open,
            opened_at,
            closed_at: None,
            close_reason: None,
            turn_count: 0,
            turn_ids: Vec::new(),
        }
    }

    /// Whether the episode is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == EpisodeStatus::Open
    }
}

/// A durable statement distilled from one or more closed episodes.
///
/// Facts are never deleted; supersession flips `status` and records the
/// replacing fact, keeping the chain for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Unique fact identifier
    pub fact_id: Uuid,
    /// Owning session
    pub session_id: String,
    /// Episodes this fact was distilled from (at least one)
    pub source_episode_ids: Vec<Uuid>,
    /// Fact content
    pub content: String,
    /// Markers carried by the fact
    pub markers: BTreeSet<Marker>,
    /// Active or superseded
    pub status: FactStatus,
    /// Replacing fact, when superseded by an update (None for removals)
    pub superseded_by: Option<Uuid>,
    /// When the fact was created
    pub created_at: DateTime<Utc>,
    /// When the fact was superseded
    pub superseded_at: Option<DateTime<Utc>>,
}

impl Fact {
    /// Create a new active fact.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        source_episode_ids: Vec<Uuid>,
        content: impl Into<String>,
        markers: BTreeSet<Marker>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            fact_id: Uuid::new_v4(),
            session_id: session_id.into(),
            source_episode_ids,
            content: content.into(),
            markers,
            status: FactStatus::Active,
            superseded_by: None,
            created_at,
            superseded_at: None,
        }
    }

    /// Whether the fact is currently visible to recall.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == FactStatus::Active
    }
}

/// A single element of a recall result. Emitted only; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    /// Item content
    pub content: String,
    /// Role for turn items, None for facts
    pub role: Option<Role>,
    /// Markers carried by the source turn or fact
    pub markers: BTreeSet<Marker>,
    /// Relevance plus marker boost. Current-episode turns are not
    /// relevance-scored and carry 0.0 here.
    pub score: f32,
    /// Token count of `content`
    pub token_count: usize,
    /// Whether the item is a turn or a fact
    pub source_type: SourceType,
    /// Id of the source turn or fact
    pub source_id: Uuid,
}

/// Aggregate counters for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Owning session
    pub session_id: String,
    /// Turns ingested
    pub turn_count: u64,
    /// Open episodes (1 after initialize)
    pub open_episodes: usize,
    /// Closed episodes
    pub closed_episodes: usize,
    /// Facts visible to recall
    pub active_facts: usize,
    /// Facts retained for audit only
    pub superseded_facts: usize,
    /// Total tokens ingested
    pub tokens_ingested: u64,
    /// Reflections that ran to completion
    pub reflections_completed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_episode_has_no_close_fields() {
        let ep = Episode::open("s1", Utc::now());
        assert!(ep.is_open());
        assert!(ep.closed_at.is_none());
        assert!(ep.close_reason.is_none());
        assert_eq!(ep.turn_count, 0);
    }

    #[test]
    fn new_fact_is_active() {
        let fact = Fact::new("s1", vec![Uuid::new_v4()], "db is pg", BTreeSet::new(), Utc::now());
        assert!(fact.is_active());
        assert!(fact.superseded_by.is_none());
        assert!(fact.superseded_at.is_none());
    }

    #[test]
    fn turn_serializes_losslessly() {
        let turn = Turn {
            turn_id: Uuid::new_v4(),
            session_id: "s1".to_string(),
            episode_id: Uuid::new_v4(),
            role: Role::Assistant,
            content: "Decision: ship it".to_string(),
            markers: BTreeSet::from([Marker::Decision]),
            token_count: 5,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        };
        let json = serde_json::to_string(&turn).unwrap();
        let back: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, turn);
    }
}
