//! Episode boundary detection and open-episode lifecycle.
//!
//! The manager tracks the single open episode of a session and decides when
//! a turn closes it. The time-gap trigger is evaluated *before* the new turn
//! is appended (the gapped turn starts the next episode); all other triggers
//! are evaluated *after* appending. One `assign` can therefore report up to
//! two closes: a time-gap close of the previous episode and a post-append
//! close of the episode the turn landed in.

use chrono::{DateTime, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{CloseReason, Episode, EpisodeConfig, EpisodeStatus, Role};

/// In-memory state of the session's open episode.
#[derive(Debug, Clone)]
struct OpenEpisode {
    id: Uuid,
    opened_at: DateTime<Utc>,
    last_turn_at: Option<DateTime<Utc>>,
    turn_ids: Vec<Uuid>,
}

impl OpenEpisode {
    fn new(id: Uuid, opened_at: DateTime<Utc>) -> Self {
        Self {
            id,
            opened_at,
            last_turn_at: None,
            turn_ids: Vec::new(),
        }
    }

    fn to_record(&self, session_id: &str) -> Episode {
        Episode {
            episode_id: self.id,
            session_id: session_id.to_string(),
            status: EpisodeStatus::Open,
            opened_at: self.opened_at,
            closed_at: None,
            close_reason: None,
            turn_count: self.turn_ids.len(),
            turn_ids: self.turn_ids.clone(),
        }
    }

    fn into_closed_record(
        self,
        session_id: &str,
        reason: CloseReason,
        closed_at: DateTime<Utc>,
    ) -> Episode {
        Episode {
            episode_id: self.id,
            session_id: session_id.to_string(),
            status: EpisodeStatus::Closed,
            opened_at: self.opened_at,
            closed_at: Some(closed_at),
            close_reason: Some(reason),
            turn_count: self.turn_ids.len(),
            turn_ids: self.turn_ids,
        }
    }
}

/// Result of assigning a turn to an episode.
#[derive(Debug, Clone)]
pub struct Assignment {
    /// Episode the turn belongs to
    pub episode_id: Uuid,
    /// Episodes closed by this assignment, in close order
    pub closed: Vec<Episode>,
    /// Open-episode records created or updated by this assignment, to be
    /// persisted after the closes
    pub opened: Vec<Episode>,
}

/// Tracks the open episode and applies the close triggers.
#[derive(Debug)]
pub struct EpisodeManager {
    session_id: String,
    config: EpisodeConfig,
    close_patterns: Vec<Regex>,
    open: Option<OpenEpisode>,
}

impl EpisodeManager {
    /// Build a manager for a session; compiles `close_on_patterns`.
    pub fn new(session_id: impl Into<String>, config: EpisodeConfig) -> Result<Self> {
        let close_patterns = config
            .close_on_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| Error::Configuration(format!("close_on_patterns entry {p:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            session_id: session_id.into(),
            config,
            close_patterns,
            open: None,
        })
    }

    /// Id of the open episode, if one exists.
    #[must_use]
    pub fn open_episode_id(&self) -> Option<Uuid> {
        self.open.as_ref().map(|ep| ep.id)
    }

    /// Turn count of the open episode.
    #[must_use]
    pub fn open_turn_count(&self) -> usize {
        self.open.as_ref().map_or(0, |ep| ep.turn_ids.len())
    }

    /// Ensure an open episode exists; returns the new record to persist if
    /// one was created.
    pub fn ensure_open(&mut self, now: DateTime<Utc>) -> Option<Episode> {
        if self.open.is_some() {
            return None;
        }
        let open = OpenEpisode::new(Uuid::new_v4(), now);
        let record = open.to_record(&self.session_id);
        self.open = Some(open);
        Some(record)
    }

    /// Adopt an already-persisted open episode (session resume).
    pub fn adopt(&mut self, episode: &Episode, last_turn_at: Option<DateTime<Utc>>) {
        self.open = Some(OpenEpisode {
            id: episode.episode_id,
            opened_at: episode.opened_at,
            last_turn_at,
            turn_ids: episode.turn_ids.clone(),
        });
    }

    /// Assign a turn to an episode, applying close triggers.
    pub fn assign(
        &mut self,
        turn_id: Uuid,
        role: Role,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Assignment {
        let mut closed = Vec::new();
        let mut opened = Vec::new();

        if self.open.is_none() {
            if let Some(record) = self.ensure_open(created_at) {
                opened.push(record);
            }
        }

        // Trigger 2, evaluated before appending: the gapped turn becomes the
        // first turn of a fresh episode.
        let gapped = self.open.as_ref().is_some_and(|ep| {
            ep.last_turn_at
                .is_some_and(|last| created_at - last >= self.config.max_time_gap())
        });
        if gapped {
            self.close_open(CloseReason::TimeGap, created_at, &mut closed, &mut opened);
        }

        #[allow(clippy::unwrap_used)]
        let open = self.open.as_mut().unwrap();
        open.turn_ids.push(turn_id);
        open.last_turn_at = Some(created_at);
        let episode_id = open.id;
        let turn_count = open.turn_ids.len();

        // Post-append triggers: turn count wins over tool-result, which wins
        // over content patterns.
        let reason = if turn_count >= self.config.max_turns_per_episode {
            Some(CloseReason::MaxTurns)
        } else if self.config.close_on_tool_result && role == Role::Tool {
            Some(CloseReason::ToolResult)
        } else if self.close_patterns.iter().any(|re| re.is_match(content)) {
            Some(CloseReason::PatternMatch)
        } else {
            None
        };
        if let Some(reason) = reason {
            self.close_open(reason, created_at, &mut closed, &mut opened);
        } else {
            // Refresh the persisted open record with the appended turn.
            if let Some(open) = self.open.as_ref() {
                opened.push(open.to_record(&self.session_id));
            }
        }

        Assignment {
            episode_id,
            closed,
            opened,
        }
    }

    /// Force-close the open episode. Returns None when it has no turns, in
    /// which case nothing changes.
    pub fn close_explicit(&mut self, reason: &str, now: DateTime<Utc>) -> Option<Assignment> {
        if self.open.as_ref().is_none_or(|ep| ep.turn_ids.is_empty()) {
            return None;
        }
        let mut closed = Vec::new();
        let mut opened = Vec::new();
        self.close_open(
            CloseReason::Explicit(reason.to_string()),
            now,
            &mut closed,
            &mut opened,
        );
        let episode_id = closed[0].episode_id;
        Some(Assignment {
            episode_id,
            closed,
            opened,
        })
    }

    fn close_open(
        &mut self,
        reason: CloseReason,
        now: DateTime<Utc>,
        closed: &mut Vec<Episode>,
        opened: &mut Vec<Episode>,
    ) {
        if let Some(open) = self.open.take() {
            closed.push(open.into_closed_record(&self.session_id, reason, now));
        }
        let fresh = OpenEpisode::new(Uuid::new_v4(), now);
        opened.push(fresh.to_record(&self.session_id));
        self.open = Some(fresh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn manager(config: EpisodeConfig) -> EpisodeManager {
        EpisodeManager::new("s1", config).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn max_turns_closes_after_append() {
        let mut mgr = manager(EpisodeConfig {
            max_turns_per_episode: 2,
            ..EpisodeConfig::default()
        });
        let first = mgr.assign(Uuid::new_v4(), Role::User, "a", at(0));
        assert!(first.closed.is_empty());

        let second = mgr.assign(Uuid::new_v4(), Role::Assistant, "b", at(1));
        assert_eq!(second.closed.len(), 1);
        let closed = &second.closed[0];
        assert_eq!(closed.turn_count, 2);
        assert_eq!(closed.close_reason, Some(CloseReason::MaxTurns));
        // The closing turn belongs to the closed episode.
        assert_eq!(second.episode_id, closed.episode_id);
        // A fresh episode is open for the next ingest.
        assert_ne!(mgr.open_episode_id(), Some(closed.episode_id));
        assert_eq!(mgr.open_turn_count(), 0);
    }

    #[test]
    fn time_gap_closes_before_append() {
        let mut mgr = manager(EpisodeConfig {
            max_time_gap_seconds: 60,
            ..EpisodeConfig::default()
        });
        let first = mgr.assign(Uuid::new_v4(), Role::User, "a", at(0));
        let first_episode = first.episode_id;

        let second = mgr.assign(Uuid::new_v4(), Role::User, "b", at(120));
        assert_eq!(second.closed.len(), 1);
        let closed = &second.closed[0];
        assert_eq!(closed.episode_id, first_episode);
        assert_eq!(closed.turn_count, 1);
        assert_eq!(closed.close_reason, Some(CloseReason::TimeGap));
        // The gapped turn starts the new episode.
        assert_ne!(second.episode_id, first_episode);
        assert_eq!(mgr.open_turn_count(), 1);
    }

    #[test]
    fn tool_result_closes_when_enabled() {
        let mut mgr = manager(EpisodeConfig {
            close_on_tool_result: true,
            ..EpisodeConfig::default()
        });
        mgr.assign(Uuid::new_v4(), Role::User, "run it", at(0));
        let assignment = mgr.assign(Uuid::new_v4(), Role::Tool, "exit 0", at(1));
        assert_eq!(assignment.closed.len(), 1);
        assert_eq!(
            assignment.closed[0].close_reason,
            Some(CloseReason::ToolResult)
        );
        assert_eq!(assignment.closed[0].turn_count, 2);
    }

    #[test]
    fn tool_result_ignored_when_disabled() {
        let mut mgr = manager(EpisodeConfig::default());
        mgr.assign(Uuid::new_v4(), Role::User, "run it", at(0));
        let assignment = mgr.assign(Uuid::new_v4(), Role::Tool, "exit 0", at(1));
        assert!(assignment.closed.is_empty());
    }

    #[test]
    fn close_pattern_matches_content() {
        let mut mgr = manager(EpisodeConfig {
            close_on_patterns: vec!["(?i)^wrap up".to_string()],
            ..EpisodeConfig::default()
        });
        mgr.assign(Uuid::new_v4(), Role::User, "keep going", at(0));
        let assignment = mgr.assign(Uuid::new_v4(), Role::User, "Wrap up for today", at(1));
        assert_eq!(assignment.closed.len(), 1);
        assert_eq!(
            assignment.closed[0].close_reason,
            Some(CloseReason::PatternMatch)
        );
    }

    #[test]
    fn gap_trigger_ignores_fresh_empty_episode() {
        let mut mgr = manager(EpisodeConfig {
            max_turns_per_episode: 1,
            max_time_gap_seconds: 60,
            ..EpisodeConfig::default()
        });
        mgr.assign(Uuid::new_v4(), Role::User, "a", at(0));
        // max_turns=1 already closed the first episode; the fresh episode has
        // no last turn, so the gap trigger stays quiet and max-turns fires.
        let assignment = mgr.assign(Uuid::new_v4(), Role::User, "b", at(120));
        assert_eq!(assignment.closed.len(), 1);
        assert_eq!(
            assignment.closed[0].close_reason,
            Some(CloseReason::MaxTurns)
        );
    }

    #[test]
    fn explicit_close_requires_turns() {
        let mut mgr = manager(EpisodeConfig::default());
        mgr.ensure_open(at(0));
        assert!(mgr.close_explicit("done", at(1)).is_none());

        mgr.assign(Uuid::new_v4(), Role::User, "a", at(2));
        let assignment = mgr.close_explicit("done", at(3)).unwrap();
        assert_eq!(assignment.closed.len(), 1);
        assert_eq!(
            assignment.closed[0].close_reason,
            Some(CloseReason::Explicit("done".to_string()))
        );
        assert_eq!(mgr.open_turn_count(), 0);
    }

    #[test]
    fn closed_at_is_not_before_opened_at() {
        let mut mgr = manager(EpisodeConfig {
            max_turns_per_episode: 1,
            ..EpisodeConfig::default()
        });
        let assignment = mgr.assign(Uuid::new_v4(), Role::User, "a", at(5));
        let closed = &assignment.closed[0];
        assert!(closed.closed_at.unwrap() >= closed.opened_at);
    }
}
