//! Enumerations for roles, lifecycle states, and recall sources.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(Error::Validation(format!("invalid role: {other}"))),
        }
    }
}

/// Lifecycle state of an episode. An episode closes exactly once and never
/// reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    Open,
    Closed,
}

/// Visibility state of an L2 fact. Supersession is the only mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactStatus {
    Active,
    Superseded,
}

/// Why an episode was closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Turn count reached `max_turns_per_episode`
    MaxTurns,
    /// Gap since the previous turn reached `max_time_gap_seconds`
    TimeGap,
    /// A tool turn arrived and `close_on_tool_result` is set
    ToolResult,
    /// Turn content matched one of `close_on_patterns`
    PatternMatch,
    /// Forced via `close_episode(reason)`
    Explicit(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::MaxTurns => write!(f, "max_turns"),
            CloseReason::TimeGap => write!(f, "time_gap"),
            CloseReason::ToolResult => write!(f, "tool_result"),
            CloseReason::PatternMatch => write!(f, "pattern_match"),
            CloseReason::Explicit(reason) => write!(f, "explicit: {reason}"),
        }
    }
}

/// Where a recall context item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Turn,
    Fact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_known_values() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert_eq!("tool".parse::<Role>().unwrap(), Role::Tool);
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn close_reason_serializes_as_snake_case() {
        let json = serde_json::to_string(&CloseReason::MaxTurns).unwrap();
        assert_eq!(json, "\"max_turns\"");
        let json = serde_json::to_string(&CloseReason::Explicit("done".into())).unwrap();
        assert_eq!(json, "{\"explicit\":\"done\"}");
    }
}
