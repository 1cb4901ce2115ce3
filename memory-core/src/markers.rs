//! Marker tags and automatic marker detection.
//!
//! Markers flag a turn as important to recall: decisions, constraints,
//! failures, goals, or caller-defined `custom:<label>` tags. The detector
//! recognizes conventional prefixes (`Decision:`, `Constraint:`, ...) at the
//! start of content or immediately after a newline.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Importance tag attached to a turn or fact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Marker {
    /// A decision was made ("Decision: use PostgreSQL")
    Decision,
    /// A constraint or requirement was stated
    Constraint,
    /// Something failed or did not work
    Failure,
    /// A goal or objective was declared
    Goal,
    /// Caller-defined tag, written `custom:<label>`
    Custom(String),
}

impl Marker {
    /// Canonical string form, e.g. `decision` or `custom:billing`.
    #[must_use]
    pub fn as_str(&self) -> String {
        match self {
            Marker::Decision => "decision".to_string(),
            Marker::Constraint => "constraint".to_string(),
            Marker::Failure => "failure".to_string(),
            Marker::Goal => "goal".to_string(),
            Marker::Custom(label) => format!("custom:{label}"),
        }
    }

    /// Parse a custom marker, validating that the label is non-empty.
    pub fn custom(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        if label.is_empty() {
            return Err(Error::Validation(
                "custom marker label must be non-empty".to_string(),
            ));
        }
        Ok(Marker::Custom(label))
    }

    /// Whether this is a `custom:<label>` marker.
    #[must_use]
    pub fn is_custom(&self) -> bool {
        matches!(self, Marker::Custom(_))
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Marker {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "decision" => Ok(Marker::Decision),
            "constraint" => Ok(Marker::Constraint),
            "failure" => Ok(Marker::Failure),
            "goal" => Ok(Marker::Goal),
            other => {
                if let Some(label) = other.strip_prefix("custom:") {
                    Marker::custom(label)
                } else {
                    Err(Error::Validation(format!("malformed marker tag: {other}")))
                }
            }
        }
    }
}

impl Serialize for Marker {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str())
    }
}

impl<'de> Deserialize<'de> for Marker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Marker::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Detects markers from conventional content prefixes.
///
/// Patterns are case-insensitive and anchored at the start of the content or
/// immediately after a newline. Detection is a pure function of content, so
/// re-running it on already-marked text yields the same set.
#[derive(Debug, Clone)]
pub struct MarkerDetector {
    rules: Vec<(Regex, Marker)>,
}

impl MarkerDetector {
    /// Build the detector with the default pattern families.
    #[must_use]
    pub fn new() -> Self {
        let families: &[(&str, Marker)] = &[
            (r"(?im)^(?:decision|decided|choosing|selected):", Marker::Decision),
            (
                r"(?im)^(?:constraint|requirement|must|cannot|budget|limit):",
                Marker::Constraint,
            ),
            (
                r"(?im)^(?:failed|error|didn['’]?t work|tried but):",
                Marker::Failure,
            ),
            (r"(?im)^(?:goal|objective|task|need to):", Marker::Goal),
        ];
        let rules = families
            .iter()
            .map(|(pattern, marker)| {
                #[allow(clippy::expect_used)]
                let re = Regex::new(pattern).expect("built-in marker pattern must compile");
                (re, marker.clone())
            })
            .collect();
        Self { rules }
    }

    /// Detect the marker set for `content`.
    #[must_use]
    pub fn detect(&self, content: &str) -> BTreeSet<Marker> {
        self.rules
            .iter()
            .filter(|(re, _)| re.is_match(content))
            .map(|(_, marker)| marker.clone())
            .collect()
    }
}

impl Default for MarkerDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_decision_prefixes() {
        let detector = MarkerDetector::new();
        for content in [
            "Decision: We'll use PostgreSQL.",
            "decided: go with option B",
            "Choosing: the simpler path",
            "SELECTED: variant 2",
        ] {
            assert_eq!(
                detector.detect(content),
                BTreeSet::from([Marker::Decision]),
                "missed: {content}"
            );
        }
    }

    #[test]
    fn detects_after_newline_only() {
        let detector = MarkerDetector::new();
        assert!(detector.detect("note\nDecision: yes").contains(&Marker::Decision));
        // Mid-line mentions are not markers.
        assert!(detector.detect("we made a Decision: yes").is_empty());
    }

    #[test]
    fn detects_multiple_families() {
        let detector = MarkerDetector::new();
        let content = "Goal: ship v2\nConstraint: budget is 10k\nFailed: first attempt";
        let detected = detector.detect(content);
        assert_eq!(
            detected,
            BTreeSet::from([Marker::Goal, Marker::Constraint, Marker::Failure])
        );
    }

    #[test]
    fn detects_apostrophe_variants() {
        let detector = MarkerDetector::new();
        assert!(detector.detect("Didn't work: retry loop").contains(&Marker::Failure));
        assert!(detector.detect("didn’t work: retry loop").contains(&Marker::Failure));
        assert!(detector.detect("Didnt work: retry loop").contains(&Marker::Failure));
    }

    #[test]
    fn detection_is_idempotent() {
        let detector = MarkerDetector::new();
        let content = "Decision: keep it\nplain trailing text";
        let first = detector.detect(content);
        let second = detector.detect(content);
        assert_eq!(first, second);
    }

    #[test]
    fn plain_text_detects_nothing() {
        let detector = MarkerDetector::new();
        assert!(detector.detect("just chatting about databases").is_empty());
    }

    #[test]
    fn marker_round_trips_through_strings() {
        for marker in [
            Marker::Decision,
            Marker::Constraint,
            Marker::Failure,
            Marker::Goal,
            Marker::Custom("billing".to_string()),
        ] {
            let parsed: Marker = marker.as_str().parse().unwrap();
            assert_eq!(parsed, marker);
        }
    }

    #[test]
    fn malformed_markers_are_rejected() {
        assert!(Marker::from_str("custom:").is_err());
        assert!(Marker::from_str("verdict").is_err());
        assert!(Marker::from_str("").is_err());
    }
}
