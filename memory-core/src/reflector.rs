//! Reflection provider trait and its output actions.
//!
//! A reflector looks at the turns of a closed episode (plus any carried-over
//! turns) together with the prior facts scoped to it, and answers with either
//! bare fact proposals or an ordered list of typed actions. The two output
//! modes are distinguished at the type level by [`ReflectorOutput`].

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::markers::Marker;
use crate::types::{Fact, Turn};

/// A bare new-fact proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactProposal {
    /// Fact content
    pub content: String,
    /// Markers the fact should carry
    #[serde(default)]
    pub markers: BTreeSet<Marker>,
}

/// A typed consolidation operation against the fact store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReflectionAction {
    /// Persist a new fact (subject to dedup and the per-episode cap)
    Add {
        content: String,
        #[serde(default)]
        markers: BTreeSet<Marker>,
    },
    /// Replace `target` with a new fact, superseding the old one
    Update {
        target: Uuid,
        content: String,
        #[serde(default)]
        markers: BTreeSet<Marker>,
    },
    /// Retire `target` without a replacement
    Remove {
        target: Uuid,
        #[serde(default)]
        reason: String,
    },
    /// Leave `target` untouched
    Keep { target: Uuid },
}

/// What a reflector returns: typed actions, or bare proposals which
/// normalize to `Add` actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReflectorOutput {
    Actions(Vec<ReflectionAction>),
    Proposals(Vec<FactProposal>),
}

impl ReflectorOutput {
    /// Normalize to a list of typed actions.
    #[must_use]
    pub fn into_actions(self) -> Vec<ReflectionAction> {
        match self {
            ReflectorOutput::Actions(actions) => actions,
            ReflectorOutput::Proposals(proposals) => proposals
                .into_iter()
                .map(|p| ReflectionAction::Add {
                    content: p.content,
                    markers: p.markers,
                })
                .collect(),
        }
    }

    /// Number of operations carried.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            ReflectorOutput::Actions(actions) => actions.len(),
            ReflectorOutput::Proposals(proposals) => proposals.len(),
        }
    }

    /// Whether the output carries no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consolidates episode turns against scoped prior facts.
#[async_trait]
pub trait Reflector: Send + Sync {
    /// Produce consolidation output for a closed episode.
    ///
    /// `existing_facts` is the scoped subset of active facts;
    /// `turns` is the episode's turns in order, preceded by any
    /// carried-forward turns.
    async fn reflect(&self, existing_facts: &[Fact], turns: &[Turn]) -> Result<ReflectorOutput>;
}
