//! Reflection: distilling closed episodes into durable facts.
//!
//! Reflections run on a per-session worker task, FIFO in episode-close
//! order, decoupled from the ingest path. The runner scopes prior facts by
//! centroid similarity, calls the reflector, and applies its actions with
//! per-action atomicity, supersession semantics, and embedding dedup.

mod queue;
mod runner;

pub(crate) use queue::ReflectionQueue;
pub(crate) use runner::ReflectionRunner;

/// Upper bound on prior facts scoped into one reflection call.
pub(crate) const MAX_SCOPED_FACTS: usize = 20;
