//! Granular approval evaluation.
//!
//! Given a live snapshot and the stored approval record for the same server
//! identity, [`evaluate`] produces a three-part verdict: a state for the
//! instructions, a state per tool, and an overall state that drives the
//! wrapper's blocking behavior.
//!
//! The instruction-global rule: instructions are injected into the model's
//! prompt before any tool call, so unapproved instructions contaminate the
//! whole session and block every downstream tool, not just some of them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::approval::ApprovalRecord;
use crate::canonical::{hash_instructions, hash_tool};
use crate::model::ServerSnapshot;

/// State of one approval surface (instructions, or one tool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    /// The stored hash matches the live surface.
    Approved,
    /// A hash was stored but the live surface no longer matches it.
    Drift,
    /// No hash was ever stored for this surface.
    New,
}

/// Overall verdict for a server, derived from the per-surface states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallState {
    /// Instructions and every tool in the snapshot are approved.
    FullyApproved,
    /// Instructions approved; some tools are not. Only those are blocked.
    Partial,
    /// Instructions are new or drifted: the whole server is blocked.
    BlockedAll,
}

/// The evaluation of one live snapshot against one stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    /// State of the server instructions.
    pub instructions_state: ApprovalState,
    /// State of every tool in the snapshot, keyed by name.
    pub tool_states: BTreeMap<String, ApprovalState>,
    /// Derived overall state.
    pub overall_state: OverallState,
}

impl Evaluation {
    /// Whether the named tool is currently approved.
    pub fn is_tool_approved(&self, name: &str) -> bool {
        self.overall_state != OverallState::BlockedAll
            && self.tool_states.get(name) == Some(&ApprovalState::Approved)
    }

    /// Names of currently approved tools, in deterministic order.
    pub fn approved_tools(&self) -> impl Iterator<Item = &str> {
        let blocked_all = self.overall_state == OverallState::BlockedAll;
        self.tool_states
            .iter()
            .filter(move |(_, state)| !blocked_all && **state == ApprovalState::Approved)
            .map(|(name, _)| name.as_str())
    }

    /// Count of tools in the snapshot that are not approved.
    pub fn blocked_tool_count(&self) -> usize {
        self.tool_states
            .values()
            .filter(|state| **state != ApprovalState::Approved)
            .count()
    }
}

/// Evaluate a live snapshot against the stored record for its identity.
///
/// `record` is `None` when the server is unknown to the store: everything
/// evaluates as `New` and the server is fully blocked. Tools whose schema
/// cannot be canonicalized evaluate as `Drift` when a prior approval exists
/// and `New` otherwise; evaluation itself never fails.
pub fn evaluate(record: Option<&ApprovalRecord>, snapshot: &ServerSnapshot) -> Evaluation {
    let instructions_state = match record {
        None => ApprovalState::New,
        Some(record) => match &record.instructions_hash {
            None => ApprovalState::New,
            Some(stored) => {
                if *stored == hash_instructions(snapshot.instructions.as_deref()) {
                    ApprovalState::Approved
                } else {
                    ApprovalState::Drift
                }
            }
        },
    };

    let mut tool_states = BTreeMap::new();
    for (name, spec) in &snapshot.tools {
        let stored = record.and_then(|r| r.tool_hashes.get(name));
        let state = match (stored, hash_tool(spec)) {
            (None, _) => ApprovalState::New,
            (Some(stored), Ok(live)) if *stored == live => ApprovalState::Approved,
            // Mismatch, or a schema that no longer canonicalizes: the
            // previously approved surface is gone either way.
            (Some(_), _) => ApprovalState::Drift,
        };
        tool_states.insert(name.clone(), state);
    }

    let overall_state = if instructions_state != ApprovalState::Approved {
        OverallState::BlockedAll
    } else if tool_states
        .values()
        .all(|state| *state == ApprovalState::Approved)
    {
        OverallState::FullyApproved
    } else {
        OverallState::Partial
    };

    Evaluation {
        instructions_state,
        tool_states,
        overall_state,
    }
}
