/// Persistent trust state for the mcp-warden wrapper.
///
/// This crate owns everything that outlives a session:
/// - **Canonicalization** (`canonical`): deterministic JSON serialization and
///   SHA-256 hashing of tool definitions and server instructions
/// - **Snapshot model** (`model`): the pinned view of a downstream server's
///   configuration and the pure comparator producing review diffs
/// - **Evaluation** (`evaluate`): the granular approved/drift/new verdict for
///   a live snapshot against a stored approval record
/// - **Approval store** (`approval`): crash-consistent on-disk records keyed
///   by server identity
/// - **Quarantine store** (`quarantine`): held tool responses flagged by a
///   guardrail provider
pub mod approval;
pub mod canonical;
pub mod evaluate;
pub mod model;
pub mod quarantine;

pub use approval::{ApprovalRecord, ApprovalStore};
pub use canonical::{canonical_json, hash_instructions, hash_tool, ABSENT_INSTRUCTIONS};
pub use evaluate::{evaluate, ApprovalState, Evaluation, OverallState};
pub use model::{diff_snapshots, ConfigDiff, ServerSnapshot, ToolChanges, ToolSpec};
pub use quarantine::{QuarantineEntry, QuarantineStore};
