//! Persistent approval records.
//!
//! One record per server identity, stored together in a single JSON file
//! (`servers.json`). Writes go to a temp file, fsync, then an atomic rename,
//! so a reader (or a crash) sees either the previous document or the new
//! one, never a torn write. Every mutation holds an OS advisory lock on a
//! sibling `.lock` file for its whole reload-modify-rename cycle, so
//! concurrent writers in other processes (a running wrapper plus a
//! `--review-server` invocation, say) serialize instead of clobbering each
//! other's records. Readers stay lock-free: the atomic rename guarantees
//! they see a complete document either way.
//!
//! Read failures fail closed: a store that cannot be parsed evaluates every
//! server as unknown, which blocks everything.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use warden_types::errors::WardenError;
use warden_types::protocol::ServerIdentity;

use crate::canonical::{hash_instructions, hash_tool};
use crate::evaluate::{evaluate, Evaluation};
use crate::model::ServerSnapshot;

/// On-disk document version.
const STORE_VERSION: u32 = 1;

/// Default directory under the user's home for warden state files.
pub const STATE_DIR_NAME: &str = ".mcp-warden";

/// The approval state for one server identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Hash of the approved instructions, the `"absent"` sentinel when the
    /// server had none at approval time, or `None` if instructions have
    /// never been approved.
    pub instructions_hash: Option<String>,
    /// Approved tool hashes keyed by tool name. Entries for tools the
    /// downstream no longer offers are inert and collected lazily.
    pub tool_hashes: BTreeMap<String, String>,
    /// When this record was first created.
    pub created_at: DateTime<Utc>,
    /// When this record was last modified.
    pub last_updated_at: DateTime<Utc>,
}

impl ApprovalRecord {
    /// A fresh record with nothing approved.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            instructions_hash: None,
            tool_hashes: BTreeMap::new(),
            created_at: now,
            last_updated_at: now,
        }
    }
}

impl Default for ApprovalRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// One record as it appears in `servers.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    identity: ServerIdentity,
    #[serde(flatten)]
    record: ApprovalRecord,
}

/// The whole `servers.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    records: Vec<StoredRecord>,
}

/// Crash-consistent approval store backed by a single JSON file.
pub struct ApprovalStore {
    path: PathBuf,
    // Orders writers within this process; writers in other processes are
    // ordered by the advisory file lock taken per mutation.
    write_lock: Mutex<()>,
}

impl ApprovalStore {
    /// Open the store at `path`, or at the default location
    /// (`~/.mcp-warden/servers.json`) when `path` is `None`.
    ///
    /// The file is not created until the first approval is written.
    pub fn open(path: Option<PathBuf>) -> Result<Self, WardenError> {
        let path = match path {
            Some(path) => path,
            None => default_state_dir()?.join("servers.json"),
        };
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// The file this store reads and writes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record for one identity. `Ok(None)` means the server is
    /// unknown; an error means the store exists but cannot be read.
    pub fn load(&self, identity: &ServerIdentity) -> Result<Option<ApprovalRecord>, WardenError> {
        let records = self.read_all()?;
        Ok(records
            .into_iter()
            .find(|stored| stored.identity == *identity)
            .map(|stored| stored.record))
    }

    /// Evaluate a live snapshot against this store.
    ///
    /// Fails closed: a store read error is logged and treated as "server
    /// unknown", which evaluates everything as new and blocks the server.
    pub fn evaluate(&self, identity: &ServerIdentity, snapshot: &ServerSnapshot) -> Evaluation {
        let record = match self.load(identity) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    server = %identity,
                    error = %e,
                    "approval store unreadable, treating server as unknown"
                );
                None
            }
        };
        evaluate(record.as_ref(), snapshot)
    }

    /// Record the snapshot's instructions as approved for this identity.
    pub fn approve_instructions(
        &self,
        identity: &ServerIdentity,
        snapshot: &ServerSnapshot,
    ) -> Result<(), WardenError> {
        let hash = hash_instructions(snapshot.instructions.as_deref());
        self.mutate(identity, |record| {
            record.instructions_hash = Some(hash);
            Ok(())
        })
    }

    /// Record one tool of the snapshot as approved for this identity.
    pub fn approve_tool(
        &self,
        identity: &ServerIdentity,
        snapshot: &ServerSnapshot,
        tool_name: &str,
    ) -> Result<(), WardenError> {
        let spec = snapshot.get_tool(tool_name).ok_or_else(|| {
            WardenError::Store(format!("tool '{tool_name}' is not in the snapshot"))
        })?;
        let hash = hash_tool(spec)?;
        self.mutate(identity, |record| {
            record.tool_hashes.insert(tool_name.to_string(), hash);
            Ok(())
        })
    }

    /// Approve the instructions and every tool currently in the snapshot.
    ///
    /// Stale hashes for tools the snapshot no longer contains are dropped
    /// here; they were inert anyway.
    pub fn approve_all(
        &self,
        identity: &ServerIdentity,
        snapshot: &ServerSnapshot,
    ) -> Result<(), WardenError> {
        let instructions_hash = hash_instructions(snapshot.instructions.as_deref());
        let mut tool_hashes = BTreeMap::new();
        for (name, spec) in &snapshot.tools {
            tool_hashes.insert(name.clone(), hash_tool(spec)?);
        }
        self.mutate(identity, move |record| {
            record.instructions_hash = Some(instructions_hash);
            record.tool_hashes = tool_hashes;
            Ok(())
        })
    }

    /// Remove the record for this identity entirely. Returns whether a
    /// record existed.
    pub fn forget(&self, identity: &ServerIdentity) -> Result<bool, WardenError> {
        let _guard = self.write_lock.lock().expect("approval store lock poisoned");
        let _file_lock = StoreLock::exclusive(&self.path)?;
        let mut records = self.read_all()?;
        let before = records.len();
        records.retain(|stored| stored.identity != *identity);
        let removed = records.len() != before;
        if removed {
            self.write_all(&records)?;
        }
        Ok(removed)
    }

    /// All identities with a stored record.
    pub fn list_identities(&self) -> Result<Vec<(ServerIdentity, ApprovalRecord)>, WardenError> {
        Ok(self
            .read_all()?
            .into_iter()
            .map(|stored| (stored.identity, stored.record))
            .collect())
    }

    /// Read-modify-write one record under both locks. If the write fails
    /// nothing is cached, so the next read sees the old document.
    fn mutate<F>(&self, identity: &ServerIdentity, apply: F) -> Result<(), WardenError>
    where
        F: FnOnce(&mut ApprovalRecord) -> Result<(), WardenError>,
    {
        let _guard = self.write_lock.lock().expect("approval store lock poisoned");
        let _file_lock = StoreLock::exclusive(&self.path)?;
        let mut records = self.read_all()?;

        let index = match records
            .iter()
            .position(|stored| stored.identity == *identity)
        {
            Some(index) => index,
            None => {
                records.push(StoredRecord {
                    identity: identity.clone(),
                    record: ApprovalRecord::new(),
                });
                records.len() - 1
            }
        };
        let record = &mut records[index].record;

        apply(record)?;
        record.last_updated_at = Utc::now();

        self.write_all(&records)
    }

    fn read_all(&self) -> Result<Vec<StoredRecord>, WardenError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(WardenError::Store(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };
        let file: StoreFile = serde_json::from_str(&text).map_err(|e| {
            WardenError::Store(format!("corrupt store {}: {e}", self.path.display()))
        })?;
        Ok(file.records)
    }

    fn write_all(&self, records: &[StoredRecord]) -> Result<(), WardenError> {
        let file = StoreFile {
            version: STORE_VERSION,
            records: records.to_vec(),
        };
        write_json_atomic(&self.path, &file)?;
        debug!(path = %self.path.display(), records = records.len(), "approval store written");
        Ok(())
    }
}

/// An exclusive OS advisory lock over a store file, held for one
/// read-modify-write cycle and released on drop.
///
/// The lock lives on a sibling `.lock` file rather than the data file:
/// every atomic rename replaces the data file's inode, which would leave a
/// lock on the old, orphaned inode. Blocking until the lock is granted is
/// the intended behavior; a competing process holds it only for the length
/// of one small-file write.
pub(crate) struct StoreLock {
    file: std::fs::File,
}

impl StoreLock {
    /// Acquire the exclusive lock guarding `store_path`.
    pub fn exclusive(store_path: &Path) -> Result<Self, WardenError> {
        use fs2::FileExt;

        let lock_path = store_path.with_extension("lock");
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WardenError::Store(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| {
                WardenError::Store(format!("failed to open {}: {e}", lock_path.display()))
            })?;
        file.lock_exclusive().map_err(|e| {
            WardenError::Store(format!("failed to lock {}: {e}", lock_path.display()))
        })?;
        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Serialize `value` to `path` via temp file + fsync + atomic rename.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), WardenError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| WardenError::Store(format!("failed to create {}: {e}", parent.display())))?;
    }

    let tmp_path = path.with_extension("tmp");
    let text = serde_json::to_string_pretty(value)?;
    {
        let mut file = std::fs::File::create(&tmp_path)
            .map_err(|e| WardenError::Store(format!("failed to create {}: {e}", tmp_path.display())))?;
        use std::io::Write;
        file.write_all(text.as_bytes())
            .map_err(|e| WardenError::Store(format!("failed to write {}: {e}", tmp_path.display())))?;
        file.sync_all()
            .map_err(|e| WardenError::Store(format!("failed to sync {}: {e}", tmp_path.display())))?;
    }
    std::fs::rename(&tmp_path, path).map_err(|e| {
        WardenError::Store(format!(
            "failed to rename {} over {}: {e}",
            tmp_path.display(),
            path.display()
        ))
    })
}

/// The default state directory, `~/.mcp-warden`.
pub fn default_state_dir() -> Result<PathBuf, WardenError> {
    dirs::home_dir()
        .map(|home| home.join(STATE_DIR_NAME))
        .ok_or_else(|| WardenError::Store("cannot determine home directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::{ApprovalState, OverallState};
    use crate::model::ToolSpec;
    use serde_json::json;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ApprovalStore {
        ApprovalStore::open(Some(dir.path().join("servers.json"))).unwrap()
    }

    fn tool(name: &str, description: &str) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    fn snapshot(instructions: Option<&str>, tools: Vec<ToolSpec>) -> ServerSnapshot {
        ServerSnapshot {
            instructions: instructions.map(String::from),
            tools: tools.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    // ── Test: unknown server, then approve_all round trip ─────

    #[test]
    fn approve_all_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let identity = ServerIdentity::stdio("python server.py");
        let snap = snapshot(Some("Hi"), vec![tool("echo", "Echo")]);

        {
            let store = store_in(&dir);
            assert!(store.load(&identity).unwrap().is_none());
            assert_eq!(
                store.evaluate(&identity, &snap).overall_state,
                OverallState::BlockedAll
            );
            store.approve_all(&identity, &snap).unwrap();
        }

        // A fresh handle over the same file sees the approval.
        let store = store_in(&dir);
        let eval = store.evaluate(&identity, &snap);
        assert_eq!(eval.overall_state, OverallState::FullyApproved);
        let record = store.load(&identity).unwrap().unwrap();
        assert!(record.instructions_hash.is_some());
        assert_eq!(record.tool_hashes.len(), 1);
    }

    // ── Test: granular tool approval ──────────────────────────

    #[test]
    fn approve_tool_is_granular() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let identity = ServerIdentity::stdio("cmd");
        let snap = snapshot(Some("Hi"), vec![tool("echo", "Echo"), tool("sum", "Sum")]);

        store.approve_instructions(&identity, &snap).unwrap();
        store.approve_tool(&identity, &snap, "echo").unwrap();

        let eval = store.evaluate(&identity, &snap);
        assert_eq!(eval.overall_state, OverallState::Partial);
        assert!(eval.is_tool_approved("echo"));
        assert!(!eval.is_tool_approved("sum"));
    }

    #[test]
    fn approve_tool_rejects_names_not_in_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let identity = ServerIdentity::stdio("cmd");
        let snap = snapshot(None, vec![tool("echo", "Echo")]);
        assert!(store.approve_tool(&identity, &snap, "ghost").is_err());
    }

    // ── Test: identity keying ─────────────────────────────────

    #[test]
    fn identities_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let snap = snapshot(Some("Hi"), vec![tool("echo", "Echo")]);

        let stdio = ServerIdentity::stdio("python server.py");
        let http = ServerIdentity::http("http://localhost/mcp");
        store.approve_all(&stdio, &snap).unwrap();

        assert_eq!(
            store.evaluate(&stdio, &snap).overall_state,
            OverallState::FullyApproved
        );
        assert_eq!(
            store.evaluate(&http, &snap).overall_state,
            OverallState::BlockedAll
        );
    }

    // ── Test: drift after approval ────────────────────────────

    #[test]
    fn drift_is_detected_against_stored_record() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let identity = ServerIdentity::stdio("cmd");
        let snap = snapshot(Some("Hi"), vec![tool("echo", "Echo")]);
        store.approve_all(&identity, &snap).unwrap();

        let drifted = snapshot(Some("Hi"), vec![tool("echo", "Echo v2")]);
        let eval = store.evaluate(&identity, &drifted);
        assert_eq!(eval.tool_states["echo"], ApprovalState::Drift);
        assert_eq!(eval.overall_state, OverallState::Partial);
    }

    // ── Test: approve_all collects stale hashes ───────────────

    #[test]
    fn approve_all_drops_stale_tool_hashes() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let identity = ServerIdentity::stdio("cmd");

        let wide = snapshot(Some("Hi"), vec![tool("echo", "Echo"), tool("sum", "Sum")]);
        store.approve_all(&identity, &wide).unwrap();

        let narrow = snapshot(Some("Hi"), vec![tool("echo", "Echo")]);
        store.approve_all(&identity, &narrow).unwrap();

        let record = store.load(&identity).unwrap().unwrap();
        assert!(record.tool_hashes.contains_key("echo"));
        assert!(!record.tool_hashes.contains_key("sum"));
    }

    // ── Test: forget ──────────────────────────────────────────

    #[test]
    fn forget_removes_the_record() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let identity = ServerIdentity::stdio("cmd");
        let snap = snapshot(None, vec![tool("echo", "Echo")]);

        assert!(!store.forget(&identity).unwrap());
        store.approve_all(&identity, &snap).unwrap();
        assert!(store.forget(&identity).unwrap());
        assert!(store.load(&identity).unwrap().is_none());
    }

    // ── Test: created_at survives updates ─────────────────────

    #[test]
    fn created_at_is_stable_across_updates() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let identity = ServerIdentity::stdio("cmd");
        let snap = snapshot(Some("Hi"), vec![tool("echo", "Echo")]);

        store.approve_instructions(&identity, &snap).unwrap();
        let first = store.load(&identity).unwrap().unwrap();
        store.approve_tool(&identity, &snap, "echo").unwrap();
        let second = store.load(&identity).unwrap().unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert!(second.last_updated_at >= first.last_updated_at);
    }

    // ── Test: fail-closed on corrupt store ────────────────────

    #[test]
    fn corrupt_store_reads_fail_and_evaluation_fails_closed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("servers.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = ApprovalStore::open(Some(path)).unwrap();
        let identity = ServerIdentity::stdio("cmd");
        let snap = snapshot(Some("Hi"), vec![tool("echo", "Echo")]);

        assert!(store.load(&identity).is_err());
        // Evaluation swallows the read error and blocks everything.
        assert_eq!(
            store.evaluate(&identity, &snap).overall_state,
            OverallState::BlockedAll
        );
    }

    // ── Test: no partial writes left behind ───────────────────

    #[test]
    fn store_file_is_valid_json_after_every_write() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let identity = ServerIdentity::stdio("cmd");
        let snap = snapshot(Some("Hi"), vec![tool("echo", "Echo")]);

        store.approve_all(&identity, &snap).unwrap();
        // The temp file must be gone and the target parseable.
        assert!(!dir.path().join("servers.tmp").exists());
        let text = std::fs::read_to_string(store.path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["version"], 1);
        assert!(parsed["records"].is_array());
    }

    // ── Test: the file lock serializes independent handles ────

    #[test]
    fn concurrent_writers_through_separate_handles_lose_no_updates() {
        // Each thread opens its own store over the same file, as two
        // processes would. Only the advisory file lock orders them; the
        // in-process mutex is per-handle and cannot.
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("servers.json");
        let identity = ServerIdentity::stdio("cmd");

        let tools: Vec<ToolSpec> = (0..8).map(|i| tool(&format!("tool{i}"), "T")).collect();
        let snap = snapshot(Some("Hi"), tools);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                let identity = identity.clone();
                let snap = snap.clone();
                std::thread::spawn(move || {
                    let store = ApprovalStore::open(Some(path)).unwrap();
                    store
                        .approve_tool(&identity, &snap, &format!("tool{i}"))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let store = ApprovalStore::open(Some(path)).unwrap();
        let record = store.load(&identity).unwrap().unwrap();
        assert_eq!(record.tool_hashes.len(), 8);
    }

    // ── Test: list_identities ─────────────────────────────────

    #[test]
    fn list_identities_returns_all_records() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let snap = snapshot(None, vec![tool("echo", "Echo")]);

        store
            .approve_all(&ServerIdentity::stdio("a"), &snap)
            .unwrap();
        store
            .approve_all(&ServerIdentity::http("http://b/mcp"), &snap)
            .unwrap();

        let listed = store.list_identities().unwrap();
        assert_eq!(listed.len(), 2);
    }
}
