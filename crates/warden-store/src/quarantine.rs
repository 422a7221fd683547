//! Quarantine for guardrail-flagged tool responses.
//!
//! When a guardrail provider flags a tool response, the original payload is
//! held here instead of reaching the host. The host only ever sees the
//! quarantine id; the payload comes back through the `quarantine_release`
//! built-in tool after a human marks the entry released out-of-band.
//!
//! Entries are append-dominant: they stay in the file after release until a
//! review session purges them. Ids are random UUIDs, so holding an id does
//! not let a caller enumerate someone else's entries.
//!
//! Writes follow the same discipline as the approval store: an OS advisory
//! lock on a sibling `.lock` file for the whole reload-modify-rename cycle,
//! so a serving wrapper appending an entry and a `--review-quarantine`
//! process releasing one cannot clobber each other.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use warden_types::errors::WardenError;
use warden_types::protocol::{ServerIdentity, Verdict};

use crate::approval::{default_state_dir, write_json_atomic, StoreLock};

const STORE_VERSION: u32 = 1;

/// One quarantined tool response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineEntry {
    /// Unguessable identifier handed to the host.
    pub id: Uuid,
    /// Identity of the downstream server that produced the response.
    pub server_identity: ServerIdentity,
    /// Tool that was called.
    pub tool_name: String,
    /// Arguments the host passed to the tool.
    pub request_args: serde_json::Value,
    /// The withheld response payload.
    pub response: serde_json::Value,
    /// The verdict that caused the quarantine.
    pub guardrail_verdict: Verdict,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
    /// Whether a human has marked the entry releasable.
    pub released: bool,
    /// When the entry was marked released, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QuarantineFile {
    version: u32,
    entries: Vec<QuarantineEntry>,
}

/// Crash-consistent quarantine store backed by a single JSON file.
pub struct QuarantineStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl QuarantineStore {
    /// Open the store at `path`, or at the default location
    /// (`~/.mcp-warden/quarantine.json`) when `path` is `None`.
    pub fn open(path: Option<PathBuf>) -> Result<Self, WardenError> {
        let path = match path {
            Some(path) => path,
            None => default_state_dir()?.join("quarantine.json"),
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

    /// Add a flagged response. Returns the fresh entry id.
    pub fn quarantine(
        &self,
        server_identity: &ServerIdentity,
        tool_name: &str,
        request_args: serde_json::Value,
        response: serde_json::Value,
        verdict: Verdict,
    ) -> Result<Uuid, WardenError> {
        let id = Uuid::new_v4();
        let entry = QuarantineEntry {
            id,
            server_identity: server_identity.clone(),
            tool_name: tool_name.to_string(),
            request_args,
            response,
            guardrail_verdict: verdict,
            created_at: Utc::now(),
            released: false,
            released_at: None,
        };

        let _guard = self.write_lock.lock().expect("quarantine lock poisoned");
        let _file_lock = StoreLock::exclusive(&self.path)?;
        let mut entries = self.read_all()?;
        entries.push(entry);
        self.write_all(&entries)?;

        info!(id = %id, tool = tool_name, "tool response quarantined");
        Ok(id)
    }

    /// Fetch one entry by id.
    pub fn get(&self, id: Uuid) -> Result<Option<QuarantineEntry>, WardenError> {
        Ok(self.read_all()?.into_iter().find(|entry| entry.id == id))
    }

    /// Mark an entry released. Returns whether the entry exists. Releasing
    /// an already-released entry is a no-op.
    pub fn release(&self, id: Uuid) -> Result<bool, WardenError> {
        let _guard = self.write_lock.lock().expect("quarantine lock poisoned");
        let _file_lock = StoreLock::exclusive(&self.path)?;
        let mut entries = self.read_all()?;
        let Some(entry) = entries.iter_mut().find(|entry| entry.id == id) else {
            return Ok(false);
        };
        if !entry.released {
            entry.released = true;
            entry.released_at = Some(Utc::now());
            self.write_all(&entries)?;
        }
        Ok(true)
    }

    /// Delete one entry. Returns whether it existed.
    pub fn delete(&self, id: Uuid) -> Result<bool, WardenError> {
        let _guard = self.write_lock.lock().expect("quarantine lock poisoned");
        let _file_lock = StoreLock::exclusive(&self.path)?;
        let mut entries = self.read_all()?;
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if removed {
            self.write_all(&entries)?;
        }
        Ok(removed)
    }

    /// List entries, optionally including released ones.
    pub fn list(&self, include_released: bool) -> Result<Vec<QuarantineEntry>, WardenError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|entry| include_released || !entry.released)
            .collect())
    }

    /// Remove released entries. Returns how many were removed.
    pub fn purge_released(&self) -> Result<usize, WardenError> {
        let _guard = self.write_lock.lock().expect("quarantine lock poisoned");
        let _file_lock = StoreLock::exclusive(&self.path)?;
        let mut entries = self.read_all()?;
        let before = entries.len();
        entries.retain(|entry| !entry.released);
        let removed = before - entries.len();
        if removed > 0 {
            self.write_all(&entries)?;
        }
        Ok(removed)
    }

    fn read_all(&self) -> Result<Vec<QuarantineEntry>, WardenError> {
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
        let file: QuarantineFile = serde_json::from_str(&text).map_err(|e| {
            WardenError::Store(format!("corrupt quarantine {}: {e}", self.path.display()))
        })?;
        Ok(file.entries)
    }

    fn write_all(&self, entries: &[QuarantineEntry]) -> Result<(), WardenError> {
        let file = QuarantineFile {
            version: STORE_VERSION,
            entries: entries.to_vec(),
        };
        write_json_atomic(&self.path, &file)?;
        debug!(path = %self.path.display(), entries = entries.len(), "quarantine written");
        Ok(())
    }
}
