//! Persisted state
//!
//! The state store remembers, per node id, what was last provisioned: the
//! provider identity, the inputs and their fingerprint, the outputs, and the
//! node's dependencies at the time. The scheduler diffs the desired graph
//! against it, and updates it one node at a time as operations succeed.

use crate::error::StateError;
use crate::types::{NodeId, Operation, Properties};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

// ============================================================================
// State Structures
// ============================================================================

/// Stored record of one provisioned resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub id: NodeId,
    pub kind: String,
    /// Fingerprint of the resolved inputs
    pub fingerprint: String,
    /// Provider-assigned identity
    pub identity: String,

    /// Inputs the resource was last provisioned with
    #[serde(default)]
    pub inputs: Properties,

    #[serde(default)]
    pub outputs: Properties,

    /// Dependencies at the time of provisioning, used to order teardown
    #[serde(default)]
    pub dependencies: Vec<NodeId>,

    /// Identities replaced by this one that have not been torn down yet
    #[serde(default)]
    pub pending_deletes: Vec<PendingDelete>,

    pub updated_at: DateTime<Utc>,
}

/// An old identity awaiting teardown after a replacement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDelete {
    pub identity: String,
    pub kind: String,
    #[serde(default)]
    pub inputs: Properties,
}

/// Operation started but not yet committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlight {
    pub id: NodeId,
    pub operation: Operation,
    pub started_at: DateTime<Utc>,
}

/// The whole persisted document for one stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackState {
    pub stack: String,

    #[serde(default)]
    pub entries: Vec<StateEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub in_flight: Vec<InFlight>,

    pub last_updated: DateTime<Utc>,
}

impl StackState {
    pub fn new(stack: &str) -> Self {
        Self {
            stack: stack.to_string(),
            entries: Vec::new(),
            in_flight: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn entry(&self, id: &NodeId) -> Option<&StateEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace the entry with the same id
    pub fn upsert(&mut self, entry: StateEntry) {
        self.clear_in_flight(&entry.id);
        match self.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self.last_updated = Utc::now();
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<StateEntry> {
        self.clear_in_flight(id);
        let position = self.entries.iter().position(|e| &e.id == id)?;
        self.last_updated = Utc::now();
        Some(self.entries.remove(position))
    }

    pub fn mark_in_flight(&mut self, id: &NodeId, operation: Operation) {
        self.clear_in_flight(id);
        self.in_flight.push(InFlight {
            id: id.clone(),
            operation,
            started_at: Utc::now(),
        });
    }

    pub fn clear_in_flight(&mut self, id: &NodeId) {
        self.in_flight.retain(|m| &m.id != id);
    }
}

// ============================================================================
// Store Interface
// ============================================================================

/// Persistent storage for a stack's state
///
/// Every write is durable before it returns, so an interrupted run leaves
/// only fully committed or fully removed entries.
pub trait StateStore: Send {
    /// Read the current state; empty if nothing was stored yet
    fn load(&mut self) -> Result<StackState, StateError>;

    /// Record that an operation on `id` is about to start
    fn begin(&mut self, id: &NodeId, operation: Operation) -> Result<(), StateError>;

    /// The operation on `id` did not complete; keep its entry as it was
    fn release(&mut self, id: &NodeId) -> Result<(), StateError>;

    /// Store the entry for a successfully provisioned node
    fn commit(&mut self, entry: StateEntry) -> Result<(), StateError>;

    /// Drop the entry of a successfully torn down node
    fn remove(&mut self, id: &NodeId) -> Result<(), StateError>;
}

/// State kept in memory, for tests and previews
#[derive(Debug, Clone)]
pub struct MemoryStateStore {
    state: StackState,
}

impl MemoryStateStore {
    pub fn new(stack: &str) -> Self {
        Self {
            state: StackState::new(stack),
        }
    }

    pub fn with_state(state: StackState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &StackState {
        &self.state
    }

    pub fn entry(&self, id: &str) -> Option<&StateEntry> {
        self.state.entry(&NodeId::new(id))
    }
}

impl StateStore for MemoryStateStore {
    fn load(&mut self) -> Result<StackState, StateError> {
        Ok(self.state.clone())
    }

    fn begin(&mut self, id: &NodeId, operation: Operation) -> Result<(), StateError> {
        self.state.mark_in_flight(id, operation);
        Ok(())
    }

    fn release(&mut self, id: &NodeId) -> Result<(), StateError> {
        self.state.clear_in_flight(id);
        Ok(())
    }

    fn commit(&mut self, entry: StateEntry) -> Result<(), StateError> {
        self.state.upsert(entry);
        Ok(())
    }

    fn remove(&mut self, id: &NodeId) -> Result<(), StateError> {
        self.state.remove(id);
        Ok(())
    }
}

/// One JSON document per stack, rewritten atomically on every change
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    stack: String,
    state: Option<StackState>,
}

impl FileStateStore {
    /// Store for `stack` under `dir`; nothing is read until `load`
    pub fn open(dir: &Path, stack: &str) -> Self {
        Self {
            path: dir.join(format!("{stack}.json")),
            stack: stack.to_string(),
            state: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StackState, StateError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No state at {}, starting empty", self.path.display());
                return Ok(StackState::new(&self.stack));
            }
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let state: StackState =
            serde_json::from_str(&content).map_err(|e| StateError::Corrupt {
                stack: self.stack.clone(),
                message: e.to_string(),
            })?;
        if state.stack != self.stack {
            return Err(StateError::Corrupt {
                stack: self.stack.clone(),
                message: format!("document belongs to stack {:?}", state.stack),
            });
        }

        log::debug!(
            "Loaded {} state entries from {}",
            state.entries.len(),
            self.path.display()
        );
        Ok(state)
    }

    fn loaded(&mut self) -> Result<&mut StackState, StateError> {
        if self.state.is_none() {
            self.load()?;
        }
        Ok(self
            .state
            .get_or_insert_with(|| StackState::new(&self.stack)))
    }

    /// Write to a temporary file next to the target, then rename over it
    fn persist(&self, state: &StackState) -> Result<(), StateError> {
        let io_err = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }

        let content = serde_json::to_string_pretty(state).map_err(|e| StateError::Serialize {
            message: e.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;

        log::trace!("Saved state to {}", self.path.display());
        Ok(())
    }

    fn update(&mut self, change: impl FnOnce(&mut StackState)) -> Result<(), StateError> {
        let state = self.loaded()?;
        change(state);
        let snapshot = state.clone();
        self.persist(&snapshot)
    }
}

impl StateStore for FileStateStore {
    fn load(&mut self) -> Result<StackState, StateError> {
        let mut state = self.read()?;
        let interrupted = !state.in_flight.is_empty();
        for marker in state.in_flight.drain(..) {
            log::warn!(
                "{} was interrupted during {} at {}; its state entry is unchanged",
                marker.id,
                marker.operation,
                marker.started_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        if interrupted {
            // Reported once
            self.persist(&state)?;
        }
        self.state = Some(state.clone());
        Ok(state)
    }

    fn begin(&mut self, id: &NodeId, operation: Operation) -> Result<(), StateError> {
        self.update(|state| state.mark_in_flight(id, operation))
    }

    fn release(&mut self, id: &NodeId) -> Result<(), StateError> {
        self.update(|state| state.clear_in_flight(id))
    }

    fn commit(&mut self, entry: StateEntry) -> Result<(), StateError> {
        self.update(|state| state.upsert(entry))
    }

    fn remove(&mut self, id: &NodeId) -> Result<(), StateError> {
        self.update(|state| {
            state.remove(id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn entry(id: &str, identity: &str) -> StateEntry {
        let mut outputs = Properties::new();
        outputs.insert("id".into(), json!(identity));
        StateEntry {
            id: id.into(),
            kind: "aws:ec2:Vpc".into(),
            fingerprint: "abc".into(),
            identity: identity.into(),
            inputs: Properties::new(),
            outputs,
            dependencies: Vec::new(),
            pending_deletes: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStateStore::open(dir.path(), "dev");
        let state = store.load().unwrap();
        assert!(state.is_empty());
        assert_eq!(state.stack, "dev");
    }

    #[test]
    fn test_commit_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStateStore::open(dir.path(), "dev");
        store.load().unwrap();
        store.begin(&"vpc".into(), Operation::Create).unwrap();
        store.commit(entry("vpc", "vpc-1")).unwrap();
        store.commit(entry("subnet", "subnet-1")).unwrap();

        let mut reopened = FileStateStore::open(dir.path(), "dev");
        let state = reopened.load().unwrap();
        assert_eq!(state.entries.len(), 2);
        assert_eq!(state.entry(&"vpc".into()).unwrap().identity, "vpc-1");
        assert!(state.in_flight.is_empty());

        reopened.remove(&"vpc".into()).unwrap();
        let state = FileStateStore::open(dir.path(), "dev").load().unwrap();
        assert!(state.entry(&"vpc".into()).is_none());
        assert!(!dir.path().join("dev.json.tmp").exists());
    }

    #[test]
    fn test_interrupted_marker_cleared_on_load() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStateStore::open(dir.path(), "dev");
        store.begin(&"vpc".into(), Operation::Create).unwrap();

        let mut reopened = FileStateStore::open(dir.path(), "dev");
        let state = reopened.load().unwrap();
        assert!(state.in_flight.is_empty());
        assert!(state.entries.is_empty());

        // The cleared marker is written back, so it is reported only once
        let on_disk: StackState =
            serde_json::from_str(&fs::read_to_string(reopened.path()).unwrap()).unwrap();
        assert!(on_disk.in_flight.is_empty());
    }

    #[test]
    fn test_corrupt_state() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("dev.json"), "{ not json").unwrap();

        let err = FileStateStore::open(dir.path(), "dev").load().unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }

    #[test]
    fn test_other_stack_document_rejected() {
        let dir = TempDir::new().unwrap();
        let mut prod = FileStateStore::open(dir.path(), "prod");
        prod.commit(entry("vpc", "vpc-1")).unwrap();
        fs::rename(dir.path().join("prod.json"), dir.path().join("dev.json")).unwrap();

        let err = FileStateStore::open(dir.path(), "dev").load().unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }

    #[test]
    fn test_memory_store_upsert() {
        let mut store = MemoryStateStore::new("dev");
        store.commit(entry("vpc", "vpc-1")).unwrap();
        store.commit(entry("vpc", "vpc-2")).unwrap();
        assert_eq!(store.state().entries.len(), 1);
        assert_eq!(store.entry("vpc").unwrap().identity, "vpc-2");
    }
}
