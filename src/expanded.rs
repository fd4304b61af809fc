//! Per-board set of expanded task rows, persisted across runs.
//!
//! Each board's set lives in `<data_dir>/agentboard-expanded-<board_id>.json`
//! as a JSON array of task ids. Views of the same board in one process stay
//! in step through an [`ExpandedTasksBus`]: a toggle writes the file and
//! announces it, and every other view reloads on its next `sync`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::errors::SyncError;

const FILE_PREFIX: &str = "agentboard-expanded-";
const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandedChange {
    pub board_id: Uuid,
    /// The view that wrote the change.
    pub origin: u64,
}

/// Process-wide change feed shared by every [`ExpandedTasks`] view.
#[derive(Debug, Clone)]
pub struct ExpandedTasksBus {
    tx: broadcast::Sender<ExpandedChange>,
    next_view: Arc<AtomicU64>,
}

impl ExpandedTasksBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            tx,
            next_view: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExpandedChange> {
        self.tx.subscribe()
    }

    fn register_view(&self) -> u64 {
        self.next_view.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for ExpandedTasksBus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn storage_path(data_dir: &Path, board_id: Uuid) -> PathBuf {
    data_dir.join(format!("{}{}.json", FILE_PREFIX, board_id))
}

/// Missing, unreadable, or malformed files all load as an empty set.
fn load(path: &Path) -> BTreeSet<Uuid> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), error = %e, "Cannot read expanded rows");
            }
            return BTreeSet::new();
        }
    };
    match serde_json::from_slice::<Vec<Uuid>>(&raw) {
        Ok(ids) => ids.into_iter().collect(),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Ignoring malformed expanded rows");
            BTreeSet::new()
        }
    }
}

/// One view's copy of a board's expanded rows.
pub struct ExpandedTasks {
    board_id: Uuid,
    path: PathBuf,
    expanded: BTreeSet<Uuid>,
    view_id: u64,
    bus: ExpandedTasksBus,
    changes: broadcast::Receiver<ExpandedChange>,
}

impl ExpandedTasks {
    pub fn open(data_dir: &Path, board_id: Uuid, bus: &ExpandedTasksBus) -> Self {
        let path = storage_path(data_dir, board_id);
        Self {
            board_id,
            expanded: load(&path),
            path,
            view_id: bus.register_view(),
            bus: bus.clone(),
            changes: bus.subscribe(),
        }
    }

    pub fn board_id(&self) -> Uuid {
        self.board_id
    }

    pub fn is_expanded(&self, task_id: Uuid) -> bool {
        self.expanded.contains(&task_id)
    }

    pub fn expanded(&self) -> &BTreeSet<Uuid> {
        &self.expanded
    }

    /// Flip `task_id`, persist, and announce. Returns whether the row is now
    /// expanded. A failed write leaves the set unchanged.
    pub fn toggle(&mut self, task_id: Uuid) -> Result<bool, SyncError> {
        let now_expanded = if self.expanded.remove(&task_id) {
            false
        } else {
            self.expanded.insert(task_id);
            true
        };

        if let Err(e) = self.persist() {
            if now_expanded {
                self.expanded.remove(&task_id);
            } else {
                self.expanded.insert(task_id);
            }
            return Err(e);
        }

        let _ = self.bus.tx.send(ExpandedChange {
            board_id: self.board_id,
            origin: self.view_id,
        });
        Ok(now_expanded)
    }

    fn persist(&self) -> Result<(), SyncError> {
        let write_err = |source| SyncError::StorageWrite {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(write_err)?;
        }
        let ids: Vec<&Uuid> = self.expanded.iter().collect();
        let json = serde_json::to_vec(&ids).map_err(|e| SyncError::Other(e.into()))?;
        std::fs::write(&self.path, json).map_err(write_err)
    }

    /// Apply changes other views announced. Returns whether the set was
    /// reloaded.
    pub fn sync(&mut self) -> bool {
        let mut stale = false;
        loop {
            match self.changes.try_recv() {
                Ok(change) => {
                    stale |= change.board_id == self.board_id && change.origin != self.view_id;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => stale = true,
                Err(_) => break,
            }
        }
        if stale {
            self.expanded = load(&self.path);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn test_toggle_persists_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let bus = ExpandedTasksBus::new();
        let mut view = ExpandedTasks::open(dir.path(), id(1), &bus);
        assert!(view.toggle(id(5)).unwrap());
        assert!(view.is_expanded(id(5)));

        let raw = std::fs::read_to_string(storage_path(dir.path(), id(1))).unwrap();
        let stored: Vec<Uuid> = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored, vec![id(5)]);

        assert!(!view.toggle(id(5)).unwrap());
        assert!(!view.is_expanded(id(5)));
    }

    #[test]
    fn test_file_name_is_keyed_by_board() {
        let path = storage_path(Path::new("/data"), id(1));
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("agentboard-expanded-{}.json", id(1))
        );
    }

    #[test]
    fn test_reopen_restores_previous_set() {
        let dir = tempfile::tempdir().unwrap();
        let bus = ExpandedTasksBus::new();
        let mut view = ExpandedTasks::open(dir.path(), id(1), &bus);
        view.toggle(id(2)).unwrap();
        view.toggle(id(3)).unwrap();
        drop(view);

        let reopened = ExpandedTasks::open(dir.path(), id(1), &bus);
        assert_eq!(reopened.expanded().iter().copied().collect::<Vec<_>>(), vec![id(2), id(3)]);
    }

    #[test]
    fn test_malformed_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(storage_path(dir.path(), id(1)), b"{not an array").unwrap();
        let view = ExpandedTasks::open(dir.path(), id(1), &ExpandedTasksBus::new());
        assert!(view.expanded().is_empty());
    }

    #[test]
    fn test_other_view_reloads_but_writer_does_not() {
        let dir = tempfile::tempdir().unwrap();
        let bus = ExpandedTasksBus::new();
        let mut writer = ExpandedTasks::open(dir.path(), id(1), &bus);
        let mut reader = ExpandedTasks::open(dir.path(), id(1), &bus);
        let mut other_board = ExpandedTasks::open(dir.path(), id(2), &bus);

        writer.toggle(id(9)).unwrap();
        assert!(!writer.sync());
        assert!(!other_board.sync());
        assert!(reader.sync());
        assert!(reader.is_expanded(id(9)));
        assert!(!reader.sync());
    }

    #[test]
    fn test_failed_write_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let mut view = ExpandedTasks::open(&blocker, id(1), &ExpandedTasksBus::new());

        let err = view.toggle(id(4)).unwrap_err();
        assert!(matches!(err, SyncError::StorageWrite { .. }));
        assert!(!view.is_expanded(id(4)));
    }
}
