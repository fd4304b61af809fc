//! Client-side board cache.
//!
//! [`BoardStore`] holds the per-status ordered task lists the board view
//! renders. Two independent sources write into it: optimistic mutations and
//! pushed server events. Both go through [`SharedBoard::with`], which runs
//! one store primitive as a single critical section, so no caller ever sees
//! a half-applied change.

mod filter;
mod store;

use std::sync::{Arc, Mutex, PoisonError};

pub use filter::{DueDatePreset, FilterState, FilterUpdate};
pub use store::{BoardSnapshot, BoardStore};

/// Cloneable handle to the board cache owned by the active board view.
#[derive(Clone, Default)]
pub struct SharedBoard {
    inner: Arc<Mutex<BoardStore>>,
}

impl SharedBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the store.
    ///
    /// Store primitives never leave partial state behind, so a poisoned lock
    /// still guards a consistent store and is recovered rather than surfaced.
    pub fn with<R>(&self, f: impl FnOnce(&mut BoardStore) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl std::fmt::Debug for SharedBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBoard").finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::task_at;
    use super::*;

    #[test]
    fn test_shared_board_clones_share_state() {
        let board = SharedBoard::new();
        let other = board.clone();
        board.with(|s| s.add_task(task_at(1, 1, 1.0)));
        assert_eq!(other.with(|s| s.len()), 1);
    }

    #[test]
    fn test_shared_board_recovers_from_poison() {
        let board = SharedBoard::new();
        let poisoner = board.clone();
        let _ = std::thread::spawn(move || {
            poisoner.with(|_| panic!("boom"));
        })
        .join();
        board.with(|s| s.add_task(task_at(2, 1, 1.0)));
        assert_eq!(board.with(|s| s.len()), 1);
    }
}
