//! Authoritative map of attached switch machines.
//!
//! The store is the single answer to "does this id exist". Every mutation and
//! every read takes the lock once, so readers never observe a half-applied
//! change.
//!
//! # Example
//!
//! ```rust
//! use rs_tortoise::{Position, SwitchMachineId, SwitchMachineState, SwitchMachineStore};
//!
//! let store = SwitchMachineStore::new();
//! let id = SwitchMachineId::new(1);
//!
//! store.add(SwitchMachineState::attached(id, Position::Position0)).unwrap();
//! assert!(store.has_id(id));
//! assert!(store.add(SwitchMachineState::attached(id, Position::Position1)).is_err());
//!
//! let removed = store.remove(id).unwrap();
//! assert_eq!(removed.position(), Position::Position0);
//! assert!(store.get_by_id(id).is_none());
//! ```

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use crate::error::StoreError;
use crate::switch_machine::{SwitchMachineId, SwitchMachineState};

/// Thread-safe id to state map.
#[derive(Debug, Default)]
pub struct SwitchMachineStore {
    machines: RwLock<BTreeMap<SwitchMachineId, SwitchMachineState>>,
}

impl SwitchMachineStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a half-written entry, so a
    // poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<SwitchMachineId, SwitchMachineState>> {
        self.machines.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<SwitchMachineId, SwitchMachineState>> {
        self.machines.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a new switch machine. Fails if the id is already present.
    pub fn add(&self, state: SwitchMachineState) -> Result<(), StoreError> {
        let mut machines = self.write();
        let id = state.id();
        if machines.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        trace!(%state, "store add");
        machines.insert(id, state);
        Ok(())
    }

    /// Replaces an existing switch machine's state. Fails if the id is absent.
    pub fn update(&self, state: SwitchMachineState) -> Result<(), StoreError> {
        let mut machines = self.write();
        match machines.get_mut(&state.id()) {
            Some(slot) => {
                trace!(%state, "store update");
                *slot = state;
                Ok(())
            }
            None => Err(StoreError::NotFound(state.id())),
        }
    }

    /// Replaces the state of `id` with `f(latest)` under a single write lock
    /// and returns the new state. Fails if the id is absent.
    ///
    /// Use this instead of `get_by_id` plus `update` whenever another thread
    /// may change the entry in between.
    pub fn modify<F>(&self, id: SwitchMachineId, f: F) -> Result<SwitchMachineState, StoreError>
    where
        F: FnOnce(&SwitchMachineState) -> SwitchMachineState,
    {
        let mut machines = self.write();
        let slot = machines.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let next = f(slot);
        debug_assert_eq!(next.id(), id);
        trace!(%next, "store modify");
        *slot = next.clone();
        Ok(next)
    }

    /// Removes a switch machine and returns its last state.
    pub fn remove(&self, id: SwitchMachineId) -> Result<SwitchMachineState, StoreError> {
        let removed = self.write().remove(&id).ok_or(StoreError::NotFound(id))?;
        trace!(%id, "store remove");
        Ok(removed)
    }

    /// Snapshot of every switch machine, ordered by id.
    pub fn get_all(&self) -> Vec<SwitchMachineState> {
        self.read().values().cloned().collect()
    }

    /// Snapshot of one switch machine.
    pub fn get_by_id(&self, id: SwitchMachineId) -> Option<SwitchMachineState> {
        self.read().get(&id).cloned()
    }

    /// True if `id` is attached.
    pub fn has_id(&self, id: SwitchMachineId) -> bool {
        self.read().contains_key(&id)
    }

    /// Number of attached switch machines.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True when nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
