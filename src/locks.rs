//! Per-membership serialization of permission writes

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{GateError, Result};
use crate::store::{DepartmentId, UserId};

type Key = (UserId, DepartmentId);

/// One async lock per (user, department).
///
/// Cloning shares the table, so a session and a membership admin built from
/// the same handle serialize against each other.
#[derive(Clone, Default)]
pub struct MembershipLocks {
    table: Arc<Mutex<HashMap<Key, Arc<AsyncMutex<()>>>>>,
}

/// Held for the whole optimistic-update / write / rollback sequence
pub struct MutationPermit {
    pub user: UserId,
    pub department: DepartmentId,
    _guard: OwnedMutexGuard<()>,
}

impl MembershipLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries nobody holds or waits on are dropped here, so the table stays
    /// as large as the set of memberships currently being written.
    fn slot(&self, key: Key) -> Arc<AsyncMutex<()>> {
        let mut t = self.table.lock().unwrap_or_else(|p| p.into_inner());
        t.retain(|k, m| *k == key || Arc::strong_count(m) > 1);
        t.entry(key).or_default().clone()
    }

    /// Number of memberships with a lock entry
    pub fn tracked(&self) -> usize {
        self.table.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Wait for the membership to be free
    pub async fn acquire(&self, user: UserId, department: DepartmentId) -> MutationPermit {
        let guard = self.slot((user, department)).lock_owned().await;
        MutationPermit { user, department, _guard: guard }
    }

    /// Take the membership or fail with `Busy` when a change is in flight
    pub fn try_acquire(&self, user: UserId, department: DepartmentId) -> Result<MutationPermit> {
        let guard = self
            .slot((user, department))
            .try_lock_owned()
            .map_err(|_| GateError::Busy(format!("{user}/{department}")))?;
        Ok(MutationPermit { user, department, _guard: guard })
    }

    /// Whether a write for this membership is in flight (used to disable controls)
    pub fn is_busy(&self, user: UserId, department: DepartmentId) -> bool {
        let t = self.table.lock().unwrap_or_else(|p| p.into_inner());
        t.get(&(user, department)).map(|m| m.try_lock().is_err()).unwrap_or(false)
    }
}
