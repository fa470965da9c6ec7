//! Per-session department lookup cache

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::Result;
use crate::store::{Department, DepartmentId, MembershipStore};

type Inflight = HashMap<DepartmentId, Arc<OnceCell<Option<Department>>>>;

/// Caches department rows for one session.
///
/// Concurrent lookups of the same id share one fetch. Owned by a session and
/// dropped with it; membership mutations call [`DepartmentCache::invalidate`].
#[derive(Default)]
pub struct DepartmentCache {
    entries: Mutex<HashMap<DepartmentId, Department>>,
    inflight: Mutex<Inflight>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl DepartmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self, id: DepartmentId) -> Option<Department> {
        guard(&self.entries).get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        guard(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up one department, fetching it at most once
    pub async fn get<S: MembershipStore + ?Sized>(&self, store: &S, id: DepartmentId) -> Result<Option<Department>> {
        if let Some(d) = self.cached(id) {
            return Ok(Some(d));
        }
        let cell = guard(&self.inflight).entry(id).or_default().clone();
        let fetched = cell
            .get_or_try_init(|| async move {
                let rows = store.fetch_departments(&[id]).await?;
                Ok::<_, crate::error::GateError>(rows.into_iter().next())
            })
            .await
            .cloned();
        guard(&self.inflight).remove(&id);
        let dept = fetched?;
        if let Some(d) = &dept {
            guard(&self.entries).insert(id, d.clone());
        }
        Ok(dept)
    }

    /// Look up many departments with one fetch for the uncached ones.
    /// Order follows `ids` with duplicates and unknown ids dropped.
    pub async fn get_many<S: MembershipStore + ?Sized>(&self, store: &S, ids: &[DepartmentId]) -> Result<Vec<Department>> {
        let mut seen = HashSet::new();
        let unique: Vec<DepartmentId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        let missing: Vec<DepartmentId> = {
            let entries = guard(&self.entries);
            unique.iter().copied().filter(|id| !entries.contains_key(id)).collect()
        };
        if !missing.is_empty() {
            debug!(count = missing.len(), "fetching uncached departments");
            let rows = store.fetch_departments(&missing).await?;
            let mut entries = guard(&self.entries);
            for d in rows {
                entries.insert(d.department_id, d);
            }
        }
        let entries = guard(&self.entries);
        Ok(unique.iter().filter_map(|id| entries.get(id).cloned()).collect())
    }

    pub fn invalidate(&self, id: DepartmentId) {
        guard(&self.entries).remove(&id);
    }

    pub fn clear(&self) {
        guard(&self.entries).clear();
    }
}
