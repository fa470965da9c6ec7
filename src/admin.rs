//! Membership administration
//!
//! Changes other users' memberships on behalf of an actor. Every guard runs
//! before the store is written.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::GateConfig;
use crate::engine::allows;
use crate::error::{GateError, Result};
use crate::feature::Feature;
use crate::locks::MembershipLocks;
use crate::role::{Level, Role};
use crate::session::Session;
use crate::store::{DepartmentId, MembershipStore, UserId};

pub const DEFAULT_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "role", rename_all = "snake_case")]
pub enum ChangeKind {
    RoleSet(Role),
    Granted,
    Revoked,
}

/// One applied membership change
#[derive(Debug, Clone, Serialize)]
pub struct MembershipChange {
    pub at: DateTime<Utc>,
    pub actor: UserId,
    pub target: UserId,
    pub department: DepartmentId,
    pub change: ChangeKind,
}

pub struct MembershipAdmin<S: MembershipStore + ?Sized> {
    store: Arc<S>,
    actor: UserId,
    is_superadmin: bool,
    roles: BTreeMap<DepartmentId, Role>,
    locks: MembershipLocks,
    history: Mutex<VecDeque<MembershipChange>>,
    capacity: usize,
}

impl<S: MembershipStore + ?Sized> MembershipAdmin<S> {
    pub fn new(
        store: Arc<S>,
        actor: UserId,
        is_superadmin: bool,
        roles: BTreeMap<DepartmentId, Role>,
        locks: MembershipLocks,
    ) -> Self {
        MembershipAdmin {
            store,
            actor,
            is_superadmin,
            roles,
            locks,
            history: Mutex::new(VecDeque::new()),
            capacity: DEFAULT_HISTORY,
        }
    }

    /// Act as the session's user, sharing its store and lock table
    pub fn for_session(session: &Session<S>) -> Self {
        Self::new(
            session.store().clone(),
            session.user(),
            session.is_superadmin(),
            session.roles(),
            session.locks().clone(),
        )
    }

    /// Keep at most `capacity` entries in [`MembershipAdmin::recent_changes`]
    pub fn with_history(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_config(self, config: &GateConfig) -> Self {
        self.with_history(config.recent_changes)
    }

    pub fn actor(&self) -> UserId {
        self.actor
    }

    /// Actor's level in one department: superadmin, or the membership role there
    fn level_in(&self, department: DepartmentId) -> Option<Level> {
        if self.is_superadmin {
            return Some(Level::Superadmin);
        }
        self.roles.get(&department).map(|r| Level::Member(*r))
    }

    fn can_manage(&self, department: DepartmentId) -> bool {
        self.level_in(department).map(|l| allows(l, Feature::ManageUsers)).unwrap_or(false)
    }

    fn guard(&self, target: UserId, department: DepartmentId) -> Result<()> {
        if target == self.actor {
            warn!(actor = %self.actor, "self modification refused");
            return Err(GateError::SelfModification);
        }
        if !self.can_manage(department) {
            warn!(actor = %self.actor, %department, "manage_users denied");
            return Err(self.denied(Feature::ManageUsers));
        }
        Ok(())
    }

    fn denied(&self, feature: Feature) -> GateError {
        GateError::NotPermitted { actor: self.actor.to_string(), feature: feature.as_str() }
    }

    /// Only superadmins may take access away from a superadmin
    async fn guard_superadmin_target(&self, target: UserId) -> Result<()> {
        if self.is_superadmin {
            return Ok(());
        }
        let protected = self.store.fetch_user_profile(target).await?.map(|p| p.is_superadmin).unwrap_or(false);
        if protected {
            warn!(actor = %self.actor, %target, "cannot strip superadmin access");
            return Err(self.denied(Feature::ManageAll));
        }
        Ok(())
    }

    fn record(&self, target: UserId, department: DepartmentId, change: ChangeKind) {
        let mut h = self.history.lock().unwrap_or_else(|p| p.into_inner());
        h.push_front(MembershipChange { at: Utc::now(), actor: self.actor, target, department, change });
        h.truncate(self.capacity);
    }

    /// Set the target's role in a department. Fails with `Busy` while another
    /// change for the same membership is saving.
    #[instrument(skip(self), fields(actor = %self.actor))]
    pub async fn set_member_role(&self, target: UserId, department: DepartmentId, role: Role) -> Result<()> {
        self.guard(target, department)?;
        let _permit = self.locks.try_acquire(target, department)?;
        self.store.upsert_membership(target, department, role).await?;
        info!(%target, %department, %role, "member role set");
        self.record(target, department, ChangeKind::RoleSet(role));
        Ok(())
    }

    /// Grant (`look`) or revoke membership. Returns whether anything changed.
    #[instrument(skip(self), fields(actor = %self.actor))]
    pub async fn set_access(&self, target: UserId, department: DepartmentId, granted: bool) -> Result<bool> {
        self.guard(target, department)?;
        if !granted {
            self.guard_superadmin_target(target).await?;
        }
        let _permit = self.locks.try_acquire(target, department)?;
        if granted {
            let has = self
                .store
                .fetch_memberships(target)
                .await?
                .iter()
                .any(|m| m.department_id == department);
            if has {
                return Ok(false);
            }
            self.store.upsert_membership(target, department, Role::Look).await?;
            info!(%target, %department, "access granted");
            self.record(target, department, ChangeKind::Granted);
            Ok(true)
        } else {
            let removed = self.store.delete_membership(target, department).await?;
            if removed {
                info!(%target, %department, "access revoked");
                self.record(target, department, ChangeKind::Revoked);
            }
            Ok(removed)
        }
    }

    /// Remove the target from every department the actor manages.
    /// Waits for in-flight changes instead of failing. Returns rows removed.
    #[instrument(skip(self), fields(actor = %self.actor))]
    pub async fn remove_user_memberships(&self, target: UserId) -> Result<usize> {
        if target == self.actor {
            warn!(actor = %self.actor, "self removal refused");
            return Err(GateError::SelfModification);
        }
        self.guard_superadmin_target(target).await?;
        let rows = self.store.fetch_memberships(target).await?;
        let mut removed = 0;
        for m in rows.iter().filter(|m| self.can_manage(m.department_id)) {
            let _permit = self.locks.acquire(target, m.department_id).await;
            if self.store.delete_membership(target, m.department_id).await? {
                self.record(target, m.department_id, ChangeKind::Revoked);
                removed += 1;
            }
        }
        info!(%target, removed, "memberships removed");
        Ok(removed)
    }

    /// Whether a change for this membership is saving (to disable its control)
    pub fn is_saving(&self, target: UserId, department: DepartmentId) -> bool {
        self.locks.is_busy(target, department)
    }

    /// Applied changes, most recent first
    pub fn recent_changes(&self) -> Vec<MembershipChange> {
        self.history.lock().unwrap_or_else(|p| p.into_inner()).iter().cloned().collect()
    }
}
