//! User/department state for one signed-in principal
//!
//! A [`Session`] resolves the profile and memberships of one user, tracks the
//! selected department and an optional view-role override, and is the only
//! place a user's own role gets changed. State sits behind a plain `RwLock`
//! that is never held across a store call.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::DepartmentCache;
use crate::config::{GateConfig, ViewRolePolicy};
use crate::engine::switchable_roles;
use crate::error::{GateError, Result};
use crate::gate::RoleGate;
use crate::locks::MembershipLocks;
use crate::role::{Level, Role};
use crate::store::{Department, DepartmentId, Membership, MembershipStore, Profile, UserId};

pub const ACCESS_PENDING_MESSAGE: &str = "Waiting for admin to grant access.";
pub const LOAD_FAILED_MESSAGE: &str = "Failed to load user data";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum SessionStatus {
    Loading,
    Ready,
    /// Signed in with no memberships yet
    AccessPending,
    Error(String),
    RoleChanging,
    SignedOut,
}

impl SessionStatus {
    /// Text shown in place of the app, if any
    pub fn message(&self) -> Option<&str> {
        match self {
            SessionStatus::AccessPending => Some(ACCESS_PENDING_MESSAGE),
            SessionStatus::Error(m) => Some(m),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct State {
    status: SessionStatus,
    profile: Option<Profile>,
    roles: BTreeMap<DepartmentId, Role>,
    /// Department ids sorted by name, then id
    order: Vec<DepartmentId>,
    selected: Option<DepartmentId>,
    view_role: Option<Level>,
    /// Role writes in flight: the optimistic role and the role to restore on failure
    pending: BTreeMap<DepartmentId, Pending>,
    /// Count of role writes started, and the number of the last one per department
    writes: u64,
    written: BTreeMap<DepartmentId, u64>,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    role: Role,
    base: Option<Role>,
}

impl State {
    fn empty(status: SessionStatus) -> Self {
        State {
            status,
            profile: None,
            roles: BTreeMap::new(),
            order: Vec::new(),
            selected: None,
            view_role: None,
            pending: BTreeMap::new(),
            writes: 0,
            written: BTreeMap::new(),
        }
    }

    /// Drop every role held, keeping the profile. Nothing can be evaluated
    /// against a membership set that failed to load.
    fn forget_roles(&mut self) {
        self.roles.clear();
        self.order.clear();
        self.selected = None;
        self.view_role = None;
        self.pending.clear();
        self.written.clear();
    }

    /// Status once memberships are known and no write is in flight
    fn settle(&mut self) {
        self.status = if !self.pending.is_empty() {
            SessionStatus::RoleChanging
        } else if self.roles.is_empty() && !self.is_super() {
            SessionStatus::AccessPending
        } else {
            SessionStatus::Ready
        };
    }

    fn is_super(&self) -> bool {
        self.profile.as_ref().map(|p| p.is_superadmin).unwrap_or(false)
    }

    fn effective(&self) -> Level {
        if self.is_super() {
            return Level::Superadmin;
        }
        self.selected
            .and_then(|d| self.roles.get(&d))
            .map(|r| Level::Member(*r))
            .unwrap_or(Level::LOOK)
    }

    /// The override only counts while it stays inside what the actual role may preview
    fn current(&self) -> Level {
        let actual = self.effective();
        match self.view_role {
            Some(v) if switchable_roles(Some(actual), self.is_super()).contains(&v) => v,
            _ => actual,
        }
    }

    fn clamp_view_role(&mut self) {
        if let Some(v) = self.view_role {
            if !switchable_roles(Some(self.effective()), self.is_super()).contains(&v) {
                debug!(view_role = %v, "dropping view role outside switchable range");
                self.view_role = None;
            }
        }
    }
}

/// Debug/state view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub user_id: UserId,
    pub profile: Option<Profile>,
    pub departments: Vec<Department>,
    pub memberships: Vec<Membership>,
    pub selected_department: Option<DepartmentId>,
    pub is_superadmin: bool,
    pub current_role: Level,
    pub actual_role: Level,
    pub view_role: Option<Level>,
    pub status: SessionStatus,
    pub role_changing: bool,
}

pub struct Session<S: MembershipStore + ?Sized> {
    store: Arc<S>,
    user: UserId,
    email: String,
    policy: ViewRolePolicy,
    locks: MembershipLocks,
    cache: DepartmentCache,
    state: RwLock<State>,
}

impl<S: MembershipStore + ?Sized> Session<S> {
    /// New, not yet loaded session. `email` seeds the default profile.
    pub fn new(store: Arc<S>, user: UserId, email: &str) -> Self {
        Session {
            store,
            user,
            email: email.to_string(),
            policy: ViewRolePolicy::default(),
            locks: MembershipLocks::new(),
            cache: DepartmentCache::new(),
            state: RwLock::new(State::empty(SessionStatus::Loading)),
        }
    }

    /// Share a lock table with other sessions and admins
    pub fn with_locks(mut self, locks: MembershipLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_policy(mut self, policy: ViewRolePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_config(self, config: &GateConfig) -> Self {
        self.with_policy(config.view_role_policy)
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn locks(&self) -> &MembershipLocks {
        &self.locks
    }

    pub fn cache(&self) -> &DepartmentCache {
        &self.cache
    }

    pub fn status(&self) -> SessionStatus {
        self.read().status.clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.read().profile.clone()
    }

    pub fn is_superadmin(&self) -> bool {
        self.read().is_super()
    }

    pub fn selected_department(&self) -> Option<DepartmentId> {
        self.read().selected
    }

    pub fn view_role(&self) -> Option<Level> {
        self.read().view_role
    }

    pub fn is_role_changing(&self) -> bool {
        self.read().status == SessionStatus::RoleChanging
    }

    /// Membership role in one department, if any
    pub fn role_in(&self, department: DepartmentId) -> Option<Role> {
        self.read().roles.get(&department).copied()
    }

    /// Per-department roles, keyed by department id
    pub fn roles(&self) -> BTreeMap<DepartmentId, Role> {
        self.read().roles.clone()
    }

    pub fn memberships(&self) -> Vec<Membership> {
        let s = self.read();
        s.order
            .iter()
            .filter_map(|d| s.roles.get(d).map(|r| Membership { user_id: self.user, department_id: *d, role: *r }))
            .collect()
    }

    /// Role actually held: superadmin, else the selected department's role, else look
    pub fn effective_role(&self) -> Level {
        self.read().effective()
    }

    /// Role used for gating: the view override when set, else the effective role
    pub fn current_role(&self) -> Level {
        self.read().current()
    }

    /// Gate over the current role; anonymous once signed out, after a failed
    /// load, or before a profile exists
    pub fn gate(&self) -> RoleGate {
        let s = self.read();
        if s.profile.is_none() || matches!(s.status, SessionStatus::SignedOut | SessionStatus::Error(_)) {
            return RoleGate::anonymous();
        }
        RoleGate::new(Some(s.current()), s.is_super()).with_actual(Some(s.effective()))
    }

    /// Resolve profile and memberships. Fetch failures end in the `Error` status.
    #[instrument(skip(self), fields(user = %self.user))]
    pub async fn load(&self) -> SessionStatus {
        self.write().status = SessionStatus::Loading;
        let since = self.read().writes;
        let profile = match self.resolve_profile().await {
            Ok(p) => p,
            Err(e) => return self.fail(e),
        };
        match self.store.fetch_memberships(self.user).await {
            Ok(rows) => self.apply(Some(profile), rows, since).await,
            Err(e) => self.fail(e),
        }
    }

    /// Refetch memberships, e.g. after an admin changed them
    #[instrument(skip(self), fields(user = %self.user))]
    pub async fn refresh(&self) -> SessionStatus {
        if self.read().profile.is_none() {
            return self.load().await;
        }
        let since = self.read().writes;
        match self.store.fetch_memberships(self.user).await {
            Ok(rows) => self.apply(None, rows, since).await,
            Err(e) => self.fail(e),
        }
    }

    async fn resolve_profile(&self) -> Result<Profile> {
        if let Some(p) = self.store.fetch_user_profile(self.user).await? {
            return Ok(p);
        }
        info!(email = %self.email, "no profile found, creating default");
        self.store.create_user_profile(Profile::default_for(self.user, &self.email)).await
    }

    fn fail(&self, e: GateError) -> SessionStatus {
        error!(error = %e, "failed to load user data");
        let mut s = self.write();
        s.forget_roles();
        s.status = SessionStatus::Error(LOAD_FAILED_MESSAGE.to_string());
        s.status.clone()
    }

    /// Install fetched memberships, `since` being the write count when the
    /// fetch started. Rows with a write in flight keep their optimistic role
    /// and the fetched value becomes the rollback target. Rows written after
    /// the fetch started keep the value that write left behind.
    async fn apply(&self, profile: Option<Profile>, rows: Vec<Membership>, since: u64) -> SessionStatus {
        let mut ids: Vec<DepartmentId> = rows.iter().map(|m| m.department_id).collect();
        let touched: Vec<DepartmentId> = {
            let s = self.read();
            s.pending.keys().chain(s.written.keys()).copied().collect()
        };
        for d in touched {
            if !ids.contains(&d) {
                ids.push(d);
            }
        }
        let order = self.sort_by_name(ids).await;

        let mut s = self.write();
        if profile.is_some() {
            s.profile = profile;
        }
        let mut roles: BTreeMap<DepartmentId, Role> = rows.into_iter().map(|m| (m.department_id, m.role)).collect();
        let settled: Vec<(DepartmentId, Option<Role>)> = s
            .written
            .iter()
            .filter(|(d, n)| **n > since && !s.pending.contains_key(*d))
            .map(|(d, _)| (*d, s.roles.get(d).copied()))
            .collect();
        for (dept, role) in settled {
            match role {
                Some(r) => roles.insert(dept, r),
                None => roles.remove(&dept),
            };
        }
        for (dept, p) in s.pending.iter_mut() {
            p.base = roles.insert(*dept, p.role);
        }
        let order: Vec<DepartmentId> = order.into_iter().filter(|d| roles.contains_key(d)).collect();
        s.roles = roles;
        s.order = order;
        let is_super = s.is_super();
        let keep = s.selected.filter(|d| is_super || s.roles.contains_key(d));
        let first = s.order.first().copied();
        s.selected = keep.or(first);
        s.clamp_view_role();
        s.settle();
        debug!(departments = s.roles.len(), selected = ?s.selected, status = ?s.status, "session resolved");
        s.status.clone()
    }

    async fn sort_by_name(&self, mut ids: Vec<DepartmentId>) -> Vec<DepartmentId> {
        match self.cache.get_many(self.store.as_ref(), &ids).await {
            Ok(depts) => {
                let names: HashMap<DepartmentId, String> =
                    depts.into_iter().map(|d| (d.department_id, d.name)).collect();
                ids.sort_by(|a, b| {
                    let (na, nb) = (names.get(a), names.get(b));
                    (na.is_none(), na, a).cmp(&(nb.is_none(), nb, b))
                });
            }
            Err(e) => {
                warn!(error = %e, "department names unavailable, ordering by id");
                ids.sort();
            }
        }
        ids
    }

    /// Switch the selected department. Members may pick their own departments;
    /// superadmins may pick any known department.
    pub async fn select_department(&self, department: DepartmentId) -> Result<()> {
        let (member, is_super) = {
            let s = self.read();
            (s.roles.contains_key(&department), s.is_super())
        };
        if !member {
            let known = is_super && self.cache.get(self.store.as_ref(), department).await?.is_some();
            if !known {
                warn!(%department, "department selection refused");
                return Err(GateError::NotPermitted { actor: self.user.to_string(), feature: "select_department" });
            }
        }
        let mut s = self.write();
        s.selected = Some(department);
        s.clamp_view_role();
        debug!(%department, role = %s.effective(), "department selected");
        Ok(())
    }

    /// Departments of this user with names, in display order
    pub async fn departments(&self) -> Result<Vec<Department>> {
        let order = self.read().order.clone();
        self.cache.get_many(self.store.as_ref(), &order).await
    }

    /// Set the local preview role. Never persisted.
    pub fn change_view_role(&self, level: Level) -> Result<()> {
        let mut s = self.write();
        if self.policy == ViewRolePolicy::SuperadminOnly && !s.is_super() {
            return Err(GateError::NotPermitted { actor: self.user.to_string(), feature: "change_view_role" });
        }
        if !switchable_roles(Some(s.effective()), s.is_super()).contains(&level) {
            warn!(requested = %level, actual = %s.effective(), "view role out of range");
            return Err(GateError::RoleNotAllowed { requested: level });
        }
        s.view_role = Some(level);
        debug!(view_role = %level, "view role set");
        Ok(())
    }

    pub fn clear_view_role(&self) {
        self.write().view_role = None;
    }

    /// Persist a new role for the selected department.
    ///
    /// The local state changes first and is rolled back if the write fails.
    /// A second change for the same membership while one is in flight fails
    /// with `Busy`.
    #[instrument(skip(self), fields(user = %self.user))]
    pub async fn change_role(&self, new_role: Role) -> Result<()> {
        let department = {
            let s = self.read();
            let department = s.selected.ok_or(GateError::NoDepartment)?;
            let actual = s.effective();
            if !s.is_super() && !actual.included_roles().contains(new_role) {
                warn!(requested = %new_role, %actual, "role change above own role refused");
                return Err(GateError::RoleNotAllowed { requested: Level::Member(new_role) });
            }
            department
        };
        let _permit = self.locks.try_acquire(self.user, department)?;

        {
            let mut s = self.write();
            let base = s.roles.insert(department, new_role);
            s.pending.insert(department, Pending { role: new_role, base });
            s.writes += 1;
            let n = s.writes;
            s.written.insert(department, n);
            s.status = SessionStatus::RoleChanging;
        }

        let written = self.store.upsert_membership(self.user, department, new_role).await;

        // A refresh may have run meanwhile; it kept the optimistic role and
        // moved the rollback target. A sign-out or failed load dropped the entry.
        let mut s = self.write();
        let pending = s.pending.remove(&department);
        match written {
            Ok(()) => {
                if pending.is_some() {
                    s.roles.insert(department, new_role);
                    s.view_role = None;
                    s.settle();
                }
                drop(s);
                self.cache.invalidate(department);
                info!(%department, role = %new_role, "role changed");
                Ok(())
            }
            Err(e) => {
                if let Some(p) = pending {
                    match p.base {
                        Some(r) => s.roles.insert(department, r),
                        None => s.roles.remove(&department),
                    };
                    s.clamp_view_role();
                    s.settle();
                }
                warn!(%department, error = %e, "role change failed, rolled back");
                Err(e)
            }
        }
    }

    /// Drop everything held for the user
    pub fn sign_out(&self) {
        *self.write() = State::empty(SessionStatus::SignedOut);
        self.cache.clear();
        info!(user = %self.user, "signed out");
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let departments = match self.departments().await {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "snapshot without department names");
                Vec::new()
            }
        };
        let memberships = self.memberships();
        let s = self.read();
        SessionSnapshot {
            user_id: self.user,
            profile: s.profile.clone(),
            departments,
            memberships,
            selected_department: s.selected,
            is_superadmin: s.is_super(),
            current_role: s.current(),
            actual_role: s.effective(),
            view_role: s.view_role,
            status: s.status.clone(),
            role_changing: s.status == SessionStatus::RoleChanging,
        }
    }
}
