//! Persistence collaborator
//!
//! The access core never talks to the database directly. Everything it needs
//! goes through [`MembershipStore`]; [`MemoryStore`] backs tests and
//! [`crate::db::LmdbStore`] backs the check binary.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{GateError, Result};
use crate::role::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepartmentId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        UserId(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl DepartmentId {
    pub fn new() -> Self {
        DepartmentId(Uuid::new_v4())
    }
}

impl Default for DepartmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for DepartmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub is_superadmin: bool,
}

impl Profile {
    /// Profile created on first sign-in when none exists yet
    pub fn default_for(user_id: UserId, email: &str) -> Self {
        let local = email.split('@').next().filter(|s| !s.is_empty()).unwrap_or("User");
        Profile {
            user_id,
            email: email.to_string(),
            display_name: local.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            is_superadmin: false,
        }
    }
}

/// One (user, department, role) row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: UserId,
    pub department_id: DepartmentId,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub department_id: DepartmentId,
    pub name: String,
}

/// Data store consumed by sessions and the membership admin
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn fetch_user_profile(&self, user: UserId) -> Result<Option<Profile>>;

    async fn create_user_profile(&self, profile: Profile) -> Result<Profile>;

    async fn fetch_memberships(&self, user: UserId) -> Result<Vec<Membership>>;

    /// Insert or replace the single row for (user, department)
    async fn upsert_membership(&self, user: UserId, department: DepartmentId, role: Role) -> Result<()>;

    /// Returns whether a row existed
    async fn delete_membership(&self, user: UserId, department: DepartmentId) -> Result<bool>;

    /// Departments for the given ids; unknown ids are skipped
    async fn fetch_departments(&self, ids: &[DepartmentId]) -> Result<Vec<Department>>;
}

#[derive(Default)]
struct Tables {
    profiles: HashMap<UserId, Profile>,
    memberships: BTreeMap<(UserId, DepartmentId), Role>,
    departments: HashMap<DepartmentId, Department>,
}

/// In-memory store with failure injection
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
    department_fetches: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_profile(&self, profile: Profile) {
        self.tables.write().await.profiles.insert(profile.user_id, profile);
    }

    pub async fn put_department(&self, name: &str) -> DepartmentId {
        let id = DepartmentId::new();
        let dept = Department { department_id: id, name: name.to_string() };
        self.tables.write().await.departments.insert(id, dept);
        id
    }

    pub async fn put_membership(&self, user: UserId, department: DepartmentId, role: Role) {
        self.tables.write().await.memberships.insert((user, department), role);
    }

    pub async fn role_of(&self, user: UserId, department: DepartmentId) -> Option<Role> {
        self.tables.read().await.memberships.get(&(user, department)).copied()
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Number of membership writes that reached the store
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of department lookups that reached the store
    pub fn department_fetch_count(&self) -> usize {
        self.department_fetches.load(Ordering::SeqCst)
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(GateError::Storage("read failed".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GateError::Storage("write failed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn fetch_user_profile(&self, user: UserId) -> Result<Option<Profile>> {
        self.check_read()?;
        Ok(self.tables.read().await.profiles.get(&user).cloned())
    }

    async fn create_user_profile(&self, profile: Profile) -> Result<Profile> {
        self.check_read()?;
        self.tables.write().await.profiles.insert(profile.user_id, profile.clone());
        Ok(profile)
    }

    async fn fetch_memberships(&self, user: UserId) -> Result<Vec<Membership>> {
        self.check_read()?;
        let t = self.tables.read().await;
        Ok(t.memberships
            .range((user, DepartmentId(uuid::Uuid::nil()))..)
            .take_while(|((u, _), _)| *u == user)
            .map(|((u, d), r)| Membership { user_id: *u, department_id: *d, role: *r })
            .collect())
    }

    async fn upsert_membership(&self, user: UserId, department: DepartmentId, role: Role) -> Result<()> {
        self.check_write()?;
        self.tables.write().await.memberships.insert((user, department), role);
        Ok(())
    }

    async fn delete_membership(&self, user: UserId, department: DepartmentId) -> Result<bool> {
        self.check_write()?;
        Ok(self.tables.write().await.memberships.remove(&(user, department)).is_some())
    }

    async fn fetch_departments(&self, ids: &[DepartmentId]) -> Result<Vec<Department>> {
        self.check_read()?;
        self.department_fetches.fetch_add(1, Ordering::SeqCst);
        let t = self.tables.read().await;
        Ok(ids.iter().filter_map(|id| t.departments.get(id).cloned()).collect())
    }
}
