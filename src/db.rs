//! LMDB-backed membership store

use std::path::Path;

use async_trait::async_trait;
use heed::types::{Bytes, Str, U64};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{err, GateError, Result};
use crate::role::Role;
use crate::store::{Department, DepartmentId, Membership, MembershipStore, Profile, UserId};

// Database type aliases
pub type Db = Database<Bytes, U64<byteorder::BigEndian>>;
pub type DbJson = Database<Bytes, Str>;

/// Create a 32-byte key from two ids
#[inline]
pub fn key(a: Uuid, b: Uuid) -> [u8; 32] {
    let mut k = [0u8; 32];
    k[..16].copy_from_slice(a.as_bytes());
    k[16..].copy_from_slice(b.as_bytes());
    k
}

/// Bidirectional index: fwd[a,b] and rev[b,a] stay in sync
pub struct BiPair {
    pub fwd: Db,
    pub rev: Db,
}

impl BiPair {
    #[inline]
    pub fn get(&self, tx: &RoTxn, a: Uuid, b: Uuid) -> Result<Option<u64>> {
        self.fwd.get(tx, &key(a, b)).map_err(err)
    }

    #[inline]
    pub fn put(&self, tx: &mut RwTxn, a: Uuid, b: Uuid, v: u64) -> Result<()> {
        self.fwd.put(tx, &key(a, b), &v).map_err(err)?;
        self.rev.put(tx, &key(b, a), &v).map_err(err)
    }

    #[inline]
    pub fn del(&self, tx: &mut RwTxn, a: Uuid, b: Uuid) -> Result<bool> {
        let r = self.fwd.delete(tx, &key(a, b)).map_err(err)?;
        self.rev.delete(tx, &key(b, a)).map_err(err)?;
        Ok(r)
    }

    pub fn list_fwd(&self, tx: &RoTxn, a: Uuid) -> Result<Vec<(Uuid, u64)>> {
        Self::list_pfx(tx, &self.fwd, a)
    }

    pub fn list_rev(&self, tx: &RoTxn, b: Uuid) -> Result<Vec<(Uuid, u64)>> {
        Self::list_pfx(tx, &self.rev, b)
    }

    fn list_pfx(tx: &RoTxn, db: &Db, pfx: Uuid) -> Result<Vec<(Uuid, u64)>> {
        let mut r = Vec::new();
        for item in db.prefix_iter(tx, pfx.as_bytes()).map_err(err)? {
            let (k, v) = item.map_err(err)?;
            if k.len() == 32 {
                r.push((Uuid::from_slice(&k[16..32]).map_err(err)?, v));
            }
        }
        Ok(r)
    }
}

/// All database handles
struct Dbs {
    members: BiPair,
    profiles: DbJson,
    departments: DbJson,
}

/// Membership store over one LMDB environment.
///
/// Each store owns its environment; there is no process-wide handle, so tests
/// can open one store per temporary directory.
///
/// The async methods run their LMDB transactions inline on the calling task.
/// Transactions are short and memory-mapped, but they do block the executor
/// thread while they run; heavy callers should move them to `spawn_blocking`.
pub struct LmdbStore {
    env: Env,
    dbs: Dbs,
}

impl LmdbStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>, map_size: usize) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(err)?;
        // SAFETY: LMDB requires no other processes access this path concurrently during open.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(4)
                .open(path)
                .map_err(err)?
        };
        let mut tx = env.write_txn().map_err(err)?;
        let dbs = Dbs {
            members: BiPair {
                fwd: env.create_database(&mut tx, Some("memberships")).map_err(err)?,
                rev: env.create_database(&mut tx, Some("members_rev")).map_err(err)?,
            },
            profiles: env.create_database(&mut tx, Some("profiles")).map_err(err)?,
            departments: env.create_database(&mut tx, Some("departments")).map_err(err)?,
        };
        tx.commit().map_err(err)?;
        debug!(path = %path.display(), "opened membership store");
        Ok(LmdbStore { env, dbs })
    }

    fn read<T, F: FnOnce(&Dbs, &RoTxn) -> Result<T>>(&self, f: F) -> Result<T> {
        f(&self.dbs, &self.env.read_txn().map_err(err)?)
    }

    fn write<T, F: FnOnce(&Dbs, &mut RwTxn) -> Result<T>>(&self, f: F) -> Result<T> {
        let mut tx = self.env.write_txn().map_err(err)?;
        let r = f(&self.dbs, &mut tx)?;
        tx.commit().map_err(err)?;
        Ok(r)
    }

    /// Register a department name and return its new id
    pub fn put_department(&self, name: &str) -> Result<DepartmentId> {
        let dept = Department { department_id: DepartmentId::new(), name: name.to_string() };
        let json = serde_json::to_string(&dept)?;
        self.write(|d, tx| d.departments.put(tx, dept.department_id.0.as_bytes(), &json).map_err(err))?;
        Ok(dept.department_id)
    }

    /// Members of a department with their roles (reverse index)
    pub fn members_of(&self, department: DepartmentId) -> Result<Vec<(UserId, Role)>> {
        let rows = self.read(|d, tx| d.members.list_rev(tx, department.0))?;
        Ok(rows
            .into_iter()
            .filter_map(|(u, bit)| decode_role(bit).map(|r| (UserId(u), r)))
            .collect())
    }

    pub fn role_of(&self, user: UserId, department: DepartmentId) -> Result<Option<Role>> {
        let bit = self.read(|d, tx| d.members.get(tx, user.0, department.0))?;
        Ok(bit.and_then(decode_role))
    }

    /// Drop every table (for testing)
    pub fn clear_all(&self) -> Result<()> {
        self.write(|d, tx| {
            d.members.fwd.clear(tx).map_err(err)?;
            d.members.rev.clear(tx).map_err(err)?;
            d.profiles.clear(tx).map_err(err)?;
            d.departments.clear(tx).map_err(err)
        })
    }
}

/// Unknown bits are skipped rather than guessed at
fn decode_role(bit: u64) -> Option<Role> {
    let role = Role::from_bit(bit);
    if role.is_none() {
        warn!(bit, "skipping membership with unknown role bit");
    }
    role
}

#[async_trait]
impl MembershipStore for LmdbStore {
    async fn fetch_user_profile(&self, user: UserId) -> Result<Option<Profile>> {
        let json = self.read(|d, tx| {
            Ok(d.profiles.get(tx, user.0.as_bytes()).map_err(err)?.map(str::to_string))
        })?;
        match json {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn create_user_profile(&self, profile: Profile) -> Result<Profile> {
        let json = serde_json::to_string(&profile)?;
        self.write(|d, tx| d.profiles.put(tx, profile.user_id.0.as_bytes(), &json).map_err(err))?;
        Ok(profile)
    }

    async fn fetch_memberships(&self, user: UserId) -> Result<Vec<Membership>> {
        let rows = self.read(|d, tx| d.members.list_fwd(tx, user.0))?;
        Ok(rows
            .into_iter()
            .filter_map(|(dept, bit)| {
                decode_role(bit).map(|role| Membership {
                    user_id: user,
                    department_id: DepartmentId(dept),
                    role,
                })
            })
            .collect())
    }

    async fn upsert_membership(&self, user: UserId, department: DepartmentId, role: Role) -> Result<()> {
        self.write(|d, tx| d.members.put(tx, user.0, department.0, role.bit() as u64))
    }

    async fn delete_membership(&self, user: UserId, department: DepartmentId) -> Result<bool> {
        self.write(|d, tx| d.members.del(tx, user.0, department.0))
    }

    async fn fetch_departments(&self, ids: &[DepartmentId]) -> Result<Vec<Department>> {
        let raw = self.read(|d, tx| {
            let mut r = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(s) = d.departments.get(tx, id.0.as_bytes()).map_err(err)? {
                    r.push(s.to_string());
                }
            }
            Ok(r)
        })?;
        raw.iter()
            .map(|s| serde_json::from_str(s).map_err(GateError::from))
            .collect()
    }
}
