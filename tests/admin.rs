//! Membership administration tests
//!
//! Guards run before the store is written; applied changes are logged.

use std::collections::BTreeMap;
use std::sync::Arc;

use sopgate::{
    ChangeKind, DepartmentId, GateConfig, GateError, MembershipAdmin, MembershipLocks, MemoryStore, Profile, Role, Session,
    SessionStatus, UserId,
};

struct Fixture {
    store: Arc<MemoryStore>,
    locks: MembershipLocks,
    actor: UserId,
    target: UserId,
    dept: DepartmentId,
    other: DepartmentId,
}

/// Actor manages `dept` only; target is a `look` member of both departments
async fn setup() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let actor = UserId::new();
    let target = UserId::new();
    store.put_profile(Profile::default_for(actor, "lead@example.com")).await;
    store.put_profile(Profile::default_for(target, "staff@example.com")).await;
    let dept = store.put_department("Kitchen").await;
    let other = store.put_department("Bar").await;
    store.put_membership(actor, dept, Role::Manage).await;
    store.put_membership(target, dept, Role::Look).await;
    store.put_membership(target, other, Role::Look).await;
    Fixture { store, locks: MembershipLocks::new(), actor, target, dept, other }
}

fn admin(f: &Fixture, roles: &[(DepartmentId, Role)], superadmin: bool) -> MembershipAdmin<MemoryStore> {
    let roles: BTreeMap<DepartmentId, Role> = roles.iter().copied().collect();
    MembershipAdmin::new(f.store.clone(), f.actor, superadmin, roles, f.locks.clone())
}

fn manager(f: &Fixture) -> MembershipAdmin<MemoryStore> {
    admin(f, &[(f.dept, Role::Manage)], false)
}

// ============================================================================
// Guards
// ============================================================================

/// Actor == target never reaches the store
#[tokio::test]
async fn self_modification_rejected_before_store() {
    let f = setup().await;
    let a = manager(&f);

    let r = a.set_member_role(f.actor, f.dept, Role::Look).await;
    assert!(matches!(r, Err(GateError::SelfModification)));
    assert_eq!(r.unwrap_err().to_string(), "You cannot modify your own permissions");
    assert!(matches!(a.set_access(f.actor, f.dept, false).await, Err(GateError::SelfModification)));
    assert!(matches!(a.remove_user_memberships(f.actor).await, Err(GateError::SelfModification)));

    assert_eq!(f.store.write_count(), 0);
    assert_eq!(f.store.role_of(f.actor, f.dept).await, Some(Role::Manage));
}

/// Superadmins are not exempt from the self guard
#[tokio::test]
async fn superadmin_cannot_modify_self_either() {
    let f = setup().await;
    let a = admin(&f, &[], true);

    assert!(matches!(a.set_member_role(f.actor, f.dept, Role::Build).await, Err(GateError::SelfModification)));
    assert_eq!(f.store.write_count(), 0);
}

#[tokio::test]
async fn non_manager_is_denied() {
    let f = setup().await;
    let a = admin(&f, &[(f.dept, Role::Build)], false);

    let r = a.set_member_role(f.target, f.dept, Role::Tweak).await;
    assert!(matches!(r, Err(GateError::NotPermitted { feature: "manage_users", .. })));
    assert_eq!(f.store.write_count(), 0);
}

/// Managing one department says nothing about another
#[tokio::test]
async fn manager_is_scoped_to_department() {
    let f = setup().await;
    let a = manager(&f);

    assert!(a.set_member_role(f.target, f.other, Role::Build).await.is_err());
    assert_eq!(f.store.role_of(f.target, f.other).await, Some(Role::Look));

    a.set_member_role(f.target, f.dept, Role::Build).await.unwrap();
    assert_eq!(f.store.role_of(f.target, f.dept).await, Some(Role::Build));
}

#[tokio::test]
async fn superadmin_manages_every_department() {
    let f = setup().await;
    let a = admin(&f, &[], true);

    a.set_member_role(f.target, f.other, Role::Manage).await.unwrap();
    assert_eq!(f.store.role_of(f.target, f.other).await, Some(Role::Manage));
}

// ============================================================================
// Access Toggle
// ============================================================================

#[tokio::test]
async fn grant_inserts_look_once() {
    let f = setup().await;
    let newcomer = UserId::new();
    let a = manager(&f);

    assert!(a.set_access(newcomer, f.dept, true).await.unwrap());
    assert_eq!(f.store.role_of(newcomer, f.dept).await, Some(Role::Look));

    // Granting again keeps an existing role
    a.set_member_role(newcomer, f.dept, Role::Build).await.unwrap();
    assert!(!a.set_access(newcomer, f.dept, true).await.unwrap());
    assert_eq!(f.store.role_of(newcomer, f.dept).await, Some(Role::Build));
}

#[tokio::test]
async fn revoke_deletes_row() {
    let f = setup().await;
    let a = manager(&f);

    assert!(a.set_access(f.target, f.dept, false).await.unwrap());
    assert_eq!(f.store.role_of(f.target, f.dept).await, None);
    assert!(!a.set_access(f.target, f.dept, false).await.unwrap());
}

#[tokio::test]
async fn only_superadmin_strips_superadmin() {
    let f = setup().await;
    let root = UserId::new();
    f.store
        .put_profile(Profile { is_superadmin: true, ..Profile::default_for(root, "root@example.com") })
        .await;
    f.store.put_membership(root, f.dept, Role::Manage).await;

    let r = manager(&f).set_access(root, f.dept, false).await;
    assert!(matches!(r, Err(GateError::NotPermitted { feature: "manage_all", .. })));
    assert_eq!(f.store.role_of(root, f.dept).await, Some(Role::Manage));

    assert!(admin(&f, &[], true).set_access(root, f.dept, false).await.unwrap());
    assert_eq!(f.store.role_of(root, f.dept).await, None);
}

#[tokio::test]
async fn remove_only_touches_managed_departments() {
    let f = setup().await;
    let a = manager(&f);

    assert_eq!(a.remove_user_memberships(f.target).await.unwrap(), 1);
    assert_eq!(f.store.role_of(f.target, f.dept).await, None);
    assert_eq!(f.store.role_of(f.target, f.other).await, Some(Role::Look));

    assert_eq!(admin(&f, &[], true).remove_user_memberships(f.target).await.unwrap(), 1);
    assert_eq!(f.store.role_of(f.target, f.other).await, None);
}

// ============================================================================
// Serialization & History
// ============================================================================

#[tokio::test]
async fn busy_membership_is_reported_and_refused() {
    let f = setup().await;
    let a = manager(&f);
    assert!(!a.is_saving(f.target, f.dept));

    let permit = f.locks.try_acquire(f.target, f.dept).unwrap();
    assert!(a.is_saving(f.target, f.dept));
    assert!(matches!(a.set_member_role(f.target, f.dept, Role::Tweak).await, Err(GateError::Busy(_))));
    assert_eq!(f.store.write_count(), 0);

    drop(permit);
    assert!(!a.is_saving(f.target, f.dept));
    a.set_member_role(f.target, f.dept, Role::Tweak).await.unwrap();
}

#[tokio::test]
async fn failed_write_is_not_logged() {
    let f = setup().await;
    let a = manager(&f);
    f.store.fail_writes(true);

    assert!(matches!(a.set_member_role(f.target, f.dept, Role::Tweak).await, Err(GateError::Storage(_))));
    assert!(a.recent_changes().is_empty());
    assert!(!a.is_saving(f.target, f.dept));
}

#[tokio::test]
async fn recent_changes_are_bounded_and_newest_first() {
    let f = setup().await;
    let a = manager(&f).with_history(2);

    a.set_member_role(f.target, f.dept, Role::Tweak).await.unwrap();
    a.set_member_role(f.target, f.dept, Role::Build).await.unwrap();
    a.set_access(f.target, f.dept, false).await.unwrap();

    let log = a.recent_changes();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].change, ChangeKind::Revoked);
    assert_eq!(log[1].change, ChangeKind::RoleSet(Role::Build));
    assert!(log[0].at >= log[1].at);
    assert!(log.iter().all(|c| c.actor == f.actor && c.target == f.target));
}

#[tokio::test]
async fn history_size_comes_from_config() {
    let f = setup().await;
    let config = GateConfig { recent_changes: 1, ..GateConfig::default() };
    let a = manager(&f).with_config(&config);

    a.set_member_role(f.target, f.dept, Role::Tweak).await.unwrap();
    a.set_member_role(f.target, f.dept, Role::Build).await.unwrap();

    let log = a.recent_changes();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].change, ChangeKind::RoleSet(Role::Build));
}

/// Admin built from a session acts with that session's memberships
#[tokio::test]
async fn admin_from_session() {
    let f = setup().await;
    let session = Session::new(f.store.clone(), f.actor, "lead@example.com").with_locks(f.locks.clone());
    assert_eq!(session.load().await, SessionStatus::Ready);
    let a = MembershipAdmin::for_session(&session);

    assert_eq!(a.actor(), f.actor);
    a.set_member_role(f.target, f.dept, Role::Build).await.unwrap();
    assert!(a.set_member_role(f.target, f.other, Role::Build).await.is_err());

    // Target sees the change after refreshing
    let target = Session::new(f.store.clone(), f.target, "staff@example.com");
    target.load().await;
    target.select_department(f.dept).await.unwrap();
    assert_eq!(target.role_in(f.dept), Some(Role::Build));
}
