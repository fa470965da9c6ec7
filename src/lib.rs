//! Sopgate - Department-scoped role-based access control for an SOP manager
//!
//! Roles (`look < tweak < build < manage`) are held per department; a
//! superadmin flag sits outside the chain and passes every check. Feature and
//! button checks are pure functions in [`engine`]; [`Session`] tracks who is
//! signed in and which department they act in; [`RoleGate`] is what views ask.

pub mod admin;
pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod feature;
pub mod gate;
pub mod locks;
pub mod role;
pub mod selftest;
pub mod session;
pub mod store;
#[cfg(feature = "cli")]
pub mod telemetry;

pub use admin::{ChangeKind, MembershipAdmin, MembershipChange};
pub use cache::DepartmentCache;
pub use config::{GateConfig, ViewRolePolicy};
pub use db::LmdbStore;
pub use engine::{
    available_features, available_roles, can_modify_admin_settings, feature_props, has_feature_access,
    has_permission, switchable_roles, FeatureProps,
};
pub use error::{GateError, Result};
pub use feature::{Button, Feature};
pub use gate::{PanelAccess, RoleGate};
pub use locks::MembershipLocks;
pub use role::{highest_role, included_roles, Level, Role, RoleSet};
pub use session::{Session, SessionSnapshot, SessionStatus};
pub use store::{Department, DepartmentId, Membership, MembershipStore, MemoryStore, Profile, UserId};
