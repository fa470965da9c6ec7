//! Roles, the role hierarchy, and role sets
//!
//! Department roles form an ordered chain `look < tweak < build < manage`.
//! Superadmin is a global designation outside the chain; it is modelled by
//! [`Level::Superadmin`] and never appears on a department membership.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// Department-scoped role, ordered by privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Look,
    Tweak,
    Build,
    Manage,
}

// Role bits
pub const LOOK: u8 = 1;
pub const TWEAK: u8 = 1 << 1;
pub const BUILD: u8 = 1 << 2;
pub const MANAGE: u8 = 1 << 3;

const NAMES: &[(&str, Role)] = &[
    ("look", Role::Look),
    ("tweak", Role::Tweak),
    ("build", Role::Build),
    ("manage", Role::Manage),
];

impl Role {
    /// Every department role, lowest first
    pub const ALL: [Role; 4] = [Role::Look, Role::Tweak, Role::Build, Role::Manage];

    #[inline]
    pub const fn bit(self) -> u8 {
        match self {
            Role::Look => LOOK,
            Role::Tweak => TWEAK,
            Role::Build => BUILD,
            Role::Manage => MANAGE,
        }
    }

    pub fn from_bit(bit: u64) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.bit() as u64 == bit)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Look => "look",
            Role::Tweak => "tweak",
            Role::Build => "build",
            Role::Manage => "manage",
        }
    }

    /// Parse a role name, returning `None` for anything unrecognized
    pub fn parse(name: &str) -> Option<Role> {
        NAMES.iter().find(|(n, _)| *n == name).map(|(_, r)| *r)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::parse(s).ok_or_else(|| GateError::InvalidRole(s.to_string()))
    }
}

/// Privilege level in a department context: a department role, or superadmin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Level {
    Member(Role),
    Superadmin,
}

impl Level {
    pub const LOOK: Level = Level::Member(Role::Look);
    pub const TWEAK: Level = Level::Member(Role::Tweak);
    pub const BUILD: Level = Level::Member(Role::Build);
    pub const MANAGE: Level = Level::Member(Role::Manage);

    /// Every level, lowest first
    pub const ALL: [Level; 5] = [
        Level::LOOK,
        Level::TWEAK,
        Level::BUILD,
        Level::MANAGE,
        Level::Superadmin,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Member(r) => r.as_str(),
            Level::Superadmin => "superadmin",
        }
    }

    pub fn parse(name: &str) -> Option<Level> {
        if name == "superadmin" {
            return Some(Level::Superadmin);
        }
        Role::parse(name).map(Level::Member)
    }

    pub fn role(self) -> Option<Role> {
        match self {
            Level::Member(r) => Some(r),
            Level::Superadmin => None,
        }
    }

    pub fn is_superadmin(self) -> bool {
        matches!(self, Level::Superadmin)
    }

    /// Department roles covered by this level. Superadmin covers all of them.
    pub fn included_roles(self) -> RoleSet {
        match self {
            Level::Member(r) => included_roles(Some(r)),
            Level::Superadmin => RoleSet::ALL,
        }
    }
}

impl From<Role> for Level {
    fn from(r: Role) -> Self {
        Level::Member(r)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::parse(s).ok_or_else(|| GateError::InvalidRole(s.to_string()))
    }
}

impl TryFrom<String> for Level {
    type Error = GateError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Level> for String {
    fn from(l: Level) -> Self {
        l.as_str().to_string()
    }
}

/// Set of department roles as a bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RoleSet(u8);

impl RoleSet {
    pub const EMPTY: RoleSet = RoleSet(0);
    pub const ALL: RoleSet = RoleSet(LOOK | TWEAK | BUILD | MANAGE);

    pub const fn from_bits(bits: u8) -> RoleSet {
        RoleSet(bits & Self::ALL.0)
    }

    pub const fn of(roles: &[Role]) -> RoleSet {
        let mut bits = 0;
        let mut i = 0;
        while i < roles.len() {
            bits |= roles[i].bit();
            i += 1;
        }
        RoleSet(bits)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn contains(self, role: Role) -> bool {
        self.0 & role.bit() != 0
    }

    #[inline]
    pub fn insert(&mut self, role: Role) -> bool {
        let fresh = !self.contains(role);
        self.0 |= role.bit();
        fresh
    }

    #[inline]
    pub const fn union(self, other: RoleSet) -> RoleSet {
        RoleSet(self.0 | other.0)
    }

    #[inline]
    pub const fn intersects(self, other: RoleSet) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn is_superset_of(self, other: RoleSet) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Roles in ascending order
    pub fn iter(self) -> impl Iterator<Item = Role> {
        Role::ALL.into_iter().filter(move |r| self.contains(*r))
    }

    pub fn names(self) -> Vec<&'static str> {
        self.iter().map(Role::as_str).collect()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        let mut s = RoleSet::EMPTY;
        for r in iter {
            s.insert(r);
        }
        s
    }
}

/// Role hierarchy: each role and the roles it directly inherits
pub type Hierarchy = [(Role, &'static [Role])];

pub const ROLE_HIERARCHY: &Hierarchy = &[
    (Role::Manage, &[Role::Build, Role::Tweak, Role::Look]),
    (Role::Build, &[Role::Tweak, Role::Look]),
    (Role::Tweak, &[Role::Look]),
    (Role::Look, &[]),
];

/// Roles directly inherited by `role` in `table`
pub fn inherits(table: &Hierarchy, role: Role) -> &'static [Role] {
    table
        .iter()
        .find(|(r, _)| *r == role)
        .map(|(_, inh)| *inh)
        .unwrap_or(&[])
}

/// `{role}` plus everything reachable from it in `table` (worklist traversal)
pub fn closure(table: &Hierarchy, role: Role) -> RoleSet {
    let mut seen = RoleSet::EMPTY;
    seen.insert(role);
    let mut queue = VecDeque::from([role]);
    while let Some(cur) = queue.pop_front() {
        for &next in inherits(table, cur) {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}

/// All roles included in `role`, itself among them. Empty when no role is known yet.
pub fn included_roles(role: Option<Role>) -> RoleSet {
    match role {
        Some(r) => closure(ROLE_HIERARCHY, r),
        None => RoleSet::EMPTY,
    }
}

/// Highest role by hierarchy position, `look` for an empty list.
/// For display only; gating always uses the department's own role.
pub fn highest_role(roles: &[Role]) -> Role {
    roles.iter().copied().max().unwrap_or(Role::Look)
}

/// Like [`highest_role`] over raw names; unrecognized names are skipped
pub fn highest_role_str(names: &[&str]) -> Role {
    let roles: Vec<Role> = names.iter().filter_map(|n| Role::parse(n)).collect();
    highest_role(&roles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_contains_self_and_bottoms_out_at_look() {
        for r in Role::ALL {
            let inc = included_roles(Some(r));
            assert!(inc.contains(r));
            assert!(inc.contains(Role::Look));
        }
        assert_eq!(included_roles(Some(Role::Look)), RoleSet::of(&[Role::Look]));
        assert_eq!(included_roles(Some(Role::Manage)), RoleSet::ALL);
    }

    #[test]
    fn closure_is_closed_under_inherits() {
        for r in Role::ALL {
            let inc = included_roles(Some(r));
            for member in inc.iter() {
                for &below in inherits(ROLE_HIERARCHY, member) {
                    assert!(inc.contains(below), "{r}: {member} -> {below} missing");
                }
            }
        }
    }

    #[test]
    fn unknown_role_has_empty_closure() {
        assert!(included_roles(None).is_empty());
    }

    #[test]
    fn closure_follows_links_added_to_the_table() {
        const SPARSE: &Hierarchy = &[
            (Role::Manage, &[Role::Build]),
            (Role::Build, &[Role::Tweak]),
            (Role::Tweak, &[Role::Look]),
            (Role::Look, &[]),
        ];
        assert_eq!(closure(SPARSE, Role::Manage), RoleSet::ALL);
    }

    #[test]
    fn highest_role_defaults_to_look() {
        assert_eq!(highest_role(&[]), Role::Look);
        assert_eq!(highest_role(&[Role::Tweak, Role::Manage, Role::Build]), Role::Manage);
        assert_eq!(highest_role_str(&["viewer", "admin"]), Role::Look);
        assert_eq!(highest_role_str(&["tweak", "bogus", "build"]), Role::Build);
    }

    #[test]
    fn level_names_round_trip_through_serde() {
        let json = serde_json::to_string(&Level::Superadmin).unwrap();
        assert_eq!(json, "\"superadmin\"");
        let back: Level = serde_json::from_str("\"build\"").unwrap();
        assert_eq!(back, Level::BUILD);
        assert!(serde_json::from_str::<Level>("\"Admin\"").is_err());
    }

    #[test]
    fn superadmin_orders_above_every_role() {
        assert!(Level::Superadmin > Level::MANAGE);
        assert!(Level::MANAGE > Level::LOOK);
    }
}
