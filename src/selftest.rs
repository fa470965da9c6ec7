//! Startup validation of the static permission tables
//!
//! The engine trusts its tables and never looks for cycles at call time.
//! These checks are meant to run once at startup (see `sopgate-check`) and in tests.

use serde::Serialize;
use tracing::{error, info};

use crate::engine::visible_buttons;
use crate::error::{GateError, Result};
use crate::feature::{Button, FeatureMap, FEATURE_ROLES, SUPERADMIN_FEATURES};
use crate::role::{closure, inherits, Hierarchy, Level, Role, ROLE_HIERARCHY};

/// Problems in a role hierarchy table. Empty means valid.
pub fn check_hierarchy(table: &Hierarchy) -> Vec<String> {
    let mut problems = Vec::new();
    for r in Role::ALL {
        if !table.iter().any(|(x, _)| *x == r) {
            problems.push(format!("{r} has no hierarchy entry"));
        }
    }
    for (r, inh) in table {
        if inh.iter().any(|c| closure(table, *c).contains(*r)) {
            problems.push(format!("{r} inherits itself"));
            continue;
        }
        if inh.iter().any(|c| c > r) {
            problems.push(format!("{r} inherits a higher role"));
        }
        if !closure(table, *r).contains(Role::Look) {
            problems.push(format!("{r} never reaches look"));
        }
    }
    if !inherits(table, Role::Look).is_empty() {
        problems.push("look must be terminal".into());
    }
    problems
}

/// Problems in a feature permission table. Empty means valid.
pub fn check_feature_map(map: &FeatureMap) -> Vec<String> {
    let mut problems = Vec::new();
    for (i, (feature, name, roles)) in map.iter().enumerate() {
        if roles.is_empty() && !SUPERADMIN_FEATURES.contains(feature) {
            problems.push(format!("{name} has no authorized role"));
        }
        if map[..i].iter().any(|(f, n, _)| f == feature || n == name) {
            problems.push(format!("{name} listed twice"));
        }
    }
    problems
}

/// Validate the shipped tables
pub fn validate() -> Result<()> {
    let mut problems = check_hierarchy(ROLE_HIERARCHY);
    problems.extend(check_feature_map(FEATURE_ROLES));
    if problems.is_empty() {
        info!("permission tables valid");
        return Ok(());
    }
    for p in &problems {
        error!(problem = %p, "permission table problem");
    }
    Err(GateError::InvalidConfig(problems.join("; ")))
}

/// Expected button visibility for one level
#[derive(Debug, Clone, Serialize)]
pub struct MatrixCheck {
    pub level: Level,
    pub passed: bool,
    pub visible: Vec<Button>,
    pub missing: Vec<Button>,
    pub unexpected: Vec<Button>,
}

const EXPECTED: &[(Level, &[Button], &[Button])] = &[
    (
        Level::LOOK,
        &[Button::View],
        &[Button::Suggest, Button::Edit, Button::Delete, Button::ManageUsers, Button::ManageAll],
    ),
    (
        Level::TWEAK,
        &[Button::View, Button::Suggest],
        &[Button::Edit, Button::Delete, Button::ManageUsers, Button::ManageAll],
    ),
    (
        Level::BUILD,
        &[Button::View, Button::Suggest, Button::Edit],
        &[Button::Delete, Button::ManageUsers, Button::ManageAll],
    ),
    (
        Level::MANAGE,
        &[Button::View, Button::Suggest, Button::Edit, Button::Delete, Button::ManageUsers],
        &[Button::ManageAll],
    ),
    (
        Level::Superadmin,
        &[Button::View, Button::Suggest, Button::Edit, Button::Delete, Button::ManageUsers, Button::ManageAll],
        &[],
    ),
];

/// Compare each level's visible buttons against the expected matrix
pub fn permission_matrix() -> Vec<MatrixCheck> {
    EXPECTED
        .iter()
        .map(|(level, should, should_not)| {
            let visible = visible_buttons(Some(*level));
            let missing: Vec<Button> = should.iter().filter(|b| !visible.contains(*b)).copied().collect();
            let unexpected: Vec<Button> = should_not.iter().filter(|b| visible.contains(*b)).copied().collect();
            let passed = missing.is_empty() && unexpected.is_empty();
            if passed {
                info!(%level, ?visible, "permission matrix row ok");
            } else {
                error!(%level, ?missing, ?unexpected, "permission matrix row failed");
            }
            MatrixCheck { level: *level, passed, visible, missing, unexpected }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;
    use crate::role::RoleSet;

    #[test]
    fn shipped_tables_are_valid() {
        assert_eq!(check_hierarchy(ROLE_HIERARCHY), Vec::<String>::new());
        assert_eq!(check_feature_map(FEATURE_ROLES), Vec::<String>::new());
        assert!(validate().is_ok());
    }

    #[test]
    fn matrix_passes() {
        let rows = permission_matrix();
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r.passed), "{rows:?}");
    }

    #[test]
    fn cycle_is_reported() {
        const CYCLIC: &Hierarchy = &[
            (Role::Manage, &[Role::Build]),
            (Role::Build, &[Role::Tweak]),
            (Role::Tweak, &[Role::Look, Role::Manage]),
            (Role::Look, &[]),
        ];
        let problems = check_hierarchy(CYCLIC);
        assert!(problems.iter().any(|p| p == "manage inherits itself"), "{problems:?}");
    }

    #[test]
    fn dangling_role_is_reported() {
        const BROKEN: &Hierarchy = &[
            (Role::Manage, &[Role::Build]),
            (Role::Build, &[]),
            (Role::Tweak, &[Role::Look]),
            (Role::Look, &[]),
        ];
        let problems = check_hierarchy(BROKEN);
        assert!(problems.contains(&"build never reaches look".to_string()));
    }

    #[test]
    fn empty_feature_is_reported() {
        const MAP: &FeatureMap = &[
            (Feature::ViewSop, "view_sop", RoleSet::ALL),
            (Feature::DeleteSop, "delete_sop", RoleSet::EMPTY),
            (Feature::ManageAll, "manage_all", RoleSet::EMPTY),
        ];
        assert_eq!(check_feature_map(MAP), vec!["delete_sop has no authorized role".to_string()]);
    }
}
