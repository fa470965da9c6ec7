//! Access decision engine
//!
//! Every function here is pure and total. Missing roles, unknown features and
//! unknown buttons resolve to "no access" instead of an error, since these
//! checks run inline while a view is being built.

use serde::Serialize;

use crate::feature::{Button, Feature, BUTTON_LEVELS, FEATURE_ROLES};
use crate::role::{included_roles, Level};

/// Tooltip shown on controls the current role cannot use
pub const DENIED_TITLE: &str = "You do not have permission to use this feature";

/// Typed feature check
#[inline]
pub fn allows(level: Level, feature: Feature) -> bool {
    match level {
        Level::Superadmin => true,
        Level::Member(r) => feature.roles().intersects(included_roles(Some(r))),
    }
}

/// Check a feature by name. Superadmin passes every name, known or not.
pub fn has_feature_access(level: Option<Level>, feature: &str) -> bool {
    match level {
        None => false,
        Some(Level::Superadmin) => true,
        Some(l) => Feature::parse(feature).map(|f| allows(l, f)).unwrap_or(false),
    }
}

/// All features reachable from the level's included roles
pub fn available_features(level: Option<Level>) -> Vec<Feature> {
    let Some(level) = level else { return Vec::new() };
    FEATURE_ROLES
        .iter()
        .filter(|(f, _, _)| allows(level, *f))
        .map(|(f, _, _)| *f)
        .collect()
}

/// Ordinal check: does `level` include `required`?
pub fn has_permission(level: Option<Level>, required: Level) -> bool {
    match (level, required) {
        (None, _) => false,
        (Some(Level::Superadmin), _) => true,
        (Some(_), Level::Superadmin) => false,
        (Some(l), Level::Member(r)) => l.included_roles().contains(r),
    }
}

/// Only managers and superadmins may change admin settings
pub fn can_modify_admin_settings(level: Option<Level>) -> bool {
    has_permission(level, Level::MANAGE)
}

/// Every level may see the admin panel shell; its contents are gated separately
pub fn can_view_admin_panel(level: Option<Level>) -> bool {
    has_permission(level, Level::LOOK)
}

pub fn is_admin_or_super(level: Option<Level>, is_superadmin: bool) -> bool {
    is_superadmin || level == Some(Level::MANAGE)
}

/// Roles listed in the role menu. Superadmin sees every level; everyone else
/// sees only their own, so the menu is never a path to self-escalation.
pub fn available_roles(level: Option<Level>, is_superadmin: bool) -> Vec<Level> {
    if is_superadmin {
        return Level::ALL.to_vec();
    }
    level.into_iter().collect()
}

/// Roles a user may preview as. Non-superadmins may only go down.
pub fn switchable_roles(level: Option<Level>, is_superadmin: bool) -> Vec<Level> {
    if is_superadmin {
        return Level::ALL.to_vec();
    }
    match level {
        Some(l) => l.included_roles().iter().map(Level::Member).collect(),
        None => Vec::new(),
    }
}

/// A role change request is valid when both ends are known levels
pub fn is_valid_role_change(current: Option<&str>, new: Option<&str>) -> bool {
    match (current, new) {
        (Some(_), Some(n)) => Level::parse(n).is_some(),
        _ => false,
    }
}

/// Props for disabling (rather than hiding) a control
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureProps {
    pub disabled: bool,
    #[serde(rename = "aria-disabled")]
    pub aria_disabled: bool,
    #[serde(rename = "data-disabled")]
    pub data_disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'static str>,
}

pub fn feature_props(level: Option<Level>, feature: &str) -> FeatureProps {
    let denied = !has_feature_access(level, feature);
    FeatureProps {
        disabled: denied,
        aria_disabled: denied,
        data_disabled: denied,
        title: denied.then_some(DENIED_TITLE),
    }
}

/// Buttons visible to a level
pub fn visible_buttons(level: Option<Level>) -> Vec<Button> {
    BUTTON_LEVELS
        .iter()
        .filter(|(_, _, req)| has_permission(level, *req))
        .map(|(b, _, _)| *b)
        .collect()
}

/// Check a button/action by its upper-case name
pub fn can_perform_action(level: Option<Level>, action: &str) -> bool {
    match Button::parse(action) {
        Some(b) => has_permission(level, b.required()),
        None => false,
    }
}

pub fn is_button_visible(button: &str, level: Option<Level>) -> bool {
    can_perform_action(level, button)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;

    fn lv(s: &str) -> Option<Level> {
        Level::parse(s)
    }

    #[test]
    fn concrete_scenarios() {
        assert!(has_feature_access(lv("look"), "view_library"));
        assert!(!has_feature_access(lv("look"), "create_sop"));
        assert!(has_feature_access(lv("build"), "create_sop"));
        assert!(!has_feature_access(lv("build"), "manage_users"));
        assert!(has_feature_access(lv("manage"), "manage_users"));
        assert!(!has_feature_access(lv("manage"), "manage_all"));
        assert!(has_feature_access(lv("superadmin"), "manage_all"));
    }

    #[test]
    fn fail_closed() {
        assert!(!has_feature_access(None, "view_library"));
        assert!(!has_feature_access(lv("look"), "manage_all"));
        assert!(!has_feature_access(lv("manage"), "no_such_feature"));
        assert!(!has_feature_access(lv("Manage"), "view_library"));
        assert!(available_features(None).is_empty());
        assert!(!has_permission(None, Level::LOOK));
        assert!(!can_perform_action(lv("manage"), "FLY"));
    }

    #[test]
    fn superadmin_passes_unknown_features() {
        for name in ["manage_all", "future_feature", ""] {
            assert!(has_feature_access(Some(Level::Superadmin), name));
        }
        assert_eq!(available_features(Some(Level::Superadmin)).len(), Feature::ALL.len());
    }

    #[test]
    fn higher_roles_keep_lower_features() {
        for (hi, lo) in [(Role::Manage, Role::Build), (Role::Build, Role::Tweak), (Role::Tweak, Role::Look)] {
            let hi_set = available_features(Some(hi.into()));
            for f in available_features(Some(lo.into())) {
                assert!(hi_set.contains(&f), "{hi} lost {f}");
            }
        }
    }

    #[test]
    fn ordinal_checks() {
        assert!(has_permission(lv("build"), Level::TWEAK));
        assert!(!has_permission(lv("tweak"), Level::BUILD));
        assert!(!has_permission(lv("manage"), Level::Superadmin));
        assert!(can_modify_admin_settings(lv("manage")));
        assert!(can_modify_admin_settings(lv("superadmin")));
        assert!(!can_modify_admin_settings(lv("build")));
        assert!(can_view_admin_panel(lv("look")));
        assert!(!can_view_admin_panel(None));
    }

    #[test]
    fn admin_or_super() {
        assert!(is_admin_or_super(lv("manage"), false));
        assert!(is_admin_or_super(lv("look"), true));
        assert!(is_admin_or_super(None, true));
        assert!(!is_admin_or_super(lv("build"), false));
        assert!(!is_admin_or_super(None, false));
    }

    #[test]
    fn role_menus() {
        assert_eq!(available_roles(lv("build"), false), vec![Level::BUILD]);
        assert_eq!(available_roles(lv("look"), true).len(), 5);
        assert!(available_roles(None, false).is_empty());
        assert_eq!(
            switchable_roles(lv("build"), false),
            vec![Level::LOOK, Level::TWEAK, Level::BUILD]
        );
        assert_eq!(switchable_roles(lv("look"), true), Level::ALL.to_vec());
    }

    #[test]
    fn switchable_roles_never_exceed_own_role() {
        for r in Role::ALL {
            let own = included_roles(Some(r));
            for l in switchable_roles(Some(r.into()), false) {
                assert!(l.role().map(|x| own.contains(x)).unwrap_or(false));
            }
        }
    }

    #[test]
    fn feature_props_disable_with_title() {
        let denied = feature_props(lv("look"), "delete_sop");
        assert!(denied.disabled && denied.aria_disabled && denied.data_disabled);
        assert_eq!(denied.title, Some(DENIED_TITLE));
        let allowed = feature_props(lv("manage"), "delete_sop");
        assert!(!allowed.disabled);
        assert_eq!(allowed.title, None);
    }

    #[test]
    fn buttons_by_role() {
        assert_eq!(visible_buttons(lv("look")), vec![Button::View]);
        assert_eq!(
            visible_buttons(lv("manage")),
            vec![Button::View, Button::Suggest, Button::Edit, Button::Delete, Button::ManageUsers]
        );
        assert_eq!(visible_buttons(lv("superadmin")).len(), 6);
        assert!(is_button_visible("EDIT", lv("build")));
        assert!(!is_button_visible("EDIT", lv("tweak")));
    }

    #[test]
    fn role_change_validation() {
        assert!(is_valid_role_change(Some("look"), Some("manage")));
        assert!(is_valid_role_change(Some("look"), Some("superadmin")));
        assert!(!is_valid_role_change(Some("look"), Some("admin")));
        assert!(!is_valid_role_change(None, Some("look")));
    }
}
