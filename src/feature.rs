//! Feature permission map and button map

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::role::{Level, Role, RoleSet};

/// A gated UI feature or action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    // Basic features
    ViewLibrary,
    UseSearch,
    ViewAdminPanel,
    ViewSop,
    // Content management
    SuggestChanges,
    EditSop,
    CreateSop,
    DeleteSop,
    RestoreSop,
    // Administration
    ViewDeleted,
    ManageUsers,
    ManageDepartments,
    ManageAll,
}

const EVERYONE: RoleSet = RoleSet::ALL;
const TWEAK_UP: RoleSet = RoleSet::of(&[Role::Tweak, Role::Build, Role::Manage]);
const BUILD_UP: RoleSet = RoleSet::of(&[Role::Build, Role::Manage]);
const MANAGERS: RoleSet = RoleSet::of(&[Role::Manage]);
/// No department role qualifies; only superadmin passes
const SUPERADMIN_ONLY: RoleSet = RoleSet::EMPTY;

/// Feature -> department roles authorized to use it
pub type FeatureMap = [(Feature, &'static str, RoleSet)];

pub const FEATURE_ROLES: &FeatureMap = &[
    (Feature::ViewLibrary, "view_library", EVERYONE),
    (Feature::UseSearch, "use_search", EVERYONE),
    (Feature::ViewAdminPanel, "view_admin_panel", EVERYONE),
    (Feature::ViewSop, "view_sop", EVERYONE),
    (Feature::SuggestChanges, "suggest_changes", TWEAK_UP),
    (Feature::EditSop, "edit_sop", BUILD_UP),
    (Feature::CreateSop, "create_sop", BUILD_UP),
    (Feature::DeleteSop, "delete_sop", MANAGERS),
    (Feature::RestoreSop, "restore_sop", MANAGERS),
    (Feature::ViewDeleted, "view_deleted", MANAGERS),
    (Feature::ManageUsers, "manage_users", MANAGERS),
    (Feature::ManageDepartments, "manage_departments", MANAGERS),
    (Feature::ManageAll, "manage_all", SUPERADMIN_ONLY),
];

/// Features intentionally reserved for superadmin (empty role set)
pub const SUPERADMIN_FEATURES: &[Feature] = &[Feature::ManageAll];

impl Feature {
    pub const ALL: [Feature; 13] = [
        Feature::ViewLibrary,
        Feature::UseSearch,
        Feature::ViewAdminPanel,
        Feature::ViewSop,
        Feature::SuggestChanges,
        Feature::EditSop,
        Feature::CreateSop,
        Feature::DeleteSop,
        Feature::RestoreSop,
        Feature::ViewDeleted,
        Feature::ManageUsers,
        Feature::ManageDepartments,
        Feature::ManageAll,
    ];

    pub fn as_str(self) -> &'static str {
        FEATURE_ROLES
            .iter()
            .find(|(f, _, _)| *f == self)
            .map(|(_, n, _)| *n)
            .unwrap_or("")
    }

    pub fn parse(name: &str) -> Option<Feature> {
        FEATURE_ROLES.iter().find(|(_, n, _)| *n == name).map(|(f, _, _)| *f)
    }

    /// Department roles authorized for this feature
    pub fn roles(self) -> RoleSet {
        FEATURE_ROLES
            .iter()
            .find(|(f, _, _)| *f == self)
            .map(|(_, _, r)| *r)
            .unwrap_or(RoleSet::EMPTY)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::parse(s).ok_or_else(|| GateError::InvalidConfig(format!("unknown feature {s}")))
    }
}

/// Coarse-grained buttons gated by a minimum level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Button {
    View,
    Suggest,
    Edit,
    Delete,
    ManageUsers,
    ManageAll,
}

pub const BUTTON_LEVELS: &[(Button, &str, Level)] = &[
    (Button::View, "VIEW", Level::LOOK),
    (Button::Suggest, "SUGGEST", Level::TWEAK),
    (Button::Edit, "EDIT", Level::BUILD),
    (Button::Delete, "DELETE", Level::MANAGE),
    (Button::ManageUsers, "MANAGE_USERS", Level::MANAGE),
    (Button::ManageAll, "MANAGE_ALL", Level::Superadmin),
];

impl Button {
    pub fn as_str(self) -> &'static str {
        BUTTON_LEVELS
            .iter()
            .find(|(b, _, _)| *b == self)
            .map(|(_, n, _)| *n)
            .unwrap_or("")
    }

    pub fn parse(name: &str) -> Option<Button> {
        BUTTON_LEVELS.iter().find(|(_, n, _)| *n == name).map(|(b, _, _)| *b)
    }

    /// Minimum level that sees this button
    pub fn required(self) -> Level {
        BUTTON_LEVELS
            .iter()
            .find(|(b, _, _)| *b == self)
            .map(|(_, _, l)| *l)
            .unwrap_or(Level::Superadmin)
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convert a feature list to names
pub fn features_to_names(features: &[Feature]) -> Vec<&'static str> {
    features.iter().map(|f| f.as_str()).collect()
}

/// Convert names to features, dropping unknown ones
pub fn names_to_features(names: &[&str]) -> Vec<Feature> {
    names.iter().filter_map(|n| Feature::parse(n)).collect()
}
