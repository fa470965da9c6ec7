//! Gate for UI consumers
//!
//! Components never compare roles themselves. They build a [`RoleGate`] from
//! the session and ask it.

use serde::Serialize;

use crate::engine::{
    self, available_features, can_modify_admin_settings, has_feature_access, FeatureProps,
};
use crate::feature::{Button, Feature};
use crate::role::Level;
use crate::session::SessionSnapshot;

pub const ACCESS_DENIED: &str = "Access Denied";
pub const ACCESS_DENIED_DETAIL: &str = "You do not have permission to view this page.";

/// Outcome for a whole panel: render it, or show an explicit denial in its place
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PanelAccess {
    Render,
    AccessDenied { title: &'static str, message: &'static str },
}

impl PanelAccess {
    pub fn is_denied(&self) -> bool {
        matches!(self, PanelAccess::AccessDenied { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleGate {
    current: Option<Level>,
    actual: Option<Level>,
    is_super: bool,
}

impl RoleGate {
    /// Gate for a known role with no preview in effect
    pub fn new(level: Option<Level>, is_super: bool) -> Self {
        RoleGate { current: level, actual: level, is_super }
    }

    /// Anchor role menus on the held role while `current` is a preview
    pub fn with_actual(mut self, actual: Option<Level>) -> Self {
        self.actual = actual;
        self
    }

    /// No signed-in user: everything is denied
    pub fn anonymous() -> Self {
        RoleGate { current: None, actual: None, is_super: false }
    }

    pub fn from_snapshot(s: &SessionSnapshot) -> Self {
        if s.profile.is_none() {
            return Self::anonymous();
        }
        RoleGate {
            current: Some(s.current_role),
            actual: Some(s.actual_role),
            is_super: s.is_superadmin,
        }
    }

    pub fn current_role(&self) -> Option<Level> {
        self.current
    }

    pub fn is_super(&self) -> bool {
        self.is_super
    }

    pub fn can_show_feature(&self, feature: &str) -> bool {
        has_feature_access(self.current, feature)
    }

    pub fn allows(&self, feature: Feature) -> bool {
        self.current.map(|l| engine::allows(l, feature)).unwrap_or(false)
    }

    pub fn feature_props(&self, feature: &str) -> FeatureProps {
        engine::feature_props(self.current, feature)
    }

    pub fn available_features(&self) -> Vec<Feature> {
        available_features(self.current)
    }

    pub fn can_modify_admin(&self) -> bool {
        can_modify_admin_settings(self.current)
    }

    /// Role menu entries
    pub fn available_roles(&self) -> Vec<Level> {
        engine::available_roles(self.current, self.is_super)
    }

    /// Preview targets, anchored on the actual role so a user who previewed
    /// down can always switch back up
    pub fn switchable_roles(&self) -> Vec<Level> {
        engine::switchable_roles(self.actual, self.is_super)
    }

    pub fn visible_buttons(&self) -> Vec<Button> {
        engine::visible_buttons(self.current)
    }

    pub fn can_perform_action(&self, action: &str) -> bool {
        engine::can_perform_action(self.current, action)
    }

    pub fn panel(&self, feature: &str) -> PanelAccess {
        if self.can_show_feature(feature) {
            PanelAccess::Render
        } else {
            PanelAccess::AccessDenied { title: ACCESS_DENIED, message: ACCESS_DENIED_DETAIL }
        }
    }
}
