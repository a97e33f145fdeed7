//! Authenticated user identity and per-form capabilities.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::protocol::{RoomUser, now_rfc3339};

/// Roles that bypass per-form permission checks.
const ADMIN_ROLES: [&str; 2] = ["admin", "super_admin"];

/// A named permission a user holds on a form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Open the form and see collaborators.
    View,
    /// Change questions.
    Edit,
    /// Share presence with other editors.
    Collaborate,
    /// Everything.
    Admin,
}

/// Identity established from verified token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    /// Stable user id.
    pub user_id: String,
    /// Email address.
    #[serde(default)]
    pub email: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Role name (`admin`, `editor`, `viewer`, ...).
    #[serde(default)]
    pub role: String,
    /// Permission strings such as `forms:edit` or `form:<id>:view`.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Auth session the token belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl UserIdentity {
    /// Unauthenticated identity with no permissions.
    pub fn guest(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            name: user_id.clone(),
            user_id,
            email: String::new(),
            role: "guest".into(),
            permissions: Vec::new(),
            session_id: None,
        }
    }

    /// Whether the role is administrative.
    pub fn is_admin(&self) -> bool {
        ADMIN_ROLES.contains(&self.role.as_str())
    }

    /// Whether the exact permission string was granted.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// Capabilities this user holds on `form_id`.
    ///
    /// Edit implies view and collaborate. Admin roles hold everything.
    pub fn capabilities_for(&self, form_id: &str) -> BTreeSet<Capability> {
        let mut caps = BTreeSet::new();
        if self.is_admin() {
            caps.extend([
                Capability::View,
                Capability::Edit,
                Capability::Collaborate,
                Capability::Admin,
            ]);
            return caps;
        }

        let edit = self.has_permission("forms:edit")
            || self.has_permission(&format!("form:{form_id}:edit"));
        let view = edit
            || self.has_permission("forms:view")
            || self.has_permission(&format!("form:{form_id}:view"));

        if view {
            let _ = caps.insert(Capability::View);
        }
        if edit {
            let _ = caps.insert(Capability::Edit);
        }
        if edit || self.has_permission("forms:collaborate") {
            let _ = caps.insert(Capability::Collaborate);
        }
        caps
    }

    /// Shorthand for a single capability check.
    pub fn can(&self, capability: Capability, form_id: &str) -> bool {
        self.capabilities_for(form_id).contains(&capability)
    }

    /// Roster entry for this user, stamped now.
    pub fn to_room_user(&self) -> RoomUser {
        RoomUser {
            user_id: self.user_id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
            joined_at: now_rfc3339(),
        }
    }
}
