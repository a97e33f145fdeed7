//! Capability checks for form access.

use async_trait::async_trait;
use collab_core::{Capability, UserIdentity};
use tracing::debug;

/// Answers view/edit questions for a user on a form.
///
/// Implementations must fail closed: any error or uncertainty is a denial.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// May the user open the form and join its room?
    async fn can_access_form(&self, user: &UserIdentity, form_id: &str) -> bool;

    /// May the user change the form's questions?
    async fn can_edit_form(&self, user: &UserIdentity, form_id: &str) -> bool;
}

/// Evaluates the role and permission strings carried in verified claims.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimsPermissionGate;

impl ClaimsPermissionGate {
    fn check(user: &UserIdentity, form_id: &str, capability: Capability) -> bool {
        if form_id.trim().is_empty() || user.user_id.is_empty() {
            debug!(user_id = %user.user_id, form_id, "denying check with empty identifiers");
            return false;
        }
        user.can(capability, form_id)
    }
}

#[async_trait]
impl PermissionGate for ClaimsPermissionGate {
    async fn can_access_form(&self, user: &UserIdentity, form_id: &str) -> bool {
        Self::check(user, form_id, Capability::View)
    }

    async fn can_edit_form(&self, user: &UserIdentity, form_id: &str) -> bool {
        Self::check(user, form_id, Capability::Edit)
    }
}
