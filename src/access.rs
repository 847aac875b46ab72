//! Role gate for admin screens.
//!
//! This is a pure function over an already-resolved profile: no I/O, no
//! caching, no way for a network hiccup to widen access. The row policies
//! on the backing store enforce the same rule server-side; this gate only
//! decides what to render.

use crate::models::{Profile, Role};

/// Whether `profile` clears the `required` role. Rendering code treats
/// `false` as "show the access-denied screen".
///
/// No profile means no access, whatever the required role. A stale or
/// failed resolution therefore fails closed.
pub fn can_access(profile: Option<&Profile>, required: Role) -> bool {
    match profile {
        Some(profile) => profile.role >= required,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with(role: Role) -> Profile {
        Profile {
            id: "user-1".to_string(),
            email: "user@example.com".to_string(),
            display_name: None,
            role,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn no_profile_never_passes() {
        for required in [Role::Customer, Role::Admin, Role::Superadmin] {
            assert!(!can_access(None, required));
        }
    }

    #[test]
    fn customer_only_reaches_customer_screens() {
        let profile = profile_with(Role::Customer);
        assert!(can_access(Some(&profile), Role::Customer));
        assert!(!can_access(Some(&profile), Role::Admin));
        assert!(!can_access(Some(&profile), Role::Superadmin));
    }

    #[test]
    fn admin_reaches_admin_but_not_superadmin() {
        let profile = profile_with(Role::Admin);
        assert!(can_access(Some(&profile), Role::Customer));
        assert!(can_access(Some(&profile), Role::Admin));
        assert!(!can_access(Some(&profile), Role::Superadmin));
    }

    #[test]
    fn superadmin_passes_everything() {
        let profile = profile_with(Role::Superadmin);
        assert!(can_access(Some(&profile), Role::Customer));
        assert!(can_access(Some(&profile), Role::Admin));
        assert!(can_access(Some(&profile), Role::Superadmin));
    }
}
