//! The platform's operation table.
//!
//! Session and role administration are served by this crate. The social
//! operations (posts, comments, credits, email verification, uploads) are
//! served elsewhere and call `POST /api/v1/operations/:operation/check`
//! before acting.

use crate::guard::{OperationRegistry, PredefinedRole::*};

pub const OPERATIONS_LIST: &str = "operations.list";
pub const SESSIONS_ISSUE: &str = "sessions.issue";
pub const SESSIONS_LIST: &str = "sessions.list";
pub const SESSIONS_REVOKE: &str = "sessions.revoke";
pub const SESSIONS_REVOKE_ALL: &str = "sessions.revoke_all";
pub const ROLES_ASSIGN: &str = "roles.assign";

pub fn platform_registry(strict: bool) -> OperationRegistry {
    OperationRegistry::builder()
        .public(OPERATIONS_LIST)
        // Administration
        .require(SESSIONS_ISSUE, [Admin])
        .require(SESSIONS_LIST, [Moderator])
        .require(SESSIONS_REVOKE, [Moderator])
        .require(SESSIONS_REVOKE_ALL, [Moderator])
        .require(ROLES_ASSIGN, [Admin])
        .require("users.ban", [Admin, Moderator])
        // Posts
        .public("posts.read")
        .require("posts.create", [Member])
        .require("posts.update", [Member])
        .require("posts.delete", [Moderator])
        // Comments
        .require("comments.create", [Restricted])
        .require("comments.delete", [Moderator])
        // Credits
        .require("credits.read", [Member])
        .require("credits.grant", [Admin])
        // Account
        .require("email.send_verification", [Restricted])
        .require("email.verify", [Restricted])
        .require("uploads.create", [Member])
        .strict(strict)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{RoleLevel, Requirement};

    #[test]
    fn test_administration_requires_privilege() {
        let registry = platform_registry(false);

        assert_eq!(
            registry.required_levels(ROLES_ASSIGN).unwrap().minimum(),
            RoleLevel::new(1)
        );
        assert_eq!(
            registry.required_levels(SESSIONS_REVOKE).unwrap().minimum(),
            RoleLevel::new(2)
        );
        assert_eq!(registry.lookup(OPERATIONS_LIST), Some(&Requirement::Public));
    }

    #[test]
    fn test_multi_level_entry_uses_minimum() {
        let registry = platform_registry(false);
        assert_eq!(
            registry.required_levels("users.ban").unwrap().minimum(),
            RoleLevel::new(1)
        );
    }

    #[test]
    fn test_strictness_is_forwarded() {
        assert!(platform_registry(true).is_strict());
        assert!(!platform_registry(false).is_strict());
    }
}
