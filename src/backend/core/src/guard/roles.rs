//! Predefined role tiers.
//!
//! | Role       | Level | Description                                        |
//! |------------|-------|----------------------------------------------------|
//! | Admin      | 1     | Full control, including role assignment             |
//! | Moderator  | 2     | Moderates content and manages other users' sessions |
//! | Member     | 3     | Regular account                                     |
//! | Restricted | 4     | Limited account, e.g. pending email verification    |
//!
//! Deployments may store any integer level. These are the tiers the platform
//! registry is written against.

use serde::{Deserialize, Serialize};

use super::level::RoleLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredefinedRole {
    Admin,
    Moderator,
    Member,
    Restricted,
}

impl PredefinedRole {
    pub const fn level(&self) -> RoleLevel {
        match self {
            Self::Admin => RoleLevel::new(1),
            Self::Moderator => RoleLevel::new(2),
            Self::Member => RoleLevel::new(3),
            Self::Restricted => RoleLevel::new(4),
        }
    }

    /// `None` for custom levels.
    pub fn from_level(level: RoleLevel) -> Option<Self> {
        Self::all().into_iter().find(|role| role.level() == level)
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Moderator => "moderator",
            Self::Member => "member",
            Self::Restricted => "restricted",
        }
    }

    pub fn all() -> [PredefinedRole; 4] {
        [Self::Admin, Self::Moderator, Self::Member, Self::Restricted]
    }
}

impl From<PredefinedRole> for RoleLevel {
    fn from(role: PredefinedRole) -> Self {
        role.level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered_by_privilege() {
        let levels: Vec<i32> = PredefinedRole::all().iter().map(|r| r.level().value()).collect();
        assert_eq!(levels, vec![1, 2, 3, 4]);
        assert!(PredefinedRole::Admin.level().satisfies(PredefinedRole::Member.level()));
        assert!(!PredefinedRole::Restricted.level().satisfies(PredefinedRole::Member.level()));
    }

    #[test]
    fn test_from_level() {
        assert_eq!(PredefinedRole::from_level(RoleLevel::new(2)), Some(PredefinedRole::Moderator));
        assert_eq!(PredefinedRole::from_level(RoleLevel::new(7)), None);
    }

    #[test]
    fn test_role_ids() {
        assert_eq!(PredefinedRole::Admin.id(), "admin");
        assert_eq!(PredefinedRole::Restricted.id(), "restricted");
    }
}
