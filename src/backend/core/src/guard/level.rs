//! Role levels and operation requirements.
//!
//! Lower numbers are more privileged: level 1 satisfies a minimum of 3, level
//! 5 does not.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Integer privilege tier. Lower is stronger.
///
/// The canonical text form is the base-10 integer (`"3"`, `"-1"`), which is
/// also how the level is stored in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleLevel(i32);

impl RoleLevel {
    pub const fn new(level: i32) -> Self {
        Self(level)
    }

    pub const fn value(&self) -> i32 {
        self.0
    }

    /// Whether this level meets `minimum`, i.e. is numerically at most it.
    pub const fn satisfies(&self, minimum: RoleLevel) -> bool {
        self.0 <= minimum.0
    }
}

impl From<i32> for RoleLevel {
    fn from(level: i32) -> Self {
        Self(level)
    }
}

impl fmt::Display for RoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a canonical role level: {0:?}")]
pub struct ParseRoleLevelError(pub String);

impl FromStr for RoleLevel {
    type Err = ParseRoleLevelError;

    /// Accepts only the canonical form. `"+3"`, `" 3"` and `"03"` are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i32 = s.parse().map_err(|_| ParseRoleLevelError(s.to_string()))?;
        if value.to_string() != s {
            return Err(ParseRoleLevelError(s.to_string()));
        }
        Ok(Self(value))
    }
}

/// Non-empty set of role levels attached to an operation.
///
/// The effective requirement is the numerically smallest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RequiredLevels(Vec<RoleLevel>);

impl RequiredLevels {
    /// Returns `None` for an empty collection.
    pub fn new<I, L>(levels: I) -> Option<Self>
    where
        I: IntoIterator<Item = L>,
        L: Into<RoleLevel>,
    {
        let levels: Vec<RoleLevel> = levels.into_iter().map(Into::into).collect();
        if levels.is_empty() {
            None
        } else {
            Some(Self(levels))
        }
    }

    /// Single-level requirement.
    pub fn at_most(level: impl Into<RoleLevel>) -> Self {
        Self(vec![level.into()])
    }

    /// The effective minimum: the numerically smallest level.
    pub fn minimum(&self) -> RoleLevel {
        self.0.iter().copied().min().unwrap_or(RoleLevel(i32::MIN))
    }

    pub fn levels(&self) -> &[RoleLevel] {
        &self.0
    }
}

impl<'de> Deserialize<'de> for RequiredLevels {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let levels = Vec::<RoleLevel>::deserialize(deserializer)?;
        RequiredLevels::new(levels)
            .ok_or_else(|| serde::de::Error::custom("required levels must not be empty"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_satisfies_lower_is_stronger() {
        assert!(RoleLevel::new(1).satisfies(RoleLevel::new(2)));
        assert!(RoleLevel::new(2).satisfies(RoleLevel::new(2)));
        assert!(!RoleLevel::new(5).satisfies(RoleLevel::new(1)));
    }

    #[test]
    fn test_canonical_parse() {
        assert_eq!("3".parse::<RoleLevel>().unwrap(), RoleLevel::new(3));
        assert_eq!("-1".parse::<RoleLevel>().unwrap(), RoleLevel::new(-1));
        assert_eq!(RoleLevel::new(42).to_string(), "42");

        for bad in ["", "+3", " 3", "03", "3.0", "three", "\"3\"", "99999999999"] {
            assert!(bad.parse::<RoleLevel>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_minimum_of_required_levels() {
        let required = RequiredLevels::new([3, 1, 5]).unwrap();
        assert_eq!(required.minimum(), RoleLevel::new(1));
        assert_eq!(required.levels().len(), 3);
    }

    #[test]
    fn test_empty_required_levels_rejected() {
        assert!(RequiredLevels::new(Vec::<i32>::new()).is_none());
        assert!(serde_json::from_str::<RequiredLevels>("[]").is_err());
        assert_eq!(
            serde_json::from_str::<RequiredLevels>("[2, 4]").unwrap().minimum(),
            RoleLevel::new(2)
        );
    }
}
