//! Operation registry: which role levels each operation requires.
//!
//! Built once at startup and shared read-only afterwards.
//!
//! ```rust,ignore
//! let registry = OperationRegistry::builder()
//!     .public("operations.list")
//!     .require("posts.create", [PredefinedRole::Member])
//!     .require("credits.grant", [PredefinedRole::Admin])
//!     .build();
//! ```

use serde::Serialize;
use std::collections::BTreeMap;

use super::level::{RequiredLevels, RoleLevel};

/// What an operation requires of its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "levels", rename_all = "snake_case")]
pub enum Requirement {
    /// Registered with no role requirement.
    Public,
    Levels(RequiredLevels),
}

impl Requirement {
    pub fn required_levels(&self) -> Option<&RequiredLevels> {
        match self {
            Self::Public => None,
            Self::Levels(levels) => Some(levels),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    operations: BTreeMap<String, Requirement>,
    strict: bool,
}

impl OperationRegistry {
    pub fn builder() -> OperationRegistryBuilder {
        OperationRegistryBuilder::default()
    }

    /// Levels required by `operation`, or `None` when it has no requirement
    /// or is not registered.
    pub fn required_levels(&self, operation: &str) -> Option<&RequiredLevels> {
        self.operations
            .get(operation)
            .and_then(Requirement::required_levels)
    }

    pub fn lookup(&self, operation: &str) -> Option<&Requirement> {
        self.operations.get(operation)
    }

    /// Whether unregistered operations are rejected instead of allowed.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operations in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Requirement)> {
        self.operations.iter().map(|(name, req)| (name.as_str(), req))
    }
}

#[derive(Debug, Default)]
pub struct OperationRegistryBuilder {
    operations: BTreeMap<String, Requirement>,
    strict: bool,
}

impl OperationRegistryBuilder {
    pub fn public(mut self, operation: impl Into<String>) -> Self {
        self.operations.insert(operation.into(), Requirement::Public);
        self
    }

    /// Register `operation` with the given levels. An empty set registers
    /// it as public. A later registration of the same name replaces it.
    pub fn require<I, L>(mut self, operation: impl Into<String>, levels: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<RoleLevel>,
    {
        let requirement = match RequiredLevels::new(levels) {
            Some(levels) => Requirement::Levels(levels),
            None => Requirement::Public,
        };
        self.operations.insert(operation.into(), requirement);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn build(self) -> OperationRegistry {
        OperationRegistry {
            operations: self.operations,
            strict: self.strict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::PredefinedRole;

    fn registry() -> OperationRegistry {
        OperationRegistry::builder()
            .public("operations.list")
            .require("posts.create", [PredefinedRole::Member])
            .require("posts.delete", [3, 2])
            .require("profile.read", Vec::<i32>::new())
            .build()
    }

    #[test]
    fn test_required_levels_lookup() {
        let registry = registry();

        assert_eq!(
            registry.required_levels("posts.create").unwrap().minimum(),
            RoleLevel::new(3)
        );
        assert_eq!(
            registry.required_levels("posts.delete").unwrap().minimum(),
            RoleLevel::new(2)
        );
        assert!(registry.required_levels("operations.list").is_none());
        assert!(registry.required_levels("unknown").is_none());
    }

    #[test]
    fn test_empty_levels_register_as_public() {
        let registry = registry();
        assert_eq!(registry.lookup("profile.read"), Some(&Requirement::Public));
        assert!(registry.lookup("unknown").is_none());
    }

    #[test]
    fn test_iter_is_sorted() {
        let registry = registry();
        let names: Vec<&str> = registry.iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            vec!["operations.list", "posts.create", "posts.delete", "profile.read"]
        );
    }

    #[test]
    fn test_strict_flag() {
        assert!(!registry().is_strict());
        assert!(OperationRegistry::builder().strict(true).build().is_strict());
    }

    #[test]
    fn test_requirement_serialization() {
        let json = serde_json::to_value(registry().lookup("posts.delete").unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "levels", "levels": [3, 2]}));

        let json = serde_json::to_value(Requirement::Public).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "public"}));
    }
}
