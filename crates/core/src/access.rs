use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// The caller on whose behalf a tool runs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    /// Privileged principals skip permission checks and the approval gate.
    pub privileged: bool,
}

impl Principal {
    pub fn user(id: impl Into<String>) -> Self {
        Self { id: id.into(), privileged: false }
    }

    pub fn privileged(id: impl Into<String>) -> Self {
        Self { id: id.into(), privileged: true }
    }
}

/// Answers whether a principal holds a permission code. Role storage lives
/// outside the engine; implementations only need to answer the question.
pub trait PermissionPredicate: Send + Sync {
    fn has_permission(&self, principal: &Principal, permission: &str) -> bool;
}

impl<F> PermissionPredicate for F
where
    F: Fn(&Principal, &str) -> bool + Send + Sync,
{
    fn has_permission(&self, principal: &Principal, permission: &str) -> bool {
        self(principal, permission)
    }
}

/// Fixed principal → permission-code grants.
#[derive(Clone, Debug, Default)]
pub struct StaticPermissions {
    grants: BTreeMap<String, BTreeSet<String>>,
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, principal_id: impl Into<String>, permission: impl Into<String>) -> Self {
        self.grants.entry(principal_id.into()).or_default().insert(permission.into());
        self
    }

    pub fn grant_all<I, S>(mut self, principal_id: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.grants.entry(principal_id.into()).or_default();
        entry.extend(permissions.into_iter().map(Into::into));
        self
    }
}

impl PermissionPredicate for StaticPermissions {
    fn has_permission(&self, principal: &Principal, permission: &str) -> bool {
        self.grants.get(&principal.id).is_some_and(|codes| codes.contains(permission))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DenyAll;

impl PermissionPredicate for DenyAll {
    fn has_permission(&self, _principal: &Principal, _permission: &str) -> bool {
        false
    }
}
