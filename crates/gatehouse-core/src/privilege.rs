//! Privilege tokens and privilege sets.
//!
//! A privilege is an opaque token granting access to one privileged
//! service. Users carry an unordered set of them; at login the set is
//! copied into the session as an immutable snapshot, so grants and
//! revocations made afterwards apply only to future sessions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// An opaque privilege token.
///
/// By convention a privileged service requires the token carrying its own
/// name, but the association is set at registration and nothing depends on
/// the convention.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Privilege(String);

impl Privilege {
    /// Creates a privilege token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Privilege {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Privilege {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl From<String> for Privilege {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// An unordered set of privilege tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivilegeSet(BTreeSet<Privilege>);

impl PrivilegeSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the set contains `privilege`.
    #[must_use]
    pub fn contains(&self, privilege: &Privilege) -> bool {
        self.0.contains(privilege)
    }

    /// Adds a privilege. Returns `true` if it was not already present.
    pub fn grant(&mut self, privilege: Privilege) -> bool {
        self.0.insert(privilege)
    }

    /// Removes a privilege. Returns `true` if it was present.
    pub fn revoke(&mut self, privilege: &Privilege) -> bool {
        self.0.remove(privilege)
    }

    /// Removes every privilege.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Number of privileges in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the tokens.
    pub fn iter(&self) -> impl Iterator<Item = &Privilege> {
        self.0.iter()
    }

    /// The tokens as plain strings, for response payloads.
    #[must_use]
    pub fn tokens(&self) -> Vec<String> {
        self.0.iter().map(|p| p.as_str().to_string()).collect()
    }
}

impl FromIterator<Privilege> for PrivilegeSet {
    fn from_iter<I: IntoIterator<Item = Privilege>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a PrivilegeSet {
    type Item = &'a Privilege;
    type IntoIter = std::collections::btree_set::Iter<'a, Privilege>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_and_revoke() {
        let mut set = PrivilegeSet::new();
        assert!(set.grant("reports".into()));
        assert!(!set.grant("reports".into()));
        assert!(set.contains(&"reports".into()));
        assert!(set.revoke(&"reports".into()));
        assert!(set.is_empty());
    }

    #[test]
    fn snapshot_is_independent_of_source() {
        let mut source = PrivilegeSet::new();
        source.grant("reports".into());
        let snapshot = source.clone();
        source.grant("admin".into());
        assert!(!snapshot.contains(&"admin".into()));
        assert_eq!(snapshot.len(), 1);
    }
}
