//! User records and the credential store.
//!
//! The store owns every user known to the engine: identity, credential
//! digest, account flags, group label, and privilege set. Users are never
//! physically removed; deletion moves the record onto a history list.
//!
//! Read-modify-write mutations of a single user (privilege grants and
//! revocations in particular) go through [`CredentialStore::with_user_mut`],
//! which holds the table's write lock for the duration of the closure and
//! therefore serializes racing edits to the same record.
//!
//! Password hashing policy lives outside the engine; the store only holds
//! and compares opaque digests. [`password_digest`] is the helper used by
//! the built-in services, and [`digest_matches`] compares digests in
//! constant time.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use crate::privilege::{Privilege, PrivilegeSet};

/// Stable system-generated user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Mints a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reserved actor id used when the system itself commits an action.
pub const SYSTEM_ACTOR: &str = "SYSTEM_000";

/// Digests a password or PIN for storage.
#[must_use]
pub fn password_digest(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Constant-time comparison of two stored digests.
#[must_use]
pub fn digest_matches(presented: &str, stored: &str) -> bool {
    presented.as_bytes().ct_eq(stored.as_bytes()).into()
}

/// One user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable system-generated id.
    pub id: UserId,
    /// Login name, unique among live users.
    pub username: String,
    /// Display name.
    pub real_name: String,
    /// Stored credential digest.
    pub password_digest: String,
    /// Host the user is expected to connect from.
    pub host: String,
    /// Account disabled flag.
    pub disabled: bool,
    /// Set while the user holds an authenticated session.
    pub logged_in: bool,
    /// Millisecond timestamp of the last password change; expiry is
    /// measured from here.
    pub password_set_ms: i64,
    /// Forces a password change before the next successful login.
    pub change_required: bool,
    /// Group label, `"unassigned"` when none was given.
    pub group: String,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Privilege tokens granted to this user.
    pub privileges: PrivilegeSet,
    /// Login-event id of the most recent successful login.
    pub last_login: Option<String>,
}

/// Parameters for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Login name.
    pub username: String,
    /// Already-digested credential.
    pub password_digest: String,
    /// Expected host.
    pub host: String,
    /// Group label; `None` becomes `"unassigned"`.
    pub group: Option<String>,
    /// Initial privilege tokens.
    pub privileges: Vec<Privilege>,
}

/// Errors from credential store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// A live user with the same name (or, for PIN users, the same
    /// digest) already exists.
    #[error("user already exists: {username}")]
    UserExists {
        /// The conflicting name.
        username: String,
    },

    /// No live user matches the lookup.
    #[error("no such user: {username}")]
    NotFound {
        /// The name that missed.
        username: String,
    },
}

/// In-memory credential table with a deletion history.
///
/// Reads clone the record out so callers never hold the lock across an
/// await point; single-user mutations run under the write lock.
#[derive(Debug, Default)]
pub struct CredentialStore {
    users: RwLock<HashMap<String, UserRecord>>,
    history: RwLock<Vec<UserRecord>>,
}

impl CredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a user. Fails if the name is already taken by a live user.
    pub fn create(&self, new: NewUser) -> Result<UserRecord, CredentialError> {
        let mut users = self.users.write().expect("lock poisoned");
        if users.contains_key(&new.username) {
            return Err(CredentialError::UserExists {
                username: new.username,
            });
        }
        let now = Utc::now();
        let record = UserRecord {
            id: UserId::generate(),
            username: new.username.clone(),
            real_name: new.username.clone(),
            password_digest: new.password_digest,
            host: new.host,
            disabled: false,
            logged_in: false,
            password_set_ms: now.timestamp_millis(),
            change_required: false,
            group: new.group.unwrap_or_else(|| "unassigned".to_string()),
            created: now,
            privileges: new.privileges.into_iter().collect(),
            last_login: None,
        };
        users.insert(new.username, record.clone());
        Ok(record)
    }

    /// Looks up a live user by name.
    #[must_use]
    pub fn get(&self, username: &str) -> Option<UserRecord> {
        self.users
            .read()
            .expect("lock poisoned")
            .get(username)
            .cloned()
    }

    /// Looks up a live user by name, reporting a typed miss.
    pub fn require(&self, username: &str) -> Result<UserRecord, CredentialError> {
        self.get(username).ok_or_else(|| CredentialError::NotFound {
            username: username.to_string(),
        })
    }

    /// Looks up a live user by stored credential digest. PIN logins
    /// identify the user this way instead of by name.
    #[must_use]
    pub fn get_by_digest(&self, digest: &str) -> Option<UserRecord> {
        self.users
            .read()
            .expect("lock poisoned")
            .values()
            .find(|u| digest_matches(digest, &u.password_digest))
            .cloned()
    }

    /// Applies `mutate` to one user under the table's write lock.
    ///
    /// This is the per-user critical section: two racing edits to the
    /// same record cannot interleave and lose updates.
    pub fn with_user_mut<R>(
        &self,
        username: &str,
        mutate: impl FnOnce(&mut UserRecord) -> R,
    ) -> Result<R, CredentialError> {
        let mut users = self.users.write().expect("lock poisoned");
        match users.get_mut(username) {
            Some(record) => Ok(mutate(record)),
            None => Err(CredentialError::NotFound {
                username: username.to_string(),
            }),
        }
    }

    /// Grants privileges to a user.
    pub fn grant(
        &self,
        username: &str,
        privileges: &[Privilege],
    ) -> Result<(), CredentialError> {
        self.with_user_mut(username, |record| {
            for privilege in privileges {
                record.privileges.grant(privilege.clone());
            }
        })
    }

    /// Revokes privileges from a user.
    pub fn revoke(
        &self,
        username: &str,
        privileges: &[Privilege],
    ) -> Result<(), CredentialError> {
        self.with_user_mut(username, |record| {
            for privilege in privileges {
                record.privileges.revoke(privilege);
            }
        })
    }

    /// Replaces a user's credential digest and restarts the expiry clock.
    pub fn set_password(&self, username: &str, digest: String) -> Result<(), CredentialError> {
        self.with_user_mut(username, |record| {
            record.password_digest = digest;
            record.password_set_ms = Utc::now().timestamp_millis();
            record.change_required = false;
        })
    }

    /// Moves a user to the history list.
    pub fn delete(&self, username: &str) -> Result<UserRecord, CredentialError> {
        let mut users = self.users.write().expect("lock poisoned");
        let record = users
            .remove(username)
            .ok_or_else(|| CredentialError::NotFound {
                username: username.to_string(),
            })?;
        self.history.write().expect("lock poisoned").push(record.clone());
        Ok(record)
    }

    /// All live records, unordered.
    #[must_use]
    pub fn all(&self) -> Vec<UserRecord> {
        self.users
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Distinct group labels among live users.
    #[must_use]
    pub fn groups(&self) -> Vec<String> {
        let users = self.users.read().expect("lock poisoned");
        let mut groups: Vec<String> = users.values().map(|u| u.group.clone()).collect();
        groups.sort();
        groups.dedup();
        groups
    }

    /// Records moved to history by deletion, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<UserRecord> {
        self.history.read().expect("lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(username: &str) -> CredentialStore {
        let store = CredentialStore::new();
        store
            .create(NewUser {
                username: username.to_string(),
                password_digest: password_digest("pass"),
                host: "localhost".to_string(),
                group: None,
                privileges: vec!["reports".into()],
            })
            .expect("create");
        store
    }

    #[test]
    fn duplicate_names_rejected() {
        let store = store_with("alice");
        let err = store
            .create(NewUser {
                username: "alice".to_string(),
                password_digest: password_digest("other"),
                host: "localhost".to_string(),
                group: None,
                privileges: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, CredentialError::UserExists { .. }));
    }

    #[test]
    fn digest_comparison_is_exact() {
        assert!(digest_matches(
            &password_digest("secret"),
            &password_digest("secret")
        ));
        assert!(!digest_matches(
            &password_digest("secret"),
            &password_digest("Secret")
        ));
    }

    #[test]
    fn pin_lookup_by_digest() {
        let store = store_with("till-1");
        let found = store.get_by_digest(&password_digest("pass")).expect("hit");
        assert_eq!(found.username, "till-1");
        assert!(store.get_by_digest(&password_digest("wrong")).is_none());
    }

    #[test]
    fn delete_moves_to_history() {
        let store = store_with("alice");
        store.delete("alice").expect("delete");
        assert!(store.get("alice").is_none());
        assert_eq!(store.history().len(), 1);
        assert_eq!(store.history()[0].username, "alice");
    }

    #[test]
    fn grant_revoke_round_trip() {
        let store = store_with("alice");
        store.grant("alice", &["admin".into()]).expect("grant");
        assert!(store.get("alice").unwrap().privileges.contains(&"admin".into()));
        store.revoke("alice", &["admin".into()]).expect("revoke");
        assert!(!store.get("alice").unwrap().privileges.contains(&"admin".into()));
    }

    #[test]
    fn set_password_restarts_expiry_clock() {
        let store = store_with("alice");
        let before = store.get("alice").unwrap().password_set_ms;
        store
            .with_user_mut("alice", |u| {
                u.password_set_ms = 0;
                u.change_required = true;
            })
            .unwrap();
        store
            .set_password("alice", password_digest("fresh"))
            .expect("set");
        let after = store.get("alice").unwrap();
        assert!(after.password_set_ms >= before);
        assert!(!after.change_required);
    }
}
