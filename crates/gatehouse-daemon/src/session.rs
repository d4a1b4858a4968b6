//! Sessions and the login state machine.
//!
//! A session is minted on a successful login and carries an immutable
//! snapshot of the user's privileges at that instant. Grants and
//! revocations made afterwards apply only to sessions created later.
//!
//! Login runs a fixed sequence of checks and returns the first rejection
//! it hits, as a machine token the client can branch on: existence,
//! lockout, disabled, forced password change, default password, password
//! expiry, multi-login policy, then the credential comparison itself. A
//! wrong credential bumps the per-user attempt counter; once the counter
//! exceeds the configured maximum the counter is cleared, `maxpassattempts`
//! is reported, and the account is disabled unless the user is currently
//! logged in. A maximum of zero turns lockout off. Expiry is
//! strict: a password is stale only when the elapsed time exceeds the
//! configured lifetime, and a lifetime of zero disables expiry entirely.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use gatehouse_core::credentials::password_digest;
use gatehouse_core::{
    CredentialStore, DispatchError, DispatchResult, EngineConfig, Privilege, PrivilegeSet,
    RejectReason, SessionId, Storage, UserId, UserRecord,
};
use tracing::info;
use uuid::Uuid;

use crate::audit;

/// How a caller presents credentials.
#[derive(Debug, Clone)]
pub enum LoginMethod {
    /// Username plus password.
    Password {
        /// Login name.
        username: String,
        /// Cleartext password, digested before comparison.
        secret: String,
    },
    /// PIN only; the user is identified by the digest itself.
    Pin {
        /// Cleartext PIN.
        secret: String,
    },
}

/// One authenticated session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Bearer token held by the client.
    pub id: SessionId,
    /// Authenticated user.
    pub username: String,
    /// Stable id of the authenticated user.
    pub user_id: UserId,
    /// Host the client reported.
    pub host: String,
    /// Group the user belonged to at login.
    pub group: String,
    /// Login-event id; the logout row reuses it.
    pub login_id: String,
    /// When the session started.
    pub started: DateTime<Utc>,
    /// Privilege snapshot taken at login. Never updated.
    pub privileges: PrivilegeSet,
}

/// Live sessions and per-user attempt counters.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    attempts: RwLock<HashMap<String, u32>>,
}

impl SessionManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a session by token.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions
            .read()
            .expect("lock poisoned")
            .get(id.as_str())
            .cloned()
    }

    /// All live sessions for one user, newest first.
    #[must_use]
    pub fn sessions_for(&self, username: &str) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|s| s.username == username)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.started.cmp(&a.started));
        sessions
    }

    /// Current failed-attempt count for a user.
    #[must_use]
    pub fn attempt_count(&self, username: &str) -> u32 {
        self.attempts
            .read()
            .expect("lock poisoned")
            .get(username)
            .copied()
            .unwrap_or(0)
    }

    /// Resets a user's failed-attempt counter.
    pub fn clear_attempts(&self, username: &str) {
        self.attempts.write().expect("lock poisoned").remove(username);
    }

    fn bump_attempts(&self, username: &str) -> u32 {
        let mut attempts = self.attempts.write().expect("lock poisoned");
        let count = attempts.entry(username.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Authorizes a session token against a required privilege.
    ///
    /// Missing or unknown tokens are denied as `"anonymous"`; a session
    /// whose snapshot lacks the privilege is denied under its username.
    pub fn authorize(
        &self,
        session: Option<&SessionId>,
        privilege: &Privilege,
    ) -> DispatchResult<Session> {
        let session = session
            .and_then(|id| self.get(id))
            .ok_or_else(|| DispatchError::denied("anonymous"))?;
        if session.privileges.contains(privilege) {
            Ok(session)
        } else {
            Err(DispatchError::denied(session.username))
        }
    }

    /// Runs the login state machine.
    ///
    /// # Errors
    ///
    /// Rejections surface as [`DispatchError::AuthenticationRejected`]
    /// with the applicable [`RejectReason`]; storage failures while
    /// writing the login row propagate as [`DispatchError::Storage`].
    pub async fn login(
        &self,
        credentials: &CredentialStore,
        config: &EngineConfig,
        storage: &dyn Storage,
        method: LoginMethod,
        host: &str,
    ) -> DispatchResult<Session> {
        let user = self.lookup(credentials, &method)?;
        let reject = |reason| Err(DispatchError::AuthenticationRejected(reason));

        if config.max_login_attempts > 0
            && self.attempt_count(&user.username) > config.max_login_attempts
        {
            return self.locked_out(credentials, &user);
        }
        if user.disabled {
            return reject(RejectReason::Disabled);
        }
        if user.change_required {
            return reject(RejectReason::ChangePass);
        }
        if user.password_digest == config.default_password_digest {
            // First login on the well-known default credential.
            let _ = credentials.with_user_mut(&user.username, |u| u.change_required = true);
            return reject(RejectReason::ChangePass);
        }
        if self.password_expired(config, &user) {
            let _ = credentials.with_user_mut(&user.username, |u| u.change_required = true);
            return reject(RejectReason::ChangePass);
        }
        if user.logged_in && !config.multi_login_allowed(&user.group) {
            return reject(RejectReason::LoggedIn);
        }
        if let LoginMethod::Password { secret, .. } = &method {
            if !gatehouse_core::digest_matches(&password_digest(secret), &user.password_digest) {
                let failures = self.bump_attempts(&user.username);
                if config.max_login_attempts > 0 && failures > config.max_login_attempts {
                    return self.locked_out(credentials, &user);
                }
                return reject(RejectReason::InvalidPass);
            }
        }

        self.admit(credentials, storage, user, host).await
    }

    /// Ends a session and writes the logout row under its login id.
    pub async fn logout(
        &self,
        credentials: &CredentialStore,
        storage: &dyn Storage,
        id: &SessionId,
    ) -> DispatchResult<()> {
        let session = self
            .sessions
            .write()
            .expect("lock poisoned")
            .remove(id.as_str())
            .ok_or_else(|| DispatchError::malformed("unknown session"))?;
        if self.sessions_for(&session.username).is_empty() {
            let _ = credentials.with_user_mut(&session.username, |u| u.logged_in = false);
        }
        self.clear_attempts(&session.username);
        audit::record_logout(storage, &session.login_id, &session.username).await?;
        info!(user = %session.username, login_id = %session.login_id, "logged out");
        Ok(())
    }

    /// Ends every session a user holds. Returns how many were ended.
    pub async fn force_logout(
        &self,
        credentials: &CredentialStore,
        storage: &dyn Storage,
        username: &str,
    ) -> DispatchResult<usize> {
        let sessions = self.sessions_for(username);
        let count = sessions.len();
        for session in sessions {
            self.logout(credentials, storage, &session.id).await?;
        }
        Ok(count)
    }

    fn lookup(
        &self,
        credentials: &CredentialStore,
        method: &LoginMethod,
    ) -> DispatchResult<UserRecord> {
        let user = match method {
            LoginMethod::Password { username, .. } => credentials.get(username),
            LoginMethod::Pin { secret } => credentials.get_by_digest(&password_digest(secret)),
        };
        user.ok_or(DispatchError::AuthenticationRejected(RejectReason::NotExist))
    }

    fn locked_out(
        &self,
        credentials: &CredentialStore,
        user: &UserRecord,
    ) -> DispatchResult<Session> {
        self.clear_attempts(&user.username);
        if !user.logged_in {
            let _ = credentials.with_user_mut(&user.username, |u| u.disabled = true);
            info!(user = %user.username, "account disabled after repeated failures");
        }
        Err(DispatchError::AuthenticationRejected(
            RejectReason::MaxPassAttempts,
        ))
    }

    fn password_expired(&self, config: &EngineConfig, user: &UserRecord) -> bool {
        if config.password_life_minutes == 0 {
            return false;
        }
        let elapsed_ms = Utc::now().timestamp_millis() - user.password_set_ms;
        elapsed_ms > config.password_life_minutes * 60_000
    }

    async fn admit(
        &self,
        credentials: &CredentialStore,
        storage: &dyn Storage,
        user: UserRecord,
        host: &str,
    ) -> DispatchResult<Session> {
        let login_id = Uuid::new_v4().simple().to_string();
        credentials
            .with_user_mut(&user.username, |u| {
                u.logged_in = true;
                u.last_login = Some(login_id.clone());
            })
            .map_err(|_| DispatchError::AuthenticationRejected(RejectReason::NotExist))?;
        self.clear_attempts(&user.username);
        audit::record_login(storage, &login_id, &user).await?;
        let session = Session {
            id: SessionId::generate(),
            username: user.username.clone(),
            user_id: user.id.clone(),
            host: host.to_string(),
            group: user.group.clone(),
            login_id,
            started: Utc::now(),
            privileges: user.privileges.clone(),
        };
        self.sessions
            .write()
            .expect("lock poisoned")
            .insert(session.id.as_str().to_string(), session.clone());
        info!(user = %session.username, group = %session.group, "login succeeded");
        Ok(session)
    }
}
