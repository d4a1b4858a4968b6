//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tunable policy knobs for the engine. All fields have defaults so a
/// config file only needs to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Consecutive failed logins tolerated before the account is locked
    /// out. Zero turns lockout off.
    pub max_login_attempts: u32,
    /// Password lifetime in minutes. Zero disables expiry.
    pub password_life_minutes: i64,
    /// Groups whose members may hold several concurrent sessions.
    pub multi_login_groups: Vec<String>,
    /// How long an aggregation group waits for stragglers before filling
    /// their slots with a timeout failure.
    pub group_timeout_ms: u64,
    /// Digest of the well-known default password. Logging in with it
    /// forces an immediate password change.
    pub default_password_digest: String,
    /// Usernames exempt from maker-checker verification.
    pub self_verifying: Vec<String>,
    /// Bootstrap superuser name.
    pub root_user: String,
    /// When set, internal fault detail is relayed to clients.
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_login_attempts: 5,
            password_life_minutes: 0,
            multi_login_groups: Vec::new(),
            group_timeout_ms: 30_000,
            default_password_digest: crate::credentials::password_digest("pass"),
            self_verifying: vec!["root".to_string()],
            root_user: "root".to_string(),
            debug: false,
        }
    }
}

impl EngineConfig {
    /// Whether members of `group` may log in while already logged in.
    #[must_use]
    pub fn multi_login_allowed(&self, group: &str) -> bool {
        self.multi_login_groups.iter().any(|g| g == group)
    }

    /// Whether `username` bypasses maker-checker verification.
    #[must_use]
    pub fn is_self_verifying(&self, username: &str) -> bool {
        self.self_verifying.iter().any(|u| u == username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_exempt_root() {
        let config = EngineConfig::default();
        assert!(config.is_self_verifying("root"));
        assert!(!config.is_self_verifying("alice"));
        assert!(!config.multi_login_allowed("tellers"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_login_attempts": 3}"#).expect("decode");
        assert_eq!(config.max_login_attempts, 3);
        assert_eq!(config.group_timeout_ms, 30_000);
        assert_eq!(config.root_user, "root");
    }
}
