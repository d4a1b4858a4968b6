//! Built-in services.
//!
//! Two services ship with the engine: the privileged `user_service` for
//! account administration and the open `access_service` for login,
//! logout, and password changes. Each module owns its registration
//! routine; [`register_builtin`] calls them all at startup.

pub mod access;
pub mod user;

use std::sync::Arc;

use gatehouse_core::UserRecord;
use serde_json::{json, Value};

use crate::handler::{Handler, HandlerError};
use crate::state::EngineContext;

/// One registered handler plus its dispatch policy.
#[derive(Clone)]
pub struct Endpoint {
    /// The handler to run.
    pub handler: Arc<dyn Handler>,
    /// Whether invocations go through maker-checker verification.
    pub verify: bool,
}

impl Endpoint {
    /// An endpoint executed immediately.
    pub fn direct(handler: Arc<dyn Handler>) -> Self {
        Self {
            handler,
            verify: false,
        }
    }

    /// An endpoint deferred for verification unless the caller is in the
    /// self-verifying set.
    pub fn verified(handler: Arc<dyn Handler>) -> Self {
        Self {
            handler,
            verify: true,
        }
    }
}

/// Registers every built-in service into the context's registry.
pub fn register_builtin(ctx: &EngineContext) {
    user::register(ctx);
    access::register(ctx);
}

/// Pulls a required string field out of a request body.
pub(crate) fn body_str(body: &Value, key: &str) -> Result<String, HandlerError> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| HandlerError::refused(format!("missing field: {key}")))
}

/// Pulls an optional string field out of a request body.
pub(crate) fn body_str_opt(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Pulls a string-array field out of a request body; absent means empty.
pub(crate) fn body_list(body: &Value, key: &str) -> Vec<String> {
    body.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Pulls a numeric field out of a request body; absent means zero.
pub(crate) fn body_u64(body: &Value, key: &str) -> u64 {
    body.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// A user record as shown to clients. The credential digest never leaves
/// the engine.
pub(crate) fn user_view(record: &UserRecord) -> Value {
    json!({
        "id": record.id.as_str(),
        "username": record.username,
        "real_name": record.real_name,
        "host": record.host,
        "disabled": record.disabled,
        "logged_in": record.logged_in,
        "change_required": record.change_required,
        "group": record.group,
        "created": record.created.to_rfc3339(),
        "privileges": record.privileges.tokens(),
        "last_login": record.last_login,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_helpers_handle_absent_fields() {
        let body = json!({"username": "alice", "privileges": ["a", "b"], "limit": 7});
        assert_eq!(body_str(&body, "username").unwrap(), "alice");
        assert!(body_str(&body, "missing").is_err());
        assert_eq!(body_list(&body, "privileges"), vec!["a", "b"]);
        assert!(body_list(&body, "missing").is_empty());
        assert_eq!(body_u64(&body, "limit"), 7);
        assert_eq!(body_u64(&body, "missing"), 0);
    }
}
