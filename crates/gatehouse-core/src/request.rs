//! Request and response envelopes.
//!
//! A client submits one JSON object per request. The `service` and `message`
//! headers may each carry a comma-joined list; [`ClientRequest::split`]
//! validates the lists and expands them into unit requests, one per target,
//! all sharing the same group id. Responses travel back keyed by
//! `"{service}_{message}"` so the client can correlate each slice of an
//! aggregated reply.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DispatchError, DispatchResult};

/// Outcome token: request handled and state changed as asked.
pub const TOKEN_SUCCESS: &str = "success";
/// Outcome token: request understood but refused.
pub const TOKEN_FAIL: &str = "fail";
/// Outcome token: request failed for an internal reason.
pub const TOKEN_ERROR: &str = "error";
/// Outcome token: request deferred for verification by a second user.
pub const TOKEN_PENDING: &str = "pending";

/// Opaque session token handed to the client at login.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Mints an unguessable session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wraps an existing token, for lookups.
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier shared by every unit request expanded from one client
/// request. The orchestrator aggregates completions under this id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// Mints a fresh group id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request exactly as the client submitted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRequest {
    /// Target service, or a comma-joined list of services.
    pub service: String,
    /// Target message, or a comma-joined list of messages.
    ///
    /// With one service and several messages, every message goes to that
    /// service. With several services the list lengths must match and are
    /// paired positionally.
    #[serde(alias = "msg")]
    pub message: String,
    /// Session token from a prior login, absent for open services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
    /// Handler-specific payload.
    #[serde(default)]
    pub body: Value,
}

impl ClientRequest {
    /// Builds a single-target request.
    pub fn new(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            message: message.into(),
            session: None,
            body: Value::Null,
        }
    }

    /// Attaches a session token.
    #[must_use]
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    /// Attaches a body payload.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Expands the request into unit requests, one per target pair.
    ///
    /// A single service with several messages fans each message out to
    /// that service. Several services require a message list of the same
    /// length; a length mismatch rejects the whole request before any
    /// handler runs.
    pub fn split(&self) -> DispatchResult<Vec<UnitRequest>> {
        let services: Vec<&str> = self.service.split(',').map(str::trim).collect();
        let messages: Vec<&str> = self.message.split(',').map(str::trim).collect();
        if services.iter().any(|s| s.is_empty()) || messages.iter().any(|m| m.is_empty()) {
            return Err(DispatchError::malformed(
                "empty name in service or message list",
            ));
        }
        let pairs: Vec<(String, String)> = if services.len() == 1 {
            messages
                .iter()
                .map(|m| (services[0].to_string(), (*m).to_string()))
                .collect()
        } else if services.len() == messages.len() {
            services
                .iter()
                .zip(messages.iter())
                .map(|(s, m)| ((*s).to_string(), (*m).to_string()))
                .collect()
        } else {
            return Err(DispatchError::malformed(format!(
                "{} services but {} messages",
                services.len(),
                messages.len()
            )));
        };

        let group = GroupId::generate();
        let group_size = pairs.len();
        Ok(pairs
            .into_iter()
            .map(|(service, message)| UnitRequest {
                service,
                message,
                session: self.session.clone(),
                body: self.body.clone(),
                group: group.clone(),
                group_size,
                verified: false,
            })
            .collect())
    }
}

/// One (service, message) invocation, the unit the dispatcher works in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRequest {
    /// Target service.
    pub service: String,
    /// Target message.
    pub message: String,
    /// Session token, if any.
    pub session: Option<SessionId>,
    /// Handler payload.
    pub body: Value,
    /// Aggregation group this unit belongs to.
    pub group: GroupId,
    /// Total number of units in the group.
    pub group_size: usize,
    /// Set on replays that already passed maker-checker verification, so
    /// the workflow does not defer them a second time.
    pub verified: bool,
}

impl UnitRequest {
    /// The key this unit's response is stored under in an aggregated reply.
    #[must_use]
    pub fn response_key(&self) -> String {
        format!("{}_{}", self.service, self.message)
    }
}

/// Response to one unit request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitResponse {
    /// Outcome token, one of the `TOKEN_*` constants or a reject token.
    pub reason: String,
    /// Handler payload, `Null` on failure.
    pub data: Value,
}

impl UnitResponse {
    /// A successful response carrying `data`.
    #[must_use]
    pub fn success(data: Value) -> Self {
        Self {
            reason: TOKEN_SUCCESS.to_string(),
            data,
        }
    }

    /// A refusal carrying a reason token.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            data: Value::Null,
        }
    }

    /// Converts a dispatch failure into a client-facing response. The
    /// reason field carries the machine token verbatim; prose detail goes
    /// into the data payload, redacted for internal faults unless `debug`
    /// is set.
    #[must_use]
    pub fn from_error(err: &DispatchError, debug: bool) -> Self {
        Self {
            reason: err.client_token().to_string(),
            data: serde_json::json!({ "detail": err.client_reason(debug) }),
        }
    }

    /// Returns `true` for success responses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.reason == TOKEN_SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_pair_splits_to_one_unit() {
        let units = ClientRequest::new("user_service", "login_user")
            .split()
            .expect("split");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].response_key(), "user_service_login_user");
        assert_eq!(units[0].group_size, 1);
    }

    #[test]
    fn one_service_many_messages_fans_out() {
        let units = ClientRequest::new("user_service", "all_users,all_groups")
            .split()
            .expect("split");
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| u.service == "user_service"));
        assert_eq!(units[0].group, units[1].group);
        assert_eq!(units[1].message, "all_groups");
    }

    #[test]
    fn paired_lists_zip_positionally() {
        let units = ClientRequest::new("svc_a,svc_b", "m1,m2")
            .split()
            .expect("split");
        assert_eq!(units[0].service, "svc_a");
        assert_eq!(units[0].message, "m1");
        assert_eq!(units[1].service, "svc_b");
        assert_eq!(units[1].message, "m2");
        assert!(units.iter().all(|u| u.group_size == 2));
    }

    #[test]
    fn length_mismatch_rejected_before_dispatch() {
        let err = ClientRequest::new("svc_a,svc_b,svc_c", "m1,m2")
            .split()
            .unwrap_err();
        assert!(matches!(err, DispatchError::MalformedRequest { .. }));
    }

    #[test]
    fn empty_list_entry_rejected() {
        let err = ClientRequest::new("svc_a,,svc_c", "m1,m2,m3")
            .split()
            .unwrap_err();
        assert_eq!(err.client_token(), "badrequest");
    }

    #[test]
    fn error_response_reason_is_machine_token() {
        let resp = UnitResponse::from_error(&DispatchError::denied("alice"), false);
        assert_eq!(resp.reason, "deniedaccess");
        assert!(!resp.is_success());
    }

    #[test]
    fn message_alias_accepted_on_decode() {
        let req: ClientRequest =
            serde_json::from_str(r#"{"service":"open_data","msg":"ping"}"#).expect("decode");
        assert_eq!(req.message, "ping");
        assert!(req.session.is_none());
    }
}
