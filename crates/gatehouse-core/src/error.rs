//! Error types for the dispatch engine.
//!
//! Every failure the engine can report to a client is a variant of
//! [`DispatchError`]. Nothing inside the engine escapes the authorization
//! gate as an unhandled fault: each outcome is converted into a response
//! object before control returns to the orchestrator.
//!
//! Client-facing messages are short machine-readable tokens (for example
//! `"loggedin"` or `"maxpassattempts"`) so client UIs can branch on them.
//! Internal detail is logged server-side and only surfaced to the client
//! when the debug flag is set.

use thiserror::Error;

use crate::storage::StorageError;

/// Reasons a login attempt can be rejected.
///
/// The token form of each variant is returned verbatim to the caller so
/// the client can render the right UI state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No user with the presented name (or PIN) exists.
    NotExist,
    /// The account is disabled.
    Disabled,
    /// A password change is required before login can proceed, either
    /// because it was forced or because the password expired.
    ChangePass,
    /// The user already holds an authenticated session and the multi-login
    /// policy forbids a second one.
    LoggedIn,
    /// The credential did not match.
    InvalidPass,
    /// The consecutive-failure counter exceeded the configured maximum.
    MaxPassAttempts,
}

impl RejectReason {
    /// The wire token for this rejection.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::NotExist => "notexist",
            Self::Disabled => "disabled",
            Self::ChangePass => "changepass",
            Self::LoggedIn => "loggedin",
            Self::InvalidPass => "invalidpass",
            Self::MaxPassAttempts => "maxpassattempts",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Failures produced while dispatching a unit request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler is registered for the (service, message) pair, directly
    /// or through the shared-alias table. Reported per-request, not fatal.
    #[error("message {message} does not exist for service {service}")]
    HandlerNotFound {
        /// Requested service name.
        service: String,
        /// Requested message name.
        message: String,
    },

    /// The caller's privilege snapshot does not cover the target service.
    ///
    /// The required privilege is deliberately not part of the client-facing
    /// reason; it appears only in the server-side audit line.
    #[error("access denied for {identity}")]
    DeniedAccess {
        /// Identity of the caller, or `"anonymous"`.
        identity: String,
    },

    /// A login attempt was rejected with the named reason.
    #[error("authentication rejected: {0}")]
    AuthenticationRejected(RejectReason),

    /// A verifier tried to verify an action they proposed themselves.
    #[error("verifying own action not allowed")]
    SelfVerification,

    /// No pending action exists for the presented serial.
    #[error("action serial does not exist")]
    UnknownSerial,

    /// Someone other than the proposer tried to delete a pending action.
    #[error("only the proposing user may delete a pending action")]
    ForeignDeletion,

    /// A handler failed unexpectedly. The detail is logged server-side and
    /// withheld from the client unless the debug flag is set.
    #[error("handler fault in {service}/{message}: {detail}")]
    HandlerFault {
        /// Service the faulting handler belongs to.
        service: String,
        /// Message that selected the handler.
        message: String,
        /// Server-side failure detail.
        detail: String,
    },

    /// The request itself was malformed (for example a composite request
    /// with unequal service and message list lengths).
    #[error("malformed request: {reason}")]
    MalformedRequest {
        /// Description of the problem.
        reason: String,
    },

    /// The storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl DispatchError {
    /// Shorthand for a handler-not-found failure.
    #[must_use]
    pub fn handler_not_found(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerNotFound {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a denied-access failure.
    #[must_use]
    pub fn denied(identity: impl Into<String>) -> Self {
        Self::DeniedAccess {
            identity: identity.into(),
        }
    }

    /// Shorthand for a handler fault.
    #[must_use]
    pub fn fault(
        service: impl Into<String>,
        message: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::HandlerFault {
            service: service.into(),
            message: message.into(),
            detail: detail.into(),
        }
    }

    /// Shorthand for a malformed-request failure.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedRequest {
            reason: reason.into(),
        }
    }

    /// The machine token identifying this failure class to clients.
    #[must_use]
    pub const fn client_token(&self) -> &'static str {
        match self {
            Self::HandlerNotFound { .. } => "nosuchmessage",
            Self::DeniedAccess { .. } => "deniedaccess",
            Self::AuthenticationRejected(reason) => reason.token(),
            Self::SelfVerification => "selfverification",
            Self::UnknownSerial => "unknownserial",
            Self::ForeignDeletion => "foreigndeletion",
            Self::HandlerFault { .. } => "exception",
            Self::MalformedRequest { .. } => "badrequest",
            Self::Storage(_) => "exception",
        }
    }

    /// Returns `true` when the failure is the caller's fault rather than
    /// an internal one, and its full message is safe to show the client.
    #[must_use]
    pub const fn is_client_fault(&self) -> bool {
        !matches!(self, Self::HandlerFault { .. } | Self::Storage(_))
    }

    /// The reason string to relay to the client. Internal faults collapse
    /// to a generic message unless `debug` is set.
    #[must_use]
    pub fn client_reason(&self, debug: bool) -> String {
        if self.is_client_fault() || debug {
            self.to_string()
        } else {
            "internal error".to_string()
        }
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
