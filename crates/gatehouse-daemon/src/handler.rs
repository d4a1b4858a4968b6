//! The handler seam.
//!
//! A handler is one callable unit of a service. The gate resolves it,
//! authorizes the caller, and invokes it with the engine context and the
//! request; the handler returns a payload or a typed failure.

use async_trait::async_trait;
use gatehouse_core::request::TOKEN_SUCCESS;
use gatehouse_core::{DispatchError, StorageError, UnitRequest, UnitResponse};
use serde_json::Value;
use thiserror::Error;

use crate::session::Session;
use crate::state::SharedContext;

/// The authorized identity a handler runs on behalf of.
#[derive(Debug, Clone)]
pub enum Caller {
    /// An open-service invocation with no authenticated identity.
    Anonymous,
    /// An authenticated session that passed the privilege check.
    User(Session),
}

impl Caller {
    /// The identity string used in audit lines.
    #[must_use]
    pub fn username(&self) -> &str {
        match self {
            Self::Anonymous => "anonymous",
            Self::User(session) => &session.username,
        }
    }

    /// The session, for authenticated callers.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Anonymous => None,
            Self::User(session) => Some(session),
        }
    }
}

/// What the gate hands a handler.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    /// The unit request being served.
    pub unit: UnitRequest,
    /// The authorized caller.
    pub caller: Caller,
}

/// A handler's successful result.
#[derive(Debug, Clone)]
pub struct HandlerOutput {
    /// Payload returned to the client.
    pub data: Value,
    /// Outcome token override; `None` means plain success.
    pub reason: Option<String>,
}

impl HandlerOutput {
    /// A success carrying `data`.
    #[must_use]
    pub fn data(data: Value) -> Self {
        Self { data, reason: None }
    }

    /// A success with an explicit outcome token.
    pub fn with_reason(data: Value, reason: impl Into<String>) -> Self {
        Self {
            data,
            reason: Some(reason.into()),
        }
    }
}

impl From<HandlerOutput> for UnitResponse {
    fn from(output: HandlerOutput) -> Self {
        Self {
            reason: output.reason.unwrap_or_else(|| TOKEN_SUCCESS.to_string()),
            data: output.data,
        }
    }
}

/// Failures a handler can report.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The request was understood but refused. The reason string is the
    /// client-facing outcome token.
    #[error("{reason}")]
    Refused {
        /// Client-facing reason.
        reason: String,
    },

    /// The handler failed internally. Detail stays server-side.
    #[error("{detail}")]
    Fault {
        /// Server-side detail.
        detail: String,
    },

    /// A dispatch failure to relay with its own token, used by the
    /// workflow and login endpoints.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The storage collaborator failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl HandlerError {
    /// Shorthand for a refusal.
    pub fn refused(reason: impl Into<String>) -> Self {
        Self::Refused {
            reason: reason.into(),
        }
    }

    /// Shorthand for an internal fault.
    pub fn fault(detail: impl Into<String>) -> Self {
        Self::Fault {
            detail: detail.into(),
        }
    }
}

/// One callable unit of a service.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Serves one authorized request.
    async fn handle(
        &self,
        ctx: &SharedContext,
        request: &HandlerRequest,
    ) -> Result<HandlerOutput, HandlerError>;
}
