//! Delivery of aggregated responses.
//!
//! The orchestrator produces one payload per root request; a transport
//! carries it back to the client exactly once. The binary writes JSON
//! lines to stdout; tests use the channel-backed implementation.

use async_trait::async_trait;
use gatehouse_core::DispatchError;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// Failures while handing a response back to the client.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The delivery channel or stream is gone.
    #[error("delivery failed: {detail}")]
    Delivery {
        /// What went wrong.
        detail: String,
    },
}

impl TransportError {
    fn delivery(detail: impl Into<String>) -> Self {
        Self::Delivery {
            detail: detail.into(),
        }
    }
}

/// Carries responses back to the client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers the aggregated response for one root request.
    async fn deliver(&self, root_id: &str, payload: Value) -> Result<(), TransportError>;

    /// Delivers a whole-request failure.
    async fn deliver_error(
        &self,
        root_id: &str,
        failure: &DispatchError,
    ) -> Result<(), TransportError>;
}

/// One delivery captured by [`ChannelTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A successful aggregated response.
    Response {
        /// Root request id.
        root_id: String,
        /// Aggregated payload.
        payload: Value,
    },
    /// A whole-request failure.
    Failure {
        /// Root request id.
        root_id: String,
        /// The failure's machine token.
        token: String,
    },
}

/// Transport that pushes deliveries onto a channel, for tests.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelTransport {
    /// Creates the transport and the receiving end.
    #[must_use]
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn deliver(&self, root_id: &str, payload: Value) -> Result<(), TransportError> {
        self.tx
            .send(Delivery::Response {
                root_id: root_id.to_string(),
                payload,
            })
            .map_err(|err| TransportError::delivery(err.to_string()))
    }

    async fn deliver_error(
        &self,
        root_id: &str,
        failure: &DispatchError,
    ) -> Result<(), TransportError> {
        self.tx
            .send(Delivery::Failure {
                root_id: root_id.to_string(),
                token: failure.client_token().to_string(),
            })
            .map_err(|err| TransportError::delivery(err.to_string()))
    }
}

/// Transport that writes one JSON line per delivery to stdout.
pub struct StdoutTransport {
    debug: bool,
}

impl StdoutTransport {
    /// Creates the transport. With `debug` set, failure detail is
    /// included in error lines.
    #[must_use]
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    async fn write_line(&self, line: Value) -> Result<(), TransportError> {
        let mut encoded =
            serde_json::to_vec(&line).map_err(|err| TransportError::delivery(err.to_string()))?;
        encoded.push(b'\n');
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(&encoded)
            .await
            .map_err(|err| TransportError::delivery(err.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|err| TransportError::delivery(err.to_string()))
    }
}

#[async_trait]
impl Transport for StdoutTransport {
    async fn deliver(&self, root_id: &str, payload: Value) -> Result<(), TransportError> {
        self.write_line(json!({ "id": root_id, "ok": true, "response": payload }))
            .await
    }

    async fn deliver_error(
        &self,
        root_id: &str,
        failure: &DispatchError,
    ) -> Result<(), TransportError> {
        self.write_line(json!({
            "id": root_id,
            "ok": false,
            "reason": failure.client_token(),
            "detail": failure.client_reason(self.debug),
        }))
        .await
    }
}
