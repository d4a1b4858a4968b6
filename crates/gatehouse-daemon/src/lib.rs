//! The gatehouse dispatch daemon.
//!
//! Wires the core types into a running engine: the shared engine context,
//! the session manager and login state machine, the authorization gate,
//! the multi-request orchestrator, the maker-checker workflow, the audit
//! trail, the transport seam, and the built-in user and access services.

pub mod audit;
pub mod gate;
pub mod handler;
pub mod handlers;
pub mod orchestrator;
pub mod session;
pub mod state;
pub mod transport;
pub mod workflow;

pub use handler::{Caller, Handler, HandlerError, HandlerOutput, HandlerRequest};
pub use handlers::Endpoint;
pub use session::{LoginMethod, Session, SessionManager};
pub use state::{bootstrap, EngineContext, SharedContext};
pub use transport::{ChannelTransport, Delivery, StdoutTransport, Transport, TransportError};
pub use workflow::{ActionQueue, PendingAction};
