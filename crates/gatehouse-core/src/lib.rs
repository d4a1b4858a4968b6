//! Core types for the gatehouse dispatch engine.
//!
//! This crate holds the runtime-free building blocks: privilege tokens and
//! sets, user records and the credential store, the service registry with
//! its shared-alias table, request and response envelopes, the storage
//! seam, and the error taxonomy. The daemon crate wires these into the
//! running engine.

pub mod config;
pub mod credentials;
pub mod error;
pub mod privilege;
pub mod registry;
pub mod request;
pub mod storage;

pub use config::EngineConfig;
pub use credentials::{
    digest_matches, password_digest, CredentialStore, NewUser, UserId, UserRecord, SYSTEM_ACTOR,
};
pub use error::{DispatchError, DispatchResult, RejectReason};
pub use privilege::{Privilege, PrivilegeSet};
pub use registry::{ServiceDescriptor, ServiceRegistry};
pub use request::{ClientRequest, GroupId, SessionId, UnitRequest, UnitResponse};
pub use storage::{MemoryStorage, ResultSet, Storage, StorageError};
