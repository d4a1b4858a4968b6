//! Shared engine state.
//!
//! One [`EngineContext`] holds every collaborator the dispatch path
//! touches. It is built once at startup, wrapped in an `Arc`, and cloned
//! into each per-request task. The individual tables carry their own
//! interior locking, so the context itself needs none.

use std::sync::Arc;

use gatehouse_core::credentials::NewUser;
use gatehouse_core::{
    CredentialStore, DispatchError, DispatchResult, EngineConfig, Privilege, ServiceRegistry,
    Storage, SYSTEM_ACTOR,
};
use tracing::info;

use crate::audit;
use crate::handlers::{self, Endpoint};
use crate::orchestrator::GroupTable;
use crate::session::SessionManager;
use crate::workflow::ActionQueue;

/// Shared engine state cloned into every request task.
pub type SharedContext = Arc<EngineContext>;

/// Every collaborator of the dispatch path.
pub struct EngineContext {
    /// Policy knobs, read-only after startup.
    pub config: EngineConfig,
    /// User accounts and privilege sets.
    pub credentials: CredentialStore,
    /// Service and handler tables.
    pub registry: ServiceRegistry<Endpoint>,
    /// Live sessions and login attempt counters.
    pub sessions: SessionManager,
    /// Pending maker-checker actions.
    pub actions: ActionQueue,
    /// Aggregation groups for composite requests.
    pub groups: GroupTable,
    /// Persistence collaborator for audit rows and history queries.
    pub storage: Arc<dyn Storage>,
}

impl EngineContext {
    /// Creates a context with empty tables.
    #[must_use]
    pub fn new(config: EngineConfig, storage: Arc<dyn Storage>) -> Self {
        Self {
            config,
            credentials: CredentialStore::new(),
            registry: ServiceRegistry::new(),
            sessions: SessionManager::new(),
            actions: ActionQueue::new(),
            groups: GroupTable::new(),
            storage,
        }
    }

    /// Creates a context already wrapped for sharing.
    #[must_use]
    pub fn shared(config: EngineConfig, storage: Arc<dyn Storage>) -> SharedContext {
        Arc::new(Self::new(config, storage))
    }
}

/// Registers the built-in services and creates the root account.
///
/// Root is created with the default password (its first login therefore
/// forces a password change) and holds the privilege of every declared
/// service. The creation is committed as a system action so it shows up
/// in the action audit trail.
///
/// # Errors
///
/// Returns [`DispatchError`] if the audit row cannot be written or the
/// root account cannot be created.
pub async fn bootstrap(ctx: &SharedContext) -> DispatchResult<()> {
    handlers::register_builtin(ctx);

    let root = ctx.config.root_user.clone();
    if ctx.credentials.get(&root).is_some() {
        return Ok(());
    }
    let privileges: Vec<Privilege> = ctx
        .registry
        .service_names()
        .into_iter()
        .map(Privilege::new)
        .collect();
    ctx.credentials
        .create(NewUser {
            username: root.clone(),
            password_digest: ctx.config.default_password_digest.clone(),
            host: "localhost".to_string(),
            group: Some("system".to_string()),
            privileges,
        })
        .map_err(|err| DispatchError::fault("access_service", "bootstrap", err.to_string()))?;
    audit::record_action(
        ctx.storage.as_ref(),
        SYSTEM_ACTOR,
        SYSTEM_ACTOR,
        "create_user",
        &format!("bootstrap account {root}"),
    )
    .await?;
    info!(user = %root, "root account created");
    Ok(())
}
