#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gatehouse_core::credentials::{password_digest, NewUser};
use gatehouse_core::{
    ClientRequest, EngineConfig, MemoryStorage, Privilege, ResultSet, ServiceDescriptor, Storage,
    StorageError,
};
use gatehouse_daemon::handlers::Endpoint;
use gatehouse_daemon::session::{LoginMethod, Session};
use gatehouse_daemon::{
    bootstrap, orchestrator, EngineContext, Handler, HandlerError, HandlerOutput, HandlerRequest,
    SharedContext,
};
use serde_json::{json, Value};

pub fn test_config() -> EngineConfig {
    EngineConfig {
        max_login_attempts: 3,
        group_timeout_ms: 500,
        ..EngineConfig::default()
    }
}

/// A bootstrapped engine with a usable root password.
pub async fn engine() -> SharedContext {
    engine_with(test_config()).await
}

pub async fn engine_with(config: EngineConfig) -> SharedContext {
    engine_with_storage(config).await.0
}

/// Like [`engine_with`], keeping a handle on the recording storage.
pub async fn engine_with_storage(
    config: EngineConfig,
) -> (SharedContext, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let ctx = EngineContext::shared(config, storage.clone());
    bootstrap(&ctx).await.expect("bootstrap");
    ctx.credentials
        .set_password("root", password_digest("root secret"))
        .expect("root password");
    (ctx, storage)
}

pub fn add_user(ctx: &SharedContext, username: &str, password: &str, privileges: &[&str]) {
    ctx.credentials
        .create(NewUser {
            username: username.to_string(),
            password_digest: password_digest(password),
            host: "localhost".to_string(),
            group: None,
            privileges: privileges.iter().map(|p| Privilege::new(*p)).collect(),
        })
        .expect("create user");
}

pub async fn login(ctx: &SharedContext, username: &str, password: &str) -> Session {
    ctx.sessions
        .login(
            &ctx.credentials,
            &ctx.config,
            ctx.storage.as_ref(),
            LoginMethod::Password {
                username: username.to_string(),
                secret: password.to_string(),
            },
            "test",
        )
        .await
        .expect("login")
}

/// Dispatches one single-target request and returns its keyed response.
pub async fn call(
    ctx: &SharedContext,
    session: Option<&Session>,
    service: &str,
    message: &str,
    body: Value,
) -> Value {
    let mut request = ClientRequest::new(service, message).with_body(body);
    if let Some(session) = session {
        request = request.with_session(session.id.clone());
    }
    let response = orchestrator::dispatch(ctx, &request)
        .await
        .expect("dispatch");
    response
        .get(format!("{service}_{message}"))
        .cloned()
        .expect("keyed response")
}

pub fn reason(response: &Value) -> &str {
    response
        .get("reason")
        .and_then(Value::as_str)
        .expect("reason field")
}

/// Storage double whose backend is permanently down: reads report the
/// backend unreachable, writes report the statement rejected.
pub struct FailingStorage;

#[async_trait]
impl Storage for FailingStorage {
    async fn query(&self, _statement: &str, _params: &[&str]) -> Result<ResultSet, StorageError> {
        Err(StorageError::Unavailable {
            detail: "backend offline".to_string(),
        })
    }

    async fn execute(&self, _statement: &str, _params: &[&str]) -> Result<(), StorageError> {
        Err(StorageError::Statement {
            detail: "insert rejected".to_string(),
        })
    }
}

/// What a [`Probe`] does when invoked.
pub enum ProbeMode {
    Success,
    Fault,
    Sleep(Duration),
}

/// Test handler that counts invocations.
pub struct Probe {
    pub hits: AtomicUsize,
    mode: ProbeMode,
}

impl Probe {
    pub fn new(mode: ProbeMode) -> Arc<Self> {
        Arc::new(Self {
            hits: AtomicUsize::new(0),
            mode,
        })
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for Probe {
    async fn handle(
        &self,
        _ctx: &SharedContext,
        request: &HandlerRequest,
    ) -> Result<HandlerOutput, HandlerError> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            ProbeMode::Success => Ok(HandlerOutput::data(json!({
                "probe": request.unit.message,
                "caller": request.caller.username(),
            }))),
            ProbeMode::Fault => Err(HandlerError::fault("probe exploded")),
            ProbeMode::Sleep(wait) => {
                tokio::time::sleep(wait).await;
                Ok(HandlerOutput::data(json!({ "probe": request.unit.message })))
            }
        }
    }
}

/// Declares a service and registers a probe under it.
pub fn register_probe(
    ctx: &SharedContext,
    service: &str,
    message: &str,
    privileged: bool,
    mode: ProbeMode,
) -> Arc<Probe> {
    let descriptor = if privileged {
        ServiceDescriptor::privileged(service)
    } else {
        ServiceDescriptor::open(service)
    };
    ctx.registry.declare_service(descriptor);
    let probe = Probe::new(mode);
    ctx.registry
        .register(service, message, Endpoint::direct(probe.clone()));
    probe
}
