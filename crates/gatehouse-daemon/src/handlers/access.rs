//! The open access service.
//!
//! Login, logout, and password changes run without a privilege check so
//! a client can reach them before it holds a session. Every rejection
//! surfaces as its machine token; a successful login answers with
//! `loginsuccess` and the session the client should present from then on.

use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_core::credentials::password_digest;
use gatehouse_core::{digest_matches, ServiceDescriptor, SessionId};
use serde_json::{json, Value};

use super::{body_str, body_str_opt, Endpoint};
use crate::handler::{Handler, HandlerError, HandlerOutput, HandlerRequest};
use crate::session::LoginMethod;
use crate::state::{EngineContext, SharedContext};

/// Service name.
pub const SERVICE: &str = "access_service";

/// Outcome token for a successful login.
pub const TOKEN_LOGIN_SUCCESS: &str = "loginsuccess";

/// Registers the service and its messages.
pub fn register(ctx: &EngineContext) {
    ctx.registry.declare_service(ServiceDescriptor::open(SERVICE));
    let service: Arc<dyn Handler> = Arc::new(AccessService);
    for message in ["login", "logout", "changepass"] {
        ctx.registry
            .register(SERVICE, message, Endpoint::direct(service.clone()));
    }
}

struct AccessService;

#[async_trait]
impl Handler for AccessService {
    async fn handle(
        &self,
        ctx: &SharedContext,
        request: &HandlerRequest,
    ) -> Result<HandlerOutput, HandlerError> {
        let body = &request.unit.body;
        match request.unit.message.as_str() {
            "login" => login(ctx, body).await,
            "logout" => logout(ctx, request, body).await,
            "changepass" => changepass(ctx, body),
            other => Err(HandlerError::fault(format!("unrouted message: {other}"))),
        }
    }
}

async fn login(ctx: &SharedContext, body: &Value) -> Result<HandlerOutput, HandlerError> {
    let method = match body_str_opt(body, "pin") {
        Some(secret) => LoginMethod::Pin { secret },
        None => LoginMethod::Password {
            username: body_str(body, "username")?,
            secret: body_str(body, "password")?,
        },
    };
    let host = body_str_opt(body, "host").unwrap_or_else(|| "unknown".to_string());
    let session = ctx
        .sessions
        .login(&ctx.credentials, &ctx.config, ctx.storage.as_ref(), method, &host)
        .await?;
    Ok(HandlerOutput::with_reason(
        json!({
            "session": session.id,
            "username": session.username,
            "group": session.group,
            "privileges": session.privileges.tokens(),
        }),
        TOKEN_LOGIN_SUCCESS,
    ))
}

async fn logout(
    ctx: &SharedContext,
    request: &HandlerRequest,
    body: &Value,
) -> Result<HandlerOutput, HandlerError> {
    let session = match body_str_opt(body, "session") {
        Some(token) => SessionId::from_token(token),
        None => request
            .unit
            .session
            .clone()
            .ok_or_else(|| HandlerError::refused("missing field: session"))?,
    };
    ctx.sessions
        .logout(&ctx.credentials, ctx.storage.as_ref(), &session)
        .await?;
    Ok(HandlerOutput::data(json!({ "logged_out": true })))
}

fn changepass(ctx: &EngineContext, body: &Value) -> Result<HandlerOutput, HandlerError> {
    let username = body_str(body, "username")?;
    let old_password = body_str(body, "old_password")?;
    let new_password = body_str(body, "new_password")?;
    let user = ctx
        .credentials
        .get(&username)
        .ok_or_else(|| HandlerError::refused("notexist"))?;
    if user.disabled {
        return Err(HandlerError::refused("disabled"));
    }
    if !digest_matches(&password_digest(&old_password), &user.password_digest) {
        return Err(HandlerError::refused("invalidpass"));
    }
    if new_password == old_password {
        return Err(HandlerError::refused("password unchanged"));
    }
    ctx.credentials
        .set_password(&username, password_digest(&new_password))
        .map_err(|_| HandlerError::refused("notexist"))?;
    Ok(HandlerOutput::data(json!({ "changed": username })))
}
