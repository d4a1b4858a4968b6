//! The privileged user administration service.
//!
//! Account CRUD, privilege management, remote logout, audit history, and
//! the maker-checker endpoints. Mutating messages are registered with the
//! verification flag, so a non-exempt caller's request parks in the
//! pending queue until a second user verifies it.
//!
//! Two guard rules run before any mutation: the root account cannot be
//! targeted, and callers cannot target their own account (password
//! changes go through the open access service instead).

use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_core::credentials::{password_digest, CredentialError, NewUser};
use gatehouse_core::{Privilege, ServiceDescriptor};
use serde_json::{json, Value};

use super::{body_list, body_str, body_str_opt, body_u64, user_view, Endpoint};
use crate::audit;
use crate::gate;
use crate::handler::{Handler, HandlerError, HandlerOutput, HandlerRequest};
use crate::state::{EngineContext, SharedContext};

/// Service name.
pub const SERVICE: &str = "user_service";

/// Messages that mutate state and therefore require verification.
const VERIFIED_MESSAGES: &[&str] = &[
    "create_user",
    "delete_user",
    "edit_user",
    "edit_host",
    "edit_group",
    "reset_pass",
    "disable_user",
    "enable_user",
    "grant_privilege",
    "revoke_privilege",
    "logout_user",
    "single_session",
];

/// Read-only and workflow-management messages, executed immediately.
const DIRECT_MESSAGES: &[&str] = &[
    "view_user",
    "all_users",
    "all_user_groups",
    "login_history",
    "logout_history",
    "action_history",
    "verify_action",
    "view_action",
    "delete_action",
    "last_action",
    "all_actions",
];

/// Registers the service and all of its messages.
pub fn register(ctx: &EngineContext) {
    ctx.registry.declare_service(ServiceDescriptor::privileged(SERVICE));
    let service: Arc<dyn Handler> = Arc::new(UserService);
    for message in VERIFIED_MESSAGES {
        ctx.registry
            .register(SERVICE, *message, Endpoint::verified(service.clone()));
    }
    for message in DIRECT_MESSAGES {
        ctx.registry
            .register(SERVICE, *message, Endpoint::direct(service.clone()));
    }
}

struct UserService;

#[async_trait]
impl Handler for UserService {
    async fn handle(
        &self,
        ctx: &SharedContext,
        request: &HandlerRequest,
    ) -> Result<HandlerOutput, HandlerError> {
        let body = &request.unit.body;
        match request.unit.message.as_str() {
            "create_user" => create_user(ctx, body),
            "delete_user" => delete_user(ctx, request, body).await,
            "edit_user" => edit_user(ctx, request, body),
            "edit_host" => edit_field(ctx, request, body, "host"),
            "edit_group" => edit_field(ctx, request, body, "group"),
            "reset_pass" => reset_pass(ctx, request, body),
            "disable_user" => set_disabled(ctx, request, body, true).await,
            "enable_user" => set_disabled(ctx, request, body, false).await,
            "grant_privilege" => change_privileges(ctx, request, body, true),
            "revoke_privilege" => change_privileges(ctx, request, body, false),
            "logout_user" => logout_user(ctx, request, body).await,
            "single_session" => single_session(ctx, body).await,
            "view_user" => view_user(ctx, body),
            "all_users" => Ok(HandlerOutput::data(json!({
                "users": ctx.credentials.all().iter().map(user_view).collect::<Vec<_>>(),
            }))),
            "all_user_groups" => Ok(HandlerOutput::data(json!({
                "groups": ctx.credentials.groups(),
            }))),
            "login_history" => history(ctx, body, audit::LOGIN_TABLE).await,
            "logout_history" => history(ctx, body, audit::LOGOUT_TABLE).await,
            "action_history" => history(ctx, body, audit::ACTION_TABLE).await,
            "verify_action" => verify_action(ctx, request, body).await,
            "view_action" => view_action(ctx, body),
            "delete_action" => delete_action(ctx, request, body),
            "last_action" => last_action(ctx, request, body),
            "all_actions" => Ok(HandlerOutput::data(json!({
                "actions": ctx.actions.all().iter().map(action_view).collect::<Vec<_>>(),
            }))),
            other => Err(HandlerError::fault(format!("unrouted message: {other}"))),
        }
    }
}

fn cred_err(err: CredentialError) -> HandlerError {
    match err {
        CredentialError::NotFound { .. } => HandlerError::refused("notexist"),
        CredentialError::UserExists { .. } => HandlerError::refused("userexists"),
    }
}

/// Mutations may not target the root account or the caller's own one.
fn guard_target(
    ctx: &EngineContext,
    request: &HandlerRequest,
    target: &str,
) -> Result<(), HandlerError> {
    if target == ctx.config.root_user {
        return Err(HandlerError::refused("cannot target the root account"));
    }
    if target == request.caller.username() {
        return Err(HandlerError::refused("cannot target own account"));
    }
    Ok(())
}

fn create_user(ctx: &EngineContext, body: &Value) -> Result<HandlerOutput, HandlerError> {
    let username = body_str(body, "username")?;
    let digest = match body_str_opt(body, "password") {
        Some(password) => password_digest(&password),
        None => ctx.config.default_password_digest.clone(),
    };
    let record = ctx
        .credentials
        .create(NewUser {
            username,
            password_digest: digest,
            host: body_str_opt(body, "host").unwrap_or_else(|| "any".to_string()),
            group: body_str_opt(body, "group"),
            privileges: body_list(body, "privileges")
                .into_iter()
                .map(Privilege::new)
                .collect(),
        })
        .map_err(cred_err)?;
    Ok(HandlerOutput::data(user_view(&record)))
}

async fn delete_user(
    ctx: &SharedContext,
    request: &HandlerRequest,
    body: &Value,
) -> Result<HandlerOutput, HandlerError> {
    let username = body_str(body, "username")?;
    guard_target(ctx, request, &username)?;
    ctx.sessions
        .force_logout(&ctx.credentials, ctx.storage.as_ref(), &username)
        .await?;
    let record = ctx.credentials.delete(&username).map_err(cred_err)?;
    Ok(HandlerOutput::data(json!({ "deleted": record.username })))
}

fn edit_user(
    ctx: &EngineContext,
    request: &HandlerRequest,
    body: &Value,
) -> Result<HandlerOutput, HandlerError> {
    let username = body_str(body, "username")?;
    guard_target(ctx, request, &username)?;
    let privileges: Vec<Privilege> = body_list(body, "privileges")
        .into_iter()
        .map(Privilege::new)
        .collect();
    // Whole-set replacement in one critical section.
    ctx.credentials
        .with_user_mut(&username, |user| {
            user.privileges.clear();
            for privilege in privileges {
                user.privileges.grant(privilege);
            }
            if let Some(real_name) = body_str_opt(body, "real_name") {
                user.real_name = real_name;
            }
        })
        .map_err(cred_err)?;
    Ok(HandlerOutput::data(json!({ "edited": username })))
}

fn edit_field(
    ctx: &EngineContext,
    request: &HandlerRequest,
    body: &Value,
    field: &str,
) -> Result<HandlerOutput, HandlerError> {
    let username = body_str(body, "username")?;
    guard_target(ctx, request, &username)?;
    let value = body_str(body, field)?;
    let stored = value.clone();
    ctx.credentials
        .with_user_mut(&username, |user| match field {
            "host" => user.host = stored,
            _ => user.group = stored,
        })
        .map_err(cred_err)?;
    let mut data = serde_json::Map::new();
    data.insert("edited".to_string(), Value::String(username));
    data.insert(field.to_string(), Value::String(value));
    Ok(HandlerOutput::data(Value::Object(data)))
}

fn reset_pass(
    ctx: &EngineContext,
    request: &HandlerRequest,
    body: &Value,
) -> Result<HandlerOutput, HandlerError> {
    let username = body_str(body, "username")?;
    guard_target(ctx, request, &username)?;
    let digest = match body_str_opt(body, "password") {
        Some(password) => password_digest(&password),
        None => ctx.config.default_password_digest.clone(),
    };
    // The user must pick their own password on the next login.
    ctx.credentials
        .with_user_mut(&username, |user| {
            user.password_digest = digest;
            user.password_set_ms = chrono::Utc::now().timestamp_millis();
            user.change_required = true;
        })
        .map_err(cred_err)?;
    Ok(HandlerOutput::data(json!({ "reset": username })))
}

async fn set_disabled(
    ctx: &SharedContext,
    request: &HandlerRequest,
    body: &Value,
    disabled: bool,
) -> Result<HandlerOutput, HandlerError> {
    let username = body_str(body, "username")?;
    guard_target(ctx, request, &username)?;
    ctx.credentials
        .with_user_mut(&username, |user| user.disabled = disabled)
        .map_err(cred_err)?;
    if disabled {
        ctx.sessions
            .force_logout(&ctx.credentials, ctx.storage.as_ref(), &username)
            .await?;
    } else {
        ctx.sessions.clear_attempts(&username);
    }
    Ok(HandlerOutput::data(json!({ "username": username, "disabled": disabled })))
}

fn change_privileges(
    ctx: &EngineContext,
    request: &HandlerRequest,
    body: &Value,
    grant: bool,
) -> Result<HandlerOutput, HandlerError> {
    let username = body_str(body, "username")?;
    if username == request.caller.username() {
        return Err(HandlerError::refused("cannot change own privileges"));
    }
    if !grant && username == ctx.config.root_user {
        return Err(HandlerError::refused("cannot revoke from the root account"));
    }
    let privileges: Vec<Privilege> = body_list(body, "privileges")
        .into_iter()
        .map(Privilege::new)
        .collect();
    if privileges.is_empty() {
        return Err(HandlerError::refused("missing field: privileges"));
    }
    if grant {
        ctx.credentials.grant(&username, &privileges).map_err(cred_err)?;
    } else {
        ctx.credentials.revoke(&username, &privileges).map_err(cred_err)?;
    }
    Ok(HandlerOutput::data(json!({
        "username": username,
        "granted": grant,
        "privileges": privileges.iter().map(Privilege::as_str).collect::<Vec<_>>(),
    })))
}

async fn logout_user(
    ctx: &SharedContext,
    request: &HandlerRequest,
    body: &Value,
) -> Result<HandlerOutput, HandlerError> {
    let username = body_str(body, "username")?;
    if username == request.caller.username() {
        return Err(HandlerError::refused("use the access service to log out"));
    }
    let ended = ctx
        .sessions
        .force_logout(&ctx.credentials, ctx.storage.as_ref(), &username)
        .await?;
    Ok(HandlerOutput::data(json!({ "username": username, "ended": ended })))
}

/// Collapses a user down to their most recent session.
async fn single_session(
    ctx: &SharedContext,
    body: &Value,
) -> Result<HandlerOutput, HandlerError> {
    let username = body_str(body, "username")?;
    let sessions = ctx.sessions.sessions_for(&username);
    let mut ended = 0;
    for session in sessions.iter().skip(1) {
        ctx.sessions
            .logout(&ctx.credentials, ctx.storage.as_ref(), &session.id)
            .await?;
        ended += 1;
    }
    Ok(HandlerOutput::data(json!({ "username": username, "ended": ended })))
}

fn view_user(ctx: &EngineContext, body: &Value) -> Result<HandlerOutput, HandlerError> {
    let username = body_str(body, "username")?;
    let record = ctx.credentials.require(&username).map_err(cred_err)?;
    Ok(HandlerOutput::data(user_view(&record)))
}

async fn history(
    ctx: &EngineContext,
    body: &Value,
    table: &str,
) -> Result<HandlerOutput, HandlerError> {
    let limit = body_u64(body, "limit");
    let rows = audit::history(ctx.storage.as_ref(), table, limit).await?;
    Ok(HandlerOutput::data(json!({ "rows": rows.rows })))
}

fn action_view(action: &crate::workflow::PendingAction) -> Value {
    json!({
        "serial": action.serial,
        "proposer": action.proposer,
        "description": action.description,
        "proposed_at": action.proposed_at.to_rfc3339(),
    })
}

async fn verify_action(
    ctx: &SharedContext,
    request: &HandlerRequest,
    body: &Value,
) -> Result<HandlerOutput, HandlerError> {
    let serial = body_str(body, "serial")?;
    let verifier = request
        .caller
        .session()
        .ok_or_else(|| HandlerError::refused("session required"))?;
    let replay = ctx.actions.take_verified(&serial, verifier)?;
    let key = replay.response_key();
    let response = gate::invoke(ctx, replay).await;
    Ok(HandlerOutput::data(json!({
        "serial": serial,
        "replayed": key,
        "response": response,
    })))
}

fn view_action(ctx: &EngineContext, body: &Value) -> Result<HandlerOutput, HandlerError> {
    let serial = body_str(body, "serial")?;
    let action = ctx
        .actions
        .get(&serial)
        .ok_or(HandlerError::Dispatch(gatehouse_core::DispatchError::UnknownSerial))?;
    Ok(HandlerOutput::data(action_view(&action)))
}

fn delete_action(
    ctx: &EngineContext,
    request: &HandlerRequest,
    body: &Value,
) -> Result<HandlerOutput, HandlerError> {
    let serial = body_str(body, "serial")?;
    let action = ctx.actions.delete(&serial, request.caller.username())?;
    Ok(HandlerOutput::data(json!({ "deleted": action.serial })))
}

fn last_action(
    ctx: &EngineContext,
    request: &HandlerRequest,
    body: &Value,
) -> Result<HandlerOutput, HandlerError> {
    let proposer =
        body_str_opt(body, "username").unwrap_or_else(|| request.caller.username().to_string());
    let action = ctx
        .actions
        .last_for(&proposer)
        .ok_or(HandlerError::Dispatch(gatehouse_core::DispatchError::UnknownSerial))?;
    Ok(HandlerOutput::data(action_view(&action)))
}
