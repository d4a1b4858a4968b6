//! The authorization gate.
//!
//! Every unit request passes through [`invoke`]: authorize the caller
//! against the addressed service's privilege, resolve the handler, defer
//! verification-gated requests into the maker-checker queue, then run the
//! handler. The privilege check comes before handler lookup so an
//! unprivileged caller cannot tell which messages a service exposes. Nothing escapes as an unhandled fault; every outcome becomes
//! a [`UnitResponse`] before control returns to the orchestrator. The
//! handler runs in its own task so a panic surfaces as a fault response
//! rather than tearing down the request.

use gatehouse_core::request::TOKEN_PENDING;
use gatehouse_core::{DispatchError, DispatchResult, UnitRequest, UnitResponse, SYSTEM_ACTOR};
use serde_json::json;
use tracing::{info, warn};

use crate::audit;
use crate::handler::{Caller, HandlerError, HandlerRequest};
use crate::state::SharedContext;

/// Dispatches one unit request and folds every outcome into a response.
pub async fn invoke(ctx: &SharedContext, unit: UnitRequest) -> UnitResponse {
    let service = unit.service.clone();
    let message = unit.message.clone();
    match invoke_inner(ctx, unit).await {
        Ok(response) => response,
        Err(err) => {
            warn!(
                service = %service,
                message = %message,
                error = %err,
                "unit request failed"
            );
            UnitResponse::from_error(&err, ctx.config.debug)
        }
    }
}

async fn invoke_inner(ctx: &SharedContext, unit: UnitRequest) -> DispatchResult<UnitResponse> {
    let descriptor = ctx
        .registry
        .descriptor(&unit.service)
        .ok_or_else(|| DispatchError::handler_not_found(&unit.service, &unit.message))?;

    let caller = if descriptor.privileged {
        match ctx.sessions.authorize(unit.session.as_ref(), &descriptor.privilege) {
            Ok(session) => Caller::User(session),
            Err(err) => {
                warn!(
                    service = %unit.service,
                    message = %unit.message,
                    privilege = %descriptor.privilege,
                    "access denied"
                );
                return Err(err);
            }
        }
    } else {
        Caller::Anonymous
    };
    // Only an authorized caller learns whether the message exists.
    let endpoint = ctx.registry.resolve(&unit.service, &unit.message)?;
    info!(
        identity = caller.username(),
        service = %unit.service,
        message = %unit.message,
        "invocation granted"
    );

    if endpoint.verify && !unit.verified {
        if let Caller::User(session) = &caller {
            if !ctx.config.is_self_verifying(&session.username) {
                let action = ctx.actions.propose(&session.username, unit.clone());
                info!(
                    serial = %action.serial,
                    proposer = %session.username,
                    action = %action.description,
                    "action deferred for verification"
                );
                return Ok(UnitResponse {
                    reason: TOKEN_PENDING.to_string(),
                    data: json!({ "serial": action.serial }),
                });
            }
        }
    }

    let request = HandlerRequest {
        unit: unit.clone(),
        caller: caller.clone(),
    };
    let handler = endpoint.handler.clone();
    let handler_ctx = ctx.clone();
    let joined =
        tokio::spawn(async move { handler.handle(&handler_ctx, &request).await }).await;
    match joined {
        Ok(Ok(output)) => {
            if endpoint.verify {
                let (actor_id, actor_name) = match &caller {
                    Caller::User(session) => {
                        (session.user_id.as_str().to_string(), session.username.clone())
                    }
                    Caller::Anonymous => (SYSTEM_ACTOR.to_string(), SYSTEM_ACTOR.to_string()),
                };
                audit::record_action(
                    ctx.storage.as_ref(),
                    &actor_id,
                    &actor_name,
                    &unit.message,
                    &format!("{}/{}", unit.service, unit.message),
                )
                .await?;
            }
            Ok(output.into())
        }
        Ok(Err(HandlerError::Refused { reason })) => Ok(UnitResponse::fail(reason)),
        Ok(Err(HandlerError::Dispatch(err))) => Err(err),
        Ok(Err(HandlerError::Storage(err))) => Err(DispatchError::Storage(err)),
        Ok(Err(HandlerError::Fault { detail })) => {
            Err(DispatchError::fault(&unit.service, &unit.message, detail))
        }
        Err(join_err) => Err(DispatchError::fault(
            &unit.service,
            &unit.message,
            format!("handler panicked: {join_err}"),
        )),
    }
}
