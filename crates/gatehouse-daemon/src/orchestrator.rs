//! The multi-request orchestrator.
//!
//! A client request whose service and message fields are comma-joined
//! lists fans out into unit requests dispatched concurrently, with no
//! ordering guarantee. Their responses land in a [`GroupTable`] slot
//! each; the group completes the instant every slot is filled, and the
//! aggregated response maps `"{service}_{message}"` to each unit's
//! outcome. Completion removes the group and returns the slots in one
//! step under the table's write lock, so delivery happens at most once
//! and a late or duplicate completion is a no-op.
//!
//! A group does not wait forever: after the configured timeout the
//! remaining slots are filled with a timeout failure and the group is
//! delivered as-is.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use gatehouse_core::{
    ClientRequest, DispatchError, DispatchResult, GroupId, UnitResponse,
};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::warn;

use crate::gate;
use crate::state::SharedContext;

/// Reason token filled into slots abandoned by the group timeout.
pub const TOKEN_GROUP_TIMEOUT: &str = "grouptimeout";

type Slots = Vec<(String, Option<UnitResponse>)>;

/// Aggregation slots for in-flight composite requests.
#[derive(Debug, Default)]
pub struct GroupTable {
    groups: RwLock<HashMap<String, Slots>>,
}

impl GroupTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a group with one empty slot per response key.
    pub fn open(&self, group: &GroupId, keys: Vec<String>) {
        self.groups.write().expect("lock poisoned").insert(
            group.as_str().to_string(),
            keys.into_iter().map(|k| (k, None)).collect(),
        );
    }

    /// Fills one slot. Returns the completed slots exactly once, when
    /// this call fills the last empty one; removal and return are a
    /// single step under the write lock. Unknown groups and already
    /// filled slots are no-ops.
    pub fn complete(
        &self,
        group: &GroupId,
        index: usize,
        response: UnitResponse,
    ) -> Option<Vec<(String, UnitResponse)>> {
        let mut groups = self.groups.write().expect("lock poisoned");
        let slots = groups.get_mut(group.as_str())?;
        match slots.get_mut(index) {
            Some((_, slot @ None)) => *slot = Some(response),
            _ => return None,
        }
        if slots.iter().all(|(_, slot)| slot.is_some()) {
            let slots = groups.remove(group.as_str())?;
            return Some(
                slots
                    .into_iter()
                    .filter_map(|(key, slot)| slot.map(|resp| (key, resp)))
                    .collect(),
            );
        }
        None
    }

    /// Gives up on a group's stragglers: empty slots are filled with a
    /// timeout failure and the group is removed and returned. A group
    /// that already completed returns `None`.
    pub fn abandon(&self, group: &GroupId) -> Option<Vec<(String, UnitResponse)>> {
        let slots = self
            .groups
            .write()
            .expect("lock poisoned")
            .remove(group.as_str())?;
        Some(
            slots
                .into_iter()
                .map(|(key, slot)| {
                    let resp = slot.unwrap_or_else(|| UnitResponse::fail(TOKEN_GROUP_TIMEOUT));
                    (key, resp)
                })
                .collect(),
        )
    }

    /// Number of in-flight groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.read().expect("lock poisoned").len()
    }

    /// Returns `true` when nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn aggregate(slots: Vec<(String, UnitResponse)>) -> Value {
    let mut object = serde_json::Map::new();
    for (key, response) in slots {
        object.insert(
            key,
            serde_json::to_value(response).unwrap_or(Value::Null),
        );
    }
    Value::Object(object)
}

/// Dispatches a client request and returns the aggregated response.
///
/// A single-target request goes straight through the gate without
/// touching the group table; the response is still keyed the same way.
///
/// # Errors
///
/// Returns [`DispatchError::MalformedRequest`] when the comma-joined
/// lists do not line up. Per-unit failures never surface here; they are
/// folded into the unit's own response slot.
pub async fn dispatch(ctx: &SharedContext, request: &ClientRequest) -> DispatchResult<Value> {
    let mut units = request.split()?;

    if units.len() == 1 {
        let unit = units.remove(0);
        let key = unit.response_key();
        let response = gate::invoke(ctx, unit).await;
        return Ok(aggregate(vec![(key, response)]));
    }

    let group = units[0].group.clone();
    let keys: Vec<String> = units.iter().map(|u| u.response_key()).collect();
    ctx.groups.open(&group, keys);

    let (tx, mut rx) = oneshot::channel();
    let tx = Arc::new(Mutex::new(Some(tx)));
    for (index, unit) in units.into_iter().enumerate() {
        let ctx = ctx.clone();
        let group = group.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = gate::invoke(&ctx, unit).await;
            if let Some(slots) = ctx.groups.complete(&group, index, response) {
                if let Some(tx) = tx.lock().expect("lock poisoned").take() {
                    let _ = tx.send(slots);
                }
            }
        });
    }

    let wait = Duration::from_millis(ctx.config.group_timeout_ms);
    tokio::select! {
        slots = &mut rx => match slots {
            Ok(slots) => Ok(aggregate(slots)),
            Err(_) => Err(DispatchError::fault(
                &request.service,
                &request.message,
                "aggregation channel closed",
            )),
        },
        () = tokio::time::sleep(wait) => {
            warn!(group = %group, timeout_ms = ctx.config.group_timeout_ms, "group timed out");
            if let Some(slots) = ctx.groups.abandon(&group) {
                Ok(aggregate(slots))
            } else {
                // The group completed in the same instant; the send is
                // already on its way.
                rx.await.map(aggregate).map_err(|_| {
                    DispatchError::fault(
                        &request.service,
                        &request.message,
                        "aggregation channel closed",
                    )
                })
            }
        }
    }
}
