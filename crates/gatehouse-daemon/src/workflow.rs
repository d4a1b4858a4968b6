//! Maker-checker workflow.
//!
//! A deferred request is parked here as a [`PendingAction`] and handed a
//! serial. A second user verifies it by serial, which releases the stored
//! unit request for replay under the verifier's own session; the proposer
//! can withdraw it before that happens. Verifying one's own proposal is
//! always rejected.
//!
//! The table is keyed by serial with a secondary proposer index, so one
//! proposer may hold several outstanding actions at once; name lookups
//! return the newest.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use gatehouse_core::{DispatchError, DispatchResult, UnitRequest};
use uuid::Uuid;

use crate::session::Session;

/// One deferred request awaiting verification.
#[derive(Debug, Clone)]
pub struct PendingAction {
    /// Serial handed to the proposer, the verification key.
    pub serial: String,
    /// Username that proposed the action.
    pub proposer: String,
    /// The deferred unit request, replayed verbatim on verification.
    pub unit: UnitRequest,
    /// When the action was proposed.
    pub proposed_at: DateTime<Utc>,
    /// Human-readable summary, `"{service}/{message}"`.
    pub description: String,
}

/// Serial-keyed table of pending actions.
#[derive(Debug, Default)]
pub struct ActionQueue {
    by_serial: RwLock<HashMap<String, PendingAction>>,
    by_proposer: RwLock<HashMap<String, Vec<String>>>,
}

impl ActionQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a unit request and returns the pending entry.
    pub fn propose(&self, proposer: &str, unit: UnitRequest) -> PendingAction {
        let action = PendingAction {
            serial: Uuid::new_v4().simple().to_string(),
            proposer: proposer.to_string(),
            description: format!("{}/{}", unit.service, unit.message),
            unit,
            proposed_at: Utc::now(),
        };
        self.by_serial
            .write()
            .expect("lock poisoned")
            .insert(action.serial.clone(), action.clone());
        self.by_proposer
            .write()
            .expect("lock poisoned")
            .entry(proposer.to_string())
            .or_default()
            .push(action.serial.clone());
        action
    }

    /// Looks up a pending action by serial.
    #[must_use]
    pub fn get(&self, serial: &str) -> Option<PendingAction> {
        self.by_serial
            .read()
            .expect("lock poisoned")
            .get(serial)
            .cloned()
    }

    /// The newest outstanding action for a proposer.
    #[must_use]
    pub fn last_for(&self, proposer: &str) -> Option<PendingAction> {
        let serials = self.by_proposer.read().expect("lock poisoned");
        let by_serial = self.by_serial.read().expect("lock poisoned");
        serials
            .get(proposer)?
            .iter()
            .rev()
            .find_map(|serial| by_serial.get(serial).cloned())
    }

    /// Every outstanding action, unordered.
    #[must_use]
    pub fn all(&self) -> Vec<PendingAction> {
        self.by_serial
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Number of outstanding actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_serial.read().expect("lock poisoned").len()
    }

    /// Returns `true` when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases an action for replay under the verifier's session.
    ///
    /// The returned unit carries the verifier's session token and the
    /// verified flag, so the gate authorizes it against the verifier's
    /// snapshot and does not defer it again.
    ///
    /// # Errors
    ///
    /// [`DispatchError::UnknownSerial`] when no entry matches and
    /// [`DispatchError::SelfVerification`] when the verifier proposed the
    /// action; the entry stays queued in the latter case.
    pub fn take_verified(
        &self,
        serial: &str,
        verifier: &Session,
    ) -> DispatchResult<UnitRequest> {
        let mut by_serial = self.by_serial.write().expect("lock poisoned");
        let action = by_serial.get(serial).ok_or(DispatchError::UnknownSerial)?;
        if action.proposer == verifier.username {
            return Err(DispatchError::SelfVerification);
        }
        let action = by_serial.remove(serial).ok_or(DispatchError::UnknownSerial)?;
        drop(by_serial);
        self.unindex(&action);
        let mut unit = action.unit;
        unit.session = Some(verifier.id.clone());
        unit.verified = true;
        Ok(unit)
    }

    /// Withdraws a pending action. Only the proposer may do this.
    ///
    /// # Errors
    ///
    /// [`DispatchError::UnknownSerial`] when no entry matches and
    /// [`DispatchError::ForeignDeletion`] when `requester` is not the
    /// proposer.
    pub fn delete(&self, serial: &str, requester: &str) -> DispatchResult<PendingAction> {
        let mut by_serial = self.by_serial.write().expect("lock poisoned");
        let action = by_serial.get(serial).ok_or(DispatchError::UnknownSerial)?;
        if action.proposer != requester {
            return Err(DispatchError::ForeignDeletion);
        }
        let action = by_serial.remove(serial).ok_or(DispatchError::UnknownSerial)?;
        drop(by_serial);
        self.unindex(&action);
        Ok(action)
    }

    fn unindex(&self, action: &PendingAction) {
        let mut by_proposer = self.by_proposer.write().expect("lock poisoned");
        if let Some(serials) = by_proposer.get_mut(&action.proposer) {
            serials.retain(|s| s != &action.serial);
            if serials.is_empty() {
                by_proposer.remove(&action.proposer);
            }
        }
    }
}
