//! Process-wide table of sessions currently being driven.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::UploadError;

/// Tracks which session ids are in flight.
///
/// At most one task drives a given session; a second `acquire` for the same
/// id fails fast with [`UploadError::SessionBusy`]. Once [`cancel_all`] has
/// run, every lease handed out afterwards starts cancelled.
///
/// [`cancel_all`]: SessionRegistry::cancel_all
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claims `session_id` for the caller.
    pub fn acquire(self: &Arc<Self>, session_id: &str) -> Result<SessionLease, UploadError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.contains_key(session_id) {
            return Err(UploadError::SessionBusy(session_id.to_string()));
        }
        let token = self.shutdown.child_token();
        active.insert(session_id.to_string(), token.clone());
        debug!(session = %session_id, "session acquired");

        Ok(SessionLease {
            registry: Arc::clone(self),
            session_id: session_id.to_string(),
            token,
        })
    }

    /// Fires the cancellation token of an active session.
    ///
    /// Returns `false` if nothing is driving `session_id`.
    pub fn cancel(&self, session_id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Fires every active token and latches shutdown for sessions that have
    /// not been acquired yet. Returns how many active sessions were signalled.
    pub fn cancel_all(&self) -> usize {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        self.shutdown.cancel();
        for token in active.values() {
            token.cancel();
        }
        active.len()
    }

    /// Whether [`cancel_all`](Self::cancel_all) has been called.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Parent of every lease token; fires on [`cancel_all`](Self::cancel_all).
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session_id)
    }

    /// Ids of sessions currently being driven, sorted.
    pub fn active_ids(&self) -> Vec<String> {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = active.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn release(&self, session_id: &str) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.remove(session_id);
        debug!(session = %session_id, "session released");
    }
}

/// Exclusive claim on a session id; released on drop.
#[derive(Debug)]
pub struct SessionLease {
    registry: Arc<SessionRegistry>,
    session_id: String,
    token: CancellationToken,
}

impl SessionLease {
    /// Token fired by [`SessionRegistry::cancel`].
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.registry.release(&self.session_id);
    }
}
