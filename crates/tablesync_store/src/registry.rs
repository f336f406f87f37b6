//! Named, reference-counted access to shared stores.
//!
//! Multiple components acquire handles under a session name; the backing
//! store is shared while any handle for that name is alive. Releasing a
//! session marks it for destruction, which happens once the last handle
//! drops. Handles that exist at release time stay usable: they keep the
//! store alive and read a consistent (possibly stale) view.

use crate::error::{StoreError, StoreResult};
use crate::store::TableStore;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const OPEN_ATTEMPTS: u32 = 3;
const OPEN_RETRY_BASE: Duration = Duration::from_millis(20);

struct Session {
    store: Arc<TableStore>,
    refs: usize,
    released: bool,
}

#[derive(Default)]
struct RegistryInner {
    sessions: Mutex<HashMap<String, Session>>,
    /// Held during maintenance; acquisition fails while this is taken.
    gate: Mutex<()>,
}

/// Registry of named store sessions.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    inner: Arc<RegistryInner>,
}

impl StoreRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a handle under `session_name`, creating the session (and
    /// its store) on first acquisition.
    ///
    /// Acquisition is retried with short backoff while maintenance holds
    /// the registry; after three failed attempts the caller gets
    /// [`StoreError::Busy`] rather than blocking indefinitely.
    pub fn acquire(&self, session_name: &str) -> StoreResult<StoreHandle> {
        for attempt in 1..=OPEN_ATTEMPTS {
            if let Some(_open) = self.inner.gate.try_lock() {
                let mut sessions = self.inner.sessions.lock();
                let session = sessions.entry(session_name.to_string()).or_insert_with(|| {
                    debug!(session_name, "creating store session");
                    Session {
                        store: Arc::new(TableStore::new()),
                        refs: 0,
                        released: false,
                    }
                });
                // Re-acquiring revives a session that was pending destruction.
                session.released = false;
                session.refs += 1;
                return Ok(StoreHandle {
                    registry: Arc::clone(&self.inner),
                    session_name: session_name.to_string(),
                    store: Arc::clone(&session.store),
                });
            }
            if attempt < OPEN_ATTEMPTS {
                let backoff = OPEN_RETRY_BASE * attempt;
                warn!(session_name, attempt, ?backoff, "store busy, retrying open");
                std::thread::sleep(backoff);
            }
        }
        Err(StoreError::Busy {
            attempts: OPEN_ATTEMPTS,
        })
    }

    /// Marks a session for destruction. The session is removed once the
    /// last outstanding handle drops (immediately if none are alive).
    pub fn release_session(&self, session_name: &str) {
        let mut sessions = self.inner.sessions.lock();
        if let Some(session) = sessions.get_mut(session_name) {
            session.released = true;
            if session.refs == 0 {
                sessions.remove(session_name);
                debug!(session_name, "store session destroyed");
            }
        }
    }

    /// Whether a session currently exists (alive or pending destruction).
    pub fn has_session(&self, session_name: &str) -> bool {
        self.inner.sessions.lock().contains_key(session_name)
    }

    /// Whether a session has been fully destroyed (or never existed).
    pub fn is_closed(&self, session_name: &str) -> bool {
        !self.has_session(session_name)
    }

    /// Names of sessions that are alive and not pending destruction.
    pub fn active_sessions(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .sessions
            .lock()
            .iter()
            .filter(|(_, s)| !s.released)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of live handles for a session.
    pub fn handle_count(&self, session_name: &str) -> usize {
        self.inner
            .sessions
            .lock()
            .get(session_name)
            .map(|s| s.refs)
            .unwrap_or(0)
    }

    /// Pauses acquisition for the lifetime of the returned guard. Used
    /// around registry-wide maintenance; concurrent `acquire` calls see
    /// [`StoreError::Busy`] after their retries are exhausted.
    pub fn maintenance_pause(&self) -> MaintenancePause<'_> {
        MaintenancePause {
            _gate: self.inner.gate.lock(),
        }
    }
}

/// Guard that blocks new acquisitions while held.
pub struct MaintenancePause<'a> {
    _gate: MutexGuard<'a, ()>,
}

/// A reference-counted handle to a named store session.
pub struct StoreHandle {
    registry: Arc<RegistryInner>,
    session_name: String,
    store: Arc<TableStore>,
}

impl StoreHandle {
    /// The session this handle belongs to.
    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// The backing store.
    pub fn store(&self) -> &TableStore {
        &self.store
    }
}

impl std::ops::Deref for StoreHandle {
    type Target = TableStore;

    fn deref(&self) -> &TableStore {
        &self.store
    }
}

impl Clone for StoreHandle {
    fn clone(&self) -> Self {
        let mut sessions = self.registry.sessions.lock();
        if let Some(session) = sessions.get_mut(&self.session_name) {
            session.refs += 1;
        }
        Self {
            registry: Arc::clone(&self.registry),
            session_name: self.session_name.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        let mut sessions = self.registry.sessions.lock();
        if let Some(session) = sessions.get_mut(&self.session_name) {
            session.refs = session.refs.saturating_sub(1);
            if session.refs == 0 && session.released {
                sessions.remove(&self.session_name);
                debug!(session_name = %self.session_name, "store session destroyed");
            }
        }
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("session_name", &self.session_name)
            .finish_non_exhaustive()
    }
}
