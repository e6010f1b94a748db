//! Baton-addressed sessions.
//!
//! The manager map and the per-session state are guarded separately: the map
//! lock is only held for lookup/insert/remove, while each session's state sits
//! behind its own async mutex, which is the serialization point for all
//! pipeline calls carrying that baton.

use portico_adapter::{Adapter, AdapterTransaction};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Mutable state owned by one session.
pub struct SessionState {
    /// Adapter the session is pinned to
    pub adapter: Arc<dyn Adapter>,
    /// Open transaction, if any
    pub tx: Option<Box<dyn AdapterTransaction>>,
    /// SQL stored via `store_sql`, keyed by id
    pub stored_sql: HashMap<String, String>,
    /// Last time a pipeline call touched this session
    pub last_activity: Instant,
}

impl SessionState {
    /// Fresh state pinned to an adapter.
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self {
            adapter,
            tx: None,
            stored_sql: HashMap::new(),
            last_activity: Instant::now(),
        }
    }

    /// Whether the session must survive this pipeline call.
    pub fn needs_retention(&self) -> bool {
        self.tx.is_some() || !self.stored_sql.is_empty()
    }
}

/// One live session.
pub struct Session {
    baton: String,
    state: Mutex<SessionState>,
}

impl Session {
    /// The session's baton.
    pub fn baton(&self) -> &str {
        &self.baton
    }

    /// The per-baton serialization point.
    pub fn state(&self) -> &Mutex<SessionState> {
        &self.state
    }
}

/// Registry of live sessions, keyed by baton.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register state under a fresh baton.
    pub fn create(&self, state: SessionState) -> Arc<Session> {
        let session = Arc::new(Session {
            baton: Uuid::new_v4().to_string(),
            state: Mutex::new(state),
        });
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.baton.clone(), Arc::clone(&session));
        session
    }

    /// Look up a session by baton.
    pub fn get(&self, baton: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(baton)
            .cloned()
    }

    /// Remove a session; the caller is responsible for its open transaction.
    pub fn remove(&self, baton: &str) -> Option<Arc<Session>> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(baton)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sessions idle for longer than `timeout`, rolling back any open
    /// transaction best effort.
    pub async fn sweep_idle(&self, timeout: Duration) {
        let candidates: Vec<Arc<Session>> = {
            self.sessions
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .values()
                .cloned()
                .collect()
        };

        for session in candidates {
            // A session busy in a pipeline call is live by definition.
            let Ok(mut state) = session.state.try_lock() else {
                continue;
            };
            if state.last_activity.elapsed() < timeout {
                continue;
            }

            self.remove(&session.baton);
            debug!(baton = %session.baton, "reaped idle session");
            if let Some(tx) = state.tx.take() {
                if let Err(e) = tx.rollback().await {
                    warn!(baton = %session.baton, error = %e,
                          "rollback of idle session transaction failed");
                }
            }
        }
    }
}
