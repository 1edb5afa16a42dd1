use crate::session::scratch::ScratchSpace;
use crate::session::state::SessionState;
use crate::session::types::{
    SessionConfig, SessionError, SessionId, SessionStatus, generate_session_id, now_millis,
};
use metrics::counter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// How a request's session identifier was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The identifier named a live session
    Existing,
    /// No identifier was supplied
    Created,
    /// The identifier was unknown or expired; a fresh session replaces it
    Replaced { stale_id: SessionId },
}

/// A session together with how it was obtained
pub struct Resolved {
    pub session: Arc<SessionState>,
    pub outcome: Resolution,
}

/// Session manager: registry of live sessions plus background reclamation.
///
/// The registry lock only guards insert, lookup, removal and enumeration.
/// Releasing a session's memory and scratch files always happens after the
/// lock is dropped.
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<SessionState>>>>,
    config: SessionConfig,
    scratch: Arc<dyn ScratchSpace>,
    shutdown_tx: watch::Sender<bool>,
    reclaimer: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Build a manager without a reclamation task
    pub fn new(config: SessionConfig, scratch: Arc<dyn ScratchSpace>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
            scratch,
            shutdown_tx,
            reclaimer: Mutex::new(None),
        }
    }

    /// Build a manager and spawn its reclamation task
    pub fn start(config: SessionConfig, scratch: Arc<dyn ScratchSpace>) -> Arc<Self> {
        let manager = Arc::new(Self::new(config, scratch));
        let handle = tokio::spawn(reclaim_loop(
            Arc::downgrade(&manager),
            manager.config.reclaim_interval,
            manager.shutdown_tx.subscribe(),
        ));
        if let Ok(mut slot) = manager.reclaimer.lock() {
            *slot = Some(handle);
        }
        info!(
            "Session manager started (timeout {:?}, reclaim every {:?})",
            manager.config.timeout, manager.config.reclaim_interval
        );
        manager
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a new session
    pub async fn create(&self) -> Arc<SessionState> {
        let session = {
            let mut sessions = self.sessions.write().await;
            let mut id = generate_session_id();
            while sessions.contains_key(&id) {
                id = generate_session_id();
            }
            let session = Arc::new(SessionState::new(id.clone(), Arc::clone(&self.scratch)));
            sessions.insert(id, Arc::clone(&session));
            session
        };

        counter!("voxmark_sessions_created_total").increment(1);
        info!("Created session {}", session.id());
        session
    }

    /// Look up a live session. Expired entries are evicted on sight.
    pub async fn get(&self, session_id: &str) -> Result<Arc<SessionState>, SessionError> {
        let session = {
            let sessions = self.sessions.read().await;
            sessions.get(session_id).cloned()
        }
        .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

        if session.is_expired(now_millis(), self.config.timeout) {
            self.evict_expired(&[session_id.to_string()], now_millis())
                .await;
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        }
        Ok(session)
    }

    /// Resolve an optional identifier, provisioning a fresh session when it
    /// is absent, unknown or expired
    pub async fn get_or_create(&self, session_id: Option<&str>) -> Resolved {
        let Some(id) = session_id else {
            return Resolved {
                session: self.create().await,
                outcome: Resolution::Created,
            };
        };

        match self.get(id).await {
            Ok(session) => {
                session.touch();
                Resolved {
                    session,
                    outcome: Resolution::Existing,
                }
            }
            Err(_) => {
                let session = self.create().await;
                info!("Unknown session {} replaced by {}", id, session.id());
                Resolved {
                    session,
                    outcome: Resolution::Replaced {
                        stale_id: id.to_string(),
                    },
                }
            }
        }
    }

    /// Remove a session now, regardless of its activity
    pub async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(session_id)
        }
        .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

        session.retire_and_release().await;
        counter!("voxmark_sessions_deleted_total").increment(1);
        info!("Deleted session {}", session_id);
        Ok(())
    }

    /// Remove every session idle for longer than the timeout.
    /// Returns how many were reclaimed.
    pub async fn reclaim_expired(&self) -> usize {
        let now = now_millis();
        let candidates: Vec<SessionId> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, session)| session.is_expired(now, self.config.timeout))
                .map(|(id, _)| id.clone())
                .collect()
        };
        if candidates.is_empty() {
            return 0;
        }
        self.evict_expired(&candidates, now).await
    }

    /// Remove the listed sessions that are still expired, then release them
    /// with the registry lock dropped
    async fn evict_expired(&self, candidates: &[SessionId], now: u64) -> usize {
        let evicted: Vec<Arc<SessionState>> = {
            let mut sessions = self.sessions.write().await;
            candidates
                .iter()
                .filter_map(|id| {
                    // Activity may have resumed since the candidate was picked
                    let still_expired = sessions
                        .get(id)
                        .is_some_and(|s| s.is_expired(now, self.config.timeout));
                    if still_expired {
                        sessions.remove(id)
                    } else {
                        None
                    }
                })
                .collect()
        };

        for session in &evicted {
            info!("Reclaiming expired session: {}", session.id());
            counter!("voxmark_sessions_expired_total").increment(1);
            session.retire_and_release().await;
        }
        evicted.len()
    }

    /// Status of every live session, oldest first. Listing does not count as
    /// activity.
    pub async fn list_sessions(&self) -> Vec<SessionStatus> {
        let live: Vec<Arc<SessionState>> = {
            let sessions = self.sessions.read().await;
            sessions.values().cloned().collect()
        };

        let mut statuses = Vec::with_capacity(live.len());
        for session in live {
            if let Some(status) = session.peek_status().await {
                statuses.push(status);
            }
        }
        statuses.sort_by_key(|s| s.created_at);
        statuses
    }

    /// Get count of live sessions
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Stop the reclamation task and release every remaining session
    pub async fn shutdown(&self) -> usize {
        let _ = self.shutdown_tx.send(true);
        let handle = self.reclaimer.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("Reclamation task ended abnormally: {}", e);
        }

        let remaining: Vec<Arc<SessionState>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, session)| session).collect()
        };
        for session in &remaining {
            session.retire_and_release().await;
        }
        info!(
            "Session manager stopped, released {} sessions",
            remaining.len()
        );
        remaining.len()
    }
}

async fn reclaim_loop(
    manager: Weak<SessionManager>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let Some(manager) = manager.upgrade() else {
            break;
        };
        let reclaimed = manager.reclaim_expired().await;
        if reclaimed > 0 {
            info!("Reclamation pass removed {} sessions", reclaimed);
        } else {
            debug!("Reclamation pass found nothing to remove");
        }
    }
    debug!("Reclamation task stopped");
}
