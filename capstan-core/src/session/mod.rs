//! Session store for stateful transports
//!
//! Sessions live in a sharded [`DashMap`]; touching a session is a single
//! atomic store, so concurrent requests on different sessions never contend
//! on a global lock. Expiry is measured on the tokio clock.

use crate::config::SessionConfig;
use crate::context::RequestContext;
use crate::error::DispatchError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Session identifier (UUID v4)
pub type SessionId = String;

/// One client conversation
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    permissions: BTreeSet<String>,
    state: RwLock<Map<String, Value>>,
    /// Store epoch; `last_activity` is measured from here
    epoch: Instant,
    /// Milliseconds since `epoch`
    last_activity: AtomicU64,
}

impl Session {
    fn new(epoch: Instant, ctx: &RequestContext) -> Self {
        let session = Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            permissions: ctx.permissions.clone(),
            state: RwLock::new(ctx.state.clone()),
            epoch,
            last_activity: AtomicU64::new(0),
        };
        session.touch();
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Permissions bound when the session was created
    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    /// Record activity now
    pub fn touch(&self) {
        self.last_activity.store(self.elapsed_ms(), Ordering::Relaxed);
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Time since the last recorded activity
    pub fn idle_for(&self) -> Duration {
        let last = self.last_activity.load(Ordering::Relaxed);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }

    pub fn is_expired(&self, idle_timeout: Duration) -> bool {
        self.idle_for() >= idle_timeout
    }

    pub async fn get_state(&self, key: &str) -> Option<Value> {
        self.state.read().await.get(key).cloned()
    }

    pub async fn set_state(&self, key: impl Into<String>, value: Value) {
        self.state.write().await.insert(key.into(), value);
    }

    /// Request context for a call made within this session
    pub async fn context(&self) -> RequestContext {
        RequestContext {
            session_id: Some(self.id.clone()),
            trace_id: None,
            permissions: self.permissions.clone(),
            state: self.state.read().await.clone(),
        }
    }
}

/// Concurrent map of live sessions
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<Session>>,
    idle_timeout: Duration,
    epoch: Instant,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout,
            epoch: Instant::now(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.idle_timeout)
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Open a session carrying `ctx`'s permissions and state
    pub fn create(&self, ctx: &RequestContext) -> SessionId {
        let session = Arc::new(Session::new(self.epoch, ctx));
        let id = session.id.clone();
        self.sessions.insert(id.clone(), session);
        info!(session_id = %id, live = self.sessions.len(), "Session created");
        id
    }

    /// Look up a live session
    ///
    /// A session idle past the timeout is evicted here even if the sweeper
    /// has not reached it yet.
    pub fn get(&self, id: &str) -> Result<Arc<Session>, DispatchError> {
        let not_found = || DispatchError::SessionNotFound { id: id.to_string() };

        // clone out so the shard guard is released before any removal
        let session = self
            .sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(not_found)?;

        if session.is_expired(self.idle_timeout) {
            self.sessions
                .remove_if(id, |_, s| s.is_expired(self.idle_timeout));
            debug!(session_id = id, "Evicted expired session on access");
            return Err(not_found());
        }
        Ok(session)
    }

    /// Record activity on a live session
    pub fn touch(&self, id: &str) -> Result<(), DispatchError> {
        self.get(id)?.touch();
        Ok(())
    }

    /// End a session
    pub fn terminate(&self, id: &str) -> Result<(), DispatchError> {
        match self.sessions.remove(id) {
            Some(_) => {
                info!(session_id = id, "Session terminated");
                Ok(())
            }
            None => Err(DispatchError::SessionNotFound { id: id.to_string() }),
        }
    }

    /// Drop every expired session, returning how many were removed
    pub fn sweep(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(self.idle_timeout));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            info!(removed, live = self.sessions.len(), "Swept expired sessions");
        }
        removed
    }

    /// Sweep every `interval` until `cancel` fires
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Session sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        store.sweep();
                    }
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_create_and_get() {
        let store = SessionStore::new(Duration::from_secs(60));
        let ctx = RequestContext::new()
            .with_permission("admin")
            .with_state("tenant", json!("acme"));
        let id = store.create(&ctx);

        let session = store.get(&id).unwrap();
        assert_eq!(session.id(), id);
        assert!(session.permissions().contains("admin"));
        assert_eq!(session.get_state("tenant").await, Some(json!("acme")));

        let ctx = session.context().await;
        assert_eq!(ctx.session_id.as_deref(), Some(id.as_str()));
        assert!(ctx.has_permission("admin"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_is_not_found() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create(&RequestContext::new());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.get(&id).is_ok());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            store.get(&id).unwrap_err(),
            DispatchError::SessionNotFound { id: id.clone() }
        );
        // evicted on access
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_extends_lifetime() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create(&RequestContext::new());

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(45)).await;
            store.touch(&id).unwrap();
        }
        assert!(store.get(&id).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let store = SessionStore::new(Duration::from_secs(60));
        let old = store.create(&RequestContext::new());
        tokio::time::advance(Duration::from_secs(30)).await;
        let fresh = store.create(&RequestContext::new());
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(store.sweep(), 1);
        assert!(store.get(&old).is_err());
        assert!(store.get(&fresh).is_ok());
    }

    #[tokio::test]
    async fn test_terminate() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create(&RequestContext::new());
        store.terminate(&id).unwrap();
        assert!(store.get(&id).is_err());
        assert_eq!(store.terminate(&id).unwrap_err().kind(), "session_not_found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(10)));
        store.create(&RequestContext::new());

        let cancel = CancellationToken::new();
        let handle = store.spawn_sweeper(Duration::from_secs(5), cancel.clone());

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(store.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
