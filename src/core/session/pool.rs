use crate::core::protocol::{GattResponseDecoder, ResultDispatcher};
use crate::core::session::session::{Session, SessionSummary};
use crate::domain::{config::ToolConfig, error::{GattPoolError, GattPoolResult}};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Fixed set of gatttool sessions handed out one caller at a time.
///
/// The pool is created empty; [`initialize`](Self::initialize) spawns every
/// session up front and [`shutdown`](Self::shutdown) tears them all down.
/// Sessions are never replaced in between.
pub struct SessionPool {
    tool: ToolConfig,
    dispatcher: Arc<dyn ResultDispatcher>,
    sessions: Mutex<Option<Vec<Arc<Session>>>>,
}

impl SessionPool {
    /// Pool whose sessions decode results with [`GattResponseDecoder`]
    pub fn new(tool: ToolConfig) -> Self {
        Self::with_dispatcher(tool, Arc::new(GattResponseDecoder))
    }

    pub fn with_dispatcher(tool: ToolConfig, dispatcher: Arc<dyn ResultDispatcher>) -> Self {
        Self {
            tool,
            dispatcher,
            sessions: Mutex::new(None),
        }
    }

    pub fn tool_config(&self) -> &ToolConfig {
        &self.tool
    }

    /// Spawn `size` tool processes.
    pub async fn initialize(&self, size: usize) -> GattPoolResult<()> {
        let tool = self.tool.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        self.initialize_with(size, move |id| Session::spawn(id, &tool, Arc::clone(&dispatcher)))
            .await
    }

    /// Fill the pool with sessions built by `factory`, called with ids
    /// `0..size`. If any call fails, the sessions built so far are shut
    /// down and the pool stays uninitialized.
    pub async fn initialize_with<F>(&self, size: usize, mut factory: F) -> GattPoolResult<()>
    where
        F: FnMut(usize) -> GattPoolResult<Arc<Session>>,
    {
        if size == 0 {
            return Err(GattPoolError::InvalidInput("pool size must be at least 1".to_string()));
        }

        let mut slot = self.sessions.lock().await;
        if slot.is_some() {
            warn!("Session pool is already initialized");
            return Err(GattPoolError::AlreadyInitialized);
        }

        let mut sessions = Vec::with_capacity(size);
        for id in 0..size {
            match factory(id) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    error!("Failed to start session {}: {}", id, e);
                    for session in &sessions {
                        session.shutdown().await;
                    }
                    return Err(e);
                }
            }
        }

        info!("Session pool ready with {} sessions", size);
        *slot = Some(sessions);
        Ok(())
    }

    pub async fn is_initialized(&self) -> bool {
        self.sessions.lock().await.is_some()
    }

    /// Number of sessions, 0 before initialization
    pub async fn size(&self) -> usize {
        self.sessions.lock().await.as_ref().map_or(0, Vec::len)
    }

    /// Hand out the first free session, or `None` when every session is
    /// held (or the pool was never initialized).
    pub async fn acquire(&self) -> Option<Arc<Session>> {
        let slot = self.sessions.lock().await;
        let Some(sessions) = slot.as_ref() else {
            warn!("Acquire on an uninitialized session pool");
            return None;
        };

        for session in sessions {
            if session.try_acquire().await {
                debug!("Acquired session {}", session.id());
                return Some(Arc::clone(session));
            }
        }
        debug!("All {} sessions are busy", sessions.len());
        None
    }

    /// Return a session to the pool. Sessions from another pool are ignored.
    pub async fn release(&self, session: &Arc<Session>) {
        let slot = self.sessions.lock().await;
        let owned = slot
            .as_ref()
            .is_some_and(|sessions| sessions.iter().any(|s| Arc::ptr_eq(s, session)));
        if !owned {
            warn!("Session {} does not belong to this pool", session.id());
            return;
        }
        session.release().await;
    }

    pub async fn busy_count(&self) -> usize {
        let slot = self.sessions.lock().await;
        let mut busy = 0;
        for session in slot.iter().flatten() {
            if session.is_busy().await {
                busy += 1;
            }
        }
        busy
    }

    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let slot = self.sessions.lock().await;
        let mut summaries = Vec::new();
        for session in slot.iter().flatten() {
            summaries.push(session.summary().await);
        }
        summaries
    }

    /// Kill every tool process. The pool can be initialized again afterwards.
    pub async fn shutdown(&self) {
        let Some(sessions) = self.sessions.lock().await.take() else {
            debug!("Shutdown of an uninitialized session pool");
            return;
        };
        for session in &sessions {
            session.shutdown().await;
        }
        info!("Session pool shut down ({} sessions)", sessions.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::state::Status;
    use std::collections::HashSet;

    fn cat_pool() -> SessionPool {
        SessionPool::new(ToolConfig::new("cat", Vec::new()))
    }

    #[tokio::test]
    async fn test_acquire_until_exhausted() {
        let pool = cat_pool();
        pool.initialize(2).await.unwrap();
        assert_eq!(pool.size().await, 2);

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        assert_ne!(first.id(), second.id());
        assert!(pool.acquire().await.is_none());
        assert_eq!(pool.busy_count().await, 2);

        pool.release(&first).await;
        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id(), first.id());

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_uninitialized_pool() {
        let pool = cat_pool();
        assert!(!pool.is_initialized().await);
        assert_eq!(pool.size().await, 0);
        assert!(pool.acquire().await.is_none());
        assert!(pool.summaries().await.is_empty());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_size_rejected() {
        let pool = cat_pool();
        assert!(matches!(pool.initialize(0).await, Err(GattPoolError::InvalidInput(_))));
        assert!(!pool.is_initialized().await);
    }

    #[tokio::test]
    async fn test_second_initialize_is_refused() {
        let pool = cat_pool();
        pool.initialize(1).await.unwrap();
        assert!(matches!(pool.initialize(3).await, Err(GattPoolError::AlreadyInitialized)));
        assert_eq!(pool.size().await, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_pool_empty() {
        let pool = cat_pool();
        let tool = ToolConfig::new("cat", Vec::new());
        let missing = ToolConfig::new("/nonexistent/gatttool-for-tests", Vec::new());

        let result = pool
            .initialize_with(3, |id| {
                let config = if id < 2 { &tool } else { &missing };
                Session::spawn(id, config, Arc::new(GattResponseDecoder))
            })
            .await;

        assert!(matches!(result, Err(GattPoolError::Spawn { .. })));
        assert!(!pool.is_initialized().await);
        pool.initialize(1).await.unwrap();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_acquire_never_shares() {
        let pool = Arc::new(cat_pool());
        pool.initialize(3).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move { pool.acquire().await.map(|s| s.id()) }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            if let Some(id) = task.await.unwrap() {
                ids.push(id);
            }
        }
        assert_eq!(ids.len(), 3);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 3);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_release_foreign_session_is_ignored() {
        let pool = cat_pool();
        let other = cat_pool();
        pool.initialize(1).await.unwrap();
        other.initialize(1).await.unwrap();

        let foreign = other.acquire().await.unwrap();
        pool.release(&foreign).await;
        assert!(foreign.is_busy().await);

        other.release(&foreign).await;
        assert!(!foreign.is_busy().await);

        pool.shutdown().await;
        other.shutdown().await;
    }

    #[tokio::test]
    async fn test_summaries_and_reinitialize() {
        let pool = cat_pool();
        pool.initialize(2).await.unwrap();
        let held = pool.acquire().await.unwrap();

        let summaries = pool.summaries().await;
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().all(|s| s.status == Status::Idle && s.pid.is_some()));
        assert_eq!(summaries.iter().filter(|s| s.busy).count(), 1);
        assert!(summaries.iter().any(|s| s.id == held.id() && s.busy));

        pool.shutdown().await;
        assert!(!pool.is_initialized().await);
        pool.initialize(1).await.unwrap();
        assert_eq!(pool.size().await, 1);
        pool.shutdown().await;
    }
}
