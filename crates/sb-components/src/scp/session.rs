//! Session transport contract and session bookkeeping
//!
//! The transport itself (SSH handshake, SCP protocol) is supplied by the
//! application through `SessionFactory`. This module tracks every open
//! session so the component can close them when it stops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use sb_common::LifecycleError;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::configuration::ScpTarget;

/// Opens sessions to remote hosts
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self, target: &ScpTarget) -> anyhow::Result<Box<dyn ScpSession>>;
}

/// One authenticated session to a remote host
#[async_trait]
pub trait ScpSession: Send + Sync {
    /// Create `directory` if needed and make it the upload target
    async fn ensure_directory(&mut self, directory: &str) -> anyhow::Result<()>;

    async fn send_file(&mut self, path: &str, mode: u32, contents: Bytes) -> anyhow::Result<()>;

    async fn disconnect(&mut self) -> anyhow::Result<()>;

    fn is_connected(&self) -> bool;
}

/// Severity reported by a session transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// Forward a transport log line to tracing
pub fn log_session_event(level: SessionLogLevel, message: &str) {
    match level {
        SessionLogLevel::Fatal | SessionLogLevel::Error => error!("[SCP] {}", message),
        SessionLogLevel::Warn => warn!("[SCP] {}", message),
        SessionLogLevel::Info => info!("[SCP] {}", message),
        SessionLogLevel::Debug => debug!("[SCP] {}", message),
    }
}

pub type SharedSession = Arc<Mutex<Box<dyn ScpSession>>>;

/// A session registered with the tracker
#[derive(Clone)]
pub struct TrackedSession {
    pub id: u64,
    pub address: String,
    pub session: SharedSession,
}

/// Every session opened by one component
#[derive(Default)]
pub struct SessionTracker {
    next_id: AtomicU64,
    sessions: DashMap<u64, TrackedSession>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, address: impl Into<String>, session: Box<dyn ScpSession>) -> TrackedSession {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let tracked = TrackedSession {
            id,
            address: address.into(),
            session: Arc::new(Mutex::new(session)),
        };
        self.sessions.insert(id, tracked.clone());
        debug!(session_id = id, address = %tracked.address, "Tracking session");
        tracked
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Disconnect and forget one session
    pub async fn close(&self, id: u64) -> Result<(), LifecycleError> {
        let Some((_, tracked)) = self.sessions.remove(&id) else {
            return Ok(());
        };
        let mut session = tracked.session.lock().await;
        if !session.is_connected() {
            return Ok(());
        }
        session.disconnect().await.map_err(|e| {
            LifecycleError::resource(format!("session {}", tracked.address), format!("{:#}", e))
        })?;
        debug!(session_id = id, address = %tracked.address, "Session closed");
        Ok(())
    }

    /// Close every open session within `grace`. Sessions that do not
    /// disconnect in time are abandoned. Returns how many were abandoned.
    pub async fn close_all(&self, grace: Duration) -> usize {
        let ids: Vec<u64> = self.sessions.iter().map(|entry| *entry.key()).collect();
        if ids.is_empty() {
            return 0;
        }

        let start = Instant::now();
        let mut abandoned = 0;
        for id in ids {
            let remaining = grace.saturating_sub(start.elapsed());
            match tokio::time::timeout(remaining, self.close(id)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(session_id = id, error = %e, "Failed to close session"),
                Err(_) => {
                    abandoned += 1;
                    warn!(session_id = id, "Session did not close within grace period, abandoning");
                }
            }
        }
        // Timed-out closes already removed their entry
        self.sessions.clear();
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSession {
        connected: bool,
        hang: bool,
        disconnects: Arc<AtomicU64>,
    }

    #[async_trait]
    impl ScpSession for StubSession {
        async fn ensure_directory(&mut self, _directory: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn send_file(&mut self, _path: &str, _mode: u32, _contents: Bytes) -> anyhow::Result<()> {
            Ok(())
        }

        async fn disconnect(&mut self) -> anyhow::Result<()> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.connected = false;
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    fn stub(hang: bool, disconnects: &Arc<AtomicU64>) -> Box<dyn ScpSession> {
        Box::new(StubSession {
            connected: true,
            hang,
            disconnects: disconnects.clone(),
        })
    }

    #[tokio::test]
    async fn test_close_disconnects_once() {
        let disconnects = Arc::new(AtomicU64::new(0));
        let tracker = SessionTracker::new();
        let tracked = tracker.track("h:22", stub(false, &disconnects));

        tracker.close(tracked.id).await.unwrap();
        tracker.close(tracked.id).await.unwrap();

        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_close_all_abandons_hung_sessions() {
        let disconnects = Arc::new(AtomicU64::new(0));
        let tracker = SessionTracker::new();
        tracker.track("a:22", stub(false, &disconnects));
        tracker.track("b:22", stub(true, &disconnects));

        let abandoned = tracker.close_all(Duration::from_millis(50)).await;

        assert_eq!(abandoned, 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.open_sessions(), 0);
    }
}
