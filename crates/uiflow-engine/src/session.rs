use crate::bridge::Bridge;
use crate::process;
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};
use uiflow_common::config::SessionConfig;
use uiflow_common::error::TransportError;
use uiflow_common::protocol::Payload;
use uuid::Uuid;

const HEALTH_POLL: Duration = Duration::from_millis(200);
const EXIT_POLL: Duration = Duration::from_millis(100);
const REAP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to start bridge: {0}")]
    Spawn(String),
    #[error("Bridge did not become ready within {0}ms")]
    Timeout(u64),
    #[error("Bridge refused the session: {0}")]
    Rejected(String),
    #[error("Bridge reported an empty tool catalog")]
    EmptyCatalog,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A live browser session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionHandle {
    pub id: Uuid,
    pub connected: bool,
    pub tool_catalog: BTreeSet<String>,
    pub process_ids: BTreeSet<u32>,
}

/// Opens sessions. Holds no per-session state, so one manager can hand out
/// any number of independent sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionManager {
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Starts the bridge if configured, checks it is healthy, connects and
    /// reads the tool catalog, all within `connect_timeout_ms`.
    pub async fn acquire<B: Bridge>(&self, bridge: B) -> Result<SessionGuard<B>, SessionError> {
        let child = match &self.config.bridge_command {
            Some(command) => Some(spawn_bridge(command)?),
            None => None,
        };

        let mut guard = SessionGuard {
            handle: SessionHandle {
                id: Uuid::new_v4(),
                connected: false,
                tool_catalog: BTreeSet::new(),
                process_ids: BTreeSet::new(),
            },
            bridge: Arc::new(bridge),
            child,
            grace: Duration::from_millis(self.config.grace_period_ms),
            released: false,
        };
        if let Some(pid) = guard.child.as_ref().and_then(Child::id) {
            guard.handle.process_ids.insert(pid);
        }

        let limit = Duration::from_millis(self.config.connect_timeout_ms);
        let established = timeout(limit, guard.establish()).await;
        let failure = match established {
            Ok(Ok(())) => {
                info!(
                    session = %guard.handle.id,
                    tools = guard.handle.tool_catalog.len(),
                    "session acquired"
                );
                return Ok(guard);
            }
            Ok(Err(err)) => err,
            Err(_) => SessionError::Timeout(self.config.connect_timeout_ms),
        };
        warn!(error = %failure, "session acquire failed");
        guard.release().await;
        Err(failure)
    }

    /// Acquires a session, runs `f`, and releases the session on every exit
    /// path. A panic inside `f` is re-raised after release.
    pub async fn scoped<B, F, Fut, T>(&self, bridge: B, f: F) -> Result<T, SessionError>
    where
        B: Bridge,
        F: FnOnce(Arc<B>, SessionHandle) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut guard = self.acquire(bridge).await?;
        let shared = guard.bridge();
        let handle = guard.handle().clone();
        let outcome = AssertUnwindSafe(async move { f(shared, handle).await })
            .catch_unwind()
            .await;
        guard.release().await;
        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

fn spawn_bridge(command: &[String]) -> Result<Child, SessionError> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| SessionError::Spawn("empty bridge command".into()))?;
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SessionError::Spawn(format!("{}: {}", program, e)))?;
    info!(program = %program, pid = ?child.id(), "bridge process started");
    Ok(child)
}

/// Owns an acquired session until `release` is awaited. Dropping it
/// unreleased kills the session's processes without waiting.
pub struct SessionGuard<B: Bridge> {
    handle: SessionHandle,
    bridge: Arc<B>,
    child: Option<Child>,
    grace: Duration,
    released: bool,
}

impl<B: Bridge> SessionGuard<B> {
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn bridge(&self) -> Arc<B> {
        Arc::clone(&self.bridge)
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    async fn establish(&mut self) -> Result<(), SessionError> {
        self.wait_healthy().await?;

        let result = self.bridge.connect().await?;
        if !result.succeeded {
            return Err(SessionError::Rejected(
                result.error_message.unwrap_or_else(|| "connect failed".into()),
            ));
        }
        self.handle.connected = true;

        if let Payload::Catalog(catalog) = result.payload {
            self.handle.tool_catalog = catalog.tools;
            for pid in catalog.pids {
                if process::is_signallable(pid) {
                    self.handle.process_ids.insert(pid);
                } else {
                    warn!(pid, "ignoring process id reported by the bridge");
                }
            }
        }
        if self.handle.tool_catalog.is_empty() {
            return Err(SessionError::EmptyCatalog);
        }
        Ok(())
    }

    /// A bridge we just started gets polled until it answers; an external
    /// one must answer the first time.
    async fn wait_healthy(&self) -> Result<(), SessionError> {
        let spawned = self.child.is_some();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let failure = match self.bridge.health().await {
                Ok(r) if r.succeeded => {
                    debug!(attempt, "bridge healthy");
                    return Ok(());
                }
                Ok(r) => SessionError::Rejected(r.error_message.unwrap_or_else(|| "unhealthy".into())),
                Err(e) => SessionError::Transport(e),
            };
            if !spawned {
                return Err(failure);
            }
            if attempt % 5 == 0 {
                info!(attempt, "waiting for bridge...");
            }
            sleep(HEALTH_POLL).await;
        }
    }

    /// Disconnects, terminates the session's processes (killing whatever
    /// outlives the grace period) and marks the handle disconnected.
    /// Calling it again does nothing.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if self.handle.connected {
            match self.bridge.disconnect().await {
                Ok(r) if !r.succeeded => {
                    warn!(error = ?r.error_message, "bridge disconnect reported failure")
                }
                Err(e) => warn!(error = %e, "bridge disconnect failed"),
                Ok(_) => {}
            }
        }

        self.stop_processes().await;
        self.handle.connected = false;
        info!(session = %self.handle.id, "session released");
    }

    async fn stop_processes(&mut self) {
        let pids: Vec<u32> = self.handle.process_ids.iter().copied().collect();
        for &pid in &pids {
            if self.alive(pid) && !process::terminate(pid) {
                warn!(pid, "could not signal process");
            }
        }

        let deadline = Instant::now() + self.grace;
        loop {
            let survivors: Vec<u32> = pids.iter().copied().filter(|&p| self.alive(p)).collect();
            if survivors.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                for pid in survivors {
                    warn!(pid, "process outlived grace period, killing");
                    process::force_kill(pid);
                }
                break;
            }
            sleep(EXIT_POLL).await;
        }

        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = timeout(REAP_TIMEOUT, child.wait()).await;
        }
    }

    fn alive(&mut self, pid: u32) -> bool {
        if let Some(child) = self.child.as_mut()
            && child.id() == Some(pid)
        {
            return matches!(child.try_wait(), Ok(None));
        }
        process::is_alive(pid)
    }
}

impl<B: Bridge> Drop for SessionGuard<B> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(session = %self.handle.id, "session dropped without release, killing its processes");
        for &pid in &self.handle.process_ids {
            process::force_kill(pid);
        }
    }
}
