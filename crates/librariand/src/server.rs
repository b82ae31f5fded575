//! Think server - TCP listener feeding a bounded pool of session workers.
//!
//! Each accepted connection is one session. A connection is only accepted
//! once a worker permit is free, so at most `max_sessions` sessions run at
//! a time. The per-session deadline (`timeout_ms`) is applied here, around
//! the driver; the state machine itself knows nothing about time.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::driver::{drive_session, DriveError, SessionOutcome};
use crate::session::ThinkMachine;

/// Service state shared across connections
pub struct LibrarianService {
    pub config: Config,
    pub machine: ThinkMachine,
    pub stats: SessionStats,
    pub started_at: DateTime<Utc>,
    pub start_time: Instant,
}

impl LibrarianService {
    pub fn new(config: Config) -> Self {
        let machine = ThinkMachine::new(config.limits());
        Self {
            config,
            machine,
            stats: SessionStats::default(),
            started_at: Utc::now(),
            start_time: Instant::now(),
        }
    }
}

/// Session counters. Observational only.
#[derive(Debug, Default)]
pub struct SessionStats {
    active: AtomicU64,
    served: AtomicU64,
    completed: AtomicU64,
    loop_limited: AtomicU64,
    faulted: AtomicU64,
    aborted: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub active: u64,
    pub served: u64,
    pub completed: u64,
    pub loop_limited: u64,
    pub faulted: u64,
    pub aborted: u64,
}

impl SessionStats {
    fn session_started(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.served.fetch_add(1, Ordering::Relaxed);
    }

    fn session_finished(&self, result: &SessionResult) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        let counter = match result {
            SessionResult::Ended(SessionOutcome::Completed { .. }) => &self.completed,
            SessionResult::Ended(SessionOutcome::LoopLimited) => &self.loop_limited,
            SessionResult::Ended(SessionOutcome::Disconnected) => &self.aborted,
            SessionResult::Failed(DriveError::Fault(_)) => &self.faulted,
            SessionResult::Failed(_) | SessionResult::DeadlineExceeded => &self.aborted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active: self.active.load(Ordering::Relaxed),
            served: self.served.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            loop_limited: self.loop_limited.load(Ordering::Relaxed),
            faulted: self.faulted.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }
}

enum SessionResult {
    Ended(SessionOutcome),
    Failed(DriveError),
    DeadlineExceeded,
}

/// Bind the configured listen address.
pub async fn bind(config: &Config) -> Result<TcpListener> {
    let addr = config.listen_addr();
    TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))
}

/// Accept and serve sessions until `shutdown` resolves, then drain.
///
/// Draining waits up to `shutdown_grace_ms` for running sessions, then
/// cancels the ones still waiting for a message.
pub async fn serve<F>(listener: TcpListener, service: Arc<LibrarianService>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let max_sessions = service.config.max_sessions;
    let workers = Arc::new(Semaphore::new(max_sessions));
    let cancel = CancellationToken::new();
    tokio::pin!(shutdown);

    if let Ok(addr) = listener.local_addr() {
        info!(
            "Think server listening on {} ({} workers, limits {:?})",
            addr,
            max_sessions,
            service.machine.defaults()
        );
    }

    loop {
        let permit = tokio::select! {
            _ = &mut shutdown => break,
            permit = Arc::clone(&workers).acquire_owned() => {
                permit.context("Worker pool closed")?
            }
        };

        let (stream, peer) = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let service = Arc::clone(&service);
        let session_cancel = cancel.child_token();
        tokio::spawn(async move {
            handle_connection(stream, peer, &service, session_cancel).await;
            drop(permit);
        });
    }

    drain(&workers, max_sessions, &service, &cancel).await;
    Ok(())
}

async fn drain(
    workers: &Semaphore,
    max_sessions: usize,
    service: &LibrarianService,
    cancel: &CancellationToken,
) {
    let all = u32::try_from(max_sessions).unwrap_or(u32::MAX);
    let grace = service.config.shutdown_grace();
    let active = service.stats.snapshot().active;
    info!("Shutting down, waiting up to {:?} for {} active sessions", grace, active);

    if tokio::time::timeout(grace, workers.acquire_many(all)).await.is_ok() {
        info!("All sessions finished");
        return;
    }

    warn!("Grace period elapsed, cancelling remaining sessions");
    cancel.cancel();
    if tokio::time::timeout(grace, workers.acquire_many(all)).await.is_err() {
        warn!(
            "{} sessions still running after cancellation",
            service.stats.snapshot().active
        );
    }
}

/// Run one session on an accepted connection.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    service: &LibrarianService,
    cancel: CancellationToken,
) {
    let _ = stream.set_nodelay(true);
    service.stats.session_started();

    let (reader, mut writer) = stream.into_split();
    let session = drive_session(
        &service.machine,
        BufReader::new(reader),
        &mut writer,
        service.config.max_frame_bytes,
        cancel,
    );

    let result = match tokio::time::timeout(service.config.session_timeout(), session).await {
        Ok(Ok(outcome)) => SessionResult::Ended(outcome),
        Ok(Err(e)) => SessionResult::Failed(e),
        Err(_) => SessionResult::DeadlineExceeded,
    };
    service.stats.session_finished(&result);

    match &result {
        SessionResult::Ended(outcome) => info!(%peer, ?outcome, "Session finished"),
        SessionResult::Failed(e @ DriveError::Fault(_)) => {
            error!(%peer, error = %e, "Session aborted after internal fault")
        }
        SessionResult::Failed(e) => warn!(%peer, error = %e, "Session aborted"),
        SessionResult::DeadlineExceeded => warn!(
            %peer,
            timeout_ms = service.config.timeout_ms,
            "Session deadline exceeded"
        ),
    }
    let _ = writer.shutdown().await;
}
