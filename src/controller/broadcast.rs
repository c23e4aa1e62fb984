use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache::TelemetryCache;
use crate::auth::Identity;
use crate::config::BroadcastConfig;
use crate::domain::Snapshot;

pub type SessionId = Uuid;

#[derive(Debug, Error, PartialEq)]
pub enum BroadcastError {
    #[error("live session limit of {0} reached")]
    SessionLimit(usize),
}

/// Message pushed to live clients
#[derive(Debug, Serialize)]
pub struct LiveUpdate<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(flatten)]
    pub snapshot: &'a Snapshot,
}

impl<'a> LiveUpdate<'a> {
    pub fn new(snapshot: &'a Snapshot) -> Self {
        Self { kind: "snapshot", snapshot }
    }
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug)]
struct Session {
    tx: mpsc::Sender<Arc<str>>,
    identity: Option<Identity>,
    connected_at: DateTime<Utc>,
}

/// Session summary for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub subject: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// Registry of live sessions and the periodic push loop.
///
/// Each session owns a small bounded queue drained by its own writer task.
/// Fan-out never waits on a client: a full or closed queue gets the session
/// removed, so one slow or dead client cannot delay the others. Late joiners
/// receive nothing until the next tick.
pub struct Broadcaster {
    sessions: RwLock<HashMap<SessionId, Session>>,
    buffer: usize,
    max_sessions: Option<usize>,
    ticks: AtomicU64,
}

impl Broadcaster {
    pub fn new(cfg: &BroadcastConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            buffer: cfg.session_buffer.max(1),
            max_sessions: cfg.max_sessions,
            ticks: AtomicU64::new(0),
        }
    }

    pub fn register(&self, identity: Option<Identity>) -> Result<(SessionId, mpsc::Receiver<Arc<str>>), BroadcastError> {
        let mut sessions = self.sessions.write();
        if let Some(max) = self.max_sessions {
            if sessions.len() >= max {
                return Err(BroadcastError::SessionLimit(max));
            }
        }
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        let subject = identity.as_ref().map(|i| i.subject.clone());
        sessions.insert(
            id,
            Session {
                tx,
                identity,
                connected_at: Utc::now(),
            },
        );
        info!(session = %id, subject = ?subject, sessions = sessions.len(), "live session registered");
        Ok((id, rx))
    }

    /// Idempotent; returns whether the session was still registered
    pub fn unregister(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().remove(&id).is_some();
        if removed {
            debug!(session = %id, "live session unregistered");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .iter()
            .map(|(id, s)| SessionInfo {
                id: *id,
                subject: s.identity.as_ref().map(|i| i.subject.clone()),
                connected_at: s.connected_at,
            })
            .collect()
    }

    /// Queue `payload` for every session, dropping sessions that cannot take it
    pub fn broadcast(&self, payload: Arc<str>) -> FanOut {
        let mut outcome = FanOut::default();
        let mut dead = Vec::new();
        {
            let sessions = self.sessions.read();
            for (id, session) in sessions.iter() {
                match session.tx.try_send(payload.clone()) {
                    Ok(()) => outcome.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(session = %id, "live session not keeping up, disconnecting");
                        dead.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => dead.push(*id),
                }
            }
        }
        if !dead.is_empty() {
            let mut sessions = self.sessions.write();
            for id in &dead {
                sessions.remove(id);
            }
        }
        outcome.dropped = dead.len();
        outcome
    }

    /// Drop every session, closing their queues
    pub fn close_all(&self) {
        let closed = {
            let mut sessions = self.sessions.write();
            let n = sessions.len();
            sessions.clear();
            n
        };
        if closed > 0 {
            info!(sessions = closed, "closed live sessions");
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// One push: read the snapshot, serialize once, fan out
    pub async fn tick(&self, cache: &TelemetryCache, refresh_wait: Duration) -> FanOut {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if self.session_count() == 0 {
            return FanOut::default();
        }
        let snapshot = match timeout(refresh_wait, cache.get()).await {
            Ok(snapshot) => snapshot,
            Err(_) => {
                debug!("refresh still running, pushing current snapshot");
                cache.current()
            }
        };
        let payload: Arc<str> = match serde_json::to_string(&LiveUpdate::new(&snapshot)) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(error = %e, "failed to serialize live update");
                return FanOut::default();
            }
        };
        let outcome = self.broadcast(payload);
        if outcome.dropped > 0 {
            debug!(delivered = outcome.delivered, dropped = outcome.dropped, "live update fan-out");
        }
        outcome
    }

    pub async fn run(self: Arc<Self>, cache: TelemetryCache, cfg: BroadcastConfig, cancel: CancellationToken) {
        let mut ticker = interval(cfg.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = cfg.tick_ms, "live broadcaster started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(&cache, cfg.refresh_wait()).await;
                }
            }
        }
        self.close_all();
        info!("live broadcaster stopped");
    }
}
