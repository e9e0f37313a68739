//! Per-worker sampling sessions. Each rider/collector device drives its
//! own interval loop; the server side keeps an explicit state machine
//! per worker (Idle -> Sampling -> Stopped) instead of any process-wide
//! "currently tracking" flag.

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, State},
};
use jiff::Timestamp;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::{AppState, error::AppError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Sampling,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SamplingSession {
    phase: SessionPhase,
    started_at: Option<Timestamp>,
    stopped_at: Option<Timestamp>,
}

impl Default for SamplingSession {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            started_at: None,
            stopped_at: None,
        }
    }
}

impl SamplingSession {
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_sampling(&self) -> bool {
        self.phase == SessionPhase::Sampling
    }

    /// Begins (or resumes) sampling. Starting an already-sampling
    /// session keeps its original start time.
    pub fn start(&mut self, now: Timestamp) -> SessionPhase {
        if self.phase != SessionPhase::Sampling {
            self.phase = SessionPhase::Sampling;
            self.started_at = Some(now);
            self.stopped_at = None;
        }
        self.phase
    }

    /// Idempotent: stopping an idle or already-stopped session is a
    /// no-op, not an error.
    pub fn stop(&mut self, now: Timestamp) -> SessionPhase {
        if self.phase == SessionPhase::Sampling {
            self.stopped_at = Some(now);
        }
        self.phase = SessionPhase::Stopped;
        self.phase
    }

    pub fn stopped_at(&self) -> Option<Timestamp> {
        self.stopped_at
    }
}

/// Sessions keyed by worker reference. Entries are created lazily on
/// first start.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SamplingSession>>,
}

impl SessionRegistry {
    pub async fn start(&self, owner_ref: &str, now: Timestamp) -> SessionPhase {
        let mut sessions = self.sessions.write().await;
        sessions.entry(owner_ref.to_string()).or_default().start(now)
    }

    /// No-op for unknown workers; their session was never started.
    pub async fn stop(&self, owner_ref: &str, now: Timestamp) -> SessionPhase {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(owner_ref) {
            Some(session) => session.stop(now),
            None => SessionPhase::Stopped,
        }
    }

    pub async fn phase(&self, owner_ref: &str) -> SessionPhase {
        let sessions = self.sessions.read().await;
        sessions
            .get(owner_ref)
            .map(|s| s.phase())
            .unwrap_or(SessionPhase::Idle)
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub owner_ref: String,
    pub phase: SessionPhase,
}

#[tracing::instrument(skip_all, fields(owner = %owner_ref))]
pub async fn start_session(
    State(state): State<AppState>,
    Path(owner_ref): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let phase = state.sessions.start(&owner_ref, Timestamp::now()).await;
    info!(message = "sampling session started");
    Ok(Json(SessionResponse { owner_ref, phase }))
}

/// Staff dashboards poll this to see whether a worker is live.
#[tracing::instrument(skip_all, fields(owner = %owner_ref))]
pub async fn session_status(
    State(state): State<AppState>,
    Path(owner_ref): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let phase = state.sessions.phase(&owner_ref).await;
    Ok(Json(SessionResponse { owner_ref, phase }))
}

#[tracing::instrument(skip_all, fields(owner = %owner_ref))]
pub async fn stop_session(
    State(state): State<AppState>,
    Path(owner_ref): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let phase = state.sessions.stop(&owner_ref, Timestamp::now()).await;
    info!(message = "sampling session stopped");
    Ok(Json(SessionResponse { owner_ref, phase }))
}
