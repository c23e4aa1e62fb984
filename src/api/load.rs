//! Load section, load control and interlock status

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::error::ApiError;
use crate::{
    auth::AuthBearer,
    controller::{AppState, ControlOutcome, LoadLockStatus, SafetyEvent},
    domain::{LoadId, LoadReading},
};

#[derive(Debug, Serialize)]
pub struct LoadPoint {
    pub timestamp: DateTime<Utc>,
    pub power_w: f64,
    pub current_a: f64,
}

#[derive(Debug, Serialize)]
pub struct LoadView {
    pub current: LoadReading,
    pub history: Vec<LoadPoint>,
    /// Projected load power one hour ahead (W)
    pub predicted_demand_w: f64,
    pub interlock: Vec<LoadLockStatus>,
    pub device_online: bool,
}

const LOAD_HISTORY: usize = 50;

/// GET /api/v1/load
pub async fn get_load(State(st): State<AppState>, AuthBearer(_): AuthBearer) -> Json<LoadView> {
    let snapshot = st.cache.get().await;
    let current = match &snapshot.reading {
        Some(r) => r.load.clone(),
        None => LoadReading {
            switches: st.site.view().switches,
            ..Default::default()
        },
    };
    let history = st
        .history
        .recent(LOAD_HISTORY)
        .iter()
        .map(|r| LoadPoint {
            timestamp: r.timestamp,
            power_w: r.load.power_w,
            current_a: r.load.current_a,
        })
        .collect();
    Json(LoadView {
        current,
        history,
        predicted_demand_w: snapshot.forecast.as_ref().map(|f| f.load_demand_1h).unwrap_or(0.0),
        interlock: st.interlock.status(),
        device_online: snapshot.device_online,
    })
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub device: String,
    pub state: bool,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    pub device: LoadId,
    pub new_state: bool,
    pub message: String,
}

/// POST /api/v1/load/control
pub async fn control_load(
    State(st): State<AppState>,
    AuthBearer(identity): AuthBearer,
    Json(req): Json<ControlRequest>,
) -> Result<Json<ControlResponse>, ApiError> {
    let load = LoadId::from_str(req.device.trim())
        .map_err(|_| ApiError::BadRequest(format!("unknown device '{}'", req.device)))?;
    tracing::info!(%load, state = req.state, subject = %identity.subject, "load control requested");

    match st.loads.set_state(load, req.state).await? {
        ControlOutcome::Applied { load, new_state } => Ok(Json(ControlResponse {
            success: true,
            device: load,
            new_state,
            message: format!("{load} turned {}", if new_state { "on" } else { "off" }),
        })),
        ControlOutcome::Rejected { load, .. } => Err(ApiError::SafetyLocked(load)),
    }
}

#[derive(Debug, Serialize)]
pub struct InterlockEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SafetyEvent,
}

#[derive(Debug, Serialize)]
pub struct InterlockView {
    pub lock_threshold: f64,
    pub unlock_threshold: f64,
    pub loads: Vec<LoadLockStatus>,
    pub events: Vec<InterlockEvent>,
}

const INTERLOCK_EVENTS: usize = 20;

/// GET /api/v1/interlock
pub async fn get_interlock(State(st): State<AppState>, AuthBearer(_): AuthBearer) -> Json<InterlockView> {
    let (lock_threshold, unlock_threshold) = st.interlock.thresholds();
    let events = st
        .interlock
        .recent_events(INTERLOCK_EVENTS)
        .into_iter()
        .map(|(timestamp, event)| InterlockEvent { timestamp, event })
        .collect();
    Json(InterlockView {
        lock_threshold,
        unlock_threshold,
        loads: st.interlock.status(),
        events,
    })
}
