//! Read-only snapshot and section endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    auth::AuthBearer,
    controller::AppState,
    domain::{BatteryReading, Forecast, GridReading, LoadReading, Reading, Snapshot, SolarReading},
};

const DEFAULT_HISTORY_RESULTS: usize = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub results: Option<usize>,
}

impl HistoryQuery {
    fn limit(&self) -> usize {
        self.results.unwrap_or(DEFAULT_HISTORY_RESULTS)
    }
}

/// Full query payload: current reading, recent history and predictions
#[derive(Debug, Serialize)]
pub struct SnapshotView {
    pub current: Option<Arc<Reading>>,
    pub history: Vec<Arc<Reading>>,
    pub predictions: Forecast,
    pub device_online: bool,
    pub stale: bool,
    pub last_update: Option<DateTime<Utc>>,
}

fn predictions(snapshot: &Snapshot) -> Forecast {
    snapshot.forecast.clone().unwrap_or_else(Forecast::empty)
}

fn last_update(snapshot: &Snapshot) -> Option<DateTime<Utc>> {
    snapshot.reading.as_ref().map(|r| r.timestamp)
}

/// GET /api/v1/snapshot
pub async fn get_snapshot(
    State(st): State<AppState>,
    AuthBearer(_): AuthBearer,
    Query(q): Query<HistoryQuery>,
) -> Json<SnapshotView> {
    let snapshot = st.cache.get().await;
    Json(SnapshotView {
        current: snapshot.reading.clone(),
        history: st.history.recent(q.limit()),
        predictions: predictions(&snapshot),
        device_online: snapshot.device_online,
        stale: snapshot.stale,
        last_update: last_update(&snapshot),
    })
}

/// Compact all-sections view used by the dashboard landing page
#[derive(Debug, Serialize)]
pub struct DashboardView {
    pub solar: SolarReading,
    pub battery: BatteryReading,
    pub load: LoadReading,
    pub grid: GridReading,
    pub device_online: bool,
    pub stale: bool,
    pub last_update: Option<DateTime<Utc>>,
}

impl DashboardView {
    fn from_snapshot(snapshot: &Snapshot) -> Self {
        let reading = snapshot.reading.as_deref();
        Self {
            solar: reading.map(|r| r.solar.clone()).unwrap_or_default(),
            battery: reading.map(|r| r.battery.clone()).unwrap_or_default(),
            load: reading.map(|r| r.load.clone()).unwrap_or_default(),
            grid: reading.map(|r| r.grid.clone()).unwrap_or_default(),
            device_online: snapshot.device_online,
            stale: snapshot.stale,
            last_update: last_update(snapshot),
        }
    }
}

/// GET /api/v1/dashboard
pub async fn get_dashboard(State(st): State<AppState>, AuthBearer(_): AuthBearer) -> Json<DashboardView> {
    let snapshot = st.cache.get().await;
    Json(DashboardView::from_snapshot(&snapshot))
}

/// GET /api/v1/dashboard/public - same view, no credential
pub async fn get_public_dashboard(State(st): State<AppState>) -> Json<DashboardView> {
    let snapshot = st.cache.get().await;
    Json(DashboardView::from_snapshot(&snapshot))
}

#[derive(Debug, Serialize)]
pub struct SolarPoint {
    pub timestamp: DateTime<Utc>,
    pub power_w: f64,
    pub voltage_v: f64,
    pub current_a: f64,
}

#[derive(Debug, Serialize)]
pub struct SolarView {
    pub current: SolarReading,
    pub history: Vec<SolarPoint>,
    pub predictions: Forecast,
    pub device_online: bool,
}

/// GET /api/v1/solar
pub async fn get_solar(
    State(st): State<AppState>,
    AuthBearer(_): AuthBearer,
    Query(q): Query<HistoryQuery>,
) -> Json<SolarView> {
    let snapshot = st.cache.get().await;
    let history = st
        .history
        .recent(q.limit())
        .iter()
        .map(|r| SolarPoint {
            timestamp: r.timestamp,
            power_w: r.solar.power_w,
            voltage_v: r.solar.voltage_v,
            current_a: r.solar.current_a,
        })
        .collect();
    Json(SolarView {
        current: snapshot.reading.as_ref().map(|r| r.solar.clone()).unwrap_or_default(),
        history,
        predictions: predictions(&snapshot),
        device_online: snapshot.device_online,
    })
}

#[derive(Debug, Serialize)]
pub struct BatteryPoint {
    pub timestamp: DateTime<Utc>,
    pub voltage_v: f64,
    pub current_a: f64,
    pub soc_percent: f64,
}

#[derive(Debug, Serialize)]
pub struct BatteryView {
    pub current: BatteryReading,
    pub history: Vec<BatteryPoint>,
    pub status: String,
    pub device_online: bool,
}

/// GET /api/v1/battery
pub async fn get_battery(
    State(st): State<AppState>,
    AuthBearer(_): AuthBearer,
    Query(q): Query<HistoryQuery>,
) -> Json<BatteryView> {
    let snapshot = st.cache.get().await;
    let history = st
        .history
        .recent(q.limit())
        .iter()
        .map(|r| BatteryPoint {
            timestamp: r.timestamp,
            voltage_v: r.battery.voltage_v,
            current_a: r.battery.current_a,
            soc_percent: r.battery.soc_percent,
        })
        .collect();
    Json(BatteryView {
        current: snapshot.reading.as_ref().map(|r| r.battery.clone()).unwrap_or_default(),
        history,
        status: predictions(&snapshot).narrative,
        device_online: snapshot.device_online,
    })
}

/// GET /api/v1/predictions
pub async fn get_predictions(State(st): State<AppState>, AuthBearer(_): AuthBearer) -> Json<Forecast> {
    let snapshot = st.cache.get().await;
    Json(predictions(&snapshot))
}

/// Flattened history row
#[derive(Debug, Serialize)]
pub struct HistoryRow {
    pub timestamp: DateTime<Utc>,
    pub battery_voltage_v: f64,
    pub battery_current_a: f64,
    pub soc_percent: f64,
    pub solar_power_w: f64,
    pub load_power_w: f64,
    pub grid_power_w: f64,
}

impl From<&Reading> for HistoryRow {
    fn from(r: &Reading) -> Self {
        Self {
            timestamp: r.timestamp,
            battery_voltage_v: r.battery.voltage_v,
            battery_current_a: r.battery.current_a,
            soc_percent: r.battery.soc_percent,
            solar_power_w: r.solar.power_w,
            load_power_w: r.load.power_w,
            grid_power_w: r.grid.power_w,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryView {
    pub count: usize,
    pub capacity: usize,
    pub readings: Vec<HistoryRow>,
}

/// GET /api/v1/history?results=N
pub async fn get_history(
    State(st): State<AppState>,
    AuthBearer(_): AuthBearer,
    Query(q): Query<HistoryQuery>,
) -> Json<HistoryView> {
    // history is only extended by refreshes; make sure it is current
    st.cache.get().await;
    let readings: Vec<HistoryRow> = st.history.recent(q.limit()).iter().map(|r| HistoryRow::from(&**r)).collect();
    Json(HistoryView {
        count: readings.len(),
        capacity: st.history.capacity(),
        readings,
    })
}
