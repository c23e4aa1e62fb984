//! Grid section and grid mode selection

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::error::ApiError;
use crate::{
    auth::AuthBearer,
    controller::AppState,
    domain::{GridMode, GridReading},
};

#[derive(Debug, Serialize)]
pub struct GridView {
    pub current: GridReading,
    pub device_online: bool,
}

/// GET /api/v1/grid
pub async fn get_grid(State(st): State<AppState>, AuthBearer(_): AuthBearer) -> Json<GridView> {
    let snapshot = st.cache.get().await;
    let current = match &snapshot.reading {
        Some(r) => r.grid.clone(),
        None => GridReading {
            mode: st.site.grid_mode(),
            ..Default::default()
        },
    };
    Json(GridView {
        current,
        device_online: snapshot.device_online,
    })
}

#[derive(Debug, Deserialize)]
pub struct GridModeRequest {
    pub mode: String,
}

#[derive(Debug, Serialize)]
pub struct GridModeResponse {
    pub success: bool,
    pub mode: GridMode,
    pub message: String,
}

/// POST /api/v1/grid/mode
pub async fn set_grid_mode(
    State(st): State<AppState>,
    AuthBearer(identity): AuthBearer,
    Json(req): Json<GridModeRequest>,
) -> Result<Json<GridModeResponse>, ApiError> {
    let mode = GridMode::from_str(req.mode.trim())
        .map_err(|_| ApiError::BadRequest(format!("unknown grid mode '{}'", req.mode)))?;
    st.site.set_grid_mode(mode);
    st.cache.invalidate();
    tracing::info!(%mode, subject = %identity.subject, "grid mode selected");
    Ok(Json(GridModeResponse {
        success: true,
        mode,
        message: format!("grid mode set to {mode}"),
    }))
}
