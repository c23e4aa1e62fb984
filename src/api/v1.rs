use axum::{
    routing::{get, post},
    Router,
};

use super::{dashboard, grid, health, load};
use crate::controller::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/snapshot", get(dashboard::get_snapshot))
        .route("/dashboard", get(dashboard::get_dashboard))
        .route("/dashboard/public", get(dashboard::get_public_dashboard))
        .route("/solar", get(dashboard::get_solar))
        .route("/battery", get(dashboard::get_battery))
        .route("/predictions", get(dashboard::get_predictions))
        .route("/history", get(dashboard::get_history))
        .route("/load", get(load::get_load))
        .route("/load/control", post(load::control_load))
        .route("/interlock", get(load::get_interlock))
        .route("/grid", get(grid::get_grid))
        .route("/grid/mode", post(grid::set_grid_mode))
        .route("/health", get(health::health_check))
}
