pub mod dashboard;
pub mod error;
pub mod grid;
pub mod health;
pub mod load;
pub mod v1;
pub mod ws;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{config::ServerConfig, controller::AppState};

pub fn router(state: AppState) -> Router {
    let server = state.cfg.server.clone();

    // the live channel is long-lived, so it stays outside the request timeout
    let api = Router::new()
        .nest("/api/v1", v1::router())
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(64 * 1024))
                .layer(TimeoutLayer::new(Duration::from_secs(server.request_timeout_secs))),
        );

    let mut router = Router::new()
        .merge(api)
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    if let Some(cors) = cors_layer(&server) {
        router = router.layer(cors);
    }

    router.layer(TraceLayer::new_for_http())
}

fn cors_layer(server: &ServerConfig) -> Option<CorsLayer> {
    if !server.enable_cors {
        return None;
    }
    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
    )
}
