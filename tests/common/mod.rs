#![allow(dead_code)]
use async_trait::async_trait;
use axum::{body::Body, http::Request, Router};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use solar_telemetry_hub::{
    api,
    auth::Claims,
    config::Config,
    controller::AppState,
    domain::LoadId,
    hardware::{ActuationError, ActuationGateway, DeviceSample, Devices, TelemetryProvider, UpstreamError},
};

pub const SECRET: &str = "integration-test-secret-0123456789abcdef";

/// Feed whose SOC can be changed between fetches
pub struct ScriptedFeed {
    pub soc: Mutex<f64>,
    pub calls: AtomicUsize,
    pub delay: Duration,
}

impl ScriptedFeed {
    pub fn new(soc: f64) -> Arc<Self> {
        Self::with_delay(soc, Duration::ZERO)
    }

    pub fn with_delay(soc: f64, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            soc: Mutex::new(soc),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetryProvider for ScriptedFeed {
    async fn fetch_batch(&self, _results: u32) -> Result<Vec<DeviceSample>, UpstreamError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as i64;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let soc = *self.soc.lock();
        let start = Utc::now() - ChronoDuration::minutes(10);
        Ok((0..=n)
            .map(|i| DeviceSample {
                timestamp: start + ChronoDuration::seconds(15 * i),
                battery_voltage_v: 12.6,
                battery_current_a: 0.8,
                battery_soc_percent: soc,
                solar_voltage_v: 18.0,
                solar_current_a: 4.0,
                load_power_w: 95.0,
                load_current_a: 7.5,
                ..Default::default()
            })
            .collect())
    }
}

/// Relay board recording every acknowledged write
#[derive(Default)]
pub struct RecordingRelays {
    pub writes: Mutex<Vec<(LoadId, bool)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl ActuationGateway for RecordingRelays {
    async fn write(&self, load: LoadId, on: bool) -> Result<(), ActuationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ActuationError::Rejected(503));
        }
        self.writes.lock().push((load, on));
        Ok(())
    }

    async fn read(&self, _load: LoadId) -> Result<Option<bool>, ActuationError> {
        Ok(None)
    }
}

pub struct Harness {
    pub state: AppState,
    pub app: Router,
    pub feed: Arc<ScriptedFeed>,
    pub relays: Arc<RecordingRelays>,
}

pub async fn harness(feed: Arc<ScriptedFeed>) -> Harness {
    let mut cfg = Config::default();
    cfg.auth.jwt_secret = SECRET.into();
    let relays = Arc::new(RecordingRelays::default());
    let devices = Devices {
        provider: feed.clone(),
        gateway: relays.clone(),
    };
    let state = AppState::with_devices(cfg, devices).await;
    let app = api::router(state.clone());
    Harness { state, app, feed, relays }
}

pub fn token() -> String {
    let claims = Claims {
        sub: "operator".into(),
        email: Some("operator@example.com".into()),
        exp: (Utc::now().timestamp() + 3600) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

pub fn get(uri: &str, authorized: bool) -> Request<Body> {
    let mut req = Request::builder().uri(uri);
    if authorized {
        req = req.header("authorization", format!("Bearer {}", token()));
    }
    req.body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {}", token()))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn send(app: &Router, req: Request<Body>) -> (u16, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status().as_u16();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}
