mod common;

use common::{get, harness, post_json, send, ScriptedFeed};
use serde_json::json;
use solar_telemetry_hub::domain::LoadId;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_upstream_fetch() {
    let h = harness(ScriptedFeed::with_delay(65.0, Duration::from_millis(150))).await;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..25 {
        let app = h.app.clone();
        tasks.spawn(async move { send(&app, get("/api/v1/snapshot", true)).await });
    }
    while let Some(res) = tasks.join_next().await {
        let (status, body) = res.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body["current"]["battery"]["soc_percent"], 65.0);
    }
    assert_eq!(h.feed.calls(), 1);
    h.state.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_toggles_end_in_last_acknowledged_state() {
    let h = harness(ScriptedFeed::new(90.0)).await;

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..10 {
        let app = h.app.clone();
        let on = i % 2 == 0;
        tasks.spawn(async move {
            send(&app, post_json("/api/v1/load/control", json!({"device": "pump", "state": on}))).await
        });
    }
    while let Some(res) = tasks.join_next().await {
        assert_eq!(res.unwrap().0, 200);
    }

    let writes = h.relays.writes.lock().clone();
    assert_eq!(writes.len(), 10);
    let last = writes.last().map(|(_, on)| *on);
    assert_eq!(h.state.site.switch(LoadId::Pump), last);
    h.state.shutdown().await;
}

#[tokio::test]
async fn dead_session_does_not_starve_live_one() {
    let h = harness(ScriptedFeed::new(70.0)).await;
    let broadcaster = h.state.broadcaster.clone();
    let (_live, mut live_rx) = broadcaster.register(None).unwrap();
    let (_dead, dead_rx) = broadcaster.register(None).unwrap();
    drop(dead_rx);

    let outcome = broadcaster.tick(&h.state.cache, Duration::from_secs(1)).await;
    assert_eq!(outcome.delivered, 1);
    assert_eq!(outcome.dropped, 1);
    assert!(live_rx.recv().await.is_some());

    broadcaster.tick(&h.state.cache, Duration::from_secs(1)).await;
    assert!(live_rx.recv().await.is_some());
    assert_eq!(broadcaster.session_count(), 1);
    h.state.shutdown().await;
}
