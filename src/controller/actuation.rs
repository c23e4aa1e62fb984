use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use super::cache::TelemetryCache;
use super::safety::{Decision, RejectReason, SafetyInterlock};
use super::site::SiteState;
use crate::domain::LoadId;
use crate::hardware::{ActuationError, ActuationGateway};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ControlOutcome {
    Applied { load: LoadId, new_state: bool },
    Rejected { load: LoadId, reason: RejectReason },
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("load {0} is not configured")]
    UnknownLoad(LoadId),
    #[error("actuation of {load} failed: {source}")]
    ActuationFailed {
        load: LoadId,
        #[source]
        source: ActuationError,
    },
}

/// Applies load commands: interlock check, acknowledged write, state update.
///
/// Commands for the same load are serialized by a per-load async mutex, so
/// overlapping toggles land in a single order and the recorded state always
/// matches the last acknowledged write. Different loads proceed concurrently.
pub struct LoadController {
    gateway: Arc<dyn ActuationGateway>,
    interlock: Arc<SafetyInterlock>,
    cache: TelemetryCache,
    site: Arc<SiteState>,
    guards: BTreeMap<LoadId, Mutex<()>>,
    write_timeout: Duration,
}

impl LoadController {
    pub fn new(
        gateway: Arc<dyn ActuationGateway>,
        interlock: Arc<SafetyInterlock>,
        cache: TelemetryCache,
        site: Arc<SiteState>,
        loads: impl IntoIterator<Item = LoadId>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            interlock,
            cache,
            site,
            guards: loads.into_iter().map(|id| (id, Mutex::new(()))).collect(),
            write_timeout,
        }
    }

    pub fn loads(&self) -> impl Iterator<Item = LoadId> + '_ {
        self.guards.keys().copied()
    }

    /// Switch `load` to `desired_state`. A failed write is not retried and
    /// leaves the recorded state untouched.
    pub async fn set_state(&self, load: LoadId, desired_state: bool) -> Result<ControlOutcome, ControlError> {
        let guard = self.guards.get(&load).ok_or(ControlError::UnknownLoad(load))?;
        let _held = guard.lock().await;

        let soc = self.cache.get().await.soc_percent();
        if let Decision::Rejected(reason) = self.interlock.authorize(load, desired_state, soc) {
            return Ok(ControlOutcome::Rejected { load, reason });
        }

        let result = match timeout(self.write_timeout, self.gateway.write(load, desired_state)).await {
            Ok(result) => result,
            Err(_) => Err(ActuationError::Timeout(self.write_timeout)),
        };
        if let Err(source) = result {
            warn!(%load, desired_state, error = %source, "load actuation failed");
            return Err(ControlError::ActuationFailed { load, source });
        }

        self.site.set_switch(load, desired_state);
        self.cache.invalidate();
        info!(%load, new_state = desired_state, "load switched");
        Ok(ControlOutcome::Applied { load, new_state: desired_state })
    }

    /// Seed recorded relay states from the device. Best effort: loads without
    /// a status pin or that fail to answer keep their current state.
    pub async fn sync_from_device(&self) {
        for load in self.loads() {
            match timeout(self.write_timeout, self.gateway.read(load)).await {
                Ok(Ok(Some(on))) => self.site.set_switch(load, on),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!(%load, error = %e, "could not read relay state"),
                Err(_) => warn!(%load, "relay state read timed out"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ForecastConfig, InterlockConfig};
    use crate::domain::LoadTier;
    use crate::forecast::ForecastEngine;
    use crate::hardware::{DeviceSample, MockActuationGateway, TelemetryProvider, UpstreamError};
    use crate::repo::HistoryStore;
    use crate::controller::cache::CacheSettings;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedSoc(f64);

    #[async_trait]
    impl TelemetryProvider for FixedSoc {
        async fn fetch_batch(&self, _results: u32) -> Result<Vec<DeviceSample>, UpstreamError> {
            Ok(vec![DeviceSample {
                timestamp: Utc::now(),
                battery_soc_percent: self.0,
                ..Default::default()
            }])
        }
    }

    fn controller(gateway: Arc<dyn ActuationGateway>, soc: f64) -> (LoadController, Arc<SiteState>, TelemetryCache) {
        let loads = [LoadId::Light, LoadId::Pump];
        let site = Arc::new(SiteState::new(loads));
        let cache = TelemetryCache::new(
            Arc::new(FixedSoc(soc)),
            Arc::new(HistoryStore::new(10)),
            ForecastEngine::new(ForecastConfig::default()),
            site.clone(),
            CacheSettings {
                ttl: Duration::from_secs(10),
                offline_threshold: Duration::from_secs(60),
                fetch_timeout: Duration::from_secs(1),
                max_retries: 0,
                retry_backoff: Duration::from_millis(10),
                batch_size: 1,
                nominal_soh_percent: 100.0,
            },
        );
        let interlock = Arc::new(SafetyInterlock::new(
            &InterlockConfig::default(),
            BTreeMap::from([(LoadId::Light, LoadTier::Essential), (LoadId::Pump, LoadTier::NonEssential)]),
        ));
        let controller = LoadController::new(gateway, interlock, cache.clone(), site.clone(), loads, Duration::from_secs(1));
        (controller, site, cache)
    }

    #[tokio::test]
    async fn test_applied_command_updates_state_and_invalidates() {
        let mut gateway = MockActuationGateway::new();
        gateway
            .expect_write()
            .withf(|load, on| *load == LoadId::Pump && *on)
            .times(1)
            .returning(|_, _| Ok(()));
        let (controller, site, cache) = controller(Arc::new(gateway), 80.0);

        let outcome = controller.set_state(LoadId::Pump, true).await.unwrap();
        assert_eq!(outcome, ControlOutcome::Applied { load: LoadId::Pump, new_state: true });
        assert_eq!(site.switch(LoadId::Pump), Some(true));

        let fetches = cache.fetch_attempts();
        cache.get().await;
        assert_eq!(cache.fetch_attempts(), fetches + 1);
    }

    #[tokio::test]
    async fn test_low_soc_rejects_without_touching_device() {
        let mut gateway = MockActuationGateway::new();
        gateway.expect_write().never();
        let (controller, site, _) = controller(Arc::new(gateway), 15.0);

        let outcome = controller.set_state(LoadId::Pump, false).await.unwrap();
        assert_eq!(
            outcome,
            ControlOutcome::Rejected { load: LoadId::Pump, reason: RejectReason::SafetyLocked }
        );
        assert_eq!(site.switch(LoadId::Pump), Some(false));
    }

    #[tokio::test]
    async fn test_essential_load_allowed_at_low_soc() {
        let mut gateway = MockActuationGateway::new();
        gateway.expect_write().times(1).returning(|_, _| Ok(()));
        let (controller, _, _) = controller(Arc::new(gateway), 5.0);

        assert!(matches!(
            controller.set_state(LoadId::Light, true).await,
            Ok(ControlOutcome::Applied { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_unchanged() {
        let mut gateway = MockActuationGateway::new();
        gateway
            .expect_write()
            .times(1)
            .returning(|_, _| Err(ActuationError::Rejected(400)));
        let (controller, site, _) = controller(Arc::new(gateway), 80.0);

        let err = controller.set_state(LoadId::Light, true).await.unwrap_err();
        assert!(matches!(err, ControlError::ActuationFailed { load: LoadId::Light, .. }));
        assert_eq!(site.switch(LoadId::Light), Some(false));
    }

    #[tokio::test]
    async fn test_unconfigured_load_is_error() {
        let (controller, _, _) = controller(Arc::new(MockActuationGateway::new()), 80.0);
        assert!(matches!(
            controller.set_state(LoadId::Fan, true).await,
            Err(ControlError::UnknownLoad(LoadId::Fan))
        ));
    }

    /// Gateway that records writes and fails if two overlap
    struct SerialCheck {
        busy: AtomicBool,
        log: SyncMutex<Vec<bool>>,
    }

    #[async_trait]
    impl ActuationGateway for SerialCheck {
        async fn write(&self, _load: LoadId, on: bool) -> Result<(), ActuationError> {
            assert!(!self.busy.swap(true, Ordering::SeqCst), "overlapping writes");
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.log.lock().push(on);
            self.busy.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn read(&self, _load: LoadId) -> Result<Option<bool>, ActuationError> {
            Ok(None)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_toggles_are_serialized() {
        let gateway = Arc::new(SerialCheck {
            busy: AtomicBool::new(false),
            log: SyncMutex::new(Vec::new()),
        });
        let (controller, site, _) = controller(gateway.clone(), 90.0);
        let controller = Arc::new(controller);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let controller = controller.clone();
            tasks.spawn(async move { controller.set_state(LoadId::Pump, i % 2 == 0).await });
        }
        while let Some(res) = tasks.join_next().await {
            assert!(res.unwrap().is_ok());
        }

        let log = gateway.log.lock();
        assert_eq!(log.len(), 16);
        assert_eq!(site.switch(LoadId::Pump), log.last().copied());
    }

    #[tokio::test]
    async fn test_sync_from_device_seeds_switches() {
        let mut gateway = MockActuationGateway::new();
        gateway.expect_read().returning(|load| match load {
            LoadId::Pump => Ok(Some(true)),
            _ => Err(ActuationError::Rejected(500)),
        });
        let (controller, site, _) = controller(Arc::new(gateway), 80.0);

        controller.sync_from_device().await;
        assert_eq!(site.switch(LoadId::Pump), Some(true));
        assert_eq!(site.switch(LoadId::Light), Some(false));
    }
}
