pub mod actuation;
pub mod broadcast;
pub mod cache;
pub mod safety;
pub mod site;

use anyhow::Result;
use std::sync::Arc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};

use crate::auth::{CredentialValidator, JwtValidator};
use crate::config::Config;
use crate::forecast::ForecastEngine;
use crate::hardware::{DeviceFactory, Devices};
use crate::repo::HistoryStore;

pub use actuation::{ControlError, ControlOutcome, LoadController};
pub use broadcast::{BroadcastError, Broadcaster, FanOut, LiveUpdate, SessionId};
pub use cache::{CacheSettings, TelemetryCache};
pub use safety::{Decision, LoadLockStatus, RejectReason, SafetyEvent, SafetyInterlock, TierPolicy, TierRule};
pub use site::{SiteState, SiteView};

/// Shared service state handed to every request handler.
///
/// Cloning is cheap; all components sit behind `Arc`s. Background tasks are
/// started by `init`/`with_devices` and stopped by `shutdown`.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub cache: TelemetryCache,
    pub history: Arc<HistoryStore>,
    pub site: Arc<SiteState>,
    pub interlock: Arc<SafetyInterlock>,
    pub loads: Arc<LoadController>,
    pub broadcaster: Arc<Broadcaster>,
    pub auth: Arc<dyn CredentialValidator>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl AppState {
    /// Build devices for the configured hardware mode and start the service
    pub async fn init(cfg: Config) -> Result<Self> {
        let devices = DeviceFactory::new(cfg.hardware.mode).create(&cfg)?;
        Ok(Self::with_devices(cfg, devices).await)
    }

    /// Start the service on explicit devices
    pub async fn with_devices(cfg: Config, devices: Devices) -> Self {
        let auth: Arc<dyn CredentialValidator> = Arc::new(JwtValidator::new(&cfg.auth.jwt_secret));
        Self::assemble(cfg, devices, auth).await
    }

    pub async fn assemble(cfg: Config, devices: Devices, auth: Arc<dyn CredentialValidator>) -> Self {
        let load_ids: Vec<_> = cfg.loads.0.keys().copied().collect();
        let history = Arc::new(HistoryStore::new(cfg.history.capacity));
        let site = Arc::new(SiteState::new(load_ids.iter().copied()));
        let cache = TelemetryCache::new(
            devices.provider,
            history.clone(),
            ForecastEngine::new(cfg.forecast.clone()),
            site.clone(),
            CacheSettings::from(&cfg.telemetry),
        );
        let interlock = Arc::new(SafetyInterlock::new(&cfg.interlock, cfg.loads.tiers()));
        let loads = Arc::new(LoadController::new(
            devices.gateway,
            interlock.clone(),
            cache.clone(),
            site.clone(),
            load_ids,
            cfg.actuation.timeout(),
        ));
        let broadcaster = Arc::new(Broadcaster::new(&cfg.broadcast));

        loads.sync_from_device().await;

        let state = Self {
            cfg: Arc::new(cfg),
            cache,
            history,
            site,
            interlock,
            loads,
            broadcaster,
            auth,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        };
        state.spawn_background_tasks();
        state
    }

    fn spawn_background_tasks(&self) {
        self.tasks.spawn(self.broadcaster.clone().run(
            self.cache.clone(),
            self.cfg.broadcast.clone(),
            self.cancel.clone(),
        ));

        // keep lock states current even when nobody is issuing commands
        let interlock = self.interlock.clone();
        let mut updates = self.cache.subscribe();
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            warn!("snapshot channel closed, interlock follower stopping");
                            break;
                        }
                        let soc = updates.borrow_and_update().soc_percent();
                        if let Some(soc) = soc {
                            interlock.observe(soc);
                        }
                    }
                }
            }
        });
    }

    /// Stop background tasks and close live sessions. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.broadcaster.close_all();
        info!("background tasks stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
