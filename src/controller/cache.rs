use chrono::{Duration as ChronoDuration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use super::site::{SiteState, SiteView};
use crate::config::TelemetryConfig;
use crate::domain::{
    BatteryReading, GridReading, LoadReading, Reading, Snapshot, SolarReading,
};
use crate::forecast::{Ewma, ForecastEngine};
use crate::hardware::{DeviceSample, TelemetryProvider, UpstreamError};
use crate::repo::HistoryStore;

type SharedRefresh = Shared<BoxFuture<'static, Arc<Snapshot>>>;

/// In-flight refresh tagged with the invalidation epoch it started under
struct InFlight {
    epoch: u64,
    refresh: SharedRefresh,
}

/// Timing and derivation knobs for the cache
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub offline_threshold: Duration,
    pub fetch_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub batch_size: u32,
    pub nominal_soh_percent: f64,
}

impl From<&TelemetryConfig> for CacheSettings {
    fn from(cfg: &TelemetryConfig) -> Self {
        Self {
            ttl: cfg.ttl(),
            offline_threshold: cfg.offline_threshold(),
            fetch_timeout: cfg.fetch_timeout(),
            max_retries: cfg.max_retries,
            retry_backoff: cfg.retry_backoff(),
            batch_size: cfg.batch_size,
            nominal_soh_percent: cfg.nominal_soh_percent,
        }
    }
}

#[derive(Debug)]
struct CacheState {
    snapshot: Arc<Snapshot>,
    /// Completion time of the last refresh attempt, successful or not
    checked_at: Option<Instant>,
    /// Last refresh that brought a sample newer than the history tail
    last_success: Option<Instant>,
    /// Bumped by `invalidate`
    epoch: u64,
    /// Epoch the current snapshot was refreshed under
    refreshed_epoch: u64,
}

struct Inner {
    provider: Arc<dyn TelemetryProvider>,
    history: Arc<HistoryStore>,
    engine: ForecastEngine,
    /// Solar EWMA fed once per appended reading
    ewma: Mutex<Ewma>,
    site: Arc<SiteState>,
    settings: CacheSettings,
    state: RwLock<CacheState>,
    in_flight: Mutex<Option<InFlight>>,
    updates: watch::Sender<Arc<Snapshot>>,
    fetch_attempts: AtomicU64,
}

/// TTL cache in front of the telemetry provider.
///
/// At most one refresh runs at a time. Callers arriving while it is in flight
/// await the same shared result. The refresh runs as its own task so a caller
/// that gives up does not abort it for everyone else.
#[derive(Clone)]
pub struct TelemetryCache {
    inner: Arc<Inner>,
}

impl TelemetryCache {
    pub fn new(
        provider: Arc<dyn TelemetryProvider>,
        history: Arc<HistoryStore>,
        engine: ForecastEngine,
        site: Arc<SiteState>,
        settings: CacheSettings,
    ) -> Self {
        let initial = Arc::new(Snapshot::empty());
        let (updates, _) = watch::channel(initial.clone());
        let ewma = Mutex::new(engine.ewma());
        Self {
            inner: Arc::new(Inner {
                provider,
                history,
                engine,
                ewma,
                site,
                settings,
                state: RwLock::new(CacheState {
                    snapshot: initial,
                    checked_at: None,
                    last_success: None,
                    epoch: 0,
                    refreshed_epoch: 0,
                }),
                in_flight: Mutex::new(None),
                updates,
                fetch_attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Current snapshot, refreshing first if it is older than the TTL or was
    /// invalidated. Never fails: upstream errors yield the last good snapshot
    /// marked stale.
    pub async fn get(&self) -> Arc<Snapshot> {
        if let Some(snapshot) = self.inner.fresh() {
            return snapshot;
        }
        let refresh = {
            let mut slot = self.inner.in_flight.lock();
            let epoch = self.inner.state.read().epoch;
            match slot.as_ref() {
                Some(flight) if flight.epoch == epoch => flight.refresh.clone(),
                _ => {
                    // a refresh may have landed between the check and the lock
                    if let Some(snapshot) = self.inner.fresh() {
                        return snapshot;
                    }
                    let refresh = Inner::spawn_refresh(self.inner.clone(), epoch);
                    *slot = Some(InFlight {
                        epoch,
                        refresh: refresh.clone(),
                    });
                    refresh
                }
            }
        };
        refresh.await
    }

    /// Last published snapshot, without touching the upstream
    pub fn current(&self) -> Arc<Snapshot> {
        self.inner.state.read().snapshot.clone()
    }

    /// Force the next `get` to refresh regardless of age.
    ///
    /// A refresh already in flight is not joined by later callers; they start
    /// a new fetch, and the older result is not published over the newer one.
    pub fn invalidate(&self) {
        let mut st = self.inner.state.write();
        st.epoch += 1;
        debug!(epoch = st.epoch, "telemetry cache invalidated");
    }

    /// Receiver notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.inner.updates.subscribe()
    }

    /// Liveness computed against the clock now, not at last publication
    pub fn device_online(&self) -> bool {
        let last_success = self.inner.state.read().last_success;
        self.inner.is_online(last_success, Instant::now())
    }

    /// Upstream fetch attempts made so far, retries included
    pub fn fetch_attempts(&self) -> u64 {
        self.inner.fetch_attempts.load(Ordering::Relaxed)
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.inner.history
    }
}

impl Inner {
    fn is_online(&self, last_success: Option<Instant>, now: Instant) -> bool {
        last_success.is_some_and(|t| now.saturating_duration_since(t) < self.settings.offline_threshold)
    }

    /// Snapshot if it is within the TTL and not invalidated. Republishes it
    /// with a corrected liveness flag when the offline threshold was crossed
    /// since publication.
    fn fresh(&self) -> Option<Arc<Snapshot>> {
        let now = Instant::now();
        let online = {
            let st = self.state.read();
            let checked_at = st.checked_at?;
            if st.refreshed_epoch != st.epoch
                || now.saturating_duration_since(checked_at) >= self.settings.ttl
            {
                return None;
            }
            let online = self.is_online(st.last_success, now);
            if online == st.snapshot.device_online {
                return Some(st.snapshot.clone());
            }
            online
        };

        let snapshot = {
            let mut st = self.state.write();
            if st.snapshot.device_online == online {
                return Some(st.snapshot.clone());
            }
            let updated = Arc::new(st.snapshot.with_device_online(online));
            st.snapshot = updated.clone();
            updated
        };
        info!(device_online = online, "device liveness changed");
        self.updates.send_replace(snapshot.clone());
        Some(snapshot)
    }

    fn spawn_refresh(this: Arc<Self>, epoch: u64) -> SharedRefresh {
        let worker = this.clone();
        let handle = tokio::spawn(async move { worker.refresh(epoch).await });
        async move {
            match handle.await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    error!(error = %e, "telemetry refresh task failed");
                    this.clear_in_flight(epoch);
                    this.state.read().snapshot.clone()
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Release the slot unless a newer refresh has replaced it
    fn clear_in_flight(&self, epoch: u64) {
        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|flight| flight.epoch == epoch) {
            slot.take();
        }
    }

    async fn refresh(&self, epoch: u64) -> Arc<Snapshot> {
        let snapshot = match self.fetch_with_retry().await {
            Ok(samples) => self.ingest(samples, epoch),
            Err(e) => {
                warn!(error = %e, "telemetry refresh failed, serving last good snapshot");
                self.publish_failure(epoch)
            }
        };
        self.clear_in_flight(epoch);
        snapshot
    }

    async fn fetch_with_retry(&self) -> Result<Vec<DeviceSample>, UpstreamError> {
        let mut attempt: u32 = 0;
        loop {
            self.fetch_attempts.fetch_add(1, Ordering::Relaxed);
            let result = match timeout(
                self.settings.fetch_timeout,
                self.provider.fetch_batch(self.settings.batch_size),
            )
            .await
            {
                Ok(Ok(samples)) if samples.is_empty() => {
                    Err(UpstreamError::Decode("feed contained no samples".into()))
                }
                Ok(result) => result,
                Err(_) => Err(UpstreamError::Timeout(self.settings.fetch_timeout)),
            };

            match result {
                Ok(samples) => return Ok(samples),
                Err(e) if attempt < self.settings.max_retries => {
                    let delay = self.settings.retry_backoff.saturating_mul(2u32.saturating_pow(attempt));
                    debug!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "telemetry fetch failed, retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Turn a fetched batch into readings, extend history and publish
    fn ingest(&self, mut samples: Vec<DeviceSample>, epoch: u64) -> Arc<Snapshot> {
        samples.sort_by_key(|s| s.timestamp);
        let site = self.site.view();
        let energy = cumulative_energy_wh(&samples);

        let mut appended = 0usize;
        // appends and the running EWMA advance together under one lock
        let running_ewma = {
            let mut ewma = self.ewma.lock();
            let tail = self.history.latest_timestamp();
            for (i, sample) in samples.iter().enumerate() {
                if tail.is_some_and(|t| sample.timestamp <= t) {
                    continue;
                }
                let energy_24h = trailing_24h_kwh(&samples, &energy, i);
                let reading = Arc::new(self.derive_reading(sample, energy_24h, &site));
                let power_w = reading.solar.power_w;
                match self.history.append(reading) {
                    Ok(()) => {
                        ewma.update(power_w);
                        appended += 1;
                    }
                    Err(e) => warn!(error = %e, "dropping out-of-order reading"),
                }
            }
            ewma.value()
        };

        // the feed did not advance: keep the previous reading but restamp switches
        let reading = match (appended, self.history.latest()) {
            (0, Some(latest)) if latest.load.switches != site.switches || latest.grid.mode != site.grid_mode => {
                let mut restamped = (*latest).clone();
                restamped.load.switches = site.switches.clone();
                restamped.grid.mode = site.grid_mode;
                Some(Arc::new(restamped))
            }
            (_, latest) => latest,
        };

        let window = self.history.recent(self.engine.window());
        let forecast = self.engine.compute_with(&window, running_ewma);
        debug!(fetched = samples.len(), appended, history = self.history.len(), "telemetry refreshed");

        // a frozen feed answers but is not a live device
        let now = Instant::now();
        let advanced = appended > 0;
        let (device_online, last_success) = if advanced {
            (true, Some(Utc::now()))
        } else {
            let st = self.state.read();
            (self.is_online(st.last_success, now), st.snapshot.last_success)
        };
        if !advanced {
            debug!(device_online, "telemetry feed did not advance");
        }
        let snapshot = Snapshot {
            reading,
            device_online,
            stale: false,
            forecast: Some(forecast),
            last_success,
            published_at: Utc::now(),
        };
        self.publish(snapshot, now, epoch, advanced)
    }

    fn publish_failure(&self, epoch: u64) -> Arc<Snapshot> {
        let now = Instant::now();
        let (previous, last_success) = {
            let st = self.state.read();
            (st.snapshot.clone(), st.last_success)
        };
        let snapshot = Snapshot {
            device_online: self.is_online(last_success, now),
            stale: previous.reading.is_some(),
            published_at: Utc::now(),
            ..(*previous).clone()
        };
        self.publish(snapshot, now, epoch, false)
    }

    fn publish(&self, snapshot: Snapshot, now: Instant, epoch: u64, success: bool) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        {
            let mut st = self.state.write();
            if epoch < st.refreshed_epoch {
                debug!(epoch, current = st.refreshed_epoch, "discarding superseded refresh");
                return st.snapshot.clone();
            }
            if !st.snapshot.device_online && snapshot.device_online {
                info!("device back online");
            }
            st.snapshot = snapshot.clone();
            st.checked_at = Some(now);
            st.refreshed_epoch = epoch;
            if success {
                st.last_success = Some(now);
            }
        }
        self.updates.send_replace(snapshot.clone());
        snapshot
    }

    fn derive_reading(&self, sample: &DeviceSample, energy_24h_kwh: f64, site: &SiteView) -> Reading {
        let solar_power_w = sample.solar_power_w();
        Reading {
            timestamp: sample.timestamp,
            solar: SolarReading {
                power_w: solar_power_w,
                voltage_v: sample.solar_voltage_v,
                current_a: sample.solar_current_a,
                energy_24h_kwh,
                energy_7d_kwh: round2(energy_24h_kwh * 7.0),
            },
            battery: BatteryReading {
                voltage_v: sample.battery_voltage_v,
                current_a: sample.battery_current_a,
                soc_percent: sample.battery_soc_percent,
                soh_percent: self.settings.nominal_soh_percent,
                temperature_c: sample.battery_temperature_c.unwrap_or(25.0),
                charging: sample.battery_current_a > 0.0,
            },
            load: LoadReading {
                power_w: sample.load_power_w,
                current_a: sample.load_current_a,
                switches: site.switches.clone(),
            },
            grid: GridReading {
                online: true,
                power_w: (sample.load_power_w - solar_power_w).max(0.0),
                mode: site.grid_mode,
            },
        }
        .clamped()
    }
}

/// Running trapezoidal integral of solar power (Wh) at each sample of a sorted batch
fn cumulative_energy_wh(samples: &[DeviceSample]) -> Vec<f64> {
    let mut acc = 0.0;
    let mut out = Vec::with_capacity(samples.len());
    for (i, s) in samples.iter().enumerate() {
        if i > 0 {
            let prev = &samples[i - 1];
            let dt_h = (s.timestamp - prev.timestamp).num_milliseconds().max(0) as f64 / 3_600_000.0;
            acc += (prev.solar_power_w() + s.solar_power_w()) / 2.0 * dt_h;
        }
        out.push(acc);
    }
    out
}

/// Energy harvested in the 24h ending at sample `i`, in kWh rounded to 2 places
fn trailing_24h_kwh(samples: &[DeviceSample], cumulative_wh: &[f64], i: usize) -> f64 {
    let since = samples[i].timestamp - ChronoDuration::hours(24);
    let start = samples[..=i].partition_point(|s| s.timestamp < since);
    round2((cumulative_wh[i] - cumulative_wh[start]) / 1000.0)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
