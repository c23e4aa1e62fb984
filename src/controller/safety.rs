use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{info, warn};

use crate::config::InterlockConfig;
use crate::domain::{LoadId, LoadTier, LockState};

/// Interlock event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SafetyEvent {
    /// SOC fell below the lock threshold
    Locked {
        load: LoadId,
        soc_percent: f64,
        threshold_percent: f64,
    },
    /// SOC recovered to the unlock threshold
    Unlocked {
        load: LoadId,
        soc_percent: f64,
        threshold_percent: f64,
    },
    /// A command for a locked load was refused
    CommandRejected {
        load: LoadId,
        desired_state: bool,
        soc_percent: Option<f64>,
    },
}

/// Per-tier behaviour of the interlock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierRule {
    /// Commands are refused while SOC holds the load locked
    pub soc_interlock: bool,
}

/// Rule table keyed by tier
#[derive(Debug, Clone)]
pub struct TierPolicy {
    rules: HashMap<LoadTier, TierRule>,
}

impl Default for TierPolicy {
    fn default() -> Self {
        let rules = HashMap::from([
            (LoadTier::Essential, TierRule { soc_interlock: false }),
            (LoadTier::SemiEssential, TierRule { soc_interlock: false }),
            (LoadTier::NonEssential, TierRule { soc_interlock: true }),
        ]);
        Self { rules }
    }
}

impl TierPolicy {
    pub fn rule(&self, tier: LoadTier) -> TierRule {
        self.rules
            .get(&tier)
            .copied()
            .unwrap_or(TierRule { soc_interlock: true })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    SafetyLocked,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::SafetyLocked => "safety_locked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Rejected(RejectReason),
}

/// Interlock view of one load
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadLockStatus {
    pub load: LoadId,
    pub tier: LoadTier,
    pub interlocked: bool,
    pub state: LockState,
}

#[derive(Debug, Default)]
struct InterlockState {
    /// Absent until the first SOC observation
    locks: BTreeMap<LoadId, LockState>,
    last_soc: Option<f64>,
    events: VecDeque<(DateTime<Utc>, SafetyEvent)>,
}

/// SOC-driven interlock for non-essential loads.
///
/// Each interlocked load is a two-state machine with hysteresis: it locks when
/// SOC drops below `lock_threshold` and unlocks only once SOC is back at or
/// above `unlock_threshold`. Values in between keep the current state.
/// Interlocked loads are refused every command while locked, turning off
/// included, and also before any SOC has been seen.
pub struct SafetyInterlock {
    tiers: BTreeMap<LoadId, LoadTier>,
    policy: TierPolicy,
    lock_threshold: f64,
    unlock_threshold: f64,
    max_event_history: usize,
    state: Mutex<InterlockState>,
}

impl SafetyInterlock {
    pub fn new(cfg: &InterlockConfig, tiers: BTreeMap<LoadId, LoadTier>) -> Self {
        Self::with_policy(cfg, tiers, TierPolicy::default())
    }

    pub fn with_policy(cfg: &InterlockConfig, tiers: BTreeMap<LoadId, LoadTier>, policy: TierPolicy) -> Self {
        Self {
            tiers,
            policy,
            lock_threshold: cfg.lock_threshold,
            unlock_threshold: cfg.unlock_threshold,
            max_event_history: cfg.event_history.max(1),
            state: Mutex::new(InterlockState::default()),
        }
    }

    fn interlocked(&self, load: LoadId) -> bool {
        match self.tiers.get(&load) {
            Some(tier) => self.policy.rule(*tier).soc_interlock,
            None => true,
        }
    }

    /// Feed a new SOC observation through every interlocked load's state machine
    pub fn observe(&self, soc_percent: f64) {
        let now = Utc::now();
        let mut st = self.state.lock();
        st.last_soc = Some(soc_percent);

        for load in self.tiers.keys().copied().filter(|l| self.interlocked(*l)) {
            let current = st.locks.get(&load).copied();
            let next = match current {
                None if soc_percent < self.lock_threshold => LockState::Locked,
                None => LockState::Unlocked,
                Some(LockState::Unlocked) if soc_percent < self.lock_threshold => LockState::Locked,
                Some(LockState::Locked) if soc_percent >= self.unlock_threshold => LockState::Unlocked,
                Some(state) => state,
            };
            if current == Some(next) {
                continue;
            }
            st.locks.insert(load, next);

            let event = match next {
                LockState::Locked => {
                    warn!(%load, soc_percent, threshold = self.lock_threshold, "load locked by SOC interlock");
                    SafetyEvent::Locked {
                        load,
                        soc_percent,
                        threshold_percent: self.lock_threshold,
                    }
                }
                LockState::Unlocked => {
                    if current.is_some() {
                        info!(%load, soc_percent, threshold = self.unlock_threshold, "load unlocked by SOC interlock");
                    }
                    SafetyEvent::Unlocked {
                        load,
                        soc_percent,
                        threshold_percent: self.unlock_threshold,
                    }
                }
            };
            self.record_event(&mut st, now, event);
        }
    }

    /// Decide whether `load` may be switched to `desired_state`.
    ///
    /// `soc_percent` is the SOC of the latest snapshot; it is observed before
    /// deciding so the decision never lags the data the caller saw.
    pub fn authorize(&self, load: LoadId, desired_state: bool, soc_percent: Option<f64>) -> Decision {
        if !self.interlocked(load) {
            return Decision::Allowed;
        }
        if let Some(soc) = soc_percent {
            self.observe(soc);
        }

        let mut st = self.state.lock();
        if st.locks.get(&load) == Some(&LockState::Unlocked) {
            return Decision::Allowed;
        }
        let soc = st.last_soc;
        self.record_event(
            &mut st,
            Utc::now(),
            SafetyEvent::CommandRejected {
                load,
                desired_state,
                soc_percent: soc,
            },
        );
        info!(%load, desired_state, soc_percent = ?soc, "command rejected by SOC interlock");
        Decision::Rejected(RejectReason::SafetyLocked)
    }

    pub fn lock_state(&self, load: LoadId) -> LockState {
        if !self.interlocked(load) {
            return LockState::Unlocked;
        }
        self.state
            .lock()
            .locks
            .get(&load)
            .copied()
            .unwrap_or(LockState::Locked)
    }

    pub fn status(&self) -> Vec<LoadLockStatus> {
        self.tiers
            .iter()
            .map(|(load, tier)| LoadLockStatus {
                load: *load,
                tier: *tier,
                interlocked: self.interlocked(*load),
                state: self.lock_state(*load),
            })
            .collect()
    }

    fn record_event(&self, st: &mut InterlockState, timestamp: DateTime<Utc>, event: SafetyEvent) {
        st.events.push_back((timestamp, event));
        if st.events.len() > self.max_event_history {
            st.events.pop_front();
        }
    }

    /// Most recent interlock events, oldest first
    pub fn recent_events(&self, count: usize) -> Vec<(DateTime<Utc>, SafetyEvent)> {
        let st = self.state.lock();
        let start = st.events.len().saturating_sub(count);
        st.events.iter().skip(start).cloned().collect()
    }

    pub fn thresholds(&self) -> (f64, f64) {
        (self.lock_threshold, self.unlock_threshold)
    }
}
