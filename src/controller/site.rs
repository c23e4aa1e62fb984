use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::{GridMode, LoadId};

/// Operator-controlled site state stamped into every new reading
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SiteView {
    pub switches: BTreeMap<LoadId, bool>,
    pub grid_mode: GridMode,
}

/// Last acknowledged relay states and selected grid mode.
///
/// Written only after the actuation cloud acknowledges a command, so it never
/// reports a state the device was not asked to take.
#[derive(Debug, Default)]
pub struct SiteState {
    inner: RwLock<SiteView>,
}

impl SiteState {
    pub fn new(loads: impl IntoIterator<Item = LoadId>) -> Self {
        let switches = loads.into_iter().map(|id| (id, false)).collect();
        Self {
            inner: RwLock::new(SiteView {
                switches,
                grid_mode: GridMode::default(),
            }),
        }
    }

    pub fn view(&self) -> SiteView {
        self.inner.read().clone()
    }

    pub fn switch(&self, load: LoadId) -> Option<bool> {
        self.inner.read().switches.get(&load).copied()
    }

    pub fn set_switch(&self, load: LoadId, on: bool) {
        self.inner.write().switches.insert(load, on);
    }

    pub fn grid_mode(&self) -> GridMode {
        self.inner.read().grid_mode
    }

    pub fn set_grid_mode(&self, mode: GridMode) {
        self.inner.write().grid_mode = mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switches_start_off() {
        let site = SiteState::new([LoadId::Light, LoadId::Pump]);
        assert_eq!(site.switch(LoadId::Light), Some(false));
        assert_eq!(site.switch(LoadId::Fan), None);
        site.set_switch(LoadId::Pump, true);
        assert_eq!(site.view().switches[&LoadId::Pump], true);
    }

    #[test]
    fn test_grid_mode() {
        let site = SiteState::default();
        assert_eq!(site.grid_mode(), GridMode::Hybrid);
        site.set_grid_mode(GridMode::Solar);
        assert_eq!(site.view().grid_mode, GridMode::Solar);
    }
}
