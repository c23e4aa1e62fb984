use serde::{Deserialize, Serialize};

/// Controllable loads wired to the site's relay board
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    strum::Display, strum::EnumString, strum::EnumIter, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LoadId {
    Light,
    Fan,
    Pump,
}

/// Criticality class of a load. Governs whether the SOC interlock applies.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
    strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LoadTier {
    Essential,
    SemiEssential,
    NonEssential,
}

/// Interlock state of a single load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LockState {
    Locked,
    Unlocked,
}

impl LockState {
    pub fn is_locked(self) -> bool {
        matches!(self, LockState::Locked)
    }
}
