use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{payload, update};
use crate::store::action::Action;

pub const DOMAIN: &str = "system";

pub const SET_PERFORMANCE_LEVEL: &str = "system/setPerformanceLevel";
pub const UPDATE_FPS: &str = "system/updateFps";
pub const SET_DEBUG: &str = "system/setDebug";

/// Quality tier the host renders at.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceLevel {
    Low,
    Medium,
    #[default]
    High,
    Ultra,
}

impl PerformanceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Ultra => "ultra",
        }
    }
}

impl fmt::Display for PerformanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PerformanceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "ultra" => Ok(Self::Ultra),
            other => Err(format!("unknown performance level `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SystemState {
    pub performance_level: PerformanceLevel,
    /// Last reported frame rate.
    pub fps: f64,
    pub debug: bool,
}

pub fn set_performance_level(level: PerformanceLevel) -> Action {
    Action::new(SET_PERFORMANCE_LEVEL, level.as_str())
}

pub fn update_fps(fps: f64) -> Action {
    Action::new(UPDATE_FPS, fps)
}

pub fn set_debug(debug: bool) -> Action {
    Action::new(SET_DEBUG, debug)
}

pub fn reduce(state: &Rc<SystemState>, action: &Action) -> Rc<SystemState> {
    match action.kind() {
        SET_PERFORMANCE_LEVEL => match payload::<PerformanceLevel>(action) {
            Some(level) => update(state, |s| s.performance_level = level),
            None => Rc::clone(state),
        },
        UPDATE_FPS => match payload::<f64>(action) {
            Some(fps) if fps.is_finite() && fps >= 0.0 => update(state, |s| s.fps = fps),
            _ => Rc::clone(state),
        },
        SET_DEBUG => match payload::<bool>(action) {
            Some(debug) => update(state, |s| s.debug = debug),
            None => Rc::clone(state),
        },
        _ => Rc::clone(state),
    }
}
