use std::collections::BTreeMap;
use std::rc::Rc;

use super::{payload, update};
use crate::store::action::Action;

pub const DOMAIN: &str = "visualization";

pub const SWITCH_SYSTEM: &str = "visualization/switchSystem";
pub const UPDATE_PARAMETERS: &str = "visualization/updateParameters";
pub const RESET_PARAMETERS: &str = "visualization/resetParameters";
pub const SET_TRANSITIONING: &str = "visualization/setTransitioning";

/// Tunable engine parameters by name (`gridDensity`, `chaos`, ...).
pub type Parameters = BTreeMap<String, f64>;

/// Parameter set every engine starts from.
pub fn default_parameters() -> Parameters {
    [
        ("gridDensity", 15.0),
        ("morphFactor", 1.0),
        ("chaos", 0.2),
        ("speed", 1.0),
        ("hue", 200.0),
        ("intensity", 0.5),
        ("saturation", 0.8),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisualizationState {
    pub active_system: String,
    pub parameters: Parameters,
    /// Set by the host while an engine switch is in flight.
    pub transitioning: bool,
}

impl Default for VisualizationState {
    fn default() -> Self {
        Self {
            active_system: "faceted".to_string(),
            parameters: default_parameters(),
            transitioning: false,
        }
    }
}

pub fn switch_system(name: &str) -> Action {
    Action::new(SWITCH_SYSTEM, name)
}

pub fn update_parameters(params: &Parameters) -> Action {
    // A BTreeMap<String, f64> always has a JSON form; non-finite values become null.
    let payload = params
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::from(*v)))
        .collect::<serde_json::Map<_, _>>();
    Action::new(UPDATE_PARAMETERS, payload)
}

pub fn reset_parameters() -> Action {
    Action::bare(RESET_PARAMETERS)
}

pub fn set_transitioning(transitioning: bool) -> Action {
    Action::new(SET_TRANSITIONING, transitioning)
}

pub fn reduce(state: &Rc<VisualizationState>, action: &Action) -> Rc<VisualizationState> {
    match action.kind() {
        SWITCH_SYSTEM => match payload::<String>(action) {
            Some(name) => update(state, |s| {
                s.active_system = name;
                s.transitioning = false;
            }),
            None => Rc::clone(state),
        },
        UPDATE_PARAMETERS => match payload::<Parameters>(action) {
            Some(params) => update(state, |s| s.parameters.extend(params)),
            None => Rc::clone(state),
        },
        RESET_PARAMETERS => update(state, |s| s.parameters = default_parameters()),
        SET_TRANSITIONING => match payload::<bool>(action) {
            Some(flag) => update(state, |s| s.transitioning = flag),
            None => Rc::clone(state),
        },
        _ => Rc::clone(state),
    }
}
