use std::rc::Rc;

use serde::Deserialize;

use super::{payload, update};
use crate::store::action::Action;

pub const DOMAIN: &str = "game";

pub const UPDATE_SCORE: &str = "game/updateScore";
pub const ADD_SCORE: &str = "game/addScore";
pub const SET_LEVEL: &str = "game/setLevel";
pub const SET_PAUSED: &str = "game/setPaused";
pub const RESET: &str = "game/reset";

/// Score and progression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    pub score: u64,
    pub level: u32,
    pub sublevel: u32,
    /// Consecutive `addScore` hits since the last reset or explicit score set.
    pub combo: u32,
    pub paused: bool,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            score: 0,
            level: 1,
            sublevel: 0,
            combo: 0,
            paused: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LevelPayload {
    level: u32,
    #[serde(default)]
    sublevel: u32,
}

pub fn update_score(score: u64) -> Action {
    Action::new(UPDATE_SCORE, score)
}

pub fn add_score(points: u64) -> Action {
    Action::new(ADD_SCORE, points)
}

pub fn set_level(level: u32, sublevel: u32) -> Action {
    Action::new(SET_LEVEL, serde_json::json!({ "level": level, "sublevel": sublevel }))
}

pub fn set_paused(paused: bool) -> Action {
    Action::new(SET_PAUSED, paused)
}

pub fn reset() -> Action {
    Action::bare(RESET)
}

pub fn reduce(state: &Rc<GameState>, action: &Action) -> Rc<GameState> {
    match action.kind() {
        UPDATE_SCORE => match payload::<u64>(action) {
            Some(score) => update(state, |s| {
                s.score = score;
                s.combo = 0;
            }),
            None => Rc::clone(state),
        },
        ADD_SCORE => match payload::<u64>(action) {
            Some(points) => update(state, |s| {
                s.score = s.score.saturating_add(points);
                s.combo = s.combo.saturating_add(1);
            }),
            None => Rc::clone(state),
        },
        SET_LEVEL => match payload::<LevelPayload>(action) {
            Some(p) => update(state, |s| {
                s.level = p.level;
                s.sublevel = p.sublevel;
            }),
            None => Rc::clone(state),
        },
        SET_PAUSED => match payload::<bool>(action) {
            Some(paused) => update(state, |s| s.paused = paused),
            None => Rc::clone(state),
        },
        RESET => update(state, |s| *s = GameState::default()),
        _ => Rc::clone(state),
    }
}
