//! Headless studio host.
//!
//! Wires a persisted store to a coordinator with two in-process engines and
//! runs a short deterministic frame loop: switch, tune, pulse, persist.

use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use lattice_engine::async_trait;
use lattice_engine::coordinator::{
    Capability, CoordinatorConfig, Engine, EngineContext, EngineCoordinator, EngineFactory, MemoryCanvasPool,
    MemoryResourcePool, ResourceRequirements,
};
use lattice_engine::logging::{init_logging, LoggingConfig};
use lattice_engine::store::domains::visualization::{self, Parameters};
use lattice_engine::store::domains::{game, system};
use lattice_engine::store::{FileStorage, StateStore, StoreConfig};
use lattice_engine::time::{FrameClock, ManualScheduler};
use serde_json::{json, Value};

const FRAMES: u32 = 90;
const FRAME: Duration = Duration::from_micros(16_667);

/// Minimal engine: tracks a rotation driven by `speed` and reacts to pulses.
struct PatternEngine {
    name: String,
    active: bool,
    rotation: f64,
    speed: f64,
    last_timestamp: Option<f64>,
    frames: u64,
}

impl PatternEngine {
    fn factory() -> EngineFactory {
        let quad = vec![-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];
        EngineFactory::new(|ctx: EngineContext| {
            log::debug!(
                "building `{}` on {} layer(s), {} shared resource(s)",
                ctx.name,
                ctx.canvases.len(),
                ctx.resources.records().count()
            );
            Ok(PatternEngine {
                name: ctx.name,
                active: false,
                rotation: 0.0,
                speed: 1.0,
                last_timestamp: None,
                frames: 0,
            })
        })
        .with_requirements(ResourceRequirements::default().buffer("quad", quad).gradient().noise())
    }
}

#[async_trait(?Send)]
impl Engine for PatternEngine {
    fn supports(&self, capability: Capability<'_>) -> bool {
        match capability {
            Capability::Hook(hook) => hook == "pulse",
            _ => true,
        }
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
        if !active {
            self.last_timestamp = None;
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    async fn save_state(&mut self) -> anyhow::Result<Value> {
        Ok(json!({ "rotation": self.rotation, "frames": self.frames }))
    }

    async fn restore_state(&mut self, state: Value) -> anyhow::Result<()> {
        self.rotation = state["rotation"].as_f64().context("missing rotation")?;
        Ok(())
    }

    fn render(&mut self, timestamp: f64) {
        if let Some(last) = self.last_timestamp {
            self.rotation += (timestamp - last) / 1000.0 * self.speed;
        }
        self.last_timestamp = Some(timestamp);
        self.frames += 1;
    }

    fn set_parameters(&mut self, params: &Parameters) -> anyhow::Result<()> {
        if let Some(speed) = params.get("speed") {
            anyhow::ensure!(speed.is_finite(), "speed must be finite");
            self.speed = *speed;
        }
        Ok(())
    }

    fn call_hook(&mut self, hook: &str, payload: &Value) -> anyhow::Result<()> {
        let strength = payload["strength"].as_f64().unwrap_or(1.0);
        self.rotation += strength * 0.1;
        log::info!("`{}` handled `{hook}` (strength {strength})", self.name);
        Ok(())
    }

    fn destroy(&mut self) {
        log::debug!("`{}` rendered {} frame(s)", self.name, self.frames);
    }
}

fn main() -> anyhow::Result<()> {
    init_logging(LoggingConfig::default());

    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("lattice-studio"));
    let storage = Rc::new(FileStorage::open(&dir).with_context(|| format!("opening {}", dir.display()))?);
    let scheduler = Rc::new(ManualScheduler::new());

    let store = StateStore::with_default_domains(
        StoreConfig {
            enable_performance_logging: true,
            ..StoreConfig::default()
        },
        storage,
        scheduler.clone(),
    );
    if store.restore_state() {
        log::info!("restored session from {}", dir.display());
    }
    let _watch = store.subscribe(|next, prev, action| {
        log::debug!("{} changed state ({} -> {} domains)", action.kind, prev.len(), next.len());
    });

    let config = CoordinatorConfig {
        on_error: Rc::new(|err| log::warn!("coordinator: {err}")),
        ..CoordinatorConfig::default()
    };
    let mut coordinator = EngineCoordinator::new(
        config,
        store.clone(),
        Rc::new(MemoryResourcePool::new()),
        Rc::new(MemoryCanvasPool::new()),
    );
    coordinator.register_engine("faceted", PatternEngine::factory())?;
    coordinator.register_engine("quantum", PatternEngine::factory())?;

    let ready = pollster::block_on(coordinator.initialize());
    anyhow::ensure!(ready > 0, "no engine could be initialized");

    let start = store
        .visualization_state()
        .map(|v| v.active_system.clone())
        .unwrap_or_else(|| "faceted".to_string());
    if !pollster::block_on(coordinator.switch_engine(&start)) {
        pollster::block_on(coordinator.switch_engine("faceted"));
    }
    coordinator.resize(1280, 720);

    let mut clock = FrameClock::new();
    for frame in 0..FRAMES {
        let time = clock.step(FRAME);
        coordinator.render(time.elapsed_ms);
        scheduler.advance(time.dt);

        match frame {
            20 => {
                let params = Parameters::from([("speed".to_string(), 2.5)]);
                store.dispatch(visualization::update_parameters(&params));
                coordinator.apply_parameters(&params, None);
            }
            40 => {
                let other = if coordinator.active_engine() == Some("faceted") { "quantum" } else { "faceted" };
                pollster::block_on(coordinator.switch_engine(other));
            }
            60 => {
                coordinator.broadcast("pulse", &json!({ "strength": 0.8 }));
                store.dispatch(game::add_score(250));
            }
            _ => {}
        }

        if time.frame_index % 30 == 0 {
            store.dispatch(system::update_fps(1.0 / time.dt.as_secs_f64()));
        }
    }

    if let Some(active) = coordinator.active_engine().map(str::to_string) {
        if let Some(snapshot) = pollster::block_on(coordinator.save_engine_state(&active)) {
            log::info!("`{active}` state: {snapshot}");
        }
    }

    store.persist_state()?;
    let samples = store.performance_samples();
    let worst = samples.iter().map(|s| s.duration_ms()).fold(0.0, f64::max);
    log::info!(
        "{} dispatch(es), {} sample(s), slowest reducer {worst:.3}ms",
        store.history().len(),
        samples.len()
    );

    pollster::block_on(coordinator.destroy());
    store.destroy();
    Ok(())
}
