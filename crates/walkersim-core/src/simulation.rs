//! Simulation orchestrator - owns the world state and the tick thread.
//!
//! All access to [`WorldState`] goes through one coarse lock. The tick thread
//! holds it for a tick plus housekeeping (and autosave when due); host calls
//! take it for their whole duration.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::agent::EntityId;
use crate::config::Config;
use crate::error::{ConfigError, SaveError, SimulationError};
use crate::events::WorldEvent;
use crate::host::EntityHost;
use crate::lifecycle::UpdateSummary;
use crate::map::MapData;
use crate::math::{remap, Vec3};
use crate::persistence::{load_simulation, save_simulation};
use crate::processors::Color;
use crate::state::{WorldState, TICKS_PER_SECOND};

/// Wall-clock period of one tick at speed scale 1.
pub const TICK_PERIOD: Duration = Duration::from_millis(1000 / TICKS_PER_SECOND as u64);

/// Speed scale reported while `fast_advance` runs. The burst itself never
/// sleeps, so this is only visible through [`Simulation::speed_scale`].
pub const FAST_ADVANCE_SPEED: f32 = 256.0;

/// Timing of recent ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickStats {
    pub last_tick: Duration,
    /// Running average, each tick weighted half against the history.
    pub average_tick: Duration,
    /// Ticks run by the tick thread since the last reset.
    pub ticks_run: u64,
}

impl TickStats {
    fn record(&mut self, elapsed: Duration) {
        self.ticks_run += 1;
        self.last_tick = elapsed;
        self.average_tick = if self.ticks_run > 1 {
            (self.average_tick + elapsed) / 2
        } else {
            elapsed
        };
    }
}

struct Autosave {
    path: Option<PathBuf>,
    last: Instant,
}

struct Shared {
    state: Mutex<WorldState>,
    running: AtomicBool,
    paused: AtomicBool,
    /// f32 bits.
    speed_scale: AtomicU32,
    stats: Mutex<TickStats>,
    autosave: Mutex<Autosave>,
}

impl Shared {
    fn speed_scale(&self) -> f32 {
        f32::from_bits(self.speed_scale.load(Ordering::Relaxed))
    }

    fn tick_period(&self) -> Duration {
        let scale = self.speed_scale();
        if scale.is_finite() && scale > 0.0 {
            TICK_PERIOD.div_f32(scale)
        } else {
            TICK_PERIOD
        }
    }

    fn run(&self) {
        info!("Tick thread started");
        while self.running.load(Ordering::Acquire) {
            if self.paused.load(Ordering::Acquire) {
                thread::sleep(TICK_PERIOD);
                continue;
            }

            let start = Instant::now();
            {
                let mut state = self.state.lock();
                state.tick();
                if self.running.load(Ordering::Acquire) {
                    state.check_agent_spawn();
                }
                self.maybe_autosave(&state);
            }
            let elapsed = start.elapsed();
            self.stats.lock().record(elapsed);

            thread::sleep(self.tick_period().saturating_sub(elapsed));
        }
        info!("Tick thread stopped");
    }

    /// Called with the state lock held; ticking pauses while the file is
    /// written.
    fn maybe_autosave(&self, state: &WorldState) {
        let Some(interval) = state.config.autosave_interval_secs else {
            return;
        };
        let mut autosave = self.autosave.lock();
        let Some(path) = autosave.path.clone() else {
            return;
        };
        if autosave.last.elapsed() < Duration::from_secs(interval) {
            return;
        }
        autosave.last = Instant::now();

        match write_save_file(&path, state) {
            Ok(()) => info!("Autosaved simulation to {}", path.display()),
            Err(e) => error!("Autosave to {} failed: {}", path.display(), e),
        }
    }
}

/// Write to `<path>.tmp`, then rename over `path`.
fn write_save_file(path: &Path, state: &WorldState) -> Result<(), SaveError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let file = File::create(&tmp)?;
    let mut writer = BufWriter::new(file);
    save_simulation(&mut writer, state)?;
    writer.flush()?;
    drop(writer);
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Threaded walker simulation.
pub struct Simulation {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Simulation {
    /// Create a populated, stopped simulation.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let state = WorldState::new(config)?;
        info!(
            "Simulation created with {} agents in {} groups",
            state.agents.len(),
            state.group_count
        );
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                speed_scale: AtomicU32::new(1.0f32.to_bits()),
                stats: Mutex::new(TickStats::default()),
                autosave: Mutex::new(Autosave {
                    path: None,
                    last: Instant::now(),
                }),
            }),
            thread: Mutex::new(None),
        })
    }

    /// Spawn the tick thread. Does nothing if it is already running.
    pub fn start(&self) -> Result<(), SimulationError> {
        let mut thread_slot = self.thread.lock();
        if thread_slot.is_some() {
            return Ok(());
        }

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("walkersim-tick".into())
            .spawn(move || shared.run())
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                SimulationError::Thread(e)
            })?;
        *thread_slot = Some(handle);
        Ok(())
    }

    /// Clear the running flag and wait for the in-flight tick to finish.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!("Tick thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Release);
        info!("Simulation {}", if paused { "paused" } else { "resumed" });
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    pub fn speed_scale(&self) -> f32 {
        self.shared.speed_scale()
    }

    /// Multiplier on the tick rate; non-positive values are ignored.
    pub fn set_speed_scale(&self, scale: f32) {
        if scale.is_finite() && scale > 0.0 {
            self.shared
                .speed_scale
                .store(scale.to_bits(), Ordering::Relaxed);
        } else {
            warn!("Ignoring invalid speed scale {}", scale);
        }
    }

    pub fn tick_stats(&self) -> TickStats {
        *self.shared.stats.lock()
    }

    /// Stop, then restart deterministically from `config`'s seed.
    pub fn reset(&self, config: Config) -> Result<(), SimulationError> {
        config.validate()?;
        self.stop();
        self.shared.state.lock().reset(config)?;
        *self.shared.stats.lock() = TickStats::default();
        self.shared.autosave.lock().last = Instant::now();
        info!("Simulation reset");
        Ok(())
    }

    /// Run exactly `n` ticks on the calling thread. The tick thread must be
    /// stopped.
    pub fn fast_advance(&self, ticks: u32) -> Result<(), SimulationError> {
        if self.is_running() {
            return Err(SimulationError::Running);
        }

        let previous_scale = self.shared.speed_scale.load(Ordering::Relaxed);
        self.shared
            .speed_scale
            .store(FAST_ADVANCE_SPEED.to_bits(), Ordering::Relaxed);

        let start = Instant::now();
        {
            let mut state = self.shared.state.lock();
            for _ in 0..ticks {
                state.tick();
            }
        }
        self.shared
            .speed_scale
            .store(previous_scale, Ordering::Relaxed);

        info!("Fast-advanced {} ticks in {:?}", ticks, start.elapsed());
        Ok(())
    }

    /// The host reports a materialized entity died.
    pub fn entity_killed(&self, entity: EntityId) -> bool {
        self.shared.state.lock().entity_killed(entity)
    }

    /// Per-frame host callback: materialize queued agents and release
    /// distant ones. Does nothing unless the tick thread is running and
    /// unpaused.
    pub fn game_update(&self, host: &mut dyn EntityHost) -> UpdateSummary {
        if !self.is_running() || self.is_paused() {
            return UpdateSummary::default();
        }
        self.shared.state.lock().game_update(host)
    }

    pub fn set_world_size(&self, mins: Vec3, maxs: Vec3) -> Result<(), ConfigError> {
        if !mins.is_finite() || !maxs.is_finite() || maxs.x <= mins.x || maxs.y <= mins.y {
            return Err(ConfigError::Invalid(format!(
                "world bounds {:?}..{:?} are empty",
                mins, maxs
            )));
        }
        self.shared.state.lock().set_world_size(mins, maxs);
        info!("World size set to {:?}..{:?}", mins, maxs);
        Ok(())
    }

    pub fn set_map_data(&self, map: MapData) {
        self.shared.state.lock().map_data = Some(map);
    }

    /// Swap in new behavior parameters without touching the population.
    pub fn reload_config(&self, config: Config) -> Result<(), ConfigError> {
        config.validate()?;
        let mut state = self.shared.state.lock();
        for (field, current, requested) in [
            ("max_agents", state.config.max_agents, config.max_agents),
            ("group_size", state.config.group_size, config.group_size),
        ] {
            if current != requested {
                return Err(ConfigError::PopulationChanged {
                    field,
                    current,
                    requested,
                });
            }
        }
        state.config = config;
        state.setup_processors();
        info!("Configuration reloaded");
        Ok(())
    }

    /// Autosave target. `None` disables autosaving.
    pub fn set_autosave_path(&self, path: Option<PathBuf>) {
        let mut autosave = self.shared.autosave.lock();
        autosave.path = path;
        autosave.last = Instant::now();
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SaveError> {
        let path = path.as_ref();
        let state = self.shared.state.lock();
        write_save_file(path, &state)?;
        info!("Saved simulation to {}", path.display());
        Ok(())
    }

    pub fn save_to<W: Write>(&self, writer: W) -> Result<(), SaveError> {
        save_simulation(writer, &self.shared.state.lock())
    }

    /// Replace the world state with a saved one. On failure the current
    /// state is untouched.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<(), SaveError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        self.load_from(BufReader::new(file))?;
        info!("Loaded simulation from {}", path.display());
        Ok(())
    }

    pub fn load_from<R: Read>(&self, reader: R) -> Result<(), SaveError> {
        let mut loaded = load_simulation(reader)?;
        let mut state = self.shared.state.lock();
        loaded.map_data = state.map_data.take();
        loaded.observers = std::mem::take(&mut state.observers);
        *state = loaded;
        debug!(
            "Loaded state at tick {} with {} agents",
            state.ticks,
            state.agents.len()
        );
        Ok(())
    }

    /// Read access to the world state under the lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&WorldState) -> R) -> R {
        f(&self.shared.state.lock())
    }

    /// Map a world position onto the rectangle `[out_mins, out_maxs]`, e.g.
    /// a minimap.
    pub fn remap_position_2d(&self, pos: Vec3, out_mins: Vec3, out_maxs: Vec3) -> Vec3 {
        let state = self.shared.state.lock();
        let (mins, maxs) = (state.world_mins, state.world_maxs);
        Vec3::xy(
            remap(pos.x, mins.x, maxs.x, out_mins.x, out_maxs.x),
            remap(pos.y, mins.y, maxs.y, out_mins.y, out_maxs.y),
        )
    }

    pub fn group_color(&self, group: usize) -> Color {
        self.shared.state.lock().group_color(group)
    }

    pub fn add_event(&self, event: WorldEvent) -> bool {
        let added = self.shared.state.lock().add_event(event);
        if !added {
            debug!("Rejected world event {:?}", event);
        }
        added
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;

    fn config() -> Config {
        Config {
            max_agents: 100,
            group_size: 10,
            autosave_interval_secs: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_simulation_creation() {
        let sim = Simulation::new(config()).unwrap();
        assert!(!sim.is_running());
        assert!(!sim.is_paused());
        assert_eq!(sim.speed_scale(), 1.0);
        assert_eq!(sim.with_state(|s| s.agents.len()), 100);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Simulation::new(Config {
            max_agents: 0,
            ..config()
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_fast_advance_runs_exact_ticks() {
        let sim = Simulation::new(config()).unwrap();
        sim.fast_advance(25).unwrap();
        assert_eq!(sim.with_state(|s| s.ticks), 25);
        assert_eq!(sim.speed_scale(), 1.0);
    }

    #[test]
    fn test_start_stop() {
        let sim = Simulation::new(config()).unwrap();
        sim.start().unwrap();
        assert!(sim.is_running());
        assert!(matches!(sim.fast_advance(1), Err(SimulationError::Running)));
        thread::sleep(Duration::from_millis(150));
        sim.stop();
        assert!(!sim.is_running());

        let ticks = sim.with_state(|s| s.ticks);
        assert!(ticks > 0);
        assert_eq!(sim.tick_stats().ticks_run, u64::from(ticks));

        // Stopped means stopped.
        thread::sleep(Duration::from_millis(60));
        assert_eq!(sim.with_state(|s| s.ticks), ticks);
    }

    #[test]
    fn test_reload_config_rejects_population_change() {
        let sim = Simulation::new(config()).unwrap();
        let result = sim.reload_config(Config {
            max_agents: 200,
            ..config()
        });
        assert!(matches!(
            result,
            Err(ConfigError::PopulationChanged {
                field: "max_agents",
                ..
            })
        ));

        sim.reload_config(Config {
            spawn_radius: 50.0,
            ..config()
        })
        .unwrap();
        assert_eq!(sim.with_state(|s| s.config.spawn_radius), 50.0);
    }

    #[test]
    fn test_set_world_size_validates_bounds() {
        let sim = Simulation::new(config()).unwrap();
        assert!(sim
            .set_world_size(Vec3::xy(10.0, 0.0), Vec3::xy(0.0, 10.0))
            .is_err());
        sim.set_world_size(Vec3::xy(0.0, 0.0), Vec3::xy(400.0, 400.0))
            .unwrap();
        let mapped = sim.remap_position_2d(
            Vec3::xy(200.0, 100.0),
            Vec3::ZERO,
            Vec3::xy(1.0, 1.0),
        );
        assert_eq!(mapped, Vec3::xy(0.5, 0.25));
        sim.with_state(|s| s.check_invariants()).unwrap();
    }

    #[test]
    fn test_failed_load_keeps_state() {
        let sim = Simulation::new(config()).unwrap();
        sim.fast_advance(10).unwrap();
        assert!(sim.load_from(&b"not a save"[..]).is_err());
        assert_eq!(sim.with_state(|s| s.ticks), 10);
    }

    fn autosaving(interval: Option<u64>) -> Config {
        Config {
            autosave_interval_secs: interval,
            ..config()
        }
    }

    fn run_briefly(sim: &Simulation) {
        sim.start().unwrap();
        thread::sleep(Duration::from_millis(120));
        sim.stop();
    }

    #[test]
    fn test_autosave_writes_through_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.wksm");

        let sim = Simulation::new(autosaving(Some(0))).unwrap();
        sim.set_autosave_path(Some(path.clone()));
        run_briefly(&sim);

        assert!(path.exists());
        assert!(!dir.path().join("world.wksm.tmp").exists());

        let restored = Simulation::new(config()).unwrap();
        restored.load(&path).unwrap();
        let saved_ticks = restored.with_state(|s| s.ticks);
        assert!(saved_ticks > 0);
        assert!(saved_ticks <= sim.with_state(|s| s.ticks));
    }

    #[test]
    fn test_autosave_respects_interval_and_settings() {
        let dir = tempfile::tempdir().unwrap();

        // Interval not yet elapsed.
        let path = dir.path().join("hourly.wksm");
        let sim = Simulation::new(autosaving(Some(3600))).unwrap();
        sim.set_autosave_path(Some(path.clone()));
        run_briefly(&sim);
        assert!(!path.exists());

        // Disabled by configuration.
        let path = dir.path().join("disabled.wksm");
        let sim = Simulation::new(autosaving(None)).unwrap();
        sim.set_autosave_path(Some(path.clone()));
        run_briefly(&sim);
        assert!(!path.exists());

        // No target.
        let sim = Simulation::new(autosaving(Some(0))).unwrap();
        run_briefly(&sim);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_add_event() {
        let sim = Simulation::new(config()).unwrap();
        assert!(sim.add_event(WorldEvent::new(EventType::Noise, Vec3::ZERO, 30.0, 1.0)));
        assert!(!sim.add_event(WorldEvent::new(EventType::Noise, Vec3::ZERO, -1.0, 1.0)));
        assert_eq!(sim.with_state(|s| s.events.len()), 1);
    }
}
