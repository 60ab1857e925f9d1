//! World state - the single aggregate the simulation mutates.
//!
//! Everything here is plain data plus the per-tick step. Locking, threading
//! and pacing live in [`crate::simulation`].

use std::collections::{HashMap, VecDeque};
use std::f32::consts::TAU;

use crate::agent::{Agent, AgentState, EntityId};
use crate::config::Config;
use crate::error::ConfigError;
use crate::events::{EventList, WorldEvent};
use crate::grid::{SpatialGrid, CELL_SIZE};
use crate::location::{group_offset, select_location};
use crate::map::MapData;
use crate::math::{wrap, Vec3};
use crate::prng::WalkerRng;
use crate::processors::{color_for_index, Color, GroupProcessor, SteeringContext};

pub const TICKS_PER_SECOND: u32 = 40;
/// Simulated seconds per tick.
pub const TICK_RATE: f32 = 1.0 / TICKS_PER_SECOND as f32;

/// Wind keeps a target for one to three simulated minutes.
const WIND_CHANGE_MIN_TICKS: i32 = (TICKS_PER_SECOND * 60) as i32;
const WIND_CHANGE_MAX_TICKS: i32 = (TICKS_PER_SECOND * 180) as i32;
/// Ticks for the wind to fully blend toward a new target.
const WIND_BLEND_TICKS: f32 = (TICKS_PER_SECOND * 20) as f32;

/// Agents visited by one housekeeping sweep.
pub const SPAWN_SWEEP_BATCH: usize = 1024;

pub const DEFAULT_WORLD_MINS: Vec3 = Vec3 {
    x: -3072.0,
    y: -3072.0,
    z: 0.0,
};
pub const DEFAULT_WORLD_MAXS: Vec3 = Vec3 {
    x: 3072.0,
    y: 3072.0,
    z: 0.0,
};

#[derive(Debug, Clone)]
pub struct WorldState {
    pub world_mins: Vec3,
    pub world_maxs: Vec3,
    /// Cursor of the housekeeping sweep.
    pub slow_iterator: u32,
    pub wind_dir: Vec3,
    pub wind_dir_target: Vec3,
    pub wind_time: f32,
    pub ticks: u32,
    pub tick_next_wind_change: u32,
    pub group_count: usize,
    pub max_neighbour_distance: f32,
    pub config: Config,
    pub prng: WalkerRng,
    pub agents: Vec<Agent>,
    /// Materialized handle -> agent index; exactly the `Active` agents.
    pub active: HashMap<EntityId, usize>,
    pub grid: SpatialGrid,
    pub events: EventList,
    pub map_data: Option<MapData>,
    /// Last observer positions reported by the host.
    pub observers: Vec<Vec3>,
    /// Exactly the `Queued` agents, oldest first.
    pub spawn_queue: VecDeque<usize>,

    processors: Vec<GroupProcessor>,
    scratch: Vec<usize>,
    velocities: Vec<Vec3>,
    event_forces: Vec<Vec3>,
}

impl WorldState {
    /// State with the given configuration and no population.
    pub fn empty(config: Config) -> Self {
        let prng = WalkerRng::new(config.random_seed);
        Self {
            world_mins: DEFAULT_WORLD_MINS,
            world_maxs: DEFAULT_WORLD_MAXS,
            slow_iterator: 0,
            wind_dir: Vec3::ZERO,
            wind_dir_target: Vec3::ZERO,
            wind_time: 0.0,
            ticks: 0,
            tick_next_wind_change: 0,
            group_count: 0,
            max_neighbour_distance: 0.0,
            config,
            prng,
            agents: Vec::new(),
            active: HashMap::new(),
            grid: SpatialGrid::new(DEFAULT_WORLD_MINS, DEFAULT_WORLD_MAXS, CELL_SIZE),
            events: EventList::new(),
            map_data: None,
            observers: Vec::new(),
            spawn_queue: VecDeque::new(),
            processors: Vec::new(),
            scratch: Vec::new(),
            velocities: Vec::new(),
            event_forces: Vec::new(),
        }
    }

    /// Populated state for `config` over the default world rectangle.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let mut state = Self::empty(Config::default());
        state.reset(config)?;
        Ok(state)
    }

    /// Deterministic restart from the configured seed. World bounds and map
    /// data are kept. An invalid `config` leaves the state untouched.
    pub fn reset(&mut self, config: Config) -> Result<(), ConfigError> {
        config.validate()?;
        self.prng = WalkerRng::new(config.random_seed);
        self.config = config;
        self.slow_iterator = 0;
        self.tick_next_wind_change = 0;
        self.ticks = 0;
        self.wind_dir = Vec3::ZERO;
        self.wind_dir_target = Vec3::ZERO;
        self.wind_time = 0.0;
        self.events.clear();
        self.active.clear();
        self.spawn_queue.clear();

        self.setup_grid();
        self.populate();
        self.setup_processors();
        Ok(())
    }

    /// Replace the world rectangle and rebuild the grid around the agents.
    pub fn set_world_size(&mut self, mins: Vec3, maxs: Vec3) {
        self.world_mins = mins;
        self.world_maxs = maxs;
        self.setup_grid();
    }

    /// Fresh grid over the current bounds containing every agent.
    pub fn setup_grid(&mut self) {
        self.grid = SpatialGrid::new(self.world_mins, self.world_maxs, CELL_SIZE);
        for agent in &mut self.agents {
            agent.cell_index = self.grid.insert(agent.index, agent.position);
        }
    }

    pub fn wrap_position(&self, pos: Vec3) -> Vec3 {
        Vec3::new(
            wrap(pos.x, self.world_mins.x, self.world_maxs.x),
            wrap(pos.y, self.world_mins.y, self.world_maxs.y),
            pos.z,
        )
    }

    fn populate(&mut self) {
        self.agents.clear();
        self.grid.clear();

        let max_agents = self.config.max_agents;
        let group_size = self.config.group_size;
        self.group_count = self.config.group_count();

        let (mins, maxs) = (self.world_mins, self.world_maxs);
        let mut group_starts = Vec::with_capacity(self.group_count);
        for _ in 0..self.group_count {
            group_starts.push(self.start_location());
        }

        for index in 0..max_agents {
            let group = index / group_size;
            let mut agent = Agent::new(index, group);
            agent.last_update_tick = self.ticks;

            let position = if self.config.start_agents_grouped {
                group_starts[group] + group_offset(&mut self.prng, group_size)
            } else {
                self.start_location()
            };
            agent.position = Vec3::xy(
                wrap(position.x, mins.x, maxs.x),
                wrap(position.y, mins.y, maxs.y),
            );

            agent.velocity.x = (self.prng.next_f64() * 3.0) as f32;
            agent.velocity.y = (self.prng.next_f64() * 3.0) as f32;

            agent.cell_index = self.grid.insert(index, agent.position);
            self.agents.push(agent);
        }

        log::debug!(
            "Populated {} agents in {} groups",
            self.agents.len(),
            self.group_count
        );
    }

    fn start_location(&mut self) -> Vec3 {
        let policy = self.config.start_position;
        match select_location(
            policy,
            &mut self.prng,
            self.world_mins,
            self.world_maxs,
            self.map_data.as_ref(),
        ) {
            Some(pos) => pos,
            None => panic!("start location policy {policy:?} selects no position"),
        }
    }

    /// Rebuild group processors from the configuration.
    pub fn setup_processors(&mut self) {
        let group_size = self.config.group_size.max(1);
        let agent_count = self.agents.len();
        self.processors = (0..self.group_count)
            .map(|group| {
                let start = (group * group_size).min(agent_count);
                let end = ((group + 1) * group_size).min(agent_count);
                GroupProcessor::new(group, start..end, &self.config.processor_group_for(group))
            })
            .collect();

        self.max_neighbour_distance = self
            .processors
            .iter()
            .map(GroupProcessor::neighbour_distance)
            .fold(0.0, f32::max);

        for processor in &mut self.processors {
            processor.update_anchor(
                &self.agents,
                self.config.random_seed,
                self.ticks,
                self.world_mins,
                self.world_maxs,
            );
        }
    }

    pub fn processors(&self) -> &[GroupProcessor] {
        &self.processors
    }

    /// Diagnostic color of a group; palette color when no processor exists.
    pub fn group_color(&self, group: usize) -> Color {
        self.processors
            .get(group)
            .map(|p| p.color)
            .unwrap_or_else(|| color_for_index(group))
    }

    pub fn add_event(&mut self, event: WorldEvent) -> bool {
        self.events.push(event)
    }

    /// Advance the simulation by one tick.
    pub fn tick(&mut self) {
        let seed = self.config.random_seed;
        let (mins, maxs) = (self.world_mins, self.world_maxs);
        let agent_count = self.agents.len();

        for processor in &mut self.processors {
            processor.update_anchor(&self.agents, seed, self.ticks, mins, maxs);
        }

        let has_events = !self.events.is_empty();
        if has_events {
            self.event_forces.clear();
            self.event_forces.resize(agent_count, Vec3::ZERO);
            self.events.accumulate_forces(
                &self.grid,
                &self.agents,
                &mut self.scratch,
                &mut self.event_forces,
            );
        }

        // Steering reads the whole table, so all velocities are computed
        // before any agent moves.
        self.velocities.clear();
        self.velocities
            .extend(self.agents.iter().map(|agent| agent.velocity));
        {
            let ctx = SteeringContext {
                agents: &self.agents,
                grid: &self.grid,
                wind: self.wind_dir,
                event_forces: has_events.then_some(self.event_forces.as_slice()),
                neighbour_distance: self.max_neighbour_distance,
                dt: TICK_RATE,
            };
            for processor in &self.processors {
                for index in processor.members.clone() {
                    let agent = &self.agents[index];
                    if agent.state.is_simulated() {
                        self.velocities[index] = processor.steer(agent, &ctx, &mut self.scratch);
                    }
                }
            }
        }

        for (index, agent) in self.agents.iter_mut().enumerate() {
            if !agent.state.is_simulated() {
                continue;
            }
            agent.velocity = self.velocities[index];
            let moved = agent.position + agent.velocity * TICK_RATE;
            agent.position = Vec3::new(
                wrap(moved.x, mins.x, maxs.x),
                wrap(moved.y, mins.y, maxs.y),
                moved.z,
            );

            let new_cell = self.grid.cell_of(agent.position);
            self.grid.move_agent(index, agent.cell_index, new_cell);
            agent.cell_index = new_cell;
            agent.last_update_tick = self.ticks;
        }

        self.events.decay();
        self.update_wind();
        self.ticks = self.ticks.wrapping_add(1);
    }

    fn update_wind(&mut self) {
        if self.ticks >= self.tick_next_wind_change {
            let angle = self.prng.next_f32() * TAU;
            let strength = 0.25 + self.prng.next_f32() * 0.75;
            self.wind_dir_target = Vec3::xy(angle.cos() * strength, angle.sin() * strength);
            self.wind_time = 0.0;
            let wait = self
                .prng
                .next_int(WIND_CHANGE_MIN_TICKS, WIND_CHANGE_MAX_TICKS);
            self.tick_next_wind_change = self.ticks.wrapping_add(wait as u32);
        }

        self.wind_time = (self.wind_time + 1.0 / WIND_BLEND_TICKS).min(1.0);
        self.wind_dir = self.wind_dir.lerp(&self.wind_dir_target, self.wind_time);
    }

    /// Whether `pos` is within `radius` of any observer.
    pub fn near_observer(&self, pos: Vec3, radius: f32) -> bool {
        let radius_sq = radius * radius;
        self.observers
            .iter()
            .any(|o| o.distance_squared_2d(&pos) <= radius_sq)
    }

    /// Verify the structural invariants: grid membership, group range,
    /// active lookup and spawn queue.
    pub fn check_invariants(&self) -> Result<(), String> {
        let count = self.agents.len();

        if self.group_count != self.config.group_count() {
            return Err(format!(
                "group count {} does not match configuration ({})",
                self.group_count,
                self.config.group_count()
            ));
        }
        if self.grid.len() != count {
            return Err(format!(
                "grid holds {} entries for {} agents",
                self.grid.len(),
                count
            ));
        }

        let mut active_count = 0;
        let mut queued_count = 0;
        for (slot, agent) in self.agents.iter().enumerate() {
            if agent.index != slot {
                return Err(format!("agent at slot {slot} has index {}", agent.index));
            }
            if agent.group >= self.group_count {
                return Err(format!("agent {slot} has group {} out of range", agent.group));
            }
            if !self.grid.cell(agent.cell_index).contains(&slot) {
                return Err(format!(
                    "agent {slot} is not in its cell {}",
                    agent.cell_index
                ));
            }
            match agent.state {
                AgentState::Active => {
                    active_count += 1;
                    if self.active.get(&agent.entity_id) != Some(&slot) {
                        return Err(format!("active agent {slot} missing from the active lookup"));
                    }
                }
                AgentState::Queued => queued_count += 1,
                _ => {}
            }
        }
        if active_count != self.active.len() {
            return Err(format!(
                "active lookup has {} handles for {} active agents",
                self.active.len(),
                active_count
            ));
        }

        if queued_count != self.spawn_queue.len() {
            return Err(format!(
                "spawn queue has {} entries for {} queued agents",
                self.spawn_queue.len(),
                queued_count
            ));
        }
        for &index in &self.spawn_queue {
            if self.agents.get(index).map(|a| a.state) != Some(AgentState::Queued) {
                return Err(format!("spawn queue entry {index} is not queued"));
            }
        }

        Ok(())
    }
}
