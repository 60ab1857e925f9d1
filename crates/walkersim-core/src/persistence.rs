//! Save/Load of the complete world state.
//!
//! Little-endian binary stream written with bincode's fixed-int encoding:
//! magic and version, then the Info, Config, PRNG, Agents, Grid and Events
//! blocks in that order. Loading builds a complete new [`WorldState`] and
//! validates it before handing it back, so callers can keep their current
//! state on any failure.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::agent::{Agent, AgentState, EntityId, NO_ENTITY};
use crate::config::Config;
use crate::error::SaveError;
use crate::events::{EventList, EventType, WorldEvent};
use crate::grid::{SpatialGrid, CELL_SIZE};
use crate::math::Vec3;
use crate::prng::WalkerRng;
use crate::state::WorldState;

/// "WKSM" read as a little-endian u32.
pub const SAVE_MAGIC: u32 = 0x4D53_4B57;

/// Version number for save file format (increment when format changes)
pub const SAVE_VERSION: u32 = 1;

/// Upper bound on the configuration text, guards against corrupt lengths.
const MAX_CONFIG_LEN: u32 = 16 * 1024 * 1024;

#[derive(Serialize, Deserialize)]
struct Header {
    magic: u32,
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct InfoBlock {
    world_mins: Vec3,
    world_maxs: Vec3,
    slow_iterator: u32,
    wind_dir: Vec3,
    wind_dir_target: Vec3,
    wind_time: f32,
    ticks: u32,
    tick_next_wind_change: u32,
    group_count: i32,
    max_neighbour_distance: f32,
}

#[derive(Serialize, Deserialize)]
struct AgentRecord {
    index: i32,
    group: i32,
    position: Vec3,
    velocity: Vec3,
    cell_index: i32,
    entity_id: i32,
    entity_class_id: i32,
    health: i32,
    state: i32,
    last_update_tick: u32,
}

impl From<&Agent> for AgentRecord {
    fn from(agent: &Agent) -> Self {
        Self {
            index: agent.index as i32,
            group: agent.group as i32,
            position: agent.position,
            velocity: agent.velocity,
            cell_index: agent.cell_index as i32,
            entity_id: agent.entity_id,
            entity_class_id: agent.entity_class_id,
            health: agent.health,
            state: agent.state as i32,
            last_update_tick: agent.last_update_tick,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct EventRecord {
    kind: i32,
    position: Vec3,
    radius: f32,
    decay_rate: f32,
}

fn corrupt(message: impl Into<String>) -> SaveError {
    SaveError::Corrupt(message.into())
}

fn count_to_i32(count: usize, what: &str) -> Result<i32, SaveError> {
    i32::try_from(count).map_err(|_| corrupt(format!("{what} count {count} does not fit the format")))
}

fn read_count<R: Read>(reader: &mut R, what: &str) -> Result<usize, SaveError> {
    let count: i32 = bincode::deserialize_from(&mut *reader)?;
    usize::try_from(count).map_err(|_| corrupt(format!("negative {what} count {count}")))
}

/// Save the complete world state to a writer
pub fn save_simulation<W: Write>(mut writer: W, state: &WorldState) -> Result<(), SaveError> {
    let w = &mut writer;

    bincode::serialize_into(
        &mut *w,
        &Header {
            magic: SAVE_MAGIC,
            version: SAVE_VERSION,
        },
    )?;

    bincode::serialize_into(
        &mut *w,
        &InfoBlock {
            world_mins: state.world_mins,
            world_maxs: state.world_maxs,
            slow_iterator: state.slow_iterator,
            wind_dir: state.wind_dir,
            wind_dir_target: state.wind_dir_target,
            wind_time: state.wind_time,
            ticks: state.ticks,
            tick_next_wind_change: state.tick_next_wind_change,
            group_count: count_to_i32(state.group_count, "group")?,
            max_neighbour_distance: state.max_neighbour_distance,
        },
    )?;

    let config_text = state.config.to_json_string()?;
    let config_len = u32::try_from(config_text.len())
        .ok()
        .filter(|len| *len <= MAX_CONFIG_LEN)
        .ok_or_else(|| corrupt("configuration text too large"))?;
    bincode::serialize_into(&mut *w, &config_len)?;
    w.write_all(config_text.as_bytes())?;

    bincode::serialize_into(&mut *w, &state.prng.state())?;

    bincode::serialize_into(&mut *w, &count_to_i32(state.agents.len(), "agent")?)?;
    for agent in &state.agents {
        bincode::serialize_into(&mut *w, &AgentRecord::from(agent))?;
    }

    bincode::serialize_into(&mut *w, &count_to_i32(state.grid.cell_count(), "cell")?)?;
    for cell in state.grid.cells() {
        bincode::serialize_into(&mut *w, &count_to_i32(cell.len(), "cell entry")?)?;
        for &index in cell {
            bincode::serialize_into(&mut *w, &(index as i32))?;
        }
    }

    bincode::serialize_into(&mut *w, &count_to_i32(state.events.len(), "event")?)?;
    for event in state.events.iter() {
        bincode::serialize_into(
            &mut *w,
            &EventRecord {
                kind: event.kind as i32,
                position: event.position,
                radius: event.radius,
                decay_rate: event.decay_rate,
            },
        )?;
    }

    w.flush()?;
    Ok(())
}

/// Load a world state from a reader
///
/// The returned state has its processors, active lookup and spawn queue
/// rebuilt and has passed [`WorldState::check_invariants`]. Map data and
/// observers are not part of the format.
pub fn load_simulation<R: Read>(mut reader: R) -> Result<WorldState, SaveError> {
    let r = &mut reader;

    let header: Header = bincode::deserialize_from(&mut *r)?;
    if header.magic != SAVE_MAGIC {
        return Err(SaveError::BadMagic {
            found: header.magic,
        });
    }
    if header.version != SAVE_VERSION {
        return Err(SaveError::UnsupportedVersion {
            found: header.version,
            supported: SAVE_VERSION,
        });
    }

    let info: InfoBlock = bincode::deserialize_from(&mut *r)?;

    let config_len: u32 = bincode::deserialize_from(&mut *r)?;
    if config_len > MAX_CONFIG_LEN {
        return Err(corrupt(format!("configuration length {config_len} too large")));
    }
    let mut config_bytes = vec![0u8; config_len as usize];
    r.read_exact(&mut config_bytes)?;
    let config_text = String::from_utf8(config_bytes)
        .map_err(|_| corrupt("configuration text is not UTF-8"))?;
    let config = Config::from_json_str(&config_text)?;

    let (state0, state1): (u32, u32) = bincode::deserialize_from(&mut *r)?;

    let group_count = usize::try_from(info.group_count)
        .map_err(|_| corrupt(format!("negative group count {}", info.group_count)))?;
    if group_count != config.group_count() {
        return Err(corrupt(format!(
            "group count {} does not match configuration ({})",
            group_count,
            config.group_count()
        )));
    }
    let bounds_ok = info.world_mins.is_finite()
        && info.world_maxs.is_finite()
        && info.world_maxs.x > info.world_mins.x
        && info.world_maxs.y > info.world_mins.y;
    if !bounds_ok {
        return Err(corrupt("invalid world bounds"));
    }
    let wind_ok = info.wind_dir.is_finite()
        && info.wind_dir_target.is_finite()
        && info.wind_time.is_finite()
        && info.max_neighbour_distance.is_finite()
        && info.max_neighbour_distance >= 0.0;
    if !wind_ok {
        return Err(corrupt("non-finite wind or neighbour distance"));
    }
    if state0 == 0 && state1 == 0 {
        return Err(corrupt("all-zero generator state"));
    }

    let agent_count = read_count(r, "agent")?;
    if agent_count != config.max_agents {
        return Err(corrupt(format!(
            "{} agents stored for a population of {}",
            agent_count, config.max_agents
        )));
    }
    let mut agents = Vec::with_capacity(agent_count);
    for slot in 0..agent_count {
        let record: AgentRecord = bincode::deserialize_from(&mut *r)?;
        agents.push(agent_from_record(slot, record, &config)?);
    }

    let (cols, rows) = SpatialGrid::dimensions(info.world_mins, info.world_maxs, CELL_SIZE);
    let cell_count = read_count(r, "cell")?;
    if cell_count != cols * rows {
        return Err(corrupt(format!(
            "{} grid cells stored, bounds need {}",
            cell_count,
            cols * rows
        )));
    }
    let mut cells = Vec::with_capacity(cell_count);
    for _ in 0..cell_count {
        let entries = read_count(r, "cell entry")?;
        if entries > agent_count {
            return Err(corrupt(format!("cell with {entries} entries")));
        }
        let mut cell = Vec::with_capacity(entries);
        for _ in 0..entries {
            let index: i32 = bincode::deserialize_from(&mut *r)?;
            match usize::try_from(index) {
                Ok(index) if index < agent_count => cell.push(index),
                _ => return Err(corrupt(format!("grid entry {index} out of range"))),
            }
        }
        cells.push(cell);
    }
    let grid = SpatialGrid::from_cells(info.world_mins, info.world_maxs, CELL_SIZE, cells)
        .ok_or_else(|| corrupt("grid does not match world bounds"))?;

    let event_count = read_count(r, "event")?;
    let mut events = Vec::new();
    for _ in 0..event_count {
        let record: EventRecord = bincode::deserialize_from(&mut *r)?;
        let kind = EventType::from_i32(record.kind)
            .ok_or_else(|| corrupt(format!("unknown event type {}", record.kind)))?;
        let event = WorldEvent::new(kind, record.position, record.radius, record.decay_rate);
        if !event.is_valid() {
            return Err(corrupt(format!(
                "event {} has radius {} and decay rate {}",
                events.len(),
                record.radius,
                record.decay_rate
            )));
        }
        events.push(event);
    }

    let mut state = WorldState::empty(config);
    state.world_mins = info.world_mins;
    state.world_maxs = info.world_maxs;
    state.slow_iterator = info.slow_iterator;
    state.wind_dir = info.wind_dir;
    state.wind_dir_target = info.wind_dir_target;
    state.wind_time = info.wind_time;
    state.ticks = info.ticks;
    state.tick_next_wind_change = info.tick_next_wind_change;
    state.group_count = group_count;
    state.prng = WalkerRng::from_state(state0, state1);
    state.agents = agents;
    state.grid = grid;
    state.events = EventList::from_vec(events);

    for agent in &state.agents {
        match agent.state {
            AgentState::Active => {
                if state.active.insert(agent.entity_id, agent.index).is_some() {
                    return Err(corrupt(format!(
                        "entity {} materialized twice",
                        agent.entity_id
                    )));
                }
            }
            AgentState::Queued => state.spawn_queue.push_back(agent.index),
            _ => {}
        }
    }

    state.setup_processors();
    // Stored value wins so the stream round-trips exactly.
    state.max_neighbour_distance = info.max_neighbour_distance;

    state.check_invariants().map_err(SaveError::Corrupt)?;
    Ok(state)
}

fn agent_from_record(slot: usize, record: AgentRecord, config: &Config) -> Result<Agent, SaveError> {
    if usize::try_from(record.index).ok() != Some(slot) {
        return Err(corrupt(format!("agent at slot {slot} has index {}", record.index)));
    }
    let group = slot / config.group_size;
    if usize::try_from(record.group).ok() != Some(group) {
        return Err(corrupt(format!("agent {slot} has group {}", record.group)));
    }
    let state = AgentState::from_i32(record.state)
        .ok_or_else(|| corrupt(format!("agent {slot} has unknown state {}", record.state)))?;
    let cell_index = usize::try_from(record.cell_index)
        .map_err(|_| corrupt(format!("agent {slot} has cell {}", record.cell_index)))?;
    if !record.position.is_finite() || !record.velocity.is_finite() {
        return Err(corrupt(format!("agent {slot} has a non-finite position or velocity")));
    }
    let entity_id: EntityId = record.entity_id;
    if state == AgentState::Active && entity_id == NO_ENTITY {
        return Err(corrupt(format!("active agent {slot} has no entity")));
    }

    Ok(Agent {
        index: slot,
        group,
        position: record.position,
        velocity: record.velocity,
        cell_index,
        entity_id,
        entity_class_id: record.entity_class_id,
        health: record.health,
        state,
        last_update_tick: record.last_update_tick,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;

    fn sample_state() -> WorldState {
        let mut state = WorldState::new(Config {
            max_agents: 120,
            group_size: 25,
            ..Default::default()
        })
        .unwrap();
        for _ in 0..20 {
            state.tick();
        }
        state.add_event(WorldEvent::new(
            EventType::Deterrent,
            state.agents[3].position,
            50.0,
            0.5,
        ));
        state
    }

    fn saved(state: &WorldState) -> Vec<u8> {
        let mut buffer = Vec::new();
        save_simulation(&mut buffer, state).expect("Save failed");
        buffer
    }

    #[test]
    fn test_stream_starts_with_magic() {
        let buffer = saved(&sample_state());
        assert_eq!(&buffer[..4], b"WKSM");
        assert_eq!(&buffer[4..8], &1u32.to_le_bytes());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let state = sample_state();
        let buffer = saved(&state);

        let loaded = load_simulation(&buffer[..]).expect("Load failed");
        assert_eq!(loaded.ticks, state.ticks);
        assert_eq!(loaded.prng, state.prng);
        assert_eq!(loaded.agents, state.agents);
        assert_eq!(loaded.grid, state.grid);
        assert_eq!(loaded.events, state.events);
        assert_eq!(loaded.config, state.config);

        // Saving the loaded state reproduces the stream byte for byte.
        assert_eq!(saved(&loaded), buffer);
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let mut buffer = saved(&sample_state());
        buffer[0] ^= 0xFF;
        match load_simulation(&buffer[..]) {
            Err(SaveError::BadMagic { .. }) => {}
            other => panic!("expected bad magic, got {:?}", other.map(|s| s.ticks)),
        }
    }

    #[test]
    fn test_future_version_is_rejected() {
        let mut buffer = saved(&sample_state());
        buffer[4..8].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            load_simulation(&buffer[..]),
            Err(SaveError::UnsupportedVersion { found: 2, .. })
        ));
    }

    #[test]
    fn test_truncated_stream_fails() {
        let buffer = saved(&sample_state());
        assert!(load_simulation(&buffer[..buffer.len() - 3]).is_err());
        assert!(load_simulation(&buffer[..20]).is_err());
    }

    #[test]
    fn test_queued_and_active_agents_rebuilt() {
        let mut state = sample_state();
        state.queue_agent(7);
        state.queue_agent(2);
        state.agents[4].state = AgentState::Active;
        state.agents[4].entity_id = 99;
        state.active.insert(99, 4);

        let loaded = load_simulation(&saved(&state)[..]).unwrap();
        assert_eq!(loaded.active.get(&99), Some(&4));
        // Rebuilt in index order.
        assert_eq!(loaded.spawn_queue.iter().copied().collect::<Vec<_>>(), vec![2, 7]);
    }

    #[test]
    fn test_misplaced_grid_entry_is_corrupt() {
        let mut state = sample_state();
        let agent = state.agents[0].clone();
        let other_cell = if agent.cell_index == 0 { 1 } else { 0 };
        state.grid.move_agent(0, agent.cell_index, other_cell);
        assert!(matches!(
            load_simulation(&saved(&state)[..]),
            Err(SaveError::Corrupt(_))
        ));
    }

    #[test]
    fn test_event_without_radius_is_corrupt() {
        let mut state = sample_state();
        let mut events: Vec<WorldEvent> = state.events.iter().cloned().collect();
        events.push(WorldEvent::new(
            EventType::Noise,
            state.agents[0].position,
            f32::NAN,
            1.0,
        ));
        state.events = EventList::from_vec(events);
        assert!(matches!(
            load_simulation(&saved(&state)[..]),
            Err(SaveError::Corrupt(_))
        ));

        state.events = EventList::from_vec(vec![WorldEvent::new(
            EventType::Deterrent,
            Vec3::ZERO,
            40.0,
            0.0,
        )]);
        assert!(matches!(
            load_simulation(&saved(&state)[..]),
            Err(SaveError::Corrupt(_))
        ));
    }

    #[test]
    fn test_non_finite_wind_is_corrupt() {
        let mut state = sample_state();
        state.wind_time = f32::INFINITY;
        assert!(matches!(
            load_simulation(&saved(&state)[..]),
            Err(SaveError::Corrupt(_))
        ));

        let mut state = sample_state();
        state.wind_dir_target.x = f32::NAN;
        assert!(matches!(
            load_simulation(&saved(&state)[..]),
            Err(SaveError::Corrupt(_))
        ));

        let mut state = sample_state();
        state.max_neighbour_distance = f32::NAN;
        assert!(matches!(
            load_simulation(&saved(&state)[..]),
            Err(SaveError::Corrupt(_))
        ));
    }

    #[test]
    fn test_zero_generator_state_is_corrupt() {
        let state = sample_state();
        let buffer = saved(&state);
        // Patch the generator block in place.
        let words = state.prng.state();
        let mut needle = Vec::new();
        needle.extend_from_slice(&words.0.to_le_bytes());
        needle.extend_from_slice(&words.1.to_le_bytes());
        let at = buffer
            .windows(8)
            .position(|w| w == needle.as_slice())
            .unwrap();
        let mut patched = buffer.clone();
        patched[at..at + 8].fill(0);
        assert!(matches!(
            load_simulation(&patched[..]),
            Err(SaveError::Corrupt(_))
        ));
    }
}
