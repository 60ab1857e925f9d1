//! Agent lifecycle: Inactive -> Queued -> Active -> Inactive | Dead.
//!
//! The housekeeping sweep runs on the tick thread and only moves agents
//! between the simulated states. Everything that talks to the host
//! (materialize, release, lost entities) runs from the per-frame path.

use log::{debug, warn};

use crate::agent::{AgentState, EntityId, NO_CLASS, NO_ENTITY, UNKNOWN_HEALTH};
use crate::host::{DespawnedEntity, EntityHost, SpawnedEntity};
use crate::location::select_location;
use crate::math::Vec3;
use crate::state::{WorldState, SPAWN_SWEEP_BATCH};

/// What one `game_update` pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub spawned: usize,
    pub spawn_failures: usize,
    pub despawned: usize,
    pub lost: usize,
}

impl WorldState {
    /// Inactive -> Queued.
    pub fn queue_agent(&mut self, index: usize) -> bool {
        match self.agents.get_mut(index) {
            Some(agent) if agent.state == AgentState::Inactive => {
                agent.state = AgentState::Queued;
                self.spawn_queue.push_back(index);
                true
            }
            _ => false,
        }
    }

    /// Queued -> Inactive, for requests that were dropped or failed.
    fn unqueue_agent(&mut self, index: usize) {
        if let Some(agent) = self.agents.get_mut(index) {
            if agent.state == AgentState::Queued {
                agent.state = AgentState::Inactive;
            }
        }
        self.spawn_queue.retain(|&queued| queued != index);
    }

    /// Queued -> Active with the entity the host created.
    pub fn activate_agent(&mut self, index: usize, spawned: &SpawnedEntity) -> bool {
        let Some(agent) = self.agents.get_mut(index) else {
            return false;
        };
        if agent.state != AgentState::Queued || self.active.contains_key(&spawned.entity_id) {
            return false;
        }
        agent.state = AgentState::Active;
        agent.entity_id = spawned.entity_id;
        agent.entity_class_id = spawned.entity_class_id;
        agent.health = spawned.health;
        self.active.insert(spawned.entity_id, index);
        self.spawn_queue.retain(|&queued| queued != index);
        true
    }

    /// Active -> Inactive, taking over the entity's final state.
    pub fn deactivate_agent(&mut self, index: usize, despawned: &DespawnedEntity) -> bool {
        let position = self.wrap_position(despawned.position.sanitized());
        let Some(agent) = self.agents.get_mut(index) else {
            return false;
        };
        if agent.state != AgentState::Active {
            return false;
        }
        self.active.remove(&agent.entity_id);
        agent.state = AgentState::Inactive;
        agent.entity_id = NO_ENTITY;
        agent.position = position;
        agent.velocity = despawned.velocity.sanitized();
        agent.health = despawned.health;

        let new_cell = self.grid.cell_of(position);
        self.grid.move_agent(index, agent.cell_index, new_cell);
        agent.cell_index = new_cell;
        true
    }

    /// Active -> Inactive for an entity the host lost track of. The record
    /// keeps its last known state.
    fn release_lost_agent(&mut self, index: usize) {
        if let Some(agent) = self.agents.get_mut(index) {
            if agent.state == AgentState::Active {
                self.active.remove(&agent.entity_id);
                agent.state = AgentState::Inactive;
                agent.entity_id = NO_ENTITY;
            }
        }
    }

    /// The host reports the entity `entity` died. Returns false for unknown
    /// handles.
    pub fn entity_killed(&mut self, entity: EntityId) -> bool {
        let Some(index) = self.active.remove(&entity) else {
            return false;
        };
        let agent = &mut self.agents[index];
        agent.state = AgentState::Dead;
        agent.entity_id = NO_ENTITY;
        agent.health = 0;
        debug!("Agent {} died (entity {})", index, entity);
        true
    }

    /// Dead -> Inactive at a location picked by the respawn policy. With no
    /// policy the agent comes back where it fell.
    pub fn respawn_agent(&mut self, index: usize) -> bool {
        if self.agents.get(index).map(|a| a.state) != Some(AgentState::Dead) {
            return false;
        }

        let selected = select_location(
            self.config.respawn_position,
            &mut self.prng,
            self.world_mins,
            self.world_maxs,
            self.map_data.as_ref(),
        );
        let position = selected.map(|pos| self.wrap_position(pos));

        let agent = &mut self.agents[index];
        if let Some(position) = position {
            agent.position = position;
        }
        agent.velocity = Vec3::ZERO;
        agent.health = UNKNOWN_HEALTH;
        agent.entity_class_id = NO_CLASS;
        agent.state = AgentState::Inactive;

        let new_cell = self.grid.cell_of(agent.position);
        self.grid.move_agent(index, agent.cell_index, new_cell);
        agent.cell_index = new_cell;
        true
    }

    /// Bounded housekeeping pass continuing from `slow_iterator`: queue
    /// inactive agents near an observer and respawn dead ones.
    pub fn check_agent_spawn(&mut self) {
        let count = self.agents.len();
        if count == 0 {
            return;
        }

        let spawn_radius = self.config.spawn_radius;
        for _ in 0..SPAWN_SWEEP_BATCH.min(count) {
            let index = self.slow_iterator as usize % count;
            self.slow_iterator = ((index + 1) % count) as u32;

            match self.agents[index].state {
                AgentState::Inactive => {
                    if self.near_observer(self.agents[index].position, spawn_radius) {
                        self.queue_agent(index);
                    }
                }
                AgentState::Dead => {
                    self.respawn_agent(index);
                }
                _ => {}
            }
        }
    }

    /// Drain up to `max_spawns_per_update` queued agents into the host.
    /// Stops early once the host is at half its population maximum.
    pub fn process_spawn_queue(&mut self, host: &mut dyn EntityHost, summary: &mut UpdateSummary) {
        let spawn_radius = self.config.spawn_radius;
        let mut attempts = 0;

        while attempts < self.config.max_spawns_per_update {
            let Some(index) = self.spawn_queue.front().copied() else {
                break;
            };
            if self.agents[index].state != AgentState::Queued {
                self.spawn_queue.pop_front();
                continue;
            }

            let alive = host.alive();
            let limit = host.max_alive() / 2;
            if alive >= limit {
                debug!("Host population at {alive}/{limit}, holding spawn queue");
                break;
            }

            attempts += 1;
            self.spawn_queue.pop_front();

            // Observers may have moved on since the agent was queued.
            if !self.near_observer(self.agents[index].position, spawn_radius) {
                self.unqueue_agent(index);
                continue;
            }

            match host.spawn(&self.agents[index]) {
                Ok(spawned) => {
                    if self.activate_agent(index, &spawned) {
                        summary.spawned += 1;
                    } else {
                        warn!(
                            "Host returned entity {} already in use, dropping agent {}",
                            spawned.entity_id, index
                        );
                        self.unqueue_agent(index);
                        summary.spawn_failures += 1;
                    }
                }
                Err(e) => {
                    debug!("Spawn of agent {} failed: {}", index, e);
                    self.unqueue_agent(index);
                    summary.spawn_failures += 1;
                }
            }
        }
    }

    /// Release materialized agents that no observer is near, and reclaim the
    /// ones whose entity disappeared.
    pub fn check_agent_despawn(&mut self, host: &mut dyn EntityHost, summary: &mut UpdateSummary) {
        let despawn_radius = self.config.despawn_radius;

        let mut handles: Vec<(EntityId, usize)> =
            self.active.iter().map(|(&id, &index)| (id, index)).collect();
        handles.sort_unstable();

        for (entity, index) in handles {
            match host.entity_position(entity) {
                None => {
                    warn!("Entity {} of agent {} no longer exists", entity, index);
                    self.release_lost_agent(index);
                    summary.lost += 1;
                }
                Some(pos) => {
                    if self.near_observer(pos, despawn_radius) {
                        continue;
                    }
                    match host.despawn(&self.agents[index]) {
                        Ok(despawned) => {
                            if self.deactivate_agent(index, &despawned) {
                                summary.despawned += 1;
                            }
                        }
                        Err(e) => debug!("Despawn of agent {} failed: {}", index, e),
                    }
                }
            }
        }
    }

    /// One host frame: refresh observers, materialize, release.
    pub fn game_update(&mut self, host: &mut dyn EntityHost) -> UpdateSummary {
        let mut summary = UpdateSummary::default();
        self.observers = host.observers();
        self.process_spawn_queue(host, &mut summary);
        self.check_agent_despawn(host, &mut summary);
        summary
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::agent::Agent;
    use crate::config::Config;
    use crate::error::SpawnError;
    use crate::host::PopulationOracle;

    #[derive(Default)]
    struct MockHost {
        observers: Vec<Vec3>,
        entities: HashMap<EntityId, Vec3>,
        next_id: EntityId,
        max_alive: usize,
        fail_spawns: bool,
    }

    impl PopulationOracle for MockHost {
        fn alive(&self) -> usize {
            self.entities.len()
        }
        fn max_alive(&self) -> usize {
            self.max_alive
        }
    }

    impl EntityHost for MockHost {
        fn observers(&self) -> Vec<Vec3> {
            self.observers.clone()
        }
        fn entity_position(&self, entity: EntityId) -> Option<Vec3> {
            self.entities.get(&entity).copied()
        }
        fn spawn(&mut self, agent: &Agent) -> Result<SpawnedEntity, SpawnError> {
            if self.fail_spawns {
                return Err(SpawnError::UnsuitablePosition);
            }
            self.next_id += 1;
            self.entities.insert(self.next_id, agent.position);
            Ok(SpawnedEntity {
                entity_id: self.next_id,
                entity_class_id: 7,
                health: 100,
            })
        }
        fn despawn(&mut self, agent: &Agent) -> Result<DespawnedEntity, SpawnError> {
            let position = self
                .entities
                .remove(&agent.entity_id)
                .ok_or(SpawnError::EntityNotFound(agent.entity_id))?;
            Ok(DespawnedEntity {
                position,
                velocity: Vec3::ZERO,
                health: 55,
            })
        }
    }

    fn state() -> WorldState {
        WorldState::new(Config {
            max_agents: 200,
            group_size: 20,
            max_spawns_per_update: 4,
            ..Default::default()
        })
        .unwrap()
    }

    fn host_at(pos: Vec3) -> MockHost {
        MockHost {
            observers: vec![pos],
            max_alive: 1000,
            ..Default::default()
        }
    }

    #[test]
    fn test_queue_only_from_inactive() {
        let mut state = state();
        assert!(state.queue_agent(3));
        assert!(!state.queue_agent(3));
        assert_eq!(state.spawn_queue.len(), 1);
        state.check_invariants().unwrap();
    }

    #[test]
    fn test_sweep_queues_agents_near_observer() {
        let mut state = state();
        state.observers = vec![state.agents[5].position];
        state.check_agent_spawn();
        assert_eq!(state.agents[5].state, AgentState::Queued);
        assert!(state.spawn_queue.contains(&5));
        // 200 agents fit in a single batch, so the cursor wraps back to 0.
        assert_eq!(state.slow_iterator, 0);
        state.check_invariants().unwrap();
    }

    #[test]
    fn test_game_update_spawns_and_despawns() {
        let mut state = state();
        let target = state.agents[0].position;
        let mut host = host_at(target);
        state.observers = host.observers();
        state.check_agent_spawn();
        let queued = state.spawn_queue.len();
        assert!(queued >= 1);

        let summary = state.game_update(&mut host);
        assert_eq!(summary.spawned, queued.min(4));
        assert_eq!(state.active.len(), summary.spawned);
        state.check_invariants().unwrap();

        // Observer leaves; everything is released.
        host.observers = vec![Vec3::xy(1.0e6, 1.0e6)];
        let summary = state.game_update(&mut host);
        assert_eq!(summary.despawned, queued.min(4));
        assert!(state.active.is_empty());
        assert!(state.agents.iter().all(|a| a.state != AgentState::Active));
        assert!(state.agents.iter().any(|a| a.health == 55));
        state.check_invariants().unwrap();
    }

    #[test]
    fn test_spawn_respects_half_host_maximum() {
        let mut state = state();
        let mut host = host_at(state.agents[0].position);
        host.max_alive = 2;
        state.observers = host.observers();
        state.check_agent_spawn();
        let summary = state.game_update(&mut host);
        assert_eq!(summary.spawned, 1);
        let summary = state.game_update(&mut host);
        assert_eq!(summary.spawned, 0);
        state.check_invariants().unwrap();
    }

    #[test]
    fn test_failed_spawn_returns_agent_to_inactive() {
        let mut state = state();
        let mut host = host_at(state.agents[0].position);
        host.fail_spawns = true;
        state.observers = host.observers();
        state.check_agent_spawn();
        let summary = state.game_update(&mut host);
        assert!(summary.spawn_failures >= 1);
        assert!(state.active.is_empty());
        state.check_invariants().unwrap();
    }

    #[test]
    fn test_lost_entity_is_released() {
        let mut state = state();
        let mut host = host_at(state.agents[0].position);
        state.observers = host.observers();
        state.check_agent_spawn();
        state.game_update(&mut host);
        let (&entity, &index) = state.active.iter().next().unwrap();

        host.entities.remove(&entity);
        let summary = state.game_update(&mut host);
        assert_eq!(summary.lost, 1);
        assert_eq!(state.agents[index].state, AgentState::Inactive);
        assert_eq!(state.agents[index].entity_id, NO_ENTITY);
        state.check_invariants().unwrap();
    }

    #[test]
    fn test_killed_agent_respawns() {
        let mut state = state();
        let mut host = host_at(state.agents[0].position);
        state.observers = host.observers();
        state.check_agent_spawn();
        state.game_update(&mut host);
        let (&entity, &index) = state.active.iter().next().unwrap();

        assert!(state.entity_killed(entity));
        assert!(!state.entity_killed(entity));
        assert_eq!(state.agents[index].state, AgentState::Dead);
        state.check_invariants().unwrap();

        state.observers.clear();
        state.check_agent_spawn();
        let agent = &state.agents[index];
        assert_eq!(agent.state, AgentState::Inactive);
        assert_eq!(agent.health, UNKNOWN_HEALTH);
        assert_eq!(agent.entity_class_id, NO_CLASS);
        state.check_invariants().unwrap();
    }

    #[test]
    fn test_respawn_without_policy_stays_in_place() {
        let mut state = WorldState::new(Config {
            max_agents: 50,
            group_size: 10,
            respawn_position: crate::config::WorldLocation::None,
            ..Default::default()
        })
        .unwrap();
        let before = state.agents[1].position;
        state.agents[1].state = AgentState::Dead;
        assert!(state.respawn_agent(1));
        assert_eq!(state.agents[1].position, before);
        assert_eq!(state.agents[1].state, AgentState::Inactive);
    }
}
