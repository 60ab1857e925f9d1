//! In-process host backed by a hecs world.
//!
//! Stands in for a live game: observers and materialized walkers are plain
//! ECS entities, and the engine talks to them only through `EntityHost`.

use std::collections::HashMap;

use hecs::{Entity, World};
use walkersim_core::agent::UNKNOWN_HEALTH;
use walkersim_core::prelude::*;

#[derive(Debug, Clone, Copy)]
pub struct Position(pub Vec3);

#[derive(Debug, Clone, Copy)]
pub struct Velocity(pub Vec3);

#[derive(Debug, Clone, Copy)]
pub struct Health(pub i32);

/// Marks a player/camera.
#[derive(Debug, Clone, Copy)]
pub struct Observer;

/// A materialized walker.
#[derive(Debug, Clone, Copy)]
pub struct WalkerBody {
    pub agent: usize,
    pub class_id: i32,
}

const WALKER_CLASSES: i32 = 3;
const FULL_HEALTH: i32 = 100;

pub struct EcsHost {
    pub world: World,
    handles: HashMap<EntityId, Entity>,
    next_handle: EntityId,
    max_alive: usize,
}

impl EcsHost {
    pub fn new(max_alive: usize) -> Self {
        Self {
            world: World::new(),
            handles: HashMap::new(),
            next_handle: 1,
            max_alive,
        }
    }

    pub fn add_observer(&mut self, pos: Vec3) -> Entity {
        self.world.spawn((Position(pos), Observer))
    }

    pub fn move_observer(&mut self, observer: Entity, pos: Vec3) {
        if let Ok(mut position) = self.world.get::<&mut Position>(observer) {
            position.0 = pos;
        }
    }

    pub fn walker_count(&self) -> usize {
        self.world.query::<&WalkerBody>().iter().count()
    }

    /// Handles of all live walkers, sorted.
    pub fn walker_handles(&self) -> Vec<EntityId> {
        let mut handles: Vec<EntityId> = self.handles.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Advance walker bodies by their own velocity.
    pub fn step(&mut self, dt: f32) {
        for (_, (position, velocity)) in self.world.query_mut::<(&mut Position, &Velocity)>() {
            position.0 += velocity.0 * dt;
        }
    }

    /// Remove a walker. The engine only hears about it if the caller
    /// reports the kill.
    pub fn kill(&mut self, handle: EntityId) -> bool {
        match self.handles.remove(&handle) {
            Some(entity) => self.world.despawn(entity).is_ok(),
            None => false,
        }
    }
}

impl PopulationOracle for EcsHost {
    fn alive(&self) -> usize {
        self.walker_count()
    }

    fn max_alive(&self) -> usize {
        self.max_alive
    }
}

impl EntityHost for EcsHost {
    fn observers(&self) -> Vec<Vec3> {
        self.world
            .query::<(&Position, &Observer)>()
            .iter()
            .map(|(_, (position, _))| position.0)
            .collect()
    }

    fn entity_position(&self, entity: EntityId) -> Option<Vec3> {
        let handle = self.handles.get(&entity)?;
        self.world.get::<&Position>(*handle).ok().map(|p| p.0)
    }

    fn spawn(&mut self, agent: &Agent) -> Result<SpawnedEntity, SpawnError> {
        let alive = self.walker_count();
        if alive >= self.max_alive {
            return Err(SpawnError::PopulationCeiling {
                alive,
                max: self.max_alive,
            });
        }

        let class_id = if agent.has_entity_class() {
            agent.entity_class_id
        } else {
            1 + (agent.group as i32 % WALKER_CLASSES)
        };
        let health = if agent.health > 0 {
            agent.health
        } else {
            FULL_HEALTH
        };

        let entity = self.world.spawn((
            Position(agent.position),
            Velocity(agent.velocity),
            Health(health),
            WalkerBody {
                agent: agent.index,
                class_id,
            },
        ));
        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(handle, entity);

        Ok(SpawnedEntity {
            entity_id: handle,
            entity_class_id: class_id,
            health,
        })
    }

    fn despawn(&mut self, agent: &Agent) -> Result<DespawnedEntity, SpawnError> {
        let entity = *self
            .handles
            .get(&agent.entity_id)
            .ok_or(SpawnError::EntityNotFound(agent.entity_id))?;

        let despawned = {
            let position = self
                .world
                .get::<&Position>(entity)
                .map_err(|_| SpawnError::EntityNotFound(agent.entity_id))?;
            let velocity = self
                .world
                .get::<&Velocity>(entity)
                .map(|v| v.0)
                .unwrap_or(Vec3::ZERO);
            let health = self
                .world
                .get::<&Health>(entity)
                .map(|h| h.0)
                .unwrap_or(UNKNOWN_HEALTH);
            DespawnedEntity {
                position: position.0,
                velocity,
                health,
            }
        };

        self.handles.remove(&agent.entity_id);
        // The handle was live, so the entity exists.
        let _ = self.world.despawn(entity);
        Ok(despawned)
    }
}
