//! Interfaces to the embedding host.
//!
//! The engine never touches live game entities itself. Materialization,
//! despawn and population counts go through these traits, and only from the
//! per-frame path (`Simulation::game_update`), never from the tick thread.

use crate::agent::{Agent, EntityId};
use crate::error::SpawnError;
use crate::math::Vec3;

/// Result of a successful materialization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnedEntity {
    pub entity_id: EntityId,
    pub entity_class_id: i32,
    pub health: i32,
}

/// State pulled back from an entity when it is released.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DespawnedEntity {
    pub position: Vec3,
    pub velocity: Vec3,
    pub health: i32,
}

/// Host-side population counter.
pub trait PopulationOracle {
    /// Entities of the materialized kind currently alive in the host.
    fn alive(&self) -> usize;
    /// Configured host maximum. The engine only fills half of it.
    fn max_alive(&self) -> usize;
}

/// Entity spawn/despawn provider.
pub trait EntityHost: PopulationOracle {
    /// Positions of everything that should see materialized agents
    /// (players, cameras).
    fn observers(&self) -> Vec<Vec3>;

    /// Current position of a materialized entity, `None` if it no longer
    /// exists.
    fn entity_position(&self, entity: EntityId) -> Option<Vec3>;

    /// Create an entity for `agent` near its position. May fail transiently.
    fn spawn(&mut self, agent: &Agent) -> Result<SpawnedEntity, SpawnError>;

    /// Remove the entity of `agent`, returning its final state.
    fn despawn(&mut self, agent: &Agent) -> Result<DespawnedEntity, SpawnError>;
}
