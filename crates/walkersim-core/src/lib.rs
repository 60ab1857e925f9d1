//! WalkerSim Core - Persistent Walker Population Engine
//!
//! Simulates a large roaming population (thousands of walkers) on a
//! dedicated fixed-rate tick thread and materializes only the walkers near
//! an observer as real entities in the host.
//!
//! # Architecture
//!
//! - **World state**: agent table, spatial grid, wind, events and the shared
//!   deterministic PRNG ([`state::WorldState`])
//! - **Group processors**: weighted steering rules applied per agent group
//! - **Lifecycle**: Inactive -> Queued -> Active -> Inactive/Dead, driven by
//!   observer proximity through the [`host::EntityHost`] trait
//! - **Persistence**: compact binary save stream with exact round-trip
//!
//! # Example
//!
//! ```rust,no_run
//! use walkersim_core::prelude::*;
//!
//! let sim = Simulation::new(Config::default()).unwrap();
//!
//! // Catch up after a load, then tick in the background
//! sim.fast_advance(400).unwrap();
//! sim.start().unwrap();
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod grid;
pub mod host;
pub mod lifecycle;
pub mod location;
pub mod map;
pub mod math;
pub mod persistence;
pub mod prng;
pub mod processors;
pub mod simulation;
pub mod state;

/// Commonly used types for convenient importing
pub mod prelude {
    pub use crate::agent::{Agent, AgentState, EntityId};
    pub use crate::config::{Config, MovementKind, MovementProcessor, ProcessorGroup, WorldLocation};
    pub use crate::error::{ConfigError, SaveError, SimulationError, SpawnError};
    pub use crate::events::{EventType, WorldEvent};
    pub use crate::host::{DespawnedEntity, EntityHost, PopulationOracle, SpawnedEntity};
    pub use crate::lifecycle::UpdateSummary;
    pub use crate::map::MapData;
    pub use crate::math::Vec3;
    pub use crate::simulation::{Simulation, TickStats};
    pub use crate::state::WorldState;
}
