//! Agent records and lifecycle states.

use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Handle of a materialized entity in the host world.
pub type EntityId = i32;

/// Handle value of an agent with no materialized entity.
pub const NO_ENTITY: EntityId = -1;
/// Entity class of an agent that has never been materialized.
pub const NO_CLASS: i32 = 0;
/// Health of an agent whose health is not known yet.
pub const UNKNOWN_HEALTH: i32 = -1;

/// Lifecycle of an agent.
///
/// ```text
/// Inactive -> Queued -> Active -> Inactive
///                 \        \
///                  \        -> Dead -> Inactive
///                   -> Inactive (spawn failed or out of range)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum AgentState {
    /// Simulated only.
    #[default]
    Inactive = 0,
    /// Waiting for the per-frame spawn path.
    Queued = 1,
    /// Materialized; the host owns its motion until despawn.
    Active = 2,
    /// Materialized entity died; respawned by the next housekeeping sweep.
    Dead = 3,
}

impl AgentState {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(AgentState::Inactive),
            1 => Some(AgentState::Queued),
            2 => Some(AgentState::Active),
            3 => Some(AgentState::Dead),
            _ => None,
        }
    }

    /// Whether the simulation moves agents in this state.
    pub fn is_simulated(&self) -> bool {
        matches!(self, AgentState::Inactive | AgentState::Queued)
    }
}

/// One member of the simulated population.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub index: usize,
    pub group: usize,
    pub position: Vec3,
    pub velocity: Vec3,
    /// Grid cell holding this agent.
    pub cell_index: usize,
    pub entity_id: EntityId,
    pub entity_class_id: i32,
    pub health: i32,
    pub state: AgentState,
    pub last_update_tick: u32,
}

impl Agent {
    pub fn new(index: usize, group: usize) -> Self {
        Self {
            index,
            group,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            cell_index: 0,
            entity_id: NO_ENTITY,
            entity_class_id: NO_CLASS,
            health: UNKNOWN_HEALTH,
            state: AgentState::Inactive,
            last_update_tick: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == AgentState::Active
    }

    /// Whether the agent has a class from an earlier materialization.
    pub fn has_entity_class(&self) -> bool {
        self.entity_class_id != NO_CLASS && self.entity_class_id != -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_agent_is_unmaterialized() {
        let agent = Agent::new(3, 1);
        assert_eq!(agent.state, AgentState::Inactive);
        assert_eq!(agent.entity_id, NO_ENTITY);
        assert!(!agent.has_entity_class());
        assert!(!agent.is_active());
    }

    #[test]
    fn test_state_codes() {
        for state in [
            AgentState::Inactive,
            AgentState::Queued,
            AgentState::Active,
            AgentState::Dead,
        ] {
            assert_eq!(AgentState::from_i32(state as i32), Some(state));
        }
        assert_eq!(AgentState::from_i32(7), None);
        assert!(AgentState::Queued.is_simulated());
        assert!(!AgentState::Active.is_simulated());
        assert!(!AgentState::Dead.is_simulated());
    }
}
