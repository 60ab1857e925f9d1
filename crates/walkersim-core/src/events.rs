//! World events - transient disturbances that steer nearby agents.
//!
//! Events come from the host (a gunshot, an explosion, a scare) and shrink
//! every tick until they vanish. They are read-only inputs to the group
//! processors; agent motion never feeds back into the event list.

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::grid::SpatialGrid;
use crate::math::Vec3;

/// Kinds of world events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum EventType {
    /// Draws agents toward its origin.
    Noise = 0,
    /// Pushes agents away from its origin.
    Deterrent = 1,
}

impl EventType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(EventType::Noise),
            1 => Some(EventType::Deterrent),
            _ => None,
        }
    }

    /// +1 attracts, -1 repels.
    pub fn attraction(&self) -> f32 {
        match self {
            EventType::Noise => 1.0,
            EventType::Deterrent => -1.0,
        }
    }
}

/// An active event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldEvent {
    pub kind: EventType,
    pub position: Vec3,
    /// Current reach; shrinks by `decay_rate` every tick.
    pub radius: f32,
    pub decay_rate: f32,
}

impl WorldEvent {
    pub fn new(kind: EventType, position: Vec3, radius: f32, decay_rate: f32) -> Self {
        Self {
            kind,
            position,
            radius,
            decay_rate,
        }
    }

    /// Finite origin, and a positive finite radius and decay rate.
    pub fn is_valid(&self) -> bool {
        self.position.is_finite()
            && self.radius.is_finite()
            && self.radius > 0.0
            && self.decay_rate.is_finite()
            && self.decay_rate > 0.0
    }

    pub fn is_expired(&self) -> bool {
        self.radius <= 0.0
    }

    /// Steering contribution for an agent at `pos`: toward (or away from)
    /// the origin, fading linearly to zero at the edge of the radius.
    pub fn influence_on(&self, pos: Vec3) -> Vec3 {
        if self.is_expired() {
            return Vec3::ZERO;
        }
        let dist = self.position.distance_2d(&pos);
        if dist >= self.radius {
            return Vec3::ZERO;
        }
        let weight = 1.0 - dist / self.radius;
        (self.position - pos).normalize_2d() * (weight * self.kind.attraction())
    }
}

/// Active events in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventList {
    events: Vec<WorldEvent>,
}

impl EventList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(events: Vec<WorldEvent>) -> Self {
        Self { events }
    }

    /// Add an event. Events that could never influence anything or never
    /// decay are refused.
    pub fn push(&mut self, event: WorldEvent) -> bool {
        let valid = event.is_valid();
        if valid {
            self.events.push(event);
        }
        valid
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorldEvent> {
        self.events.iter()
    }

    pub fn as_slice(&self) -> &[WorldEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Shrink every event by one tick's decay and drop the expired ones.
    /// Returns how many were removed.
    pub fn decay(&mut self) -> usize {
        for event in &mut self.events {
            event.radius -= event.decay_rate;
        }
        let before = self.events.len();
        self.events.retain(|e| !e.is_expired());
        before - self.events.len()
    }

    /// Sum the influence of every event on the agents inside its radius,
    /// into `out` (indexed by agent index). Uses the grid to find candidates.
    pub fn accumulate_forces(
        &self,
        grid: &SpatialGrid,
        agents: &[Agent],
        scratch: &mut Vec<usize>,
        out: &mut [Vec3],
    ) {
        for event in &self.events {
            scratch.clear();
            grid.query_radius(event.position, event.radius, scratch);
            for &index in scratch.iter() {
                let agent = &agents[index];
                if agent.state.is_simulated() {
                    out[index] += event.influence_on(agent.position);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::CELL_SIZE;

    #[test]
    fn test_event_decays_in_exact_ticks() {
        let mut list = EventList::new();
        assert!(list.push(WorldEvent::new(EventType::Noise, Vec3::ZERO, 10.0, 1.0)));

        for tick in 1..=10 {
            let removed = list.decay();
            if tick < 10 {
                assert_eq!(removed, 0, "removed early at tick {tick}");
                assert_eq!(list.len(), 1);
            } else {
                assert_eq!(removed, 1);
            }
        }
        assert!(list.is_empty());
    }

    #[test]
    fn test_rejects_useless_events() {
        let mut list = EventList::new();
        assert!(!list.push(WorldEvent::new(EventType::Noise, Vec3::ZERO, 0.0, 1.0)));
        assert!(!list.push(WorldEvent::new(EventType::Noise, Vec3::ZERO, 5.0, 0.0)));
        assert!(!list.push(WorldEvent::new(
            EventType::Noise,
            Vec3::xy(f32::NAN, 0.0),
            5.0,
            1.0
        )));
        assert!(list.is_empty());
    }

    #[test]
    fn test_influence_direction() {
        let noise = WorldEvent::new(EventType::Noise, Vec3::xy(10.0, 0.0), 20.0, 1.0);
        let pull = noise.influence_on(Vec3::ZERO);
        assert!(pull.x > 0.0);
        assert!((pull.x - 0.5).abs() < 1e-6);

        let deterrent = WorldEvent {
            kind: EventType::Deterrent,
            ..noise
        };
        assert!(deterrent.influence_on(Vec3::ZERO).x < 0.0);

        assert_eq!(noise.influence_on(Vec3::xy(100.0, 0.0)), Vec3::ZERO);
    }

    #[test]
    fn test_accumulate_only_reaches_agents_in_range() {
        let mut grid = SpatialGrid::new(Vec3::xy(-500.0, -500.0), Vec3::xy(500.0, 500.0), CELL_SIZE);
        let mut agents = Vec::new();
        for (i, pos) in [Vec3::xy(5.0, 0.0), Vec3::xy(300.0, 300.0)].into_iter().enumerate() {
            let mut agent = Agent::new(i, 0);
            agent.position = pos;
            agent.cell_index = grid.insert(i, pos);
            agents.push(agent);
        }

        let mut list = EventList::new();
        list.push(WorldEvent::new(EventType::Noise, Vec3::ZERO, 10.0, 1.0));

        let mut out = vec![Vec3::ZERO; agents.len()];
        let mut scratch = Vec::new();
        list.accumulate_forces(&grid, &agents, &mut scratch, &mut out);
        assert!(out[0].x < 0.0);
        assert_eq!(out[1], Vec3::ZERO);

        // Fully decayed events influence nobody.
        for _ in 0..10 {
            list.decay();
        }
        let mut out = vec![Vec3::ZERO; agents.len()];
        list.accumulate_forces(&grid, &agents, &mut scratch, &mut out);
        assert_eq!(out[0], Vec3::ZERO);
    }
}
