//! Simulation configuration.
//!
//! A `Config` is replaced wholesale by reset, reload and load; nothing in the
//! engine mutates one in place. Its persisted form is JSON text.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::processors::Color;

/// Where agents are placed on start or respawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorldLocation {
    /// No placement. Invalid as a start policy; as a respawn policy the
    /// agent is revived where it died.
    None,
    /// A random point on the border-inset edge of the world.
    RandomBorderLocation,
    /// A random point inside the border-inset world rectangle.
    RandomLocation,
    /// A random point of interest from map data.
    RandomPOI,
    /// One of the three above, resampled on every call.
    Mixed,
}

/// A single movement rule of a processor group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementKind {
    /// Steer toward the group anchor when farther than `distance` from it.
    GroupAnchor,
    FlockSameGroup,
    AlignSameGroup,
    AvoidSameGroup,
    FlockAnyGroup,
    AlignAnyGroup,
    AvoidAnyGroup,
    Wind,
    WindInverted,
    /// Respond to nearby world events.
    WorldEvents,
}

impl MovementKind {
    /// Whether this rule looks at neighbouring agents within `distance`.
    pub fn uses_neighbours(&self) -> bool {
        matches!(
            self,
            MovementKind::FlockSameGroup
                | MovementKind::AlignSameGroup
                | MovementKind::AvoidSameGroup
                | MovementKind::FlockAnyGroup
                | MovementKind::AlignAnyGroup
                | MovementKind::AvoidAnyGroup
        )
    }

    /// Whether only neighbours from the same group count.
    pub fn same_group_only(&self) -> bool {
        matches!(
            self,
            MovementKind::FlockSameGroup
                | MovementKind::AlignSameGroup
                | MovementKind::AvoidSameGroup
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementProcessor {
    pub kind: MovementKind,
    pub distance: f32,
    pub power: f32,
}

impl MovementProcessor {
    pub fn new(kind: MovementKind, distance: f32, power: f32) -> Self {
        Self {
            kind,
            distance,
            power,
        }
    }
}

/// Behavior shared by every agent group it is assigned to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorGroup {
    /// Multiplier on the base walking speed.
    pub speed_scale: f32,
    /// Diagnostic color as `#RRGGBB`; palette color when absent.
    pub color: Option<String>,
    pub entries: Vec<MovementProcessor>,
}

impl ProcessorGroup {
    pub fn parsed_color(&self) -> Option<Color> {
        self.color.as_deref().and_then(Color::from_hex)
    }
}

impl Default for ProcessorGroup {
    fn default() -> Self {
        Self {
            speed_scale: 1.0,
            color: None,
            entries: vec![
                MovementProcessor::new(MovementKind::GroupAnchor, 40.0, 0.6),
                MovementProcessor::new(MovementKind::FlockSameGroup, 30.0, 0.3),
                MovementProcessor::new(MovementKind::AlignSameGroup, 30.0, 0.4),
                MovementProcessor::new(MovementKind::AvoidAnyGroup, 4.0, 0.8),
                MovementProcessor::new(MovementKind::Wind, 0.0, 0.25),
                MovementProcessor::new(MovementKind::WorldEvents, 0.0, 1.5),
            ],
        }
    }
}

/// Simulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub random_seed: u32,
    pub max_agents: usize,
    pub group_size: usize,
    pub start_agents_grouped: bool,
    pub start_position: WorldLocation,
    pub respawn_position: WorldLocation,
    /// Simulated agents closer than this to an observer get materialized.
    pub spawn_radius: f32,
    /// Materialized agents farther than this from every observer get released.
    pub despawn_radius: f32,
    /// Spawn requests handled per host frame.
    pub max_spawns_per_update: usize,
    /// Seconds between autosaves; `None` disables autosave.
    pub autosave_interval_secs: Option<u64>,
    /// Agent group `g` uses `processor_groups[g % len]`.
    pub processor_groups: Vec<ProcessorGroup>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            random_seed: 1337,
            max_agents: 4000,
            group_size: 40,
            start_agents_grouped: true,
            start_position: WorldLocation::RandomBorderLocation,
            respawn_position: WorldLocation::RandomBorderLocation,
            spawn_radius: 80.0,
            despawn_radius: 120.0,
            max_spawns_per_update: 2,
            autosave_interval_secs: Some(300),
            processor_groups: vec![ProcessorGroup::default()],
        }
    }
}

impl Config {
    /// `ceil(max_agents / group_size)`.
    pub fn group_count(&self) -> usize {
        if self.group_size == 0 {
            return 0;
        }
        self.max_agents.div_ceil(self.group_size)
    }

    /// Processor group driving agent group `group`.
    pub fn processor_group_for(&self, group: usize) -> ProcessorGroup {
        if self.processor_groups.is_empty() {
            return ProcessorGroup::default();
        }
        self.processor_groups[group % self.processor_groups.len()].clone()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_agents == 0 {
            return Err(ConfigError::Invalid("max_agents must be positive".into()));
        }
        if self.group_size == 0 {
            return Err(ConfigError::Invalid("group_size must be positive".into()));
        }
        if self.start_position == WorldLocation::None {
            return Err(ConfigError::Invalid(
                "start_position must name a location policy".into(),
            ));
        }
        for (name, value) in [
            ("spawn_radius", self.spawn_radius),
            ("despawn_radius", self.despawn_radius),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.despawn_radius <= self.spawn_radius {
            return Err(ConfigError::Invalid(
                "despawn_radius must exceed spawn_radius".into(),
            ));
        }
        if self.max_spawns_per_update == 0 {
            return Err(ConfigError::Invalid(
                "max_spawns_per_update must be positive".into(),
            ));
        }
        for group in &self.processor_groups {
            if !group.speed_scale.is_finite() || group.speed_scale < 0.0 {
                return Err(ConfigError::Invalid(
                    "speed_scale must be non-negative".into(),
                ));
            }
            for entry in &group.entries {
                if !entry.distance.is_finite() || entry.distance < 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "{:?} distance must be non-negative",
                        entry.kind
                    )));
                }
                if !entry.power.is_finite() {
                    return Err(ConfigError::Invalid(format!(
                        "{:?} power must be finite",
                        entry.kind
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
