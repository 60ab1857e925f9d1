//! Group processors - per-group steering.
//!
//! Each agent group gets one processor. A processor tracks the group's
//! anchor, a point a little ahead of the group's centre of mass whose heading
//! wanders slowly, so that the whole group migrates over time. Every tick it
//! turns the configured movement rules into a new velocity for each member.

use std::f32::consts::TAU;
use std::ops::Range;

use crate::agent::{Agent, AgentState};
use crate::config::{MovementKind, MovementProcessor, ProcessorGroup};
use crate::grid::SpatialGrid;
use crate::math::Vec3;

/// Base walking speed in world units per second.
pub const WALK_SPEED: f32 = 1.5;
/// How quickly steering forces change velocity, per second.
pub const STEER_GAIN: f32 = 2.0;
/// Distance between a group's centre of mass and its anchor.
const ANCHOR_LEAD: f32 = 60.0;
/// Ticks between two anchor heading knots.
const ANCHOR_KNOT_TICKS: u32 = 40 * 30;

/// RGB display color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB` (the `#` is optional).
    pub fn from_hex(text: &str) -> Option<Self> {
        let hex = text.strip_prefix('#').unwrap_or(text);
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

const PALETTE: [Color; 12] = [
    Color::rgb(0xE6, 0x19, 0x4B),
    Color::rgb(0x3C, 0xB4, 0x4B),
    Color::rgb(0xFF, 0xE1, 0x19),
    Color::rgb(0x43, 0x63, 0xD8),
    Color::rgb(0xF5, 0x82, 0x31),
    Color::rgb(0x91, 0x1E, 0xB4),
    Color::rgb(0x46, 0xF0, 0xF0),
    Color::rgb(0xF0, 0x32, 0xE6),
    Color::rgb(0xBC, 0xF6, 0x0C),
    Color::rgb(0xFA, 0xBE, 0xBE),
    Color::rgb(0x00, 0x80, 0x80),
    Color::rgb(0x9A, 0x63, 0x24),
];

/// Palette color for a group index.
pub fn color_for_index(index: usize) -> Color {
    PALETTE[index % PALETTE.len()]
}

/// Shared read-only inputs for one tick of steering.
pub struct SteeringContext<'a> {
    pub agents: &'a [Agent],
    pub grid: &'a SpatialGrid,
    pub wind: Vec3,
    /// Summed event influence per agent index; `None` when no events exist.
    pub event_forces: Option<&'a [Vec3]>,
    /// Radius of the neighbour query.
    pub neighbour_distance: f32,
    pub dt: f32,
}

#[derive(Clone, Copy)]
enum NeighbourRule {
    Flock,
    Align,
    Avoid,
}

fn neighbour_rule(kind: MovementKind) -> Option<NeighbourRule> {
    match kind {
        MovementKind::FlockSameGroup | MovementKind::FlockAnyGroup => Some(NeighbourRule::Flock),
        MovementKind::AlignSameGroup | MovementKind::AlignAnyGroup => Some(NeighbourRule::Align),
        MovementKind::AvoidSameGroup | MovementKind::AvoidAnyGroup => Some(NeighbourRule::Avoid),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupProcessor {
    pub group: usize,
    /// Agent indices belonging to the group.
    pub members: Range<usize>,
    pub anchor: Vec3,
    pub color: Color,
    pub speed_scale: f32,
    pub entries: Vec<MovementProcessor>,
}

impl GroupProcessor {
    pub fn new(group: usize, members: Range<usize>, behavior: &ProcessorGroup) -> Self {
        Self {
            group,
            members,
            anchor: Vec3::ZERO,
            color: behavior
                .parsed_color()
                .unwrap_or_else(|| color_for_index(group)),
            speed_scale: behavior.speed_scale,
            entries: behavior.entries.clone(),
        }
    }

    /// Largest neighbour radius any rule of this processor needs.
    pub fn neighbour_distance(&self) -> f32 {
        self.entries
            .iter()
            .filter(|e| e.kind.uses_neighbours())
            .map(|e| e.distance)
            .fold(0.0, f32::max)
    }

    /// Heading of the anchor at `tick`, a function of seed, group and tick
    /// only, so a restored simulation continues the same migration.
    pub fn anchor_heading(&self, seed: u32, tick: u32) -> Vec3 {
        let knot = tick / ANCHOR_KNOT_TICKS;
        let t = (tick % ANCHOR_KNOT_TICKS) as f32 / ANCHOR_KNOT_TICKS as f32;
        let a0 = knot_angle(seed, self.group, knot);
        let a1 = knot_angle(seed, self.group, knot.wrapping_add(1));

        // Shortest arc between knots.
        let mut delta = (a1 - a0) % TAU;
        if delta > TAU / 2.0 {
            delta -= TAU;
        } else if delta < -TAU / 2.0 {
            delta += TAU;
        }
        let smooth = t * t * (3.0 - 2.0 * t);
        let angle = a0 + delta * smooth;
        Vec3::xy(angle.cos(), angle.sin())
    }

    /// Recompute the anchor from the group's simulated members.
    pub fn update_anchor(
        &mut self,
        agents: &[Agent],
        seed: u32,
        tick: u32,
        world_mins: Vec3,
        world_maxs: Vec3,
    ) {
        let mut sum = Vec3::ZERO;
        let mut count = 0usize;
        for agent in &agents[self.members.clone()] {
            if agent.state.is_simulated() {
                sum += agent.position;
                count += 1;
            }
        }
        if count == 0 {
            return;
        }
        let centre = sum / count as f32;
        let anchor = centre + self.anchor_heading(seed, tick) * ANCHOR_LEAD;
        self.anchor = Vec3::xy(
            anchor.x.clamp(world_mins.x, world_maxs.x),
            anchor.y.clamp(world_mins.y, world_maxs.y),
        );
    }

    /// New velocity for `agent`. `scratch` is reused for neighbour queries.
    pub fn steer(&self, agent: &Agent, ctx: &SteeringContext, scratch: &mut Vec<usize>) -> Vec3 {
        let pos = agent.position;
        let mut force = Vec3::ZERO;

        scratch.clear();
        if ctx.neighbour_distance > 0.0 && self.entries.iter().any(|e| e.kind.uses_neighbours()) {
            ctx.grid.query_radius(pos, ctx.neighbour_distance, scratch);
        }

        for entry in &self.entries {
            match entry.kind {
                MovementKind::GroupAnchor => {
                    let to_anchor = self.anchor - pos;
                    if to_anchor.length_2d() > entry.distance {
                        force += to_anchor.normalize_2d() * entry.power;
                    }
                }
                MovementKind::Wind => force += ctx.wind * entry.power,
                MovementKind::WindInverted => force -= ctx.wind * entry.power,
                MovementKind::WorldEvents => {
                    if let Some(forces) = ctx.event_forces {
                        force += forces[agent.index] * entry.power;
                    }
                }
                kind => {
                    if let Some(rule) = neighbour_rule(kind) {
                        force += neighbour_force(agent, entry, rule, ctx.agents, scratch);
                    }
                }
            }
        }

        let max_speed = WALK_SPEED * self.speed_scale;
        (agent.velocity + force * (STEER_GAIN * ctx.dt)).limit_2d(max_speed)
    }
}

fn neighbour_force(
    agent: &Agent,
    entry: &MovementProcessor,
    rule: NeighbourRule,
    agents: &[Agent],
    candidates: &[usize],
) -> Vec3 {
    let same_group_only = entry.kind.same_group_only();
    let mut sum = Vec3::ZERO;
    let mut count = 0usize;

    for &other_index in candidates {
        if other_index == agent.index {
            continue;
        }
        let other = &agents[other_index];
        if other.state != AgentState::Inactive && other.state != AgentState::Queued {
            continue;
        }
        if same_group_only && other.group != agent.group {
            continue;
        }
        let dist = agent.position.distance_2d(&other.position);
        if dist >= entry.distance {
            continue;
        }
        match rule {
            NeighbourRule::Flock => sum += other.position,
            NeighbourRule::Align => sum += other.velocity,
            NeighbourRule::Avoid => {
                sum += (agent.position - other.position).normalize_2d()
                    * (1.0 - dist / entry.distance)
            }
        }
        count += 1;
    }

    if count == 0 {
        return Vec3::ZERO;
    }
    match rule {
        NeighbourRule::Flock => {
            ((sum / count as f32) - agent.position).normalize_2d() * entry.power
        }
        NeighbourRule::Align => {
            ((sum / count as f32) - agent.velocity).limit_2d(1.0) * entry.power
        }
        NeighbourRule::Avoid => sum * entry.power,
    }
}

fn knot_angle(seed: u32, group: usize, knot: u32) -> f32 {
    let mut h = seed ^ (group as u32).wrapping_mul(0x9E37_79B9) ^ knot.wrapping_mul(0x85EB_CA6B);
    h ^= h >> 16;
    h = h.wrapping_mul(0x7FEB_352D);
    h ^= h >> 15;
    h = h.wrapping_mul(0x846C_A68B);
    h ^= h >> 16;
    (h >> 8) as f32 / 16_777_216.0 * TAU
}
