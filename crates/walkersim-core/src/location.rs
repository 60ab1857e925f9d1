//! Start and respawn location selection.

use std::f32::consts::TAU;

use crate::config::WorldLocation;
use crate::map::MapData;
use crate::math::{remap, Vec3};
use crate::prng::WalkerRng;

/// Distance kept from the world edge when placing agents.
pub const BORDER_SIZE: f32 = 250.0;

/// Border inset, shrunk for worlds too small to hold the full border.
fn border_size(mins: Vec3, maxs: Vec3) -> f32 {
    let smallest = (maxs.x - mins.x).min(maxs.y - mins.y);
    BORDER_SIZE.min(smallest * 0.25).max(0.0)
}

/// Uniform point inside the border-inset rectangle.
pub fn random_position(rng: &mut WalkerRng, mins: Vec3, maxs: Vec3) -> Vec3 {
    let border = border_size(mins, maxs);
    let x0 = rng.next_f64() as f32;
    let y0 = rng.next_f64() as f32;
    Vec3::xy(
        remap(x0, 0.0, 1.0, mins.x + border, maxs.x - border),
        remap(y0, 0.0, 1.0, mins.y + border, maxs.y - border),
    )
}

/// Uniform point on one of the four border-inset edges.
pub fn random_border_position(rng: &mut WalkerRng, mins: Vec3, maxs: Vec3) -> Vec3 {
    let border = border_size(mins, maxs);
    let (left, right) = (mins.x + border, maxs.x - border);
    let (top, bottom) = (mins.y + border, maxs.y - border);

    match rng.next_int(0, 4) {
        0 => Vec3::xy(remap(rng.next_f64() as f32, 0.0, 1.0, left, right), top),
        1 => Vec3::xy(right, remap(rng.next_f64() as f32, 0.0, 1.0, top, bottom)),
        2 => Vec3::xy(remap(rng.next_f64() as f32, 0.0, 1.0, left, right), bottom),
        _ => Vec3::xy(left, remap(rng.next_f64() as f32, 0.0, 1.0, top, bottom)),
    }
}

/// Random point of interest, or a border position without map data.
pub fn random_poi_position(
    rng: &mut WalkerRng,
    mins: Vec3,
    maxs: Vec3,
    map: Option<&MapData>,
) -> Vec3 {
    match map {
        Some(map) if !map.points_of_interest.is_empty() => {
            let pick = rng.next_index(map.points_of_interest.len());
            map.points_of_interest[pick]
        }
        _ => random_border_position(rng, mins, maxs),
    }
}

/// Position chosen by `policy`. `WorldLocation::None` selects nothing.
pub fn select_location(
    policy: WorldLocation,
    rng: &mut WalkerRng,
    mins: Vec3,
    maxs: Vec3,
    map: Option<&MapData>,
) -> Option<Vec3> {
    let policy = match policy {
        WorldLocation::Mixed => match rng.next_int(1, 4) {
            1 => WorldLocation::RandomBorderLocation,
            2 => WorldLocation::RandomLocation,
            _ => WorldLocation::RandomPOI,
        },
        other => other,
    };

    match policy {
        WorldLocation::None => None,
        WorldLocation::RandomBorderLocation => Some(random_border_position(rng, mins, maxs)),
        WorldLocation::RandomLocation => Some(random_position(rng, mins, maxs)),
        WorldLocation::RandomPOI => Some(random_poi_position(rng, mins, maxs, map)),
        WorldLocation::Mixed => unreachable!("mixed policy resolved above"),
    }
}

/// Radius of the disc grouped agents start in; two units per member.
pub fn group_spread(group_size: usize) -> f32 {
    (group_size as f32 * 2.0).clamp(10.0, 500.0)
}

/// Random offset inside the start disc of a group.
pub fn group_offset(rng: &mut WalkerRng, group_size: usize) -> Vec3 {
    let angle = rng.next_f64() as f32 * TAU;
    let radius = rng.next_f64() as f32 * group_spread(group_size);
    Vec3::xy(angle.cos() * radius, angle.sin() * radius)
}
