//! Vector math shared by the grid, the agents and the save format.
//!
//! The simulation plane is X/Y; `z` is carried along so that positions can be
//! handed to hosts that use a third axis, but it never takes part in motion.

use serde::{Deserialize, Serialize};

/// 3D vector; only `x` and `y` are simulated.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Vector on the simulation plane.
    pub fn xy(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    pub fn distance_squared_2d(&self, other: &Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn distance_2d(&self, other: &Self) -> f32 {
        self.distance_squared_2d(other).sqrt()
    }

    pub fn length_2d(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Unit vector on the plane, or zero for a zero-length input.
    pub fn normalize_2d(&self) -> Self {
        let len = self.length_2d();
        if len > 0.0 {
            Self::xy(self.x / len, self.y / len)
        } else {
            Self::ZERO
        }
    }

    /// Clamp the planar length to `max`.
    pub fn limit_2d(&self, max: f32) -> Self {
        let len = self.length_2d();
        if len > max && len > 0.0 {
            Self::xy(self.x / len * max, self.y / len * max)
        } else {
            *self
        }
    }

    pub fn lerp(&self, target: &Self, t: f32) -> Self {
        *self + (*target - *self) * t
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Replace non-finite components with zero.
    pub fn sanitized(&self) -> Self {
        let fix = |v: f32| if v.is_finite() { v } else { 0.0 };
        Self::new(fix(self.x), fix(self.y), fix(self.z))
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }
}

impl std::ops::AddAssign for Vec3 {
    fn add_assign(&mut self, other: Self) {
        self.x += other.x;
        self.y += other.y;
        self.z += other.z;
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }
}

impl std::ops::SubAssign for Vec3 {
    fn sub_assign(&mut self, other: Self) {
        self.x -= other.x;
        self.y -= other.y;
        self.z -= other.z;
    }
}

impl std::ops::Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, scalar: f32) -> Self {
        Self {
            x: self.x * scalar,
            y: self.y * scalar,
            z: self.z * scalar,
        }
    }
}

impl std::ops::Div<f32> for Vec3 {
    type Output = Self;
    fn div(self, scalar: f32) -> Self {
        Self {
            x: self.x / scalar,
            y: self.y / scalar,
            z: self.z / scalar,
        }
    }
}

impl std::ops::Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// Linearly map `value` from `[in_min, in_max]` onto `[out_min, out_max]`.
pub fn remap(value: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    let span = in_max - in_min;
    if span == 0.0 {
        return out_min;
    }
    out_min + (value - in_min) / span * (out_max - out_min)
}

/// Wrap `value` into `[min, max)`.
pub fn wrap(value: f32, min: f32, max: f32) -> f32 {
    let span = max - min;
    if span <= 0.0 {
        return min;
    }
    if value >= min && value < max {
        return value;
    }
    let wrapped = (value - min).rem_euclid(span) + min;
    // rem_euclid can round up to exactly `span` for tiny negative offsets.
    if wrapped >= max {
        min
    } else {
        wrapped
    }
}
