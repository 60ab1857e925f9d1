//! Static map data supplied by the host.

use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Points of interest used by the `RandomPOI` location policy. Optional: the
/// engine falls back to border placement when none is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapData {
    pub name: Option<String>,
    pub points_of_interest: Vec<Vec3>,
}

impl MapData {
    pub fn new(name: impl Into<String>, points_of_interest: Vec<Vec3>) -> Self {
        Self {
            name: Some(name.into()),
            points_of_interest,
        }
    }
}
