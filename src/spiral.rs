use bevy::prelude::*;

use crate::config::SpiralConfig;

/// Precomputed spiral placement for every block height.
///
/// The layout is an inverse Archimedean spiral walked from the tip height
/// down to genesis: the walk starts near the hub and spirals outward, so the
/// newest blocks sit innermost and genesis ends up at the rim. Stepping theta
/// by `chord / away` keeps successive blocks roughly one plane width apart
/// along the curve regardless of radial distance.
///
/// Positions are interleaved x/z pairs in a flat buffer, so a lookup is a
/// single indexed read.
#[derive(Resource)]
pub struct BlockPositions {
    positions: Vec<f32>,
    max_height: u64,
}

impl BlockPositions {
    pub fn compute(max_height: u64, config: &SpiralConfig) -> Self {
        let count = max_height as usize + 1;
        let mut positions = vec![0.0_f32; count * 2];

        let theta_max = config.coils * std::f32::consts::TAU;
        let away_step = config.radius / theta_max;
        let chord = config.plane_size + config.plane_margin;

        let offset = config.plane_size * config.plane_offset_multiplier;
        let mut theta = (config.plane_size + offset) / away_step;

        let mut height = max_height as i64;
        while height >= 0 {
            let away = away_step * theta;
            let index = height as usize * 2;
            positions[index] = theta.cos() * away;
            positions[index + 1] = theta.sin() * away;

            theta += chord / away;
            height -= 1;
        }

        Self {
            positions,
            max_height,
        }
    }

    #[inline]
    pub fn get(&self, height: u64) -> Option<Vec2> {
        if height > self.max_height {
            return None;
        }
        let index = height as usize * 2;
        Some(Vec2::new(self.positions[index], self.positions[index + 1]))
    }

    #[inline]
    pub fn max_height(&self) -> u64 {
        self.max_height
    }

    /// Squared planar distance from an observer point to a block slot.
    #[inline]
    pub fn distance_sq(&self, height: u64, observer: Vec2) -> Option<f32> {
        self.get(height).map(|pos| pos.distance_squared(observer))
    }
}
