//! grid.rs — Synthetic petal arrays
//!
//! Builds an nx × ny hexagonal grid of positioners at the focal-plane pitch,
//! with seeded Gaussian scatter on the calibration values so the array looks
//! like measured hardware rather than a perfect lattice.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

use petal_core::PosState;

#[derive(Debug, Clone, Deserialize)]
pub struct ArrayConfig {
    pub nx: usize,
    pub ny: usize,
    /// Center-to-center spacing of adjacent positioners, mm
    pub pitch_mm: f64,
    /// 1-sigma scatter on arm lengths, mm
    pub arm_length_scatter: f64,
    /// 1-sigma scatter on the angular offsets, deg
    pub offset_angle_scatter: f64,
    /// 1-sigma scatter on the gear calibration, dimensionless
    pub gear_calib_scatter: f64,
}

/// Lay out the grid row by row, odd rows shifted by half a pitch, exactly the
/// arrangement of the focal-plane hole pattern.
pub fn build_array(cfg: &ArrayConfig, rng: &mut StdRng) -> Vec<PosState> {
    let arm = Normal::new(0.0, cfg.arm_length_scatter).unwrap();
    let ang = Normal::new(0.0, cfg.offset_angle_scatter).unwrap();
    let gear = Normal::new(0.0, cfg.gear_calib_scatter).unwrap();
    let row_height = cfg.pitch_mm * 60.0_f64.to_radians().sin();

    let mut states = Vec::with_capacity(cfg.nx * cfg.ny);
    let mut n = 0u32;
    for j in 0..cfg.ny {
        let y = (j as f64 - (cfg.ny as f64 - 1.0) / 2.0) * row_height;
        let x_shift = (j % 2) as f64 * cfg.pitch_mm * 60.0_f64.to_radians().cos();
        for i in 0..cfg.nx {
            let x = (i as f64 - (cfg.nx as f64 - 1.0) / 2.0) * cfg.pitch_mm + x_shift;
            n += 1;
            let mut state = PosState::nominal(&format!("M{n:05}"), 100 + n, n / 256, n);
            state.offset_x = x;
            state.offset_y = y;
            state.length_r1 += arm.sample(rng);
            state.length_r2 += arm.sample(rng);
            state.offset_t = ang.sample(rng);
            state.offset_p = ang.sample(rng) / 4.0;
            state.gear_calib_t = 1.0 + gear.sample(rng);
            state.gear_calib_p = 1.0 + gear.sample(rng);
            // park everyone folded at a slightly random theta
            state.pos_t = state.offset_t + rng.gen_range(-90.0..90.0);
            state.pos_p = state.offset_p + 172.0;
            states.push(state);
        }
    }
    states
}
