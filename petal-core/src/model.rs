//! model.rs — Per-device kinematics and motor-step quantization
//!
//! `PosModel` is the calibration + position snapshot a schedule works
//! against. Its central operation, `true_move`, turns an ideal output-shaft
//! delta into the sequence of discrete motor submoves the firmware will
//! actually execute: a spin-up / cruise / spin-down block when the travel is
//! long enough, creep steps for the remainder, and an optional terminal
//! creep that removes cruise-mode positional uncertainty.

use fp_types::{Axis, SpeedMode};
use serde::{Deserialize, Serialize};

use crate::constants::{
    FINAL_CREEP_DIST_MOTOR, GEAR_RATIO, SPINUPDOWN_DIST_PER_PERIOD, SPINUPDOWN_N_STEPS,
    STEPSIZE_CREEP, STEPSIZE_CRUISE, TIMER_UPDATE_RATE_HZ,
};
use crate::state::PosState;
use crate::transforms::{PosTransforms, RangeLimits};

// ── Move flags ────────────────────────────────────────────────────────────────

/// Which bound clamps the end-of-move shaft angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClampLimits {
    /// Normal requests: stay inside the antibacklash-margined range
    Targetable,
    /// Auto-generated backlash/creep rows: may use the margin itself
    Full,
    /// Hardstop-finding moves: no software clamp at all
    None,
}

#[derive(Debug, Clone, Copy)]
pub struct MoveFlags {
    pub allow_cruise: bool,
    /// Reserve a short terminal creep after the cruise block
    pub creep_after_cruise: bool,
    pub limits: ClampLimits,
}

// ── Submove list ──────────────────────────────────────────────────────────────

/// The quantized submoves of one axis for one ideal delta. Parallel vectors,
/// one entry per submove.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmoveList {
    /// Signed motor step count per submove
    pub motor_step: Vec<i32>,
    pub speed_mode: Vec<SpeedMode>,
    /// Seconds
    pub move_time: Vec<f64>,
    /// Output-shaft degrees as seen by an external observer, signed
    pub obs_distance: Vec<f64>,
    /// Output-shaft degrees per second, signed
    pub obs_speed: Vec<f64>,
}

impl SubmoveList {
    pub fn len(&self) -> usize {
        self.motor_step.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motor_step.is_empty()
    }

    /// Net output-shaft travel, degrees
    pub fn net_distance(&self) -> f64 {
        self.obs_distance.iter().sum()
    }

    pub fn total_time(&self) -> f64 {
        self.move_time.iter().sum()
    }

    /// Total commanded output-shaft travel including spin-up/down ramps,
    /// degrees. Monotonic in the requested delta.
    pub fn total_shaft_distance(&self) -> f64 {
        self.obs_distance.iter().map(|d| d.abs()).sum()
    }

    fn push(&mut self, steps: i32, mode: SpeedMode, time: f64, dist: f64) {
        self.motor_step.push(steps);
        self.speed_mode.push(mode);
        self.move_time.push(time);
        self.obs_distance.push(dist);
        self.obs_speed.push(if time > 0.0 { dist / time } else { 0.0 });
    }

    /// Zero-motion filler used to keep both axes row-aligned.
    pub fn push_blank(&mut self, mode: SpeedMode) {
        self.push(0, mode, 0.0, 0.0);
    }
}

// ── Positioner model ──────────────────────────────────────────────────────────

/// Calibration + position snapshot for one positioner. Built once per
/// schedule from the arena state; everything downstream (tables, collider
/// queries, hardware export) reads this copy, never the live state.
#[derive(Debug, Clone)]
pub struct PosModel {
    pub state: PosState,
    pub trans: PosTransforms,
}

impl PosModel {
    pub fn from_state(state: &PosState) -> Self {
        Self { trans: PosTransforms::from_state(state), state: state.clone() }
    }

    pub fn posid(&self) -> &str {
        &self.state.pos_id
    }

    /// The software-tracked current position, posint degrees.
    pub fn expected_posint_tp(&self) -> [f64; 2] {
        [self.state.pos_t, self.state.pos_p]
    }

    /// Quantize one ideal output-shaft delta into motor submoves.
    ///
    /// `prior_net` is the net output-shaft travel already scheduled for this
    /// axis ahead of this move; the range clamp applies to the end-of-move
    /// angle `pos + prior_net + delta`.
    pub fn true_move(
        &self,
        axis: Axis,
        delta_ideal: f64,
        flags: MoveFlags,
        prior_net: f64,
    ) -> SubmoveList {
        let start = self.state.pos(axis) + prior_net;
        let delta = match flags.limits {
            ClampLimits::None => delta_ideal,
            ClampLimits::Targetable => {
                let (lo, hi) = self.trans.range(axis, RangeLimits::Targetable);
                (start + delta_ideal).clamp(lo, hi) - start
            }
            ClampLimits::Full => {
                let (lo, hi) = self.trans.range(axis, RangeLimits::Full);
                (start + delta_ideal).clamp(lo, hi) - start
            }
        };

        let ratio = GEAR_RATIO * self.state.gear_calib(axis);
        let motor = delta * ratio; // motor degrees, signed
        let dir = if motor < 0.0 { -1.0 } else { 1.0 };
        let mag = motor.abs();

        let mut out = SubmoveList::default();
        let ramp = SPINUPDOWN_DIST_PER_PERIOD * self.state.spinupdown_period as f64;
        let cruise_threshold = 2.0 * ramp + self.state.min_dist_at_cruise_speed;
        let mut remaining = motor;

        if flags.allow_cruise && !self.state.only_creep && mag >= cruise_threshold {
            let reserve = if flags.creep_after_cruise { FINAL_CREEP_DIST_MOTOR } else { 0.0 };
            let n_cruise = ((mag - 2.0 * ramp - reserve) / STEPSIZE_CRUISE).round().max(0.0);
            let cruise_dist = n_cruise * STEPSIZE_CRUISE + 2.0 * ramp;
            let ramp_ticks = 2.0 * SPINUPDOWN_N_STEPS as f64 * self.state.spinupdown_period as f64;
            let time = (n_cruise + ramp_ticks) / TIMER_UPDATE_RATE_HZ;
            out.push(
                (dir * n_cruise) as i32,
                SpeedMode::Cruise,
                time,
                dir * cruise_dist / ratio,
            );
            remaining -= dir * cruise_dist;
        }

        let n_creep = (remaining / STEPSIZE_CREEP).round();
        if n_creep != 0.0 {
            let time = n_creep.abs() * self.state.creep_period as f64 / TIMER_UPDATE_RATE_HZ;
            out.push(
                n_creep as i32,
                SpeedMode::Creep,
                time,
                n_creep * STEPSIZE_CREEP / ratio,
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> PosModel {
        PosModel::from_state(&PosState::nominal("M00001", 17, 0, 1))
    }

    fn flags() -> MoveFlags {
        MoveFlags { allow_cruise: true, creep_after_cruise: false, limits: ClampLimits::Targetable }
    }

    #[test]
    fn zero_delta_produces_no_submoves() {
        let m = model();
        let subs = m.true_move(Axis::Theta, 0.0, flags(), 0.0);
        assert!(subs.is_empty());
    }

    #[test]
    fn small_delta_is_creep_only() {
        let m = model();
        // 1° shaft ≈ 337 motor degrees, below the cruise threshold
        let subs = m.true_move(Axis::Theta, 1.0, flags(), 0.0);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs.speed_mode[0], SpeedMode::Creep);
        assert!((subs.net_distance() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn long_delta_cruises_then_creeps() {
        let m = model();
        let subs = m.true_move(Axis::Theta, 30.0, flags(), 0.0);
        assert_eq!(subs.speed_mode[0], SpeedMode::Cruise);
        assert!(subs.len() <= 2);
        assert!((subs.net_distance() - 30.0).abs() < 1e-3);
        // cruise block is far faster than the same travel in creep
        assert!(subs.total_time() < 1.0);
    }

    #[test]
    fn creep_after_cruise_reserves_terminal_creep() {
        let m = model();
        let f = MoveFlags { creep_after_cruise: true, ..flags() };
        let subs = m.true_move(Axis::Theta, 30.0, f, 0.0);
        assert_eq!(subs.speed_mode.last(), Some(&SpeedMode::Creep));
        let creep_motor = subs.motor_step.last().unwrap().abs() as f64 * STEPSIZE_CREEP;
        assert!(creep_motor >= FINAL_CREEP_DIST_MOTOR - 2.0 * STEPSIZE_CRUISE);
    }

    #[test]
    fn only_creep_disables_cruise() {
        let mut state = PosState::nominal("M00002", 18, 0, 2);
        state.only_creep = true;
        let m = PosModel::from_state(&state);
        let subs = m.true_move(Axis::Phi, -25.0, flags(), 0.0);
        assert!(subs.speed_mode.iter().all(|&s| s == SpeedMode::Creep));
        assert!((subs.net_distance() + 25.0).abs() < 1e-3);
    }

    #[test]
    fn range_clamp_stops_at_targetable_limit() {
        let m = model();
        // from phi = 180, +30° would blow through the 183.1° targetable limit
        let subs = m.true_move(Axis::Phi, 30.0, flags(), 0.0);
        let end = m.state.pos_p + subs.net_distance();
        let (_, hi) = m.state.targetable_range(Axis::Phi);
        assert!(end <= hi + 1e-3);
    }

    #[test]
    fn exceed_limits_skips_the_clamp() {
        let m = model();
        let f = MoveFlags { limits: ClampLimits::None, ..flags() };
        let subs = m.true_move(Axis::Phi, 30.0, f, 0.0);
        assert!((subs.net_distance() - 30.0).abs() < 1e-3);
    }

    #[test]
    fn quantization_is_monotonic_in_total_motor_travel() {
        let m = model();
        let mut last = -1.0;
        for i in 1..200 {
            let delta = i as f64 * 0.11;
            let subs = m.true_move(Axis::Theta, delta, flags(), -90.0);
            let travel = subs.total_shaft_distance();
            assert!(travel >= last, "delta {delta}: {travel} < {last}");
            last = travel;
        }
    }

    #[test]
    fn gear_calib_scales_motor_steps() {
        let mut state = PosState::nominal("M00003", 19, 0, 3);
        state.gear_calib_t = 1.04;
        let fast = PosModel::from_state(&state);
        let nominal = model();
        let a = fast.true_move(Axis::Theta, 2.0, flags(), 0.0);
        let b = nominal.true_move(Axis::Theta, 2.0, flags(), 0.0);
        assert!(a.motor_step[0] > b.motor_step[0]);
    }
}
