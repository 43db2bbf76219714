//! state.rs — Per-positioner state and the state store boundary
//!
//! One `PosState` per device: identity, calibration, the authoritative stored
//! shaft angles, motion parameters, and operational flags. State persists
//! across schedules; the scheduler reads a snapshot at schedule start and the
//! petal writes back only at cleanup after confirmed execution.

use fp_types::Axis;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::{
    NOMINAL_GEAR_CALIB, NOMINAL_LENGTH_R1, NOMINAL_LENGTH_R2, NOMINAL_OFFSET_P, NOMINAL_OFFSET_T,
    NOMINAL_OFFSET_X, NOMINAL_OFFSET_Y, NOMINAL_PHYSICAL_RANGE_P, NOMINAL_PHYSICAL_RANGE_T,
    PHI_HARDSTOP_MAX,
};

// ── Positioner state ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosState {
    // Identity
    /// Positioner serial ID, e.g. "M00912"
    pub pos_id: String,
    /// CAN bus index on the petalbox
    pub bus_id: u32,
    /// CAN node ID of the positioner controller
    pub can_id: u32,
    /// Integer device slot on the petal; also the deterministic tie-break key
    pub device_loc: u32,

    // Calibration
    /// Central-body arm length (theta axis to phi axis), mm
    pub length_r1: f64,
    /// Phi-arm length (phi axis to ferrule), mm
    pub length_r2: f64,
    /// Device center in obsXY, mm
    pub offset_x: f64,
    pub offset_y: f64,
    /// posint = posloc + offset, degrees
    pub offset_t: f64,
    pub offset_p: f64,
    /// Hardstop-to-hardstop travel, degrees
    pub physical_range_t: f64,
    pub physical_range_p: f64,
    /// Measured scale on the nominal gear ratio, dimensionless
    pub gear_calib_t: f64,
    pub gear_calib_p: f64,

    // Dynamic — the authoritative stored position
    /// Current theta shaft angle, posint degrees
    pub pos_t: f64,
    /// Current phi shaft angle, posint degrees
    pub pos_p: f64,

    // Motion parameters
    /// Spin up / spin down motor current, percent
    pub curr_spin_up_down: u8,
    /// Cruise motor current, percent
    pub curr_cruise: u8,
    /// Creep motor current, percent
    pub curr_creep: u8,
    /// Timer intervals per creep step; higher is slower
    pub creep_period: u32,
    /// Repetitions of each ramp displacement during spin up/down
    pub spinupdown_period: u32,
    /// Whether to do a finishing creep move after cruising
    pub final_creep_on: bool,
    /// Whether to do an antibacklash sequence at end of a move
    pub antibacklash_on: bool,
    /// Disable cruise speed entirely for this device
    pub only_creep: bool,
    /// Minimum rotor distance at cruise speed before slowing down, motor deg
    pub min_dist_at_cruise_speed: f64,
    /// Backlash removal distance, output-shaft degrees
    pub backlash: f64,
    /// Direction (+1/−1) of the final approach move per axis
    pub antibacklash_final_move_dir_t: i8,
    pub antibacklash_final_move_dir_p: i8,

    // Flags
    pub ctrl_enabled: bool,
    /// A retracted positioner contributes only its central-body keepout
    pub classified_as_retracted: bool,
    pub keepout_expansion_theta_radial: f64,
    pub keepout_expansion_theta_angular: f64,
    pub keepout_expansion_phi_radial: f64,
    pub keepout_expansion_phi_angular: f64,
}

impl PosState {
    /// A positioner with nominal calibration, parked retracted.
    pub fn nominal(pos_id: &str, can_id: u32, bus_id: u32, device_loc: u32) -> Self {
        Self {
            pos_id: pos_id.to_string(),
            bus_id,
            can_id,
            device_loc,
            length_r1: NOMINAL_LENGTH_R1.value,
            length_r2: NOMINAL_LENGTH_R2.value,
            offset_x: 0.0,
            offset_y: 0.0,
            offset_t: 0.0,
            offset_p: 0.0,
            physical_range_t: NOMINAL_PHYSICAL_RANGE_T.value,
            physical_range_p: NOMINAL_PHYSICAL_RANGE_P.value,
            gear_calib_t: 1.0,
            gear_calib_p: 1.0,
            pos_t: 0.0,
            pos_p: 180.0,
            curr_spin_up_down: 70,
            curr_cruise: 70,
            curr_creep: 70,
            creep_period: 2,
            spinupdown_period: 12,
            final_creep_on: true,
            antibacklash_on: true,
            only_creep: false,
            min_dist_at_cruise_speed: 180.0,
            backlash: 1.9,
            antibacklash_final_move_dir_t: -1,
            antibacklash_final_move_dir_p: -1,
            ctrl_enabled: true,
            classified_as_retracted: false,
            keepout_expansion_theta_radial: 0.0,
            keepout_expansion_theta_angular: 0.0,
            keepout_expansion_phi_radial: 0.0,
            keepout_expansion_phi_angular: 0.0,
        }
    }

    /// Hardstop-to-hardstop interval on the unwrapped posint axis.
    ///
    /// Theta travel is centered on the theta offset; phi travel ends at the
    /// extended hardstop. Stored angles may accumulate multi-turn counts on
    /// theta, but the range itself is a fixed interval.
    pub fn full_range(&self, axis: Axis) -> (f64, f64) {
        match axis {
            Axis::Theta => {
                let half = self.physical_range_t / 2.0;
                (self.offset_t - half, self.offset_t + half)
            }
            Axis::Phi => {
                let max = PHI_HARDSTOP_MAX + self.offset_p;
                (max - self.physical_range_p, max)
            }
        }
    }

    /// Physical range shrunk on each end by the antibacklash margin, so a
    /// backlash backup beyond any targetable angle still stays off the
    /// hardstops.
    pub fn targetable_range(&self, axis: Axis) -> (f64, f64) {
        let (lo, hi) = self.full_range(axis);
        (lo + self.backlash, hi - self.backlash)
    }

    pub fn pos(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Theta => self.pos_t,
            Axis::Phi => self.pos_p,
        }
    }

    pub fn gear_calib(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Theta => self.gear_calib_t,
            Axis::Phi => self.gear_calib_p,
        }
    }

    pub fn antibacklash_final_move_dir(&self, axis: Axis) -> f64 {
        let d = match axis {
            Axis::Theta => self.antibacklash_final_move_dir_t,
            Axis::Phi => self.antibacklash_final_move_dir_p,
        };
        d as f64
    }

    /// Smallest and largest tip radius from the device center, mm.
    pub fn patrol_annulus(&self) -> (f64, f64) {
        ((self.length_r1 - self.length_r2).abs(), self.length_r1 + self.length_r2)
    }

    /// Check calibration against nominal ± tolerance and the stored position
    /// against the targetable range. A violation means corrupted state, not a
    /// bad request.
    pub fn validate(&self) -> Result<(), String> {
        let checks = [
            ("LENGTH_R1", self.length_r1, NOMINAL_LENGTH_R1),
            ("LENGTH_R2", self.length_r2, NOMINAL_LENGTH_R2),
            ("OFFSET_T", self.offset_t, NOMINAL_OFFSET_T),
            ("OFFSET_P", self.offset_p, NOMINAL_OFFSET_P),
            ("OFFSET_X", self.offset_x, NOMINAL_OFFSET_X),
            ("OFFSET_Y", self.offset_y, NOMINAL_OFFSET_Y),
            ("PHYSICAL_RANGE_T", self.physical_range_t, NOMINAL_PHYSICAL_RANGE_T),
            ("PHYSICAL_RANGE_P", self.physical_range_p, NOMINAL_PHYSICAL_RANGE_P),
            ("GEAR_CALIB_T", self.gear_calib_t, NOMINAL_GEAR_CALIB),
            ("GEAR_CALIB_P", self.gear_calib_p, NOMINAL_GEAR_CALIB),
        ];
        for (name, value, nominal) in checks {
            if !nominal.accepts(value) {
                return Err(format!("{}: {} = {} outside nominal tolerance", self.pos_id, name, value));
            }
        }
        if self.physical_range_t < 0.0 || self.physical_range_p < 0.0 {
            return Err(format!("{}: negative physical range", self.pos_id));
        }
        for axis in Axis::BOTH {
            let (lo, hi) = self.targetable_range(axis);
            let pos = self.pos(axis);
            if pos < lo - 1e-9 || pos > hi + 1e-9 {
                return Err(format!(
                    "{}: POS_{} = {:.3} outside targetable range [{:.3}, {:.3}]",
                    self.pos_id,
                    axis.label(),
                    pos,
                    lo,
                    hi
                ));
            }
        }
        Ok(())
    }
}

// ── State store boundary ──────────────────────────────────────────────────────

/// Persistence boundary for positioner state. Reads happen at schedule start,
/// writes only at cleanup. Writes are atomic per positioner; no cross-device
/// transaction is required.
pub trait StateStore {
    fn load(&self, posid: &str) -> Option<PosState>;
    fn save(&mut self, state: &PosState) -> Result<(), String>;
    fn posids(&self) -> Vec<String>;
}

/// In-memory store used by the simulator and tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: BTreeMap<String, PosState>,
}

impl MemoryStateStore {
    pub fn new(states: impl IntoIterator<Item = PosState>) -> Self {
        Self { states: states.into_iter().map(|s| (s.pos_id.clone(), s)).collect() }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, posid: &str) -> Option<PosState> {
        self.states.get(posid).cloned()
    }

    fn save(&mut self, state: &PosState) -> Result<(), String> {
        self.states.insert(state.pos_id.clone(), state.clone());
        Ok(())
    }

    fn posids(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_state_validates() {
        let state = PosState::nominal("M00001", 17, 0, 42);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn phi_range_ends_at_extended_hardstop() {
        let state = PosState::nominal("M00001", 17, 0, 42);
        let (lo, hi) = state.full_range(Axis::Phi);
        assert_eq!(hi, 185.0);
        assert_eq!(lo, -5.0);
        let (tlo, thi) = state.targetable_range(Axis::Phi);
        assert!((tlo - (-5.0 + 1.9)).abs() < 1e-12);
        assert!((thi - (185.0 - 1.9)).abs() < 1e-12);
    }

    #[test]
    fn out_of_tolerance_arm_length_is_rejected() {
        let mut state = PosState::nominal("M00002", 18, 0, 43);
        state.length_r1 = 5.5;
        assert!(state.validate().is_err());
    }

    #[test]
    fn position_outside_targetable_range_is_rejected() {
        let mut state = PosState::nominal("M00003", 19, 0, 44);
        state.pos_p = 184.9; // inside physical, outside targetable
        assert!(state.validate().is_err());
    }

    #[test]
    fn memory_store_roundtrip() {
        let mut store = MemoryStateStore::new([PosState::nominal("M00004", 20, 1, 45)]);
        let mut s = store.load("M00004").unwrap();
        s.pos_t = 12.5;
        store.save(&s).unwrap();
        assert_eq!(store.load("M00004").unwrap().pos_t, 12.5);
        assert_eq!(store.posids(), vec!["M00004".to_string()]);
    }
}
