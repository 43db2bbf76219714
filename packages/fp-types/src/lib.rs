//! # fp-types
//!
//! Shared focal-plane wire structures for the petal move-scheduling system.
//!
//! These types are used by:
//! - `petal-core`: producing hardware move tables and consuming transport responses
//! - `petal-sim`: the simulated petalcontroller transport
//! - the petalcontroller bridge: `HardwareRow` matches the packed CAN frame layout
//!
//! ## Unit Conventions
//!
//! - **Motor steps**: signed integer counts at the motor input shaft
//! - **Shaft angles**: degrees at the output shaft (gear-reduced)
//! - **Times**: integer milliseconds on the wire, `f64` seconds in the core

use std::collections::BTreeMap;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

// ── Axis identity ─────────────────────────────────────────────────────────────

/// The two axes of a positioner. Theta rotates the central body, phi the arm.
/// The discriminant is the axis *index*, not the motor axis ID on the CAN bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Axis {
    Theta = 0,
    Phi = 1,
}

impl Axis {
    pub const BOTH: [Axis; 2] = [Axis::Theta, Axis::Phi];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Axis::Theta => "theta",
            Axis::Phi => "phi",
        }
    }
}

// ── Speed modes ───────────────────────────────────────────────────────────────

/// Motor speed mode for one submove. Cruise is the spin-up/cruise/spin-down
/// profile; creep is the fine-stepped mode used for final approach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SpeedMode {
    Cruise = 0,
    Creep = 1,
}

impl SpeedMode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Cruise,
            _ => Self::Creep,
        }
    }
}

// ── Collision cases ───────────────────────────────────────────────────────────

/// Enumeration of collision cases between positioner keepout envelopes.
/// The II / III cases follow the focal-plane envelope-interference taxonomy:
/// phi arms can touch each other, or a phi arm can reach a neighbor's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Case {
    /// No interference
    I,
    /// Phi arm against a neighboring phi arm
    II,
    /// Phi arm of positioner 'A' against neighbor 'B' central body
    IIIA,
    /// Phi arm of positioner 'B' against neighbor 'A' central body
    IIIB,
    /// Against the guide-focus-alignment camera fixed keepout
    GFA,
    /// Against the petal-edge fixed keepout
    PTL,
}

impl Case {
    pub fn is_collision(self) -> bool {
        self != Case::I
    }

    pub fn with_fixed(self) -> bool {
        matches!(self, Case::GFA | Case::PTL)
    }
}

// ── Hardware move-table rows ──────────────────────────────────────────────────

/// One synchronized submove of both axes, in the packed layout the
/// petalcontroller writes onto the CAN bus (16 bytes, no padding).
///
/// Each step is one discrete motor increment: 3.3° motor in cruise mode,
/// 0.1° motor in creep mode. Sign encodes direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct HardwareRow {
    /// Signed motor step count, theta axis
    pub motor_steps_t: i32,
    /// Signed motor step count, phi axis
    pub motor_steps_p: i32,
    /// Duration of the slower of the two axis moves, milliseconds
    pub move_time_ms: u32,
    /// Hold time after the move completes, milliseconds
    pub postpause_ms: u16,
    /// Theta speed mode (`SpeedMode` discriminant)
    pub speed_mode_t: u8,
    /// Phi speed mode (`SpeedMode` discriminant)
    pub speed_mode_p: u8,
}

impl HardwareRow {
    /// A pause-only row: no motion, only a postpause.
    pub fn pause(postpause_ms: u16) -> Self {
        Self {
            motor_steps_t: 0,
            motor_steps_p: 0,
            move_time_ms: 0,
            postpause_ms,
            speed_mode_t: SpeedMode::Creep as u8,
            speed_mode_p: SpeedMode::Creep as u8,
        }
    }

    pub fn is_zero_motion(&self) -> bool {
        self.motor_steps_t == 0 && self.motor_steps_p == 0
    }
}

/// The per-positioner artifact that leaves the scheduling core: an ordered
/// list of hardware rows plus the bus routing identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareTable {
    /// Positioner serial ID, e.g. "M00912"
    pub posid: String,
    /// CAN node ID of the positioner's controller
    pub canid: u32,
    /// CAN bus index on the petalbox
    pub busid: u32,
    /// Whether failure to deliver this table fails the whole batch
    pub required: bool,
    pub rows: Vec<HardwareRow>,
}

impl HardwareTable {
    /// Total wall time of the table: moves plus postpauses.
    pub fn total_time_ms(&self) -> u64 {
        self.rows
            .iter()
            .map(|r| r.move_time_ms as u64 + r.postpause_ms as u64)
            .sum()
    }

    /// True when every row commands zero steps on both axes (a frozen table).
    pub fn is_zero_motion(&self) -> bool {
        self.rows.iter().all(HardwareRow::is_zero_motion)
    }
}

// ── Transport response taxonomy ───────────────────────────────────────────────

/// Structured response from the petalcontroller after a send-and-sync round
/// trip. Everything except `Success` and `PartialSend` is batch-level: no
/// tables were executed and no positioner moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendResponse {
    /// All tables delivered, sync pulse issued
    Success,
    /// Some tables delivered; the rest did not acknowledge
    PartialSend {
        /// Positioners whose controllers acknowledged the full table
        cleared: Vec<String>,
        /// Positioners that never responded within the timeout
        no_response: Vec<String>,
        /// Positioners with an unrecognized acknowledgement
        unknown: Vec<String>,
    },
    /// The send itself failed for the listed positioners; sync not issued
    FailSend { posids: Vec<String> },
    /// One or more positioner power supplies are off
    FailPowerOff { supplies: Vec<String> },
    /// One or more CAN buses are in bus-off state
    FailBusOff { buses: Vec<u32> },
    /// Move-rate limiter rejected the batch
    FailMoveRate { current_rate: f64, sec_until_ready: f64 },
    /// Reset-rate limiter rejected the batch
    FailResetRate { current_rate: f64, sec_until_ready: f64 },
    /// A controller exceeded its temperature limit (canid → °C)
    FailTempLimit { temps: BTreeMap<u32, f64> },
}

impl SendResponse {
    /// Batch-level failures abort the schedule without any state update.
    pub fn is_batch_failure(&self) -> bool {
        !matches!(self, SendResponse::Success | SendResponse::PartialSend { .. })
    }
}

// ── Fiber-view-camera boundary ────────────────────────────────────────────────

/// One expected spot handed to the FVC measurement collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedSpot {
    pub id: String,
    /// Azimuth about the optical axis, degrees
    pub q: f64,
    /// Arc length along the focal surface from the optical axis, mm
    pub s: f64,
    pub flags: u32,
}

/// One measured spot returned by the FVC spotmatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasuredSpot {
    pub id: String,
    pub q: f64,
    pub s: f64,
    /// Measured minus expected, degrees
    pub dq: f64,
    /// Measured minus expected, mm
    pub ds: f64,
    pub flags: u32,
    pub fwhm: f64,
    pub peak: f64,
    pub mag: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_row_is_pod_sized_for_the_wire() {
        assert_eq!(std::mem::size_of::<HardwareRow>(), 16);
        let row = HardwareRow::pause(250);
        let bytes = bytemuck::bytes_of(&row);
        let back: HardwareRow = *bytemuck::from_bytes(bytes);
        assert_eq!(back.postpause_ms, 250);
        assert!(back.is_zero_motion());
    }

    #[test]
    fn zero_motion_table() {
        let table = HardwareTable {
            posid: "M00001".into(),
            canid: 17,
            busid: 0,
            required: true,
            rows: vec![HardwareRow::pause(10), HardwareRow::pause(0)],
        };
        assert!(table.is_zero_motion());
        assert_eq!(table.total_time_ms(), 10);
    }

    #[test]
    fn batch_failure_classification() {
        assert!(!SendResponse::Success.is_batch_failure());
        assert!(!SendResponse::PartialSend {
            cleared: vec![],
            no_response: vec!["M00001".into()],
            unknown: vec![],
        }
        .is_batch_failure());
        assert!(SendResponse::FailPowerOff { supplies: vec!["PS1".into()] }.is_batch_failure());
    }
}
