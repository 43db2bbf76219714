//! errors.rs — Failure taxonomy of the move scheduler
//!
//! Per-positioner failures are ordinary values accumulated in schedule and
//! execution outcomes. Batch-level failures abort the whole schedule and are
//! returned as a single outcome; they never leave partial side effects.

use fp_types::{Axis, Case};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::schedule::AnticollisionMode;

/// Rejections at request intake. The request is not added to the schedule.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum RequestError {
    /// Target lies outside the patrol annulus min_patrol ≤ r ≤ max_patrol
    #[error("target outside patrol annulus")]
    Unreachable,

    /// Target is inside the annulus but beyond the targetable range on one axis
    #[error("target beyond targetable range on {axis:?} (posint {value:.3}°)")]
    OutOfRange { axis: Axis, value: f64 },

    #[error("unknown positioner {0}")]
    UnknownPositioner(String),

    #[error("duplicate request for {0} in this schedule")]
    DuplicateRequest(String),

    #[error("control disabled for {0}")]
    ControlDisabled(String),

    /// Expert direct-dtdp and normal requests cannot share a schedule except
    /// under Freeze mode
    #[error("direct dtdp cannot mix with normal requests under {0:?}")]
    ExpertConflict(AnticollisionMode),

    #[error("no schedule in progress")]
    NoSchedule,

    #[error("schedule already assembled; discard or send it first")]
    AlreadyScheduled,
}

/// Per-positioner failures surfaced in schedule and execution outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PosError {
    /// Target pose collides with a fixed obstacle or a higher-precedence
    /// target pose
    TargetInfeasible(Case),
    /// No adjustment method resolved the collision; the positioner was frozen
    DynamicallyInfeasible,
    /// Transport reported a failed send for this positioner
    HardwareSendFailed,
    /// Transport reported no response for this positioner
    HardwareUnresponsive,
    /// Transport reported an unrecognized acknowledgement
    HardwareUnknownResponse,
}

/// Batch-level failures: the whole schedule aborts, no tables execute, and no
/// positioner state is mutated.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum BatchError {
    #[error("move rate limited: {current_rate:.2}/min, ready in {sec_until_ready:.0}s")]
    RateLimited { current_rate: f64, sec_until_ready: f64 },

    #[error("positioner power supplies off: {0:?}")]
    PowerOff(Vec<String>),

    #[error("CAN buses off: {0:?}")]
    BusOff(Vec<u32>),

    #[error("controller temperature limit exceeded")]
    TempLimit(BTreeMap<u32, f64>),

    #[error("no schedule in progress")]
    NoSchedule,

    #[error("internal invariant violation: {0}")]
    InternalInvariantViolation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_render_for_operators() {
        let e = RequestError::OutOfRange { axis: Axis::Phi, value: 191.25 };
        assert_eq!(e.to_string(), "target beyond targetable range on Phi (posint 191.250°)");
    }
}
