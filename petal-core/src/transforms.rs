//! transforms.rs — Coordinate transforms for one positioner
//!
//! Pure conversions among the focal-plane coordinate frames:
//!
//! - **posintTP**: internal shaft angles, degrees — the authoritative state
//! - **poslocTP / poslocXY**: local to the positioner, offset-corrected
//! - **obsXY**: global focal-plate cartesian, mm
//! - **ptlXY**: petal-local cartesian, mm
//! - **QS**: focal-surface intrinsic coordinates (azimuth deg, arc-length mm)
//!
//! Every transform is deterministic and side-effect-free, and composes with
//! its inverse to ≤ 1e-9. Shaft angles are modeled unwrapped (no modulo);
//! `delta_posint_tp` picks the shortest in-range representative.

use fp_types::Axis;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{r2s_lookup, s2r_lookup};
use crate::state::PosState;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransformError {
    /// The cartesian point lies outside the patrol annulus
    #[error("point outside patrol annulus")]
    OutOfReach,
    /// No theta branch lands the arm inside the admissible range
    #[error("no admissible theta branch within range")]
    NoThetaBranch,
}

/// Which range bounds an inverse-kinematics or delta computation respects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeLimits {
    /// Hardstop to hardstop
    Full,
    /// Shrunk by the antibacklash margin on each end
    Targetable,
}

// ── Per-positioner transforms ─────────────────────────────────────────────────

/// Calibration snapshot backing the transform chain. Copy-built from a
/// `PosState` so tables and schedules can hold it without owning references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosTransforms {
    pub length_r1: f64,
    pub length_r2: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub offset_t: f64,
    pub offset_p: f64,
    t_full: (f64, f64),
    t_targetable: (f64, f64),
    p_full: (f64, f64),
    p_targetable: (f64, f64),
}

impl PosTransforms {
    pub fn from_state(state: &PosState) -> Self {
        Self {
            length_r1: state.length_r1,
            length_r2: state.length_r2,
            offset_x: state.offset_x,
            offset_y: state.offset_y,
            offset_t: state.offset_t,
            offset_p: state.offset_p,
            t_full: state.full_range(Axis::Theta),
            t_targetable: state.targetable_range(Axis::Theta),
            p_full: state.full_range(Axis::Phi),
            p_targetable: state.targetable_range(Axis::Phi),
        }
    }

    /// Admissible posint interval for one axis under the chosen limits.
    pub fn range(&self, axis: Axis, limits: RangeLimits) -> (f64, f64) {
        match (axis, limits) {
            (Axis::Theta, RangeLimits::Full) => self.t_full,
            (Axis::Theta, RangeLimits::Targetable) => self.t_targetable,
            (Axis::Phi, RangeLimits::Full) => self.p_full,
            (Axis::Phi, RangeLimits::Targetable) => self.p_targetable,
        }
    }

    pub fn in_range(&self, axis: Axis, limits: RangeLimits, value: f64) -> bool {
        let (lo, hi) = self.range(axis, limits);
        value >= lo - 1e-9 && value <= hi + 1e-9
    }

    // ── Angle frame shifts ────────────────────────────────────────────────────

    pub fn posint_to_posloc_tp(&self, tp: [f64; 2]) -> [f64; 2] {
        [tp[0] - self.offset_t, tp[1] - self.offset_p]
    }

    pub fn posloc_to_posint_tp(&self, tp: [f64; 2]) -> [f64; 2] {
        [tp[0] + self.offset_t, tp[1] + self.offset_p]
    }

    // ── Planar kinematics ─────────────────────────────────────────────────────

    /// Forward kinematics: posloc shaft angles → posloc cartesian tip position.
    pub fn posloc_tp_to_xy(&self, tp: [f64; 2]) -> [f64; 2] {
        let t = tp[0].to_radians();
        let tp_sum = (tp[0] + tp[1]).to_radians();
        [
            self.length_r1 * t.cos() + self.length_r2 * tp_sum.cos(),
            self.length_r1 * t.sin() + self.length_r2 * tp_sum.sin(),
        ]
    }

    /// Inverse kinematics: posloc cartesian → posloc shaft angles.
    ///
    /// Phi comes out on the principal elbow branch [0°, 180°]; the mirror
    /// solution is excluded by the phi hardstop. Theta is returned as the
    /// ±360° representative inside the admissible range that lies closest to
    /// `current_posloc_t`.
    pub fn posloc_xy_to_tp(
        &self,
        xy: [f64; 2],
        limits: RangeLimits,
        current_posloc_t: f64,
    ) -> Result<[f64; 2], TransformError> {
        let (r1, r2) = (self.length_r1, self.length_r2);
        let r = (xy[0] * xy[0] + xy[1] * xy[1]).sqrt();
        let (min_patrol, max_patrol) = ((r1 - r2).abs(), r1 + r2);
        if r < min_patrol - 1e-9 || r > max_patrol + 1e-9 {
            return Err(TransformError::OutOfReach);
        }
        let cos_p = ((r * r - r1 * r1 - r2 * r2) / (2.0 * r1 * r2)).clamp(-1.0, 1.0);
        // elbow angle on the principal branch: 0° extended, 180° folded
        let p_loc = cos_p.acos().to_degrees();
        let p_rad = p_loc.to_radians();
        let t_loc = xy[1].atan2(xy[0]).to_degrees()
            - (r2 * p_rad.sin()).atan2(r1 + r2 * p_rad.cos()).to_degrees();

        // pick the in-range ±360° representative of theta nearest the current angle
        let (lo, hi) = self.shifted_range(Axis::Theta, limits);
        let mut best: Option<f64> = None;
        for k in -2..=2 {
            let cand = t_loc + 360.0 * k as f64;
            if cand >= lo - 1e-9 && cand <= hi + 1e-9 {
                let better = match best {
                    None => true,
                    Some(b) => (cand - current_posloc_t).abs() < (b - current_posloc_t).abs(),
                };
                if better {
                    best = Some(cand);
                }
            }
        }
        match best {
            Some(t) => Ok([t, p_loc]),
            None => Err(TransformError::NoThetaBranch),
        }
    }

    /// Range expressed in posloc terms (ranges are stored on the posint axis).
    fn shifted_range(&self, axis: Axis, limits: RangeLimits) -> (f64, f64) {
        let (lo, hi) = self.range(axis, limits);
        let off = match axis {
            Axis::Theta => self.offset_t,
            Axis::Phi => self.offset_p,
        };
        (lo - off, hi - off)
    }

    // ── Chained conversions ───────────────────────────────────────────────────

    pub fn posint_tp_to_posloc_xy(&self, tp: [f64; 2]) -> [f64; 2] {
        self.posloc_tp_to_xy(self.posint_to_posloc_tp(tp))
    }

    /// Full inverse chain used by target requests: posloc cartesian → posint
    /// shaft angles, branch-disambiguated against the current theta.
    pub fn posloc_xy_to_posint_tp(
        &self,
        xy: [f64; 2],
        limits: RangeLimits,
        current_posint_t: f64,
    ) -> Result<[f64; 2], TransformError> {
        let tp_loc = self.posloc_xy_to_tp(xy, limits, current_posint_t - self.offset_t)?;
        Ok(self.posloc_to_posint_tp(tp_loc))
    }

    pub fn posloc_xy_to_obs_xy(&self, xy: [f64; 2]) -> [f64; 2] {
        [xy[0] + self.offset_x, xy[1] + self.offset_y]
    }

    pub fn obs_xy_to_posloc_xy(&self, xy: [f64; 2]) -> [f64; 2] {
        [xy[0] - self.offset_x, xy[1] - self.offset_y]
    }

    pub fn posint_tp_to_obs_xy(&self, tp: [f64; 2]) -> [f64; 2] {
        self.posloc_xy_to_obs_xy(self.posint_tp_to_posloc_xy(tp))
    }

    // ── Deltas ────────────────────────────────────────────────────────────────

    /// Shortest signed angular delta per axis, wrapping the target by full
    /// turns when an equivalent angle lies closer to the start and inside the
    /// admissible range.
    pub fn delta_posint_tp(
        &self,
        target: [f64; 2],
        start: [f64; 2],
        limits: RangeLimits,
    ) -> [f64; 2] {
        let mut out = [0.0; 2];
        for axis in Axis::BOTH {
            let i = axis.index();
            let (lo, hi) = self.range(axis, limits);
            let mut best = target[i] - start[i];
            let mut best_abs = best.abs();
            for k in -2..=2 {
                let cand = target[i] + 360.0 * k as f64;
                if cand >= lo - 1e-9 && cand <= hi + 1e-9 {
                    let d = cand - start[i];
                    if d.abs() < best_abs {
                        best = d;
                        best_abs = d.abs();
                    }
                }
            }
            out[i] = best;
        }
        out
    }
}

// ── Focal-surface QS ──────────────────────────────────────────────────────────

/// Global cartesian → focal-surface (Q, S): azimuth about the optical axis in
/// degrees, arc length along the aspheric surface in mm.
pub fn obs_xy_to_qs(xy: [f64; 2]) -> [f64; 2] {
    let q = xy[1].atan2(xy[0]).to_degrees();
    let r = (xy[0] * xy[0] + xy[1] * xy[1]).sqrt();
    [q, r2s_lookup(r)]
}

pub fn qs_to_obs_xy(qs: [f64; 2]) -> [f64; 2] {
    let r = s2r_lookup(qs[1]);
    let q = qs[0].to_radians();
    [r * q.cos(), r * q.sin()]
}

// ── Petal rigid transform ─────────────────────────────────────────────────────

/// Rigid 2D transform between petal-local and global focal-plate cartesian.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PetalTransform {
    /// Petal rotation about the optical axis, degrees
    pub rotation: f64,
    /// Petal origin in obsXY, mm
    pub offset_x: f64,
    pub offset_y: f64,
}

impl PetalTransform {
    pub fn identity() -> Self {
        Self { rotation: 0.0, offset_x: 0.0, offset_y: 0.0 }
    }

    pub fn ptl_xy_to_obs_xy(&self, xy: [f64; 2]) -> [f64; 2] {
        let a = self.rotation.to_radians();
        let (c, s) = (a.cos(), a.sin());
        [
            c * xy[0] - s * xy[1] + self.offset_x,
            s * xy[0] + c * xy[1] + self.offset_y,
        ]
    }

    pub fn obs_xy_to_ptl_xy(&self, xy: [f64; 2]) -> [f64; 2] {
        let a = self.rotation.to_radians();
        let (c, s) = (a.cos(), a.sin());
        let (dx, dy) = (xy[0] - self.offset_x, xy[1] - self.offset_y);
        [c * dx + s * dy, -s * dx + c * dy]
    }
}
