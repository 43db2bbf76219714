//! constants.rs — Focal-plane and motor nominals
//!
//! Constants used throughout the control of the fiber positioners: gear
//! ratios, motor timing, nominal calibration values with tolerances, and the
//! focal-surface R↔S lookup table.

// ── Gear ratios ───────────────────────────────────────────────────────────────

/// Namiki gearbox, "337:1" — output rotation per motor input rotation.
/// Exact value is ((46 + 14) / 14)^4.
pub const GEAR_RATIO_NAMIKI: f64 = {
    let r = (46.0 + 14.0) / 14.0;
    r * r * r * r
};

/// Maxon gearbox, "280:1"
pub const GEAR_RATIO_MAXON: f64 = 4100625.0 / 14641.0;

/// Faulhaber gearbox, "256:1"
pub const GEAR_RATIO_FAULHABER: f64 = 256.0;

/// The production focal plane carries namiki gearmotors on both axes.
pub const GEAR_RATIO: f64 = GEAR_RATIO_NAMIKI;

// ── Motor timing ──────────────────────────────────────────────────────────────

/// Firmware timer interrupt rate, Hz. One cruise step or one creep-period
/// countdown per tick.
pub const TIMER_UPDATE_RATE_HZ: f64 = 18e3;

/// Creep step size, motor degrees
pub const STEPSIZE_CREEP: f64 = 0.1;

/// Cruise step size, motor degrees
pub const STEPSIZE_CRUISE: f64 = 3.3;

/// Cruise rotor speed, motor deg/sec (= 9900 RPM × 360 / 60)
pub const MOTOR_SPEED_CRUISE: f64 = 9900.0 * 360.0 / 60.0;

/// Rotor distance covered by one spin-up (or spin-down) ramp repetition:
/// the triangular sequence 0.1 + 0.2 + ... + 3.3 motor degrees.
pub const SPINUPDOWN_DIST_PER_PERIOD: f64 = {
    // sum over the 33 ramp steps of k * STEPSIZE_CREEP, k = 1..=33
    let n = 33.0;
    0.1 * n * (n + 1.0) / 2.0
};

/// Number of ramp steps in one spin-up or spin-down (cruise step / creep step)
pub const SPINUPDOWN_N_STEPS: u32 = 33;

/// Intentional undershoot left for the terminal creep after a cruise move,
/// motor degrees. Removes cruise-mode positional uncertainty by always
/// approaching the target in creep mode.
pub const FINAL_CREEP_DIST_MOTOR: f64 = 20.0;

/// Largest motor step count the petalcontroller accepts in a single submove
/// row. Sized to admit a full-range creep-only travel plus homing overshoot;
/// anything larger means a corrupted table, not a long move.
pub const MAX_STEPS_PER_SUBMOVE: i32 = 2_000_000;

// ── Nominal calibration values ────────────────────────────────────────────────

/// A nominal calibration value with its acceptance tolerance. A stored value
/// outside `value ± tol` indicates corrupted calibration state.
#[derive(Debug, Clone, Copy)]
pub struct Nominal {
    pub value: f64,
    pub tol: f64,
}

impl Nominal {
    pub fn accepts(&self, x: f64) -> bool {
        x.is_finite() && (x - self.value).abs() <= self.tol
    }
}

pub const NOMINAL_LENGTH_R1: Nominal = Nominal { value: 3.0, tol: 1.0 };
pub const NOMINAL_LENGTH_R2: Nominal = Nominal { value: 3.0, tol: 1.0 };
pub const NOMINAL_OFFSET_T: Nominal = Nominal { value: 0.0, tol: 200.0 };
pub const NOMINAL_OFFSET_P: Nominal = Nominal { value: 0.0, tol: 50.0 };
pub const NOMINAL_GEAR_CALIB: Nominal = Nominal { value: 1.0, tol: 0.05 };
pub const NOMINAL_OFFSET_X: Nominal = Nominal { value: 0.0, tol: 1000.0 };
pub const NOMINAL_OFFSET_Y: Nominal = Nominal { value: 0.0, tol: 1000.0 };
pub const NOMINAL_PHYSICAL_RANGE_T: Nominal = Nominal { value: 370.0, tol: 50.0 };
pub const NOMINAL_PHYSICAL_RANGE_P: Nominal = Nominal { value: 190.0, tol: 50.0 };

/// Phi hardstop angle at the extended end, posloc degrees. The physical phi
/// range spans [PHI_HARDSTOP_MAX - PHYSICAL_RANGE_P, PHI_HARDSTOP_MAX].
pub const PHI_HARDSTOP_MAX: f64 = 185.0;

/// Minimum posloc phi admitted for targets when the petal-level phi limit is
/// switched on. Guards against over-extended arms during early operations.
pub const PHI_LIMIT_MIN: f64 = 0.0;

// ── Focal surface R ↔ S lookup ────────────────────────────────────────────────

/// (R, S) sample pairs for the aspheric focal surface: R is radial distance
/// from the optical axis in the focal plane, S is arc length along the curved
/// surface, both in mm. Monotonic, interpolated piecewise-linearly.
pub const R2S_TABLE: [(f64, f64); 22] = [
    (0.0, 0.0),
    (20.0, 20.0004),
    (40.0, 40.0032),
    (60.0, 60.0108),
    (80.0, 80.0256),
    (100.0, 100.0500),
    (120.0, 120.0864),
    (140.0, 140.1372),
    (160.0, 160.2048),
    (180.0, 180.2916),
    (200.0, 200.4000),
    (220.0, 220.5324),
    (240.0, 240.6912),
    (260.0, 260.8788),
    (280.0, 281.0976),
    (300.0, 301.3500),
    (320.0, 321.6384),
    (340.0, 341.9652),
    (360.0, 362.3328),
    (380.0, 382.7436),
    (400.0, 403.2000),
    (420.0, 423.7044),
];

/// Piecewise-linear interpolation over a monotonic sample table, clamped at
/// both ends.
fn interp(x: f64, samples: impl Iterator<Item = (f64, f64)> + Clone) -> f64 {
    let mut prev: Option<(f64, f64)> = None;
    for (xi, yi) in samples.clone() {
        if x <= xi {
            return match prev {
                None => yi,
                Some((x0, y0)) => {
                    if xi == x0 {
                        y0
                    } else {
                        y0 + (yi - y0) * (x - x0) / (xi - x0)
                    }
                }
            };
        }
        prev = Some((xi, yi));
    }
    prev.map(|(_, y)| y).unwrap_or(0.0)
}

/// Radial distance in the focal plane → arc length along the focal surface.
pub fn r2s_lookup(r: f64) -> f64 {
    interp(r, R2S_TABLE.iter().copied())
}

/// Arc length along the focal surface → radial distance in the focal plane.
pub fn s2r_lookup(s: f64) -> f64 {
    interp(s, R2S_TABLE.iter().map(|(r, s)| (*s, *r)))
}

// ── Timestamps ────────────────────────────────────────────────────────────────

/// Wall-clock timestamp for log and stats records.
pub fn timestamp_str_now() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Filesystem-safe timestamp for generated filenames.
pub fn filename_timestamp_str_now() -> String {
    chrono::Utc::now().format("%Y-%m-%d_T%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gear_ratio_is_roughly_337() {
        assert!((GEAR_RATIO - 337.47).abs() < 0.01);
    }

    #[test]
    fn spinupdown_ramp_distance() {
        // 0.1 * (1 + 2 + ... + 33) = 56.1 motor degrees
        assert!((SPINUPDOWN_DIST_PER_PERIOD - 56.1).abs() < 1e-12);
    }

    #[test]
    fn r2s_roundtrip_is_exact_on_table_span() {
        for r in [0.0, 13.7, 100.0, 255.5, 419.0] {
            let s = r2s_lookup(r);
            let back = s2r_lookup(s);
            assert!((back - r).abs() < 1e-9, "r={r} back={back}");
        }
    }

    #[test]
    fn r2s_is_monotonic() {
        let mut last = -1.0;
        for i in 0..=420 {
            let s = r2s_lookup(i as f64);
            assert!(s > last);
            last = s;
        }
    }
}
