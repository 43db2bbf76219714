//! move_table.rs — Per-positioner move tables and their export views
//!
//! A move table is the ordered list of (dT, dP) submove rows for a single
//! positioner in one schedule. Rows accumulate through the scheduling
//! pipeline; on export the table synthesizes the true quantized submoves,
//! appends any auto-generated antibacklash and final-creep rows, and presents
//! three views:
//!
//! - **schedule**: output-shaft degrees and seconds — consumed by the collider
//! - **hardware**: motor steps and integer milliseconds — leaves the core
//! - **cleanup**: per-row net travel and original commands — updates state
//!
//! The internal row data should not be poked directly; use the setters so
//! filler rows and policy flags stay consistent.

use fp_types::{Axis, HardwareRow, HardwareTable};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_STEPS_PER_SUBMOVE;
use crate::model::{ClampLimits, MoveFlags, PosModel, SubmoveList};

// ── Rows ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRow {
    /// Ideal theta travel for this row, output-shaft degrees
    pub dt_ideal: f64,
    /// Ideal phi travel for this row, output-shaft degrees
    pub dp_ideal: f64,
    /// Seconds to wait before executing the row
    pub prepause: f64,
    /// Seconds to wait after the row completes
    pub postpause: f64,
    /// Original request command, carried for logging
    pub command: String,
    pub cmd_val1: f64,
    pub cmd_val2: f64,
}

impl MoveRow {
    fn blank() -> Self {
        Self {
            dt_ideal: 0.0,
            dp_ideal: 0.0,
            prepause: 0.0,
            postpause: 0.0,
            command: String::new(),
            cmd_val1: 0.0,
            cmd_val2: 0.0,
        }
    }

    pub fn ideal(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Theta => self.dt_ideal,
            Axis::Phi => self.dp_ideal,
        }
    }
}

// ── Move table ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MoveTable {
    pub model: PosModel,
    pub rows: Vec<MoveRow>,
    // policy snapshot taken from the positioner state at build time
    pub should_antibacklash: bool,
    pub should_final_creep: bool,
    pub allow_cruise: bool,
    pub allow_exceed_limits: bool,
    /// Homing and expert rows bypass the anticollision machinery
    pub anticollision_exempt: bool,
}

impl MoveTable {
    pub fn new(model: PosModel) -> Self {
        let state = &model.state;
        Self {
            should_antibacklash: state.antibacklash_on,
            should_final_creep: state.final_creep_on,
            allow_cruise: !state.only_creep,
            allow_exceed_limits: false,
            anticollision_exempt: false,
            rows: Vec::new(),
            model,
        }
    }

    /// A stay-in-place table: one blank row, no auto rows.
    pub fn zero_motion(model: PosModel) -> Self {
        let mut table = Self::new(model);
        table.should_antibacklash = false;
        table.should_final_creep = false;
        table.rows.push(MoveRow::blank());
        table
    }

    pub fn posid(&self) -> &str {
        self.model.posid()
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    fn ensure_row(&mut self, rowidx: usize) {
        while self.rows.len() <= rowidx {
            self.rows.push(MoveRow::blank());
        }
    }

    /// Put or update a move distance; filler rows are generated up to the
    /// index as needed.
    pub fn set_move(&mut self, rowidx: usize, axis: Axis, distance: f64) {
        self.ensure_row(rowidx);
        match axis {
            Axis::Theta => self.rows[rowidx].dt_ideal = distance,
            Axis::Phi => self.rows[rowidx].dp_ideal = distance,
        }
    }

    pub fn set_prepause(&mut self, rowidx: usize, seconds: f64) {
        self.ensure_row(rowidx);
        self.rows[rowidx].prepause = seconds;
    }

    pub fn set_postpause(&mut self, rowidx: usize, seconds: f64) {
        self.ensure_row(rowidx);
        self.rows[rowidx].postpause = seconds;
    }

    /// Keep a copy of the original move command with the row.
    pub fn store_orig_command(&mut self, rowidx: usize, command: &str, val1: f64, val2: f64) {
        self.ensure_row(rowidx);
        self.rows[rowidx].command = command.to_string();
        self.rows[rowidx].cmd_val1 = val1;
        self.rows[rowidx].cmd_val2 = val2;
    }

    /// Append another table's rows. Policy flags are inherited from the
    /// appended table.
    pub fn extend(&mut self, other: &MoveTable) {
        self.rows.extend(other.rows.iter().cloned());
        self.should_antibacklash = other.should_antibacklash;
        self.should_final_creep = other.should_final_creep;
        self.allow_cruise = other.allow_cruise;
        self.allow_exceed_limits = other.allow_exceed_limits;
        self.anticollision_exempt = self.anticollision_exempt || other.anticollision_exempt;
    }

    pub fn total_ideal(&self, axis: Axis) -> f64 {
        self.rows.iter().map(|r| r.ideal(axis)).sum()
    }

    // ── True-move synthesis ───────────────────────────────────────────────────

    fn request_limits(&self) -> ClampLimits {
        if self.allow_exceed_limits {
            ClampLimits::None
        } else {
            ClampLimits::Targetable
        }
    }

    fn auto_row_limits(&self) -> ClampLimits {
        if self.allow_exceed_limits {
            ClampLimits::None
        } else {
            ClampLimits::Full
        }
    }

    /// Index of the last row with nonzero ideal travel per axis; the terminal
    /// creep reservation attaches there.
    fn last_moving_row(&self, axis: Axis) -> Option<usize> {
        self.rows.iter().rposition(|r| r.ideal(axis) != 0.0)
    }

    /// Synthesize the full quantized table: every user row plus the
    /// auto-generated antibacklash backup and final creep.
    pub fn calculate_true_moves(&self) -> TrueTable {
        let mut prior = [0.0_f64; 2];
        let mut has_moved = [false; 2];
        let last_moving = [self.last_moving_row(Axis::Theta), self.last_moving_row(Axis::Phi)];
        let mut out = TrueTable { posid: self.posid().to_string(), rows: Vec::new() };

        for (i, row) in self.rows.iter().enumerate() {
            let mut subs: [SubmoveList; 2] = Default::default();
            for axis in Axis::BOTH {
                let a = axis.index();
                let flags = MoveFlags {
                    allow_cruise: self.allow_cruise,
                    creep_after_cruise: self.should_final_creep
                        && self.allow_cruise
                        && last_moving[a] == Some(i),
                    limits: self.request_limits(),
                };
                subs[a] = self.model.true_move(axis, row.ideal(axis), flags, prior[a]);
                prior[a] += subs[a].net_distance();
                if subs[a].net_distance() != 0.0 {
                    has_moved[a] = true;
                }
            }
            out.rows.push(TrueRow::from_submoves(row, subs));
        }

        let mut backlash_applied = false;
        if self.should_antibacklash && (has_moved[0] || has_moved[1]) {
            let mut subs: [SubmoveList; 2] = Default::default();
            let mut amounts = [0.0_f64; 2];
            for axis in Axis::BOTH {
                let a = axis.index();
                if has_moved[a] {
                    amounts[a] =
                        -self.model.state.antibacklash_final_move_dir(axis) * self.model.state.backlash;
                }
                let flags = MoveFlags {
                    allow_cruise: self.allow_cruise,
                    creep_after_cruise: false,
                    limits: self.auto_row_limits(),
                };
                subs[a] = self.model.true_move(axis, amounts[a], flags, prior[a]);
                prior[a] += subs[a].net_distance();
            }
            backlash_applied = subs[0].net_distance() != 0.0 || subs[1].net_distance() != 0.0;
            let mut row = MoveRow::blank();
            row.command = "(auto backlash backup)".to_string();
            row.cmd_val1 = amounts[0];
            row.cmd_val2 = amounts[1];
            out.rows.push(TrueRow::from_submoves(&row, subs));
        }

        if self.should_final_creep || backlash_applied {
            let mut subs: [SubmoveList; 2] = Default::default();
            let mut errs = [0.0_f64; 2];
            for axis in Axis::BOTH {
                let a = axis.index();
                errs[a] = self.total_ideal(axis) - prior[a];
                let flags = MoveFlags {
                    allow_cruise: false,
                    creep_after_cruise: false,
                    limits: self.auto_row_limits(),
                };
                subs[a] = self.model.true_move(axis, errs[a], flags, prior[a]);
                prior[a] += subs[a].net_distance();
            }
            if !subs[0].is_empty() || !subs[1].is_empty() {
                let mut row = MoveRow::blank();
                row.command = "(auto final creep)".to_string();
                row.cmd_val1 = errs[0];
                row.cmd_val2 = errs[1];
                out.rows.push(TrueRow::from_submoves(&row, subs));
            }
        }

        out
    }

    // ── Views ─────────────────────────────────────────────────────────────────

    pub fn for_schedule(&self) -> ScheduleView {
        self.calculate_true_moves().schedule_view(self.model.state.device_loc)
    }

    pub fn for_cleanup(&self) -> CleanupView {
        self.calculate_true_moves().cleanup_view()
    }

    /// Hardware export: motor steps, speed modes, integer-millisecond pauses.
    /// Prepauses become leading pause-only rows since hardware commands only
    /// carry postpauses. Errors when a row exceeds the petalcontroller's
    /// per-submove limits.
    pub fn for_hardware(&self, required: bool) -> Result<HardwareTable, String> {
        self.calculate_true_moves().hardware_table(
            self.model.state.can_id,
            self.model.state.bus_id,
            required,
        )
    }
}

// ── Synthesized (true) rows ───────────────────────────────────────────────────

/// One source row expanded into row-aligned submoves of both axes.
#[derive(Debug, Clone)]
pub struct TrueRow {
    /// Parallel per-submove data, both axes padded to equal length
    pub subs: [SubmoveList; 2],
    pub prepause: f64,
    pub postpause: f64,
    pub command: String,
    pub cmd_val1: f64,
    pub cmd_val2: f64,
}

impl TrueRow {
    fn from_submoves(row: &MoveRow, mut subs: [SubmoveList; 2]) -> Self {
        // pad the axis with fewer submoves so both run row-aligned
        let (full, pad) = if subs[0].len() >= subs[1].len() { (0, 1) } else { (1, 0) };
        while subs[pad].len() < subs[full].len() {
            let mode = subs[full].speed_mode[subs[pad].len()];
            subs[pad].push_blank(mode);
        }
        Self {
            subs,
            prepause: row.prepause,
            postpause: row.postpause,
            command: row.command.clone(),
            cmd_val1: row.cmd_val1,
            cmd_val2: row.cmd_val2,
        }
    }

    pub fn n_subs(&self) -> usize {
        self.subs[0].len()
    }

    pub fn net_dt(&self) -> f64 {
        self.subs[0].net_distance()
    }

    pub fn net_dp(&self) -> f64 {
        self.subs[1].net_distance()
    }

    /// Wall time of the row: pauses plus the slower axis of each submove.
    pub fn duration(&self) -> f64 {
        self.prepause + self.postpause + self.move_times().sum::<f64>()
    }

    fn move_times(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.n_subs()).map(|j| self.subs[0].move_time[j].max(self.subs[1].move_time[j]))
    }
}

#[derive(Debug, Clone)]
pub struct TrueTable {
    pub posid: String,
    pub rows: Vec<TrueRow>,
}

impl TrueTable {
    pub fn net_dtdp(&self) -> [f64; 2] {
        [self.rows.iter().map(TrueRow::net_dt).sum(), self.rows.iter().map(TrueRow::net_dp).sum()]
    }

    fn schedule_view(&self, device_loc: u32) -> ScheduleView {
        let mut rows = Vec::new();
        for row in &self.rows {
            if row.n_subs() == 0 {
                // hold row: no motion, pauses only
                rows.push(ScheduleRow {
                    dt: 0.0,
                    dp: 0.0,
                    tdot: 0.0,
                    pdot: 0.0,
                    prepause: row.prepause,
                    move_time: 0.0,
                    postpause: row.postpause,
                });
                continue;
            }
            for j in 0..row.n_subs() {
                rows.push(ScheduleRow {
                    dt: row.subs[0].obs_distance[j],
                    dp: row.subs[1].obs_distance[j],
                    tdot: row.subs[0].obs_speed[j],
                    pdot: row.subs[1].obs_speed[j],
                    prepause: if j == 0 { row.prepause } else { 0.0 },
                    move_time: row.subs[0].move_time[j].max(row.subs[1].move_time[j]),
                    postpause: if j == row.n_subs() - 1 { row.postpause } else { 0.0 },
                });
            }
        }
        ScheduleView { posid: self.posid.clone(), device_loc, rows }
    }

    fn cleanup_view(&self) -> CleanupView {
        CleanupView {
            posid: self.posid.clone(),
            rows: self
                .rows
                .iter()
                .map(|r| CleanupRow {
                    dt: r.net_dt(),
                    dp: r.net_dp(),
                    command: r.command.clone(),
                    cmd_val1: r.cmd_val1,
                    cmd_val2: r.cmd_val2,
                })
                .collect(),
        }
    }

    fn hardware_table(&self, canid: u32, busid: u32, required: bool) -> Result<HardwareTable, String> {
        let mut rows = Vec::new();
        for row in &self.rows {
            if row.prepause > 0.0 {
                rows.push(HardwareRow::pause(ms_u16(row.prepause, &self.posid)?));
            }
            for j in 0..row.n_subs() {
                let steps_t = row.subs[0].motor_step[j];
                let steps_p = row.subs[1].motor_step[j];
                if steps_t.abs() > MAX_STEPS_PER_SUBMOVE || steps_p.abs() > MAX_STEPS_PER_SUBMOVE {
                    return Err(format!(
                        "{}: submove exceeds hardware step limit ({steps_t}, {steps_p})",
                        self.posid
                    ));
                }
                let move_time = row.subs[0].move_time[j].max(row.subs[1].move_time[j]);
                let postpause =
                    if j == row.n_subs() - 1 { ms_u16(row.postpause, &self.posid)? } else { 0 };
                rows.push(HardwareRow {
                    motor_steps_t: steps_t,
                    motor_steps_p: steps_p,
                    move_time_ms: (move_time * 1000.0).round() as u32,
                    postpause_ms: postpause,
                    speed_mode_t: row.subs[0].speed_mode[j] as u8,
                    speed_mode_p: row.subs[1].speed_mode[j] as u8,
                });
            }
            if row.n_subs() == 0 && row.postpause > 0.0 {
                rows.push(HardwareRow::pause(ms_u16(row.postpause, &self.posid)?));
            }
        }
        if rows.is_empty() {
            // a frozen table still ships one explicit zero-motion row
            rows.push(HardwareRow::pause(0));
        }
        Ok(HardwareTable { posid: self.posid.clone(), canid, busid, required, rows })
    }
}

fn ms_u16(seconds: f64, posid: &str) -> Result<u16, String> {
    let ms = (seconds * 1000.0).round();
    if !(0.0..=u16::MAX as f64).contains(&ms) {
        return Err(format!("{posid}: pause {seconds}s does not fit in u16 milliseconds"));
    }
    Ok(ms as u16)
}

// ── Views ─────────────────────────────────────────────────────────────────────

/// Degrees-and-seconds view consumed by the collider and the animator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub dt: f64,
    pub dp: f64,
    pub tdot: f64,
    pub pdot: f64,
    pub prepause: f64,
    pub move_time: f64,
    pub postpause: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleView {
    pub posid: String,
    pub device_loc: u32,
    pub rows: Vec<ScheduleRow>,
}

impl ScheduleView {
    /// An empty view: the positioner holds its pose for the whole schedule.
    pub fn hold(posid: &str, device_loc: u32) -> Self {
        Self { posid: posid.to_string(), device_loc, rows: Vec::new() }
    }

    pub fn total_time(&self) -> f64 {
        self.rows.iter().map(|r| r.prepause + r.move_time + r.postpause).sum()
    }

    pub fn net_dtdp(&self) -> [f64; 2] {
        [self.rows.iter().map(|r| r.dt).sum(), self.rows.iter().map(|r| r.dp).sum()]
    }

    /// Longest single submove time in the view, for stats.
    pub fn max_move_time(&self) -> f64 {
        self.rows.iter().map(|r| r.move_time).fold(0.0, f64::max)
    }
}

/// Per-row net travel plus the original commands, for updating stored state
/// after confirmed physical execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupRow {
    pub dt: f64,
    pub dp: f64,
    pub command: String,
    pub cmd_val1: f64,
    pub cmd_val2: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupView {
    pub posid: String,
    pub rows: Vec<CleanupRow>,
}

impl CleanupView {
    pub fn net_dtdp(&self) -> [f64; 2] {
        [self.rows.iter().map(|r| r.dt).sum(), self.rows.iter().map(|r| r.dp).sum()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PosState;

    fn table() -> MoveTable {
        let state = PosState::nominal("M00001", 17, 0, 1);
        MoveTable::new(PosModel::from_state(&state))
    }

    #[test]
    fn set_move_generates_filler_rows() {
        let mut t = table();
        t.set_move(2, Axis::Phi, -5.0);
        assert_eq!(t.n_rows(), 3);
        assert_eq!(t.rows[0].dp_ideal, 0.0);
        assert_eq!(t.rows[2].dp_ideal, -5.0);
    }

    #[test]
    fn final_creep_nulls_the_quantization_residual() {
        let mut t = table();
        t.set_move(0, Axis::Theta, -20.0);
        t.set_move(0, Axis::Phi, -7.3);
        let net = t.calculate_true_moves().net_dtdp();
        // residual after backlash + final creep is below one creep step
        let creep_step_shaft = 0.1 / crate::constants::GEAR_RATIO;
        assert!((net[0] + 20.0).abs() <= creep_step_shaft);
        assert!((net[1] + 7.3).abs() <= creep_step_shaft);
    }

    #[test]
    fn antibacklash_appends_backup_and_final_creep_rows() {
        let mut t = table();
        t.set_move(0, Axis::Theta, -10.0);
        let true_table = t.calculate_true_moves();
        let commands: Vec<&str> = true_table.rows.iter().map(|r| r.command.as_str()).collect();
        assert!(commands.contains(&"(auto backlash backup)"));
        assert!(commands.contains(&"(auto final creep)"));
    }

    #[test]
    fn no_motion_means_no_auto_rows() {
        let mut t = table();
        t.set_move(0, Axis::Theta, 0.0);
        let true_table = t.calculate_true_moves();
        assert_eq!(true_table.rows.len(), 1);
        assert_eq!(true_table.net_dtdp(), [0.0, 0.0]);
    }

    #[test]
    fn axes_are_padded_to_equal_submove_counts() {
        let mut t = table();
        t.set_move(0, Axis::Theta, -30.0); // cruise + creep
        t.set_move(0, Axis::Phi, 0.2); // single creep
        let true_table = t.calculate_true_moves();
        let row = &true_table.rows[0];
        assert_eq!(row.subs[0].len(), row.subs[1].len());
    }

    #[test]
    fn hardware_view_realizes_prepause_as_leading_pause_row() {
        let mut t = table();
        t.set_move(0, Axis::Theta, -5.0);
        t.set_prepause(0, 0.5);
        let hw = t.for_hardware(true).unwrap();
        assert!(hw.rows[0].is_zero_motion());
        assert_eq!(hw.rows[0].postpause_ms, 500);
        assert!(!hw.rows[1].is_zero_motion());
    }

    #[test]
    fn oversize_pause_is_rejected_not_truncated() {
        let mut t = table();
        t.set_move(0, Axis::Theta, -5.0);
        t.set_postpause(0, 90.0); // 90 s > u16 ms
        assert!(t.for_hardware(true).is_err());
    }

    #[test]
    fn zero_motion_table_exports_an_explicit_zero_row() {
        let state = PosState::nominal("M00002", 18, 0, 2);
        let t = MoveTable::zero_motion(PosModel::from_state(&state));
        let hw = t.for_hardware(true).unwrap();
        assert!(hw.is_zero_motion());
        assert!(!hw.rows.is_empty());
    }

    #[test]
    fn extend_inherits_policy_flags() {
        let mut a = table();
        a.set_move(0, Axis::Theta, 1.0);
        let state = PosState::nominal("M00003", 19, 0, 3);
        let mut b = MoveTable::new(PosModel::from_state(&state));
        b.set_move(0, Axis::Phi, -1.0);
        b.should_antibacklash = false;
        b.allow_exceed_limits = true;
        a.extend(&b);
        assert_eq!(a.n_rows(), 2);
        assert!(!a.should_antibacklash);
        assert!(a.allow_exceed_limits);
    }

    #[test]
    fn schedule_view_times_cover_pauses_and_moves() {
        let mut t = table();
        t.set_move(0, Axis::Theta, -10.0);
        t.set_prepause(0, 1.0);
        t.set_postpause(0, 0.25);
        let view = t.for_schedule();
        assert!(view.total_time() > 1.25);
        let net = view.net_dtdp();
        assert!((net[0] + 10.0).abs() < 1e-3);
    }
}
