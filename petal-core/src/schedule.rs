//! schedule.rs — Request intake and the path-adjustment loop
//!
//! One `PosSchedule` per move batch. Requests arrive in any order but are
//! processed posid-sorted; the adjustment loop always picks the positioner
//! with the earliest collision (DEVICE_LOC ascending on ties), so identical
//! inputs produce bit-identical tables.
//!
//! Collision resolution tries, in order: retract (tuck phi before swinging
//! theta), delay (wait out the neighbor), reroute (one axis at a time), and
//! finally freeze (stay put). Under `Freeze` mode only freezing is admitted.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, info, warn};

use fp_types::{Axis, Case};

use crate::collider::{Collider, Sweep, Timeline};
use crate::errors::{PosError, RequestError};
use crate::model::PosModel;
use crate::move_table::{MoveTable, ScheduleView};
use crate::stats::{AdjustMethod, SchedStats};
use crate::transforms::{obs_xy_to_qs, qs_to_obs_xy, PetalTransform, RangeLimits, TransformError};

/// Iteration cap on the path-adjustment loop. When it trips, every
/// still-colliding positioner is forcibly frozen.
pub const MAX_ADJUST_ITERS: usize = 20;

/// Posloc phi angle considered safely tucked for retract and reroute moves.
pub const RETRACT_PHI_SAFE: f64 = 144.0;

/// Overshoot factor on homing moves, so the hardstop is always reached.
pub const HOMING_OVERSHOOT_FRAC: f64 = 1.2;

/// Extra wait inserted beyond the neighbor's total move time when delaying.
const DELAY_MARGIN: f64 = 0.5;

/// Sample grid for the positioners-moving-simultaneously time series, seconds.
const NUM_MOVING_SAMPLE_PERIOD: f64 = 0.25;

// ── Modes and commands ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnticollisionMode {
    /// No collision checking at all
    None,
    /// Colliding positioners are frozen in place; no path shaping
    Freeze,
    /// Full path adjustment; infeasible targets kept as best effort
    Adjust,
    /// Full path adjustment, but infeasible targets are frozen immediately
    AdjustRequestedOnly,
}

/// Coordinate system of a target request. Each variant carries two scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveCommand {
    QS,
    ObsXY,
    PtlXY,
    PoslocXY,
    PoslocTP,
    PosintTP,
    DTdP,
    DQdS,
    ObsDXDY,
    PoslocDXDY,
}

impl MoveCommand {
    pub fn label(self) -> &'static str {
        match self {
            MoveCommand::QS => "QS",
            MoveCommand::ObsXY => "obsXY",
            MoveCommand::PtlXY => "ptlXY",
            MoveCommand::PoslocXY => "poslocXY",
            MoveCommand::PoslocTP => "poslocTP",
            MoveCommand::PosintTP => "posintTP",
            MoveCommand::DTdP => "dTdP",
            MoveCommand::DQdS => "dQdS",
            MoveCommand::ObsDXDY => "obsdXdY",
            MoveCommand::PoslocDXDY => "poslocdXdY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HomingAxis {
    Theta,
    Phi,
    Both,
}

impl HomingAxis {
    fn selects(self, axis: Axis) -> bool {
        matches!(
            (self, axis),
            (HomingAxis::Both, _) | (HomingAxis::Theta, Axis::Theta) | (HomingAxis::Phi, Axis::Phi)
        )
    }
}

// ── Requests and outcomes ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Request {
    pub command: MoveCommand,
    pub u: f64,
    pub v: f64,
    pub log_note: String,
    /// Resolved absolute target, posint degrees
    pub target_posint: [f64; 2],
    /// Shortest in-range delta from the expected position
    pub delta: [f64; 2],
}

/// Structured result of `schedule_moves`. Per-positioner failures live here
/// as values; nothing about scheduling raises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleOutcome {
    pub schedule_id: String,
    /// Every posid holding a (possibly zero-motion) table
    pub scheduled: Vec<String>,
    pub errors: BTreeMap<String, PosError>,
    /// Requested positioners whose target will not be reached
    pub not_reached: BTreeSet<String>,
    pub collisions_found: usize,
    pub adjustment_iters: usize,
}

// ── Schedule ──────────────────────────────────────────────────────────────────

pub struct PosSchedule {
    pub schedule_id: String,
    pub mode: AnticollisionMode,
    /// Arena-ordered calibration + position snapshots; index i matches the
    /// collider's unit i
    models: Vec<PosModel>,
    idx_by_posid: BTreeMap<String, usize>,
    petal_transform: PetalTransform,
    phi_limit_on: bool,
    requests: BTreeMap<String, Request>,
    tables: BTreeMap<String, MoveTable>,
    has_normal: bool,
    has_expert: bool,
    assembled: bool,
}

impl PosSchedule {
    pub fn new(
        schedule_id: String,
        mode: AnticollisionMode,
        models: Vec<PosModel>,
        petal_transform: PetalTransform,
        phi_limit_on: bool,
    ) -> Self {
        let idx_by_posid =
            models.iter().enumerate().map(|(i, m)| (m.posid().to_string(), i)).collect();
        Self {
            schedule_id,
            mode,
            models,
            idx_by_posid,
            petal_transform,
            phi_limit_on,
            requests: BTreeMap::new(),
            tables: BTreeMap::new(),
            has_normal: false,
            has_expert: false,
            assembled: false,
        }
    }

    pub fn n_requests(&self) -> usize {
        self.requests.len()
    }

    /// Whether `schedule_moves` has run on this schedule.
    pub fn is_assembled(&self) -> bool {
        self.assembled
    }

    pub fn tables(&self) -> &BTreeMap<String, MoveTable> {
        &self.tables
    }

    pub fn model(&self, posid: &str) -> Option<&PosModel> {
        self.idx_by_posid.get(posid).map(|&i| &self.models[i])
    }

    fn admit(&self, posid: &str) -> Result<usize, RequestError> {
        if self.assembled {
            return Err(RequestError::AlreadyScheduled);
        }
        let &idx = self
            .idx_by_posid
            .get(posid)
            .ok_or_else(|| RequestError::UnknownPositioner(posid.to_string()))?;
        if !self.models[idx].state.ctrl_enabled {
            return Err(RequestError::ControlDisabled(posid.to_string()));
        }
        if self.requests.contains_key(posid) || self.tables.contains_key(posid) {
            return Err(RequestError::DuplicateRequest(posid.to_string()));
        }
        Ok(idx)
    }

    // ── Request intake ────────────────────────────────────────────────────────

    /// Register one target request. The target is transformed to posintTP,
    /// checked for reachability, and stored; the move table is synthesized at
    /// `schedule_moves`. Returns the resolved posint target.
    pub fn request_target(
        &mut self,
        posid: &str,
        command: MoveCommand,
        u: f64,
        v: f64,
        log_note: &str,
    ) -> Result<[f64; 2], RequestError> {
        let idx = self.admit(posid)?;
        if self.has_expert && self.mode != AnticollisionMode::Freeze {
            return Err(RequestError::ExpertConflict(self.mode));
        }
        let model = &self.models[idx];
        let trans = &model.trans;
        let expected = model.expected_posint_tp();

        let target = match command {
            MoveCommand::PosintTP => [u, v],
            MoveCommand::PoslocTP => trans.posloc_to_posint_tp([u, v]),
            MoveCommand::DTdP => [expected[0] + u, expected[1] + v],
            MoveCommand::PoslocXY => self.ik(idx, [u, v], expected)?,
            MoveCommand::ObsXY => {
                let xy = trans.obs_xy_to_posloc_xy([u, v]);
                self.ik(idx, xy, expected)?
            }
            MoveCommand::PtlXY => {
                let obs = self.petal_transform.ptl_xy_to_obs_xy([u, v]);
                let xy = trans.obs_xy_to_posloc_xy(obs);
                self.ik(idx, xy, expected)?
            }
            MoveCommand::QS => {
                let obs = qs_to_obs_xy([u, v]);
                let xy = trans.obs_xy_to_posloc_xy(obs);
                self.ik(idx, xy, expected)?
            }
            MoveCommand::DQdS => {
                let qs0 = obs_xy_to_qs(trans.posint_tp_to_obs_xy(expected));
                let obs = qs_to_obs_xy([qs0[0] + u, qs0[1] + v]);
                let xy = trans.obs_xy_to_posloc_xy(obs);
                self.ik(idx, xy, expected)?
            }
            MoveCommand::ObsDXDY => {
                let obs0 = trans.posint_tp_to_obs_xy(expected);
                let xy = trans.obs_xy_to_posloc_xy([obs0[0] + u, obs0[1] + v]);
                self.ik(idx, xy, expected)?
            }
            MoveCommand::PoslocDXDY => {
                let xy0 = trans.posint_tp_to_posloc_xy(expected);
                self.ik(idx, [xy0[0] + u, xy0[1] + v], expected)?
            }
        };

        let model = &self.models[idx];
        for axis in Axis::BOTH {
            if !model.trans.in_range(axis, RangeLimits::Targetable, target[axis.index()]) {
                return Err(RequestError::OutOfRange { axis, value: target[axis.index()] });
            }
        }
        if self.phi_limit_on {
            let p_loc = target[1] - model.trans.offset_p;
            if p_loc < crate::constants::PHI_LIMIT_MIN {
                return Err(RequestError::OutOfRange { axis: Axis::Phi, value: target[1] });
            }
        }

        let delta = model.trans.delta_posint_tp(target, expected, RangeLimits::Targetable);
        debug!(
            posid,
            command = command.label(),
            "request: target posintTP ({:.3}, {:.3}), delta ({:.3}, {:.3})",
            target[0],
            target[1],
            delta[0],
            delta[1]
        );
        self.requests.insert(
            posid.to_string(),
            Request { command, u, v, log_note: log_note.to_string(), target_posint: target, delta },
        );
        self.has_normal = true;
        Ok(target)
    }

    fn ik(
        &self,
        idx: usize,
        posloc_xy: [f64; 2],
        expected: [f64; 2],
    ) -> Result<[f64; 2], RequestError> {
        self.models[idx]
            .trans
            .posloc_xy_to_posint_tp(posloc_xy, RangeLimits::Targetable, expected[0])
            .map_err(|e| match e {
                TransformError::OutOfReach => RequestError::Unreachable,
                TransformError::NoThetaBranch => {
                    RequestError::OutOfRange { axis: Axis::Theta, value: f64::NAN }
                }
            })
    }

    /// Expert path: a raw (dT, dP) move with no range check and no
    /// anticollision. Mutually exclusive with normal requests except under
    /// `Freeze` mode.
    pub fn request_direct_dtdp(
        &mut self,
        posid: &str,
        dtdp: [f64; 2],
        log_note: &str,
    ) -> Result<(), RequestError> {
        let idx = self.admit(posid)?;
        if self.has_normal && self.mode != AnticollisionMode::Freeze {
            return Err(RequestError::ExpertConflict(self.mode));
        }
        let model = self.models[idx].clone();
        let mut table = MoveTable::new(model);
        table.allow_exceed_limits = true;
        table.anticollision_exempt = true;
        table.set_move(0, Axis::Theta, dtdp[0]);
        table.set_move(0, Axis::Phi, dtdp[1]);
        table.store_orig_command(0, "direct_dTdP", dtdp[0], dtdp[1]);
        info!(posid, note = log_note, "expert direct dtdp ({:.3}, {:.3})", dtdp[0], dtdp[1]);
        self.tables.insert(posid.to_string(), table);
        self.has_expert = true;
        Ok(())
    }

    /// Hardstop-finding moves: one large-delta row per selected axis, range
    /// clamp off and anticollision disabled. With `debounce`, each axis backs
    /// off and re-approaches its stop in creep.
    pub fn request_homing(
        &mut self,
        posids: &[String],
        axis_sel: HomingAxis,
        debounce: bool,
    ) -> Result<(), RequestError> {
        for posid in posids {
            let idx = self.admit(posid)?;
            let model = self.models[idx].clone();
            let span_t = model.state.physical_range_t;
            let span_p = model.state.physical_range_p;
            let mut table = MoveTable::new(model);
            table.allow_exceed_limits = true;
            table.anticollision_exempt = true;
            table.should_antibacklash = false;
            table.should_final_creep = false;

            // theta homes against its low hardstop, phi against the folded
            // (high) hardstop
            let dirs = [-1.0, 1.0];
            let spans = [span_t, span_p];
            let mut row = 0;
            for axis in Axis::BOTH {
                if !axis_sel.selects(axis) {
                    continue;
                }
                let a = axis.index();
                table.set_move(row, axis, dirs[a] * spans[a] * HOMING_OVERSHOOT_FRAC);
                row += 1;
                if debounce {
                    table.set_move(row, axis, -dirs[a] * 2.0);
                    row += 1;
                    table.set_move(row, axis, dirs[a] * 3.0);
                    row += 1;
                }
            }
            let cmd = if debounce { "home_and_debounce" } else { "home_no_debounce" };
            let sel_t = axis_sel.selects(Axis::Theta) as u8 as f64;
            let sel_p = axis_sel.selects(Axis::Phi) as u8 as f64;
            table.store_orig_command(0, cmd, sel_t, sel_p);
            info!(posid = posid.as_str(), cmd, "homing requested");
            self.tables.insert(posid.to_string(), table);
            self.has_expert = true;
        }
        Ok(())
    }

    // ── Schedule assembly ─────────────────────────────────────────────────────

    /// Build move tables for every request, run the static feasibility check
    /// and the dynamic path-adjustment loop, and return the per-positioner
    /// outcome. Tables stay in the schedule for the send step.
    pub fn schedule_moves(&mut self, collider: &Collider, stats: &mut SchedStats) -> ScheduleOutcome {
        let t0 = Instant::now();
        self.assembled = true;
        let mut errors: BTreeMap<String, PosError> = BTreeMap::new();
        let mut not_reached: BTreeSet<String> = BTreeSet::new();

        // 1. one-row tables straight from the requests
        for (posid, req) in &self.requests {
            let idx = self.idx_by_posid[posid];
            let mut table = MoveTable::new(self.models[idx].clone());
            table.set_move(0, Axis::Theta, req.delta[0]);
            table.set_move(0, Axis::Phi, req.delta[1]);
            table.store_orig_command(0, req.command.label(), req.u, req.v);
            self.tables.insert(posid.clone(), table);
        }
        stats.set_num_move_tables(self.tables.len());

        if self.mode == AnticollisionMode::None {
            stats.add_scheduling_time(t0.elapsed().as_secs_f64());
            return self.outcome(errors, not_reached, 0, 0);
        }

        // 2. static feasibility of the target poses, posid-sorted so target
        //    precedence is reproducible
        let mut accepted: BTreeMap<usize, [f64; 2]> = BTreeMap::new();
        let sorted_requests: Vec<String> = self.requests.keys().cloned().collect();
        for posid in &sorted_requests {
            let idx = self.idx_by_posid[posid];
            let target = self.requests[posid].target_posint;
            let mut case = collider.spatial_collision_with_fixed(idx, target);
            if !case.is_collision() {
                for &j in collider.pos_neighbors(idx) {
                    let other_pose = accepted
                        .get(&j)
                        .copied()
                        .or_else(|| {
                            let other = &self.models[j];
                            let other_id = other.posid();
                            // non-requesting neighbors block with their
                            // current pose; pending requests are judged at
                            // their own turn
                            if self.requests.contains_key(other_id) {
                                None
                            } else {
                                Some(other.expected_posint_tp())
                            }
                        });
                    if let Some(pose) = other_pose {
                        let c = collider.spatial_collision_between_positioners(idx, target, j, pose);
                        if c.is_collision() {
                            case = c;
                            break;
                        }
                    }
                }
            }
            if case.is_collision() {
                warn!(posid = posid.as_str(), ?case, "target pose infeasible");
                errors.insert(posid.clone(), PosError::TargetInfeasible(case));
                match self.mode {
                    AnticollisionMode::Adjust => {
                        // best effort: keep the table, the dynamic loop may
                        // still freeze it
                        accepted.insert(idx, target);
                    }
                    _ => {
                        let model = self.models[idx].clone();
                        self.tables.insert(posid.clone(), MoveTable::zero_motion(model));
                        not_reached.insert(posid.clone());
                    }
                }
            } else {
                accepted.insert(idx, target);
            }
        }

        // 3. dynamic path adjustment
        let (iters, collisions_found) =
            self.adjust_paths(collider, stats, &mut errors, &mut not_reached);

        stats.add_adjustment_iters(iters);
        stats.set_max_table_time(self.max_submove_time());
        stats.set_num_moving(self.num_moving_series());
        stats.add_scheduling_time(t0.elapsed().as_secs_f64());
        self.outcome(errors, not_reached, collisions_found, iters)
    }

    fn outcome(
        &self,
        errors: BTreeMap<String, PosError>,
        not_reached: BTreeSet<String>,
        collisions_found: usize,
        adjustment_iters: usize,
    ) -> ScheduleOutcome {
        ScheduleOutcome {
            schedule_id: self.schedule_id.clone(),
            scheduled: self.tables.keys().cloned().collect(),
            errors,
            not_reached,
            collisions_found,
            adjustment_iters,
        }
    }

    /// The dynamic check loop: find the earliest collision, adjust that
    /// positioner, repeat. Returns (iterations, collisions found).
    fn adjust_paths(
        &mut self,
        collider: &Collider,
        stats: &mut SchedStats,
        errors: &mut BTreeMap<String, PosError>,
        not_reached: &mut BTreeSet<String>,
    ) -> (usize, usize) {
        let mut iters = 0;
        let mut all_colliders: BTreeSet<String> = BTreeSet::new();
        loop {
            let earliest = self.earliest_collisions(collider);
            if earliest.is_empty() {
                break;
            }
            for hit in &earliest {
                all_colliders.insert(self.models[hit.idx].posid().to_string());
            }
            stats.add_collisions_found(
                earliest.iter().map(|h| self.models[h.idx].posid().to_string()),
            );

            if iters >= MAX_ADJUST_ITERS {
                // give up: freeze everything still colliding
                for hit in &earliest {
                    let posid = self.models[hit.idx].posid().to_string();
                    if self.tables.contains_key(&posid) {
                        let model = self.models[hit.idx].clone();
                        self.tables.insert(posid.clone(), MoveTable::zero_motion(model));
                        stats.add_collision_resolved(AdjustMethod::Freeze, &posid);
                        errors.insert(posid.clone(), PosError::DynamicallyInfeasible);
                        not_reached.insert(posid);
                    }
                }
                warn!(
                    schedule = self.schedule_id.as_str(),
                    "adjustment iteration limit hit; froze remaining colliders"
                );
                break;
            }
            iters += 1;

            // earliest collision first, DEVICE_LOC ascending on ties
            let target = earliest
                .iter()
                .min_by(|a, b| {
                    a.time
                        .total_cmp(&b.time)
                        .then_with(|| collider.device_loc(a.idx).cmp(&collider.device_loc(b.idx)))
                })
                .copied();
            let Some(target) = target else { break };
            self.resolve_one(collider, stats, errors, not_reached, target);
        }
        (iters, all_colliders.len())
    }

    /// Apply the first adjustment method that passes a recheck for the given
    /// collision. Freezing always succeeds.
    fn resolve_one(
        &mut self,
        collider: &Collider,
        stats: &mut SchedStats,
        errors: &mut BTreeMap<String, PosError>,
        not_reached: &mut BTreeSet<String>,
        hit: CollisionHit,
    ) {
        let posid = self.models[hit.idx].posid().to_string();
        let ctx = AdjustCtx { partner_total_time: hit.partner_total_time };
        let methods: &[(AdjustMethod, u8)] = match self.mode {
            AnticollisionMode::Freeze => &[(AdjustMethod::Freeze, 0)],
            _ => &[
                (AdjustMethod::Retract, 0),
                (AdjustMethod::Delay, 0),
                (AdjustMethod::Reroute, 0),
                (AdjustMethod::Reroute, 1),
                (AdjustMethod::Freeze, 0),
            ],
        };

        for &(method, variant) in methods {
            let candidate = match method {
                AdjustMethod::Retract => self.retract_table(hit.idx),
                AdjustMethod::Delay => self.delay_table(&posid, &ctx),
                AdjustMethod::Reroute => self.reroute_table(hit.idx, variant),
                AdjustMethod::Freeze => Some(MoveTable::zero_motion(self.models[hit.idx].clone())),
            };
            let Some(candidate) = candidate else { continue };
            if self.recheck(collider, hit.idx, &candidate) {
                debug!(posid = posid.as_str(), method = method.label(), case = ?hit.case, "collision resolved");
                self.tables.insert(posid.clone(), candidate);
                stats.add_collision_resolved(method, &posid);
                if method == AdjustMethod::Freeze {
                    errors.insert(posid.clone(), PosError::DynamicallyInfeasible);
                    not_reached.insert(posid.clone());
                }
                return;
            }
        }

        // no method cleared the recheck (a frozen pose can itself be swept by
        // a neighbor); freeze and let later iterations adjust the neighbor
        self.tables.insert(posid.clone(), MoveTable::zero_motion(self.models[hit.idx].clone()));
        stats.add_collision_resolved(AdjustMethod::Freeze, &posid);
        errors.insert(posid.clone(), PosError::DynamicallyInfeasible);
        not_reached.insert(posid);
    }

    // ── Collision gathering ───────────────────────────────────────────────────

    fn view_of(&self, idx: usize) -> ScheduleView {
        let model = &self.models[idx];
        match self.tables.get(model.posid()) {
            Some(t) if !t.anticollision_exempt => t.for_schedule(),
            _ => ScheduleView::hold(model.posid(), model.state.device_loc),
        }
    }

    fn has_live_table(&self, idx: usize) -> bool {
        self.tables
            .get(self.models[idx].posid())
            .map(|t| !t.anticollision_exempt)
            .unwrap_or(false)
    }

    /// Earliest collision per positioner across all neighbor pairs and fixed
    /// obstacles. Only positioners with live tables are reported (static
    /// neighbors cannot be adjusted, their moving partner is).
    fn earliest_collisions(&self, collider: &Collider) -> Vec<CollisionHit> {
        let n = self.models.len();
        let mut hits: Vec<Option<CollisionHit>> = vec![None; n];
        let update = |idx: usize, sweep: Sweep, partner_total: f64, hits: &mut Vec<Option<CollisionHit>>| {
            if !sweep.collided() {
                return;
            }
            let better = match &hits[idx] {
                None => true,
                Some(h) => sweep.collision_time < h.time,
            };
            if better {
                hits[idx] = Some(CollisionHit {
                    idx,
                    time: sweep.collision_time,
                    case: sweep.collision_case,
                    partner_total_time: partner_total,
                });
            }
        };

        for i in 0..n {
            if !self.has_live_table(i) {
                continue;
            }
            let view_i = self.view_of(i);
            let tp_i = self.models[i].expected_posint_tp();

            for &j in collider.pos_neighbors(i) {
                // each moving pair once; moving-vs-static always from the mover
                if self.has_live_table(j) && j < i {
                    continue;
                }
                let view_j = self.view_of(j);
                let tp_j = self.models[j].expected_posint_tp();
                let [si, sj] =
                    collider.spacetime_collision_between_positioners(i, tp_i, &view_i, j, tp_j, &view_j);
                update(i, si, view_j.total_time(), &mut hits);
                if self.has_live_table(j) {
                    update(j, sj, view_i.total_time(), &mut hits);
                }
            }

            let sweep = collider.spacetime_collision_with_fixed(i, tp_i, &view_i);
            update(i, sweep, view_i.total_time(), &mut hits);
        }
        hits.into_iter().flatten().collect()
    }

    /// A candidate table passes when its sweep clears every neighbor and
    /// every fixed obstacle.
    fn recheck(&self, collider: &Collider, idx: usize, candidate: &MoveTable) -> bool {
        let view = candidate.for_schedule();
        let tp = self.models[idx].expected_posint_tp();
        for &j in collider.pos_neighbors(idx) {
            let view_j = self.view_of(j);
            let tp_j = self.models[j].expected_posint_tp();
            let [si, _] =
                collider.spacetime_collision_between_positioners(idx, tp, &view, j, tp_j, &view_j);
            if si.collided() {
                return false;
            }
        }
        !collider.spacetime_collision_with_fixed(idx, tp, &view).collided()
    }

    // ── Adjustment strategies ─────────────────────────────────────────────────

    /// Retract-rotate-extend: tuck phi to the safe angle, swing theta inside
    /// the safety envelope, re-extend phi at the destination.
    fn retract_table(&self, idx: usize) -> Option<MoveTable> {
        let model = &self.models[idx];
        let req = self.requests.get(model.posid())?;
        let start = model.expected_posint_tp();
        let target = req.target_posint;
        let safe_posint = RETRACT_PHI_SAFE + model.trans.offset_p;
        let (_, hi) = model.trans.range(Axis::Phi, RangeLimits::Targetable);
        let inner = safe_posint.max(start[1]).max(target[1]).min(hi);

        let mut table = MoveTable::new(model.clone());
        table.set_move(0, Axis::Phi, inner - start[1]);
        table.set_move(1, Axis::Theta, req.delta[0]);
        table.set_move(2, Axis::Phi, target[1] - inner);
        table.store_orig_command(0, req.command.label(), req.u, req.v);
        Some(table)
    }

    /// Wait until the colliding partner has finished moving, then run the
    /// original table.
    fn delay_table(&self, posid: &str, ctx: &AdjustCtx) -> Option<MoveTable> {
        if ctx.partner_total_time <= 0.0 {
            return None;
        }
        let mut table = self.tables.get(posid)?.clone();
        let current = table.rows.first().map(|r| r.prepause).unwrap_or(0.0);
        let pause = current + ctx.partner_total_time + DELAY_MARGIN;
        // the hardware realizes pauses in u16 milliseconds
        if pause > 60.0 {
            return None;
        }
        table.set_prepause(0, pause);
        Some(table)
    }

    /// One axis at a time: theta-first (variant 0) or phi-first (variant 1).
    fn reroute_table(&self, idx: usize, variant: u8) -> Option<MoveTable> {
        let model = &self.models[idx];
        let req = self.requests.get(model.posid())?;
        let mut table = MoveTable::new(model.clone());
        let (first, second) = if variant == 0 { (Axis::Theta, Axis::Phi) } else { (Axis::Phi, Axis::Theta) };
        table.set_move(0, first, req.delta[first.index()]);
        table.set_move(1, second, req.delta[second.index()]);
        table.store_orig_command(0, req.command.label(), req.u, req.v);
        Some(table)
    }

    // ── Stats helpers ─────────────────────────────────────────────────────────

    fn max_submove_time(&self) -> f64 {
        self.tables.values().map(|t| t.for_schedule().max_move_time()).fold(0.0, f64::max)
    }

    /// Time series of how many positioners move simultaneously.
    fn num_moving_series(&self) -> BTreeMap<i64, usize> {
        let timelines: Vec<Timeline> = self
            .tables
            .values()
            .map(|t| {
                Timeline::from_view(&t.for_schedule(), t.model.expected_posint_tp())
            })
            .collect();
        let total = timelines.iter().map(Timeline::total_time).fold(0.0, f64::max);
        let mut series = BTreeMap::new();
        let mut t = 0.0;
        while t <= total + 1e-9 {
            let count = timelines.iter().filter(|tl| tl.is_moving(t)).count();
            series.insert((t * 1000.0).round() as i64, count);
            t += NUM_MOVING_SAMPLE_PERIOD;
        }
        series
    }
}

#[derive(Debug, Clone, Copy)]
struct CollisionHit {
    idx: usize,
    time: f64,
    case: Case,
    partner_total_time: f64,
}

/// Context handed to adjustment strategies.
struct AdjustCtx {
    partner_total_time: f64,
}
