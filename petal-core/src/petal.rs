//! petal.rs — One petal: positioner arena, schedule lifecycle, hardware send
//!
//! The petal owns the dense arena of positioner states (index-addressed — no
//! owning cross-references anywhere), the collider built over that arena, the
//! stats record, and the two external collaborators: the state store and the
//! hardware transport. Everything here is sequential; the only blocking call
//! is the synchronous transport round trip.
//!
//! Cleanup discipline: stored positions are mutated only after the transport
//! confirms receipt and sync. A batch-level failure leaves every positioner's
//! stored state byte-identical to before the call.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use fp_types::{Axis, HardwareTable, SendResponse};

use crate::animator::{Animator, ItemStyle};
use crate::collider::{Collider, ColliderConfig, Timeline};
use crate::errors::{BatchError, PosError, RequestError};
use crate::model::PosModel;
use crate::schedule::{
    AnticollisionMode, HomingAxis, MoveCommand, PosSchedule, ScheduleOutcome,
};
use crate::state::{PosState, StateStore};
use crate::stats::SchedStats;
use crate::transforms::{PetalTransform, RangeLimits};
use crate::transport::{PetalTransport, DEFAULT_SEND_TIMEOUT};

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetalConfig {
    pub petal_id: u32,
    pub petal_transform: PetalTransform,
    pub anticollision: AnticollisionMode,
    /// Reject targets below the minimum posloc phi angle
    pub phi_limit_on: bool,
    /// Transport round-trip timeout, seconds
    pub send_timeout_sec: f64,
}

impl Default for PetalConfig {
    fn default() -> Self {
        Self {
            petal_id: 0,
            petal_transform: PetalTransform::identity(),
            anticollision: AnticollisionMode::Adjust,
            phi_limit_on: false,
            send_timeout_sec: DEFAULT_SEND_TIMEOUT.as_secs_f64(),
        }
    }
}

/// Result of a send-and-execute round trip that was not a batch failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteSummary {
    /// Positioners whose stored state was updated from the cleanup view
    pub updated: Vec<String>,
    pub failures: BTreeMap<String, PosError>,
}

// ── Petal ─────────────────────────────────────────────────────────────────────

pub struct Petal {
    cfg: PetalConfig,
    /// Arena: index i is the identity used by the collider and schedules
    states: Vec<PosState>,
    idx_by_posid: BTreeMap<String, usize>,
    collider: Collider,
    stats: SchedStats,
    store: Box<dyn StateStore>,
    transport: Box<dyn PetalTransport>,
    schedule: Option<PosSchedule>,
    schedule_counter: u64,
}

impl Petal {
    /// Load every positioner from the store, validate its state, and build
    /// the collider over the arena. Arena order is posid-sorted.
    pub fn new(
        cfg: PetalConfig,
        collider_cfg: ColliderConfig,
        store: Box<dyn StateStore>,
        transport: Box<dyn PetalTransport>,
    ) -> Result<Self, String> {
        let mut states = Vec::new();
        for posid in store.posids() {
            let state = store
                .load(&posid)
                .ok_or_else(|| format!("state store lost positioner {posid}"))?;
            state.validate()?;
            states.push(state);
        }
        let idx_by_posid =
            states.iter().enumerate().map(|(i, s)| (s.pos_id.clone(), i)).collect();
        let collider = Collider::new(collider_cfg, &states);
        info!(petal = cfg.petal_id, n_pos = states.len(), "petal initialized");
        Ok(Self {
            cfg,
            states,
            idx_by_posid,
            collider,
            stats: SchedStats::new(),
            store,
            transport,
            schedule: None,
            schedule_counter: 0,
        })
    }

    pub fn n_positioners(&self) -> usize {
        self.states.len()
    }

    pub fn posids(&self) -> Vec<String> {
        self.idx_by_posid.keys().cloned().collect()
    }

    pub fn state(&self, posid: &str) -> Option<&PosState> {
        self.idx_by_posid.get(posid).map(|&i| &self.states[i])
    }

    pub fn stats(&self) -> &SchedStats {
        &self.stats
    }

    pub fn collider(&self) -> &Collider {
        &self.collider
    }

    pub fn anticollision_mode(&self) -> AnticollisionMode {
        self.cfg.anticollision
    }

    pub fn set_anticollision_mode(&mut self, mode: AnticollisionMode) {
        self.cfg.anticollision = mode;
    }

    /// Push a calibration update into the arena and rebuild the collider
    /// geometry. Rejected if the new state fails validation.
    pub fn update_calibration(&mut self, state: PosState) -> Result<(), String> {
        state.validate()?;
        let &idx = self
            .idx_by_posid
            .get(&state.pos_id)
            .ok_or_else(|| format!("unknown positioner {}", state.pos_id))?;
        self.store.save(&state)?;
        self.states[idx] = state;
        self.collider.refresh_calibration(&self.states);
        Ok(())
    }

    // ── Schedule lifecycle ────────────────────────────────────────────────────

    /// Open a new schedule against a snapshot of the current arena state.
    /// Any unsent schedule is discarded (its tables die, no state changes).
    pub fn begin_schedule(&mut self) -> String {
        if self.schedule.is_some() {
            warn!("discarding unsent schedule");
        }
        self.schedule_counter += 1;
        let id = format!("{:02}-{:06}", self.cfg.petal_id, self.schedule_counter);
        let models: Vec<PosModel> = self.states.iter().map(PosModel::from_state).collect();
        self.stats.register_new_schedule(&id, models.len());
        self.schedule = Some(PosSchedule::new(
            id.clone(),
            self.cfg.anticollision,
            models,
            self.cfg.petal_transform,
            self.cfg.phi_limit_on,
        ));
        id
    }

    pub fn discard_schedule(&mut self) {
        self.schedule = None;
    }

    fn schedule_mut(&mut self) -> Result<&mut PosSchedule, RequestError> {
        self.schedule.as_mut().ok_or(RequestError::NoSchedule)
    }

    pub fn request_target(
        &mut self,
        posid: &str,
        command: MoveCommand,
        u: f64,
        v: f64,
        log_note: &str,
    ) -> Result<[f64; 2], RequestError> {
        let t0 = Instant::now();
        let result = self.schedule_mut()?.request_target(posid, command, u, v, log_note);
        self.stats.add_requesting_time(t0.elapsed().as_secs_f64());
        result
    }

    pub fn request_direct_dtdp(
        &mut self,
        posid: &str,
        dtdp: [f64; 2],
        log_note: &str,
    ) -> Result<(), RequestError> {
        let t0 = Instant::now();
        let result = self.schedule_mut()?.request_direct_dtdp(posid, dtdp, log_note);
        self.stats.add_expert_time(t0.elapsed().as_secs_f64());
        result
    }

    pub fn request_homing(
        &mut self,
        posids: &[String],
        axis: HomingAxis,
        debounce: bool,
    ) -> Result<(), RequestError> {
        let t0 = Instant::now();
        let result = self.schedule_mut()?.request_homing(posids, axis, debounce);
        self.stats.add_expert_time(t0.elapsed().as_secs_f64());
        result
    }

    /// Assemble the schedule: move tables, static feasibility, dynamic path
    /// adjustment. The outcome reports per-positioner failures as values.
    pub fn schedule_moves(&mut self) -> Result<ScheduleOutcome, RequestError> {
        let mut schedule = self.schedule.take().ok_or(RequestError::NoSchedule)?;
        let outcome = schedule.schedule_moves(&self.collider, &mut self.stats);
        self.schedule = Some(schedule);
        info!(
            schedule = outcome.schedule_id.as_str(),
            scheduled = outcome.scheduled.len(),
            collisions = outcome.collisions_found,
            iters = outcome.adjustment_iters,
            "schedule assembled"
        );
        Ok(outcome)
    }

    // ── Send and execute ──────────────────────────────────────────────────────

    /// Finalize and validate every table, send the batch in one synchronous
    /// round trip, and update stored positions from the cleanup views of the
    /// positioners whose execution was confirmed.
    pub fn send_and_execute_moves(&mut self) -> Result<ExecuteSummary, BatchError> {
        let schedule = self.schedule.take().ok_or(BatchError::NoSchedule)?;
        if !schedule.is_assembled() && schedule.n_requests() > 0 {
            return Err(BatchError::InternalInvariantViolation(
                "schedule_moves was not run before send".to_string(),
            ));
        }

        let mut hw_tables: Vec<HardwareTable> = Vec::new();
        let mut cleanups: BTreeMap<String, ([f64; 2], bool)> = BTreeMap::new();
        for (posid, table) in schedule.tables() {
            let hw = table
                .for_hardware(true)
                .map_err(BatchError::InternalInvariantViolation)?;
            hw_tables.push(hw);
            cleanups.insert(posid.clone(), (table.for_cleanup().net_dtdp(), table.allow_exceed_limits));
        }

        let timeout = Duration::from_secs_f64(self.cfg.send_timeout_sec);
        let response = self.transport.send_and_sync(&hw_tables, timeout);

        let mut failures: BTreeMap<String, PosError> = BTreeMap::new();
        let confirmed: Vec<String> = match response {
            SendResponse::Success => cleanups.keys().cloned().collect(),
            SendResponse::PartialSend { cleared, no_response, unknown } => {
                for posid in no_response {
                    failures.insert(posid, PosError::HardwareUnresponsive);
                }
                for posid in unknown {
                    failures.insert(posid, PosError::HardwareUnknownResponse);
                }
                cleared
            }
            SendResponse::FailSend { posids } => {
                // sync never fired: nothing moved, nothing to clean up
                for posid in posids {
                    failures.insert(posid, PosError::HardwareSendFailed);
                }
                Vec::new()
            }
            SendResponse::FailPowerOff { supplies } => return Err(BatchError::PowerOff(supplies)),
            SendResponse::FailBusOff { buses } => return Err(BatchError::BusOff(buses)),
            SendResponse::FailMoveRate { current_rate, sec_until_ready }
            | SendResponse::FailResetRate { current_rate, sec_until_ready } => {
                return Err(BatchError::RateLimited { current_rate, sec_until_ready })
            }
            SendResponse::FailTempLimit { temps } => return Err(BatchError::TempLimit(temps)),
        };

        let mut updated = Vec::new();
        for posid in confirmed {
            let Some((net, exceeded_limits)) = cleanups.get(&posid) else { continue };
            let Some(&idx) = self.idx_by_posid.get(&posid) else { continue };
            let state = &mut self.states[idx];
            state.pos_t += net[0];
            state.pos_p += net[1];
            if *exceeded_limits {
                // a hardstop-finding move parks on the physical stop
                let (t_lo, t_hi) = state.full_range(Axis::Theta);
                let (p_lo, p_hi) = state.full_range(Axis::Phi);
                state.pos_t = state.pos_t.clamp(t_lo, t_hi);
                state.pos_p = state.pos_p.clamp(p_lo, p_hi);
            }
            self.store.save(state).map_err(BatchError::InternalInvariantViolation)?;
            updated.push(posid);
        }
        info!(updated = updated.len(), failed = failures.len(), "move batch executed");
        Ok(ExecuteSummary { updated, failures })
    }

    // ── Animation hook ────────────────────────────────────────────────────────

    /// Feed the assembled schedule into an animator: fixed keepouts at t = 0,
    /// then polygon snapshots of every positioner on the animator's frame
    /// grid. Requires `schedule_moves` to have run.
    pub fn render_schedule(&self, animator: &mut Animator) -> Result<(), RequestError> {
        let schedule = self.schedule.as_ref().ok_or(RequestError::NoSchedule)?;

        animator.add_or_change_item(
            "PTL",
            "0",
            0.0,
            self.collider.ptl_poly().points().to_vec(),
            ItemStyle::Normal,
        );
        animator.add_or_change_item(
            "GFA",
            "0",
            0.0,
            self.collider.gfa_poly().points().to_vec(),
            ItemStyle::Normal,
        );

        let mut timelines = Vec::new();
        for (i, state) in self.states.iter().enumerate() {
            let view = schedule
                .tables()
                .get(&state.pos_id)
                .map(|t| t.for_schedule())
                .unwrap_or_else(|| crate::move_table::ScheduleView::hold(&state.pos_id, state.device_loc));
            let frozen = schedule.tables().get(&state.pos_id).is_some_and(|t| {
                t.rows.iter().all(|r| r.dt_ideal == 0.0 && r.dp_ideal == 0.0)
            });
            timelines.push((i, Timeline::from_view(&view, [state.pos_t, state.pos_p]), frozen));
            animator.add_label(&state.pos_id, state.offset_x, state.offset_y + 5.0);
        }
        let total = timelines.iter().map(|(_, tl, _)| tl.total_time()).fold(0.0, f64::max);

        let mut t = 0.0;
        loop {
            for (i, tl, frozen) in &timelines {
                let polys = self.collider.place_polys(*i, tl.pose_at(t));
                let style = if *frozen { ItemStyle::Frozen } else { ItemStyle::Normal };
                let idx = i.to_string();
                animator.add_or_change_item("central body", &idx, t, polys.body.points().to_vec(), style);
                animator.add_or_change_item("phi arm", &idx, t, polys.arm.points().to_vec(), style);
                animator.add_or_change_item("ferrule", &idx, t, polys.ferrule.points().to_vec(), style);
            }
            if t >= total {
                break;
            }
            t = (t + animator.timestep).min(total);
        }
        Ok(())
    }

    /// Dump accumulated stats as CSV.
    pub fn save_stats_csv(&self, path: &std::path::Path) -> Result<(), String> {
        self.stats.save_csv(path)
    }

    /// Expected tip position of one positioner in obsXY, from stored state.
    pub fn expected_obs_xy(&self, posid: &str) -> Option<[f64; 2]> {
        let &idx = self.idx_by_posid.get(posid)?;
        let state = &self.states[idx];
        let trans = crate::transforms::PosTransforms::from_state(state);
        Some(trans.posint_tp_to_obs_xy([state.pos_t, state.pos_p]))
    }

    /// Whether a posint pose is inside the targetable range of a positioner.
    pub fn pose_targetable(&self, posid: &str, tp: [f64; 2]) -> Option<bool> {
        let &idx = self.idx_by_posid.get(posid)?;
        let trans = crate::transforms::PosTransforms::from_state(&self.states[idx]);
        Some(
            trans.in_range(Axis::Theta, RangeLimits::Targetable, tp[0])
                && trans.in_range(Axis::Phi, RangeLimits::Targetable, tp[1]),
        )
    }
}
