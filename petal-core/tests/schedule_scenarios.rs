//! End-to-end schedule scenarios on small petal arrays: request intake,
//! anticollision resolution, hardware emission, and cleanup bookkeeping.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fp_types::{HardwareTable, SendResponse};
use petal_core::{
    AnticollisionMode, BatchError, ColliderConfig, HomingAxis, MemoryStateStore, MoveCommand,
    PetalConfig, Petal, PetalTransport, PosError, PosState,
};

// ── Test transport ────────────────────────────────────────────────────────────

/// Records every batch it is handed and answers with a scripted response.
struct ScriptedTransport {
    response: SendResponse,
    calls: Arc<Mutex<Vec<Vec<HardwareTable>>>>,
}

impl ScriptedTransport {
    fn with_response(response: SendResponse) -> (Self, Arc<Mutex<Vec<Vec<HardwareTable>>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (Self { response, calls: calls.clone() }, calls)
    }
}

impl PetalTransport for ScriptedTransport {
    fn send_and_sync(&mut self, tables: &[HardwareTable], _timeout: Duration) -> SendResponse {
        self.calls.lock().unwrap().push(tables.to_vec());
        self.response.clone()
    }
}

fn petal_with(
    states: Vec<PosState>,
    mode: AnticollisionMode,
    response: SendResponse,
) -> (Petal, Arc<Mutex<Vec<Vec<HardwareTable>>>>) {
    let (transport, calls) = ScriptedTransport::with_response(response);
    let cfg = PetalConfig { anticollision: mode, ..PetalConfig::default() };
    let petal = Petal::new(
        cfg,
        ColliderConfig::default(),
        Box::new(MemoryStateStore::new(states)),
        Box::new(transport),
    )
    .unwrap();
    (petal, calls)
}

/// The S2 swap-adjacent pair: A tucked, B's arm parked in the shared overlap
/// zone and creep-limited, A requested into the spot B is vacating.
fn crossing_pair() -> Vec<PosState> {
    let mut a = PosState::nominal("M00001", 17, 0, 1);
    a.pos_t = 90.0;
    a.pos_p = 160.0;
    let mut b = PosState::nominal("M00002", 18, 0, 2);
    b.offset_x = 10.4;
    b.pos_t = 145.0;
    b.pos_p = 58.9;
    b.only_creep = true;
    vec![a, b]
}

fn run_crossing_schedule(petal: &mut Petal) -> (petal_core::ScheduleOutcome, [f64; 2], [f64; 2]) {
    petal.begin_schedule();
    // A moves into the overlap zone that B currently occupies
    let ta = petal.request_target("M00001", MoveCommand::ObsXY, 5.2, 0.5, "into the lens").unwrap();
    // B swings away and folds back toward its own center, slowly (creep-only
    // device), vacating the spot A is headed for
    let tb = petal.request_target("M00002", MoveCommand::ObsXY, 7.95, 0.65, "clear out").unwrap();
    let outcome = petal.schedule_moves().unwrap();
    (outcome, ta, tb)
}

// ── S1: single positioner, reachable target ───────────────────────────────────

#[test]
fn s1_single_positioner_reaches_target_within_5_microns() {
    let mut state = PosState::nominal("M00001", 17, 0, 1);
    state.pos_t = 0.0;
    state.pos_p = 150.0;
    let (mut petal, calls) = petal_with(vec![state], AnticollisionMode::Adjust, SendResponse::Success);

    petal.begin_schedule();
    petal.request_target("M00001", MoveCommand::PoslocXY, 1.5, 1.5, "").unwrap();
    let outcome = petal.schedule_moves().unwrap();
    assert!(outcome.errors.is_empty());
    assert!(outcome.not_reached.is_empty());
    assert_eq!(outcome.collisions_found, 0);

    let summary = petal.send_and_execute_moves().unwrap();
    assert_eq!(summary.updated, vec!["M00001".to_string()]);

    let sent = calls.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].len(), 1);

    // offsets are zero, so obsXY == poslocXY
    let xy = petal.expected_obs_xy("M00001").unwrap();
    let err_mm = ((xy[0] - 1.5).powi(2) + (xy[1] - 1.5).powi(2)).sqrt();
    assert!(err_mm <= 5e-3, "tip error {:.2} µm", err_mm * 1000.0);
}

// ── S2: two neighbors through the shared overlap zone ─────────────────────────

#[test]
fn s2_crossing_neighbors_resolve_and_both_reach() {
    let (mut petal, _) = petal_with(crossing_pair(), AnticollisionMode::Adjust, SendResponse::Success);
    let (outcome, ta, tb) = run_crossing_schedule(&mut petal);

    assert!(outcome.collisions_found >= 1, "the direct paths must interfere");
    assert!(outcome.not_reached.is_empty(), "adjustment must not freeze anyone");
    assert!(outcome.errors.is_empty());

    let record = petal.stats().latest().unwrap();
    let by_retract_or_delay: usize = record
        .resolved
        .iter()
        .filter(|(m, _)| {
            matches!(m, petal_core::AdjustMethod::Retract | petal_core::AdjustMethod::Delay)
        })
        .map(|(_, set)| set.len())
        .sum();
    assert!(by_retract_or_delay >= 1, "resolved: {:?}", record.resolved);

    petal.send_and_execute_moves().unwrap();
    let a = petal.state("M00001").unwrap();
    let b = petal.state("M00002").unwrap();
    assert!((a.pos_t - ta[0]).abs() < 1e-3 && (a.pos_p - ta[1]).abs() < 1e-3);
    assert!((b.pos_t - tb[0]).abs() < 1e-3 && (b.pos_p - tb[1]).abs() < 1e-3);
}

// ── S3: hardstop-targeting homing ─────────────────────────────────────────────

#[test]
fn s3_homing_ignores_range_and_parks_on_the_hardstops() {
    let mut state = PosState::nominal("M00001", 17, 0, 1);
    state.pos_t = 10.0;
    state.pos_p = 20.0;
    let full_t = state.full_range(fp_types::Axis::Theta);
    let full_p = state.full_range(fp_types::Axis::Phi);
    let (mut petal, calls) = petal_with(vec![state], AnticollisionMode::Adjust, SendResponse::Success);

    petal.begin_schedule();
    petal.request_homing(&["M00001".to_string()], HomingAxis::Both, false).unwrap();
    let outcome = petal.schedule_moves().unwrap();
    // anticollision does not touch homing rows
    assert_eq!(outcome.collisions_found, 0);
    assert!(outcome.errors.is_empty());

    petal.send_and_execute_moves().unwrap();

    // two large-delta rows, one per axis, each well beyond the physical range
    let sent = calls.lock().unwrap();
    let rows = &sent[0][0].rows;
    let big_t: Vec<_> = rows.iter().filter(|r| r.motor_steps_t.abs() > 10_000).collect();
    let big_p: Vec<_> = rows.iter().filter(|r| r.motor_steps_p.abs() > 10_000).collect();
    assert_eq!(big_t.len(), 1);
    assert_eq!(big_p.len(), 1);

    // cleanup clamps onto the hardstop angles
    let state = petal.state("M00001").unwrap();
    assert!((state.pos_t - full_t.0).abs() < 1e-9, "theta parked at {}", state.pos_t);
    assert!((state.pos_p - full_p.1).abs() < 1e-9, "phi parked at {}", state.pos_p);
}

// ── S4: infeasible twin targets under Freeze ──────────────────────────────────

#[test]
fn s4_identical_targets_freeze_the_lower_precedence_positioner() {
    let mut a = PosState::nominal("M00001", 17, 0, 1);
    a.pos_t = 90.0;
    a.pos_p = 160.0;
    let mut b = PosState::nominal("M00002", 18, 0, 2);
    b.offset_x = 10.4;
    b.pos_t = 140.0;
    b.pos_p = 160.0;
    let (mut petal, calls) = petal_with(vec![a, b], AnticollisionMode::Freeze, SendResponse::Success);

    petal.begin_schedule();
    // both ask for the same point in the shared overlap zone
    petal.request_target("M00001", MoveCommand::ObsXY, 5.2, 0.5, "").unwrap();
    petal.request_target("M00002", MoveCommand::ObsXY, 5.2, 0.5, "").unwrap();
    let outcome = petal.schedule_moves().unwrap();

    assert!(matches!(outcome.errors.get("M00002"), Some(PosError::TargetInfeasible(_))));
    assert!(outcome.not_reached.contains("M00002"));
    assert!(!outcome.not_reached.contains("M00001"));

    petal.send_and_execute_moves().unwrap();
    let sent = calls.lock().unwrap();
    assert_eq!(sent[0].len(), 2, "both positioners get valid tables");
    let moving: Vec<_> = sent[0].iter().filter(|t| !t.is_zero_motion()).collect();
    assert_eq!(moving.len(), 1, "at most one moves");
    assert_eq!(moving[0].posid, "M00001");
}

// ── S5: batch power-off ───────────────────────────────────────────────────────

#[test]
fn s5_power_off_aborts_without_state_mutation_or_retry() {
    let mut state = PosState::nominal("M00001", 17, 0, 1);
    state.pos_t = 0.0;
    state.pos_p = 150.0;
    let before = (state.pos_t, state.pos_p);
    let response = SendResponse::FailPowerOff { supplies: vec!["PS1".to_string()] };
    let (mut petal, calls) = petal_with(vec![state], AnticollisionMode::Adjust, response);

    petal.begin_schedule();
    petal.request_target("M00001", MoveCommand::PoslocXY, 1.5, 1.5, "").unwrap();
    petal.schedule_moves().unwrap();
    let err = petal.send_and_execute_moves().unwrap_err();
    assert_eq!(err, BatchError::PowerOff(vec!["PS1".to_string()]));

    let after = petal.state("M00001").unwrap();
    assert_eq!((after.pos_t, after.pos_p), before);
    assert_eq!(calls.lock().unwrap().len(), 1, "no retry inside the scheduler");
}

// ── S6: determinism ───────────────────────────────────────────────────────────

#[test]
fn s6_identical_batches_yield_identical_hardware_tables() {
    let mut batches: Vec<String> = Vec::new();
    for _ in 0..2 {
        let (mut petal, calls) =
            petal_with(crossing_pair(), AnticollisionMode::Adjust, SendResponse::Success);
        run_crossing_schedule(&mut petal);
        petal.send_and_execute_moves().unwrap();
        let sent = calls.lock().unwrap();
        batches.push(serde_json::to_string(&sent[0]).unwrap());
    }
    assert_eq!(batches[0], batches[1]);
}

// ── Property: freeze is a fixed point ─────────────────────────────────────────

#[test]
fn frozen_positioners_emit_all_zero_tables() {
    // same overlap conflict as S4; the frozen table must be exactly zero steps
    let mut a = PosState::nominal("M00001", 17, 0, 1);
    a.pos_t = 90.0;
    a.pos_p = 160.0;
    let mut b = PosState::nominal("M00002", 18, 0, 2);
    b.offset_x = 10.4;
    b.pos_t = 140.0;
    b.pos_p = 160.0;
    let (mut petal, calls) = petal_with(vec![a, b], AnticollisionMode::Freeze, SendResponse::Success);

    petal.begin_schedule();
    petal.request_target("M00001", MoveCommand::ObsXY, 5.2, 0.5, "").unwrap();
    petal.request_target("M00002", MoveCommand::ObsXY, 5.2, 0.5, "").unwrap();
    let outcome = petal.schedule_moves().unwrap();
    assert!(outcome.not_reached.contains("M00002"));

    petal.send_and_execute_moves().unwrap();
    let sent = calls.lock().unwrap();
    let frozen = sent[0].iter().find(|t| t.posid == "M00002").unwrap();
    assert!(frozen.rows.iter().all(|r| r.motor_steps_t == 0 && r.motor_steps_p == 0));
}

// ── Property: target idempotence ──────────────────────────────────────────────

#[test]
fn requesting_the_current_pose_nets_zero_motion() {
    let mut state = PosState::nominal("M00001", 17, 0, 1);
    state.pos_t = -12.0;
    state.pos_p = 95.0;
    let (mut petal, calls) = petal_with(vec![state], AnticollisionMode::Adjust, SendResponse::Success);

    petal.begin_schedule();
    petal.request_target("M00001", MoveCommand::PosintTP, -12.0, 95.0, "").unwrap();
    petal.schedule_moves().unwrap();
    petal.send_and_execute_moves().unwrap();

    let sent = calls.lock().unwrap();
    assert!(sent[0][0].is_zero_motion());
    let after = petal.state("M00001").unwrap();
    assert_eq!(after.pos_t, -12.0);
    assert_eq!(after.pos_p, 95.0);
}

// ── Property: partial sends update only the cleared positioners ───────────────

#[test]
fn partial_send_updates_only_cleared_positioners() {
    let mut a = PosState::nominal("M00001", 17, 0, 1);
    a.pos_t = 0.0;
    a.pos_p = 150.0;
    let mut b = PosState::nominal("M00002", 18, 0, 2);
    b.offset_x = 30.0; // far apart, no interference
    b.pos_t = 0.0;
    b.pos_p = 150.0;
    let response = SendResponse::PartialSend {
        cleared: vec!["M00001".to_string()],
        no_response: vec!["M00002".to_string()],
        unknown: vec![],
    };
    let (mut petal, _) = petal_with(vec![a, b], AnticollisionMode::Adjust, response);

    petal.begin_schedule();
    petal.request_target("M00001", MoveCommand::PoslocXY, 1.5, 1.5, "").unwrap();
    petal.request_target("M00002", MoveCommand::PoslocXY, 1.5, 1.5, "").unwrap();
    petal.schedule_moves().unwrap();
    let summary = petal.send_and_execute_moves().unwrap();

    assert_eq!(summary.updated, vec!["M00001".to_string()]);
    assert_eq!(summary.failures.get("M00002"), Some(&PosError::HardwareUnresponsive));
    let b_after = petal.state("M00002").unwrap();
    assert_eq!((b_after.pos_t, b_after.pos_p), (0.0, 150.0));
}

// ── Request validation ────────────────────────────────────────────────────────

#[test]
fn unreachable_and_duplicate_requests_are_rejected() {
    let state = PosState::nominal("M00001", 17, 0, 1);
    let (mut petal, _) = petal_with(vec![state], AnticollisionMode::Adjust, SendResponse::Success);
    petal.begin_schedule();

    // outside the patrol annulus (max reach 6 mm)
    let err = petal.request_target("M00001", MoveCommand::PoslocXY, 7.0, 0.0, "").unwrap_err();
    assert_eq!(err, petal_core::RequestError::Unreachable);

    petal.request_target("M00001", MoveCommand::DTdP, 1.0, -1.0, "").unwrap();
    let err = petal.request_target("M00001", MoveCommand::DTdP, 1.0, -1.0, "").unwrap_err();
    assert!(matches!(err, petal_core::RequestError::DuplicateRequest(_)));
}

#[test]
fn schedule_safety_holds_for_the_assembled_batch() {
    // after adjustment, re-sweeping every pair of final tables finds nothing
    let (mut petal, calls) =
        petal_with(crossing_pair(), AnticollisionMode::Adjust, SendResponse::Success);
    let (outcome, _, _) = run_crossing_schedule(&mut petal);
    assert!(outcome.not_reached.is_empty());
    petal.send_and_execute_moves().unwrap();
    // both tables were actually emitted with motion
    let sent = calls.lock().unwrap();
    assert_eq!(sent[0].iter().filter(|t| !t.is_zero_motion()).count(), 2);
}
