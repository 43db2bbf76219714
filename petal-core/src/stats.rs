//! stats.rs — Schedule statistics
//!
//! Append-only record of every schedule run on the petal: positioner and
//! table counts, collisions found, which adjustment method resolved what,
//! calc-time accumulators, and a time series of how many positioners move
//! simultaneously. The enveloping petal process dumps the records as CSV for
//! offline analysis.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::constants::timestamp_str_now;

// ── Adjustment methods ────────────────────────────────────────────────────────

/// Path-adjustment strategies, in the order the scheduler tries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AdjustMethod {
    Retract,
    Delay,
    Reroute,
    Freeze,
}

impl AdjustMethod {
    pub const ALL: [AdjustMethod; 4] =
        [AdjustMethod::Retract, AdjustMethod::Delay, AdjustMethod::Reroute, AdjustMethod::Freeze];

    pub fn label(self) -> &'static str {
        match self {
            AdjustMethod::Retract => "retract",
            AdjustMethod::Delay => "delay",
            AdjustMethod::Reroute => "reroute",
            AdjustMethod::Freeze => "freeze",
        }
    }
}

// ── Per-schedule record ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub schedule_id: String,
    pub timestamp: String,
    pub n_pos: usize,
    pub n_move_tables: usize,
    /// Longest single submove time in the schedule, seconds
    pub max_table_time: f64,
    /// Posids found colliding at least once
    pub collisions_found: BTreeSet<String>,
    /// Method → posids whose collisions that method resolved
    pub resolved: BTreeMap<AdjustMethod, BTreeSet<String>>,
    /// Seconds spent processing target requests
    pub request_calc_time: f64,
    /// Seconds spent in expert table intake
    pub expert_calc_time: f64,
    /// Seconds spent in schedule_moves
    pub schedule_calc_time: f64,
    pub adjustment_iters: usize,
    /// Time (ms from schedule start) → positioners moving at that time
    pub num_moving: BTreeMap<i64, usize>,
}

impl ScheduleRecord {
    pub fn n_resolved(&self) -> usize {
        self.resolved.values().map(BTreeSet::len).sum()
    }

    pub fn max_simultaneously_moving(&self) -> usize {
        self.num_moving.values().copied().max().unwrap_or(0)
    }
}

// ── Stats collection ──────────────────────────────────────────────────────────

/// Collects statistics from runs of the schedule pipeline. One record per
/// registered schedule; all mutators apply to the latest.
#[derive(Debug, Default)]
pub struct SchedStats {
    records: Vec<ScheduleRecord>,
}

impl SchedStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new schedule to track statistics of.
    pub fn register_new_schedule(&mut self, schedule_id: &str, num_pos: usize) {
        self.records.push(ScheduleRecord {
            schedule_id: schedule_id.to_string(),
            timestamp: timestamp_str_now(),
            n_pos: num_pos,
            ..Default::default()
        });
    }

    pub fn latest(&self) -> Option<&ScheduleRecord> {
        self.records.last()
    }

    pub fn records(&self) -> &[ScheduleRecord] {
        &self.records
    }

    fn latest_mut(&mut self) -> Option<&mut ScheduleRecord> {
        self.records.last_mut()
    }

    pub fn set_num_move_tables(&mut self, n: usize) {
        if let Some(r) = self.latest_mut() {
            r.n_move_tables = n;
        }
    }

    pub fn set_max_table_time(&mut self, seconds: f64) {
        if let Some(r) = self.latest_mut() {
            r.max_table_time = seconds;
        }
    }

    pub fn add_collisions_found(&mut self, posids: impl IntoIterator<Item = String>) {
        if let Some(r) = self.latest_mut() {
            r.collisions_found.extend(posids);
        }
    }

    pub fn add_collision_resolved(&mut self, method: AdjustMethod, posid: &str) {
        if let Some(r) = self.latest_mut() {
            r.resolved.entry(method).or_default().insert(posid.to_string());
        }
    }

    pub fn add_requesting_time(&mut self, seconds: f64) {
        if let Some(r) = self.latest_mut() {
            r.request_calc_time += seconds;
        }
    }

    pub fn add_expert_time(&mut self, seconds: f64) {
        if let Some(r) = self.latest_mut() {
            r.expert_calc_time += seconds;
        }
    }

    pub fn add_scheduling_time(&mut self, seconds: f64) {
        if let Some(r) = self.latest_mut() {
            r.schedule_calc_time += seconds;
        }
    }

    pub fn add_adjustment_iters(&mut self, iters: usize) {
        if let Some(r) = self.latest_mut() {
            r.adjustment_iters += iters;
        }
    }

    pub fn set_num_moving(&mut self, series: BTreeMap<i64, usize>) {
        if let Some(r) = self.latest_mut() {
            r.num_moving = series;
        }
    }

    /// Save all records as CSV, one row per schedule.
    pub fn save_csv(&self, path: &Path) -> Result<(), String> {
        let mut w = csv::Writer::from_path(path).map_err(|e| e.to_string())?;
        let mut header = vec![
            "schedule_id".to_string(),
            "timestamp".to_string(),
            "n_pos".to_string(),
            "n_move_tables".to_string(),
            "max_table_time".to_string(),
            "request_calc_time".to_string(),
            "expert_calc_time".to_string(),
            "schedule_calc_time".to_string(),
            "adjustment_iters".to_string(),
            "collisions_found".to_string(),
            "collisions_resolved".to_string(),
            "max_moving_simultaneously".to_string(),
        ];
        header.extend(AdjustMethod::ALL.iter().map(|m| format!("resolved_by_{}", m.label())));
        w.write_record(&header).map_err(|e| e.to_string())?;
        for r in &self.records {
            let mut row = vec![
                r.schedule_id.clone(),
                r.timestamp.clone(),
                r.n_pos.to_string(),
                r.n_move_tables.to_string(),
                format!("{:.6}", r.max_table_time),
                format!("{:.6}", r.request_calc_time),
                format!("{:.6}", r.expert_calc_time),
                format!("{:.6}", r.schedule_calc_time),
                r.adjustment_iters.to_string(),
                r.collisions_found.len().to_string(),
                r.n_resolved().to_string(),
                r.max_simultaneously_moving().to_string(),
            ];
            for m in AdjustMethod::ALL {
                row.push(r.resolved.get(&m).map_or(0, BTreeSet::len).to_string());
            }
            w.write_record(&row).map_err(|e| e.to_string())?;
        }
        w.flush().map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutators_apply_to_the_latest_schedule() {
        let mut stats = SchedStats::new();
        stats.register_new_schedule("sched-001", 5);
        stats.set_num_move_tables(3);
        stats.add_collisions_found(["M00001".to_string(), "M00002".to_string()]);
        stats.add_collision_resolved(AdjustMethod::Retract, "M00001");
        stats.add_collision_resolved(AdjustMethod::Freeze, "M00002");
        stats.add_adjustment_iters(2);
        stats.register_new_schedule("sched-002", 5);
        stats.set_num_move_tables(1);

        let first = &stats.records()[0];
        assert_eq!(first.n_move_tables, 3);
        assert_eq!(first.collisions_found.len(), 2);
        assert_eq!(first.n_resolved(), 2);
        assert_eq!(first.adjustment_iters, 2);
        let second = stats.latest().unwrap();
        assert_eq!(second.n_move_tables, 1);
        assert_eq!(second.n_resolved(), 0);
    }

    #[test]
    fn num_moving_summary() {
        let mut stats = SchedStats::new();
        stats.register_new_schedule("sched-001", 4);
        stats.set_num_moving(BTreeMap::from([(0, 4), (500, 2), (1000, 0)]));
        assert_eq!(stats.latest().unwrap().max_simultaneously_moving(), 4);
    }

    #[test]
    fn csv_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule_stats.csv");
        let mut stats = SchedStats::new();
        stats.register_new_schedule("sched-001", 2);
        stats.add_collision_resolved(AdjustMethod::Delay, "M00002");
        stats.save_csv(&path).unwrap();

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let headers = rdr.headers().unwrap().clone();
        assert!(headers.iter().any(|h| h == "resolved_by_delay"));
        let rows: Vec<_> = rdr.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "sched-001");
    }
}
