//! collider.rs — Static and spacetime collision detection
//!
//! Holds the keepout geometry of every positioner on the petal (central body,
//! phi arm, ferrule — optionally expanded per device) plus the fixed petal
//! boundary and GFA keepouts, along with precomputed neighbor maps. Offers
//! two families of queries:
//!
//! - `spatial_*`: polygon interference at a single static pose
//! - `spacetime_*`: sampled sweep along a schedule view, returning the
//!   earliest collision time per positioner
//!
//! Touching counts as colliding: all interference tests are closed, so grazing
//! contact keeps its safety margin. The sweep sample period is a configurable
//! knob, refined automatically to a quarter of the shortest submove.

use fp_types::Case;
use serde::{Deserialize, Serialize};

use crate::move_table::ScheduleView;
use crate::state::PosState;

pub type Pt = [f64; 2];

// ── Keepout geometry constants ────────────────────────────────────────────────

/// Central-body keepout outline, posloc mm at theta = 0. The long lobe covers
/// the housing past the phi axis (which sits at +LENGTH_R1 on x).
const CENTRAL_BODY_POINTS: [Pt; 8] = [
    [-2.9, -2.2],
    [-3.5, 0.0],
    [-2.9, 2.2],
    [1.0, 2.2],
    [4.35, 1.4],
    [4.9, 0.0],
    [4.35, -1.4],
    [1.0, -2.2],
];

/// Phi-arm keepout outline in the elbow frame: +x toward the ferrule, tip at
/// +LENGTH_R2. Slightly waisted at mid-arm, so the polygon is concave.
const PHI_ARM_POINTS: [Pt; 10] = [
    [-2.0, 0.0],
    [-1.4, 1.0],
    [0.6, 0.65],
    [2.2, 0.9],
    [3.0, 0.6],
    [3.0, -0.6],
    [2.2, -0.9],
    [0.6, -0.65],
    [-1.4, -1.0],
    [-1.7, -0.6],
];

/// Ferrule keepout: hexagon of this radius at the arm tip, mm.
const FERRULE_RADIUS: f64 = 1.0;

/// GFA camera keepout outline in its own frame, mm.
const GFA_POINTS: [Pt; 4] = [[0.0, -6.0], [30.0, -6.0], [30.0, 6.0], [0.0, 6.0]];

/// Clearance added to R1+R2 for the Eo maximum-excursion envelope: arm half
/// width plus the ferrule radius.
const EO_CLEARANCE: f64 = 1.25;

// ── Polygons ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosPoly {
    pts: Vec<Pt>,
}

impl PosPoly {
    pub fn new(pts: Vec<Pt>) -> Self {
        Self { pts }
    }

    pub fn regular(n: usize, radius: f64) -> Self {
        let pts = (0..n)
            .map(|i| {
                let a = std::f64::consts::TAU * i as f64 / n as f64;
                [radius * a.cos(), radius * a.sin()]
            })
            .collect();
        Self { pts }
    }

    pub fn points(&self) -> &[Pt] {
        &self.pts
    }

    pub fn rotated(&self, deg: f64) -> Self {
        let a = deg.to_radians();
        let (c, s) = (a.cos(), a.sin());
        Self { pts: self.pts.iter().map(|p| [c * p[0] - s * p[1], s * p[0] + c * p[1]]).collect() }
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self { pts: self.pts.iter().map(|p| [p[0] + dx, p[1] + dy]).collect() }
    }

    /// Push every vertex radially away from the local origin by `delta` mm.
    pub fn expanded_radial(&self, delta: f64) -> Self {
        if delta == 0.0 {
            return self.clone();
        }
        Self {
            pts: self
                .pts
                .iter()
                .map(|p| {
                    let r = (p[0] * p[0] + p[1] * p[1]).sqrt();
                    if r < 1e-12 {
                        *p
                    } else {
                        let f = (r + delta).max(0.0) / r;
                        [p[0] * f, p[1] * f]
                    }
                })
                .collect(),
        }
    }

    /// Widen the polygon angularly about the local origin: vertices above the
    /// x axis rotate by +deg/2, below by −deg/2.
    pub fn expanded_angular(&self, deg: f64) -> Self {
        if deg == 0.0 {
            return self.clone();
        }
        let half = (deg / 2.0).to_radians();
        Self {
            pts: self
                .pts
                .iter()
                .map(|p| {
                    let a = if p[1] >= 0.0 { half } else { -half };
                    let (c, s) = (a.cos(), a.sin());
                    [c * p[0] - s * p[1], s * p[0] + c * p[1]]
                })
                .collect(),
        }
    }

    fn bbox(&self) -> (Pt, Pt) {
        let mut lo = [f64::INFINITY; 2];
        let mut hi = [f64::NEG_INFINITY; 2];
        for p in &self.pts {
            for k in 0..2 {
                lo[k] = lo[k].min(p[k]);
                hi[k] = hi[k].max(p[k]);
            }
        }
        (lo, hi)
    }

    /// Point containment, closed: points on an edge count as inside.
    pub fn contains(&self, q: Pt) -> bool {
        let n = self.pts.len();
        let mut inside = false;
        for i in 0..n {
            let a = self.pts[i];
            let b = self.pts[(i + 1) % n];
            if point_on_segment(q, a, b) {
                return true;
            }
            if (a[1] > q[1]) != (b[1] > q[1]) {
                let x = a[0] + (q[1] - a[1]) / (b[1] - a[1]) * (b[0] - a[0]);
                if q[0] < x {
                    inside = !inside;
                }
            }
        }
        inside
    }

    fn edges(&self) -> impl Iterator<Item = (Pt, Pt)> + '_ {
        let n = self.pts.len();
        (0..n).map(move |i| (self.pts[i], self.pts[(i + 1) % n]))
    }
}

fn cross(o: Pt, a: Pt, b: Pt) -> f64 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

fn point_on_segment(q: Pt, a: Pt, b: Pt) -> bool {
    if cross(a, b, q).abs() > 1e-9 {
        return false;
    }
    q[0] >= a[0].min(b[0]) - 1e-12
        && q[0] <= a[0].max(b[0]) + 1e-12
        && q[1] >= a[1].min(b[1]) - 1e-12
        && q[1] <= a[1].max(b[1]) + 1e-12
}

/// Closed segment intersection, robust to collinear overlap and shared
/// endpoints (touching is intersecting).
fn segments_intersect(a: Pt, b: Pt, c: Pt, d: Pt) -> bool {
    let d1 = cross(c, d, a);
    let d2 = cross(c, d, b);
    let d3 = cross(a, b, c);
    let d4 = cross(a, b, d);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    point_on_segment(a, c, d)
        || point_on_segment(b, c, d)
        || point_on_segment(c, a, b)
        || point_on_segment(d, a, b)
}

/// Polygon interference, valid for concave outlines: bounding-box reject,
/// then edge crossings, then mutual containment.
pub fn polys_intersect(p: &PosPoly, q: &PosPoly) -> bool {
    let (plo, phi) = p.bbox();
    let (qlo, qhi) = q.bbox();
    if plo[0] > qhi[0] || qlo[0] > phi[0] || plo[1] > qhi[1] || qlo[1] > phi[1] {
        return false;
    }
    for (a, b) in p.edges() {
        for (c, d) in q.edges() {
            if segments_intersect(a, b, c, d) {
                return true;
            }
        }
    }
    p.contains(q.pts[0]) || q.contains(p.pts[0])
}

fn dist_point_segment(q: Pt, a: Pt, b: Pt) -> f64 {
    let (vx, vy) = (b[0] - a[0], b[1] - a[1]);
    let len2 = vx * vx + vy * vy;
    let t = if len2 > 0.0 {
        (((q[0] - a[0]) * vx + (q[1] - a[1]) * vy) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (px, py) = (a[0] + t * vx - q[0], a[1] + t * vy - q[1]);
    (px * px + py * py).sqrt()
}

fn circle_intersects_poly(center: Pt, radius: f64, poly: &PosPoly) -> bool {
    if poly.contains(center) {
        return true;
    }
    poly.edges().any(|(a, b)| dist_point_segment(center, a, b) <= radius)
}

fn circle_inside_region(center: Pt, radius: f64, region: &PosPoly) -> bool {
    region.contains(center) && region.edges().all(|(a, b)| dist_point_segment(center, a, b) >= radius)
}

/// A polygon conflicts with an inverted keepout when any part of it leaves
/// the allowed region.
fn poly_leaves_region(poly: &PosPoly, region: &PosPoly) -> bool {
    for p in poly.points() {
        if !region.contains(*p) {
            return true;
        }
    }
    for (a, b) in poly.edges() {
        for (c, d) in region.edges() {
            if segments_intersect(a, b, c, d) {
                return true;
            }
        }
    }
    false
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Collision-settings document, loadable from TOML. The defaults place the
/// fixed obstacles far away so a bare test array collides with nothing fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColliderConfig {
    /// Petal boundary polygon in obsXY; positioners must stay inside
    pub keepout_ptl: Vec<Pt>,
    /// GFA keepout pose in obsXY
    pub gfa_x0: f64,
    pub gfa_y0: f64,
    pub gfa_rot: f64,
    /// Spacetime sweep sample period, seconds. Refined to a quarter of the
    /// shortest submove when that is finer.
    pub timestep: f64,
}

impl Default for ColliderConfig {
    fn default() -> Self {
        Self {
            keepout_ptl: vec![
                [-1000.0, -1000.0],
                [1000.0, -1000.0],
                [1000.0, 1000.0],
                [-1000.0, 1000.0],
            ],
            gfa_x0: 5000.0,
            gfa_y0: 5000.0,
            gfa_rot: 0.0,
            timestep: 0.02,
        }
    }
}

impl ColliderConfig {
    pub fn from_toml_str(doc: &str) -> Result<Self, String> {
        toml::from_str(doc).map_err(|e| format!("bad collision settings: {e}"))
    }

    pub fn load(path: &std::path::Path) -> Result<Self, String> {
        let doc = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
        Self::from_toml_str(&doc)
    }
}

// ── Collider ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedKind {
    Ptl,
    Gfa,
}

/// Result of one spacetime sweep: the earliest sampled collision, or clear.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Sweep {
    /// Seconds from schedule start; +∞ when no collision was found
    pub collision_time: f64,
    pub collision_case: Case,
}

impl Sweep {
    pub fn clear() -> Self {
        Self { collision_time: f64::INFINITY, collision_case: Case::I }
    }

    pub fn collided(&self) -> bool {
        self.collision_time.is_finite()
    }
}

#[derive(Debug, Clone)]
struct Unit {
    posid: String,
    device_loc: u32,
    offset_x: f64,
    offset_y: f64,
    offset_t: f64,
    offset_p: f64,
    r1: f64,
    r2: f64,
    retracted: bool,
    /// Pre-expanded local outlines
    body0: PosPoly,
    arm0: PosPoly,
    ferrule0: PosPoly,
    eo_radius: f64,
}

/// Positioner polygons placed at one pose, obsXY.
#[derive(Debug, Clone)]
pub struct PlacedPolys {
    pub body: PosPoly,
    pub arm: PosPoly,
    pub ferrule: PosPoly,
}

pub struct Collider {
    cfg: ColliderConfig,
    units: Vec<Unit>,
    pos_neighbors: Vec<Vec<usize>>,
    fixed_neighbors: Vec<Vec<FixedKind>>,
    ptl: PosPoly,
    gfa: PosPoly,
}

impl Collider {
    /// Build geometry and neighbor maps for an arena of positioners. Unit
    /// index i corresponds to arena index i everywhere.
    pub fn new(cfg: ColliderConfig, states: &[PosState]) -> Self {
        let ptl = PosPoly::new(cfg.keepout_ptl.clone());
        let gfa = PosPoly::new(GFA_POINTS.to_vec())
            .rotated(cfg.gfa_rot)
            .translated(cfg.gfa_x0, cfg.gfa_y0);
        let mut collider = Self {
            cfg,
            units: Vec::new(),
            pos_neighbors: Vec::new(),
            fixed_neighbors: Vec::new(),
            ptl,
            gfa,
        };
        collider.refresh_calibration(states);
        collider
    }

    /// Rebuild per-unit polygons and neighbor maps after a calibration
    /// update. Cheap enough to run at every construction.
    pub fn refresh_calibration(&mut self, states: &[PosState]) {
        self.units = states
            .iter()
            .map(|s| Unit {
                posid: s.pos_id.clone(),
                device_loc: s.device_loc,
                offset_x: s.offset_x,
                offset_y: s.offset_y,
                offset_t: s.offset_t,
                offset_p: s.offset_p,
                r1: s.length_r1,
                r2: s.length_r2,
                retracted: s.classified_as_retracted,
                body0: PosPoly::new(CENTRAL_BODY_POINTS.to_vec())
                    .expanded_radial(s.keepout_expansion_theta_radial)
                    .expanded_angular(s.keepout_expansion_theta_angular),
                arm0: PosPoly::new(PHI_ARM_POINTS.to_vec())
                    .expanded_radial(s.keepout_expansion_phi_radial)
                    .expanded_angular(s.keepout_expansion_phi_angular),
                ferrule0: PosPoly::regular(6, FERRULE_RADIUS),
                eo_radius: s.length_r1
                    + s.length_r2
                    + EO_CLEARANCE
                    + s.keepout_expansion_phi_radial.max(0.0),
            })
            .collect();

        let n = self.units.len();
        self.pos_neighbors = vec![Vec::new(); n];
        self.fixed_neighbors = vec![Vec::new(); n];
        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = (&self.units[i], &self.units[j]);
                let (dx, dy) = (a.offset_x - b.offset_x, a.offset_y - b.offset_y);
                if (dx * dx + dy * dy).sqrt() <= a.eo_radius + b.eo_radius {
                    self.pos_neighbors[i].push(j);
                    self.pos_neighbors[j].push(i);
                }
            }
            let u = &self.units[i];
            let center = [u.offset_x, u.offset_y];
            if circle_intersects_poly(center, u.eo_radius, &self.gfa) {
                self.fixed_neighbors[i].push(FixedKind::Gfa);
            }
            if !circle_inside_region(center, u.eo_radius, &self.ptl) {
                self.fixed_neighbors[i].push(FixedKind::Ptl);
            }
        }
    }

    pub fn n_units(&self) -> usize {
        self.units.len()
    }

    pub fn pos_neighbors(&self, i: usize) -> &[usize] {
        &self.pos_neighbors[i]
    }

    pub fn fixed_neighbors(&self, i: usize) -> &[FixedKind] {
        &self.fixed_neighbors[i]
    }

    pub fn device_loc(&self, i: usize) -> u32 {
        self.units[i].device_loc
    }

    pub fn posid(&self, i: usize) -> &str {
        &self.units[i].posid
    }

    pub fn unit_center(&self, i: usize) -> Pt {
        [self.units[i].offset_x, self.units[i].offset_y]
    }

    pub fn ptl_poly(&self) -> &PosPoly {
        &self.ptl
    }

    pub fn gfa_poly(&self) -> &PosPoly {
        &self.gfa
    }

    /// Place a positioner's keepout polygons at the given posintTP pose.
    pub fn place_polys(&self, i: usize, tp: [f64; 2]) -> PlacedPolys {
        let u = &self.units[i];
        let t_loc = tp[0] - u.offset_t;
        let p_loc = tp[1] - u.offset_p;
        let arm_angle = t_loc + p_loc;
        let elbow = [
            u.offset_x + u.r1 * t_loc.to_radians().cos(),
            u.offset_y + u.r1 * t_loc.to_radians().sin(),
        ];
        let tip = [
            elbow[0] + u.r2 * arm_angle.to_radians().cos(),
            elbow[1] + u.r2 * arm_angle.to_radians().sin(),
        ];
        PlacedPolys {
            body: u.body0.rotated(t_loc).translated(u.offset_x, u.offset_y),
            arm: u.arm0.rotated(arm_angle).translated(elbow[0], elbow[1]),
            ferrule: u.ferrule0.rotated(arm_angle).translated(tip[0], tip[1]),
        }
    }

    // ── Static queries ────────────────────────────────────────────────────────

    /// Interference between two positioners at static poses, seen from A:
    /// II for arm-vs-arm, IIIA for A's arm on B's body, IIIB for B's arm on
    /// A's body. A positioner classified as retracted contributes only its
    /// central body; its arm is suppressed.
    pub fn spatial_collision_between_positioners(
        &self,
        a: usize,
        tp_a: [f64; 2],
        b: usize,
        tp_b: [f64; 2],
    ) -> Case {
        let pa = self.place_polys(a, tp_a);
        let pb = self.place_polys(b, tp_b);
        let a_armed = !self.units[a].retracted;
        let b_armed = !self.units[b].retracted;
        if a_armed && b_armed {
            if polys_intersect(&pa.arm, &pb.arm)
                || polys_intersect(&pa.arm, &pb.ferrule)
                || polys_intersect(&pa.ferrule, &pb.arm)
                || polys_intersect(&pa.ferrule, &pb.ferrule)
            {
                return Case::II;
            }
        }
        if a_armed && (polys_intersect(&pa.arm, &pb.body) || polys_intersect(&pa.ferrule, &pb.body))
        {
            return Case::IIIA;
        }
        if b_armed && (polys_intersect(&pb.arm, &pa.body) || polys_intersect(&pb.ferrule, &pa.body))
        {
            return Case::IIIB;
        }
        Case::I
    }

    /// Interference between a positioner's arm+ferrule and the fixed
    /// obstacles it can reach.
    pub fn spatial_collision_with_fixed(&self, a: usize, tp_a: [f64; 2]) -> Case {
        if self.units[a].retracted {
            return Case::I;
        }
        let pa = self.place_polys(a, tp_a);
        for kind in &self.fixed_neighbors[a] {
            match kind {
                FixedKind::Gfa => {
                    if polys_intersect(&pa.arm, &self.gfa) || polys_intersect(&pa.ferrule, &self.gfa)
                    {
                        return Case::GFA;
                    }
                }
                FixedKind::Ptl => {
                    if poly_leaves_region(&pa.arm, &self.ptl)
                        || poly_leaves_region(&pa.ferrule, &self.ptl)
                    {
                        return Case::PTL;
                    }
                }
            }
        }
        Case::I
    }

    // ── Spacetime queries ─────────────────────────────────────────────────────

    /// Sample period for a set of views: the configured knob, refined to a
    /// quarter of the shortest submove so no interference interval longer
    /// than the period can slip between samples.
    fn sample_period(&self, views: &[&ScheduleView]) -> f64 {
        let mut dt = self.cfg.timestep;
        for view in views {
            for row in &view.rows {
                if row.move_time > 0.0 {
                    dt = dt.min(row.move_time / 4.0);
                }
            }
        }
        // floor keeps residual micro-creep rows from exploding the sample
        // count; 2 ms of cruise is < 0.1° of arm motion
        dt.max(2e-3)
    }

    /// Sweep two animated positioners against each other. Two sweeps come
    /// back so "who collides first" can be attributed per positioner; for a
    /// sampled pair collision both carry the same time and case.
    pub fn spacetime_collision_between_positioners(
        &self,
        a: usize,
        tp0_a: [f64; 2],
        view_a: &ScheduleView,
        b: usize,
        tp0_b: [f64; 2],
        view_b: &ScheduleView,
    ) -> [Sweep; 2] {
        let tl_a = Timeline::from_view(view_a, tp0_a);
        let tl_b = Timeline::from_view(view_b, tp0_b);
        let total = tl_a.total_time().max(tl_b.total_time());
        let dt = self.sample_period(&[view_a, view_b]);
        let mut t = 0.0;
        loop {
            let case =
                self.spatial_collision_between_positioners(a, tl_a.pose_at(t), b, tl_b.pose_at(t));
            if case.is_collision() {
                let sweep = Sweep { collision_time: t, collision_case: case };
                return [sweep, sweep];
            }
            if t >= total {
                return [Sweep::clear(), Sweep::clear()];
            }
            t = (t + dt).min(total);
        }
    }

    /// Sweep one animated positioner against the fixed keepouts.
    pub fn spacetime_collision_with_fixed(
        &self,
        a: usize,
        tp0_a: [f64; 2],
        view_a: &ScheduleView,
    ) -> Sweep {
        if self.fixed_neighbors[a].is_empty() {
            return Sweep::clear();
        }
        let tl = Timeline::from_view(view_a, tp0_a);
        let total = tl.total_time();
        let dt = self.sample_period(&[view_a]);
        let mut t = 0.0;
        loop {
            let case = self.spatial_collision_with_fixed(a, tl.pose_at(t));
            if case.is_collision() {
                return Sweep { collision_time: t, collision_case: case };
            }
            if t >= total {
                return Sweep::clear();
            }
            t = (t + dt).min(total);
        }
    }
}

// ── Pose timelines ────────────────────────────────────────────────────────────

struct TimelineSpan {
    t0: f64,
    prepause: f64,
    move_time: f64,
    postpause: f64,
    pose0: [f64; 2],
    dt: f64,
    dp: f64,
    dur_t: f64,
    dur_p: f64,
}

/// Piecewise-linear pose-vs-time reconstruction of one schedule view. Each
/// axis moves at its own speed inside a row and then holds until the slower
/// axis (and any postpause) completes.
pub struct Timeline {
    spans: Vec<TimelineSpan>,
    start_pose: [f64; 2],
    end_pose: [f64; 2],
    total: f64,
}

impl Timeline {
    pub fn from_view(view: &ScheduleView, tp0: [f64; 2]) -> Self {
        let mut spans = Vec::with_capacity(view.rows.len());
        let mut t = 0.0;
        let mut pose = tp0;
        for row in &view.rows {
            let dur_t = if row.tdot != 0.0 { row.dt / row.tdot } else { 0.0 };
            let dur_p = if row.pdot != 0.0 { row.dp / row.pdot } else { 0.0 };
            spans.push(TimelineSpan {
                t0: t,
                prepause: row.prepause,
                move_time: row.move_time,
                postpause: row.postpause,
                pose0: pose,
                dt: row.dt,
                dp: row.dp,
                dur_t,
                dur_p,
            });
            pose = [pose[0] + row.dt, pose[1] + row.dp];
            t += row.prepause + row.move_time + row.postpause;
        }
        Self { spans, start_pose: tp0, end_pose: pose, total: t }
    }

    pub fn total_time(&self) -> f64 {
        self.total
    }

    pub fn end_pose(&self) -> [f64; 2] {
        self.end_pose
    }

    pub fn pose_at(&self, t: f64) -> [f64; 2] {
        if t <= 0.0 || self.spans.is_empty() {
            return self.start_pose;
        }
        if t >= self.total {
            return self.end_pose;
        }
        for span in self.spans.iter().rev() {
            if t >= span.t0 {
                let local = t - span.t0 - span.prepause;
                if local <= 0.0 {
                    return span.pose0;
                }
                let ft = if span.dur_t > 0.0 { (local / span.dur_t).min(1.0) } else { 1.0 };
                let fp = if span.dur_p > 0.0 { (local / span.dur_p).min(1.0) } else { 1.0 };
                return [span.pose0[0] + ft * span.dt, span.pose0[1] + fp * span.dp];
            }
        }
        self.start_pose
    }

    /// Whether either axis is in motion at time t (pauses and holds excluded).
    pub fn is_moving(&self, t: f64) -> bool {
        for span in self.spans.iter().rev() {
            if t >= span.t0 {
                let local = t - span.t0 - span.prepause;
                return local >= 0.0 && local < span.dur_t.max(span.dur_p);
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PosModel;
    use crate::move_table::MoveTable;
    use fp_types::Axis;

    /// Two nominal positioners a pitch apart on the x axis.
    fn pair() -> (Collider, Vec<PosState>) {
        let mut a = PosState::nominal("M00001", 17, 0, 1);
        let mut b = PosState::nominal("M00002", 18, 0, 2);
        a.offset_x = 0.0;
        b.offset_x = 10.4;
        let states = vec![a, b];
        (Collider::new(ColliderConfig::default(), &states), states)
    }

    #[test]
    fn pitch_neighbors_are_detected_and_second_ring_is_not() {
        let mut a = PosState::nominal("M00001", 17, 0, 1);
        let mut b = PosState::nominal("M00002", 18, 0, 2);
        let mut c = PosState::nominal("M00003", 19, 0, 3);
        a.offset_x = 0.0;
        b.offset_x = 10.4;
        c.offset_x = 20.8;
        let col = Collider::new(ColliderConfig::default(), &[a, b, c]);
        assert_eq!(col.pos_neighbors(0), &[1]);
        assert_eq!(col.pos_neighbors(1), &[0, 2]);
        assert!(col.fixed_neighbors(0).is_empty());
    }

    #[test]
    fn retracted_neighbors_do_not_collide() {
        let (col, _) = pair();
        // both folded: arms stay within their own patrol centers
        let case = col.spatial_collision_between_positioners(0, [0.0, 180.0], 1, [180.0, 180.0]);
        assert_eq!(case, Case::I);
    }

    #[test]
    fn extended_arms_reaching_into_the_gap_collide_as_case_ii() {
        let (col, _) = pair();
        // both arms fully extended straight at each other along x
        let case = col.spatial_collision_between_positioners(0, [0.0, 10.0], 1, [180.0, 10.0]);
        assert_eq!(case, Case::II);
    }

    #[test]
    fn arm_reaching_a_neighbors_body_is_case_iii() {
        let (col, _) = pair();
        // A's ferrule pokes B's central body; B's own arm is folded on the
        // far side and stays clear
        let case = col.spatial_collision_between_positioners(0, [0.0, 0.0], 1, [0.0, 180.0]);
        assert_eq!(case, Case::IIIA);
        // mirrored: B's ferrule into A's body, A's arm folded away
        let case = col.spatial_collision_between_positioners(0, [180.0, 180.0], 1, [180.0, 0.0]);
        assert_eq!(case, Case::IIIB);
    }

    #[test]
    fn retracted_classification_suppresses_the_arm() {
        let mut a = PosState::nominal("M00001", 17, 0, 1);
        let mut b = PosState::nominal("M00002", 18, 0, 2);
        a.offset_x = 0.0;
        b.offset_x = 10.4;
        b.classified_as_retracted = true;
        let col = Collider::new(ColliderConfig::default(), &[a, b]);
        // the same poses read as arm-vs-arm (II) when B is armed; with B
        // retracted only its central body remains in play
        let case = col.spatial_collision_between_positioners(0, [0.0, 10.0], 1, [180.0, 10.0]);
        assert_eq!(case, Case::IIIA);
        // and with B's body rotated clear, nothing collides at all
        let case = col.spatial_collision_between_positioners(0, [0.0, 10.0], 1, [90.0, 10.0]);
        assert_eq!(case, Case::I);
    }

    #[test]
    fn gfa_keepout_is_hit_by_an_extended_arm() {
        let mut a = PosState::nominal("M00001", 17, 0, 1);
        a.offset_x = 0.0;
        let cfg = ColliderConfig {
            gfa_x0: 4.0,
            gfa_y0: 0.0,
            gfa_rot: 0.0,
            ..ColliderConfig::default()
        };
        let col = Collider::new(cfg, &[a]);
        assert_eq!(col.fixed_neighbors(0), &[FixedKind::Gfa]);
        assert_eq!(col.spatial_collision_with_fixed(0, [0.0, 0.0]), Case::GFA);
        assert_eq!(col.spatial_collision_with_fixed(0, [180.0, 0.0]), Case::I);
    }

    #[test]
    fn petal_boundary_is_an_inverted_keepout() {
        let mut a = PosState::nominal("M00001", 17, 0, 1);
        a.offset_x = 0.0;
        let cfg = ColliderConfig {
            keepout_ptl: vec![[-4.0, -20.0], [20.0, -20.0], [20.0, 20.0], [-4.0, 20.0]],
            ..ColliderConfig::default()
        };
        let col = Collider::new(cfg, &[a]);
        assert_eq!(col.fixed_neighbors(0), &[FixedKind::Ptl]);
        // arm pointing out through the near wall
        assert_eq!(col.spatial_collision_with_fixed(0, [180.0, 0.0]), Case::PTL);
        // arm pointing inward is fine
        assert_eq!(col.spatial_collision_with_fixed(0, [0.0, 0.0]), Case::I);
    }

    #[test]
    fn spacetime_sweep_finds_a_crossing_that_static_endpoints_miss() {
        let (col, states) = pair();
        // A swings its extended arm through B's reach zone and back out;
        // B extends into the gap and holds
        let model_a = PosModel::from_state(&states[0]);
        let model_b = PosModel::from_state(&states[1]);
        let mut ta = MoveTable::new(model_a);
        ta.set_move(0, Axis::Phi, -170.0); // extend
        ta.set_move(1, Axis::Theta, 40.0);
        let mut tb = MoveTable::new(model_b);
        tb.set_move(0, Axis::Phi, -170.0);
        let tp0 = [0.0, 180.0];
        let tp0_b = [180.0, 180.0];
        let [sa, sb] = col.spacetime_collision_between_positioners(
            0,
            tp0,
            &ta.for_schedule(),
            1,
            tp0_b,
            &tb.for_schedule(),
        );
        assert!(sa.collided());
        assert_eq!(sa.collision_time, sb.collision_time);
        assert!(!sa.collision_case.with_fixed());
    }

    #[test]
    fn holding_positioners_never_collide_over_time() {
        let (col, _) = pair();
        let hold_a = ScheduleView::hold("M00001", 1);
        let hold_b = ScheduleView::hold("M00002", 2);
        let [sa, sb] = col.spacetime_collision_between_positioners(
            0,
            [0.0, 180.0],
            &hold_a,
            1,
            [180.0, 180.0],
            &hold_b,
        );
        assert!(!sa.collided());
        assert!(!sb.collided());
    }

    #[test]
    fn timeline_interpolates_each_axis_at_its_own_speed() {
        let view = ScheduleView {
            posid: "M00001".into(),
            device_loc: 1,
            rows: vec![crate::move_table::ScheduleRow {
                dt: 10.0,
                dp: -20.0,
                tdot: 10.0,
                pdot: -40.0,
                prepause: 1.0,
                move_time: 1.0,
                postpause: 0.5,
            }],
        };
        let tl = Timeline::from_view(&view, [0.0, 100.0]);
        assert_eq!(tl.pose_at(0.5), [0.0, 100.0]); // prepause hold
        let mid = tl.pose_at(1.5); // 0.5 s into motion
        assert!((mid[0] - 5.0).abs() < 1e-9);
        assert!((mid[1] - 80.0).abs() < 1e-9); // phi done at 0.5 s
        assert_eq!(tl.pose_at(10.0), [10.0, 80.0]);
        assert!(tl.is_moving(1.2));
        assert!(!tl.is_moving(2.2)); // postpause
        assert!((tl.total_time() - 2.5).abs() < 1e-9);
    }
}
