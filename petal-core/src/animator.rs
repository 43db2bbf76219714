//! animator.rs — Polygon-snapshot timeline for offline verification
//!
//! Optional hook fed by the scheduler after a schedule is assembled: every
//! drawn item (per-positioner keepout polygons, the fixed PTL and GFA
//! outlines) gets a timeline of (time, polygon, style) snapshots. The
//! collected timeline is written out as an SVG frame sequence (rasterize and
//! feed to ffmpeg for a movie) plus a JSON document of the raw data. Off by
//! default; nothing in the scheduling path touches this module.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::collider::Pt;

/// Draw styles. Overrides mark collision participants and frozen positioners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStyle {
    Normal,
    Collision,
    Frozen,
}

fn style_colors(item: &str, style: ItemStyle) -> (&'static str, &'static str) {
    // (fill, stroke)
    match style {
        ItemStyle::Collision => ("#f4a0a0", "#c01818"),
        ItemStyle::Frozen => ("#b8c4d8", "#4a5a78"),
        ItemStyle::Normal => match item {
            "central body" => ("#d8e4c8", "#5a7a3a"),
            "phi arm" => ("#c8d8ec", "#2a5a9a"),
            "ferrule" => ("#f0e0a8", "#a08018"),
            "PTL" => ("none", "#303030"),
            "GFA" => ("#e0d0e8", "#704888"),
            _ => ("#e0e0e0", "#606060"),
        },
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ItemTimeline {
    item: String,
    times: Vec<f64>,
    polys: Vec<Vec<Pt>>,
    styles: Vec<ItemStyle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Label {
    text: String,
    x: f64,
    y: f64,
}

/// Collects animation data for one schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Animator {
    /// Frame interval, seconds
    pub timestep: f64,
    /// Extra margin around the drawn items when cropping, mm
    pub crop_margin: f64,
    pub cropping_on: bool,
    items: BTreeMap<String, ItemTimeline>,
    labels: Vec<Label>,
    /// Time (ms) → note shown on frames from that time onward
    notes: BTreeMap<i64, String>,
}

impl Animator {
    pub fn new(timestep: f64) -> Self {
        Self {
            timestep,
            crop_margin: 14.0,
            cropping_on: true,
            items: BTreeMap::new(),
            labels: Vec::new(),
            notes: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.labels.clear();
        self.notes.clear();
    }

    /// Add a polygon snapshot for an item at a time. `item` is the kind
    /// ("phi arm", "central body", "ferrule", "PTL", "GFA"); `idx` separates
    /// positioners from each other.
    pub fn add_or_change_item(
        &mut self,
        item: &str,
        idx: &str,
        time: f64,
        polygon: Vec<Pt>,
        style: ItemStyle,
    ) {
        let key = format!("{item} {idx}");
        let tl = self
            .items
            .entry(key)
            .or_insert_with(|| ItemTimeline { item: item.to_string(), ..Default::default() });
        match tl.times.iter().position(|&t| t == time) {
            Some(i) => {
                tl.polys[i] = polygon;
                tl.styles[i] = style;
            }
            None => {
                let i = tl.times.iter().take_while(|&&t| t < time).count();
                tl.times.insert(i, time);
                tl.polys.insert(i, polygon);
                tl.styles.insert(i, style);
            }
        }
    }

    pub fn add_label(&mut self, text: &str, x: f64, y: f64) {
        self.labels.push(Label { text: text.to_string(), x, y });
    }

    pub fn set_note(&mut self, time: f64, note: &str) {
        self.notes.insert((time * 1000.0).round() as i64, note.to_string());
    }

    /// Drop all snapshots at or after `time`.
    pub fn clear_after(&mut self, time: f64) {
        for tl in self.items.values_mut() {
            while tl.times.last().is_some_and(|&t| t >= time) {
                tl.times.pop();
                tl.polys.pop();
                tl.styles.pop();
            }
        }
        let cutoff = (time * 1000.0).round() as i64;
        self.notes.retain(|&t, _| t < cutoff);
    }

    /// Latest snapshot time across all items.
    pub fn end_time(&self) -> f64 {
        self.items
            .values()
            .filter_map(|tl| tl.times.last().copied())
            .fold(0.0, f64::max)
    }

    fn crop_box(&self) -> (Pt, Pt) {
        let mut lo = [f64::INFINITY; 2];
        let mut hi = [f64::NEG_INFINITY; 2];
        for tl in self.items.values() {
            for poly in &tl.polys {
                for p in poly {
                    for k in 0..2 {
                        lo[k] = lo[k].min(p[k]);
                        hi[k] = hi[k].max(p[k]);
                    }
                }
            }
        }
        if !lo[0].is_finite() {
            return ([-10.0, -10.0], [10.0, 10.0]);
        }
        let m = if self.cropping_on { self.crop_margin } else { 4.0 * self.crop_margin };
        ([lo[0] - m, lo[1] - m], [hi[0] + m, hi[1] + m])
    }

    /// Item poses at a frame time: the latest snapshot at or before `t`.
    fn frame_at(&self, t: f64) -> Vec<(&str, &Vec<Pt>, ItemStyle)> {
        let mut out = Vec::new();
        for tl in self.items.values() {
            let mut latest: Option<usize> = None;
            for (i, &ti) in tl.times.iter().enumerate() {
                if ti <= t + 1e-9 {
                    latest = Some(i);
                } else {
                    break;
                }
            }
            if let Some(i) = latest {
                out.push((tl.item.as_str(), &tl.polys[i], tl.styles[i]));
            }
        }
        out
    }

    fn note_at(&self, t: f64) -> Option<&str> {
        let ms = (t * 1000.0).round() as i64;
        self.notes.range(..=ms).next_back().map(|(_, n)| n.as_str())
    }

    /// Write one SVG per frame plus `timeline.json` into `dir`. Returns the
    /// number of frames written. The SVG sequence is ffmpeg-consumable after
    /// rasterization.
    pub fn write_frames(&self, dir: &Path) -> Result<usize, String> {
        std::fs::create_dir_all(dir).map_err(|e| e.to_string())?;
        let json = serde_json::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(dir.join("timeline.json"), json).map_err(|e| e.to_string())?;

        let end = self.end_time();
        let mut frame = 0usize;
        let mut t = 0.0;
        while t <= end + 1e-9 {
            let svg = self.render_svg(t);
            let name = format!("frame{frame:05}.svg");
            std::fs::write(dir.join(name), svg).map_err(|e| e.to_string())?;
            frame += 1;
            t += self.timestep;
        }
        Ok(frame)
    }

    fn render_svg(&self, t: f64) -> String {
        let (lo, hi) = self.crop_box();
        let (w, h) = (hi[0] - lo[0], hi[1] - lo[1]);
        let mut svg = String::new();
        svg.push_str(&format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"800\" height=\"{:.0}\" \
             viewBox=\"{:.3} {:.3} {:.3} {:.3}\">\n",
            800.0 * h / w,
            lo[0],
            -hi[1], // flip y so +y points up
            w,
            h
        ));
        svg.push_str("<g transform=\"scale(1,-1)\">\n");
        for (item, poly, style) in self.frame_at(t) {
            let (fill, stroke) = style_colors(item, style);
            let pts: Vec<String> = poly.iter().map(|p| format!("{:.3},{:.3}", p[0], p[1])).collect();
            svg.push_str(&format!(
                "<polygon points=\"{}\" fill=\"{}\" stroke=\"{}\" stroke-width=\"0.15\" \
                 fill-opacity=\"0.6\"/>\n",
                pts.join(" "),
                fill,
                stroke
            ));
        }
        svg.push_str("</g>\n");
        for label in &self.labels {
            svg.push_str(&format!(
                "<text x=\"{:.3}\" y=\"{:.3}\" font-size=\"1.6\">{}</text>\n",
                label.x,
                -label.y,
                label.text
            ));
        }
        let note = match self.note_at(t) {
            Some(n) => format!("t = {t:.2} s: {n}"),
            None => format!("t = {t:.2} s"),
        };
        svg.push_str(&format!(
            "<text x=\"{:.3}\" y=\"{:.3}\" font-size=\"1.8\">{}</text>\n",
            lo[0] + 1.0,
            -(hi[1] - 2.5),
            note
        ));
        svg.push_str("</svg>\n");
        svg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(cx: f64, cy: f64) -> Vec<Pt> {
        vec![[cx - 1.0, cy - 1.0], [cx + 1.0, cy - 1.0], [cx + 1.0, cy + 1.0], [cx - 1.0, cy + 1.0]]
    }

    #[test]
    fn snapshots_keep_time_order_regardless_of_insertion_order() {
        let mut anim = Animator::new(0.1);
        anim.add_or_change_item("ferrule", "7", 0.2, square(1.0, 0.0), ItemStyle::Normal);
        anim.add_or_change_item("ferrule", "7", 0.0, square(0.0, 0.0), ItemStyle::Normal);
        anim.add_or_change_item("ferrule", "7", 0.1, square(0.5, 0.0), ItemStyle::Normal);
        let frame = anim.frame_at(0.15);
        assert_eq!(frame.len(), 1);
        assert_eq!(frame[0].1[0], [-0.5, -1.0]); // snapshot from t = 0.1
        assert!((anim.end_time() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn same_time_snapshot_replaces_instead_of_duplicating() {
        let mut anim = Animator::new(0.1);
        anim.add_or_change_item("phi arm", "3", 0.0, square(0.0, 0.0), ItemStyle::Normal);
        anim.add_or_change_item("phi arm", "3", 0.0, square(2.0, 0.0), ItemStyle::Collision);
        let frame = anim.frame_at(0.0);
        assert_eq!(frame.len(), 1);
        assert_eq!(frame[0].2, ItemStyle::Collision);
    }

    #[test]
    fn clear_after_truncates_timelines() {
        let mut anim = Animator::new(0.1);
        for i in 0..5 {
            anim.add_or_change_item("ferrule", "1", i as f64 * 0.1, square(i as f64, 0.0), ItemStyle::Normal);
        }
        anim.clear_after(0.25);
        assert!((anim.end_time() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn frames_and_timeline_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut anim = Animator::new(0.1);
        anim.add_or_change_item("ferrule", "1", 0.0, square(0.0, 0.0), ItemStyle::Normal);
        anim.add_or_change_item("ferrule", "1", 0.2, square(3.0, 0.0), ItemStyle::Frozen);
        anim.add_label("M00001", 0.0, 2.0);
        anim.set_note(0.0, "demo");
        let n = anim.write_frames(dir.path()).unwrap();
        assert_eq!(n, 3); // t = 0.0, 0.1, 0.2
        assert!(dir.path().join("timeline.json").exists());
        let svg = std::fs::read_to_string(dir.path().join("frame00000.svg")).unwrap();
        assert!(svg.contains("<polygon"));
        assert!(svg.contains("demo"));
    }
}
