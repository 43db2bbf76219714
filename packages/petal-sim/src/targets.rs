//! targets.rs — Seeded random target batches
//!
//! Draws reachable poslocXY targets uniformly over each positioner's patrol
//! annulus (area-uniform, so the outer zone is not undersampled the way a
//! uniform radius draw would).

use rand::rngs::StdRng;
use rand::Rng;

use petal_core::PosState;

pub struct TargetRequest {
    pub posid: String,
    pub x: f64,
    pub y: f64,
}

/// One random reachable target per selected positioner. `fraction` selects
/// the share of the array that gets a request this batch.
pub fn draw_batch(states: &[PosState], fraction: f64, rng: &mut StdRng) -> Vec<TargetRequest> {
    let mut out = Vec::new();
    for state in states {
        if rng.gen::<f64>() > fraction {
            continue;
        }
        let (min_r, max_r) = state.patrol_annulus();
        // shave the edges so quantization and backlash margins never push a
        // drawn target out of reach
        let lo = min_r + 0.05;
        let hi = max_r - 0.05;
        let r = (rng.gen_range(lo * lo..hi * hi)).sqrt();
        let a = rng.gen_range(0.0..std::f64::consts::TAU);
        out.push(TargetRequest { posid: state.pos_id.clone(), x: r * a.cos(), y: r * a.sin() });
    }
    out
}
