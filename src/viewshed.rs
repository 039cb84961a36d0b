//! Per-candidate visibility over the surface raster.
//!
//! A target cell is visible when the straight sight line from the observer
//! (drone altitude above the launch cell) down to the cell's ground stays on
//! or above the interpolated surface at every sampled step. Sampling advances
//! one cell along the dominant cardinal of the azimuth. Earth curvature and
//! refraction are ignored at these ranges.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::cellset::CellSet;
use crate::error::PlanError;
use crate::grid::Candidate;
use crate::progress::CancelToken;
use crate::raster::SurfaceRaster;

#[derive(Debug, Clone, Copy)]
pub struct ViewshedParams {
    pub observer_agl_m: f64,
    pub max_range_m: f64,
}

/// Computes the visible target-cell set of every candidate. The returned
/// vector is aligned with the input slice and deterministic for any worker
/// count; cancellation is observed once per candidate.
pub fn compute_viewsheds(
    raster: &SurfaceRaster,
    candidates: &[Candidate],
    params: ViewshedParams,
    cancel: &CancelToken,
    progress: &(impl Fn(f32) + Sync),
) -> Result<Vec<CellSet>, PlanError> {
    let total = candidates.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    let done = AtomicUsize::new(0);
    let frame_len = raster.frame.len();

    let sets: Vec<CellSet> = candidates
        .par_iter()
        .map(|candidate| {
            if cancel.is_cancelled() {
                return CellSet::Sparse(Vec::new());
            }
            let cells = visible_target_cells(raster, candidate, params);
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            progress(finished as f32 / total as f32);
            CellSet::from_sorted(cells, frame_len)
        })
        .collect();

    cancel.ensure_active()?;
    Ok(sets)
}

/// Target cells visible from one candidate, sorted by cell index.
pub fn visible_target_cells(
    raster: &SurfaceRaster,
    candidate: &Candidate,
    params: ViewshedParams,
) -> Vec<u32> {
    let frame = &raster.frame;
    let observer_z = candidate.ground_elev_m + params.observer_agl_m;
    let range_cells = (params.max_range_m / frame.cell_size).ceil() as isize;

    let row0 = candidate.row as isize;
    let col0 = candidate.col as isize;
    let row_min = (row0 - range_cells).max(0) as usize;
    let row_max = ((row0 + range_cells) as usize).min(frame.rows - 1);
    let col_min = (col0 - range_cells).max(0) as usize;
    let col_max = ((col0 + range_cells) as usize).min(frame.cols - 1);

    let mut visible = Vec::new();
    for row in row_min..=row_max {
        for col in col_min..=col_max {
            if !raster.is_target(row, col) {
                continue;
            }
            let center = frame.cell_center(row, col);
            let dx = center.x - candidate.x;
            let dy = center.y - candidate.y;
            if dx * dx + dy * dy > params.max_range_m * params.max_range_m {
                continue;
            }
            if sight_line_clear(raster, candidate, observer_z, row, col) {
                visible.push(frame.index(row, col));
            }
        }
    }
    visible
}

fn sight_line_clear(
    raster: &SurfaceRaster,
    candidate: &Candidate,
    observer_z: f64,
    row: usize,
    col: usize,
) -> bool {
    let frame = &raster.frame;
    let steps = (row as isize - candidate.row as isize)
        .abs()
        .max((col as isize - candidate.col as isize).abs());
    if steps <= 1 {
        return true;
    }
    let center = frame.cell_center(row, col);
    let target_z = raster.ground[[row, col]] as f64;
    let dx = center.x - candidate.x;
    let dy = center.y - candidate.y;
    let dz = target_z - observer_z;

    for k in 1..steps {
        let t = k as f64 / steps as f64;
        let surface = raster.sample_surface(candidate.x + dx * t, candidate.y + dy * t) as f64;
        // Equal elevation still passes.
        if surface > observer_z + dz * t {
            return false;
        }
    }
    true
}
