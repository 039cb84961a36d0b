use geo::{BoundingRect, Polygon};

use crate::models::AccessMode;
use crate::raster::SurfaceRaster;

/// A potential launch point on the candidate lattice.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub index: usize,
    pub x: f64,
    pub y: f64,
    pub row: usize,
    pub col: usize,
    pub ground_elev_m: f64,
    pub access: AccessMode,
}

/// Generates the candidate lattice over the polygon's bounding rectangle,
/// keeping points whose enclosing raster cell has its centroid inside the
/// polygon. Returns the candidates in row-major order, northing descending
/// then easting ascending, together with the effective spacing.
pub fn generate_candidates(
    polygon_metric: &Polygon<f64>,
    raster: &SurfaceRaster,
    grid_spacing_m: f64,
    max_candidates: usize,
) -> (Vec<Candidate>, f64) {
    let Some(rect) = polygon_metric.bounding_rect() else {
        return (Vec::new(), grid_spacing_m);
    };
    let width = rect.max().x - rect.min().x;
    let height = rect.max().y - rect.min().y;

    let mut spacing = grid_spacing_m;
    let mut nx = lattice_count(width, spacing);
    let mut ny = lattice_count(height, spacing);
    if nx * ny > max_candidates {
        let scale = ((nx * ny) as f64 / max_candidates as f64).sqrt();
        spacing *= scale;
        nx = lattice_count(width, spacing);
        ny = lattice_count(height, spacing);
        tracing::warn!(
            requested_spacing_m = grid_spacing_m,
            effective_spacing_m = spacing,
            "candidate lattice exceeds the cap, widening spacing"
        );
    }

    let mut candidates = Vec::new();
    for j in (0..ny).rev() {
        let y = rect.min().y + j as f64 * spacing;
        for i in 0..nx {
            let x = rect.min().x + i as f64 * spacing;
            let Some((row, col)) = raster.frame.cell_of(x, y) else {
                continue;
            };
            if !raster.is_target(row, col) {
                continue;
            }
            candidates.push(Candidate {
                index: candidates.len(),
                x,
                y,
                row,
                col,
                ground_elev_m: raster.ground[[row, col]] as f64,
                access: AccessMode::OffRoad,
            });
        }
    }
    tracing::info!(
        generated = candidates.len(),
        spacing_m = spacing,
        "candidate grid generated"
    );
    (candidates, spacing)
}

fn lattice_count(extent: f64, spacing: f64) -> usize {
    (extent / spacing).floor() as usize + 1
}
