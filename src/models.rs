use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};

use crate::error::PlanError;

pub const SQ_M_PER_ACRE: f64 = 4_046.856_422_4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

/// How a launch point can be reached on the ground.
///
/// Declaration order is the selection priority: a road-side launch beats a
/// trail-side one, which beats hiking off-road, which beats the wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Road,
    Trail,
    OffRoad,
    Anywhere,
}

impl AccessMode {
    pub fn priority(self) -> u8 {
        match self {
            AccessMode::Road => 0,
            AccessMode::Trail => 1,
            AccessMode::OffRoad => 2,
            AccessMode::Anywhere => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::Road => "road",
            AccessMode::Trail => "trail",
            AccessMode::OffRoad => "off_road",
            AccessMode::Anywhere => "anywhere",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    /// Closed exterior ring in WGS84, `[lon, lat]` per vertex.
    pub search_polygon: Vec<[f64; 2]>,
    pub drone_agl_m: f64,
    pub preferred_segment_acres: f64,
    pub max_vlos_m: f64,
    pub access_modes: Vec<AccessMode>,
    #[serde(default = "default_access_buffer_m")]
    pub access_buffer_m: f64,
    pub grid_spacing_m: f64,
    /// Candidate cap; the lattice spacing is widened when exceeded.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Surface raster cell cap; the cell size is coarsened when exceeded.
    #[serde(default = "default_max_surface_cells")]
    pub max_surface_cells: usize,
    /// Viewshed worker pool size; defaults to the available cores.
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

fn default_access_buffer_m() -> f64 {
    50.0
}

fn default_max_candidates() -> usize {
    10_000
}

fn default_max_surface_cells() -> usize {
    25_000_000
}

impl ProjectConfig {
    /// Validates every parameter and returns the search polygon, before any
    /// expensive work happens.
    pub fn validate(&self) -> Result<Polygon<f64>, PlanError> {
        if self.name.trim().is_empty() {
            return Err(PlanError::Config("project name is empty".into()));
        }
        if !(self.drone_agl_m > 0.0 && self.drone_agl_m <= 500.0) {
            return Err(PlanError::Config(format!(
                "drone AGL altitude must be in (0, 500] m, got {}",
                self.drone_agl_m
            )));
        }
        if !(self.preferred_segment_acres > 0.0) {
            return Err(PlanError::Config(format!(
                "preferred segment size must be positive, got {} acres",
                self.preferred_segment_acres
            )));
        }
        if !(self.max_vlos_m > 0.0) {
            return Err(PlanError::Config(format!(
                "max VLOS must be positive, got {} m",
                self.max_vlos_m
            )));
        }
        if !(self.grid_spacing_m > 0.0) {
            return Err(PlanError::Config(format!(
                "grid spacing must be positive, got {} m",
                self.grid_spacing_m
            )));
        }
        if self.access_buffer_m < 0.0 {
            return Err(PlanError::Config(format!(
                "access buffer must be non-negative, got {} m",
                self.access_buffer_m
            )));
        }
        if self.access_modes.is_empty() {
            return Err(PlanError::Config("access mode set is empty".into()));
        }
        if self.max_candidates == 0 || self.max_surface_cells == 0 {
            return Err(PlanError::Config(
                "candidate and surface cell caps must be positive".into(),
            ));
        }
        self.parse_polygon()
    }

    fn parse_polygon(&self) -> Result<Polygon<f64>, PlanError> {
        let ring = &self.search_polygon;
        if ring.len() < 4 {
            return Err(PlanError::Config(format!(
                "search polygon needs at least 4 vertices, got {}",
                ring.len()
            )));
        }
        let first = ring[0];
        let last = ring[ring.len() - 1];
        if (first[0] - last[0]).abs() > 1e-12 || (first[1] - last[1]).abs() > 1e-12 {
            return Err(PlanError::Config(
                "search polygon ring is not closed".into(),
            ));
        }
        for v in ring {
            if !v[0].is_finite() || !v[1].is_finite() {
                return Err(PlanError::Config("search polygon has non-finite vertex".into()));
            }
            if v[0] < -180.0 || v[0] > 180.0 || v[1] < -90.0 || v[1] > 90.0 {
                return Err(PlanError::Config(format!(
                    "vertex ({}, {}) is outside lon/lat bounds",
                    v[0], v[1]
                )));
            }
        }
        let coords: Vec<Coord<f64>> = ring.iter().map(|v| Coord { x: v[0], y: v[1] }).collect();
        for w in coords.windows(2) {
            if (w[0].x - w[1].x).abs() < 1e-12 && (w[0].y - w[1].y).abs() < 1e-12 {
                return Err(PlanError::Config(
                    "search polygon has a repeated consecutive vertex".into(),
                ));
            }
        }
        if ring_self_intersects(&coords) {
            return Err(PlanError::Config("search polygon is self-intersecting".into()));
        }
        Ok(Polygon::new(LineString::from(coords), vec![]))
    }
}

/// Proper-crossing check between all non-adjacent edge pairs of a closed ring.
fn ring_self_intersects(coords: &[Coord<f64>]) -> bool {
    let n = coords.len() - 1;
    for i in 0..n {
        for j in (i + 1)..n {
            // Skip adjacent edges (they share an endpoint by construction).
            if j == i + 1 || (i == 0 && j == n - 1) {
                continue;
            }
            if segments_cross(coords[i], coords[i + 1], coords[j], coords[j + 1]) {
                return true;
            }
        }
    }
    false
}

fn segments_cross(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>, d: Coord<f64>) -> bool {
    let o1 = orientation(a, b, c);
    let o2 = orientation(a, b, d);
    let o3 = orientation(c, d, a);
    let o4 = orientation(c, d, b);
    o1 * o2 < 0.0 && o3 * o4 < 0.0
}

fn orientation(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

#[derive(Debug, Clone)]
pub struct RasterInputs {
    pub dem: std::path::PathBuf,
    pub vegetation: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct VectorInputs {
    pub roads: Option<std::path::PathBuf>,
    pub trails: Option<std::path::PathBuf>,
}

/// One planned search segment, in geographic coordinates.
#[derive(Debug, Clone)]
pub struct SegmentOutput {
    pub sequence: u32,
    pub polygon: MultiPolygon<f64>,
    pub launch: Coordinate,
    pub ground_elev_m: f64,
    pub area_m2: f64,
    pub area_acres: f64,
    pub access: AccessMode,
}

#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub candidates_generated: usize,
    pub candidates_retained: usize,
    pub candidates_selected: usize,
    pub cells_total: usize,
    pub cells_visible: usize,
    pub cells_covered: usize,
    pub min_segment_cells: usize,
    pub max_segment_cells: usize,
    pub mean_segment_cells: f64,
    pub cell_size_m: f64,
    pub effective_grid_spacing_m: f64,
}

#[derive(Debug, Clone)]
pub struct ComputeResult {
    pub segments: Vec<SegmentOutput>,
    pub coverage_fraction: f64,
    pub epsg: u32,
    pub diagnostics: Diagnostics,
}
