use std::path::Path;

use gdal::vector::LayerAccess;
use gdal::Dataset;
use geo::{Coord, EuclideanDistance, LineString, Point};

use crate::crs::{transform_between, CrsResolver};
use crate::error::PlanError;
use crate::grid::Candidate;
use crate::models::AccessMode;

/// Road and trail geometries in the metric CRS. Missing layers are empty
/// feature sets, not errors.
#[derive(Debug, Default)]
pub struct AccessLayers {
    pub roads: Vec<LineString<f64>>,
    pub trails: Vec<LineString<f64>>,
}

impl AccessLayers {
    pub fn load(
        roads: Option<&Path>,
        trails: Option<&Path>,
        crs: &CrsResolver,
    ) -> Result<Self, PlanError> {
        let roads = match roads {
            Some(path) => load_lines(path, crs)?,
            None => Vec::new(),
        };
        let trails = match trails {
            Some(path) => load_lines(path, crs)?,
            None => Vec::new(),
        };
        tracing::info!(
            roads = roads.len(),
            trails = trails.len(),
            "access layers loaded"
        );
        Ok(Self { roads, trails })
    }
}

fn load_lines(path: &Path, crs: &CrsResolver) -> Result<Vec<LineString<f64>>, PlanError> {
    let dataset = Dataset::open(path)
        .map_err(|e| PlanError::Data(format!("cannot open vector layer {}: {e}", path.display())))?;
    let metric_def = format!("EPSG:{}", crs.epsg());
    let mut lines = Vec::new();
    for mut layer in dataset.layers() {
        // Layers without CRS metadata are assumed to be WGS84.
        let source_def = layer
            .spatial_ref()
            .and_then(|srs| match (srs.auth_name(), srs.auth_code()) {
                (Ok(name), Ok(code)) => Some(format!("{name}:{code}")),
                _ => srs.to_wkt().ok(),
            })
            .unwrap_or_else(|| "EPSG:4326".to_string());
        let transform = if source_def == metric_def {
            None
        } else {
            Some(transform_between(&source_def, &metric_def)?)
        };
        for feature in layer.features() {
            let Some(geometry) = feature.geometry() else {
                continue;
            };
            let mut raw = Vec::new();
            collect_line_strings(geometry, &mut raw);
            for line in raw {
                let coords = line
                    .into_iter()
                    .map(|(x, y)| match &transform {
                        Some(t) => {
                            let (mx, my) = t.convert((x, y))?;
                            Ok(Coord { x: mx, y: my })
                        }
                        None => Ok(Coord { x, y }),
                    })
                    .collect::<Result<Vec<_>, PlanError>>()?;
                if coords.len() >= 2 {
                    lines.push(LineString::new(coords));
                }
            }
        }
    }
    Ok(lines)
}

fn collect_line_strings(geometry: &gdal::vector::Geometry, out: &mut Vec<Vec<(f64, f64)>>) {
    let parts = geometry.geometry_count();
    if parts > 0 {
        for i in 0..parts {
            collect_line_strings(&geometry.get_geometry(i), out);
        }
        return;
    }
    let points: Vec<(f64, f64)> = geometry
        .get_point_vec()
        .into_iter()
        .map(|(x, y, _z)| (x, y))
        .collect();
    if points.len() >= 2 {
        out.push(points);
    }
}

/// Classifies every candidate and keeps those whose mode is allowed.
///
/// Classification picks the most permissive ground truth: road beats trail
/// beats off-road. `anywhere` in the allowed set acts as a wildcard; a
/// candidate kept only by the wildcard carries the `anywhere` label so that
/// every retained candidate's mode is itself allowed.
pub fn classify_candidates(
    candidates: Vec<Candidate>,
    layers: &AccessLayers,
    allowed: &[AccessMode],
    buffer_m: f64,
) -> Vec<Candidate> {
    let wildcard = allowed.contains(&AccessMode::Anywhere);
    let before = candidates.len();
    let retained: Vec<Candidate> = candidates
        .into_iter()
        .filter_map(|mut cand| {
            let point = Point::new(cand.x, cand.y);
            let mode = if within(&point, &layers.roads, buffer_m) {
                AccessMode::Road
            } else if within(&point, &layers.trails, buffer_m) {
                AccessMode::Trail
            } else {
                AccessMode::OffRoad
            };
            if allowed.contains(&mode) {
                cand.access = mode;
                Some(cand)
            } else if wildcard {
                cand.access = AccessMode::Anywhere;
                Some(cand)
            } else {
                None
            }
        })
        .collect();
    tracing::info!(before, retained = retained.len(), "access filter applied");
    retained
}

fn within(point: &Point<f64>, lines: &[LineString<f64>], buffer_m: f64) -> bool {
    lines
        .iter()
        .any(|line| point.euclidean_distance(line) <= buffer_m)
}
