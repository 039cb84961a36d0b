use geo::{Area, MultiPolygon, Polygon};
use serde::Serialize;

use crate::coverage::SelectedSegment;
use crate::crs::CrsResolver;
use crate::error::PlanError;
use crate::grid::Candidate;
use crate::models::{ComputeResult, Diagnostics, SegmentOutput, SQ_M_PER_ACRE};

/// Transforms selected segments back to WGS84 and attaches their metrics.
/// Areas come from the metric geometry, before the inverse transform.
pub fn assemble_segments(
    selected: &[SelectedSegment],
    geometries: &[MultiPolygon<f64>],
    candidates: &[Candidate],
    crs: &CrsResolver,
) -> Result<Vec<SegmentOutput>, PlanError> {
    debug_assert_eq!(selected.len(), geometries.len());
    let mut segments = Vec::with_capacity(selected.len());
    for (pick, geometry) in selected.iter().zip(geometries) {
        let candidate = &candidates[pick.candidate_index];
        let area_m2 = geometry.unsigned_area();
        let launch = crs.unproject_point(geo::Coord {
            x: candidate.x,
            y: candidate.y,
        })?;
        segments.push(SegmentOutput {
            sequence: segments.len() as u32 + 1,
            polygon: crs.unproject_multipolygon(geometry)?,
            launch,
            ground_elev_m: candidate.ground_elev_m,
            area_m2,
            area_acres: area_m2 / SQ_M_PER_ACRE,
            access: candidate.access,
        });
    }
    Ok(segments)
}

#[derive(Debug, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub geometry: GeoJsonGeometry,
    pub properties: SegmentProperties,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum GeoJsonGeometry {
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<[f64; 2]>>> },
}

#[derive(Debug, Serialize)]
pub struct SegmentProperties {
    pub sequence: u32,
    pub area_acres: f64,
    pub area_m2: f64,
    pub access_type: &'static str,
    pub launch_point: LaunchPoint,
    pub ground_elev_m: f64,
}

#[derive(Debug, Serialize)]
pub struct LaunchPoint {
    pub lon: f64,
    pub lat: f64,
}

/// The downstream artifact: one feature per segment.
pub fn to_feature_collection(result: &ComputeResult) -> FeatureCollection {
    FeatureCollection {
        kind: "FeatureCollection",
        features: result
            .segments
            .iter()
            .map(|segment| Feature {
                kind: "Feature",
                geometry: geometry_json(&segment.polygon),
                properties: SegmentProperties {
                    sequence: segment.sequence,
                    area_acres: segment.area_acres,
                    area_m2: segment.area_m2,
                    access_type: segment.access.as_str(),
                    launch_point: LaunchPoint {
                        lon: segment.launch.lon,
                        lat: segment.launch.lat,
                    },
                    ground_elev_m: segment.ground_elev_m,
                },
            })
            .collect(),
    }
}

fn geometry_json(geometry: &MultiPolygon<f64>) -> GeoJsonGeometry {
    if geometry.0.len() == 1 {
        GeoJsonGeometry::Polygon {
            coordinates: polygon_rings(&geometry.0[0]),
        }
    } else {
        GeoJsonGeometry::MultiPolygon {
            coordinates: geometry.0.iter().map(polygon_rings).collect(),
        }
    }
}

fn polygon_rings(polygon: &Polygon<f64>) -> Vec<Vec<[f64; 2]>> {
    let mut rings = vec![ring_coords(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(ring_coords));
    rings
}

fn ring_coords(ring: &geo::LineString<f64>) -> Vec<[f64; 2]> {
    ring.coords().map(|c| [c.x, c.y]).collect()
}

/// Builds the final result record.
pub fn finish_result(
    segments: Vec<SegmentOutput>,
    epsg: u32,
    coverage_fraction: f64,
    diagnostics: Diagnostics,
) -> ComputeResult {
    tracing::info!(
        segments = segments.len(),
        coverage = format!("{:.1}%", coverage_fraction * 100.0),
        epsg,
        "segmentation finished"
    );
    ComputeResult {
        segments,
        coverage_fraction,
        epsg,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessMode, Coordinate};
    use geo::polygon;

    fn sample_result() -> ComputeResult {
        let poly = polygon![
            (x: 15.0, y: 45.0),
            (x: 15.01, y: 45.0),
            (x: 15.01, y: 45.01),
            (x: 15.0, y: 45.01),
            (x: 15.0, y: 45.0),
        ];
        ComputeResult {
            segments: vec![SegmentOutput {
                sequence: 1,
                polygon: MultiPolygon::new(vec![poly]),
                launch: Coordinate {
                    lat: 45.005,
                    lon: 15.005,
                },
                ground_elev_m: 312.0,
                area_m2: 880_000.0,
                area_acres: 217.5,
                access: AccessMode::Road,
            }],
            coverage_fraction: 0.97,
            epsg: 32633,
            diagnostics: Diagnostics::default(),
        }
    }

    #[test]
    fn single_part_segments_serialize_as_polygon() {
        let fc = to_feature_collection(&sample_result());
        let value = serde_json::to_value(&fc).unwrap();
        assert_eq!(value["type"], "FeatureCollection");
        let feature = &value["features"][0];
        assert_eq!(feature["type"], "Feature");
        assert_eq!(feature["geometry"]["type"], "Polygon");
        assert_eq!(feature["properties"]["sequence"], 1);
        assert_eq!(feature["properties"]["access_type"], "road");
        assert_eq!(feature["properties"]["launch_point"]["lon"], 15.005);
        assert_eq!(feature["properties"]["ground_elev_m"], 312.0);
        // Exterior ring is closed.
        let ring = feature["geometry"]["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.first(), ring.last());
    }

    #[test]
    fn multi_part_segments_serialize_as_multipolygon() {
        let mut result = sample_result();
        let part = result.segments[0].polygon.0[0].clone();
        result.segments[0].polygon = MultiPolygon::new(vec![part.clone(), part]);
        let fc = to_feature_collection(&result);
        let value = serde_json::to_value(&fc).unwrap();
        assert_eq!(value["features"][0]["geometry"]["type"], "MultiPolygon");
    }
}
