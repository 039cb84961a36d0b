use geo::{Area, Centroid, Coord, LineString, MultiPolygon, Polygon};
use proj::Proj;

use crate::error::PlanError;
use crate::models::{Coordinate, SQ_M_PER_ACRE};

/// Metric projection chosen for one project, with paired transforms.
///
/// All distance and area math runs in this CRS; geographic coordinates only
/// appear at the boundaries of the pipeline.
pub struct CrsResolver {
    epsg: u32,
    forward: Proj,
    inverse: Proj,
}

impl CrsResolver {
    /// Picks the metric CRS for a WGS84 search polygon: the UTM zone of its
    /// centroid, or polar stereographic beyond the UTM latitude band.
    pub fn for_polygon(polygon: &Polygon<f64>) -> Result<Self, PlanError> {
        let centroid = polygon
            .centroid()
            .ok_or_else(|| PlanError::Config("search polygon has no centroid".into()))?;
        let (lon, lat) = centroid.x_y();
        if !(-89.9..=89.9).contains(&lat) {
            return Err(PlanError::Config(format!(
                "polygon centroid latitude {lat:.4} is outside [-89.9, 89.9]"
            )));
        }
        let epsg = metric_epsg(lon, lat);
        tracing::info!(epsg, lon, lat, "selected metric CRS from polygon centroid");
        let def = format!("EPSG:{epsg}");
        let forward = Proj::new_known_crs("EPSG:4326", &def, None)?;
        let inverse = Proj::new_known_crs(&def, "EPSG:4326", None)?;
        Ok(Self {
            epsg,
            forward,
            inverse,
        })
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    pub fn project_point(&self, point: Coordinate) -> Result<Coord<f64>, PlanError> {
        let (x, y) = self.forward.convert((point.lon, point.lat))?;
        Ok(Coord { x, y })
    }

    pub fn unproject_point(&self, point: Coord<f64>) -> Result<Coordinate, PlanError> {
        let (lon, lat) = self.inverse.convert((point.x, point.y))?;
        Ok(Coordinate { lat, lon })
    }

    pub fn project_polygon(&self, polygon: &Polygon<f64>) -> Result<Polygon<f64>, PlanError> {
        Ok(Polygon::new(
            self.project_ring(polygon.exterior())?,
            polygon
                .interiors()
                .iter()
                .map(|ring| self.project_ring(ring))
                .collect::<Result<_, _>>()?,
        ))
    }

    pub fn unproject_multipolygon(
        &self,
        geometry: &MultiPolygon<f64>,
    ) -> Result<MultiPolygon<f64>, PlanError> {
        let polygons = geometry
            .0
            .iter()
            .map(|polygon| {
                Ok(Polygon::new(
                    self.unproject_ring(polygon.exterior())?,
                    polygon
                        .interiors()
                        .iter()
                        .map(|ring| self.unproject_ring(ring))
                        .collect::<Result<_, _>>()?,
                ))
            })
            .collect::<Result<Vec<_>, PlanError>>()?;
        Ok(MultiPolygon(polygons))
    }

    fn project_ring(&self, ring: &LineString<f64>) -> Result<LineString<f64>, PlanError> {
        let coords = ring
            .coords()
            .map(|c| {
                let (x, y) = self.forward.convert((c.x, c.y))?;
                Ok(Coord { x, y })
            })
            .collect::<Result<Vec<_>, PlanError>>()?;
        Ok(LineString::new(coords))
    }

    fn unproject_ring(&self, ring: &LineString<f64>) -> Result<LineString<f64>, PlanError> {
        let coords = ring
            .coords()
            .map(|c| {
                let (x, y) = self.inverse.convert((c.x, c.y))?;
                Ok(Coord { x, y })
            })
            .collect::<Result<Vec<_>, PlanError>>()?;
        Ok(LineString::new(coords))
    }
}

/// Area of a metric polygon in acres.
pub fn area_acres(polygon_metric: &Polygon<f64>) -> f64 {
    polygon_metric.unsigned_area() / SQ_M_PER_ACRE
}

/// Transform between two CRS definitions (EPSG strings or WKT).
pub(crate) fn transform_between(from: &str, to: &str) -> Result<Proj, PlanError> {
    Ok(Proj::new_known_crs(from, to, None)?)
}

fn metric_epsg(lon: f64, lat: f64) -> u32 {
    if lat > 84.0 {
        return 32661; // UPS North
    }
    if lat < -80.0 {
        return 32761; // UPS South
    }
    let zone = (((lon + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60) as u32;
    if lat >= 0.0 {
        32600 + zone
    } else {
        32700 + zone
    }
}
