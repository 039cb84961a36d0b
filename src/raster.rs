//! Surface raster preparation: ingests the DEM (and optional vegetation
//! raster), resamples both onto a metric frame around the search polygon and
//! rasterizes the polygon into a target mask.

use std::path::Path;

use gdal::Dataset;
use geo::{BoundingRect, Contains, Coord, Point, Polygon};
use ndarray::Array2;
use proj::Proj;

use crate::crs::{transform_between, CrsResolver};
use crate::error::PlanError;

/// Fill value for occluder cells with no elevation data. Low enough to never
/// block a sight line, finite so bilinear interpolation stays well-behaved.
pub const NODATA_FILL: f32 = -10_000.0;

/// Regular metric grid covering the search polygon plus the VLOS margin.
/// Row 0 is the northern edge; cell (0, 0) sits in the northwest corner.
#[derive(Debug, Clone)]
pub struct MetricFrame {
    pub epsg: u32,
    pub west: f64,
    pub north: f64,
    pub cell_size: f64,
    pub rows: usize,
    pub cols: usize,
}

impl MetricFrame {
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cell_center(&self, row: usize, col: usize) -> Coord<f64> {
        Coord {
            x: self.west + (col as f64 + 0.5) * self.cell_size,
            y: self.north - (row as f64 + 0.5) * self.cell_size,
        }
    }

    pub fn cell_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let col = ((x - self.west) / self.cell_size).floor();
        let row = ((self.north - y) / self.cell_size).floor();
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        (row < self.rows && col < self.cols).then_some((row, col))
    }

    pub fn index(&self, row: usize, col: usize) -> u32 {
        (row * self.cols + col) as u32
    }

    pub fn row_col(&self, index: u32) -> (usize, usize) {
        (index as usize / self.cols, index as usize % self.cols)
    }
}

/// The prepared surface model. Ground and surface are separate because
/// targets sit on the ground while sight lines are occluded by the surface
/// (ground + vegetation).
pub struct SurfaceRaster {
    pub frame: MetricFrame,
    pub ground: Array2<f32>,
    pub surface: Array2<f32>,
    pub target: Array2<bool>,
    pub target_count: usize,
}

impl SurfaceRaster {
    pub fn is_target(&self, row: usize, col: usize) -> bool {
        self.target[[row, col]]
    }

    /// Bilinear surface elevation at a metric point, clamped to the frame.
    pub fn sample_surface(&self, x: f64, y: f64) -> f32 {
        let frame = &self.frame;
        let col = ((x - frame.west) / frame.cell_size - 0.5).clamp(0.0, (frame.cols - 1) as f64);
        let row = ((frame.north - y) / frame.cell_size - 0.5).clamp(0.0, (frame.rows - 1) as f64);

        let c0 = col.floor() as usize;
        let r0 = row.floor() as usize;
        let c1 = (c0 + 1).min(frame.cols - 1);
        let r1 = (r0 + 1).min(frame.rows - 1);

        let tx = (col - c0 as f64) as f32;
        let ty = (row - r0 as f64) as f32;

        let top = self.surface[[r0, c0]] * (1.0 - tx) + self.surface[[r0, c1]] * tx;
        let bottom = self.surface[[r1, c0]] * (1.0 - tx) + self.surface[[r1, c1]] * tx;
        top * (1.0 - ty) + bottom * ty
    }
}

/// One source raster read through GDAL, sampled in its own CRS.
struct GridSource {
    data: Array2<f32>,
    nodata: Option<f64>,
    origin_x: f64,
    origin_y: f64,
    pixel_w: f64,
    pixel_h: f64,
    width: usize,
    height: usize,
    crs_def: String,
}

impl GridSource {
    fn open(path: &Path) -> Result<Self, PlanError> {
        let dataset = Dataset::open(path)?;
        let gt = dataset.geo_transform()?;
        if gt[2] != 0.0 || gt[4] != 0.0 {
            return Err(PlanError::Data(format!(
                "raster {} is rotated; only north-up rasters are supported",
                path.display()
            )));
        }
        let (width, height) = dataset.raster_size();
        if width == 0 || height == 0 {
            return Err(PlanError::Data(format!("raster {} is empty", path.display())));
        }
        let crs_def = crs_definition(&dataset, path)?;
        let band = dataset.rasterband(1)?;
        let nodata = band.no_data_value();
        let buffer = band.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
        let data = Array2::from_shape_vec((height, width), buffer.data).map_err(|e| {
            PlanError::Data(format!("raster {} has inconsistent shape: {e}", path.display()))
        })?;
        tracing::debug!(
            path = %path.display(),
            width,
            height,
            crs = %crs_def,
            "loaded raster"
        );
        Ok(Self {
            data,
            nodata,
            origin_x: gt[0],
            origin_y: gt[3],
            pixel_w: gt[1],
            pixel_h: gt[5],
            width,
            height,
            crs_def,
        })
    }

    fn bounds(&self) -> (f64, f64, f64, f64) {
        let x1 = self.origin_x + self.width as f64 * self.pixel_w;
        let y1 = self.origin_y + self.height as f64 * self.pixel_h;
        (
            self.origin_x.min(x1),
            self.origin_y.min(y1),
            self.origin_x.max(x1),
            self.origin_y.max(y1),
        )
    }

    fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_w,
            self.origin_y + (row as f64 + 0.5) * self.pixel_h,
        )
    }

    fn value(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.height || col >= self.width {
            return None;
        }
        let v = self.data[[row, col]] as f64;
        match self.nodata {
            Some(nd) if (v - nd).abs() < 1e-6 => None,
            _ if !v.is_finite() => None,
            _ => Some(v),
        }
    }

    /// Bilinear sample skipping nodata neighbors; averages whatever valid
    /// neighbors remain, `None` when the point is off the raster or all four
    /// neighbors are nodata.
    fn sample_bilinear(&self, x: f64, y: f64) -> Option<f64> {
        let (col, row) = self.fractional_pixel(x, y)?;
        let c0 = col.floor() as usize;
        let r0 = row.floor() as usize;
        let c1 = (c0 + 1).min(self.width - 1);
        let r1 = (r0 + 1).min(self.height - 1);

        let q11 = self.value(r0, c0);
        let q21 = self.value(r0, c1);
        let q12 = self.value(r1, c0);
        let q22 = self.value(r1, c1);

        let tx = col - c0 as f64;
        let ty = row - r0 as f64;

        match (q11, q21, q12, q22) {
            (Some(a), Some(b), Some(c), Some(d)) => {
                let top = a * (1.0 - tx) + b * tx;
                let bottom = c * (1.0 - tx) + d * tx;
                Some(top * (1.0 - ty) + bottom * ty)
            }
            _ => {
                let mut sum = 0.0;
                let mut count = 0;
                for v in [q11, q21, q12, q22].into_iter().flatten() {
                    sum += v;
                    count += 1;
                }
                (count > 0).then(|| sum / count as f64)
            }
        }
    }

    fn sample_nearest(&self, x: f64, y: f64) -> Option<f64> {
        let (col, row) = self.fractional_pixel(x, y)?;
        self.value(row.round() as usize, col.round() as usize)
    }

    fn fractional_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let col = (x - self.origin_x) / self.pixel_w - 0.5;
        let row = (y - self.origin_y) / self.pixel_h - 0.5;
        if col < -0.5 || row < -0.5 || col > self.width as f64 - 0.5 || row > self.height as f64 - 0.5
        {
            return None;
        }
        Some((
            col.clamp(0.0, (self.width - 1) as f64),
            row.clamp(0.0, (self.height - 1) as f64),
        ))
    }
}

fn crs_definition(dataset: &Dataset, path: &Path) -> Result<String, PlanError> {
    let srs = dataset.spatial_ref().map_err(|_| {
        PlanError::Data(format!("raster {} carries no CRS metadata", path.display()))
    })?;
    if let (Ok(name), Ok(code)) = (srs.auth_name(), srs.auth_code()) {
        return Ok(format!("{name}:{code}"));
    }
    srs.to_wkt().map_err(|_| {
        PlanError::Data(format!("raster {} carries an unusable CRS", path.display()))
    })
}

/// Builds the surface raster for one project.
pub fn prepare_surface(
    dem_path: &Path,
    vegetation_path: Option<&Path>,
    polygon_metric: &Polygon<f64>,
    crs: &CrsResolver,
    max_vlos_m: f64,
    max_surface_cells: usize,
) -> Result<SurfaceRaster, PlanError> {
    let metric_def = format!("EPSG:{}", crs.epsg());
    let dem = GridSource::open(dem_path)?;

    let (to_dem, from_dem) = if dem.crs_def == metric_def {
        (None, None)
    } else {
        (
            Some(transform_between(&metric_def, &dem.crs_def)?),
            Some(transform_between(&dem.crs_def, &metric_def)?),
        )
    };

    let native_cell = native_cell_size(&dem, from_dem.as_ref())?;
    let frame = build_frame(polygon_metric, crs.epsg(), max_vlos_m, native_cell, max_surface_cells)?;
    check_overlap(&dem, &frame, to_dem.as_ref(), dem_path)?;

    let mut target = Array2::from_elem((frame.rows, frame.cols), false);
    let mut target_count = 0usize;
    for row in 0..frame.rows {
        for col in 0..frame.cols {
            let center = frame.cell_center(row, col);
            if polygon_metric.contains(&Point::from(center)) {
                target[[row, col]] = true;
                target_count += 1;
            }
        }
    }
    if target_count == 0 {
        return Err(PlanError::Data(
            "search polygon does not cover a single raster cell".into(),
        ));
    }

    let mut ground = Array2::from_elem((frame.rows, frame.cols), NODATA_FILL);
    for row in 0..frame.rows {
        for col in 0..frame.cols {
            let center = frame.cell_center(row, col);
            let (sx, sy) = match &to_dem {
                Some(t) => t.convert((center.x, center.y))?,
                None => (center.x, center.y),
            };
            match dem.sample_bilinear(sx, sy) {
                Some(elev) => ground[[row, col]] = elev as f32,
                None if target[[row, col]] => {
                    return Err(PlanError::Data(format!(
                        "DEM has no elevation for in-polygon cell ({row}, {col})"
                    )));
                }
                None => {}
            }
        }
    }

    let mut surface = ground.clone();
    if let Some(veg_path) = vegetation_path {
        let veg = GridSource::open(veg_path)?;
        let to_veg = if veg.crs_def == metric_def {
            None
        } else {
            Some(transform_between(&metric_def, &veg.crs_def)?)
        };
        apply_vegetation(&mut surface, &ground, &frame, &veg, to_veg.as_ref())?;
    }

    tracing::info!(
        rows = frame.rows,
        cols = frame.cols,
        cell_size_m = frame.cell_size,
        target_cells = target_count,
        "surface raster prepared"
    );

    Ok(SurfaceRaster {
        frame,
        ground,
        surface,
        target,
        target_count,
    })
}

fn apply_vegetation(
    surface: &mut Array2<f32>,
    ground: &Array2<f32>,
    frame: &MetricFrame,
    veg: &GridSource,
    to_veg: Option<&Proj>,
) -> Result<(), PlanError> {
    for row in 0..frame.rows {
        for col in 0..frame.cols {
            if ground[[row, col]] == NODATA_FILL {
                continue;
            }
            let center = frame.cell_center(row, col);
            let (sx, sy) = match to_veg {
                Some(t) => t.convert((center.x, center.y))?,
                None => (center.x, center.y),
            };
            // Missing vegetation means bare ground.
            let height = veg.sample_nearest(sx, sy).unwrap_or(0.0).max(0.0);
            surface[[row, col]] = ground[[row, col]] + height as f32;
        }
    }
    Ok(())
}

fn native_cell_size(dem: &GridSource, from_dem: Option<&Proj>) -> Result<f64, PlanError> {
    let size = match from_dem {
        None => (dem.pixel_w.abs() + dem.pixel_h.abs()) / 2.0,
        Some(t) => {
            let (cx, cy) = dem.pixel_center(dem.width / 2, dem.height / 2);
            let (x0, y0) = t.convert((cx, cy))?;
            let (x1, y1) = t.convert((cx + dem.pixel_w, cy))?;
            let (x2, y2) = t.convert((cx, cy + dem.pixel_h))?;
            let dx = (x1 - x0).hypot(y1 - y0);
            let dy = (x2 - x0).hypot(y2 - y0);
            (dx + dy) / 2.0
        }
    };
    if !(size.is_finite() && size > 0.0) {
        return Err(PlanError::Data(format!("DEM has unusable pixel size {size}")));
    }
    Ok(size)
}

fn build_frame(
    polygon_metric: &Polygon<f64>,
    epsg: u32,
    max_vlos_m: f64,
    native_cell: f64,
    max_surface_cells: usize,
) -> Result<MetricFrame, PlanError> {
    let rect = polygon_metric
        .bounding_rect()
        .ok_or_else(|| PlanError::Config("search polygon has no extent".into()))?;
    let west = rect.min().x - max_vlos_m;
    let east = rect.max().x + max_vlos_m;
    let south = rect.min().y - max_vlos_m;
    let north = rect.max().y + max_vlos_m;

    let mut cell_size = native_cell;
    let estimated = ((east - west) / cell_size) * ((north - south) / cell_size);
    if estimated > max_surface_cells as f64 {
        let scale = (estimated / max_surface_cells as f64).sqrt();
        cell_size *= scale;
        tracing::warn!(
            native_cell,
            cell_size,
            "surface raster exceeds cell cap, coarsening"
        );
    }

    let cols = ((east - west) / cell_size).ceil().max(1.0) as usize;
    let rows = ((north - south) / cell_size).ceil().max(1.0) as usize;
    rows.checked_mul(cols)
        .filter(|total| *total <= isize::MAX as usize / 8)
        .ok_or_else(|| {
            PlanError::Resource(format!("surface raster of {rows} x {cols} cells is unallocatable"))
        })?;

    Ok(MetricFrame {
        epsg,
        west,
        north,
        cell_size,
        rows,
        cols,
    })
}

fn check_overlap(
    dem: &GridSource,
    frame: &MetricFrame,
    to_dem: Option<&Proj>,
    path: &Path,
) -> Result<(), PlanError> {
    let east = frame.west + frame.cols as f64 * frame.cell_size;
    let south = frame.north - frame.rows as f64 * frame.cell_size;
    let corners = [
        (frame.west, frame.north),
        (east, frame.north),
        (east, south),
        (frame.west, south),
    ];
    let mut minx = f64::MAX;
    let mut miny = f64::MAX;
    let mut maxx = f64::MIN;
    let mut maxy = f64::MIN;
    for (x, y) in corners {
        let (sx, sy) = match to_dem {
            Some(t) => t.convert((x, y))?,
            None => (x, y),
        };
        minx = minx.min(sx);
        miny = miny.min(sy);
        maxx = maxx.max(sx);
        maxy = maxy.max(sy);
    }
    let (dminx, dminy, dmaxx, dmaxy) = dem.bounds();
    if maxx < dminx || minx > dmaxx || maxy < dminy || miny > dmaxy {
        return Err(PlanError::Data(format!(
            "DEM {} does not intersect the search area",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdal::raster::Buffer;
    use gdal::spatial_ref::SpatialRef;
    use gdal::DriverManager;
    use geo::polygon;

    /// Writes a synthetic single-band GeoTIFF in EPSG:32633.
    fn write_dem(
        path: &Path,
        origin: (f64, f64),
        rows: usize,
        cols: usize,
        cell: f64,
        elev: impl Fn(usize, usize) -> f32,
    ) {
        let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
        let mut ds = driver
            .create_with_band_type::<f32, _>(path, cols as isize, rows as isize, 1)
            .unwrap();
        ds.set_geo_transform(&[origin.0, cell, 0.0, origin.1, 0.0, -cell])
            .unwrap();
        ds.set_spatial_ref(&SpatialRef::from_epsg(32633).unwrap())
            .unwrap();
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(elev(r, c));
            }
        }
        let mut band = ds.rasterband(1).unwrap();
        band.set_no_data_value(Some(-9999.0)).unwrap();
        band.write((0, 0), (cols, rows), &Buffer::new((cols, rows), data))
            .unwrap();
    }

    fn metric_square(cx: f64, cy: f64, half: f64) -> Polygon<f64> {
        polygon![
            (x: cx - half, y: cy - half),
            (x: cx + half, y: cy - half),
            (x: cx + half, y: cy + half),
            (x: cx - half, y: cy + half),
            (x: cx - half, y: cy - half),
        ]
    }

    // Resolver for a WGS84 polygon whose centroid lies in zone 33N, matching
    // the CRS the fixtures are written in.
    fn resolver() -> CrsResolver {
        let wgs = polygon![
            (x: 14.99, y: 44.99),
            (x: 15.01, y: 44.99),
            (x: 15.01, y: 45.01),
            (x: 14.99, y: 45.01),
            (x: 14.99, y: 44.99),
        ];
        let crs = CrsResolver::for_polygon(&wgs).unwrap();
        assert_eq!(crs.epsg(), 32633);
        crs
    }

    #[test]
    fn frame_addressing_round_trips() {
        let frame = MetricFrame {
            epsg: 32633,
            west: 1000.0,
            north: 5000.0,
            cell_size: 10.0,
            rows: 40,
            cols: 30,
        };
        let center = frame.cell_center(3, 7);
        assert_eq!(frame.cell_of(center.x, center.y), Some((3, 7)));
        let (r, c) = frame.row_col(frame.index(12, 29));
        assert_eq!((r, c), (12, 29));
        assert_eq!(frame.cell_of(999.9, 4500.0), None);
    }

    #[test]
    fn prepares_flat_surface_with_margin() {
        let dir = tempfile::tempdir().unwrap();
        let dem_path = dir.path().join("dem.tif");
        // Polygon 600x600 m centered at (500_000, 4_983_000), DEM amply larger.
        write_dem(&dem_path, (498_000.0, 4_985_000.0), 200, 200, 20.0, |_, _| 100.0);
        let polygon = metric_square(500_000.0, 4_983_000.0, 300.0);
        let crs = resolver();

        let raster =
            prepare_surface(&dem_path, None, &polygon, &crs, 500.0, 25_000_000).unwrap();
        assert!((raster.frame.cell_size - 20.0).abs() < 1e-9);
        // 600 m polygon + 500 m margin per side at 20 m cells.
        assert_eq!(raster.frame.cols, 80);
        assert_eq!(raster.frame.rows, 80);
        assert!(raster.target_count > 0);
        let (row, col) = raster.frame.cell_of(500_000.0, 4_983_000.0).unwrap();
        assert!(raster.is_target(row, col));
        assert!((raster.sample_surface(500_000.0, 4_983_000.0) - 100.0).abs() < 1e-3);
    }

    #[test]
    fn vegetation_raises_surface_but_not_ground() {
        let dir = tempfile::tempdir().unwrap();
        let dem_path = dir.path().join("dem.tif");
        let veg_path = dir.path().join("veg.tif");
        write_dem(&dem_path, (498_000.0, 4_985_000.0), 200, 200, 20.0, |_, _| 100.0);
        write_dem(&veg_path, (498_000.0, 4_985_000.0), 200, 200, 20.0, |_, _| 15.0);
        let polygon = metric_square(500_000.0, 4_983_000.0, 300.0);
        let crs = resolver();

        let raster = prepare_surface(
            &dem_path,
            Some(&veg_path),
            &polygon,
            &crs,
            500.0,
            25_000_000,
        )
        .unwrap();
        let (row, col) = raster.frame.cell_of(500_000.0, 4_983_000.0).unwrap();
        assert!((raster.ground[[row, col]] - 100.0).abs() < 1e-3);
        assert!((raster.surface[[row, col]] - 115.0).abs() < 1e-3);
    }

    #[test]
    fn missing_elevation_inside_polygon_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let dem_path = dir.path().join("dem.tif");
        write_dem(&dem_path, (498_000.0, 4_985_000.0), 200, 200, 20.0, |r, c| {
            // Hole in the middle of the polygon.
            if (95..105).contains(&r) && (95..105).contains(&c) {
                -9999.0
            } else {
                100.0
            }
        });
        let polygon = metric_square(500_000.0, 4_983_000.0, 300.0);
        let crs = resolver();

        let err = prepare_surface(&dem_path, None, &polygon, &crs, 500.0, 25_000_000);
        assert!(matches!(err, Err(PlanError::Data(_))));
    }

    #[test]
    fn disjoint_dem_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dem_path = dir.path().join("dem.tif");
        // DEM far away from the polygon.
        write_dem(&dem_path, (300_000.0, 4_000_000.0), 50, 50, 20.0, |_, _| 100.0);
        let polygon = metric_square(500_000.0, 4_983_000.0, 300.0);
        let crs = resolver();

        let err = prepare_surface(&dem_path, None, &polygon, &crs, 500.0, 25_000_000);
        assert!(matches!(err, Err(PlanError::Data(_))));
    }

    #[test]
    fn cell_cap_coarsens_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let dem_path = dir.path().join("dem.tif");
        write_dem(&dem_path, (498_000.0, 4_985_000.0), 200, 200, 20.0, |_, _| 100.0);
        let polygon = metric_square(500_000.0, 4_983_000.0, 300.0);
        let crs = resolver();

        let raster = prepare_surface(&dem_path, None, &polygon, &crs, 500.0, 1_600).unwrap();
        assert!(raster.frame.len() <= 1_700);
        assert!(raster.frame.cell_size > 20.0);
    }
}
