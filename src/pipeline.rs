//! Single-pass orchestration of the segmentation stages. Cancellation is
//! observed at every stage boundary; the viewshed stage also reports
//! fractional progress while it runs.

use crate::access::{classify_candidates, AccessLayers};
use crate::assemble::{assemble_segments, finish_result};
use crate::cellset::{BitGrid, CellSet};
use crate::coverage::select_segments;
use crate::crs::CrsResolver;
use crate::error::PlanError;
use crate::grid::{generate_candidates, Candidate};
use crate::models::{
    ComputeResult, Diagnostics, ProjectConfig, RasterInputs, VectorInputs, SQ_M_PER_ACRE,
};
use crate::polygon::{build_segment_geometry, validate_segments};
use crate::progress::{CancelToken, ProgressSink, Reporter};
use crate::raster::{prepare_surface, SurfaceRaster};
use crate::store::{ProjectStatus, ProjectStore};
use crate::viewshed::{compute_viewsheds, ViewshedParams};

pub const STAGE_CRS: &str = "project_crs";
pub const STAGE_RASTER: &str = "surface_raster";
pub const STAGE_GRID: &str = "candidate_grid";
pub const STAGE_ACCESS: &str = "access_filter";
pub const STAGE_VIEWSHED: &str = "viewshed";
pub const STAGE_SELECT: &str = "coverage_selection";
pub const STAGE_POLYGONS: &str = "segment_polygons";
pub const STAGE_ASSEMBLE: &str = "assemble";

/// Runs the whole pipeline for one project.
pub fn compute(
    config: &ProjectConfig,
    rasters: &RasterInputs,
    vectors: &VectorInputs,
    sink: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<ComputeResult, PlanError> {
    let reporter = Reporter::new(sink);
    let polygon_wgs84 = config.validate()?;
    cancel.ensure_active()?;

    let crs = CrsResolver::for_polygon(&polygon_wgs84)?;
    let polygon_metric = crs.project_polygon(&polygon_wgs84)?;
    reporter.stage(STAGE_CRS, 5.0);
    cancel.ensure_active()?;

    let raster = prepare_surface(
        &rasters.dem,
        rasters.vegetation.as_deref(),
        &polygon_metric,
        &crs,
        config.max_vlos_m,
        config.max_surface_cells,
    )?;
    reporter.stage(STAGE_RASTER, 30.0);
    cancel.ensure_active()?;

    let (candidates, effective_spacing) = generate_candidates(
        &polygon_metric,
        &raster,
        config.grid_spacing_m,
        config.max_candidates,
    );
    let generated = candidates.len();
    reporter.stage(STAGE_GRID, 35.0);
    cancel.ensure_active()?;

    let layers = AccessLayers::load(vectors.roads.as_deref(), vectors.trails.as_deref(), &crs)?;
    let candidates = classify_candidates(
        candidates,
        &layers,
        &config.access_modes,
        config.access_buffer_m,
    );
    reporter.stage(STAGE_ACCESS, 40.0);
    cancel.ensure_active()?;

    let mut diagnostics = Diagnostics {
        candidates_generated: generated,
        candidates_retained: candidates.len(),
        cells_total: raster.target_count,
        cell_size_m: raster.frame.cell_size,
        effective_grid_spacing_m: effective_spacing,
        ..Default::default()
    };

    if candidates.is_empty() {
        tracing::warn!("no reachable candidates; finishing with zero segments");
        reporter.stage(STAGE_ASSEMBLE, 100.0);
        return Ok(finish_result(Vec::new(), crs.epsg(), 0.0, diagnostics));
    }

    let params = ViewshedParams {
        observer_agl_m: config.drone_agl_m,
        max_range_m: config.max_vlos_m,
    };
    let visible = run_viewsheds(
        &raster,
        &candidates,
        params,
        config.worker_threads,
        cancel,
        &reporter,
    )?;
    reporter.stage(STAGE_VIEWSHED, 80.0);
    cancel.ensure_active()?;

    // Candidates that see nothing are dropped here.
    let mut kept_candidates: Vec<Candidate> = Vec::new();
    let mut kept_visible: Vec<CellSet> = Vec::new();
    let mut all_visible = BitGrid::new(raster.frame.len());
    for (candidate, set) in candidates.into_iter().zip(visible) {
        if set.is_empty() {
            continue;
        }
        set.union_into(&mut all_visible);
        kept_candidates.push(candidate);
        kept_visible.push(set);
    }
    diagnostics.cells_visible = all_visible.count_ones();

    let cell_area = raster.frame.cell_size * raster.frame.cell_size;
    let preferred_cells = ((config.preferred_segment_acres * SQ_M_PER_ACRE) / cell_area)
        .round()
        .max(1.0) as usize;
    let selection = select_segments(
        &kept_candidates,
        &kept_visible,
        raster.frame.len(),
        preferred_cells,
    );
    reporter.stage(STAGE_SELECT, 90.0);
    cancel.ensure_active()?;

    let mut picks = Vec::new();
    let mut geometries = Vec::new();
    for pick in &selection.segments {
        if let Some(geometry) =
            build_segment_geometry(&pick.new_cells, &raster.frame, &polygon_metric)?
        {
            picks.push(pick.clone());
            geometries.push(geometry);
        } else {
            tracing::debug!(
                candidate = kept_candidates[pick.candidate_index].index,
                cells = pick.new_cells.len(),
                "dropping sliver pick below the noise floor"
            );
        }
    }
    validate_segments(&geometries, &polygon_metric, raster.frame.cell_size)?;
    reporter.stage(STAGE_POLYGONS, 96.0);
    cancel.ensure_active()?;

    // Only picks that produced geometry count toward the delivered result;
    // their cell sets are disjoint, so the union is a plain sum.
    let segment_sizes: Vec<usize> = picks.iter().map(|p| p.new_cells.len()).collect();
    let cells_covered: usize = segment_sizes.iter().sum();
    diagnostics.candidates_selected = picks.len();
    diagnostics.cells_covered = cells_covered;
    diagnostics.min_segment_cells = segment_sizes.iter().copied().min().unwrap_or(0);
    diagnostics.max_segment_cells = segment_sizes.iter().copied().max().unwrap_or(0);
    diagnostics.mean_segment_cells = if segment_sizes.is_empty() {
        0.0
    } else {
        cells_covered as f64 / segment_sizes.len() as f64
    };
    let coverage_fraction = cells_covered as f64 / raster.target_count as f64;

    let segments = assemble_segments(&picks, &geometries, &kept_candidates, &crs)?;
    reporter.stage(STAGE_ASSEMBLE, 100.0);
    Ok(finish_result(
        segments,
        crs.epsg(),
        coverage_fraction,
        diagnostics,
    ))
}

fn run_viewsheds(
    raster: &SurfaceRaster,
    candidates: &[Candidate],
    params: ViewshedParams,
    worker_threads: Option<usize>,
    cancel: &CancelToken,
    reporter: &Reporter<'_>,
) -> Result<Vec<CellSet>, PlanError> {
    let progress = |fraction: f32| {
        reporter.fraction(STAGE_VIEWSHED, 40.0 + fraction * 40.0);
    };
    match worker_threads {
        Some(threads) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| PlanError::Resource(format!("cannot build worker pool: {e}")))?;
            pool.install(|| compute_viewsheds(raster, candidates, params, cancel, &progress))
        }
        None => compute_viewsheds(raster, candidates, params, cancel, &progress),
    }
}

/// Runs `compute` under the project status lifecycle: `processing` while
/// active, then `completed`, `cancelled` or `failed`. Cancelled runs keep no
/// partial segments.
pub fn run_managed(
    store: &dyn ProjectStore,
    project_id: &str,
    rasters: &RasterInputs,
    vectors: &VectorInputs,
    sink: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<ComputeResult, PlanError> {
    let config = store.project_config(project_id)?;
    store.try_transition(
        project_id,
        &[
            ProjectStatus::Created,
            ProjectStatus::Completed,
            ProjectStatus::Failed,
            ProjectStatus::Cancelled,
        ],
        ProjectStatus::Processing,
    )?;

    match compute(&config, rasters, vectors, sink, cancel) {
        Ok(result) => {
            store.append_segments(project_id, &result.segments)?;
            store.try_transition(
                project_id,
                &[ProjectStatus::Processing, ProjectStatus::Cancelling],
                ProjectStatus::Completed,
            )?;
            Ok(result)
        }
        Err(PlanError::Cancelled) => {
            store.try_transition(
                project_id,
                &[ProjectStatus::Processing, ProjectStatus::Cancelling],
                ProjectStatus::Cancelled,
            )?;
            Err(PlanError::Cancelled)
        }
        Err(err) => {
            store.record_failure(project_id, err.kind(), &err.to_string())?;
            Err(err)
        }
    }
}
