//! Drone search-segment planning for SAR missions.
//!
//! Given a search polygon, a DEM, optional vegetation and road/trail layers
//! and mission parameters, the pipeline picks a minimal ordered set of
//! launch points whose visibility discs cover the search area, and rebuilds
//! each launch point's covered cells into a segment polygon.

pub mod access;
pub mod assemble;
pub mod cellset;
pub mod coverage;
pub mod crs;
pub mod error;
pub mod grid;
pub mod models;
pub mod pipeline;
pub mod polygon;
pub mod progress;
pub mod raster;
pub mod store;
pub mod viewshed;

pub use crate::error::{ErrorKind, PlanError};
pub use crate::models::{
    AccessMode, ComputeResult, Coordinate, Diagnostics, ProjectConfig, RasterInputs,
    SegmentOutput, VectorInputs,
};
pub use crate::pipeline::{compute, run_managed};
pub use crate::progress::{CancelToken, LogProgress, NoopProgress, ProgressSink};
pub use crate::store::{MemoryStore, ProjectStatus, ProjectStore};
