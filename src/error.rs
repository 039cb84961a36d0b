use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("input data error: {0}")]
    Data(String),
    #[error("failed to read {path:?}: {source}")]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
    #[error("raster/vector access failed: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
    #[error("projection setup failed: {0}")]
    ProjSetup(#[from] proj::ProjCreateError),
    #[error("coordinate transform failed: {0}")]
    Transform(#[from] proj::ProjError),
    #[error("resource limit exceeded: {0}")]
    Resource(String),
    #[error("computation cancelled")]
    Cancelled,
    #[error("a run is already active for project {0}")]
    Conflict(String),
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

/// Machine-readable error class, stored alongside the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Data,
    Resource,
    Cancelled,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Data => "data",
            ErrorKind::Resource => "resource",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

impl PlanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlanError::Config(_) | PlanError::ProjSetup(_) => ErrorKind::Config,
            PlanError::Data(_)
            | PlanError::Io { .. }
            | PlanError::Gdal(_)
            | PlanError::Transform(_) => ErrorKind::Data,
            PlanError::Resource(_) => ErrorKind::Resource,
            PlanError::Cancelled => ErrorKind::Cancelled,
            PlanError::Conflict(_) => ErrorKind::Conflict,
            PlanError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Process exit code for the `segment` binary.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Config => 2,
            ErrorKind::Data => 3,
            ErrorKind::Cancelled => 4,
            ErrorKind::Resource | ErrorKind::Conflict | ErrorKind::Internal => 5,
        }
    }
}
