//! Persistence contract. The core only needs project configuration lookup,
//! a status lifecycle, and segment append; the backing schema belongs to the
//! storage collaborator.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, PlanError};
use crate::models::{ProjectConfig, SegmentOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Created,
    Processing,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

pub trait ProjectStore: Send + Sync {
    fn create_project(&self, id: &str, config: &ProjectConfig) -> Result<(), PlanError>;
    fn project_config(&self, id: &str) -> Result<ProjectConfig, PlanError>;
    fn project_status(&self, id: &str) -> Result<ProjectStatus, PlanError>;
    /// Atomically moves the status from one of `from` to `to`; a mismatch is
    /// a conflict (someone else owns the lifecycle right now).
    fn try_transition(
        &self,
        id: &str,
        from: &[ProjectStatus],
        to: ProjectStatus,
    ) -> Result<(), PlanError>;
    fn record_failure(&self, id: &str, kind: ErrorKind, message: &str) -> Result<(), PlanError>;
    fn error_message(&self, id: &str) -> Result<Option<String>, PlanError>;
    fn append_segments(&self, id: &str, segments: &[SegmentOutput]) -> Result<(), PlanError>;
    fn segments(&self, id: &str) -> Result<Vec<SegmentOutput>, PlanError>;
    /// Removes the project and everything attached to it.
    fn delete_project(&self, id: &str) -> Result<(), PlanError>;
}

#[derive(Debug)]
struct ProjectRecord {
    config: ProjectConfig,
    status: ProjectStatus,
    error_message: Option<String>,
    segments: Vec<SegmentOutput>,
}

/// In-memory store; enough for tests and drivers without a database.
#[derive(Default)]
pub struct MemoryStore {
    projects: Mutex<HashMap<String, ProjectRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut ProjectRecord) -> Result<T, PlanError>,
    ) -> Result<T, PlanError> {
        let mut projects = self
            .projects
            .lock()
            .map_err(|_| PlanError::Internal("project store poisoned".into()))?;
        let record = projects
            .get_mut(id)
            .ok_or_else(|| PlanError::Data(format!("unknown project {id}")))?;
        f(record)
    }
}

impl ProjectStore for MemoryStore {
    fn create_project(&self, id: &str, config: &ProjectConfig) -> Result<(), PlanError> {
        let mut projects = self
            .projects
            .lock()
            .map_err(|_| PlanError::Internal("project store poisoned".into()))?;
        if projects.contains_key(id) {
            return Err(PlanError::Conflict(id.to_string()));
        }
        projects.insert(
            id.to_string(),
            ProjectRecord {
                config: config.clone(),
                status: ProjectStatus::Created,
                error_message: None,
                segments: Vec::new(),
            },
        );
        Ok(())
    }

    fn project_config(&self, id: &str) -> Result<ProjectConfig, PlanError> {
        self.with_record(id, |record| Ok(record.config.clone()))
    }

    fn project_status(&self, id: &str) -> Result<ProjectStatus, PlanError> {
        self.with_record(id, |record| Ok(record.status))
    }

    fn try_transition(
        &self,
        id: &str,
        from: &[ProjectStatus],
        to: ProjectStatus,
    ) -> Result<(), PlanError> {
        self.with_record(id, |record| {
            if !from.contains(&record.status) {
                return Err(PlanError::Conflict(id.to_string()));
            }
            record.status = to;
            Ok(())
        })
    }

    fn record_failure(&self, id: &str, kind: ErrorKind, message: &str) -> Result<(), PlanError> {
        self.with_record(id, |record| {
            record.status = ProjectStatus::Failed;
            record.error_message = Some(format!("{}: {}", kind.as_str(), message));
            Ok(())
        })
    }

    fn error_message(&self, id: &str) -> Result<Option<String>, PlanError> {
        self.with_record(id, |record| Ok(record.error_message.clone()))
    }

    fn append_segments(&self, id: &str, segments: &[SegmentOutput]) -> Result<(), PlanError> {
        self.with_record(id, |record| {
            record.segments.extend_from_slice(segments);
            Ok(())
        })
    }

    fn segments(&self, id: &str) -> Result<Vec<SegmentOutput>, PlanError> {
        self.with_record(id, |record| Ok(record.segments.clone()))
    }

    fn delete_project(&self, id: &str) -> Result<(), PlanError> {
        let mut projects = self
            .projects
            .lock()
            .map_err(|_| PlanError::Internal("project store poisoned".into()))?;
        projects
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| PlanError::Data(format!("unknown project {id}")))
    }
}
