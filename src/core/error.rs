//! Service error taxonomy

use thiserror::Error;

use crate::llm::CompletionError;
use crate::storage::StoreError;

/// Every failure surfaced by the service facade
#[derive(Debug, Error)]
pub enum CodeShiftError {
    #[error("project {0} not found")]
    ProjectNotFound(i64),

    #[error("project {0} has not been parsed")]
    ProjectNotParsed(i64),

    #[error("project {0} is being parsed, try again later")]
    ProjectBusy(i64),

    #[error("conversion job {0} not found")]
    JobNotFound(String),

    #[error("conversion job {0} has not completed")]
    JobNotComplete(String),

    #[error("node {0} not found")]
    NodeNotFound(i64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("parse failed: {0}")]
    ParseError(String),

    #[error("storage error: {0}")]
    Storage(StoreError),

    #[error("completion service error: {0}")]
    CompletionService(#[from] CompletionError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CodeShiftError {
    /// Machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            CodeShiftError::ProjectNotFound(_) => "project_not_found",
            CodeShiftError::ProjectNotParsed(_) => "project_not_parsed",
            CodeShiftError::ProjectBusy(_) => "project_busy",
            CodeShiftError::JobNotFound(_) => "job_not_found",
            CodeShiftError::JobNotComplete(_) => "job_not_complete",
            CodeShiftError::NodeNotFound(_) => "node_not_found",
            CodeShiftError::InvalidRequest(_) => "invalid_request",
            CodeShiftError::ParseError(_) => "parse_error",
            CodeShiftError::Storage(_) => "storage_error",
            CodeShiftError::CompletionService(_) => "completion_service_error",
            CodeShiftError::Internal(_) => "internal_error",
        }
    }
}

impl From<StoreError> for CodeShiftError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity: "project", id } => match id.parse() {
                Ok(id) => CodeShiftError::ProjectNotFound(id),
                Err(_) => CodeShiftError::Storage(StoreError::NotFound { entity: "project", id }),
            },
            StoreError::NotFound { entity: "node", id } => match id.parse() {
                Ok(id) => CodeShiftError::NodeNotFound(id),
                Err(_) => CodeShiftError::Storage(StoreError::NotFound { entity: "node", id }),
            },
            StoreError::NotFound { entity: "job", id } => CodeShiftError::JobNotFound(id),
            other => CodeShiftError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CodeShiftError>;
