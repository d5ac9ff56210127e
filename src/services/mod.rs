// src/services/mod.rs

pub mod coverage;
pub mod ods_import;
pub mod orchestrator;
pub mod scrape_import;
pub mod versions;

use thiserror::Error;
use uuid::Uuid;

use crate::models::{BatchAlreadyTerminal, HospitalId, ScheduleVersion, VersionStatus};
use crate::ods::OdsError;
use crate::repository::RepositoryError;

pub use coverage::{CoverageCalculator, CoverageError};
pub use ods_import::{OdsImportService, OdsSource};
pub use orchestrator::{ScheduleImportOrchestrator, ScrapeFailurePolicy, WorkflowError, WorkflowRequest, WorkflowResult};
pub use scrape_import::ScrapeImportService;
pub use versions::{ScheduleVersionService, VersionError};

/// Failures that stop an import outright. Data-quality problems never show
/// up here; they are messages on the returned `ValidationResult`.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("import cancelled")]
    Cancelled,
    #[error("schedule version {id} is {status}; imports only write to STAGING versions")]
    VersionNotStaging { id: Uuid, status: VersionStatus },
    #[error("schedule version {id} belongs to hospital {actual}, not {expected}")]
    HospitalMismatch {
        id: Uuid,
        expected: HospitalId,
        actual: HospitalId,
    },
    #[error("schedule version {0} has been deleted")]
    VersionDeleted(Uuid),
    #[error(transparent)]
    Source(#[from] OdsError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Batch(#[from] BatchAlreadyTerminal),
    #[error("parser task failed: {0}")]
    Task(String),
}

/// Import services only ever write into a live STAGING version of the same hospital.
pub(crate) fn ensure_import_target(version: &ScheduleVersion, hospital_id: HospitalId) -> Result<(), ImportError> {
    if version.is_deleted() {
        return Err(ImportError::VersionDeleted(version.id));
    }
    if version.hospital_id != hospital_id {
        return Err(ImportError::HospitalMismatch {
            id: version.id,
            expected: hospital_id,
            actual: version.hospital_id,
        });
    }
    if version.status != VersionStatus::Staging {
        return Err(ImportError::VersionNotStaging {
            id: version.id,
            status: version.status,
        });
    }
    Ok(())
}
