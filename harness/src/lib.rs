//! Multi-language test orchestration.
//!
//! Loads services from a `polytest.yaml` manifest, runs each service's tests
//! through its language runner, and merges results and coverage into unified
//! console, JSON, JUnit, GitHub Actions and coverage reports.

pub mod config_writer;
pub mod console;
pub mod coverage;
pub mod manifest;
pub mod orchestrator;
pub mod output_mode;
pub mod report;
pub mod telemetry;
pub mod validation;
pub mod watcher;
mod xml;

pub use config_writer::{detected_test_configs, generate_test_config_yaml, save_test_configs};
pub use coverage::{CoverageAggregator, CoverageError, CoverageFormat, CoverageResult};
pub use manifest::{Manifest, ManifestError, ManifestResult};
pub use orchestrator::{
    OrchestratorError, OrchestratorResult, ProgressCallback, ProgressEvent, ProgressEventKind,
    TestOrchestrator,
};
pub use output_mode::{select_output_mode, OutputMode, OutputOptions};
pub use report::{ReportError, ReportFormat, ReportGenerator, ReportResult};
pub use telemetry::{init_logging, TelemetryError};
pub use validation::{validate_service, validate_services, ServiceValidation};
pub use watcher::{ChangeHandler, Debouncer, FileWatcher, WatchError, WatchResult};

pub mod prelude {
    pub use crate::coverage::{CoverageAggregator, CoverageFormat};
    pub use crate::manifest::Manifest;
    pub use crate::orchestrator::{ProgressEvent, ProgressEventKind, TestOrchestrator};
    pub use crate::output_mode::{OutputMode, OutputOptions};
    pub use crate::report::{ReportFormat, ReportGenerator};
    pub use crate::validation::ServiceValidation;
    pub use crate::watcher::{ChangeHandler, FileWatcher};
    pub use model::prelude::*;
}
