pub mod config;
pub mod service;
pub mod types;

pub use config::{
    CoverageConfig, ServiceTestConfig, TestConfig, TestTypeConfig, DEFAULT_OUTPUT_DIR,
    DEFAULT_TIMEOUT,
};
pub use service::{Language, ServiceInfo};
pub use types::{
    percent_of, AggregateCoverage, AggregateResult, CoverageData, CoverageMetric, FileCoverage,
    ParseTestTypeError, TestFailure, TestResult, TestType,
};

pub mod prelude {
    pub use crate::config::*;
    pub use crate::service::*;
    pub use crate::types::*;
}
