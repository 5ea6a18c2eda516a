//! Cross-service coverage aggregation and report emission.
//!
//! Services contribute [`CoverageData`] to a [`CoverageAggregator`]; the
//! aggregator merges it into one [`AggregateCoverage`], checks the threshold,
//! and renders JSON, Cobertura XML and HTML reports into its output directory.
//!
//! ```rust
//! use harness::coverage::CoverageAggregator;
//! use model::{CoverageData, CoverageMetric};
//!
//! let mut aggregator = CoverageAggregator::new(80.0, "./coverage");
//! let mut data = CoverageData::default();
//! data.lines = CoverageMetric::new(90, 100);
//! aggregator.add_coverage("api", Some(data)).unwrap();
//!
//! let (met, percent) = aggregator.check_threshold();
//! assert!(met);
//! assert_eq!(percent, 90.0);
//! ```

pub mod cobertura;
pub mod html;
pub mod json;

use chrono::Utc;
use model::{AggregateCoverage, CoverageData, CoverageMetric, FileCoverage};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_COVERAGE_DIR: &str = "./coverage";
/// Lower bound of the "high" coverage band.
pub const HIGH_COVERAGE: f64 = 80.0;
/// Lower bound of the "medium" coverage band.
pub const MEDIUM_COVERAGE: f64 = 50.0;

#[derive(Error, Debug)]
pub enum CoverageError {
    /// A service was added without coverage data
    #[error("coverage data is missing for service {service}")]
    MissingData { service: String },

    /// Report format name not recognised
    #[error("unsupported coverage format: {format}")]
    UnsupportedFormat { format: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON report serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cobertura document serialization failed
    #[error("XML error: {reason}")]
    Xml { reason: String },
}

pub type CoverageResult<T> = Result<T, CoverageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageFormat {
    Json,
    Cobertura,
    Html,
}

impl CoverageFormat {
    pub const ALL: [CoverageFormat; 3] = [Self::Json, Self::Cobertura, Self::Html];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Cobertura => "cobertura",
            Self::Html => "html",
        }
    }
}

impl fmt::Display for CoverageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoverageFormat {
    type Err = CoverageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "cobertura" | "xml" => Ok(Self::Cobertura),
            "html" => Ok(Self::Html),
            other => Err(CoverageError::UnsupportedFormat {
                format: other.to_string(),
            }),
        }
    }
}

/// Collects per-service coverage for one run.
#[derive(Debug, Clone)]
pub struct CoverageAggregator {
    services: BTreeMap<String, CoverageData>,
    threshold: f64,
    output_dir: PathBuf,
    source_root: Option<PathBuf>,
}

impl CoverageAggregator {
    pub fn new(threshold: f64, output_dir: impl Into<PathBuf>) -> Self {
        let mut output_dir = output_dir.into();
        if output_dir.as_os_str().is_empty() {
            output_dir = PathBuf::from(DEFAULT_COVERAGE_DIR);
        }
        Self {
            services: BTreeMap::new(),
            threshold,
            output_dir,
            source_root: None,
        }
    }

    /// Root that relative file paths are resolved against when reading sources.
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = Some(root.into());
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Record a service's coverage, replacing anything recorded before.
    pub fn add_coverage(
        &mut self,
        service: &str,
        data: Option<CoverageData>,
    ) -> CoverageResult<()> {
        let data = data.ok_or_else(|| CoverageError::MissingData {
            service: service.to_string(),
        })?;
        debug!(
            service = %service,
            percent = data.lines.percent,
            files = data.files.len(),
            "recorded coverage"
        );
        self.services.insert(service.to_string(), data);
        Ok(())
    }

    pub fn aggregate(&self) -> AggregateCoverage {
        merge(&self.services, self.threshold)
    }

    /// Whether the aggregate meets the threshold, and the aggregate line percentage.
    pub fn check_threshold(&self) -> (bool, f64) {
        let aggregate = self.aggregate();
        (aggregate.met, aggregate.percent)
    }

    pub fn generate_report(&self, format: CoverageFormat) -> CoverageResult<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        let aggregate = self.aggregate();
        let generated = Utc::now();

        match format {
            CoverageFormat::Json => {
                let path = self.output_dir.join(json::FILE_NAME);
                fs::write(&path, json::render(&aggregate, generated)?)?;
                Ok(path)
            }
            CoverageFormat::Cobertura => {
                let path = self.output_dir.join(cobertura::FILE_NAME);
                let xml = cobertura::render(&aggregate, self.source_root.as_deref(), generated)?;
                fs::write(&path, xml)?;
                Ok(path)
            }
            CoverageFormat::Html => {
                html::write_site(
                    &aggregate,
                    &self.output_dir,
                    self.source_root.as_deref(),
                    generated,
                )?;
                Ok(self.output_dir.join(html::INDEX_FILE_NAME))
            }
        }
    }

    /// Write every format. A failing format is logged and does not stop the others.
    pub fn generate_all_reports(&self) -> Vec<CoverageError> {
        let mut errors = Vec::new();
        for format in CoverageFormat::ALL {
            match self.generate_report(format) {
                Ok(path) => debug!(%format, path = %path.display(), "wrote coverage report"),
                Err(e) => {
                    warn!(%format, error = %e, "failed to write coverage report");
                    errors.push(e);
                }
            }
        }
        errors
    }
}

/// Merge per-service coverage into one aggregate.
///
/// Line totals are summed across services that reported counts. Files sharing
/// a path are merged additively, including per-line hit counts. Services that
/// only reported a percentage stay out of the sums; when any are present the
/// gated percentage is the mean over all services instead.
pub fn merge(services: &BTreeMap<String, CoverageData>, threshold: f64) -> AggregateCoverage {
    if services.is_empty() {
        return AggregateCoverage {
            threshold,
            met: false,
            ..Default::default()
        };
    }

    let mut lines = CoverageMetric::default();
    let mut files: BTreeMap<&str, FileCoverage> = BTreeMap::new();
    let mut summary_only = 0usize;

    for data in services.values() {
        if data.lines.is_counted() {
            lines.covered += data.lines.covered;
            lines.total += data.lines.total;
        } else {
            summary_only += 1;
        }

        for file in &data.files {
            match files.get_mut(file.path.as_str()) {
                Some(existing) => {
                    existing.lines.covered += file.lines.covered;
                    existing.lines.total += file.lines.total;
                    for (line, hits) in &file.line_hits {
                        existing.record_hits(*line, *hits);
                    }
                }
                None => {
                    files.insert(
                        &file.path,
                        FileCoverage {
                            path: file.path.clone(),
                            lines: file.lines,
                            line_hits: file.line_hits.clone(),
                            ..Default::default()
                        },
                    );
                }
            }
        }
    }

    lines.recompute();
    let files = files
        .into_values()
        .map(|mut file| {
            if file.lines.total > 0 {
                file.lines.recompute();
            }
            file
        })
        .collect();

    let percent = if summary_only == 0 {
        lines.percent
    } else {
        services.values().map(|d| d.lines.percent).sum::<f64>() / services.len() as f64
    };

    AggregateCoverage {
        services: services.clone(),
        aggregate: CoverageData {
            lines,
            files,
            ..Default::default()
        },
        percent,
        threshold,
        met: percent >= threshold,
    }
}

/// Turn a path or service name into a flat file name component.
pub fn sanitize_filename(path: &str) -> String {
    path.replace(['/', '\\', ':', ' '], "-")
        .trim_start_matches('-')
        .to_string()
}

/// CSS class for a coverage percentage: `high`, `medium` or `low`.
pub fn coverage_class(percent: f64) -> &'static str {
    if percent >= HIGH_COVERAGE {
        "high"
    } else if percent >= MEDIUM_COVERAGE {
        "medium"
    } else {
        "low"
    }
}

pub fn coverage_color(percent: f64) -> &'static str {
    match coverage_class(percent) {
        "high" => "#059669",
        "medium" => "#d97706",
        _ => "#dc2626",
    }
}

pub fn progress_class(percent: f64) -> &'static str {
    match coverage_class(percent) {
        "high" => "progress-high",
        "medium" => "progress-medium",
        _ => "progress-low",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file(path: &str, hits: &[(u32, u64)]) -> FileCoverage {
        let mut file = FileCoverage::new(path);
        for (line, count) in hits {
            file.record_hits(*line, *count);
        }
        let covered = hits.iter().filter(|(_, c)| *c > 0).count() as u64;
        file.lines = CoverageMetric::new(covered, hits.len() as u64);
        file
    }

    fn data(covered: u64, total: u64, files: Vec<FileCoverage>) -> CoverageData {
        CoverageData {
            lines: CoverageMetric::new(covered, total),
            files,
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_data_is_rejected() {
        let mut aggregator = CoverageAggregator::new(0.0, "out");
        let err = aggregator.add_coverage("api", None).unwrap_err();
        assert!(matches!(err, CoverageError::MissingData { .. }));
        assert!(err.to_string().contains("api"));
        assert_eq!(aggregator.service_count(), 0);
    }

    #[test]
    fn test_empty_aggregate_does_not_meet_threshold() {
        let aggregator = CoverageAggregator::new(0.0, "");
        assert_eq!(aggregator.output_dir(), Path::new(DEFAULT_COVERAGE_DIR));
        let aggregate = aggregator.aggregate();
        assert!(!aggregate.met);
        assert_eq!(aggregate.aggregate.lines.percent, 0.0);
        assert_eq!(aggregator.check_threshold(), (false, 0.0));
    }

    #[test]
    fn test_line_totals_sum_across_services() {
        let mut aggregator = CoverageAggregator::new(70.0, "out");
        aggregator.add_coverage("api", Some(data(60, 100, vec![]))).unwrap();
        aggregator.add_coverage("web", Some(data(90, 100, vec![]))).unwrap();

        let aggregate = aggregator.aggregate();
        assert_eq!(aggregate.aggregate.lines.covered, 150);
        assert_eq!(aggregate.aggregate.lines.total, 200);
        assert_eq!(aggregate.aggregate.lines.percent, 75.0);
        assert!(aggregate.met);
        assert_eq!(aggregate.services.len(), 2);
    }

    #[test]
    fn test_sums_are_order_independent() {
        let inputs = [("a", data(3, 7, vec![])), ("b", data(11, 13, vec![])), ("c", data(0, 5, vec![]))];

        let mut forward = CoverageAggregator::new(50.0, "out");
        for (name, d) in inputs.iter().cloned() {
            forward.add_coverage(name, Some(d)).unwrap();
        }
        let mut backward = CoverageAggregator::new(50.0, "out");
        for (name, d) in inputs.iter().rev().cloned() {
            backward.add_coverage(name, Some(d)).unwrap();
        }

        assert_eq!(forward.aggregate().aggregate.lines, backward.aggregate().aggregate.lines);
    }

    #[test]
    fn test_percent_only_services_are_averaged() {
        let summary = CoverageData {
            lines: CoverageMetric::from_percent(85.0),
            ..Default::default()
        };

        let mut aggregator = CoverageAggregator::new(80.0, "out");
        aggregator.add_coverage("api", Some(summary.clone())).unwrap();
        let aggregate = aggregator.aggregate();
        assert_eq!(aggregate.aggregate.lines, CoverageMetric::default());
        assert_eq!(aggregate.percent, 85.0);
        assert_eq!(aggregator.check_threshold(), (true, 85.0));

        aggregator.add_coverage("web", Some(data(60, 100, vec![]))).unwrap();
        let aggregate = aggregator.aggregate();
        assert_eq!(aggregate.aggregate.lines, CoverageMetric::new(60, 100));
        assert_eq!(aggregate.percent, 72.5);
        assert!(!aggregate.met);
    }

    #[test]
    fn test_threshold_met_at_exact_equality() {
        let mut aggregator = CoverageAggregator::new(80.0, "out");
        aggregator.add_coverage("api", Some(data(80, 100, vec![]))).unwrap();
        assert_eq!(aggregator.check_threshold(), (true, 80.0));

        let mut below = CoverageAggregator::new(80.1, "out");
        below.add_coverage("api", Some(data(80, 100, vec![]))).unwrap();
        assert!(!below.check_threshold().0);
    }

    #[test]
    fn test_shared_file_hits_are_added() {
        let mut aggregator = CoverageAggregator::new(0.0, "out");
        aggregator
            .add_coverage("api", Some(data(1, 2, vec![file("lib/util.go", &[(1, 2), (2, 0)])])))
            .unwrap();
        aggregator
            .add_coverage("worker", Some(data(2, 3, vec![file("lib/util.go", &[(1, 3), (3, 1)]), file("main.go", &[(5, 1)])])))
            .unwrap();

        let aggregate = aggregator.aggregate();
        assert_eq!(aggregate.aggregate.files.len(), 2);
        let shared = aggregate.aggregate.file("lib/util.go").unwrap();
        assert_eq!(shared.line_hits.get(&1), Some(&5));
        assert_eq!(shared.line_hits.get(&2), Some(&0));
        assert_eq!(shared.line_hits.get(&3), Some(&1));
        assert_eq!(shared.lines.covered, 3);
        assert_eq!(shared.lines.total, 4);
        assert_eq!(shared.lines.percent, 75.0);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("C:/src/main.go"), "C--src-main.go");
        assert_eq!(sanitize_filename("/abs/path with space.py"), "abs-path-with-space.py");
        assert_eq!(sanitize_filename("src\\Api\\Program.cs"), "src-Api-Program.cs");
        let once = sanitize_filename("C:/src/main.go");
        assert_eq!(sanitize_filename(&once), once);
    }

    #[test]
    fn test_coverage_bands() {
        let cases = [
            (100.0, "high", "#059669", "progress-high"),
            (80.0, "high", "#059669", "progress-high"),
            (79.9, "medium", "#d97706", "progress-medium"),
            (50.0, "medium", "#d97706", "progress-medium"),
            (49.9, "low", "#dc2626", "progress-low"),
            (0.0, "low", "#dc2626", "progress-low"),
        ];
        for (percent, class, color, progress) in cases {
            assert_eq!(coverage_class(percent), class, "{percent}");
            assert_eq!(coverage_color(percent), color, "{percent}");
            assert_eq!(progress_class(percent), progress, "{percent}");
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("json".parse::<CoverageFormat>().unwrap(), CoverageFormat::Json);
        assert_eq!("XML".parse::<CoverageFormat>().unwrap(), CoverageFormat::Cobertura);
        assert_eq!("cobertura".parse::<CoverageFormat>().unwrap(), CoverageFormat::Cobertura);
        assert!(matches!(
            "lcov".parse::<CoverageFormat>(),
            Err(CoverageError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_generate_all_reports_writes_every_format() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("coverage");
        let mut aggregator = CoverageAggregator::new(50.0, &out);
        aggregator
            .add_coverage("api", Some(data(1, 2, vec![file("src/app.py", &[(1, 1), (2, 0)])])))
            .unwrap();

        let errors = aggregator.generate_all_reports();
        assert!(errors.is_empty(), "{errors:?}");
        for name in ["coverage.json", "coverage.xml", "coverage.html", "service-api.html", "file-src-app.py.html"] {
            assert!(out.join(name).exists(), "{name}");
        }
    }

    #[test]
    fn test_unwritable_output_reports_each_format() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let aggregator = CoverageAggregator::new(0.0, blocker.join("coverage"));
        let errors = aggregator.generate_all_reports();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|e| matches!(e, CoverageError::Io(_))));
    }
}
