use super::CoverageResult;
use chrono::{DateTime, SecondsFormat, Utc};
use model::{AggregateCoverage, CoverageMetric, FileCoverage};
use serde::Serialize;
use std::collections::BTreeMap;

pub const FILE_NAME: &str = "coverage.json";

#[derive(Debug, Serialize)]
struct CoverageReport<'a> {
    generated: String,
    threshold: f64,
    threshold_met: bool,
    summary: Summary,
    services: BTreeMap<&'a str, ServiceReport<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    files: Vec<FileReport<'a>>,
}

#[derive(Debug, Serialize)]
struct Summary {
    percent: f64,
    lines: CoverageMetric,
    total_files: usize,
    total_services: usize,
}

#[derive(Debug, Serialize)]
struct ServiceReport<'a> {
    lines: CoverageMetric,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    files: Vec<FileReport<'a>>,
}

#[derive(Debug, Serialize)]
struct FileReport<'a> {
    path: &'a str,
    lines: CoverageMetric,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    uncovered_lines: Vec<u32>,
}

impl<'a> From<&'a FileCoverage> for FileReport<'a> {
    fn from(file: &'a FileCoverage) -> Self {
        Self {
            path: &file.path,
            lines: file.lines,
            uncovered_lines: file.uncovered_lines(),
        }
    }
}

/// Render the aggregate as pretty-printed JSON.
pub fn render(aggregate: &AggregateCoverage, generated: DateTime<Utc>) -> CoverageResult<String> {
    let services = aggregate
        .services
        .iter()
        .map(|(name, data)| {
            (
                name.as_str(),
                ServiceReport {
                    lines: data.lines,
                    files: data.files.iter().map(FileReport::from).collect(),
                },
            )
        })
        .collect();

    let report = CoverageReport {
        generated: generated.to_rfc3339_opts(SecondsFormat::Secs, true),
        threshold: aggregate.threshold,
        threshold_met: aggregate.met,
        summary: Summary {
            percent: aggregate.percent,
            lines: aggregate.aggregate.lines,
            total_files: aggregate.aggregate.files.len(),
            total_services: aggregate.services.len(),
        },
        services,
        files: aggregate.aggregate.files.iter().map(FileReport::from).collect(),
    };

    Ok(serde_json::to_string_pretty(&report)?)
}
