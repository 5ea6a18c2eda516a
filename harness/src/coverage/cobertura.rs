//! Cobertura XML (schema version 1.0).

use super::{CoverageError, CoverageResult};
use chrono::{DateTime, Utc};
use model::{AggregateCoverage, FileCoverage};
use serde::Serialize;
use std::path::Path;

pub const FILE_NAME: &str = "coverage.xml";

#[derive(Debug, Serialize)]
#[serde(rename = "coverage")]
struct Coverage {
    #[serde(rename = "@line-rate")]
    line_rate: f64,
    #[serde(rename = "@branch-rate")]
    branch_rate: f64,
    #[serde(rename = "@version")]
    version: &'static str,
    #[serde(rename = "@timestamp")]
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sources: Option<Sources>,
    packages: Packages,
}

#[derive(Debug, Serialize)]
struct Sources {
    source: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Packages {
    package: Vec<Package>,
}

#[derive(Debug, Serialize)]
struct Package {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@line-rate")]
    line_rate: f64,
    #[serde(rename = "@branch-rate")]
    branch_rate: f64,
    #[serde(rename = "@complexity")]
    complexity: u32,
    classes: Classes,
}

#[derive(Debug, Serialize)]
struct Classes {
    class: Vec<Class>,
}

#[derive(Debug, Serialize)]
struct Class {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@filename")]
    filename: String,
    #[serde(rename = "@line-rate")]
    line_rate: f64,
    #[serde(rename = "@branch-rate")]
    branch_rate: f64,
    #[serde(rename = "@complexity")]
    complexity: u32,
    lines: Lines,
}

#[derive(Debug, Serialize)]
struct Lines {
    line: Vec<Line>,
}

#[derive(Debug, Serialize)]
struct Line {
    #[serde(rename = "@number")]
    number: u32,
    #[serde(rename = "@hits")]
    hits: u64,
}

impl From<&FileCoverage> for Class {
    fn from(file: &FileCoverage) -> Self {
        let rate = file.lines.percent / 100.0;
        let name = Path::new(&file.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.path.clone());
        Self {
            name,
            filename: file.path.clone(),
            line_rate: rate,
            branch_rate: rate,
            complexity: 0,
            lines: Lines {
                // BTreeMap iteration keeps lines ordered by number.
                line: file
                    .line_hits
                    .iter()
                    .map(|(number, hits)| Line {
                        number: *number,
                        hits: *hits,
                    })
                    .collect(),
            },
        }
    }
}

/// Render one `<package>` per service and one `<class>` per file.
///
/// Branch rates mirror line rates; branch data is not collected.
pub fn render(
    aggregate: &AggregateCoverage,
    source_root: Option<&Path>,
    generated: DateTime<Utc>,
) -> CoverageResult<String> {
    let rate = aggregate.percent / 100.0;
    let report = Coverage {
        line_rate: rate,
        branch_rate: rate,
        version: "1.0",
        timestamp: generated.timestamp(),
        sources: source_root.map(|root| Sources {
            source: vec![root.display().to_string()],
        }),
        packages: Packages {
            package: aggregate
                .services
                .iter()
                .map(|(name, data)| {
                    let rate = data.lines.percent / 100.0;
                    Package {
                        name: name.clone(),
                        line_rate: rate,
                        branch_rate: rate,
                        complexity: 0,
                        classes: Classes {
                            class: data.files.iter().map(Class::from).collect(),
                        },
                    }
                })
                .collect(),
        },
    };

    crate::xml::to_document(&report).map_err(|reason| CoverageError::Xml { reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::merge;
    use model::{CoverageData, CoverageMetric};
    use std::collections::BTreeMap;

    fn aggregate() -> AggregateCoverage {
        let mut file = FileCoverage::new("pkg/calc/calc.go");
        file.record_hits(12, 1);
        file.record_hits(3, 0);
        file.lines = CoverageMetric::new(1, 2);

        let mut services = BTreeMap::new();
        services.insert("calc".to_string(), CoverageData::from_files(vec![file]));
        merge(&services, 0.0)
    }

    #[test]
    fn test_document_shape() {
        let xml = render(&aggregate(), None, Utc::now()).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<coverage line-rate=\"0.5\" branch-rate=\"0.5\" version=\"1.0\""));
        assert!(xml.contains("<package name=\"calc\" line-rate=\"0.5\""));
        assert!(xml.contains("<class name=\"calc.go\" filename=\"pkg/calc/calc.go\""));
        assert!(!xml.contains("<sources>"));

        let first = xml.find("number=\"3\"").unwrap();
        let second = xml.find("number=\"12\"").unwrap();
        assert!(first < second, "lines are sorted by number");
    }

    #[test]
    fn test_sources_entry_when_root_is_set() {
        let xml = render(&aggregate(), Some(Path::new("/repo/src")), Utc::now()).unwrap();
        assert!(xml.contains("<source>/repo/src</source>"));
    }
}
