//! Static HTML coverage site: an overview page, one page per service and one
//! source-annotated page per file.

use super::{coverage_class, coverage_color, progress_class, sanitize_filename, CoverageResult};
use chrono::{DateTime, Utc};
use html_escape::encode_text;
use model::{AggregateCoverage, CoverageData, FileCoverage};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const INDEX_FILE_NAME: &str = "coverage.html";
pub const MISSING_SOURCE: &str = "// Source file not available";

const BASE_STYLE: &str = r#"
        body { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; margin: 0; padding: 0; background: #f9fafb; }
        .container { max-width: 1200px; margin: 0 auto; padding: 40px 20px; }
        h1 { color: #111827; margin-bottom: 8px; }
        .breadcrumb { color: #6b7280; margin-bottom: 24px; }
        .label { color: #6b7280; font-size: 14px; }
        table { width: 100%; border-collapse: collapse; background: white; border-radius: 12px; overflow: hidden; box-shadow: 0 1px 3px rgba(0,0,0,0.1); }
        th { background: #1f2937; color: white; padding: 16px; text-align: left; font-weight: 500; }
        td { padding: 16px; border-bottom: 1px solid #e5e7eb; }
        tr:hover { background: #f9fafb; }
        .high { color: #059669; }
        .medium { color: #d97706; }
        .low { color: #dc2626; }
        .progress-bar { width: 100px; height: 8px; background: #e5e7eb; border-radius: 4px; overflow: hidden; display: inline-block; vertical-align: middle; margin-left: 8px; }
        .progress-fill { height: 100%; }
        .progress-high { background: #059669; }
        .progress-medium { background: #d97706; }
        .progress-low { background: #dc2626; }
        a { color: #2563eb; text-decoration: none; }
        a:hover { text-decoration: underline; }
"#;

const INDEX_STYLE: &str = r#"
        .timestamp { color: #6b7280; font-size: 14px; margin-bottom: 24px; }
        .summary-grid { display: grid; grid-template-columns: repeat(auto-fit, minmax(200px, 1fr)); gap: 20px; margin: 24px 0; }
        .summary-card { background: white; padding: 24px; border-radius: 12px; box-shadow: 0 1px 3px rgba(0,0,0,0.1); }
        .sub-label { color: #9ca3af; font-size: 12px; margin-top: 4px; }
        .threshold { padding: 16px; border-radius: 8px; margin: 24px 0; }
        .threshold-met { background: #d1fae5; color: #065f46; }
        .threshold-unmet { background: #fee2e2; color: #991b1b; }
"#;

const FILE_STYLE: &str = r#"
        .source { background: white; border-radius: 12px; overflow: hidden; box-shadow: 0 1px 3px rgba(0,0,0,0.1); }
        .source-header { background: #1f2937; color: white; padding: 12px 16px; font-family: monospace; font-size: 14px; }
        .source td { padding: 0; border: none; vertical-align: top; }
        .line-num { width: 60px; text-align: right; padding: 0 12px; background: #f3f4f6; color: #9ca3af; font-family: monospace; font-size: 12px; user-select: none; border-right: 1px solid #e5e7eb; }
        .line-hits { width: 40px; text-align: center; font-family: monospace; font-size: 11px; color: #6b7280; }
        .line-code { padding: 0 16px; font-family: monospace; font-size: 13px; white-space: pre; }
        .covered { background: #d1fae5; }
        .uncovered { background: #fee2e2; }
        .covered .line-num { background: #a7f3d0; }
        .uncovered .line-num { background: #fecaca; }
"#;

pub fn service_page_name(service: &str) -> String {
    format!("service-{}.html", sanitize_filename(service))
}

pub fn file_page_name(path: &str) -> String {
    format!("file-{}.html", sanitize_filename(path))
}

/// Write the overview, service and file pages into `output_dir`.
///
/// Source files are read relative to `source_root` when given. An unreadable
/// source file produces a placeholder listing instead of an error.
pub fn write_site(
    aggregate: &AggregateCoverage,
    output_dir: &Path,
    source_root: Option<&Path>,
    generated: DateTime<Utc>,
) -> CoverageResult<()> {
    fs::write(
        output_dir.join(INDEX_FILE_NAME),
        render_index(aggregate, generated),
    )?;

    for (service, data) in &aggregate.services {
        fs::write(
            output_dir.join(service_page_name(service)),
            render_service(service, data),
        )?;
    }

    for file in &aggregate.aggregate.files {
        let source_path = match source_root {
            Some(root) => root.join(&file.path),
            None => PathBuf::from(&file.path),
        };
        let source = match fs::read_to_string(&source_path) {
            Ok(source) => Some(source),
            Err(e) => {
                debug!(path = %source_path.display(), error = %e, "source file unavailable");
                None
            }
        };
        fs::write(
            output_dir.join(file_page_name(&file.path)),
            render_file(file, source.as_deref()),
        )?;
    }

    Ok(())
}

pub fn render_index(aggregate: &AggregateCoverage, generated: DateTime<Utc>) -> String {
    let lines = &aggregate.aggregate.lines;
    let (threshold_class, threshold_message) = if aggregate.met {
        ("threshold-met", "✓ Threshold met")
    } else {
        ("threshold-unmet", "✗ Below threshold")
    };

    let mut html = page_head("Code Coverage Report", aggregate.percent, INDEX_STYLE);
    html.push_str(&format!(
        r#"    <div class="container">
        <h1>Code Coverage Report</h1>
        <div class="timestamp">Generated: {generated}</div>
        <div class="summary-grid">
            <div class="summary-card">
                <div class="label">Line Coverage</div>
                <div class="metric">{percent:.1}%</div>
                <div class="sub-label">{covered} / {total} lines covered</div>
            </div>
            <div class="summary-card">
                <div class="label">Services</div>
                <div class="metric">{services}</div>
                <div class="sub-label">tested services</div>
            </div>
            <div class="summary-card">
                <div class="label">Files</div>
                <div class="metric">{files}</div>
                <div class="sub-label">source files</div>
            </div>
        </div>
        <div class="threshold {threshold_class}">
            <strong>Coverage Threshold: {threshold:.1}%</strong> - {threshold_message}
        </div>
        <h2>Coverage by Service</h2>
"#,
        generated = generated.format("%Y-%m-%d %H:%M:%S"),
        percent = aggregate.percent,
        covered = lines.covered,
        total = lines.total,
        services = aggregate.services.len(),
        files = aggregate.aggregate.files.len(),
        threshold = aggregate.threshold,
    ));

    html.push_str(&table_header("Service"));
    for (service, data) in &aggregate.services {
        html.push_str(&table_row(
            &service_page_name(service),
            service,
            service,
            data.lines.covered,
            data.lines.total,
            data.lines.percent,
        ));
    }
    html.push_str("        </table>\n        <h2>All Files</h2>\n");

    html.push_str(&table_header("File"));
    for file in &aggregate.aggregate.files {
        html.push_str(&file_row(file));
    }
    html.push_str("        </table>\n    </div>\n</body>\n</html>\n");
    html
}

pub fn render_service(service: &str, data: &CoverageData) -> String {
    let mut html = page_head(
        &format!("{service} - Coverage Report"),
        data.lines.percent,
        "",
    );
    html.push_str(&format!(
        r#"    <div class="container">
        <div class="breadcrumb"><a href="{INDEX_FILE_NAME}">← Back to Overview</a></div>
        <h1>{name}</h1>
        <div class="label">Line Coverage</div>
        <div class="metric">{percent:.1}%</div>
        <div class="label">{covered} / {total} lines covered</div>
        <h2>Files</h2>
"#,
        name = encode_text(service),
        percent = data.lines.percent,
        covered = data.lines.covered,
        total = data.lines.total,
    ));

    html.push_str(&table_header("File"));
    for file in &data.files {
        html.push_str(&file_row(file));
    }
    html.push_str("        </table>\n    </div>\n</body>\n</html>\n");
    html
}

/// Source listing with each line shaded by its hit count.
pub fn render_file(file: &FileCoverage, source: Option<&str>) -> String {
    let source = source.unwrap_or(MISSING_SOURCE);
    let mut html = page_head(
        &format!("{} - Coverage", base_name(&file.path)),
        file.lines.percent,
        FILE_STYLE,
    );
    html.push_str(&format!(
        r#"    <div class="container">
        <div class="breadcrumb"><a href="{INDEX_FILE_NAME}">← Back to Overview</a></div>
        <h1>{path}</h1>
        <div><span class="metric">{percent:.1}%</span> coverage - {covered} / {total} lines</div>
        <div class="source">
            <div class="source-header">{path}</div>
            <table>
"#,
        path = encode_text(&file.path),
        percent = file.lines.percent,
        covered = file.lines.covered,
        total = file.lines.total,
    ));

    for (index, code) in source.split('\n').enumerate() {
        let number = index as u32 + 1;
        let (class, hits) = match file.line_hits.get(&number) {
            Some(0) => ("uncovered", "0x".to_string()),
            Some(hits) => ("covered", format!("{hits}x")),
            None => ("not-executable", String::new()),
        };
        html.push_str(&format!(
            "                <tr class=\"{class}\"><td class=\"line-num\">{number}</td><td class=\"line-hits\">{hits}</td><td class=\"line-code\">{code}</td></tr>\n",
            code = encode_text(code),
        ));
    }

    html.push_str("            </table>\n        </div>\n    </div>\n</body>\n</html>\n");
    html
}

fn page_head(title: &str, percent: f64, extra_style: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
    <style>{BASE_STYLE}{extra_style}        .metric {{ font-size: 36px; font-weight: bold; color: {color}; }}
    </style>
</head>
<body>
"#,
        title = encode_text(title),
        color = coverage_color(percent),
    )
}

fn table_header(first_column: &str) -> String {
    format!(
        "        <table>\n            <tr><th>{first_column}</th><th>Lines Covered</th><th>Total Lines</th><th>Coverage</th></tr>\n"
    )
}

fn file_row(file: &FileCoverage) -> String {
    table_row(
        &file_page_name(&file.path),
        &file.path,
        base_name(&file.path),
        file.lines.covered,
        file.lines.total,
        file.lines.percent,
    )
}

fn table_row(href: &str, title: &str, label: &str, covered: u64, total: u64, percent: f64) -> String {
    format!(
        r#"            <tr>
                <td><a href="{href}" title="{title}">{label}</a></td>
                <td>{covered}</td>
                <td>{total}</td>
                <td class="{class}">{percent:.1}% <div class="progress-bar"><div class="progress-fill {progress}" style="width: {percent:.1}%"></div></div></td>
            </tr>
"#,
        href = html_escape::encode_double_quoted_attribute(href),
        title = html_escape::encode_double_quoted_attribute(title),
        label = encode_text(label),
        class = coverage_class(percent),
        progress = progress_class(percent),
    )
}

fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::merge;
    use model::CoverageMetric;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn file() -> FileCoverage {
        let mut file = FileCoverage::new("src/calc.py");
        file.record_hits(1, 3);
        file.record_hits(2, 0);
        file.lines = CoverageMetric::new(1, 2);
        file
    }

    #[test]
    fn test_file_page_rows() {
        let html = render_file(&file(), Some("def add(a, b):\n    return a < b\n# end"));
        assert!(html.contains(r#"<tr class="covered"><td class="line-num">1</td><td class="line-hits">3x</td>"#));
        assert!(html.contains(r#"<tr class="uncovered"><td class="line-num">2</td><td class="line-hits">0x</td>"#));
        assert!(html.contains(r#"<tr class="not-executable"><td class="line-num">3</td>"#));
        assert!(html.contains("return a &lt; b"));
        assert!(html.contains("color: #d97706"));
    }

    #[test]
    fn test_missing_source_uses_placeholder() {
        let html = render_file(&file(), None);
        assert!(html.contains(MISSING_SOURCE));
    }

    #[test]
    fn test_index_bands_and_links() {
        let mut services = BTreeMap::new();
        services.insert(
            "web app".to_string(),
            CoverageData {
                lines: CoverageMetric::new(85, 100),
                ..Default::default()
            },
        );
        services.insert("api".to_string(), CoverageData::from_files(vec![file()]));
        let aggregate = merge(&services, 90.0);

        let html = render_index(&aggregate, Utc::now());
        assert!(html.contains(r#"href="service-web-app.html""#));
        assert!(html.contains(r#"<td class="high">85.0%"#));
        assert!(html.contains("progress-fill progress-high"));
        assert!(html.contains(r#"href="file-src-calc.py.html""#));
        assert!(html.contains("threshold-unmet"));
        assert!(html.contains("✗ Below threshold"));
    }

    #[test]
    fn test_service_names_are_escaped() {
        let data = CoverageData::default();
        let html = render_service("<script>", &data);
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_write_site_reads_sources_from_root() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("src")).unwrap();
        fs::write(root.path().join("src/calc.py"), "def add(a, b):\n    return a + b\n").unwrap();
        let out = TempDir::new().unwrap();

        let mut services = BTreeMap::new();
        services.insert("api".to_string(), CoverageData::from_files(vec![file()]));
        write_site(&merge(&services, 0.0), out.path(), Some(root.path()), Utc::now()).unwrap();

        let page = fs::read_to_string(out.path().join("file-src-calc.py.html")).unwrap();
        assert!(page.contains("return a + b"));
        assert!(out.path().join("service-api.html").exists());
        assert!(out.path().join(INDEX_FILE_NAME).exists());
    }
}
