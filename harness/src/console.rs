//! Human-readable console output for the default report format.

use crate::orchestrator::{ProgressEvent, ProgressEventKind};
use crate::validation::ServiceValidation;
use model::AggregateResult;
use std::fmt::Write;

const RULE: &str = "────────────────────────────────────────";

/// One line per progress event worth showing, `None` for the rest.
pub fn progress_line(event: &ProgressEvent) -> Option<String> {
    let service = event.service.as_deref().unwrap_or("");
    match event.kind {
        ProgressEventKind::ValidationStart => event.message.clone(),
        ProgressEventKind::TestStart => Some(match &event.framework {
            Some(framework) => format!("▶ Testing {service} ({framework})"),
            None => format!("▶ Testing {service}"),
        }),
        ProgressEventKind::TestComplete => {
            let mark = if event.success == Some(true) { "✓" } else { "✗" };
            Some(match &event.message {
                Some(message) => format!("{mark} {service}: {message}"),
                None => format!("{mark} {service}"),
            })
        }
        ProgressEventKind::ServiceSkipped => Some(match &event.message {
            Some(reason) => format!("⊘ Skipping {service}: {reason}"),
            None => format!("⊘ Skipping {service}"),
        }),
        ProgressEventKind::ServiceValidated | ProgressEventKind::ValidationComplete => None,
    }
}

/// Per-service result lines followed by run totals.
pub fn render_summary(results: &AggregateResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{RULE}\nTest Results\n{RULE}");

    for result in &results.services {
        let mark = if result.success { "✓" } else { "✗" };
        let _ = writeln!(
            out,
            "{mark} {:<20} {:>4} passed {:>4} failed {:>4} skipped  ({:.2}s)",
            result.service, result.passed, result.failed, result.skipped, result.duration
        );
        if let Some(error) = &result.error {
            let _ = writeln!(out, "    {error}");
        }
        for failure in &result.failures {
            match (&failure.file, failure.line) {
                (Some(file), Some(line)) => {
                    let _ = writeln!(out, "    - {} ({file}:{line}): {}", failure.name, failure.message);
                }
                _ => {
                    let _ = writeln!(out, "    - {}: {}", failure.name, failure.message);
                }
            }
        }
    }

    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(
        out,
        "Total: {} passed, {} failed, {} skipped ({} tests) in {:.2}s",
        results.passed, results.failed, results.skipped, results.total, results.duration
    );
    if let Some(coverage) = &results.coverage {
        let lines = &coverage.aggregate.lines;
        if lines.is_counted() {
            let _ = writeln!(
                out,
                "Coverage: {:.1}% ({}/{} lines)",
                coverage.percent, lines.covered, lines.total
            );
        } else {
            let _ = writeln!(out, "Coverage: {:.1}%", coverage.percent);
        }
    }
    if let Some(error) = &results.error {
        let _ = writeln!(out, "{error}");
    }
    let _ = writeln!(
        out,
        "{}",
        if results.success {
            "✓ All tests passed"
        } else {
            "✗ Tests failed"
        }
    );
    out
}

/// Validation table printed by `--dry-run`.
pub fn render_validation(validations: &[ServiceValidation]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Services ({}):", validations.len());
    for v in validations {
        let framework = if v.framework.is_empty() {
            "-"
        } else {
            v.framework.as_str()
        };
        if v.can_test {
            let _ = writeln!(
                out,
                "  ✓ {:<20} {:<8} {:<10} {} test files",
                v.name, v.language, framework, v.test_files
            );
        } else {
            let _ = writeln!(
                out,
                "  ⊘ {:<20} {:<8} {:<10} skipped: {}",
                v.name,
                v.language,
                framework,
                v.skip_reason.as_deref().unwrap_or("not testable")
            );
        }
    }
    let testable = validations.iter().filter(|v| v.can_test).count();
    let _ = writeln!(out, "{testable} of {} services would be tested", validations.len());
    out
}
