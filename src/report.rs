//! Result aggregation and rendering.
//!
//! The engine drives a [`Reporter`] with one `start`, one
//! `add_scenario_result` per scenario and one `finish`.

use crate::model::{ScenarioResult, Status};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Receives finalized scenario results.
pub trait Reporter: Send {
    fn start(&mut self);
    fn add_scenario_result(&mut self, result: &ScenarioResult);
    fn finish(&mut self) -> Result<()>;
}

/// Aggregate of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: Summary,
    pub scenarios: Vec<ScenarioResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Percentage of scenarios that passed.
    pub pass_rate: f64,
    pub total_steps: usize,
    pub failed_steps: usize,
    pub duration_ms: u64,
}

impl Report {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            summary: Summary::default(),
            scenarios: Vec::new(),
        }
    }

    fn push(&mut self, result: &ScenarioResult) {
        let summary = &mut self.summary;
        summary.total += 1;
        match result.status {
            Status::Passed => summary.passed += 1,
            Status::Failed => summary.failed += 1,
            Status::Skipped => summary.skipped += 1,
        }
        summary.total_steps += result.steps.len();
        summary.failed_steps += result.steps.iter().filter(|s| s.is_failed()).count();
        summary.pass_rate = summary.passed as f64 * 100.0 / summary.total as f64;
        self.scenarios.push(result.clone());
    }

    fn close(&mut self) {
        self.finished_at = Utc::now();
        self.summary.duration_ms =
            u64::try_from((self.finished_at - self.started_at).num_milliseconds()).unwrap_or(0);
    }

    pub fn is_success(&self) -> bool {
        self.summary.failed == 0
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

/// File format for saved reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Yaml,
    Html,
    Markdown,
}

/// Logs results as they arrive and optionally saves the aggregate.
pub struct ConsoleReporter {
    verbose: bool,
    output: Option<(PathBuf, ReportFormat)>,
    report: Report,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            output: None,
            report: Report::new(),
        }
    }

    /// Also write the aggregate report to `path` on finish.
    pub fn with_output(mut self, path: impl Into<PathBuf>, format: ReportFormat) -> Self {
        self.output = Some((path.into(), format));
        self
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    fn print_result(&self, result: &ScenarioResult) {
        let status = if result.is_success() {
            "\x1b[32mPASS\x1b[0m"
        } else {
            "\x1b[31mFAIL\x1b[0m"
        };
        info!("{} scenario: {} ({} ms)", status, result.name, result.duration_ms);
        if let Some(error) = &result.error {
            error!("   \x1b[31mError: {}\x1b[0m", error);
        }

        for (i, step) in result.steps.iter().enumerate() {
            let step_status = match step.status {
                Status::Passed => "\x1b[32m✓\x1b[0m",
                Status::Failed => "\x1b[31m✗\x1b[0m",
                Status::Skipped => "\x1b[33m-\x1b[0m",
            };
            let name = match &step.group {
                Some(group) => format!("[{group}] {}", step.name),
                None => step.name.clone(),
            };
            info!("  {}. {} {} ({} ms)", i + 1, step_status, name, step.duration_ms);

            if let Some(error) = &step.error {
                error!("     \x1b[31mError: {}\x1b[0m", error);
            }
            for assertion in step.assertions.iter().filter(|a| !a.passed) {
                error!("     \x1b[31m{}\x1b[0m", assertion.message);
            }

            if self.verbose {
                if let Some(request) = &step.request {
                    debug!("     Request: {} {}", request.method, request.url);
                    if let Some(body) = &request.body {
                        debug!("     Request body: {}", truncate(body));
                    }
                }
                if let Some(response) = &step.response {
                    debug!("     Response: Status {}", response.status);
                    if let Some(body) = &response.body {
                        debug!("     Response body: {}", truncate(body));
                    }
                }
            }
        }
    }
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(500) {
        Some((idx, _)) => format!("{}...(truncated)", &text[..idx]),
        None => text.to_string(),
    }
}

/// Serialize `report` to `path` in `format`.
pub fn save_report(report: &Report, path: &Path, format: ReportFormat) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .context(format!("Failed to create report directory: {}", dir.display()))?;
    }
    let content = match format {
        ReportFormat::Json => serde_json::to_string_pretty(report)?,
        ReportFormat::Yaml => serde_yaml::to_string(report)?,
        ReportFormat::Html => render_html(report),
        ReportFormat::Markdown => render_markdown(report),
    };
    fs::write(path, content).context(format!("Failed to write report: {}", path.display()))?;
    Ok(())
}

fn status_label(status: Status) -> &'static str {
    match status {
        Status::Passed => "passed",
        Status::Failed => "failed",
        Status::Skipped => "skipped",
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const HTML_STYLE: &str = "body { font-family: Arial, sans-serif; margin: 20px; }
.summary { background: #f5f5f5; padding: 20px; border-radius: 5px; margin-bottom: 20px; }
.scenario { border: 1px solid #ddd; margin: 10px 0; border-radius: 5px; }
.scenario-header { padding: 15px; background: #f9f9f9; font-weight: bold; }
.scenario.passed .scenario-header { background: #d4edda; color: #155724; }
.scenario.failed .scenario-header { background: #f8d7da; color: #721c24; }
.steps { padding: 15px; }
.step { margin: 10px 0; padding: 10px; border-left: 3px solid #ddd; }
.step.passed { border-left-color: #28a745; }
.step.failed { border-left-color: #dc3545; }
.error, .assertion.failed { color: #dc3545; }
.assertion.passed { color: #28a745; }";

/// Standalone HTML page with the summary and every scenario's steps.
pub fn render_html(report: &Report) -> String {
    let summary = &report.summary;
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Ember Test Report</title>\n");
    html.push_str(&format!("<style>\n{HTML_STYLE}\n</style>\n</head>\n<body>\n<h1>Ember Test Report</h1>\n"));
    html.push_str(&format!(
        "<div class=\"summary\">\n<h2>Summary</h2>\n<p>Total Scenarios: {}</p>\n<p>Passed: {}</p>\n<p>Failed: {}</p>\n<p>Skipped: {}</p>\n<p>Pass Rate: {:.2}%</p>\n<p>Duration: {} ms</p>\n</div>\n",
        summary.total, summary.passed, summary.failed, summary.skipped, summary.pass_rate, summary.duration_ms
    ));

    html.push_str("<div class=\"scenarios\">\n<h2>Scenarios</h2>\n");
    for scenario in &report.scenarios {
        let status = status_label(scenario.status);
        html.push_str(&format!(
            "<div class=\"scenario {status}\">\n<div class=\"scenario-header\">{} ({} ms)</div>\n",
            escape_html(&scenario.name),
            scenario.duration_ms
        ));
        if let Some(error) = &scenario.error {
            html.push_str(&format!("<p class=\"error\">{}</p>\n", escape_html(error)));
        }
        html.push_str("<div class=\"steps\">\n");
        for step in &scenario.steps {
            let name = match &step.group {
                Some(group) => format!("[{group}] {}", step.name),
                None => step.name.clone(),
            };
            html.push_str(&format!(
                "<div class=\"step {}\">\n<strong>{}</strong> ({} ms)\n",
                status_label(step.status),
                escape_html(&name),
                step.duration_ms
            ));
            if let Some(error) = &step.error {
                html.push_str(&format!("<div class=\"error\">{}</div>\n", escape_html(error)));
            }
            if !step.assertions.is_empty() {
                html.push_str("<div class=\"assertions\">\n");
                for assertion in &step.assertions {
                    let class = if assertion.passed { "passed" } else { "failed" };
                    html.push_str(&format!(
                        "<div class=\"assertion {class}\">{}</div>\n",
                        escape_html(&assertion.message)
                    ));
                }
                html.push_str("</div>\n");
            }
            html.push_str("</div>\n");
        }
        html.push_str("</div>\n</div>\n");
    }
    html.push_str("</div>\n</body>\n</html>\n");
    html
}

fn status_icon(status: Status) -> &'static str {
    match status {
        Status::Passed => "✅",
        Status::Failed => "❌",
        Status::Skipped => "⏭️",
    }
}

/// Markdown document with a summary table and one section per scenario.
pub fn render_markdown(report: &Report) -> String {
    let summary = &report.summary;
    let mut md = String::from("# Ember Test Report\n\n## Summary\n\n");
    md.push_str("| Metric | Value |\n|---|---|\n");
    md.push_str(&format!("| Total Scenarios | {} |\n", summary.total));
    md.push_str(&format!("| Passed | {} |\n", summary.passed));
    md.push_str(&format!("| Failed | {} |\n", summary.failed));
    md.push_str(&format!("| Skipped | {} |\n", summary.skipped));
    md.push_str(&format!("| Pass Rate | {:.2}% |\n", summary.pass_rate));
    md.push_str(&format!("| Duration | {} ms |\n\n", summary.duration_ms));

    for scenario in &report.scenarios {
        md.push_str(&format!("## {} {}\n\n", status_icon(scenario.status), scenario.name));
        md.push_str(&format!("**Duration:** {} ms\n\n", scenario.duration_ms));
        if let Some(error) = &scenario.error {
            md.push_str(&format!("**Error:** {error}\n\n"));
        }
        if scenario.steps.is_empty() {
            continue;
        }

        md.push_str("### Steps\n\n");
        for step in &scenario.steps {
            let name = match &step.group {
                Some(group) => format!("[{group}] {}", step.name),
                None => step.name.clone(),
            };
            md.push_str(&format!(
                "- {} {} ({} ms)\n",
                status_icon(step.status),
                name,
                step.duration_ms
            ));
            if let Some(error) = &step.error {
                md.push_str(&format!("  - Error: {error}\n"));
            }
            for assertion in step.assertions.iter().filter(|a| !a.passed) {
                md.push_str(&format!("  - {}\n", assertion.message));
            }
        }
        md.push('\n');
    }
    md
}

impl Reporter for ConsoleReporter {
    fn start(&mut self) {
        self.report = Report::new();
    }

    fn add_scenario_result(&mut self, result: &ScenarioResult) {
        self.print_result(result);
        self.report.push(result);
    }

    fn finish(&mut self) -> Result<()> {
        self.report.close();
        let summary = &self.report.summary;
        info!(
            "Summary:\n  Total: {}\n  \x1b[32mPassed: {}\x1b[0m\n  \x1b[31mFailed: {}\x1b[0m\n  Skipped: {}\n  Pass rate: {:.1}%\n  Duration: {} ms",
            summary.total,
            summary.passed,
            summary.failed,
            summary.skipped,
            summary.pass_rate,
            summary.duration_ms
        );

        if let Some((path, format)) = &self.output {
            save_report(&self.report, path, *format)?;
            info!("Report saved: {}", path.display());
        }
        Ok(())
    }
}

/// Keeps the report in memory.
#[derive(Default)]
pub struct MemoryReporter {
    pub report: Report,
    pub started: usize,
    pub finished: usize,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reporter for MemoryReporter {
    fn start(&mut self) {
        self.started += 1;
        self.report = Report::new();
    }

    fn add_scenario_result(&mut self, result: &ScenarioResult) {
        self.report.push(result);
    }

    fn finish(&mut self) -> Result<()> {
        self.finished += 1;
        self.report.close();
        Ok(())
    }
}
