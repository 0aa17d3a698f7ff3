use crate::errors::Result;
use crate::replacer::{Replacement, ReplaceSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

/// Defines the possible output formats for replace reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// A simple, human-readable text format.
    Text,
    /// JSON format, suitable for machine processing.
    Json,
    /// Comma-Separated Values format.
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Text,
        }
    }
}

/// Renders a [`ReplaceSummary`] for people or tools.
///
/// Entries are sorted by path so reports are stable across runs, even though
/// the summary itself is in completion order.
pub struct OutputFormatter {
    format: OutputFormat,
    tool_name: String,
    tool_version: String,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            tool_name: env!("CARGO_PKG_NAME").to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Writes the formatted report to a given writer.
    pub fn write_summary<W: Write>(&self, writer: &mut W, summary: &ReplaceSummary) -> Result<()> {
        let output = match self.format {
            OutputFormat::Text => self.format_text(summary),
            OutputFormat::Json => self.format_json(summary)?,
            OutputFormat::Csv => self.format_csv(summary)?,
        };
        writer.write_all(output.as_bytes())?;
        Ok(())
    }

    fn format_text(&self, summary: &ReplaceSummary) -> String {
        let mut output = String::new();
        let prefix = if summary.dry_run { "DRY " } else { "" };

        for r in sorted_results(summary) {
            output.push_str(&format!(
                "{prefix}Modified {} ({} replacements)\n",
                r.path.display(),
                r.replacements
            ));
        }
        for e in sorted_errors(summary) {
            output.push_str(&format!("Error {}: {}\n", e.0, e.1));
        }

        output.push_str(&format!("\n{}\n", "-".repeat(50)));
        output.push_str(&format!("Files scanned : {}\n", summary.files_processed()));
        output.push_str(&format!("Files changed : {}\n", summary.results.len()));
        output.push_str(&format!("Total edits   : {}\n", summary.total_replacements()));
        output.push_str(&format!("Binary skipped: {}\n", summary.binary_skipped));
        output.push_str(&format!("Errors        : {}\n", summary.errors.len()));
        if summary.dry_run {
            output.push_str("\nRun without --dry-run to apply these changes\n");
        }
        output
    }

    fn format_json(&self, summary: &ReplaceSummary) -> Result<String> {
        #[derive(Serialize)]
        struct JsonOutput<'a> {
            tool: ToolInfo<'a>,
            run_time: DateTime<Utc>,
            dry_run: bool,
            files_processed: usize,
            total_replacements: usize,
            binary_skipped: usize,
            unchanged: usize,
            results: Vec<JsonResult>,
            errors: Vec<JsonError>,
        }

        #[derive(Serialize)]
        struct ToolInfo<'a> {
            name: &'a str,
            version: &'a str,
        }

        #[derive(Serialize)]
        struct JsonResult {
            path: String,
            replacements: usize,
        }

        #[derive(Serialize)]
        struct JsonError {
            path: String,
            error: String,
        }

        let output = JsonOutput {
            tool: ToolInfo {
                name: &self.tool_name,
                version: &self.tool_version,
            },
            run_time: Utc::now(),
            dry_run: summary.dry_run,
            files_processed: summary.files_processed(),
            total_replacements: summary.total_replacements(),
            binary_skipped: summary.binary_skipped,
            unchanged: summary.unchanged,
            results: sorted_results(summary)
                .into_iter()
                .map(|r| JsonResult {
                    path: r.path.display().to_string(),
                    replacements: r.replacements,
                })
                .collect(),
            errors: sorted_errors(summary)
                .into_iter()
                .map(|(path, error)| JsonError { path, error })
                .collect(),
        };

        Ok(serde_json::to_string_pretty(&output)?)
    }

    fn format_csv(&self, summary: &ReplaceSummary) -> Result<String> {
        use csv::Writer;

        let mut wtr = Writer::from_writer(vec![]);
        wtr.write_record(["Status", "File", "Replacements", "Error"])?;

        let status = if summary.dry_run { "would-replace" } else { "replaced" };
        for r in sorted_results(summary) {
            let path = r.path.display().to_string();
            let count = r.replacements.to_string();
            wtr.write_record([status, path.as_str(), count.as_str(), ""])?;
        }
        for (path, error) in sorted_errors(summary) {
            wtr.write_record(["error", path.as_str(), "0", error.as_str()])?;
        }

        let data = wtr.into_inner().map_err(|e| format!("CSV writer error: {}", e))?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }
}

fn sorted_results(summary: &ReplaceSummary) -> Vec<&Replacement> {
    let mut results: Vec<&Replacement> = summary.results.iter().collect();
    results.sort_by(|a, b| a.path.cmp(&b.path));
    results
}

fn sorted_errors(summary: &ReplaceSummary) -> Vec<(String, String)> {
    let mut errors: Vec<(String, String)> = summary
        .errors
        .iter()
        .map(|e| (e.path.display().to_string(), e.error.to_string()))
        .collect();
    errors.sort();
    errors
}
