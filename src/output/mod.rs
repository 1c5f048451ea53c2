mod cli;
mod json;
mod markdown;
mod sarif;

pub use cli::{print_cli_table, render_table};
pub use json::render_json;
pub use markdown::render_markdown;
pub use sarif::render_sarif;

use crate::model::ScanReport;
use anyhow::Result;

/// Output format for scan reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    Table,
    /// JSON format for programmatic use
    Json,
    /// Markdown for pull request comments
    Markdown,
    /// SARIF format for GitHub Actions code scanning
    Sarif,
}

impl OutputFormat {
    pub const NAMES: &'static str = "'table', 'json', 'markdown', or 'sarif'";
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "sarif" => Ok(OutputFormat::Sarif),
            _ => Err(format!("Unknown format: {}. Use {}", s, Self::NAMES)),
        }
    }
}

pub fn print_report(report: &ScanReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => print_cli_table(report),
        _ => println!("{}", format_report_to_string(report, format)?),
    }
    Ok(())
}

/// Format a report to a string for file output
pub fn format_report_to_string(report: &ScanReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => render_json(report),
        OutputFormat::Markdown => Ok(render_markdown(report)),
        OutputFormat::Sarif => render_sarif(report),
        // colored tables make poor files
        OutputFormat::Table => render_json(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_formats() {
        assert_eq!("TABLE".parse::<OutputFormat>(), Ok(OutputFormat::Table));
        assert_eq!("md".parse::<OutputFormat>(), Ok(OutputFormat::Markdown));
        assert_eq!("sarif".parse::<OutputFormat>(), Ok(OutputFormat::Sarif));
        assert!("html".parse::<OutputFormat>().is_err());
    }
}
