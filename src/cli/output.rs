//! Output formatting for CLI commands
//!
//! Reports print as JSON or YAML; rendered mesh values can additionally print
//! as `--set key=value` flags for a Helm invocation.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::mesh::MeshValues;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
    /// Helm `--set` flags; only meaningful for mesh values
    Flags,
}

impl OutputFormat {
    /// Parse output format from string
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            "flags" => Ok(OutputFormat::Flags),
            _ => anyhow::bail!("Unsupported output format: '{}'. Use 'json', 'yaml', or 'flags'.", s),
        }
    }
}

/// Render a report in the given format
pub fn render<T: Serialize>(data: &T, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(data).context("Failed to serialize to JSON")
        }
        OutputFormat::Yaml => serde_yaml::to_string(data).context("Failed to serialize to YAML"),
        OutputFormat::Flags => anyhow::bail!("Flags format is only available for mesh values"),
    }
}

/// Render mesh values, including the flags format
pub fn render_values(values: &MeshValues, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Flags => {
            let flags = values.to_set_flags().context("Failed to flatten mesh values")?;
            Ok(flags
                .iter()
                .map(|(key, value)| format!("--set {}={}", key, value))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        OutputFormat::Yaml => values.to_yaml().context("Failed to render mesh values"),
        OutputFormat::Json => render(values, format),
    }
}

/// Print a report in the given format
pub fn print_output<T: Serialize>(data: &T, format: OutputFormat) -> Result<()> {
    println!("{}", render(data, format)?);
    Ok(())
}
