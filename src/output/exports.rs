use anyhow::Result;
use indexmap::IndexMap;
use std::io::Write;

use crate::config::OutputFormat;
use crate::report::PipelineReport;

/// Exports pipeline reports keyed by trigger build URL.
///
/// - JSON: programmatic access (`pretty` indents it)
/// - YAML: the same layout as the persisted reports
pub fn export_reports(
    reports: &[(String, PipelineReport)],
    format: OutputFormat,
    pretty: bool,
    output: &mut dyn Write,
) -> Result<()> {
    let by_url: IndexMap<&str, &PipelineReport> = reports
        .iter()
        .map(|(url, report)| (url.as_str(), report))
        .collect();

    match format {
        OutputFormat::Summary => {
            anyhow::bail!("the summary format is rendered, not exported")
        }
        OutputFormat::Json => export_json(&by_url, pretty, output),
        OutputFormat::Yaml => export_yaml(&by_url, output),
    }
}

fn export_json(
    reports: &IndexMap<&str, &PipelineReport>,
    pretty: bool,
    output: &mut dyn Write,
) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(reports)?
    } else {
        serde_json::to_string(reports)?
    };
    writeln!(output, "{json}")?;
    Ok(())
}

fn export_yaml(reports: &IndexMap<&str, &PipelineReport>, output: &mut dyn Write) -> Result<()> {
    write!(output, "{}", serde_yaml::to_string(reports)?)?;
    Ok(())
}
