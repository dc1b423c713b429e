use std::io::Write;

use anyhow::Result;
use clap::ValueEnum;

use kwbatch_core::MetricResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Csv,
}

pub fn write_results<W: Write>(out: W, results: &[MetricResult], format: Format) -> Result<()> {
    match format {
        Format::Json => write_json(out, results),
        Format::Csv => write_csv(out, results),
    }
}

fn write_json<W: Write>(mut out: W, results: &[MetricResult]) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, results)?;
    writeln!(out)?;
    Ok(())
}

/// One row per keyword; missing values are empty cells.
fn write_csv<W: Write>(out: W, results: &[MetricResult]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["keyword", "ads_avg_monthly_searches", "trends_score", "fetched_at"])?;
    for result in results {
        writer.write_record([
            result.keyword.as_str().to_string(),
            result
                .ads_avg_monthly_searches
                .map(|v| v.to_string())
                .unwrap_or_default(),
            result.trends_score.map(|v| format!("{v:.2}")).unwrap_or_default(),
            result.fetched_at.to_rfc3339(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
