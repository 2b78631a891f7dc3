//! Rendering of run results and the append-only results log.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::schema::{ProbeResult, RunMeta, RunReport};
use crate::OutputFormat;

/// Exit code for a finished run: `0` when every result succeeded, `1` otherwise.
pub fn exit_code(results: &[ProbeResult]) -> u8 {
    if results.iter().any(|r| r.failed) {
        1
    } else {
        0
    }
}

pub fn render(report: &RunReport, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Text => render_text(&report.results),
        OutputFormat::Tsv => render_tsv(&report.results),
        OutputFormat::Json => serde_json::to_string_pretty(report)?,
    })
}

const COLUMNS: [&str; 11] = [
    "probe", "fork", "threads", "samples", "mean_ns", "min_ns", "max_ns", "stddev_ns", "cv%",
    "ops/s", "status",
];

fn row(r: &ProbeResult) -> [String; 11] {
    [
        r.probe_name.clone(),
        r.fork_index.to_string(),
        r.threads.to_string(),
        r.sample_count.to_string(),
        format!("{:.2}", r.mean_ns),
        r.min_ns.to_string(),
        r.max_ns.to_string(),
        format!("{:.2}", r.stddev_ns),
        format!("{:.1}", r.cv() * 100.0),
        format_ops(r.ops_per_sec),
        r.status().to_string(),
    ]
}

fn format_ops(ops: f64) -> String {
    match ops {
        o if o >= 1e9 => format!("{:.2}G", o / 1e9),
        o if o >= 1e6 => format!("{:.2}M", o / 1e6),
        o if o >= 1e3 => format!("{:.2}k", o / 1e3),
        o => format!("{o:.2}"),
    }
}

/// Aligned column table, rows in the order given. Failures are listed below.
pub fn render_text(results: &[ProbeResult]) -> String {
    let rows: Vec<[String; 11]> = results.iter().map(row).collect();
    let mut widths = COLUMNS.map(str::len);
    for r in &rows {
        for (w, cell) in widths.iter_mut().zip(r.iter()) {
            *w = (*w).max(cell.len());
        }
    }

    let mut out = String::new();
    let mut line = |cells: &[&str]| {
        let mut text = String::new();
        for (i, (cell, w)) in cells.iter().zip(widths.iter().copied()).enumerate() {
            // first column left-aligned, numbers right-aligned
            if i == 0 {
                let _ = write!(text, "{cell:<w$}");
            } else {
                let _ = write!(text, "  {cell:>w$}");
            }
        }
        out.push_str(text.trim_end());
        out.push('\n');
    };
    line(&COLUMNS[..]);
    for r in &rows {
        let cells: Vec<&str> = r.iter().map(String::as_str).collect();
        line(cells.as_slice());
    }

    for r in results {
        if let Some(err) = r.error() {
            let _ = writeln!(out, "error: {err}");
        }
    }
    out
}

pub fn render_tsv(results: &[ProbeResult]) -> String {
    let mut out = String::new();
    out.push_str(&COLUMNS.join("\t"));
    out.push('\n');
    for r in results {
        out.push_str(&row(r).join("\t"));
        out.push('\n');
    }
    out
}

#[derive(Serialize)]
struct LogLine<'a> {
    #[serde(flatten)]
    result: &'a ProbeResult,
    timestamp_utc: &'a str,
    git_sha: Option<&'a str>,
    profile: &'a str,
    config_digest: &'a str,
}

/// Append one JSON object per result to `path`, creating the file if needed.
pub fn append_results_log(path: &Path, report: &RunReport) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    let RunMeta {
        timestamp_utc,
        git_sha,
        profile,
        config_digest,
        ..
    } = &report.run;
    for result in &report.results {
        let line = LogLine {
            result,
            timestamp_utc,
            git_sha: git_sha.as_deref(),
            profile,
            config_digest,
        };
        serde_json::to_writer(&mut writer, &line)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
