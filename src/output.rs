use std::io::{self, Write};

use logsift_logs::{DISPLAY_TIME_FORMAT, FilteredView, Snapshot};
use logsift_types::{Record, Severity, SeverityCounts};

/// Write one record per line
pub fn write_records<W: Write>(
    out: &mut W,
    records: &[Record],
    show_source: bool,
) -> io::Result<()> {
    for record in records {
        write!(
            out,
            "{:>6} {} {:<5} [{}] ",
            record.id.unwrap_or_default(),
            record.timestamp.format(DISPLAY_TIME_FORMAT),
            record.severity.as_str(),
            record.thread,
        )?;
        if show_source {
            write!(out, "{} ", record.source)?;
        }
        if !record.logger.is_empty() {
            write!(out, "{} - ", record.logger)?;
        }
        writeln!(out, "{}", record.message)?;
    }
    Ok(())
}

/// `label: N (DEBUG a, INFO b, ...)`
pub fn format_counts(label: &str, counts: &SeverityCounts) -> String {
    let per_level: Vec<String> = Severity::ALL
        .iter()
        .map(|s| format!("{} {}", s.as_str(), counts.get(*s)))
        .collect();
    format!("{}: {} ({})", label, counts.total(), per_level.join(", "))
}

/// Print the filtered view followed by total and filtered counters
pub fn write_report<W: Write>(
    out: &mut W,
    snapshot: &Snapshot,
    view: &FilteredView,
    limit: Option<usize>,
    show_source: bool,
) -> io::Result<()> {
    let shown = limit.unwrap_or(view.len()).min(view.len());
    write_records(out, &view.records[..shown], show_source)?;
    if shown < view.len() {
        writeln!(out, "... {} more", view.len() - shown)?;
    }
    writeln!(out)?;
    writeln!(out, "{}", format_counts("Total", &snapshot.counts()))?;
    writeln!(out, "{}", format_counts("Filtered", &view.counts))?;
    Ok(())
}
