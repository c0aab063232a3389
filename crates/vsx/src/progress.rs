//! 📊 progress.rs: "Are we there yet?", asked once per source, forever.
//!
//! 🚀 A refresh cycle is N sources. The bar counts them down, and a comfy-table
//! message underneath tallies what the finished ones actually did. When the
//! cycle ends, [`summary_table`] prints the receipts, one row per source.
//!
//! ⚠️ Watching this progress bar will not make the publisher faster.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING, presets::UTF8_FULL};
use indicatif::{ProgressBar, ProgressStyle};

use crate::report::{RecordTally, SourceReport};

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS if the publisher is having a day.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📊 Live view of one refresh cycle.
pub(crate) struct RefreshProgress {
    progress_bar: ProgressBar,
    totals: RecordTally,
    aborted: u64,
    start_time: Instant,
}

impl std::fmt::Debug for RefreshProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("RefreshProgress")
            .field("totals", &self.totals)
            .field("aborted", &self.aborted)
            .finish()
    }
}

impl RefreshProgress {
    pub(crate) fn new(total_sources: u64) -> Self {
        let progress_bar = ProgressBar::new(total_sources);
        let style = ProgressStyle::default_bar()
            .template("{msg}\n| [{bar:40.cyan/blue}] {pos}/{len} sources")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        progress_bar.set_style(style);

        let progress = Self {
            progress_bar,
            totals: RecordTally::default(),
            aborted: 0,
            start_time: Instant::now(),
        };
        progress.render();
        progress
    }

    /// 🔄 One more source is done. Fold it in and redraw.
    pub(crate) fn record(&mut self, report: &SourceReport) {
        self.totals.absorb(&report.records);
        if !report.is_completed() {
            self.aborted += 1;
        }
        self.progress_bar.inc(1);
        self.render();
    }

    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    pub(crate) fn totals(&self) -> &RecordTally {
        &self.totals
    }

    fn render(&self) {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);

        table.add_row(vec![
            Cell::new(format!("{} inserted", format_number(self.totals.inserted)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} merged", format_number(self.totals.merged)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} decode errors", format_number(self.totals.decode_errors)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} rejected", format_number(self.totals.rejected())))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(self.start_time.elapsed())))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} aborted", format_number(self.aborted)))
                .set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar
            .set_message(format!("refresh cycle\n{}", table));
    }
}

/// 🧾 One row per source. Printed when a cycle ends, so the receipts survive
/// the progress bar.
pub fn summary_table(reports: &[SourceReport]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "source",
        "files",
        "inserted",
        "merged",
        "skipped",
        "decode errors",
        "parent missing",
        "invalid",
        "storage errors",
        "elapsed",
        "outcome",
    ]);

    for report in reports {
        let records = &report.records;
        table.add_row(vec![
            Cell::new(report.source.as_str()),
            Cell::new(format!(
                "{}/{}",
                report.files_total.saturating_sub(report.files_failed),
                report.files_total
            ))
            .set_alignment(CellAlignment::Right),
            number_cell(records.inserted),
            number_cell(records.merged),
            number_cell(records.skipped),
            number_cell(records.decode_errors),
            number_cell(records.parent_missing),
            number_cell(records.invalid),
            number_cell(records.storage_errors),
            Cell::new(format_duration(report.elapsed)).set_alignment(CellAlignment::Right),
            Cell::new(report.outcome.to_string()),
        ]);
    }
    table
}

fn number_cell(n: u64) -> Cell {
    Cell::new(format_number(n)).set_alignment(CellAlignment::Right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SourceRef;
    use crate::report::SourceOutcome;

    #[test]
    fn the_one_where_big_numbers_get_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn the_one_where_long_runs_earn_an_hours_column() {
        assert_eq!(format_duration(Duration::from_secs(65)), "01:05");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "01:02:05");
    }

    #[test]
    fn the_one_where_the_receipts_list_every_source() {
        let completed = SourceReport {
            source: SourceRef::new("http://good.example"),
            files_total: 2,
            files_failed: 0,
            records: RecordTally {
                inserted: 1_500,
                decode_errors: 1,
                ..RecordTally::default()
            },
            outcome: SourceOutcome::Completed,
            elapsed: Duration::from_secs(3),
        };
        let aborted = SourceReport::aborted(
            SourceRef::new("http://down.example"),
            "manifest answered 503",
            Duration::from_secs(1),
        );

        let mut table = summary_table(&[completed, aborted]);
        table.set_width(500);
        let rendered = table.to_string();

        assert!(rendered.contains("http://good.example"));
        assert!(rendered.contains("1,500"));
        assert!(rendered.contains("http://down.example"));
        assert!(rendered.contains("aborted: manifest answered 503"));
    }

    #[test]
    fn the_one_where_the_live_tally_follows_the_reports() {
        let mut progress = RefreshProgress::new(2);
        progress.record(&SourceReport {
            source: SourceRef::new("http://a.example"),
            files_total: 1,
            files_failed: 0,
            records: RecordTally {
                inserted: 3,
                ..RecordTally::default()
            },
            outcome: SourceOutcome::Completed,
            elapsed: Duration::ZERO,
        });
        progress.record(&SourceReport::aborted(
            SourceRef::new("http://b.example"),
            "refused",
            Duration::ZERO,
        ));
        progress.finish();

        assert_eq!(progress.totals().inserted, 3);
        assert_eq!(progress.aborted, 1);
    }
}
