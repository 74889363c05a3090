//! Cell lookups and latest-sample selection
//!
//! Rows arrive newest first, so logical row `r` lives at physical row
//! `rows - 1 - r`.

use super::{RawReport, RawRow, RrdError};
use tracing::debug;

/// Value returned when a parameter has no usable sample in the batch
pub const MISSING_VALUE: &str = "";

fn stored_row(report: &RawReport, logical_row: usize) -> Result<&RawRow, RrdError> {
    report
        .rows
        .checked_sub(logical_row + 1)
        .and_then(|physical| report.data.get(physical))
        .ok_or(RrdError::IndexOutOfRange {
            row: logical_row,
            column: None,
            rows: report.rows,
            columns: report.columns,
        })
}

/// Timestamp of a logical row
pub fn row_timestamp(report: &RawReport, logical_row: usize) -> Result<i64, RrdError> {
    let row = stored_row(report, logical_row)?;
    row.timestamp
        .trim()
        .parse()
        .map_err(|_| RrdError::NumericParse {
            row: logical_row,
            column: None,
            text: row.timestamp.clone(),
        })
}

pub fn value_at(report: &RawReport, logical_row: usize, column: usize) -> Result<f64, RrdError> {
    let row = stored_row(report, logical_row)?;
    let cell = row.values.get(column).ok_or(RrdError::IndexOutOfRange {
        row: logical_row,
        column: Some(column),
        rows: report.rows,
        columns: report.columns,
    })?;
    cell.trim().parse().map_err(|_| RrdError::NumericParse {
        row: logical_row,
        column: Some(column),
        text: cell.clone(),
    })
}

/// Value of `column` at the newest timestamp in the batch.
///
/// Rows whose timestamp or cell does not parse are skipped. With no usable
/// row the result is [`MISSING_VALUE`].
pub fn latest(report: &RawReport, column: usize) -> String {
    let mut newest: i64 = 0;
    let mut value = MISSING_VALUE.to_string();

    for row in 0..report.rows {
        let sample = row_timestamp(report, row)
            .and_then(|ts| value_at(report, row, column).map(|v| (ts, v)));
        match sample {
            Ok((timestamp, sample)) if timestamp > newest => {
                newest = timestamp;
                value = sample.to_string();
            }
            Ok(_) => {}
            Err(e) => debug!(column, "Skipping sample: {}", e),
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_devkit::RrdXmlBuilder;

    fn report(xml: &str) -> RawReport {
        RawReport::parse(xml).unwrap()
    }

    #[test]
    fn test_logical_rows_are_reversed() {
        let report = report(
            &RrdXmlBuilder::new(100, 5, 110)
                .host_column("h-1", "cpu0")
                .row(110, &["0.3"])
                .row(105, &["0.2"])
                .row(100, &["0.1"])
                .build(),
        );

        assert_eq!(row_timestamp(&report, 0).unwrap(), 100);
        assert_eq!(row_timestamp(&report, 2).unwrap(), 110);
        assert_eq!(value_at(&report, 0, 0).unwrap(), 0.1);
        assert_eq!(value_at(&report, 2, 0).unwrap(), 0.3);
    }

    #[test]
    fn test_latest_picks_max_timestamp_in_any_order() {
        let report = report(
            &RrdXmlBuilder::new(80, 10, 120)
                .vm_column("vm-1", "cpu0")
                .row(100, &["1"])
                .row(80, &["2"])
                .row(120, &["3.5"])
                .row(90, &["4"])
                .build(),
        );
        assert_eq!(latest(&report, 0), "3.5");
    }

    #[test]
    fn test_latest_without_rows_is_sentinel() {
        let report = report(&RrdXmlBuilder::new(100, 5, 100).vm_column("vm-1", "cpu0").build());
        assert_eq!(latest(&report, 0), MISSING_VALUE);
    }

    #[test]
    fn test_latest_skips_unparseable_cells() {
        let report = report(
            &RrdXmlBuilder::new(100, 5, 110)
                .vm_column("vm-1", "cpu0")
                .row(110, &["n/a"])
                .row(105, &["0.25"])
                .raw_row("later", &["9"])
                .build(),
        );
        assert_eq!(latest(&report, 0), "0.25");

        let only_bad = report_with_single_cell("garbage");
        assert_eq!(latest(&only_bad, 0), MISSING_VALUE);
    }

    fn report_with_single_cell(cell: &str) -> RawReport {
        report(
            &RrdXmlBuilder::new(100, 5, 100)
                .vm_column("vm-1", "cpu0")
                .row(100, &[cell])
                .build(),
        )
    }

    #[test]
    fn test_numeric_parse_error() {
        let report = report_with_single_cell("abc");
        let err = value_at(&report, 0, 0).unwrap_err();
        assert!(matches!(err, RrdError::NumericParse { column: Some(0), .. }));
    }

    #[test]
    fn test_nan_cells_parse() {
        let report = report_with_single_cell("NaN");
        assert!(value_at(&report, 0, 0).unwrap().is_nan());
    }

    #[test]
    fn test_index_out_of_range() {
        let report = report_with_single_cell("1");
        assert!(matches!(
            row_timestamp(&report, 1),
            Err(RrdError::IndexOutOfRange { row: 1, column: None, .. })
        ));
        assert!(matches!(
            value_at(&report, 0, 3),
            Err(RrdError::IndexOutOfRange { column: Some(3), .. })
        ));
    }

    #[test]
    fn test_declared_rows_beyond_data_are_out_of_range() {
        let mut report = report_with_single_cell("1");
        report.rows = 3;

        assert!(matches!(
            row_timestamp(&report, 0),
            Err(RrdError::IndexOutOfRange { row: 0, rows: 3, .. })
        ));
        assert!(matches!(value_at(&report, 1, 0), Err(RrdError::IndexOutOfRange { .. })));
        assert_eq!(row_timestamp(&report, 2).unwrap(), 100);
        assert_eq!(latest(&report, 0), "1");
    }
}
