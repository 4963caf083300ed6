// ==============================================================================
// aggregate.rs - Sales Aggregation
// ==============================================================================
// Description: Streaming per-department sales totals over headerless CSV input
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================
// Input rows:  <department>,<anything>,<sales>[,...]
// Output:      Department Name,Total Number of Sales
//              <department>,<total>        (one row per department, first-seen order)
// ==============================================================================

use csv::{ByteRecord, ReaderBuilder, WriterBuilder};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

use crate::error::AggregationError;

pub const REPORT_HEADER: [&str; 2] = ["Department Name", "Total Number of Sales"];

const GROUP_COLUMN: usize = 0;
const VALUE_COLUMN: usize = 2;

/// Running totals per group, kept in first-seen order
#[derive(Debug, Clone, Default)]
pub struct SalesAggregate {
    index: HashMap<String, usize>,
    totals: Vec<(String, i64)>,
}

impl SalesAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one input row into the totals. Rows without a group key are skipped.
    ///
    /// Group keys that aren't valid UTF-8 are decoded lossily.
    pub fn update(&mut self, record: &ByteRecord) {
        let group = String::from_utf8_lossy(record.get(GROUP_COLUMN).unwrap_or(b""));
        if group.is_empty() {
            return;
        }
        let value = parse_sales_value(record.get(VALUE_COLUMN).unwrap_or(b""));
        self.add(&group, value);
    }

    pub fn add(&mut self, group: &str, value: i64) {
        match self.index.get(group) {
            Some(&i) => {
                let total = &mut self.totals[i].1;
                *total = total.saturating_add(value);
            }
            None => {
                self.index.insert(group.to_string(), self.totals.len());
                self.totals.push((group.to_string(), value));
            }
        }
    }

    pub fn get(&self, group: &str) -> Option<i64> {
        self.index.get(group).map(|&i| self.totals[i].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.totals.iter().map(|(group, total)| (group.as_str(), *total))
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}

/// Lenient integer parse: leading whitespace, optional sign, then leading
/// digits. Anything else yields 0. Out-of-range values saturate.
pub fn parse_sales_value(raw: &[u8]) -> i64 {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(raw.len());
    let s = &raw[start..];
    let (negative, digits) = match s.first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: i64 = 0;
    for &b in digits.iter().take_while(|b| b.is_ascii_digit()) {
        let digit = i64::from(b - b'0');
        value = value.saturating_mul(10).saturating_add(digit);
    }

    if negative {
        -value
    } else {
        value
    }
}

/// Aggregate every row from a headerless CSV stream
pub fn aggregate_reader<R: Read>(reader: R) -> Result<SalesAggregate, csv::Error> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut aggregate = SalesAggregate::new();
    let mut record = ByteRecord::new();
    let mut rows = 0usize;
    while csv_reader.read_byte_record(&mut record)? {
        aggregate.update(&record);
        rows += 1;
    }

    debug!("Aggregated {} rows into {} groups", rows, aggregate.len());
    Ok(aggregate)
}

/// Write the two-column report
pub fn write_report<W: Write>(aggregate: &SalesAggregate, writer: W) -> Result<(), csv::Error> {
    let mut csv_writer = WriterBuilder::new().from_writer(writer);
    csv_writer.write_record(REPORT_HEADER)?;
    for (group, total) in aggregate.iter() {
        csv_writer.write_record([group, total.to_string().as_str()])?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Aggregate `input` into a report at `output`.
///
/// The report is written to a temporary file beside `output` and renamed into
/// place, so a re-run replaces the previous report atomically.
pub fn aggregate_file(input: &Path, output: &Path) -> Result<SalesAggregate, AggregationError> {
    let aggregate = aggregate_reader(File::open(input)?)?;

    let parent = output.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    write_report(&aggregate, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(output).map_err(|e| e.error)?;

    Ok(aggregate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sums_by_department() {
        let input = "Electronics,John,100\nElectronics,Jane,150\n";
        let aggregate = aggregate_reader(input.as_bytes()).unwrap();
        assert_eq!(aggregate.get("Electronics"), Some(250));
        assert_eq!(aggregate.len(), 1);
    }

    #[test]
    fn test_empty_group_is_skipped() {
        let input = ",Bob,50\nToys,Mike,5\n";
        let aggregate = aggregate_reader(input.as_bytes()).unwrap();
        assert_eq!(aggregate.get(""), None);
        assert_eq!(aggregate.len(), 1);
    }

    #[test]
    fn test_non_numeric_counts_as_zero() {
        let input = "Toys,Mike,notanumber\nToys,Ann\n";
        let aggregate = aggregate_reader(input.as_bytes()).unwrap();
        assert_eq!(aggregate.get("Toys"), Some(0));
    }

    #[test]
    fn test_parse_sales_value() {
        assert_eq!(parse_sales_value(b"42"), 42);
        assert_eq!(parse_sales_value(b"  17abc"), 17);
        assert_eq!(parse_sales_value(b"-8"), -8);
        assert_eq!(parse_sales_value(b"+3"), 3);
        assert_eq!(parse_sales_value(b"12.9"), 12);
        assert_eq!(parse_sales_value(b""), 0);
        assert_eq!(parse_sales_value(b"abc"), 0);
        assert_eq!(parse_sales_value(b"-"), 0);
        assert_eq!(parse_sales_value(b"99999999999999999999999"), i64::MAX);
    }

    #[test]
    fn test_latin1_department_is_totalled() {
        let input: &[u8] = b"Caf\xe9,x,10\nToys,y,5\nCaf\xe9,z,1\n";
        let aggregate = aggregate_reader(input).unwrap();
        assert_eq!(aggregate.get("Caf\u{fffd}"), Some(11));
        assert_eq!(aggregate.get("Toys"), Some(5));
    }

    #[test]
    fn test_output_keeps_first_seen_order() {
        let input = "Toys,a,1\nBooks,b,2\nToys,c,3\n";
        let aggregate = aggregate_reader(input.as_bytes()).unwrap();
        let mut out = Vec::new();
        write_report(&aggregate, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Department Name,Total Number of Sales\nToys,4\nBooks,2\n"
        );
    }

    #[test]
    fn test_aggregate_file_creates_parent_and_is_rerunnable() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.csv");
        std::fs::write(&input, "Garden,x,10\nGarden,y,5\n").unwrap();
        let output = dir.path().join("results/nested/out.csv");

        aggregate_file(&input, &output).unwrap();
        let first = std::fs::read_to_string(&output).unwrap();
        aggregate_file(&input, &output).unwrap();
        let second = std::fs::read_to_string(&output).unwrap();

        assert_eq!(first, "Department Name,Total Number of Sales\nGarden,15\n");
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = aggregate_file(&dir.path().join("nope.csv"), &dir.path().join("out.csv"));
        assert!(matches!(result, Err(AggregationError::Io(_))));
    }
}
