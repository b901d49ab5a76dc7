//! CSV ingestion and validation of weekly prescription rows.
//!
//! The file must start with a header naming every required column (in any
//! order; extra columns are ignored). Any bad row aborts the whole load, so a
//! caller never sees a partial result.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;
use tracing::info;

use crate::storage::PrescriptionRow;

pub const REQUIRED_COLUMNS: [&str; 7] = [
    "date",
    "product",
    "region",
    "units",
    "price_per_unit",
    "revenue",
    "event_type",
];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("missing required columns: {}", missing.join(", "))]
    SchemaValidation { missing: Vec<String> },

    #[error("line {line}: {reason}")]
    DataQuality { line: usize, reason: String },

    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

/// Read, validate and sort the rows of a CSV file.
pub fn load_prescriptions(path: &Path) -> Result<Vec<PrescriptionRow>, IngestError> {
    let raw = std::fs::read_to_string(path)?;
    let rows = parse_prescriptions(&raw)?;
    info!(path = %path.display(), rows = rows.len(), "loaded prescription csv");
    Ok(rows)
}

/// Parse CSV text. Output is ordered by (product, region, date).
pub fn parse_prescriptions(raw: &str) -> Result<Vec<PrescriptionRow>, IngestError> {
    let mut lines = raw
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let Some((_, header)) = lines.next() else {
        return Err(IngestError::SchemaValidation {
            missing: REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
        });
    };
    let columns = ColumnMap::from_header(header)?;

    let mut rows = Vec::new();
    for (line, text) in lines {
        rows.push(columns.parse_row(line, text)?);
    }

    rows.sort_by(|a, b| {
        (a.product.as_str(), a.region.as_str(), a.date)
            .cmp(&(b.product.as_str(), b.region.as_str(), b.date))
    });
    Ok(rows)
}

/// Position of each required column in the header.
struct ColumnMap {
    width: usize,
    index: [usize; REQUIRED_COLUMNS.len()],
}

impl ColumnMap {
    fn from_header(header: &str) -> Result<Self, IngestError> {
        let names: Vec<&str> = split_cells(header);
        let mut index = [0; REQUIRED_COLUMNS.len()];
        let mut missing = Vec::new();

        for (slot, required) in REQUIRED_COLUMNS.iter().enumerate() {
            match names.iter().position(|n| n == required) {
                Some(pos) => index[slot] = pos,
                None => missing.push(required.to_string()),
            }
        }

        if !missing.is_empty() {
            return Err(IngestError::SchemaValidation { missing });
        }
        Ok(Self {
            width: names.len(),
            index,
        })
    }

    fn parse_row(&self, line: usize, text: &str) -> Result<PrescriptionRow, IngestError> {
        let cells = split_cells(text);
        if cells.len() != self.width {
            return Err(quality(
                line,
                format!("expected {} columns, found {}", self.width, cells.len()),
            ));
        }
        let cell = |slot: usize| cells[self.index[slot]];

        let date = parse_date(cell(0))
            .ok_or_else(|| quality(line, format!("unparseable date '{}'", cell(0))))?;

        let product = non_empty(line, "product", cell(1))?;
        let region = non_empty(line, "region", cell(2))?;

        let units = parse_units(cell(3))
            .ok_or_else(|| quality(line, format!("units is not a whole number: '{}'", cell(3))))?;
        if units < 0 {
            return Err(quality(line, format!("negative units ({units})")));
        }

        let price_per_unit = parse_number(line, "price_per_unit", cell(4))?;
        if price_per_unit <= 0.0 {
            return Err(quality(line, format!("non-positive price_per_unit ({price_per_unit})")));
        }

        let revenue = parse_number(line, "revenue", cell(5))?;
        if revenue < 0.0 {
            return Err(quality(line, format!("negative revenue ({revenue})")));
        }

        let event_type = match cell(6) {
            "" => "none".to_string(),
            label => label.to_string(),
        };

        Ok(PrescriptionRow {
            date,
            product,
            region,
            units,
            price_per_unit,
            revenue,
            event_type,
        })
    }
}

fn split_cells(line: &str) -> Vec<&str> {
    line.split(',')
        .map(|c| c.trim().trim_matches('"').trim())
        .collect()
}

fn quality(line: usize, reason: String) -> IngestError {
    IngestError::DataQuality { line, reason }
}

fn non_empty(line: usize, column: &str, value: &str) -> Result<String, IngestError> {
    if value.is_empty() {
        return Err(quality(line, format!("empty {column}")));
    }
    Ok(value.to_string())
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time of day.
fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

/// Whole numbers, also when written with a zero fraction (`1200.0`).
fn parse_units(value: &str) -> Option<i64> {
    if let Ok(n) = value.parse::<i64>() {
        return Some(n);
    }
    let f = value.parse::<f64>().ok()?;
    (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
}

fn parse_number(line: usize, column: &str, value: &str) -> Result<f64, IngestError> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(quality(line, format!("{column} is not a number: '{value}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "date,product,region,units,price_per_unit,revenue,event_type";

    fn csv(body: &[&str]) -> String {
        let mut out = String::from(HEADER);
        for line in body {
            out.push('\n');
            out.push_str(line);
        }
        out
    }

    #[test]
    fn test_parses_and_sorts_by_cohort_then_date() {
        let rows = parse_prescriptions(&csv(&[
            "2021-01-11,Drug_B,North,800,300,240000,none",
            "2021-01-11,Drug_A,North,1210,450,544500,none",
            "2021-01-04,Drug_A,North,1200,450,540000,supply_issue",
        ]))
        .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].product, "Drug_A");
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2021, 1, 4).unwrap());
        assert_eq!(rows[0].event_type, "supply_issue");
        assert_eq!(rows[1].units, 1210);
        assert_eq!(rows[2].product, "Drug_B");
    }

    #[test]
    fn test_column_order_is_free_and_extras_ignored() {
        let raw = "region,extra,product,date,event_type,units,revenue,price_per_unit\n\
                   East,x,Drug_A,2021-01-04 00:00:00,none,1200.0,540000,450";
        let rows = parse_prescriptions(raw).unwrap();
        assert_eq!(rows[0].region, "East");
        assert_eq!(rows[0].units, 1200);
        assert_eq!(rows[0].price_per_unit, 450.0);
    }

    #[test]
    fn test_missing_columns_are_listed() {
        let err = parse_prescriptions("date,product,units\n2021-01-04,Drug_A,1").unwrap_err();
        match err {
            IngestError::SchemaValidation { missing } => {
                assert_eq!(missing, vec!["region", "price_per_unit", "revenue", "event_type"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_input_is_a_schema_error() {
        assert!(matches!(
            parse_prescriptions(""),
            Err(IngestError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_values_with_line_numbers() {
        let cases = [
            ("not-a-date,Drug_A,North,1,450,450,none", "date"),
            ("2021-01-04,Drug_A,North,-1,450,0,none", "negative units"),
            ("2021-01-04,Drug_A,North,1,0,450,none", "non-positive price"),
            ("2021-01-04,Drug_A,North,1,450,-5,none", "negative revenue"),
            ("2021-01-04,Drug_A,North,1.5,450,675,none", "whole number"),
            ("2021-01-04,Drug_A,North,1,abc,450,none", "not a number"),
            ("2021-01-04,,North,1,450,450,none", "empty product"),
            ("2021-01-04,Drug_A,North,1,450", "columns"),
        ];
        for (row, expected) in cases {
            let err = parse_prescriptions(&csv(&["2021-01-04,Drug_A,South,1,450,450,none", row]))
                .unwrap_err();
            match err {
                IngestError::DataQuality { line, reason } => {
                    assert_eq!(line, 3, "{row}");
                    assert!(reason.contains(expected), "{row}: {reason}");
                }
                other => panic!("unexpected error for {row}: {other}"),
            }
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rx.csv");
        std::fs::write(&path, csv(&["2021-01-04,Drug_A,North,1200,450,540000,"])).unwrap();
        let rows = load_prescriptions(&path).unwrap();
        assert_eq!(rows[0].event_type, "none");

        let missing = load_prescriptions(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(missing, IngestError::Io(_)));
    }
}
