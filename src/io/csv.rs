//! CSV reading and writing of base-unit assignments.

use std::io::Cursor;

use anyhow::{Context, Result, anyhow, ensure};
use polars::{
    frame::DataFrame,
    io::{SerReader, SerWriter},
    prelude::{CsvReadOptions, CsvReader, CsvWriter, DataType, NamedFrom},
    series::Series,
};

/// Header of the unit column for `base_level`, e.g. `BLOCKID`.
pub fn unit_column(base_level: &str) -> String {
    format!("{}ID", base_level.to_uppercase())
}

/// Read `(unit id, district)` rows from CSV bytes.  The first column holds
/// unit ids and is kept as text so leading zeros survive; the second holds
/// district ids.
pub fn read_assignments_csv(bytes: &[u8]) -> Result<Vec<(String, u32)>> {
    let options = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0));
    let df = CsvReader::new(Cursor::new(bytes))
        .with_options(options)
        .finish()
        .context("[io::csv::read] Failed to read CSV from bytes")?;
    read_assignments(df)
}

fn read_assignments(df: DataFrame) -> Result<Vec<(String, u32)>> {
    ensure!(df.width() >= 2, "[io::csv::read] CSV must have two columns: unit id, district");

    let units = df.column(df.get_column_names()[0])?.cast(&DataType::String)?;
    let districts = df.column(df.get_column_names()[1])?.cast(&DataType::UInt32)?;

    units.str()?.into_iter()
        .zip(districts.u32()?.into_iter())
        .enumerate()
        .map(|(row, (unit, district))| {
            let unit = unit.ok_or_else(|| anyhow!("[io::csv::read] row {row}: missing unit id"))?;
            let district = district.ok_or_else(|| anyhow!("[io::csv::read] row {row}: district is not a non-negative integer"))?;
            Ok((unit.to_string(), district))
        })
        .collect()
}

/// Write `(unit id, district)` rows as CSV with the header
/// `{BASE}ID,DISTRICT`.
pub fn write_assignments_csv(rows: &[(String, u32)], base_level: &str) -> Result<Vec<u8>> {
    let (units, districts) = rows.iter()
        .map(|(unit, district)| (unit.as_str(), *district))
        .unzip::<_, _, Vec<_>, Vec<_>>();

    let mut df = DataFrame::new(vec![
        Series::new(unit_column(base_level).into(), units).into(),
        Series::new("DISTRICT".into(), districts).into(),
    ])?;

    let mut out = Vec::new();
    CsvWriter::new(&mut out)
        .finish(&mut df)
        .context("[io::csv::write] Failed to write CSV to bytes")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_from_base_level() {
        let rows = vec![("060014001001".to_string(), 3), ("060014001002".to_string(), 0)];
        let csv = String::from_utf8(write_assignments_csv(&rows, "block").unwrap()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("BLOCKID,DISTRICT"));
        assert_eq!(lines.next(), Some("060014001001,3"));
        assert_eq!(lines.next(), Some("060014001002,0"));
    }

    #[test]
    fn reads_rows_keeping_leading_zeros() {
        let rows = read_assignments_csv(b"BLOCKID,DISTRICT\n0601,2\n0602,1\n").unwrap();
        assert_eq!(rows, vec![("0601".to_string(), 2), ("0602".to_string(), 1)]);
    }

    #[test]
    fn rejects_bad_district_values() {
        assert!(read_assignments_csv(b"BLOCKID,DISTRICT\n0601,x\n").is_err());
        assert!(read_assignments_csv(b"BLOCKID\n0601\n").is_err());
    }
}
