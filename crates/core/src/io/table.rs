//! CSV and JSON tables exchanged between pipeline stages

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Read every row of a headed CSV file into `T`
pub fn read_records<T, P>(path: P) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path.as_ref())?;
    reader
        .deserialize()
        .map(|row| row.map_err(Error::from))
        .collect()
}

/// Write rows as a headed CSV file
pub fn write_records<T, P>(path: P, rows: &[T]) -> Result<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a pretty-printed JSON document
pub fn read_json<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Write a value as pretty-printed JSON
pub fn write_json<T, P>(path: P, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

/// A table keyed by an id column with an arbitrary set of numeric columns.
///
/// Used for site covariates, whose columns depend on configured layers and
/// land-cover classes. Empty or `NA` cells read as NaN.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CovariateTable {
    pub id_column: String,
    pub columns: Vec<String>,
    pub ids: Vec<String>,
    /// Row-major values, `ids.len() * columns.len()`
    values: Vec<f64>,
}

impl CovariateTable {
    pub fn new(id_column: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            id_column: id_column.into(),
            columns,
            ids: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn push_row(&mut self, id: impl Into<String>, row: Vec<f64>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::SizeMismatch {
                er: 1,
                ec: self.columns.len(),
                ar: 1,
                ac: row.len(),
            });
        }
        self.ids.push(id.into());
        self.values.extend(row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let k = self.columns.len();
        &self.values[i * k..(i + 1) * k]
    }

    pub fn get(&self, i: usize, column: &str) -> Option<f64> {
        self.column_index(column).map(|j| self.row(i)[j])
    }

    /// Map from id to row index
    pub fn index(&self) -> HashMap<&str, usize> {
        self.ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect()
    }

    pub fn read<P: AsRef<Path>>(path: P, id_column: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path.as_ref())?;
        let headers = reader.headers()?.clone();
        let id_pos = headers
            .iter()
            .position(|h| h == id_column)
            .ok_or_else(|| Error::MissingColumn(id_column.to_string()))?;
        let columns: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id_pos)
            .map(|(_, h)| h.to_string())
            .collect();

        let mut table = Self::new(id_column, columns);
        for record in reader.records() {
            let record = record?;
            let mut row = Vec::with_capacity(table.columns.len());
            for (i, field) in record.iter().enumerate() {
                if i == id_pos {
                    continue;
                }
                row.push(parse_cell(field)?);
            }
            let id = record.get(id_pos).unwrap_or_default().to_string();
            table.push_row(id, row)?;
        }
        Ok(table)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        let mut header = vec![self.id_column.as_str()];
        header.extend(self.columns.iter().map(String::as_str));
        writer.write_record(&header)?;
        for (i, id) in self.ids.iter().enumerate() {
            let mut record = vec![id.clone()];
            record.extend(self.row(i).iter().map(|v| format_cell(*v)));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn parse_cell(field: &str) -> Result<f64> {
    if field.is_empty() || field.eq_ignore_ascii_case("na") || field.eq_ignore_ascii_case("nan") {
        return Ok(f64::NAN);
    }
    field.parse().map_err(|_| Error::Parse {
        field: "covariate",
        value: field.to_string(),
    })
}

fn format_cell(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}
