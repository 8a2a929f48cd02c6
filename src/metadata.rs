use std::collections::HashMap;

use camino::Utf8Path;
use indexmap::IndexMap;

use crate::error::PushError;

pub const SAMPLE_NAME_COLUMN: &str = "sample_name";
pub const VIRUS_NAME_COLUMN: &str = "gisaid_virus_name";

/// Cell values treated as missing, matching the usual CSV NA conventions.
const MISSING_MARKERS: [&str; 19] = [
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

pub fn is_missing(value: &str) -> bool {
    let trimmed = value.trim();
    MISSING_MARKERS.contains(&trimmed)
}

/// One row of a metadata table, keyed by column name in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRow {
    values: IndexMap<String, String>,
}

impl MetadataRow {
    pub fn new(values: IndexMap<String, String>) -> Self {
        Self { values }
    }

    /// The value of `column`, or `None` when absent or missing.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .get(column)
            .map(String::as_str)
            .filter(|value| !is_missing(value))
    }

    /// The raw cell text, missing markers included.
    pub fn raw(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        self.values.insert(column.to_string(), value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<String> {
        self.values.shift_remove(column)
    }

    /// Column/value pairs with missing values dropped.
    pub fn present_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .filter(|(_, value)| !is_missing(value))
            .map(|(key, value)| (key.as_str(), value.trim()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    headers: Vec<String>,
    rows: Vec<MetadataRow>,
    index: HashMap<String, usize>,
}

impl MetadataTable {
    pub fn read(path: &Utf8Path) -> Result<Self, PushError> {
        Self::read_delimited(path, b',')
    }

    pub fn read_delimited(path: &Utf8Path, delimiter: u8) -> Result<Self, PushError> {
        let read_err = |message: String| PushError::MetadataRead {
            path: path.to_path_buf(),
            message,
        };
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_path(path.as_std_path())
            .map_err(|err| read_err(err.to_string()))?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|err| read_err(err.to_string()))?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| read_err(err.to_string()))?;
            let values = headers
                .iter()
                .enumerate()
                .map(|(i, header)| (header.clone(), record.get(i).unwrap_or("").to_string()))
                .collect();
            rows.push(MetadataRow::new(values));
        }
        Ok(Self::from_rows(headers, rows))
    }

    pub fn from_rows(headers: Vec<String>, rows: Vec<MetadataRow>) -> Self {
        let mut table = Self {
            headers,
            rows,
            index: HashMap::new(),
        };
        table.reindex();
        table
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, row) in self.rows.iter().enumerate() {
            if let Some(name) = row.raw(SAMPLE_NAME_COLUMN) {
                // first occurrence wins
                self.index.entry(name.trim().to_string()).or_insert(i);
            }
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[MetadataRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|header| header == column)
    }

    pub fn require_column(&self, path: &Utf8Path, column: &str) -> Result<(), PushError> {
        if self.has_column(column) {
            return Ok(());
        }
        Err(PushError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        })
    }

    /// Every `sample_name`, in table order.
    pub fn sample_names(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.get(SAMPLE_NAME_COLUMN))
            .map(|name| name.trim().to_string())
            .collect()
    }

    /// The first row whose `sample_name` equals `sample_name`.
    pub fn row(&self, sample_name: &str) -> Option<&MetadataRow> {
        self.index.get(sample_name).map(|&i| &self.rows[i])
    }

    pub fn write(&self, path: &Utf8Path, delimiter: u8) -> Result<(), PushError> {
        write_table(path, delimiter, &self.headers, &self.rows)
    }
}

/// Writes `rows` projected onto `headers`; absent cells are written empty.
pub fn write_table(
    path: &Utf8Path,
    delimiter: u8,
    headers: &[String],
    rows: &[MetadataRow],
) -> Result<(), PushError> {
    let write_err = |err: csv::Error| PushError::Filesystem(format!("write {path}: {err}"));
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(path.as_std_path())
        .map_err(write_err)?;
    writer.write_record(headers).map_err(write_err)?;
    for row in rows {
        let record: Vec<&str> = headers
            .iter()
            .map(|header| row.raw(header).unwrap_or(""))
            .collect();
        writer.write_record(&record).map_err(write_err)?;
    }
    writer
        .flush()
        .map_err(|err| PushError::Filesystem(format!("write {path}: {err}")))?;
    Ok(())
}

/// Loads the ordered sample names a run should consider.
pub fn load_sample_names(
    metadata_location: &Utf8Path,
    targets: Option<&[String]>,
    excluded: &[String],
) -> Result<Vec<String>, PushError> {
    let names = match targets {
        Some(targets) => targets.to_vec(),
        None => {
            let table = MetadataTable::read(metadata_location)?;
            table.require_column(metadata_location, SAMPLE_NAME_COLUMN)?;
            table.sample_names()
        }
    };
    Ok(names
        .into_iter()
        .filter(|name| !excluded.contains(name))
        .collect())
}
