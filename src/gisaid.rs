//! Conversion of GISAID upload metadata into the table the submission run
//! reads (`ncbi_metadata.csv`).

use std::collections::HashMap;

use camino::Utf8Path;
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::PushError;
use crate::metadata::{MetadataRow, MetadataTable, write_table};

pub const NCBI_METADATA_FILE: &str = "ncbi_metadata.csv";
pub const NOT_COLLECTED: &str = "not collected";

/// GISAID column → local column.
const GISAID_COLUMNS: [(&str, &str); 7] = [
    ("covv_subm_sample_id", "ID"),
    ("covv_collection_date", "collection_date"),
    ("covv_location", "geo_loc_name"),
    ("covv_virus_name", "isolate"),
    ("covv_specimen", "isolation_source"),
    ("covv_authors", "collected_by_1"),
    ("covv_orig_lab", "collected_by_2"),
];

const LOCAL_COLUMNS: [&str; 3] = ["gisaid_accession", "gb_accession", "host"];

pub const OUTPUT_COLUMNS: [&str; 13] = [
    "sample_name",
    "collection_date",
    "geo_loc_name",
    "isolate",
    "isolation_source",
    "collection_method",
    "gisaid_accession",
    "gisaid_virus_name",
    "host",
    "bioproject_accession",
    "host_disease",
    "collected_by",
    "vaccine_received",
];

const EXCLUDED_COLLECTOR: &str = "Helix";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConversionSummary {
    pub input_rows: usize,
    pub written_rows: usize,
}

/// Maps original author strings to their preferred spelling.
#[derive(Debug, Clone, Default)]
pub struct AuthorConversions {
    table: HashMap<String, String>,
}

impl AuthorConversions {
    /// Reads a CSV with `authors_original` and `authors_new` columns.
    pub fn read(path: &Utf8Path) -> Result<Self, PushError> {
        let table = MetadataTable::read(path)?;
        table.require_column(path, "authors_original")?;
        table.require_column(path, "authors_new")?;
        let mut conversions = HashMap::new();
        for row in table.rows() {
            if let (Some(original), Some(new)) = (row.get("authors_original"), row.get("authors_new")) {
                conversions
                    .entry(original.to_string())
                    .or_insert_with(|| new.to_string());
            }
        }
        Ok(Self { table: conversions })
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        Self {
            table: pairs
                .into_iter()
                .map(|(from, to)| (from.into(), to.into()))
                .collect(),
        }
    }

    fn convert(&self, authors: &str) -> Option<String> {
        self.table.get(authors).cloned()
    }
}

/// `"A with the help of B"`, `A`, `B` or `"Unknown"`.
pub fn compose_collected_by(authors: Option<&str>, lab: Option<&str>) -> String {
    match (authors, lab) {
        (Some(authors), Some(lab)) => format!("{authors} with the help of {lab}"),
        (Some(authors), None) => authors.to_string(),
        (None, Some(lab)) => lab.to_string(),
        (None, None) => "Unknown".to_string(),
    }
}

/// Normalizes common date spellings to `YYYY-MM-DD`.
pub fn normalize_date(value: &str) -> Option<String> {
    const FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%m/%d/%y", "%d-%b-%Y"];
    let value = value.trim();
    let date_part = value.split(['T', ' ']).next().unwrap_or(value);
    FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
}

pub struct MetadataConverter<'a> {
    pub bioproject: &'a str,
    /// When absent, GISAID author strings are used unchanged.
    pub authors: Option<&'a AuthorConversions>,
}

impl MetadataConverter<'_> {
    pub fn convert(&self, gisaid: &MetadataTable, local: &MetadataTable) -> Vec<MetadataRow> {
        let mut submitted: HashMap<&str, &MetadataRow> = HashMap::new();
        for row in gisaid.rows() {
            if let Some(id) = row.get("covv_subm_sample_id") {
                submitted.entry(id.trim()).or_insert(row);
            }
        }

        let mut out = Vec::new();
        for row in local.rows() {
            let Some(id) = row.get("ID").map(str::trim) else {
                continue;
            };
            let Some(gisaid_row) = submitted.get(id) else {
                continue;
            };
            if row.get("host") == Some("Environment") {
                continue;
            }
            if let Some(converted) = self.convert_row(id, row, gisaid_row) {
                out.push(converted);
            }
        }
        out
    }

    fn convert_row(&self, id: &str, local: &MetadataRow, gisaid: &MetadataRow) -> Option<MetadataRow> {
        let mut merged: IndexMap<&str, Option<String>> = IndexMap::new();
        for column in LOCAL_COLUMNS {
            merged.insert(column, local.get(column).map(str::to_string));
        }
        for (from, to) in GISAID_COLUMNS {
            merged.insert(to, gisaid.get(from).map(str::to_string));
        }
        let field = |name: &str| merged.get(name).cloned().flatten();

        let first = match self.authors {
            Some(authors) => field("collected_by_1").and_then(|value| authors.convert(&value)),
            None => field("collected_by_1"),
        };
        let collected_by = compose_collected_by(first.as_deref(), field("collected_by_2").as_deref());
        if collected_by.contains(EXCLUDED_COLLECTOR) {
            return None;
        }
        let gisaid_accession = field("gisaid_accession")?;

        let or_default = |value: Option<String>| value.unwrap_or_else(|| NOT_COLLECTED.to_string());
        let collection_date = match field("collection_date") {
            Some(date) => normalize_date(&date).unwrap_or_else(|| {
                warn!("{id}: unrecognised collection date {date:?}");
                date
            }),
            None => NOT_COLLECTED.to_string(),
        };
        let geo_loc_name = or_default(field("geo_loc_name").map(|name| name.replace('/', ":")));
        let isolate = or_default(field("isolate").map(|name| name.replace("N/A", NOT_COLLECTED)));
        let isolation_source = or_default(field("isolation_source"));

        let mut row = MetadataRow::default();
        row.set("sample_name", id);
        row.set("collection_date", collection_date);
        row.set("geo_loc_name", geo_loc_name);
        row.set("isolate", isolate.clone());
        row.set("isolation_source", isolation_source.clone());
        row.set("collection_method", isolation_source);
        row.set("gisaid_accession", gisaid_accession);
        row.set("gisaid_virus_name", isolate);
        row.set("host", "Homo Sapiens");
        row.set("bioproject_accession", self.bioproject);
        row.set("host_disease", "COVID-19");
        row.set("collected_by", collected_by);
        row.set("vaccine_received", NOT_COLLECTED);
        Some(row)
    }
}

pub fn convert_metadata(
    gisaid_path: &Utf8Path,
    local_path: &Utf8Path,
    bioproject: &str,
    authors_path: Option<&Utf8Path>,
    output: &Utf8Path,
) -> Result<ConversionSummary, PushError> {
    let gisaid = MetadataTable::read(gisaid_path)?;
    gisaid.require_column(gisaid_path, "covv_subm_sample_id")?;
    let local = MetadataTable::read(local_path)?;
    local.require_column(local_path, "ID")?;
    let authors = authors_path.map(AuthorConversions::read).transpose()?;

    let converter = MetadataConverter {
        bioproject,
        authors: authors.as_ref(),
    };
    let rows = converter.convert(&gisaid, &local);
    let headers: Vec<String> = OUTPUT_COLUMNS.iter().map(|c| c.to_string()).collect();
    write_table(output, b',', &headers, &rows)?;
    info!("wrote {} of {} rows to {output}", rows.len(), local.len());

    Ok(ConversionSummary {
        input_rows: local.len(),
        written_rows: rows.len(),
    })
}
