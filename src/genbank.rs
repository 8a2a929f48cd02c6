//! GenBank upload preparation: the `source.src` modifier table and the
//! zipped submission package.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::SubmissionInfo;
use crate::error::PushError;
use crate::fs_util;
use crate::metadata::{MetadataRow, MetadataTable, SAMPLE_NAME_COLUMN, write_table};
use crate::store;
use crate::submission::{Action, Description, GenbankAction, SUBMISSION_FILE, SubmissionDocument};

pub const SOURCE_FILE: &str = "source.src";
pub const PACKAGE_FILE: &str = "genbank.zip";
pub const ORGANISM: &str = "Severe acute respiratory syndrome coronavirus 2";
pub const DEFAULT_BIOPROJECT: &str = "PRJNA612578";

/// Extensions bundled into the package.
const PACKAGE_SUFFIXES: [&str; 3] = [".fsa", ".src", ".sbt"];

pub const SOURCE_COLUMNS: [&str; 9] = [
    "sequence_ID",
    "organism",
    "isolate",
    "country",
    "collection-date",
    "host",
    "isolation-source",
    "BioProject",
    "Note",
];

/// `North America: USA: California` → `USA`.
fn country(geo_loc_name: &str) -> String {
    let country = geo_loc_name
        .split(':')
        .nth(1)
        .unwrap_or(geo_loc_name)
        .trim();
    if country == "MEX" {
        "Mexico".to_string()
    } else {
        country.to_string()
    }
}

/// `hCoV-19/USA/CA-SEARCH-1/2020` collected in 2021 →
/// `SARS-CoV-2/human/USA/CA-SEARCH-1/2021`.
fn isolate(virus_name: &str, collection_date: &str) -> String {
    let renamed = virus_name.replace("hCoV-19", "SARS-CoV-2/human");
    let prefix = match renamed.rfind('/') {
        Some(index) => &renamed[..index],
        None => "",
    };
    let year = collection_date.split('-').next().unwrap_or("");
    format!("{prefix}/{year}")
}

pub fn source_row(row: &MetadataRow, bioproject: &str) -> MetadataRow {
    let value = |column: &str| row.get(column).unwrap_or("").to_string();
    let collection_date = value("collection_date");

    let mut out = MetadataRow::default();
    out.set("sequence_ID", value(SAMPLE_NAME_COLUMN));
    out.set("organism", ORGANISM);
    out.set("isolate", isolate(&value("gisaid_virus_name"), &collection_date));
    out.set("country", country(&value("geo_loc_name")));
    out.set("collection-date", collection_date);
    out.set("host", value("host").replace("Human", "Homo Sapiens"));
    out.set("isolation-source", value("collection_method"));
    out.set("BioProject", bioproject);
    out.set("Note", value("gisaid_accession"));
    out
}

/// Writes the tab separated source modifier table for every metadata row.
pub fn write_source_table(
    metadata_path: &Utf8Path,
    output: &Utf8Path,
    bioproject: &str,
) -> Result<usize, PushError> {
    let table = MetadataTable::read(metadata_path)?;
    for column in [SAMPLE_NAME_COLUMN, "geo_loc_name", "gisaid_virus_name"] {
        table.require_column(metadata_path, column)?;
    }
    let rows: Vec<MetadataRow> = table
        .rows()
        .iter()
        .map(|row| source_row(row, bioproject))
        .collect();
    let headers: Vec<String> = SOURCE_COLUMNS.iter().map(|c| c.to_string()).collect();
    write_table(output, b'\t', &headers, &rows)?;
    info!("wrote {} source rows to {output}", rows.len());
    Ok(rows.len())
}

#[derive(Debug, Clone, Serialize)]
pub struct GenbankPackage {
    pub archive: Utf8PathBuf,
    pub entries: Vec<String>,
    pub submission: Utf8PathBuf,
}

pub struct PackageRequest<'a> {
    pub out_dir: &'a Utf8Path,
    pub fasta: &'a Utf8Path,
    pub template: &'a Utf8Path,
    pub info: &'a SubmissionInfo,
    pub comment: &'a str,
    pub date: NaiveDate,
}

/// Copies the FASTA and `.sbt` template into `out_dir`, zips every
/// `.fsa`/`.src`/`.sbt` there into `genbank.zip` and writes the matching
/// `submission.xml`.
pub fn build_package(request: &PackageRequest<'_>) -> Result<GenbankPackage, PushError> {
    let out_dir = request.out_dir;
    fs::create_dir_all(out_dir.as_std_path())
        .map_err(|err| PushError::Filesystem(format!("create {out_dir}: {err}")))?;
    copy_into(request.fasta, out_dir)?;
    copy_into(request.template, out_dir)?;

    let mut files = Vec::new();
    for suffix in PACKAGE_SUFFIXES {
        files.extend(store::list_files_with_suffix(out_dir, suffix)?);
    }
    if !files.iter().any(|file| file.as_str().ends_with(".fsa")) {
        return Err(PushError::GenbankPackage(format!(
            "no .fsa file in {out_dir}; the sequences must use the .fsa extension"
        )));
    }
    if !files.iter().any(|file| file.as_str().ends_with(".src")) {
        warn!("no .src source table in {out_dir}");
    }

    let archive = out_dir.join(PACKAGE_FILE);
    fs_util::create_zip(&archive, &files)?;
    let entries = fs_util::validate_zip(&archive)?;

    let mut document =
        SubmissionDocument::new(Description::from_info(request.info, request.comment));
    document.actions.push(Action::Genbank(GenbankAction {
        file_path: PACKAGE_FILE.to_string(),
        spuid: format!("{}.sarscov2", request.date.format("%Y-%m-%d")),
    }));
    let submission = out_dir.join(SUBMISSION_FILE);
    document.write(&submission)?;

    Ok(GenbankPackage {
        archive,
        entries,
        submission,
    })
}

fn copy_into(source: &Utf8Path, dir: &Utf8Path) -> Result<(), PushError> {
    let name = source
        .file_name()
        .ok_or_else(|| PushError::GenbankPackage(format!("{source} is not a file")))?;
    let target = dir.join(name);
    if target.as_path() == source {
        return Ok(());
    }
    fs::copy(source.as_std_path(), target.as_std_path())
        .map_err(|err| PushError::Filesystem(format!("copy {source} to {target}: {err}")))?;
    Ok(())
}
