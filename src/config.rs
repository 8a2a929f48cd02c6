use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::domain::{ActionType, FileExtension, SubmissionType};
use crate::error::PushError;

/// Batch size used when `batch_submission` is enabled.
pub const BATCH_SIZE: usize = 8000;

pub const DEFAULT_FTP_HOST: &str = "ftp-private.ncbi.nlm.nih.gov";

/// Nanopore runs that never go through this pipeline.
pub const DEFAULT_EXCLUDED_SAMPLES: [&str; 4] = [
    "SEARCH-103878",
    "SEARCH-5574-SAN",
    "SEARCH-5742-SAN",
    "SEARCH-5743-SAN",
];

/// Keys every `sra` section must carry besides `file_type`.
pub const SRA_LIBRARY_KEYS: [&str; 7] = [
    "instrument_model",
    "library_name",
    "library_strategy",
    "library_source",
    "library_selection",
    "library_layout",
    "library_construction_protocol",
];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub project_name: ProjectSection,
    pub file_download_info: FileDownloadSection,
    pub submission: SubmissionInfo,
    pub sra: SraSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ncbi_ftp: Option<FtpSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_sample_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectSection {
    pub action_name: String,
    pub action_type: String,
    pub submission_type: String,
    pub batch_submission: FlexBool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileDownloadSection {
    pub local_download_dir: String,
    #[serde(default)]
    pub credentials_path: String,
    #[serde(default)]
    pub bucket_name: String,
    #[serde(default)]
    pub blob_name: String,
    #[serde(default)]
    pub multiprocess: FlexBool,
    #[serde(default)]
    pub download_files: FlexBool,
    pub metadata_location: String,
    #[serde(default)]
    pub target_sample_names: SampleList,
}

/// Contact and BioSample descriptor fields shared by every document of a run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SubmissionInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub hold: String,
    pub organization: String,
    pub bioproject_id: String,
    pub spuid_namespace: String,
    pub title: String,
    pub organism: String,
    pub package: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SraSection {
    pub file_type: String,
    #[serde(flatten)]
    pub library: IndexMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FtpSection {
    #[serde(default)]
    pub host: Option<String>,
    pub credentials_path: String,
    #[serde(default)]
    pub passive: Option<bool>,
    #[serde(default)]
    pub inter_file_delay_secs: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Booleans arrive either as JSON booleans or as `"True"`/`"False"` text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlexBool {
    Bool(bool),
    Text(String),
}

impl Default for FlexBool {
    fn default() -> Self {
        FlexBool::Bool(false)
    }
}

impl FlexBool {
    pub fn resolve(&self, field: &str) -> Result<bool, PushError> {
        match self {
            FlexBool::Bool(value) => Ok(*value),
            FlexBool::Text(text) => match text.trim() {
                "True" | "true" | "1" | "yes" => Ok(true),
                "False" | "false" | "0" | "no" | "" => Ok(false),
                other => Err(PushError::InvalidConfig {
                    field: field.to_string(),
                    message: format!("expected a boolean, found {other:?}"),
                }),
            },
        }
    }
}

/// Sample lists arrive as JSON arrays, list literal text or the text `None`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SampleList {
    List(Vec<String>),
    Text(String),
}

impl Default for SampleList {
    fn default() -> Self {
        SampleList::Text("None".to_string())
    }
}

impl SampleList {
    pub fn resolve(&self) -> Result<Option<Vec<String>>, PushError> {
        match self {
            SampleList::List(names) => Ok(Some(names.clone())),
            SampleList::Text(text) => parse_literal_list(text),
        }
    }
}

/// Parses `None`, `['a', 'b']` or `["a", "b"]`.
pub fn parse_literal_list(text: &str) -> Result<Option<Vec<String>>, PushError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "None" || trimmed == "null" {
        return Ok(None);
    }
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| PushError::InvalidConfig {
            field: "file_download_info.target_sample_names".to_string(),
            message: format!("expected None or a list, found {trimmed:?}"),
        })?;

    let mut names = Vec::new();
    for item in inner.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let unquoted = item
            .strip_prefix('\'')
            .and_then(|rest| rest.strip_suffix('\''))
            .or_else(|| item.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')))
            .unwrap_or(item);
        names.push(unquoted.to_string());
    }
    Ok(Some(names))
}

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub local_download_dir: Utf8PathBuf,
    pub credentials_path: Option<Utf8PathBuf>,
    pub bucket_name: String,
    pub blob_name: String,
    pub multiprocess: bool,
    pub download_files: bool,
}

#[derive(Debug, Clone)]
pub struct SraSettings {
    pub file_type: FileExtension,
    /// Instrument and library attributes, emitted once per SRA action.
    pub library: IndexMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct FtpSettings {
    pub host: String,
    pub credentials_path: Utf8PathBuf,
    pub passive: bool,
    pub inter_file_delay: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub action_name: String,
    pub action_type: ActionType,
    pub submission_type: SubmissionType,
    pub batch_size: usize,
    pub download: DownloadSettings,
    pub metadata_location: Utf8PathBuf,
    pub target_sample_names: Option<Vec<String>>,
    pub excluded_sample_names: Vec<String>,
    pub output_dir: Utf8PathBuf,
    pub schema_path: Option<Utf8PathBuf>,
    pub submission: SubmissionInfo,
    pub sra: SraSettings,
    pub ftp: Option<FtpSettings>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: &Utf8Path) -> Result<RunConfig, PushError> {
        let content =
            fs::read_to_string(path).map_err(|_| PushError::ConfigRead(path.to_path_buf()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|err| PushError::ConfigParse(err.to_string()))?;
        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<RunConfig, PushError> {
        let project = config.project_name;
        let download = config.file_download_info;

        if project.action_name.trim().is_empty() {
            return Err(PushError::InvalidConfig {
                field: "project_name.action_name".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        let action_type: ActionType = project.action_type.parse()?;
        let submission_type: SubmissionType = project.submission_type.parse()?;
        let batched = project
            .batch_submission
            .resolve("project_name.batch_submission")?;
        let batch_size = match (batched, config.batch_size) {
            (false, _) => 1,
            (true, Some(0)) => {
                return Err(PushError::InvalidConfig {
                    field: "batch_size".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            (true, Some(size)) => size,
            (true, None) => BATCH_SIZE,
        };

        let metadata_location = Utf8PathBuf::from(download.metadata_location.trim());
        let output_dir = match config.output_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => metadata_location
                .parent()
                .map(Utf8Path::to_path_buf)
                .unwrap_or_else(|| Utf8PathBuf::from(".")),
        };
        let output_dir = if output_dir.as_str().is_empty() {
            Utf8PathBuf::from(".")
        } else {
            output_dir
        };

        let download_settings = DownloadSettings {
            local_download_dir: Utf8PathBuf::from(download.local_download_dir.trim()),
            credentials_path: non_empty(&download.credentials_path).map(Utf8PathBuf::from),
            bucket_name: download.bucket_name,
            blob_name: download.blob_name,
            multiprocess: download
                .multiprocess
                .resolve("file_download_info.multiprocess")?,
            download_files: download
                .download_files
                .resolve("file_download_info.download_files")?,
        };

        let sra = resolve_sra(config.sra)?;
        let ftp = config.ncbi_ftp.map(resolve_ftp);

        Ok(RunConfig {
            action_name: project.action_name.trim().to_string(),
            action_type,
            submission_type,
            batch_size,
            download: download_settings,
            metadata_location,
            target_sample_names: download.target_sample_names.resolve()?,
            excluded_sample_names: config.excluded_sample_names.unwrap_or_else(|| {
                DEFAULT_EXCLUDED_SAMPLES
                    .iter()
                    .map(|name| name.to_string())
                    .collect()
            }),
            output_dir,
            schema_path: config.schema_path.as_deref().and_then(non_empty).map(Utf8PathBuf::from),
            submission: config.submission,
            sra,
            ftp,
        })
    }
}

fn resolve_sra(section: SraSection) -> Result<SraSettings, PushError> {
    let file_type: FileExtension = section.file_type.parse()?;
    for key in SRA_LIBRARY_KEYS {
        if !section.library.contains_key(key) {
            return Err(PushError::InvalidConfig {
                field: format!("sra.{key}"),
                message: "missing".to_string(),
            });
        }
    }
    Ok(SraSettings {
        file_type,
        library: section.library,
    })
}

fn resolve_ftp(section: FtpSection) -> FtpSettings {
    FtpSettings {
        host: section
            .host
            .filter(|host| !host.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FTP_HOST.to_string()),
        credentials_path: Utf8PathBuf::from(section.credentials_path),
        passive: section.passive.unwrap_or(true),
        inter_file_delay: Duration::from_secs(section.inter_file_delay_secs.unwrap_or(10)),
        timeout: Duration::from_secs(section.timeout_secs.unwrap_or(300)),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Contact details that `write-config` cannot default.
#[derive(Debug, Clone)]
pub struct Contact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub organization: String,
}

impl Config {
    /// The lab's standard BioSample + SRA production run over local BAM files.
    pub fn lab_defaults(
        metadata_location: &Utf8Path,
        bam_dir: &Utf8Path,
        contact: Contact,
        credentials_path: Option<&Utf8Path>,
        hold: &str,
    ) -> Self {
        let library = [
            ("instrument_model", "Illumina NovaSeq 6000"),
            ("library_name", "SEARCH"),
            ("library_strategy", "AMPLICON"),
            ("library_source", "VIRAL RNA"),
            ("library_selection", "RT-PCR"),
            ("library_layout", "PAIRED"),
            (
                "library_construction_protocol",
                "A detailed protocol can be found at https://searchcovid.info/protocols/",
            ),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();

        Config {
            project_name: ProjectSection {
                action_name: "hcov-19_submission".to_string(),
                action_type: ActionType::BioSampleSra.as_str().to_string(),
                submission_type: SubmissionType::Production.to_string(),
                batch_submission: FlexBool::Text("True".to_string()),
            },
            file_download_info: FileDownloadSection {
                local_download_dir: bam_dir.to_string(),
                credentials_path: credentials_path.map(|p| p.to_string()).unwrap_or_default(),
                bucket_name: "andersen-lab_hcov-19-genomics".to_string(),
                blob_name: "bam_files/illumina".to_string(),
                multiprocess: FlexBool::Text("True".to_string()),
                download_files: FlexBool::Text("False".to_string()),
                metadata_location: metadata_location.to_string(),
                target_sample_names: SampleList::default(),
            },
            submission: SubmissionInfo {
                first_name: contact.first_name,
                last_name: contact.last_name,
                email: contact.email,
                hold: hold.to_string(),
                organization: contact.organization,
                bioproject_id: "PRJNA612578".to_string(),
                spuid_namespace: "SEARCH".to_string(),
                title: "hcov-19 genomics".to_string(),
                organism: "Severe acute respiratory syndrome coronavirus 2".to_string(),
                package: "SARS-CoV-2.cl.1.0".to_string(),
            },
            sra: SraSection {
                file_type: "bam".to_string(),
                library,
            },
            ncbi_ftp: None,
            excluded_sample_names: None,
            output_dir: None,
            schema_path: None,
            batch_size: None,
        }
    }

    pub fn write(&self, path: &Utf8Path) -> Result<(), PushError> {
        let content = serde_json::to_vec_pretty(self)
            .map_err(|err| PushError::Filesystem(err.to_string()))?;
        crate::store::write_bytes_atomic(path, &content)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn literal_lists() {
        assert_eq!(parse_literal_list("None").unwrap(), None);
        assert_eq!(
            parse_literal_list("['SEARCH-1', \"SEARCH-2\"]").unwrap(),
            Some(vec!["SEARCH-1".to_string(), "SEARCH-2".to_string()])
        );
        assert_eq!(parse_literal_list("[]").unwrap(), Some(Vec::new()));
        let err = parse_literal_list("SEARCH-1").unwrap_err();
        assert_matches!(err, PushError::InvalidConfig { .. });
    }

    #[test]
    fn bool_text() {
        assert!(FlexBool::Text("True".to_string()).resolve("x").unwrap());
        assert!(!FlexBool::Text("False".to_string()).resolve("x").unwrap());
        assert!(FlexBool::Bool(true).resolve("x").unwrap());
        assert!(FlexBool::Text("maybe".to_string()).resolve("x").is_err());
    }
}
