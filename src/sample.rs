//! Sample records and the stages that annotate them.
//!
//! A sample starts as a bare name, gains a file match from the
//! [`IdentifierResolver`], then a download status from [`check_presence`].
//! Each stage consumes the previous value, so a record can never carry a
//! status without a match or a `Present` status without a path.

use std::collections::HashMap;
use std::fmt;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, warn};

use crate::domain::FileExtension;
use crate::error::PushError;

/// Marker recorded in place of a file name when resolution fails.
pub const NOT_FOUND: &str = "Not Found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    Unknown,
    Present,
    Absent,
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadStatus::Unknown => write!(f, "Unknown"),
            DownloadStatus::Present => write!(f, "Present"),
            DownloadStatus::Absent => write!(f, "Absent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileMatch {
    Found(String),
    NotFound,
}

impl FileMatch {
    pub fn as_str(&self) -> &str {
        match self {
            FileMatch::Found(name) => name,
            FileMatch::NotFound => NOT_FOUND,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        match self {
            FileMatch::Found(name) => Some(name),
            FileMatch::NotFound => None,
        }
    }
}

impl Serialize for FileMatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    sample_name: String,
}

impl Sample {
    pub fn new(sample_name: impl Into<String>) -> Self {
        Self {
            sample_name: sample_name.into(),
        }
    }

    pub fn sample_name(&self) -> &str {
        &self.sample_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSample {
    sample_name: String,
    file_name: FileMatch,
}

impl ResolvedSample {
    pub fn sample_name(&self) -> &str {
        &self.sample_name
    }

    pub fn file_name(&self) -> &FileMatch {
        &self.file_name
    }

    pub fn status(&self) -> DownloadStatus {
        DownloadStatus::Unknown
    }
}

/// A sample after the presence check. This is the record written to the
/// per-batch snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckedSample {
    sample_name: String,
    file_name: FileMatch,
    full_filepath: Option<Utf8PathBuf>,
    file_download_status: DownloadStatus,
    biosample_accession: Option<String>,
    sra_accession: Option<String>,
}

impl CheckedSample {
    fn present(resolved: ResolvedSample, path: Utf8PathBuf) -> Self {
        Self {
            sample_name: resolved.sample_name,
            file_name: resolved.file_name,
            full_filepath: Some(path),
            file_download_status: DownloadStatus::Present,
            biosample_accession: None,
            sra_accession: None,
        }
    }

    fn absent(resolved: ResolvedSample) -> Self {
        Self {
            sample_name: resolved.sample_name,
            file_name: resolved.file_name,
            full_filepath: None,
            file_download_status: DownloadStatus::Absent,
            biosample_accession: None,
            sra_accession: None,
        }
    }

    pub fn sample_name(&self) -> &str {
        &self.sample_name
    }

    pub fn file_name(&self) -> &FileMatch {
        &self.file_name
    }

    pub fn full_filepath(&self) -> Option<&Utf8Path> {
        self.full_filepath.as_deref()
    }

    pub fn status(&self) -> DownloadStatus {
        self.file_download_status
    }

    pub fn is_present(&self) -> bool {
        self.file_download_status == DownloadStatus::Present
    }

    pub fn biosample_accession(&self) -> Option<&str> {
        self.biosample_accession.as_deref()
    }

    pub fn sra_accession(&self) -> Option<&str> {
        self.sra_accession.as_deref()
    }

    /// Identifier used for this sample inside a submission document: the
    /// matched file name, or the sample name when nothing matched.
    pub fn submission_id(&self) -> &str {
        self.file_name.file_name().unwrap_or(&self.sample_name)
    }
}

/// Splits a name on `-`, `_` and `.` and yields the all-digit tokens.
pub fn digit_tokens(name: &str) -> impl Iterator<Item = &str> {
    name.split(['-', '_', '.'])
        .filter(|token| !token.is_empty() && token.chars().all(|ch| ch.is_ascii_digit()))
}

/// Maps sample names to local file stems through their numeric tokens.
///
/// Every digit token of every candidate stem becomes a key. When two
/// candidates share a token the later one replaces the earlier one; the
/// collision is logged since it usually means two runs of the same sample.
#[derive(Debug, Clone, Default)]
pub struct IdentifierResolver {
    mapping: HashMap<String, String>,
}

impl IdentifierResolver {
    /// `stems` are file names with the extension already removed.
    pub fn from_stems<I, S>(stems: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mapping = HashMap::new();
        for stem in stems {
            let stem = stem.as_ref();
            for token in digit_tokens(stem) {
                if let Some(previous) = mapping.insert(token.to_string(), stem.to_string()) {
                    if previous != stem {
                        warn!("token {token} matches both {previous} and {stem}; using {stem}");
                    }
                }
            }
        }
        Self { mapping }
    }

    /// Candidates are file names; only those ending with `ext` are kept.
    pub fn from_file_names<I, S>(file_names: I, ext: &FileExtension) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stems: Vec<String> = file_names
            .into_iter()
            .filter_map(|name| ext.strip_from(name.as_ref()).map(str::to_string))
            .collect();
        Self::from_stems(stems)
    }

    /// Builds the mapping from a directory listing, sorted by file name.
    pub fn from_dir(dir: &Utf8Path, ext: &FileExtension) -> Result<Self, PushError> {
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| PushError::Filesystem(format!("list {dir}: {err}")))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| PushError::Filesystem(err.to_string()))?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        debug!("{} candidate files in {dir}", names.len());
        Ok(Self::from_file_names(names, ext))
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// The last digit token of the sample name decides the match.
    pub fn resolve(&self, sample: Sample) -> ResolvedSample {
        let file_name = digit_tokens(&sample.sample_name)
            .last()
            .and_then(|token| self.mapping.get(token))
            .map(|stem| FileMatch::Found(stem.clone()))
            .unwrap_or(FileMatch::NotFound);
        ResolvedSample {
            sample_name: sample.sample_name,
            file_name,
        }
    }

    pub fn resolve_all(&self, names: &[String]) -> Vec<ResolvedSample> {
        names
            .iter()
            .map(|name| self.resolve(Sample::new(name.as_str())))
            .collect()
    }
}

/// Marks each sample `Present` when `dir/<file_name><ext>` exists, `Absent`
/// otherwise. Unresolved samples are `Absent` without touching the disk.
pub fn check_presence(
    dir: &Utf8Path,
    samples: Vec<ResolvedSample>,
    ext: &FileExtension,
) -> Vec<CheckedSample> {
    samples
        .into_iter()
        .map(|sample| {
            let candidate = match &sample.file_name {
                FileMatch::Found(stem) => dir.join(ext.file_name(stem)),
                FileMatch::NotFound => return CheckedSample::absent(sample),
            };
            if candidate.as_std_path().exists() {
                CheckedSample::present(sample, candidate)
            } else {
                debug!("{} resolved but {candidate} is missing", sample.sample_name);
                CheckedSample::absent(sample)
            }
        })
        .collect()
}
