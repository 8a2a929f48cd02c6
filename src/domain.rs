use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PushError;

/// Which NCBI databases a submission targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "bs")]
    BioSample,
    #[serde(rename = "sra")]
    Sra,
    #[serde(rename = "bs_sra")]
    BioSampleSra,
}

impl ActionType {
    pub fn includes_biosample(self) -> bool {
        matches!(self, ActionType::BioSample | ActionType::BioSampleSra)
    }

    pub fn includes_sra(self) -> bool {
        matches!(self, ActionType::Sra | ActionType::BioSampleSra)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::BioSample => "bs",
            ActionType::Sra => "sra",
            ActionType::BioSampleSra => "bs_sra",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ActionType::BioSample => "BioSample",
            ActionType::Sra => "SRA",
            ActionType::BioSampleSra => "BioSample and SRA",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = PushError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "bs" => Ok(ActionType::BioSample),
            "sra" => Ok(ActionType::Sra),
            "bs_sra" => Ok(ActionType::BioSampleSra),
            _ => Err(PushError::InvalidActionType(value.to_string())),
        }
    }
}

/// NCBI keeps test and production submissions in separate upload areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionType {
    Test,
    Production,
}

impl SubmissionType {
    pub fn remote_dir(self) -> &'static str {
        match self {
            SubmissionType::Test => "submit/Test",
            SubmissionType::Production => "submit/Production",
        }
    }
}

impl fmt::Display for SubmissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionType::Test => write!(f, "Test"),
            SubmissionType::Production => write!(f, "Production"),
        }
    }
}

impl FromStr for SubmissionType {
    type Err = PushError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "Test" | "test" => Ok(SubmissionType::Test),
            "Production" | "production" => Ok(SubmissionType::Production),
            _ => Err(PushError::InvalidSubmissionType(value.to_string())),
        }
    }
}

/// A file extension, always stored with its leading dot (`.bam`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Appends the extension to a bare file stem.
    pub fn file_name(&self, stem: &str) -> String {
        format!("{stem}{}", self.0)
    }

    pub fn strip_from<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        file_name
            .strip_suffix(self.0.as_str())
            .filter(|stem| !stem.is_empty())
    }
}

impl fmt::Display for FileExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileExtension {
    type Err = PushError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim().trim_start_matches('.');
        let is_valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' || ch == '-');
        if !is_valid {
            return Err(PushError::InvalidConfig {
                field: "sra.file_type".to_string(),
                message: format!("not a file extension: {value:?}"),
            });
        }
        Ok(Self(format!(".{trimmed}")))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn action_type_parts() {
        let both: ActionType = "bs_sra".parse().unwrap();
        assert!(both.includes_biosample());
        assert!(both.includes_sra());

        let bs: ActionType = "bs".parse().unwrap();
        assert!(bs.includes_biosample());
        assert!(!bs.includes_sra());

        let err = "sra_bs".parse::<ActionType>().unwrap_err();
        assert_matches!(err, PushError::InvalidActionType(_));
    }

    #[test]
    fn extension_is_normalized() {
        let bare: FileExtension = "bam".parse().unwrap();
        let dotted: FileExtension = ".bam".parse().unwrap();
        assert_eq!(bare, dotted);
        assert_eq!(bare.file_name("run1_100"), "run1_100.bam");
        assert_eq!(bare.strip_from("run1_100.bam"), Some("run1_100"));
        assert_eq!(bare.strip_from("run1_100.bam.bai"), None);
        assert_eq!(bare.strip_from(".bam"), None);
    }

    #[test]
    fn submission_remote_dirs() {
        let test: SubmissionType = "Test".parse().unwrap();
        assert_eq!(test.remote_dir(), "submit/Test");
        assert_eq!(SubmissionType::Production.remote_dir(), "submit/Production");
    }
}
