use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PushError {
    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value for {field}: {message}")]
    #[diagnostic(help("check the run configuration file"))]
    InvalidConfig { field: String, message: String },

    #[error("invalid action type: {0} (expected bs, sra or bs_sra)")]
    InvalidActionType(String),

    #[error("invalid submission type: {0} (expected Test or Production)")]
    InvalidSubmissionType(String),

    #[error("failed to read metadata table {path}: {message}")]
    MetadataRead { path: Utf8PathBuf, message: String },

    #[error("metadata table {path} has no `{column}` column")]
    MissingColumn { path: Utf8PathBuf, column: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("failed to load schema {path}: {message}")]
    Schema { path: Utf8PathBuf, message: String },

    #[error("failed to read credentials at {0}")]
    CredentialsRead(Utf8PathBuf),

    #[error("FTP transfer failed: {0}")]
    Ftp(String),

    #[error("cloud download failed: {0}")]
    CloudDownload(String),

    #[error("cloud storage returned status {status}: {message}")]
    CloudStatus { status: u16, message: String },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("invalid FASTA input: {0}")]
    Fasta(String),

    #[error("GenBank packaging failed: {0}")]
    GenbankPackage(String),
}

