use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use ncbi_batch_push::config::{
    BATCH_SIZE, Config, ConfigLoader, Contact, DEFAULT_EXCLUDED_SAMPLES, DEFAULT_FTP_HOST,
};
use ncbi_batch_push::domain::{ActionType, SubmissionType};
use ncbi_batch_push::error::PushError;

const CONFIG: &str = r#"{
  "project_name": {
    "action_name": "hcov-19_submission",
    "action_type": "bs_sra",
    "submission_type": "Production",
    "batch_submission": "True"
  },
  "file_download_info": {
    "local_download_dir": "/data/bams",
    "credentials_path": "/keys/gcs.json",
    "bucket_name": "andersen-lab_hcov-19-genomics",
    "blob_name": "bam_files/illumina",
    "multiprocess": "True",
    "download_files": "False",
    "metadata_location": "/data/meta/metadata.csv",
    "target_sample_names": "['SEARCH-100', 'SEARCH-200']"
  },
  "submission": {
    "first_name": "Ada",
    "last_name": "Lovelace",
    "email": "ada@example.org",
    "hold": "2021-06-01",
    "organization": "Example Lab",
    "bioproject_id": "PRJNA612578",
    "spuid_namespace": "SEARCH",
    "title": "hcov-19 genomics",
    "organism": "Severe acute respiratory syndrome coronavirus 2",
    "package": "SARS-CoV-2.cl.1.0"
  },
  "sra": {
    "file_type": "bam",
    "instrument_model": "Illumina NovaSeq 6000",
    "library_name": "SEARCH",
    "library_strategy": "AMPLICON",
    "library_source": "VIRAL RNA",
    "library_selection": "RT-PCR",
    "library_layout": "PAIRED",
    "library_construction_protocol": "protocol"
  }
}"#;

fn parse(text: &str) -> Config {
    serde_json::from_str(text).unwrap()
}

#[test]
fn resolves_full_config() {
    let resolved = ConfigLoader::resolve_config(parse(CONFIG)).unwrap();

    assert_eq!(resolved.action_name, "hcov-19_submission");
    assert_eq!(resolved.action_type, ActionType::BioSampleSra);
    assert_eq!(resolved.submission_type, SubmissionType::Production);
    assert_eq!(resolved.batch_size, BATCH_SIZE);
    assert!(resolved.download.multiprocess);
    assert!(!resolved.download.download_files);
    assert_eq!(
        resolved.download.credentials_path.as_deref().map(|p| p.as_str()),
        Some("/keys/gcs.json")
    );
    assert_eq!(
        resolved.target_sample_names,
        Some(vec!["SEARCH-100".to_string(), "SEARCH-200".to_string()])
    );
    assert_eq!(resolved.excluded_sample_names, DEFAULT_EXCLUDED_SAMPLES.to_vec());
    assert_eq!(resolved.output_dir, Utf8PathBuf::from("/data/meta"));
    assert_eq!(resolved.sra.file_type.as_str(), ".bam");
    assert!(!resolved.sra.library.contains_key("file_type"));
    assert_eq!(resolved.sra.library.len(), 7);
    assert!(resolved.ftp.is_none());
    assert!(resolved.schema_path.is_none());
}

#[test]
fn unbatched_runs_use_single_sample_batches() {
    let text = CONFIG.replace(r#""batch_submission": "True""#, r#""batch_submission": false"#);
    let resolved = ConfigLoader::resolve_config(parse(&text)).unwrap();
    assert_eq!(resolved.batch_size, 1);
}

#[test]
fn ftp_section_gets_defaults() {
    let mut config = parse(CONFIG);
    config.ncbi_ftp = Some(serde_json::from_str(r#"{"credentials_path": "/keys/ftp.json"}"#).unwrap());
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    let ftp = resolved.ftp.unwrap();
    assert_eq!(ftp.host, DEFAULT_FTP_HOST);
    assert!(ftp.passive);
    assert_eq!(ftp.inter_file_delay.as_secs(), 10);
}

#[test]
fn rejects_unknown_action_type() {
    let text = CONFIG.replace(r#""bs_sra""#, r#""genbank""#);
    let err = ConfigLoader::resolve_config(parse(&text)).unwrap_err();
    assert_matches!(err, PushError::InvalidActionType(_));
}

#[test]
fn rejects_missing_library_key() {
    let text = CONFIG.replace(r#""library_layout": "PAIRED","#, "");
    let err = ConfigLoader::resolve_config(parse(&text)).unwrap_err();
    assert_matches!(err, PushError::InvalidConfig { field, .. } if field == "sra.library_layout");
}

#[test]
fn load_reports_missing_and_malformed_files() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();

    let err = ConfigLoader::load(&root.join("absent.json")).unwrap_err();
    assert_matches!(err, PushError::ConfigRead(_));

    let broken = root.join("broken.json");
    fs::write(broken.as_std_path(), "{ not json").unwrap();
    let err = ConfigLoader::load(&broken).unwrap_err();
    assert_matches!(err, PushError::ConfigParse(_));
}

#[test]
fn lab_defaults_round_trip_through_loader() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let path = root.join("job_config.json");

    Config::lab_defaults(
        &root.join("metadata.csv"),
        &root.join("bams"),
        Contact {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.org".to_string(),
            organization: "Example Lab".to_string(),
        },
        None,
        "2021-06-01",
    )
    .write(&path)
    .unwrap();

    let resolved = ConfigLoader::load(&path).unwrap();
    assert_eq!(resolved.action_type, ActionType::BioSampleSra);
    assert_eq!(resolved.submission_type, SubmissionType::Production);
    assert_eq!(resolved.submission.hold, "2021-06-01");
    assert_eq!(resolved.download.local_download_dir, root.join("bams"));
    assert!(resolved.download.credentials_path.is_none());
    assert_eq!(resolved.target_sample_names, None);
    assert_eq!(resolved.output_dir, root);
}
