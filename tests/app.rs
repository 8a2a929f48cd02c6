use std::fs;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use serde_json::json;

use ncbi_batch_push::app::{App, BatchStatus, SubmitOptions};
use ncbi_batch_push::cloud::CloudFetcher;
use ncbi_batch_push::config::{ConfigLoader, DownloadSettings, RunConfig};
use ncbi_batch_push::domain::FileExtension;
use ncbi_batch_push::error::PushError;
use ncbi_batch_push::output::JsonOutput;
use ncbi_batch_push::store::Store;
use ncbi_batch_push::transfer::{RemoteSession, TransferClient};
use ncbi_batch_push::xml::Element;

#[derive(Default)]
struct Remote {
    entries: Vec<String>,
    puts: Vec<String>,
    cwd: String,
}

#[derive(Clone, Default)]
struct MockTransfer {
    remote: Arc<Mutex<Remote>>,
}

struct MockSession {
    remote: Arc<Mutex<Remote>>,
}

impl TransferClient for MockTransfer {
    fn open_session(&self) -> Result<Box<dyn RemoteSession>, PushError> {
        Ok(Box::new(MockSession {
            remote: self.remote.clone(),
        }))
    }
}

impl RemoteSession for MockSession {
    fn cwd(&mut self, dir: &str) -> Result<(), PushError> {
        let mut remote = self.remote.lock().unwrap();
        remote.cwd = if remote.cwd.is_empty() {
            dir.to_string()
        } else {
            format!("{}/{dir}", remote.cwd)
        };
        Ok(())
    }

    fn list(&mut self) -> Result<Vec<String>, PushError> {
        let remote = self.remote.lock().unwrap();
        let prefix = format!("{}/", remote.cwd);
        Ok(remote
            .entries
            .iter()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    fn mkdir(&mut self, dir: &str) -> Result<(), PushError> {
        let mut remote = self.remote.lock().unwrap();
        let path = format!("{}/{dir}", remote.cwd);
        remote.entries.push(path);
        Ok(())
    }

    fn put(&mut self, remote_name: &str, _local: &Utf8Path) -> Result<(), PushError> {
        let mut remote = self.remote.lock().unwrap();
        let path = format!("{}/{remote_name}", remote.cwd);
        remote.puts.push(path.clone());
        if !remote.entries.contains(&path) {
            remote.entries.push(path);
        }
        Ok(())
    }

    fn quit(&mut self) -> Result<(), PushError> {
        self.remote.lock().unwrap().cwd.clear();
        Ok(())
    }
}

/// Writes `run1_<digits>.bam` for every requested sample, like a bucket copy.
#[derive(Clone, Default)]
struct MockCloud {
    requests: Arc<Mutex<Vec<Vec<String>>>>,
}

impl CloudFetcher for MockCloud {
    fn fetch(
        &self,
        settings: &DownloadSettings,
        ext: &FileExtension,
        sample_names: &[String],
    ) -> Result<(), PushError> {
        self.requests.lock().unwrap().push(sample_names.to_vec());
        fs::create_dir_all(settings.local_download_dir.as_std_path()).unwrap();
        for name in sample_names {
            let digits = name.rsplit('-').next().unwrap();
            let file = settings
                .local_download_dir
                .join(ext.file_name(&format!("run1_{digits}")));
            fs::write(file.as_std_path(), b"bam").unwrap();
        }
        Ok(())
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    root: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("bams").as_std_path()).unwrap();
        fs::write(
            root.join("metadata.csv").as_std_path(),
            "sample_name,gisaid_virus_name,host,collection_date\n\
             SEARCH-100,hCoV-19/USA/CA-SEARCH-100/2021,Human,2021-01-02\n\
             SEARCH-200,hCoV-19/USA/CA-SEARCH-200/2021,Human,nan\n",
        )
        .unwrap();
        Self { _temp: temp, root }
    }

    fn add_bam(&self, name: &str) {
        fs::write(self.root.join("bams").join(name).as_std_path(), b"bam").unwrap();
    }

    fn config(&self, overrides: serde_json::Value) -> RunConfig {
        let mut config = json!({
            "project_name": {
                "action_name": "hcov",
                "action_type": "bs_sra",
                "submission_type": "Test",
                "batch_submission": "False"
            },
            "file_download_info": {
                "local_download_dir": self.root.join("bams").as_str(),
                "bucket_name": "bucket",
                "blob_name": "bam_files/illumina",
                "multiprocess": "False",
                "download_files": "False",
                "metadata_location": self.root.join("metadata.csv").as_str(),
                "target_sample_names": "None"
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
            },
            "ncbi_ftp": {
                "credentials_path": self.root.join("ftp.json").as_str(),
                "inter_file_delay_secs": 0
            },
            "output_dir": self.root.join("out").as_str()
        });
        merge(&mut config, overrides);
        let path = self.root.join("config.json");
        fs::write(path.as_std_path(), serde_json::to_vec(&config).unwrap()).unwrap();
        ConfigLoader::load(&path).unwrap()
    }
}

fn merge(base: &mut serde_json::Value, overrides: serde_json::Value) {
    match (base, overrides) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overrides)) => {
            for (key, value) in overrides {
                merge(base.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (slot, value) => *slot = value,
    }
}

fn options(skip_upload: bool) -> SubmitOptions {
    SubmitOptions {
        run_date: NaiveDate::from_ymd_opt(2021, 3, 4).unwrap(),
        skip_upload,
    }
}

fn app(config: &RunConfig, transfer: &MockTransfer, cloud: &MockCloud) -> App<MockTransfer, MockCloud> {
    App::new(
        Store::new(config.output_dir.clone()),
        Some(transfer.clone()),
        cloud.clone(),
    )
}

#[test]
fn absent_batch_is_skipped_without_transfer() {
    let fixture = Fixture::new();
    fixture.add_bam("run1_100.bam");
    let config = fixture.config(json!({}));
    let transfer = MockTransfer::default();
    let cloud = MockCloud::default();

    let result = app(&config, &transfer, &cloud)
        .submit(&config, &options(false), &JsonOutput)
        .unwrap();

    assert_eq!(result.total_samples, 2);
    assert_eq!(result.batches.len(), 2);
    let first = &result.batches[0];
    assert_eq!(first.action_name, "hcov_2021-03-04_0_1");
    assert_eq!(first.status, BatchStatus::Uploaded);
    assert_eq!(first.biosample_actions, 1);
    assert_eq!(first.sra_actions, 1);
    let second = &result.batches[1];
    assert_eq!(second.action_name, "hcov_2021-03-04_1_2");
    assert_eq!(second.status, BatchStatus::Skipped);
    assert!(second.submission.is_none());
    assert!(!second.directory.join("submission.xml").as_std_path().exists());

    let puts = transfer.remote.lock().unwrap().puts.clone();
    assert_eq!(
        puts,
        vec![
            "submit/Test/hcov_2021-03-04_0_1/run1_100.bam",
            "submit/Test/hcov_2021-03-04_0_1/submission.xml",
            "submit/Test/hcov_2021-03-04_0_1/submit.ready",
        ]
    );
    assert!(cloud.requests.lock().unwrap().is_empty());
}

#[test]
fn batch_directory_holds_snapshot_and_document() {
    let fixture = Fixture::new();
    fixture.add_bam("run1_100.bam");
    let config = fixture.config(json!({}));
    let transfer = MockTransfer::default();

    let result = app(&config, &transfer, &MockCloud::default())
        .submit(&config, &options(true), &JsonOutput)
        .unwrap();
    let batch = &result.batches[0];
    assert_eq!(batch.status, BatchStatus::Prepared);
    assert!(transfer.remote.lock().unwrap().puts.is_empty());

    let snapshot: serde_json::Value = serde_json::from_slice(
        &fs::read(batch.directory.join("file_info.json").as_std_path()).unwrap(),
    )
    .unwrap();
    assert_eq!(snapshot[0]["sample_name"], "SEARCH-100");
    assert_eq!(snapshot[0]["file_download_status"], "Present");

    let root = Element::read(&batch.directory.join("submission.xml")).unwrap();
    assert_eq!(
        root.find("Description/Comment").unwrap().text,
        "hcov_2021-03-04_0_1"
    );
    let attributes: Vec<_> = root
        .find_all("Action/AddData/Data/XmlContent/BioSample/Attributes/Attribute")
        .into_iter()
        .map(|attribute| attribute.attr("attribute_name").unwrap().to_string())
        .collect();
    assert_eq!(
        attributes,
        vec!["sample_name", "gisaid_virus_name", "host", "collection_date"]
    );
    let files = root.find_all("Action/AddFiles/File");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].attr("file_path"), Some("run1_100.bam"));
    let run_ids = root.find_all("Action/AddFiles/Identifier/SPUID");
    assert_eq!(run_ids[0].text, "hCoV-19/USA/CA-SEARCH-100/2021");
}

#[test]
fn rerun_skips_uploaded_files_but_resends_sentinel() {
    let fixture = Fixture::new();
    fixture.add_bam("run1_100.bam");
    fixture.add_bam("run1_200.bam");
    let config = fixture.config(json!({}));
    let transfer = MockTransfer::default();
    let app = app(&config, &transfer, &MockCloud::default());

    app.submit(&config, &options(false), &JsonOutput).unwrap();
    let second = app.submit(&config, &options(false), &JsonOutput).unwrap();

    assert_eq!(second.uploaded(), 2);
    let summary = second.batches[1].transfer.as_ref().unwrap();
    assert_eq!(summary.skipped, vec!["run1_200.bam", "submission.xml"]);
    assert_eq!(summary.uploaded, vec!["submit.ready"]);
    let puts = transfer.remote.lock().unwrap().puts.clone();
    assert_eq!(puts.iter().filter(|p| p.ends_with("submit.ready")).count(), 4);
    assert_eq!(puts.iter().filter(|p| p.ends_with(".bam")).count(), 2);
}

#[test]
fn downloads_each_batch_before_resolving() {
    let fixture = Fixture::new();
    let config = fixture.config(json!({
        "file_download_info": { "download_files": "True" }
    }));
    let transfer = MockTransfer::default();
    let cloud = MockCloud::default();

    let result = app(&config, &transfer, &cloud)
        .submit(&config, &options(true), &JsonOutput)
        .unwrap();

    assert!(result.batches.iter().all(|b| b.status == BatchStatus::Prepared));
    assert_eq!(
        cloud.requests.lock().unwrap().clone(),
        vec![vec!["SEARCH-100".to_string()], vec!["SEARCH-200".to_string()]]
    );
}

#[test]
fn biosample_only_runs_send_no_payload() {
    let fixture = Fixture::new();
    fixture.add_bam("run1_100.bam");
    let config = fixture.config(json!({
        "project_name": { "action_type": "bs", "batch_submission": "True" },
        "batch_size": 10
    }));
    let transfer = MockTransfer::default();

    let result = app(&config, &transfer, &MockCloud::default())
        .submit(&config, &options(false), &JsonOutput)
        .unwrap();

    assert_eq!(result.batches.len(), 1);
    let batch = &result.batches[0];
    assert_eq!(batch.action_name, "hcov_2021-03-04_0_2");
    assert_eq!(batch.biosample_actions, 2);
    assert_eq!(batch.sra_actions, 0);
    let puts = transfer.remote.lock().unwrap().puts.clone();
    assert_eq!(
        puts,
        vec![
            "submit/Test/hcov_2021-03-04_0_2/submission.xml",
            "submit/Test/hcov_2021-03-04_0_2/submit.ready",
        ]
    );
}

#[test]
fn samples_without_a_virus_name_send_no_file() {
    let fixture = Fixture::new();
    fs::write(
        fixture.root.join("metadata.csv").as_std_path(),
        "sample_name,gisaid_virus_name,host,collection_date\n\
         SEARCH-100,hCoV-19/USA/CA-SEARCH-100/2021,Human,2021-01-02\n\
         SEARCH-200,,Human,2021-01-03\n",
    )
    .unwrap();
    fixture.add_bam("run1_100.bam");
    fixture.add_bam("run1_200.bam");
    let config = fixture.config(json!({
        "project_name": { "batch_submission": "True" },
        "batch_size": 10
    }));
    let transfer = MockTransfer::default();

    let result = app(&config, &transfer, &MockCloud::default())
        .submit(&config, &options(false), &JsonOutput)
        .unwrap();

    let batch = &result.batches[0];
    assert_eq!(batch.present, 2);
    assert_eq!(batch.biosample_actions, 1);
    assert_eq!(batch.sra_actions, 1);
    let puts = transfer.remote.lock().unwrap().puts.clone();
    assert_eq!(
        puts,
        vec![
            "submit/Test/hcov_2021-03-04_0_2/run1_100.bam",
            "submit/Test/hcov_2021-03-04_0_2/submission.xml",
            "submit/Test/hcov_2021-03-04_0_2/submit.ready",
        ]
    );
}

#[test]
fn schema_violations_are_reported_without_stopping() {
    let fixture = Fixture::new();
    fixture.add_bam("run1_100.bam");
    fs::write(
        fixture.root.join("submission.xsd").as_std_path(),
        r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="Submission">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="Description" type="xs:anyType"/>
        <xs:element name="Action" type="xs:anyType" maxOccurs="unbounded"/>
      </xs:sequence>
      <xs:attribute name="schema_version" type="xs:string" use="required"/>
    </xs:complexType>
  </xs:element>
</xs:schema>"#,
    )
    .unwrap();
    let config = fixture.config(json!({
        "schema_path": fixture.root.join("submission.xsd").as_str()
    }));
    let transfer = MockTransfer::default();

    let result = app(&config, &transfer, &MockCloud::default())
        .submit(&config, &options(false), &JsonOutput)
        .unwrap();

    let report = result.batches[0].validation.as_ref().unwrap();
    assert!(!report.is_valid());
    assert!(report.violations[0].message.contains("schema_version"));
    assert_eq!(result.batches[0].status, BatchStatus::Uploaded);
}

#[test]
fn missing_ftp_section_prepares_only() {
    let fixture = Fixture::new();
    fixture.add_bam("run1_100.bam");
    let config = fixture.config(json!({ "ncbi_ftp": null }));
    assert!(config.ftp.is_none());
    let transfer = MockTransfer::default();

    let result = app(&config, &transfer, &MockCloud::default())
        .submit(&config, &options(false), &JsonOutput)
        .unwrap();

    assert_eq!(result.batches[0].status, BatchStatus::Prepared);
    assert!(transfer.remote.lock().unwrap().puts.is_empty());
}
