use std::collections::HashSet;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::batch::{Batch, BatchPlanner};
use crate::cloud::CloudFetcher;
use crate::config::RunConfig;
use crate::error::PushError;
use crate::metadata::{MetadataTable, load_sample_names};
use crate::sample::{CheckedSample, IdentifierResolver, check_presence};
use crate::schema::{Schema, ValidationReport};
use crate::store::Store;
use crate::submission::{DocumentBuilder, SubmissionDocument};
use crate::transfer::{TransferAgent, TransferClient, TransferSummary};

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub run_date: NaiveDate,
    /// Prepare and validate every batch but leave the remote untouched.
    pub skip_upload: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// No sample in the batch had its file on disk.
    Skipped,
    /// Documents written; nothing sent.
    Prepared,
    Uploaded,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub action_name: String,
    pub directory: Utf8PathBuf,
    pub status: BatchStatus,
    pub samples: usize,
    pub present: usize,
    pub biosample_actions: usize,
    pub sra_actions: usize,
    pub submission: Option<Utf8PathBuf>,
    pub validation: Option<ValidationReport>,
    pub transfer: Option<TransferSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResult {
    pub action_type: String,
    pub submission_type: String,
    pub total_samples: usize,
    pub batches: Vec<BatchOutcome>,
}

impl SubmitResult {
    pub fn uploaded(&self) -> usize {
        self.count(BatchStatus::Uploaded)
    }

    pub fn skipped(&self) -> usize {
        self.count(BatchStatus::Skipped)
    }

    fn count(&self, status: BatchStatus) -> usize {
        self.batches
            .iter()
            .filter(|batch| batch.status == status)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

/// Runs submission batches end to end. `transfer` is `None` when the run
/// has no upload target.
pub struct App<T: TransferClient, C: CloudFetcher> {
    store: Store,
    transfer: Option<T>,
    cloud: C,
}

impl<T: TransferClient, C: CloudFetcher> App<T, C> {
    pub fn new(store: Store, transfer: Option<T>, cloud: C) -> Self {
        Self {
            store,
            transfer,
            cloud,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn submit(
        &self,
        config: &RunConfig,
        options: &SubmitOptions,
        sink: &dyn ProgressSink,
    ) -> Result<SubmitResult, PushError> {
        let names = load_sample_names(
            &config.metadata_location,
            config.target_sample_names.as_deref(),
            &config.excluded_sample_names,
        )?;
        let metadata = MetadataTable::read(&config.metadata_location)?;
        let schema = config
            .schema_path
            .as_deref()
            .map(Schema::load)
            .transpose()?;

        let downloads = config.action_type.includes_sra() && config.download.download_files;
        // without downloads the directory listing is fixed for the whole run
        let local = if downloads {
            None
        } else {
            Some(self.local_resolver(config)?)
        };

        let planner = BatchPlanner::new(&names, config.batch_size);
        let batch_count = planner.batch_count();
        emit(
            sink,
            format!(
                "phase=Plan; {} samples in {batch_count} batches of up to {}",
                names.len(),
                config.batch_size
            ),
        );

        let mut batches = Vec::with_capacity(batch_count);
        for batch in planner {
            let started = Instant::now();
            emit(
                sink,
                format!("phase=Batch; starting batch {} of {batch_count}", batch.index + 1),
            );
            let fetched;
            let resolver = match &local {
                Some(resolver) => resolver,
                None => {
                    self.cloud
                        .fetch(&config.download, &config.sra.file_type, batch.sample_names)?;
                    fetched = self.local_resolver(config)?;
                    &fetched
                }
            };
            let outcome = self.run_batch(
                config,
                options,
                &batch,
                resolver,
                &metadata,
                schema.as_ref(),
                sink,
            )?;
            sink.event(ProgressEvent {
                message: format!("phase=Batch; {} {:?}", outcome.action_name, outcome.status),
                elapsed: Some(started.elapsed()),
            });
            batches.push(outcome);
        }

        Ok(SubmitResult {
            action_type: config.action_type.as_str().to_string(),
            submission_type: config.submission_type.to_string(),
            total_samples: names.len(),
            batches,
        })
    }

    fn local_resolver(&self, config: &RunConfig) -> Result<IdentifierResolver, PushError> {
        let dir = &config.download.local_download_dir;
        if !dir.as_std_path().is_dir() {
            warn!("download directory {dir} does not exist; no sample will resolve");
            return Ok(IdentifierResolver::default());
        }
        IdentifierResolver::from_dir(dir, &config.sra.file_type)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_batch(
        &self,
        config: &RunConfig,
        options: &SubmitOptions,
        batch: &Batch<'_>,
        resolver: &IdentifierResolver,
        metadata: &MetadataTable,
        schema: Option<&Schema>,
        sink: &dyn ProgressSink,
    ) -> Result<BatchOutcome, PushError> {
        let action_name = batch.action_name(&config.action_name, options.run_date);
        let directory = self.store.ensure_batch_dir(&action_name)?;

        emit(sink, format!("phase=Resolve; {action_name}"));
        let resolved = resolver.resolve_all(batch.sample_names);
        let samples = check_presence(
            &config.download.local_download_dir,
            resolved,
            &config.sra.file_type,
        );
        let present = samples.iter().filter(|sample| sample.is_present()).count();

        let mut outcome = BatchOutcome {
            action_name: action_name.clone(),
            directory,
            status: BatchStatus::Skipped,
            samples: samples.len(),
            present,
            biosample_actions: 0,
            sra_actions: 0,
            submission: None,
            validation: None,
            transfer: None,
        };
        if present == 0 {
            warn!("{action_name}: no sample file present, skipping batch");
            return Ok(outcome);
        }

        self.store.write_snapshot(&action_name, &samples)?;

        emit(sink, format!("phase=Build; {present} of {} samples present", samples.len()));
        let document = DocumentBuilder::new(config.action_type, &config.submission, &config.sra)
            .build(&action_name, &samples, metadata);
        let submission = self.store.submission_path(&action_name);
        document.write(&submission)?;
        outcome.biosample_actions = document.biosample_count();
        outcome.sra_actions = document.sra_count();
        outcome.submission = Some(submission.clone());
        outcome.status = BatchStatus::Prepared;

        if let Some(schema) = schema {
            emit(sink, "phase=Verify; validating submission.xml".to_string());
            let report = schema.validate_file(&submission)?;
            for violation in &report.violations {
                warn!("{action_name}: {}: {}", violation.path, violation.message);
            }
            outcome.validation = Some(report);
        }

        if options.skip_upload {
            return Ok(outcome);
        }
        let (Some(client), Some(ftp)) = (&self.transfer, &config.ftp) else {
            info!("{action_name}: no upload target configured, not uploading");
            return Ok(outcome);
        };

        let mut files = payload_files(&document, &samples);
        files.push(submission);
        let sentinel = self.store.write_sentinel(&action_name)?;
        emit(sink, format!("phase=Upload; {} files", files.len() + 1));
        let agent = TransferAgent::new(client, ftp.inter_file_delay);
        let summary = agent.upload_batch(config.submission_type, &action_name, &files, &sentinel)?;
        outcome.transfer = Some(summary);
        outcome.status = BatchStatus::Uploaded;
        Ok(outcome)
    }
}

/// Local files the document references through an SRA action. Samples
/// dropped by the builder keep their file on disk but are not sent.
fn payload_files(document: &SubmissionDocument, samples: &[CheckedSample]) -> Vec<Utf8PathBuf> {
    let referenced: HashSet<&str> = document.sra_files().collect();
    samples
        .iter()
        .filter_map(CheckedSample::full_filepath)
        .filter(|path| path.file_name().is_some_and(|name| referenced.contains(name)))
        .map(Utf8Path::to_path_buf)
        .collect()
}
