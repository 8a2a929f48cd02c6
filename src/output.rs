use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{ProgressEvent, ProgressSink, SubmitResult};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_submit(result: &SubmitResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress events to the log.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => info!("{}", event.message),
        }
    }
}

pub fn print_submit_summary(result: &SubmitResult) {
    println!(
        "{} samples, {} batches: {} uploaded, {} skipped",
        result.total_samples,
        result.batches.len(),
        result.uploaded(),
        result.skipped()
    );
    for batch in &result.batches {
        let validity = match &batch.validation {
            Some(report) if report.is_valid() => "valid",
            Some(_) => "INVALID",
            None => "not validated",
        };
        println!(
            "  {:<40} {:?}: {}/{} present, {} BioSample, {} SRA, {validity}",
            batch.action_name,
            batch.status,
            batch.present,
            batch.samples,
            batch.biosample_actions,
            batch.sra_actions,
        );
    }
}
