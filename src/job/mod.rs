//! Per-batch job lifecycle: upload, submit, poll and fetch

pub mod state;

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batcher::Batch;
use crate::config::Config;
use crate::error::ProviderError;
use crate::provider::{FileOutcome, FileRef, JobClient, RemoteJobId, RemoteJobState};
use crate::retry::RetryPolicy;
use crate::transcription::{FileResult, SpeakerLabels, CANCELLED};

pub use state::{JobError, JobHandle, JobState};

/// Error recorded for a file the provider returned nothing for
pub const NO_RESULT: &str = "No result returned for file";

/// Knobs for a single batch lifecycle
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub speaker_count: u32,
    pub upload_parallelism: usize,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub max_poll_errors: u32,
    pub allow_partial_batches: bool,
    pub retry: RetryPolicy,
    pub speaker_labels: SpeakerLabels,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            speaker_count: 2,
            upload_parallelism: 4,
            poll_interval: Duration::from_secs(10),
            job_timeout: Duration::from_secs(3600),
            max_poll_errors: 5,
            allow_partial_batches: true,
            retry: RetryPolicy::default(),
            speaker_labels: SpeakerLabels::default(),
        }
    }
}

impl JobSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            speaker_count: config.processing.num_speakers,
            upload_parallelism: config.performance.upload_parallelism.max(1),
            poll_interval: Duration::from_millis(config.performance.poll_interval_ms),
            job_timeout: Duration::from_secs(config.performance.job_timeout_secs),
            max_poll_errors: config.retry.max_poll_errors,
            allow_partial_batches: config.processing.allow_partial_batches,
            retry: config.retry.policy(),
            speaker_labels: SpeakerLabels::new(config.processing.speaker_labels.clone()),
        }
    }
}

/// Final report of one batch: exactly one record per file of the batch
#[derive(Debug, Clone)]
pub struct BatchCompletion {
    pub batch_id: usize,
    pub results: Vec<FileResult>,
    pub state: JobState,
    pub attempts: u32,
}

impl BatchCompletion {
    /// Completion for a batch abandoned before it ever started
    pub fn cancelled(batch: &Batch) -> Self {
        Self {
            batch_id: batch.id(),
            results: batch.files().iter().map(FileResult::cancelled).collect(),
            state: JobState::Failed {
                reason: CANCELLED.to_string(),
            },
            attempts: 0,
        }
    }

    pub fn successful(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }
}

/// Drives one batch through its state machine against a provider
#[derive(Clone)]
pub struct JobRunner {
    client: Arc<dyn JobClient>,
    settings: Arc<JobSettings>,
    cancel: CancellationToken,
}

impl JobRunner {
    pub fn new(client: Arc<dyn JobClient>, settings: JobSettings, cancel: CancellationToken) -> Self {
        Self {
            client,
            settings: Arc::new(settings),
            cancel,
        }
    }

    /// Run `batch` to a terminal state. Never fails: every problem becomes a
    /// per-file error record.
    pub async fn run(&self, batch: &Batch) -> BatchCompletion {
        let mut handle = JobHandle::new(batch.id());
        let mut slots: Vec<Option<FileResult>> = vec![None; batch.len()];

        if let Err(reason) = self.drive(batch, &mut handle, &mut slots).await {
            if reason == CANCELLED {
                warn!("🛑 Batch {} cancelled", batch.id());
            } else {
                error!("❌ Batch {} failed: {}", batch.id(), reason);
            }
            handle.fail(reason);
        }

        let fallback = match handle.state() {
            JobState::Failed { reason } => reason.clone(),
            _ => NO_RESULT.to_string(),
        };

        let results: Vec<FileResult> = slots
            .into_iter()
            .zip(batch.files())
            .map(|(slot, file)| slot.unwrap_or_else(|| FileResult::failure(file, fallback.clone())))
            .collect();

        BatchCompletion {
            batch_id: batch.id(),
            results,
            state: handle.state().clone(),
            attempts: handle.attempts(),
        }
    }

    async fn drive(
        &self,
        batch: &Batch,
        handle: &mut JobHandle,
        slots: &mut [Option<FileResult>],
    ) -> Result<(), String> {
        if self.cancel.is_cancelled() {
            return Err(CANCELLED.to_string());
        }

        transition(handle, JobState::Uploading)?;
        let (indices, refs) = self.upload_all(batch, handle, slots).await?;

        let remote_id = self.submit(batch, handle, &refs).await?;
        transition(handle, JobState::Submitted { remote_id: remote_id.clone() })?;
        info!(
            "📤 Batch {} submitted as job {} ({} files)",
            batch.id(),
            remote_id,
            refs.len()
        );

        transition(handle, JobState::Polling { remote_id: remote_id.clone() })?;
        self.wait_for_completion(handle, &remote_id).await?;

        let attempted = self
            .settings
            .retry
            .run("fetch_result", &self.cancel, || {
                self.client.fetch_result(&remote_id, &refs)
            })
            .await;
        handle.record_attempts(attempted.attempts);
        let mut payload = attempted.result.map_err(failure_reason)?;

        let labels = &self.settings.speaker_labels;
        for (position, &index) in indices.iter().enumerate() {
            let file = &batch.files()[index];
            slots[index] = Some(match payload.take(position) {
                Some(FileOutcome::Transcribed(raw)) => FileResult::success(file, raw, labels),
                Some(FileOutcome::Failed(reason)) => {
                    warn!("⚠️ {} failed: {}", file.file_name(), reason);
                    FileResult::failure(file, reason)
                }
                None => {
                    warn!("⚠️ No result returned for {}", file.file_name());
                    FileResult::failure(file, NO_RESULT)
                }
            });
        }

        transition(handle, JobState::Succeeded)?;

        let transcribed = slots.iter().flatten().filter(|r| r.is_success()).count();
        info!(
            "✅ Batch {} completed: {}/{} files transcribed",
            batch.id(),
            transcribed,
            batch.len()
        );
        Ok(())
    }

    /// Upload every file with bounded parallelism. Returns the batch indices
    /// and refs of the files that made it.
    async fn upload_all(
        &self,
        batch: &Batch,
        handle: &mut JobHandle,
        slots: &mut [Option<FileResult>],
    ) -> Result<(Vec<usize>, Vec<FileRef>), String> {
        info!("🚀 Batch {}: uploading {} files", batch.id(), batch.len());

        let uploads: Vec<_> = stream::iter(batch.files().iter().cloned().enumerate())
            .map(|(index, file)| {
                let client = Arc::clone(&self.client);
                let retry = self.settings.retry.clone();
                let cancel = self.cancel.clone();
                async move {
                    let attempted = retry.run("upload", &cancel, || client.upload(&file)).await;
                    (index, attempted)
                }
            })
            .buffered(self.settings.upload_parallelism.max(1))
            .collect()
            .await;

        let mut indices = Vec::with_capacity(batch.len());
        let mut refs = Vec::with_capacity(batch.len());
        let mut fatal: Option<ProviderError> = None;

        for (index, attempted) in uploads {
            handle.record_attempts(attempted.attempts);
            match attempted.result {
                Ok(file_ref) => {
                    indices.push(index);
                    refs.push(file_ref);
                }
                Err(ProviderError::Cancelled) => return Err(CANCELLED.to_string()),
                Err(e) if e.is_batch_fatal() => fatal = Some(e),
                Err(e) => {
                    let file = &batch.files()[index];
                    warn!("⚠️ Upload failed for {}: {}", file.file_name(), e);
                    handle.record_error(&e);
                    slots[index] = Some(FileResult::failure(file, e.to_string()));
                }
            }
        }

        if let Some(e) = fatal {
            slots.iter_mut().for_each(|slot| *slot = None);
            return Err(e.to_string());
        }

        if refs.is_empty() {
            return Err("No files uploaded".to_string());
        }

        if refs.len() < batch.len() {
            if !self.settings.allow_partial_batches {
                let reason = handle
                    .last_error()
                    .map(str::to_string)
                    .unwrap_or_else(|| "Upload failed".to_string());
                slots.iter_mut().for_each(|slot| *slot = None);
                return Err(reason);
            }
            warn!(
                "⚠️ Batch {}: continuing with {}/{} uploaded files",
                batch.id(),
                refs.len(),
                batch.len()
            );
        }

        Ok((indices, refs))
    }

    async fn submit(
        &self,
        batch: &Batch,
        handle: &mut JobHandle,
        refs: &[FileRef],
    ) -> Result<RemoteJobId, String> {
        let attempted = self
            .settings
            .retry
            .run("create_job", &self.cancel, || {
                self.client
                    .create_job(batch.id(), refs, self.settings.speaker_count)
            })
            .await;
        handle.record_attempts(attempted.attempts);
        attempted.result.map_err(failure_reason)
    }

    async fn wait_for_completion(
        &self,
        handle: &mut JobHandle,
        remote_id: &RemoteJobId,
    ) -> Result<(), String> {
        let deadline = Instant::now() + self.settings.job_timeout;
        let timed_out = || format!("Job timed out after {:?}", self.settings.job_timeout);
        let max_errors = self.settings.max_poll_errors.max(1);
        let mut consecutive_errors = 0;

        loop {
            let polled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(CANCELLED.to_string()),
                _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
                polled = self.client.poll_status(remote_id) => polled,
            };
            handle.record_attempts(1);

            match polled {
                Ok(RemoteJobState::Succeeded) => {
                    debug!("Job {} completed", remote_id);
                    return Ok(());
                }
                Ok(RemoteJobState::Failed(reason)) => {
                    return Err(format!("Job failed: {}", reason));
                }
                Ok(state) => {
                    consecutive_errors = 0;
                    debug!("Job {} status: {:?}", remote_id, state);
                }
                Err(ProviderError::Cancelled) => return Err(CANCELLED.to_string()),
                Err(e) if e.is_transient() => {
                    consecutive_errors += 1;
                    handle.record_error(&e);
                    if consecutive_errors >= max_errors {
                        return Err(e.to_string());
                    }
                    debug!(
                        "Job {} poll error {}/{}: {}",
                        remote_id, consecutive_errors, max_errors, e
                    );
                }
                Err(e) => return Err(e.to_string()),
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(CANCELLED.to_string()),
                _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }
}

fn transition(handle: &mut JobHandle, next: JobState) -> Result<(), String> {
    handle.transition(next).map_err(|e| e.to_string())
}

fn failure_reason(error: ProviderError) -> String {
    error.to_string()
}
