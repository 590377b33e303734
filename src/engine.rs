//! End-to-end orchestration of a transcription run

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::audio_file::{AudioFile, FileSetResolver};
use crate::batcher::Batcher;
use crate::config::Config;
use crate::error::ConfigError;
use crate::job::{JobRunner, JobSettings};
use crate::provider::JobClient;
use crate::reconciler::{Reconciler, ResultTable, StatusCallback};
use crate::scheduler::Scheduler;
use crate::transcription::{CANCELLED, NOT_PROCESSED};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// No supported audio files were found; the report is empty
    NoFilesFound,
    Completed,
    /// Cancelled by the caller or the pipeline timeout
    Cancelled,
}

/// Outcome of a run: the result table plus run statistics
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub table: ResultTable,
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    pub batches: usize,
    pub peak_concurrency: usize,
    pub elapsed: Duration,
}

impl RunReport {
    fn empty(status: RunStatus, elapsed: Duration) -> Self {
        Self {
            status,
            table: ResultTable::default(),
            total_files: 0,
            successful: 0,
            failed: 0,
            batches: 0,
            peak_concurrency: 0,
            elapsed,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_files as f64 * 100.0
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Run Summary ({:?}):\n\
            - Total files: {}\n\
            - Successful: {}\n\
            - Failed: {}\n\
            - Success rate: {:.1}%\n\
            - Batches: {}\n\
            - Peak concurrent jobs: {}\n\
            - Elapsed: {:.2}s",
            self.status,
            self.total_files,
            self.successful,
            self.failed,
            self.success_rate(),
            self.batches,
            self.peak_concurrency,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Resolves files, batches them and runs every batch against the provider
pub struct BatchEngine {
    client: Arc<dyn JobClient>,
    resolver: FileSetResolver,
    batcher: Batcher,
    settings: JobSettings,
    max_concurrent: usize,
    pipeline_timeout: Option<Duration>,
    cancel: CancellationToken,
    callback: Option<StatusCallback>,
}

impl BatchEngine {
    pub fn new(config: &Config, client: Arc<dyn JobClient>) -> Self {
        let provider_limit = config
            .provider
            .max_files_per_job
            .min(client.max_files_per_job());

        Self {
            resolver: FileSetResolver::new(&config.processing.supported_extensions)
                .recursive(config.processing.recursive),
            batcher: Batcher::new(config.processing.batch_size, provider_limit),
            settings: JobSettings::from_config(config),
            max_concurrent: config.performance.max_concurrent_jobs.max(1),
            pipeline_timeout: config.performance.pipeline_timeout_secs.map(Duration::from_secs),
            cancel: CancellationToken::new(),
            callback: None,
            client,
        }
    }

    pub fn with_job_settings(mut self, settings: JobSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share an externally owned token, e.g. one cancelled on Ctrl-C
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn batch_size(&self) -> usize {
        self.batcher.batch_size()
    }

    /// Transcribe every supported audio file in `dir`.
    ///
    /// Only an unusable input directory is an error. Per-file and per-batch
    /// failures end up in the report.
    pub async fn process_directory(&self, dir: &Path) -> Result<RunReport, ConfigError> {
        info!("🔍 Discovering audio files in {}", dir.display());
        let files = self.resolver.resolve(dir)?;
        Ok(self.process_files(files).await)
    }

    /// Transcribe an already resolved file set
    pub async fn process_files(&self, files: Vec<AudioFile>) -> RunReport {
        let start_time = Instant::now();

        if files.is_empty() {
            warn!("No audio files found");
            return RunReport::empty(RunStatus::NoFilesFound, start_time.elapsed());
        }

        let batches = self.batcher.partition(&files);
        let batch_count = batches.len();
        info!(
            "🎵 Found {} audio files, split into {} batches of up to {}",
            files.len(),
            batch_count,
            self.batcher.batch_size()
        );

        let run_token = self.cancel.child_token();
        let watchdog = self.pipeline_timeout.map(|timeout| {
            let token = run_token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        warn!("⏰ Pipeline timeout of {:?} reached, cancelling", timeout);
                        token.cancel();
                    }
                }
            })
        });

        let runner = JobRunner::new(
            Arc::clone(&self.client),
            self.settings.clone(),
            run_token.clone(),
        );
        let scheduler = Scheduler::new(runner, self.max_concurrent, run_token.clone());

        let (tx, rx) = mpsc::channel(batch_count);
        info!("🚀 Submitting {} batches...", batch_count);
        let handles = scheduler.dispatch(batches, tx);

        let mut reconciler = Reconciler::new(&files);
        if let Some(callback) = &self.callback {
            reconciler = reconciler.with_status_callback(Arc::clone(callback));
        }
        reconciler.consume(rx).await;

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Batch task failed: {}", e);
            }
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        let cancelled = run_token.is_cancelled();
        let table = reconciler.finish(if cancelled { CANCELLED } else { NOT_PROCESSED });

        let report = RunReport {
            status: if cancelled {
                RunStatus::Cancelled
            } else {
                RunStatus::Completed
            },
            total_files: table.len(),
            successful: table.successful(),
            failed: table.failed(),
            batches: batch_count,
            peak_concurrency: scheduler.peak_concurrency(),
            elapsed: start_time.elapsed(),
            table,
        };

        info!(
            "🏁 Run finished: {}/{} files transcribed in {:.2}s",
            report.successful,
            report.total_files,
            report.elapsed.as_secs_f64()
        );
        report
    }
}
