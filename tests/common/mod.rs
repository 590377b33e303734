#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use batch_transcriber::config::{Config, ConfigBuilder};
use batch_transcriber::provider::{
    FileOutcome, FileRef, JobClient, JobResultPayload, RawDiarizedEntry, RawTranscript,
    RemoteJobId, RemoteJobState,
};
use batch_transcriber::{AudioFile, ProviderError, ProviderResult, RetryPolicy};

/// How the scripted provider behaves for one batch
#[derive(Debug, Clone)]
pub struct BatchScript {
    /// Running answers before the final state is reported; `None` polls forever
    pub running_polls: Option<u32>,
    pub final_state: RemoteJobState,
    /// Number of trailing files the provider returns nothing for
    pub missing_results: usize,
    /// Latency of every provider call
    pub latency: Duration,
}

impl Default for BatchScript {
    fn default() -> Self {
        Self {
            running_polls: Some(2),
            final_state: RemoteJobState::Succeeded,
            missing_results: 0,
            latency: Duration::from_millis(2),
        }
    }
}

impl BatchScript {
    pub fn never_finishes() -> Self {
        Self {
            running_polls: None,
            ..Self::default()
        }
    }

    pub fn remote_failure(reason: &str) -> Self {
        Self {
            final_state: RemoteJobState::Failed(reason.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct JobRecord {
    batch_id: usize,
    polls: u32,
}

/// In-memory provider driven by per-batch scripts. Tracks how many jobs are
/// between submission and their terminal answer.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    default_script: BatchScript,
    scripts: HashMap<usize, BatchScript>,
    jobs: Mutex<HashMap<String, JobRecord>>,
    next_job: AtomicUsize,
    active_jobs: AtomicUsize,
    peak_jobs: AtomicUsize,
    submissions: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, script: BatchScript) -> Self {
        self.default_script = script;
        self
    }

    pub fn with_batch(mut self, batch_id: usize, script: BatchScript) -> Self {
        self.scripts.insert(batch_id, script);
        self
    }

    pub fn peak_active_jobs(&self) -> usize {
        self.peak_jobs.load(Ordering::SeqCst)
    }

    pub fn active_jobs(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    fn script(&self, batch_id: usize) -> &BatchScript {
        self.scripts.get(&batch_id).unwrap_or(&self.default_script)
    }

    fn batch_of(&self, job: &RemoteJobId) -> usize {
        self.jobs.lock().unwrap()[job.as_str()].batch_id
    }

    fn job_finished(&self) {
        self.active_jobs.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobClient for ScriptedClient {
    fn max_files_per_job(&self) -> usize {
        20
    }

    async fn upload(&self, file: &AudioFile) -> ProviderResult<FileRef> {
        tokio::time::sleep(self.default_script.latency).await;
        if file.size() == 0 {
            return Err(ProviderError::InvalidFile {
                file: file.file_name().to_string(),
                message: "file is empty".to_string(),
            });
        }
        Ok(FileRef::from_audio_file(file))
    }

    async fn create_job(
        &self,
        batch_id: usize,
        files: &[FileRef],
        _speaker_count: u32,
    ) -> ProviderResult<RemoteJobId> {
        if files.len() > self.max_files_per_job() {
            return Err(ProviderError::BatchLimit {
                size: files.len(),
                limit: self.max_files_per_job(),
            });
        }
        tokio::time::sleep(self.script(batch_id).latency).await;

        let id = format!("job-{}", self.next_job.fetch_add(1, Ordering::SeqCst));
        self.jobs.lock().unwrap().insert(
            id.clone(),
            JobRecord {
                batch_id,
                polls: 0,
            },
        );

        self.submissions.fetch_add(1, Ordering::SeqCst);
        let now = self.active_jobs.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_jobs.fetch_max(now, Ordering::SeqCst);
        Ok(RemoteJobId::new(id))
    }

    async fn poll_status(&self, job: &RemoteJobId) -> ProviderResult<RemoteJobState> {
        let batch_id = self.batch_of(job);
        let script = self.script(batch_id).clone();
        tokio::time::sleep(script.latency).await;

        let polls = {
            let mut jobs = self.jobs.lock().unwrap();
            let record = jobs.get_mut(job.as_str()).unwrap();
            record.polls += 1;
            record.polls
        };

        match script.running_polls {
            Some(limit) if polls > limit => {
                if matches!(script.final_state, RemoteJobState::Failed(_)) {
                    self.job_finished();
                }
                Ok(script.final_state)
            }
            _ => Ok(RemoteJobState::Running),
        }
    }

    async fn fetch_result(
        &self,
        job: &RemoteJobId,
        files: &[FileRef],
    ) -> ProviderResult<JobResultPayload> {
        let script = self.script(self.batch_of(job)).clone();
        tokio::time::sleep(script.latency).await;

        let returned = files.len().saturating_sub(script.missing_results);
        let mut payload = JobResultPayload::new();
        for (index, file) in files.iter().enumerate().take(returned) {
            payload.insert(
                index,
                FileOutcome::Transcribed(RawTranscript {
                    language_code: Some("hi-IN".to_string()),
                    transcript: format!("transcript of {}", file.file_name),
                    diarized_entries: vec![
                        RawDiarizedEntry::new("1", 3.2, "Sure..."),
                        RawDiarizedEntry::new("0", 0.5, "Hello..."),
                    ],
                }),
            );
        }

        self.job_finished();
        Ok(payload)
    }
}

/// Config tuned for fast, deterministic engine tests
pub fn test_config(batch_size: usize, concurrency: usize) -> Config {
    ConfigBuilder::new()
        .with_api_key("sk_test")
        .with_batch_size(batch_size)
        .with_concurrency(concurrency)
        .with_poll_interval_ms(1)
        .with_job_timeout_secs(30)
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
        })
        .build()
}

/// Create `count` audio files named `call_000.wav`, `call_001.wav`, ...
pub fn audio_dir(dir: &Path, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("call_{:03}.wav", i));
            std::fs::write(&path, b"RIFF....WAVEfmt ").unwrap();
            path
        })
        .collect()
}
