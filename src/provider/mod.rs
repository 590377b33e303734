pub mod sarvam;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::audio_file::AudioFile;
use crate::error::ProviderResult;

pub use sarvam::SarvamClient;

/// Handle to a file staged with the provider
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRef {
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
}

impl FileRef {
    pub fn from_audio_file(file: &AudioFile) -> Self {
        Self {
            file_name: file.file_name().to_string(),
            path: file.path().to_path_buf(),
            size: file.size(),
        }
    }
}

/// Identifier assigned by the provider to a submitted job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteJobId(String);

impl RemoteJobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote job lifecycle as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteJobState {
    Queued,
    Running,
    Succeeded,
    Failed(String),
}

impl RemoteJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteJobState::Succeeded | RemoteJobState::Failed(_))
    }
}

/// One speaker-tagged entry of a provider diarization payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDiarizedEntry {
    #[serde(default = "unknown_speaker", deserialize_with = "string_or_number")]
    pub speaker_id: String,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub start_time_seconds: f64,
    #[serde(default)]
    pub end_time_seconds: Option<f64>,
}

impl RawDiarizedEntry {
    pub fn new(speaker_id: impl Into<String>, start: f64, transcript: impl Into<String>) -> Self {
        Self {
            speaker_id: speaker_id.into(),
            transcript: transcript.into(),
            start_time_seconds: start,
            end_time_seconds: None,
        }
    }
}

fn unknown_speaker() -> String {
    "UNKNOWN".to_string()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => unknown_speaker(),
        other => other.to_string(),
    })
}

/// Per-file transcription returned by the provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTranscript {
    pub language_code: Option<String>,
    pub transcript: String,
    pub diarized_entries: Vec<RawDiarizedEntry>,
}

/// Per-file outcome inside a job result payload
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Transcribed(RawTranscript),
    Failed(String),
}

/// Results of a finished job, keyed by the file's position in the
/// submitted `FileRef` slice. Missing positions mean the provider returned
/// nothing for that file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobResultPayload {
    outcomes: HashMap<usize, FileOutcome>,
}

impl JobResultPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: usize, outcome: FileOutcome) {
        self.outcomes.insert(index, outcome);
    }

    pub fn take(&mut self, index: usize) -> Option<FileOutcome> {
        self.outcomes.remove(&index)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Contract the orchestration engine needs from a batch speech-to-text
/// provider. Polling and fetching must be idempotent; job creation is not.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Maximum number of files accepted in a single job
    fn max_files_per_job(&self) -> usize;

    async fn upload(&self, file: &AudioFile) -> ProviderResult<FileRef>;

    async fn create_job(
        &self,
        batch_id: usize,
        files: &[FileRef],
        speaker_count: u32,
    ) -> ProviderResult<RemoteJobId>;

    async fn poll_status(&self, job: &RemoteJobId) -> ProviderResult<RemoteJobState>;

    async fn fetch_result(
        &self,
        job: &RemoteJobId,
        files: &[FileRef],
    ) -> ProviderResult<JobResultPayload>;
}
