/// Batch Transcriber - Rust Implementation
///
/// Concurrent batch orchestration for speaker-diarized speech-to-text.
/// Audio files are grouped into provider-sized batches, each batch runs as
/// one remote job, and every file ends up as exactly one report row.

pub mod audio_file;
pub mod batcher;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod provider;
pub mod reconciler;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod transcription;

// Re-export main types for easy access
pub use crate::audio_file::{AudioFile, FileSetResolver};
pub use crate::batcher::{partition, Batch, Batcher, PROVIDER_MAX_BATCH_SIZE};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::engine::{BatchEngine, RunReport, RunStatus};
pub use crate::error::{ConfigError, ProviderError, ProviderResult};
pub use crate::job::{BatchCompletion, JobHandle, JobRunner, JobSettings, JobState};
pub use crate::provider::{JobClient, SarvamClient};
pub use crate::reconciler::{Progress, Reconciler, ResultTable, StatusCallback};
pub use crate::report::{ReportFormat, ReportWriter};
pub use crate::retry::RetryPolicy;
pub use crate::scheduler::Scheduler;
pub use crate::transcription::{render_diarized, DiarizedSegment, FileResult, SpeakerLabels};
