use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::audio_file::DEFAULT_EXTENSIONS;
use crate::batcher::PROVIDER_MAX_BATCH_SIZE;
use crate::error::ConfigError;
use crate::provider::sarvam::{DEFAULT_BASE_URL, DEFAULT_MODEL, SARVAM_MAX_FILES_PER_JOB};
use crate::report::ReportFormat;
use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS};

/// Configuration for the batch transcriber
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Speech-to-text provider settings
    pub provider: ProviderConfig,

    /// File discovery and batching
    pub processing: ProcessingConfig,

    /// Concurrency and timing
    pub performance: PerformanceConfig,

    /// Retry behaviour for provider calls
    pub retry: RetryConfig,

    /// Report output
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API subscription key
    pub api_key: Option<String>,

    /// API base URL
    pub base_url: String,

    /// Transcription model
    pub model: String,

    /// Maximum files the provider accepts in one job
    pub max_files_per_job: usize,

    /// Timeout for ordinary API requests (seconds)
    pub request_timeout_secs: u64,

    /// Timeout for a single audio upload (seconds)
    pub upload_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Directory scanned for audio files
    pub input_dir: PathBuf,

    /// Supported audio extensions, matched case-insensitively
    pub supported_extensions: Vec<String>,

    /// Descend into subdirectories
    pub recursive: bool,

    /// Files per batch job (clipped to the provider limit)
    pub batch_size: usize,

    /// Expected number of speakers per recording
    pub num_speakers: u32,

    /// Display labels for speaker ids 0, 1, ...
    pub speaker_labels: Vec<String>,

    /// Submit a batch even when some of its uploads failed
    pub allow_partial_batches: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Maximum batch jobs in flight at once
    pub max_concurrent_jobs: usize,

    /// Concurrent uploads within one batch
    pub upload_parallelism: usize,

    /// Delay between job status checks (milliseconds)
    pub poll_interval_ms: u64,

    /// Budget for a single job from submission to completion (seconds)
    pub job_timeout_secs: u64,

    /// Optional budget for the whole run (seconds)
    pub pipeline_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,

    /// Consecutive failed status checks tolerated before a job is failed
    pub max_poll_errors: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Report file path
    pub output_path: PathBuf,

    /// Report format; derived from the output extension when unset
    pub format: Option<ReportFormat>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_files_per_job: SARVAM_MAX_FILES_PER_JOB,
            request_timeout_secs: 60,
            upload_timeout_secs: 300,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("audio_input"),
            supported_extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            recursive: false,
            batch_size: PROVIDER_MAX_BATCH_SIZE,
            num_speakers: 2, // customer + agent
            speaker_labels: vec!["Customer".to_string(), "Agent".to_string()],
            allow_partial_batches: true,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: num_cpus::get().clamp(2, 8),
            upload_parallelism: 4,
            poll_interval_ms: 10_000,
            job_timeout_secs: 3600, // 1 hour
            pipeline_timeout_secs: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_poll_errors: 5,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("transcriptions_batch.csv"),
            format: None,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, then apply
    /// environment overrides. Defaults are used when no file exists.
    pub fn load() -> Result<Self> {
        let config_paths = ["batch-transcriber.toml", "config/batch-transcriber.toml"];

        let mut config = Self::default();
        for path in &config_paths {
            let path = Path::new(path);
            if path.exists() {
                config = Self::from_file(path)?;
                break;
            }
        }

        config.apply_env();
        Ok(config)
    }

    /// Parse a TOML config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Default configuration with environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override settings from `SARVAM_API_KEY` and `BATCH_TRANSCRIBER_*`
    pub fn apply_env(&mut self) {
        if let Ok(api_key) = std::env::var("SARVAM_API_KEY") {
            self.provider.api_key = Some(api_key);
        }

        if let Ok(base_url) = std::env::var("BATCH_TRANSCRIBER_BASE_URL") {
            self.provider.base_url = base_url;
        }

        if let Ok(input_dir) = std::env::var("BATCH_TRANSCRIBER_INPUT_DIR") {
            self.processing.input_dir = PathBuf::from(input_dir);
        }

        if let Ok(output) = std::env::var("BATCH_TRANSCRIBER_OUTPUT") {
            self.output.output_path = PathBuf::from(output);
        }

        env_override("BATCH_TRANSCRIBER_BATCH_SIZE", &mut self.processing.batch_size);
        env_override("BATCH_TRANSCRIBER_SPEAKERS", &mut self.processing.num_speakers);
        env_override("BATCH_TRANSCRIBER_CONCURRENCY", &mut self.performance.max_concurrent_jobs);
        env_override("BATCH_TRANSCRIBER_POLL_INTERVAL_MS", &mut self.performance.poll_interval_ms);
        env_override("BATCH_TRANSCRIBER_JOB_TIMEOUT_SECS", &mut self.performance.job_timeout_secs);
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration. Runs before any batch work starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let has_key = self
            .provider
            .api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false);
        if !has_key {
            return Err(ConfigError::MissingCredential);
        }

        if let Err(e) = url::Url::parse(&self.provider.base_url) {
            return Err(ConfigError::Invalid {
                name: "base_url",
                reason: e.to_string(),
            });
        }

        if self.processing.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1"));
        }

        if self.provider.max_files_per_job == 0 {
            return Err(invalid("max_files_per_job", "must be at least 1"));
        }

        if self.processing.num_speakers == 0 {
            return Err(invalid("num_speakers", "must be at least 1"));
        }

        if self.performance.max_concurrent_jobs == 0 {
            return Err(invalid("max_concurrent_jobs", "must be at least 1"));
        }

        if self.performance.upload_parallelism == 0 {
            return Err(invalid("upload_parallelism", "must be at least 1"));
        }

        if self.performance.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "must be greater than 0"));
        }

        if self.performance.job_timeout_secs == 0 {
            return Err(invalid("job_timeout_secs", "must be greater than 0"));
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }

        if self.processing.supported_extensions.is_empty() {
            return Err(invalid("supported_extensions", "must not be empty"));
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Batch size actually used after clipping to the provider limit
    pub fn effective_batch_size(&self) -> usize {
        self.processing
            .batch_size
            .clamp(1, self.provider.max_files_per_job.max(1))
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Batch Transcriber Configuration:\n\
            - Input Directory: {}\n\
            - Output: {}\n\
            - Model: {}\n\
            - Batch Size: {}\n\
            - Speakers: {}\n\
            - Concurrent Jobs: {}\n\
            - Supported Extensions: {}\n\
            - Recursive: {}",
            self.processing.input_dir.display(),
            self.output.output_path.display(),
            self.provider.model,
            self.effective_batch_size(),
            self.processing.num_speakers,
            self.performance.max_concurrent_jobs,
            self.processing.supported_extensions.join(", "),
            self.processing.recursive
        )
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.to_string(),
    }
}

fn env_override<T: FromStr>(name: &str, target: &mut T) {
    if let Ok(value) = std::env::var(name) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!("Ignoring invalid value for {}: {}", name, value),
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.provider.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.provider.base_url = base_url.into();
        self
    }

    pub fn with_input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.processing.input_dir = dir.into();
        self
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output.output_path = path.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config.processing.batch_size = batch_size;
        self
    }

    pub fn with_speakers(mut self, speakers: u32) -> Self {
        self.config.processing.num_speakers = speakers;
        self
    }

    pub fn with_concurrency(mut self, jobs: usize) -> Self {
        self.config.performance.max_concurrent_jobs = jobs;
        self
    }

    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.config.performance.poll_interval_ms = interval;
        self
    }

    pub fn with_job_timeout_secs(mut self, secs: u64) -> Self {
        self.config.performance.job_timeout_secs = secs;
        self
    }

    pub fn with_pipeline_timeout_secs(mut self, secs: u64) -> Self {
        self.config.performance.pipeline_timeout_secs = Some(secs);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry.max_attempts = policy.max_attempts;
        self.config.retry.base_delay_ms = policy.base_delay_ms;
        self.config.retry.max_delay_ms = policy.max_delay_ms;
        self
    }

    pub fn allow_partial_batches(mut self, allow: bool) -> Self {
        self.config.processing.allow_partial_batches = allow;
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.config.processing.recursive = recursive;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
