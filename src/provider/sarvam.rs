use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    FileOutcome, FileRef, JobClient, JobResultPayload, RawDiarizedEntry, RawTranscript,
    RemoteJobId, RemoteJobState,
};
use crate::audio_file::AudioFile;
use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::retry::RetryPolicy;

/// Production endpoint of the Sarvam AI API
pub const DEFAULT_BASE_URL: &str = "https://api.sarvam.ai";
/// Batch speech-to-text model with diarization support
pub const DEFAULT_MODEL: &str = "saarika:v2.5";
/// Files accepted per batch job
pub const SARVAM_MAX_FILES_PER_JOB: usize = 20;

const API_KEY_HEADER: &str = "api-subscription-key";
const JOB_PATH: &str = "/speech-to-text/job/v1";

/// Which provider phase a request belongs to. Decides how transient
/// failures are reported.
#[derive(Debug, Clone, Copy)]
enum Operation {
    Submit,
    Poll,
    Fetch,
}

impl Operation {
    fn transient(self, message: String) -> ProviderError {
        match self {
            Operation::Submit => ProviderError::Submission(message),
            Operation::Poll => ProviderError::TransientPoll(message),
            Operation::Fetch => ProviderError::Fetch(message),
        }
    }
}

fn status_error(operation: Operation, status: StatusCode, body: &str) -> ProviderError {
    let body = body.trim();
    match status.as_u16() {
        401 | 403 => ProviderError::Authentication(format!("API Error {}: {}", status.as_u16(), body)),
        408 | 429 => operation.transient(format!("API Error {}: {}", status.as_u16(), body)),
        code if code >= 500 => operation.transient(format!("API Error {}: {}", code, body)),
        code => ProviderError::Rejected {
            status: code,
            message: body.to_string(),
        },
    }
}

/// Classify a non-success response from presigned blob storage. Throttling
/// and server errors become `transient`, everything else is final.
fn blob_error(
    status: StatusCode,
    body: &str,
    transient: impl FnOnce(String) -> ProviderError,
) -> ProviderError {
    let body = body.trim();
    let detail = if body.is_empty() {
        status.canonical_reason().unwrap_or("no response body").to_string()
    } else {
        body.to_string()
    };

    match status.as_u16() {
        code @ (408 | 429) => transient(format!("API Error {}: {}", code, detail)),
        code if code >= 500 => transient(format!("API Error {}: {}", code, detail)),
        code => ProviderError::Rejected {
            status: code,
            message: detail,
        },
    }
}

/// Per-file message for a presigned upload that did not make it
fn upload_failure(file: &FileRef, error: ProviderError) -> String {
    match error {
        ProviderError::Upload { .. } => error.to_string(),
        other => ProviderError::Upload {
            file: file.file_name.clone(),
            message: other.to_string(),
        }
        .to_string(),
    }
}

fn transport_error(operation: Operation, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else {
        operation.transient(err.to_string())
    }
}

#[derive(Debug, Serialize)]
struct InitiateRequest<'a> {
    job_parameters: JobParameters<'a>,
}

#[derive(Debug, Serialize)]
struct JobParameters<'a> {
    model: &'a str,
    with_diarization: bool,
    num_speakers: u32,
}

#[derive(Debug, Deserialize)]
struct InitiateResponse {
    job_id: String,
}

#[derive(Debug, Serialize)]
struct FilesRequest<'a> {
    job_id: &'a str,
    files: Vec<String>,
}

/// Presigned URLs come either as `{"file_url": ...}` objects or bare strings
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UrlRef {
    Detailed { file_url: String },
    Plain(String),
}

impl UrlRef {
    fn url(&self) -> &str {
        match self {
            UrlRef::Detailed { file_url } => file_url,
            UrlRef::Plain(url) => url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadUrlsResponse {
    #[serde(default)]
    upload_urls: HashMap<String, UrlRef>,
}

#[derive(Debug, Deserialize)]
struct DownloadUrlsResponse {
    #[serde(default)]
    download_urls: HashMap<String, UrlRef>,
}

#[derive(Debug, Default, Deserialize)]
struct JobStatusResponse {
    #[serde(default)]
    job_state: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    job_details: Vec<JobDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct JobDetail {
    #[serde(default)]
    inputs: Vec<JobFile>,
    #[serde(default)]
    outputs: Vec<JobFile>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JobFile {
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    file_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptDocument {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    language_code: Option<String>,
    #[serde(default)]
    diarized_transcript: Option<DiarizedDocument>,
}

#[derive(Debug, Default, Deserialize)]
struct DiarizedDocument {
    #[serde(default)]
    entries: Vec<RawDiarizedEntry>,
}

impl From<TranscriptDocument> for RawTranscript {
    fn from(doc: TranscriptDocument) -> Self {
        Self {
            language_code: doc.language_code,
            transcript: doc.transcript,
            diarized_entries: doc.diarized_transcript.unwrap_or_default().entries,
        }
    }
}

impl JobStatusResponse {
    fn remote_state(&self) -> RemoteJobState {
        let raw = self
            .job_state
            .as_deref()
            .or(self.status.as_deref())
            .or(self.state.as_deref())
            .unwrap_or("unknown")
            .to_lowercase();

        match raw.as_str() {
            "completed" | "complete" | "success" | "succeeded" => RemoteJobState::Succeeded,
            "failed" | "error" | "failure" => RemoteJobState::Failed(
                self.error_message
                    .clone()
                    .or_else(|| self.error.clone())
                    .unwrap_or_else(|| format!("Job {}", raw)),
            ),
            "accepted" | "pending" | "queued" | "created" => RemoteJobState::Queued,
            _ => RemoteJobState::Running,
        }
    }
}

/// Where to find a submitted file's result after the job completes
#[derive(Debug, Clone, PartialEq)]
enum OutputRef {
    File(String),
    Failed(String),
}

fn is_failed_state(state: Option<&str>) -> bool {
    state
        .map(|s| matches!(s.to_lowercase().as_str(), "failed" | "error" | "failure"))
        .unwrap_or(false)
}

/// Name each file is registered under inside a job. The index prefix keeps
/// names unique when two directories contain the same file name.
fn upload_names(files: &[FileRef]) -> Vec<String> {
    files
        .iter()
        .enumerate()
        .map(|(index, file)| format!("{:02}_{}", index, file.file_name))
        .collect()
}

/// Map each submitted file to its output using `job_details`, falling back
/// to the provider's positional `<index>.json` naming.
fn output_refs(details: &[JobDetail], names: &[String]) -> Vec<OutputRef> {
    names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let detail = details.iter().find(|detail| {
                detail
                    .inputs
                    .iter()
                    .any(|input| input.file_name.as_deref() == Some(name.as_str()))
            });

            match detail {
                Some(detail) if is_failed_state(detail.state.as_deref()) => OutputRef::Failed(
                    detail
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "Transcription failed".to_string()),
                ),
                Some(detail) => detail
                    .outputs
                    .iter()
                    .find_map(|output| output.file_id.clone())
                    .map(OutputRef::File)
                    .unwrap_or_else(|| OutputRef::File(format!("{}.json", index))),
                None => OutputRef::File(format!("{}.json", index)),
            }
        })
        .collect()
}

/// Upload failures per job id, keyed by the file's index in the job
type UploadFailures = HashMap<String, HashMap<usize, String>>;

/// Sarvam AI batch speech-to-text client with speaker diarization
pub struct SarvamClient {
    config: ProviderConfig,
    api_key: String,
    client: reqwest::Client,
    retry: RetryPolicy,
    cancel: CancellationToken,
    upload_failures: Mutex<UploadFailures>,
}

impl SarvamClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("Sarvam API key required"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            config,
            api_key,
            client,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
            upload_failures: Mutex::new(HashMap::new()),
        })
    }

    /// Retry policy for the per-file blob transfers inside a job
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn upload_failures(&self) -> MutexGuard<'_, UploadFailures> {
        self.upload_failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!(
            "{}{}{}",
            self.config.base_url.trim_end_matches('/'),
            JOB_PATH,
            suffix
        )
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: Operation,
        request: RequestBuilder,
    ) -> ProviderResult<T> {
        let response = request
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(operation, e))?;

        if !status.is_success() {
            return Err(status_error(operation, status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| operation.transient(format!("Malformed response: {}", e)))
    }

    async fn send_unit(&self, operation: Operation, request: RequestBuilder) -> ProviderResult<()> {
        let response = request
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(operation, status, &text));
        }
        Ok(())
    }

    async fn initiate_job(&self, speaker_count: u32) -> ProviderResult<String> {
        let request = InitiateRequest {
            job_parameters: JobParameters {
                model: &self.config.model,
                with_diarization: true,
                num_speakers: speaker_count,
            },
        };

        let response: InitiateResponse = self
            .send_json(Operation::Submit, self.client.post(self.endpoint("")).json(&request))
            .await?;
        Ok(response.job_id)
    }

    async fn upload_to_job(&self, job_id: &str, files: &[FileRef]) -> ProviderResult<()> {
        let names = upload_names(files);
        let request = FilesRequest {
            job_id,
            files: names.clone(),
        };

        let response: UploadUrlsResponse = self
            .send_json(
                Operation::Submit,
                self.client.post(self.endpoint("/upload-files")).json(&request),
            )
            .await?;

        if response.upload_urls.is_empty() {
            info!("No upload URLs in response, assuming files registered for job {}", job_id);
            return Ok(());
        }

        let mut failures = HashMap::new();
        for (index, (file, name)) in files.iter().zip(&names).enumerate() {
            let Some(url) = response.upload_urls.get(name) else {
                warn!("No upload URL for {}", file.file_name);
                let missing = ProviderError::Upload {
                    file: file.file_name.clone(),
                    message: "No upload URL returned".to_string(),
                };
                failures.insert(index, missing.to_string());
                continue;
            };

            let bytes = match tokio::fs::read(&file.path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    let reason = ProviderError::Upload {
                        file: file.file_name.clone(),
                        message: e.to_string(),
                    }
                    .to_string();
                    warn!("⚠️ {}", reason);
                    failures.insert(index, reason);
                    continue;
                }
            };

            let attempted = self
                .retry
                .run("upload PUT", &self.cancel, || {
                    self.put_file(url.url(), file, bytes.clone())
                })
                .await;

            match attempted.result {
                Ok(()) => debug!("Uploaded {} to job {}", file.file_name, job_id),
                Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
                Err(e) => {
                    let reason = upload_failure(file, e);
                    warn!("⚠️ {}", reason);
                    failures.insert(index, reason);
                }
            }
        }

        if !failures.is_empty() {
            self.upload_failures().insert(job_id.to_string(), failures);
        }

        Ok(())
    }

    async fn put_file(&self, url: &str, file: &FileRef, bytes: Vec<u8>) -> ProviderResult<()> {
        let upload_error = |message: String| ProviderError::Upload {
            file: file.file_name.clone(),
            message,
        };

        let response = self
            .client
            .put(url)
            .header("x-ms-blob-type", "BlockBlob")
            .timeout(Duration::from_secs(self.config.upload_timeout_secs))
            .body(bytes)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    upload_error(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(blob_error(status, &body, upload_error))
    }

    async fn start_job(&self, job_id: &str) -> ProviderResult<()> {
        let url = self.endpoint(&format!("/{}/start", job_id));
        self.send_unit(Operation::Submit, self.client.post(url)).await
    }

    async fn job_status(&self, operation: Operation, job: &RemoteJobId) -> ProviderResult<JobStatusResponse> {
        let url = self.endpoint(&format!("/{}/status", job));
        self.send_json(operation, self.client.get(url)).await
    }

    async fn download_document(&self, url: &str) -> FileOutcome {
        let attempted = self
            .retry
            .run("result download", &self.cancel, || self.download_once(url))
            .await;

        match attempted.result {
            Ok(raw) => FileOutcome::Transcribed(raw),
            Err(e) => FileOutcome::Failed(e.to_string()),
        }
    }

    async fn download_once(&self, url: &str) -> ProviderResult<RawTranscript> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(Operation::Fetch, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(blob_error(status, &body, ProviderError::Fetch));
        }

        // Blob storage serves these as octet-stream, so parse the text ourselves
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(Operation::Fetch, e))?;

        serde_json::from_str::<TranscriptDocument>(&text)
            .map(RawTranscript::from)
            .map_err(|e| ProviderError::Rejected {
                status: status.as_u16(),
                message: format!("Malformed result: {}", e),
            })
    }
}

#[async_trait]
impl JobClient for SarvamClient {
    fn max_files_per_job(&self) -> usize {
        self.config.max_files_per_job
    }

    /// Sarvam binds uploads to a job, so this only stages and validates the
    /// local file. The bytes are sent by `create_job`.
    async fn upload(&self, file: &AudioFile) -> ProviderResult<FileRef> {
        let metadata = tokio::fs::metadata(file.path())
            .await
            .map_err(|e| ProviderError::InvalidFile {
                file: file.file_name().to_string(),
                message: e.to_string(),
            })?;

        if metadata.len() == 0 {
            return Err(ProviderError::InvalidFile {
                file: file.file_name().to_string(),
                message: "file is empty".to_string(),
            });
        }

        Ok(FileRef {
            file_name: file.file_name().to_string(),
            path: file.path().to_path_buf(),
            size: metadata.len(),
        })
    }

    async fn create_job(
        &self,
        batch_id: usize,
        files: &[FileRef],
        speaker_count: u32,
    ) -> ProviderResult<RemoteJobId> {
        if files.len() > self.max_files_per_job() {
            return Err(ProviderError::BatchLimit {
                size: files.len(),
                limit: self.max_files_per_job(),
            });
        }

        let job_id = self.initiate_job(speaker_count).await?;
        info!("Job initiated for batch {}. Job ID: {}", batch_id, job_id);

        self.upload_to_job(&job_id, files).await?;
        self.start_job(&job_id).await?;

        info!("Batch {} submitted successfully. Job ID: {}", batch_id, job_id);
        Ok(RemoteJobId::new(job_id))
    }

    async fn poll_status(&self, job: &RemoteJobId) -> ProviderResult<RemoteJobState> {
        let status = self.job_status(Operation::Poll, job).await?;
        Ok(status.remote_state())
    }

    async fn fetch_result(
        &self,
        job: &RemoteJobId,
        files: &[FileRef],
    ) -> ProviderResult<JobResultPayload> {
        let status = self.job_status(Operation::Fetch, job).await?;
        let names = upload_names(files);
        let failed_uploads = self
            .upload_failures()
            .get(job.as_str())
            .cloned()
            .unwrap_or_default();

        let outputs: Vec<OutputRef> = output_refs(&status.job_details, &names)
            .into_iter()
            .enumerate()
            .map(|(index, output)| match failed_uploads.get(&index) {
                Some(reason) => OutputRef::Failed(reason.clone()),
                None => output,
            })
            .collect();

        let file_ids: Vec<String> = outputs
            .iter()
            .filter_map(|output| match output {
                OutputRef::File(id) => Some(id.clone()),
                OutputRef::Failed(_) => None,
            })
            .collect();

        let request = FilesRequest {
            job_id: job.as_str(),
            files: file_ids,
        };

        let response: DownloadUrlsResponse = self
            .send_json(
                Operation::Fetch,
                self.client.post(self.endpoint("/download-files")).json(&request),
            )
            .await?;

        let downloads = outputs.iter().enumerate().map(|(index, output)| {
            let response = &response;
            async move {
                let outcome = match output {
                    OutputRef::Failed(reason) => FileOutcome::Failed(reason.clone()),
                    OutputRef::File(id) => match response.download_urls.get(id) {
                        Some(url) => self.download_document(url.url()).await,
                        None => FileOutcome::Failed("No download URL found".to_string()),
                    },
                };
                (index, outcome)
            }
        });

        let mut payload = JobResultPayload::new();
        for (index, outcome) in join_all(downloads).await {
            payload.insert(index, outcome);
        }

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file_ref(name: &str) -> FileRef {
        FileRef {
            file_name: name.to_string(),
            path: PathBuf::from(format!("/audio/{}", name)),
            size: 10,
        }
    }

    #[test]
    fn test_upload_names_are_unique() {
        let names = upload_names(&[file_ref("call.wav"), file_ref("call.wav")]);
        assert_eq!(names, vec!["00_call.wav", "01_call.wav"]);
    }

    #[test]
    fn test_status_parsing() {
        let status: JobStatusResponse =
            serde_json::from_str(r#"{"job_state": "Completed"}"#).unwrap();
        assert_eq!(status.remote_state(), RemoteJobState::Succeeded);

        let status: JobStatusResponse =
            serde_json::from_str(r#"{"status": "Running"}"#).unwrap();
        assert_eq!(status.remote_state(), RemoteJobState::Running);

        let status: JobStatusResponse =
            serde_json::from_str(r#"{"job_state": "Accepted"}"#).unwrap();
        assert_eq!(status.remote_state(), RemoteJobState::Queued);

        let status: JobStatusResponse =
            serde_json::from_str(r#"{"state": "Failed", "error_message": "quota exceeded"}"#)
                .unwrap();
        assert_eq!(
            status.remote_state(),
            RemoteJobState::Failed("quota exceeded".to_string())
        );

        let status: JobStatusResponse = serde_json::from_str(r#"{"job_state": "error"}"#).unwrap();
        assert_eq!(status.remote_state(), RemoteJobState::Failed("Job error".to_string()));
    }

    #[test]
    fn test_output_refs_use_job_details_then_position() {
        let details: Vec<JobDetail> = serde_json::from_str(
            r#"[
                {"inputs": [{"file_name": "00_a.wav"}], "outputs": [{"file_id": "out-a.json"}], "state": "Success"},
                {"inputs": [{"file_name": "01_b.wav"}], "outputs": [], "state": "Failed", "error_message": "unsupported codec"}
            ]"#,
        )
        .unwrap();

        let names = vec!["00_a.wav".to_string(), "01_b.wav".to_string(), "02_c.wav".to_string()];
        let refs = output_refs(&details, &names);

        assert_eq!(
            refs,
            vec![
                OutputRef::File("out-a.json".to_string()),
                OutputRef::Failed("unsupported codec".to_string()),
                OutputRef::File("2.json".to_string()),
            ]
        );
    }

    #[test]
    fn test_status_error_classification() {
        assert!(matches!(
            status_error(Operation::Submit, StatusCode::UNAUTHORIZED, "bad key"),
            ProviderError::Authentication(_)
        ));
        assert!(matches!(
            status_error(Operation::Poll, StatusCode::SERVICE_UNAVAILABLE, ""),
            ProviderError::TransientPoll(_)
        ));
        assert!(matches!(
            status_error(Operation::Fetch, StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::Fetch(_)
        ));
        assert_eq!(
            status_error(Operation::Submit, StatusCode::BAD_REQUEST, "num_speakers invalid"),
            ProviderError::Rejected {
                status: 400,
                message: "num_speakers invalid".to_string()
            }
        );
    }

    #[test]
    fn test_blob_errors_retry_only_throttling_and_server_faults() {
        let err = blob_error(StatusCode::BAD_GATEWAY, "", ProviderError::Fetch);
        assert_eq!(err, ProviderError::Fetch("API Error 502: Bad Gateway".to_string()));
        assert!(err.is_transient());

        let err = blob_error(StatusCode::TOO_MANY_REQUESTS, "slow down", ProviderError::Fetch);
        assert!(err.is_transient());

        let err = blob_error(StatusCode::NOT_FOUND, "BlobNotFound", ProviderError::Fetch);
        assert_eq!(
            err,
            ProviderError::Rejected {
                status: 404,
                message: "BlobNotFound".to_string()
            }
        );
        assert!(!err.is_transient());

        let reason = upload_failure(&file_ref("b.wav"), err);
        assert_eq!(reason, "Upload failed for b.wav: API Error 404: BlobNotFound");
    }

    #[test]
    fn test_upload_reports_vanished_file() {
        tokio_test::block_on(async {
            let temp_dir = tempfile::TempDir::new().unwrap();
            let path = temp_dir.path().join("gone.wav");
            std::fs::write(&path, b"RIFF").unwrap();
            let file = AudioFile::from_path(&path).unwrap();
            std::fs::remove_file(&path).unwrap();

            let client = SarvamClient::new(ProviderConfig {
                api_key: Some("sk_test".to_string()),
                ..ProviderConfig::default()
            })
            .unwrap();

            let err = client.upload(&file).await.unwrap_err();
            assert!(matches!(err, ProviderError::InvalidFile { ref file, .. } if file == "gone.wav"));
        });
    }

    #[test]
    fn test_client_requires_api_key() {
        let config = ProviderConfig {
            api_key: None,
            ..ProviderConfig::default()
        };
        assert!(SarvamClient::new(config).is_err());
    }
}
