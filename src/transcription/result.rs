use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio_file::AudioFile;
use crate::provider::RawTranscript;
use super::diarization::{render_diarized, DiarizedSegment, SpeakerLabels};

/// Error column value for a successfully transcribed file
pub const SUCCESS: &str = "Success";

/// Error column value for files abandoned by cancellation
pub const CANCELLED: &str = "Cancelled";

/// Error column value for files no batch ever reported
pub const NOT_PROCESSED: &str = "Not processed";

/// Detected-language value recorded for failed files
pub const ERROR_LANGUAGE: &str = "error";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome for a single audio file. Field order is the report column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileResult {
    #[serde(rename = "File Name")]
    pub file_name: String,

    #[serde(rename = "File Path")]
    pub file_path: PathBuf,

    #[serde(rename = "Detected Language")]
    pub language: String,

    #[serde(rename = "Transcript")]
    pub transcript: String,

    #[serde(rename = "Diarized Transcript")]
    pub diarized_transcript: String,

    /// "Success" or the failure reason
    #[serde(rename = "Error")]
    pub error: String,

    #[serde(rename = "Timestamp")]
    pub timestamp: String,
}

impl FileResult {
    /// Build a successful record from a provider payload
    pub fn success(file: &AudioFile, raw: RawTranscript, labels: &SpeakerLabels) -> Self {
        let segments: Vec<DiarizedSegment> = raw
            .diarized_entries
            .into_iter()
            .map(|entry| {
                DiarizedSegment::new(
                    labels.label_for(&entry.speaker_id),
                    entry.start_time_seconds,
                    entry.transcript,
                )
            })
            .collect();

        Self {
            file_name: file.file_name().to_string(),
            file_path: file.path().to_path_buf(),
            language: raw.language_code.unwrap_or_else(|| "unknown".to_string()),
            transcript: raw.transcript,
            diarized_transcript: render_diarized(&segments),
            error: SUCCESS.to_string(),
            timestamp: now(),
        }
    }

    /// Synthesize an error record with empty transcript fields
    pub fn failure(file: &AudioFile, reason: impl Into<String>) -> Self {
        Self {
            file_name: file.file_name().to_string(),
            file_path: file.path().to_path_buf(),
            language: ERROR_LANGUAGE.to_string(),
            transcript: String::new(),
            diarized_transcript: String::new(),
            error: reason.into(),
            timestamp: now(),
        }
    }

    pub fn cancelled(file: &AudioFile) -> Self {
        Self::failure(file, CANCELLED)
    }

    pub fn is_success(&self) -> bool {
        self.error == SUCCESS
    }

    /// Identity of the file this record belongs to
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Values in report column order
    pub fn columns(&self) -> [String; 7] {
        [
            self.file_name.clone(),
            self.file_path.display().to_string(),
            self.language.clone(),
            self.transcript.clone(),
            self.diarized_transcript.clone(),
            self.error.clone(),
            self.timestamp.clone(),
        ]
    }
}

fn now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RawDiarizedEntry;
    use tempfile::TempDir;

    fn audio_file(dir: &TempDir) -> AudioFile {
        let path = dir.path().join("call.wav");
        std::fs::write(&path, b"audio").unwrap();
        AudioFile::from_path(&path).unwrap()
    }

    #[test]
    fn test_success_record_renders_diarization() {
        let temp_dir = TempDir::new().unwrap();
        let file = audio_file(&temp_dir);

        let raw = RawTranscript {
            language_code: Some("hi-IN".to_string()),
            transcript: "Hello... Sure...".to_string(),
            diarized_entries: vec![
                RawDiarizedEntry::new("1", 3.2, "Sure..."),
                RawDiarizedEntry::new("0", 0.5, "Hello..."),
            ],
        };

        let result = FileResult::success(&file, raw, &SpeakerLabels::default());

        assert!(result.is_success());
        assert_eq!(result.language, "hi-IN");
        assert_eq!(
            result.diarized_transcript,
            "[0.5s] Customer: Hello...\n[3.2s] Agent: Sure..."
        );
        assert_eq!(result.file_name, "call.wav");
        assert_eq!(result.timestamp.len(), 19);
    }

    #[test]
    fn test_failure_record_has_empty_transcripts() {
        let temp_dir = TempDir::new().unwrap();
        let file = audio_file(&temp_dir);

        let result = FileResult::failure(&file, "Job failed: quota exceeded");

        assert!(!result.is_success());
        assert_eq!(result.language, ERROR_LANGUAGE);
        assert!(result.transcript.is_empty());
        assert!(result.diarized_transcript.is_empty());
        assert_eq!(result.error, "Job failed: quota exceeded");
        assert_eq!(FileResult::cancelled(&file).error, CANCELLED);
    }
}
