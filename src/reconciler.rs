//! Merging of per-batch outcomes into one ordered result table

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio_file::AudioFile;
use crate::job::BatchCompletion;
use crate::transcription::FileResult;

/// Run progress reported after every batch completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed_files: usize,
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    pub completed_batches: usize,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total_files == 0 {
            100.0
        } else {
            self.completed_files as f64 / self.total_files as f64 * 100.0
        }
    }
}

pub type StatusCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// One row per resolved file, in discovery order
#[derive(Debug, Clone, Default)]
pub struct ResultTable {
    rows: Vec<FileResult>,
    index: HashMap<PathBuf, usize>,
}

impl ResultTable {
    pub fn rows(&self) -> &[FileResult] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<FileResult> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileResult> {
        self.rows.iter()
    }

    pub fn get(&self, path: &Path) -> Option<&FileResult> {
        self.index.get(path).map(|&i| &self.rows[i])
    }

    pub fn successful(&self) -> usize {
        self.rows.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.successful()
    }
}

/// Single writer of the result table
pub struct Reconciler {
    files: Vec<AudioFile>,
    positions: HashMap<PathBuf, usize>,
    records: Vec<Option<FileResult>>,
    progress: Progress,
    callback: Option<StatusCallback>,
}

impl Reconciler {
    pub fn new(files: &[AudioFile]) -> Self {
        let positions = files
            .iter()
            .enumerate()
            .map(|(i, file)| (file.path().to_path_buf(), i))
            .collect();

        Self {
            files: files.to_vec(),
            positions,
            records: vec![None; files.len()],
            progress: Progress {
                total_files: files.len(),
                ..Progress::default()
            },
            callback: None,
        }
    }

    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Store one record. Returns false when the file is unknown or already
    /// has a record.
    pub fn record(&mut self, result: FileResult) -> bool {
        let Some(&position) = self.positions.get(result.path()) else {
            warn!("Ignoring result for unknown file {}", result.path().display());
            return false;
        };

        if self.records[position].is_some() {
            warn!("Ignoring duplicate result for {}", result.file_name);
            return false;
        }

        if result.is_success() {
            self.progress.successful += 1;
        } else {
            self.progress.failed += 1;
        }
        self.progress.completed_files += 1;
        self.records[position] = Some(result);
        true
    }

    /// Record every result of a finished batch and report progress
    pub fn absorb(&mut self, completion: BatchCompletion) {
        let batch_id = completion.batch_id;
        let mut accepted = 0;
        for result in completion.results {
            if self.record(result) {
                accepted += 1;
            }
        }
        self.progress.completed_batches += 1;

        debug!("Batch {} reconciled: {} records", batch_id, accepted);
        info!(
            "📊 Progress: {}/{} files ({:.1}%), {} ok, {} failed",
            self.progress.completed_files,
            self.progress.total_files,
            self.progress.percent(),
            self.progress.successful,
            self.progress.failed
        );

        if let Some(callback) = &self.callback {
            callback(&self.progress);
        }
    }

    /// Drain completions until every sender is gone
    pub async fn consume(&mut self, mut rx: mpsc::Receiver<BatchCompletion>) {
        while let Some(completion) = rx.recv().await {
            self.absorb(completion);
        }
    }

    /// Build the final table, synthesizing `missing_reason` records for any
    /// file that never got one.
    pub fn finish(self, missing_reason: &str) -> ResultTable {
        let mut table = ResultTable::default();

        for (position, (file, record)) in self.files.iter().zip(self.records).enumerate() {
            let row = record.unwrap_or_else(|| {
                warn!("⚠️ No result for {}: {}", file.file_name(), missing_reason);
                FileResult::failure(file, missing_reason)
            });
            table.index.insert(file.path().to_path_buf(), position);
            table.rows.push(row);
        }

        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use crate::transcription::{CANCELLED, NOT_PROCESSED};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn files(dir: &TempDir, names: &[&str]) -> Vec<AudioFile> {
        names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                std::fs::write(&path, b"audio").unwrap();
                AudioFile::from_path(&path).unwrap()
            })
            .collect()
    }

    fn completion(batch_id: usize, results: Vec<FileResult>) -> BatchCompletion {
        BatchCompletion {
            batch_id,
            results,
            state: JobState::Succeeded,
            attempts: 1,
        }
    }

    #[test]
    fn test_rows_follow_discovery_order() {
        let temp_dir = TempDir::new().unwrap();
        let audio = files(&temp_dir, &["a.wav", "b.wav", "c.wav"]);
        let mut reconciler = Reconciler::new(&audio);

        reconciler.absorb(completion(2, vec![FileResult::failure(&audio[2], "boom")]));
        reconciler.absorb(completion(
            1,
            vec![
                FileResult::failure(&audio[1], "x"),
                FileResult::failure(&audio[0], "y"),
            ],
        ));

        let table = reconciler.finish(NOT_PROCESSED);
        let names: Vec<&str> = table.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.wav", "b.wav", "c.wav"]);
        assert_eq!(table.get(audio[2].path()).unwrap().error, "boom");
    }

    #[test]
    fn test_duplicates_and_unknown_files_are_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let audio = files(&temp_dir, &["a.wav", "stray.wav"]);
        let mut reconciler = Reconciler::new(&audio[..1]);

        assert!(reconciler.record(FileResult::failure(&audio[0], "first")));
        assert!(!reconciler.record(FileResult::failure(&audio[0], "second")));
        assert!(!reconciler.record(FileResult::failure(&audio[1], "stray")));

        let table = reconciler.finish(NOT_PROCESSED);
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].error, "first");
    }

    #[test]
    fn test_missing_files_are_synthesized() {
        let temp_dir = TempDir::new().unwrap();
        let audio = files(&temp_dir, &["a.wav", "b.wav"]);

        let table = Reconciler::new(&audio).finish(CANCELLED);

        assert_eq!(table.len(), 2);
        assert_eq!(table.failed(), 2);
        assert!(table.iter().all(|r| r.error == CANCELLED && r.language == "error"));
    }

    #[test]
    fn test_status_callback_sees_progress() {
        let temp_dir = TempDir::new().unwrap();
        let audio = files(&temp_dir, &["a.wav", "b.wav"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut reconciler = Reconciler::new(&audio).with_status_callback(Arc::new(move |p: &Progress| {
            sink.lock().unwrap().push(p.clone());
        }));

        reconciler.absorb(completion(1, vec![FileResult::failure(&audio[0], "x")]));
        reconciler.absorb(completion(2, vec![FileResult::failure(&audio[1], "y")]));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].completed_files, 2);
        assert_eq!(seen[1].failed, 2);
        assert_eq!(seen[1].completed_batches, 2);
        assert_eq!(seen[1].percent(), 100.0);
    }
}
