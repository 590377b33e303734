//! Partitioning of resolved files into provider-sized batches

use serde::Serialize;
use tracing::warn;

use crate::audio_file::AudioFile;

/// Hard per-job file limit of the batch speech-to-text API
pub const PROVIDER_MAX_BATCH_SIZE: usize = 20;

/// A bounded group of files submitted together as one remote job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    id: usize,
    files: Vec<AudioFile>,
}

impl Batch {
    /// Sequential, 1-based batch id
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn files(&self) -> &[AudioFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Split `files` into consecutive batches of at most `max_batch_size` files.
///
/// Order is preserved and the last batch may be shorter. A size of zero is
/// treated as one.
pub fn partition(files: &[AudioFile], max_batch_size: usize) -> Vec<Batch> {
    files
        .chunks(max_batch_size.max(1))
        .enumerate()
        .map(|(index, chunk)| Batch {
            id: index + 1,
            files: chunk.to_vec(),
        })
        .collect()
}

/// Batcher with a requested size clipped to the provider limit
#[derive(Debug, Clone, Copy)]
pub struct Batcher {
    batch_size: usize,
}

impl Batcher {
    pub fn new(requested: usize, provider_limit: usize) -> Self {
        let limit = provider_limit.max(1);
        let batch_size = requested.clamp(1, limit);

        if requested > limit {
            warn!(
                "Batch size {} exceeds provider limit, using {} files per job",
                requested, limit
            );
        }

        Self { batch_size }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn partition(&self, files: &[AudioFile]) -> Vec<Batch> {
        partition(files, self.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn audio_files(count: usize) -> (TempDir, Vec<AudioFile>) {
        let temp_dir = TempDir::new().unwrap();
        let files = (0..count)
            .map(|i| {
                let path = temp_dir.path().join(format!("call_{:03}.wav", i));
                std::fs::write(&path, b"audio").unwrap();
                AudioFile::from_path(&path).unwrap()
            })
            .collect();
        (temp_dir, files)
    }

    #[test]
    fn test_partition_respects_size_and_order() {
        let (_dir, files) = audio_files(45);
        let batches = partition(&files, 20);

        assert_eq!(batches.len(), 3);
        assert_eq!(batches.iter().map(Batch::len).collect::<Vec<_>>(), vec![20, 20, 5]);
        assert_eq!(batches.iter().map(Batch::id).collect::<Vec<_>>(), vec![1, 2, 3]);

        let rejoined: Vec<AudioFile> = batches
            .iter()
            .flat_map(|b| b.files().iter().cloned())
            .collect();
        assert_eq!(rejoined, files);
    }

    #[test]
    fn test_partition_is_deterministic() {
        let (_dir, files) = audio_files(7);
        assert_eq!(partition(&files, 3), partition(&files, 3));
    }

    #[test]
    fn test_empty_input_yields_no_batches() {
        assert!(partition(&[], 20).is_empty());
    }

    #[test]
    fn test_batcher_clips_to_provider_limit() {
        let batcher = Batcher::new(50, PROVIDER_MAX_BATCH_SIZE);
        assert_eq!(batcher.batch_size(), 20);

        let (_dir, files) = audio_files(41);
        let batches = batcher.partition(&files);
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() <= PROVIDER_MAX_BATCH_SIZE));
    }

    #[test]
    fn test_batcher_zero_size_becomes_one() {
        let batcher = Batcher::new(0, PROVIDER_MAX_BATCH_SIZE);
        assert_eq!(batcher.batch_size(), 1);
    }
}
