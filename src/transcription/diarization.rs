use serde::{Deserialize, Serialize};
use std::fmt;

/// Speaker-attributed, time-stamped span of a transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiarizedSegment {
    /// Human-readable speaker label
    pub speaker: String,
    /// Start offset in seconds
    pub start: f64,
    /// Spoken text
    pub text: String,
}

impl DiarizedSegment {
    pub fn new(speaker: impl Into<String>, start: f64, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            start,
            text: text.into(),
        }
    }
}

impl fmt::Display for DiarizedSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.1}s] {}: {}", self.start, self.speaker, self.text)
    }
}

/// Render segments as `[<start>s] <speaker>: <text>` lines in chronological
/// order. Segments with equal offsets keep their supplied order.
pub fn render_diarized(segments: &[DiarizedSegment]) -> String {
    let mut ordered: Vec<&DiarizedSegment> = segments.iter().collect();
    ordered.sort_by(|a, b| a.start.total_cmp(&b.start));

    ordered
        .iter()
        .map(|segment| segment.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Maps provider speaker ids ("0", "1", ...) to display labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerLabels {
    labels: Vec<String>,
}

impl Default for SpeakerLabels {
    fn default() -> Self {
        Self::new(vec!["Customer".to_string(), "Agent".to_string()])
    }
}

impl SpeakerLabels {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Configured label for the id, otherwise `Speaker N` (1-based)
    pub fn label_for(&self, speaker_id: &str) -> String {
        match speaker_id.trim().parse::<usize>() {
            Ok(index) => self
                .labels
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("Speaker {}", index + 1)),
            Err(_) => format!("Speaker {}", speaker_id),
        }
    }
}
