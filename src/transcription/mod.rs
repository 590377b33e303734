pub mod diarization;
pub mod result;

pub use diarization::{render_diarized, DiarizedSegment, SpeakerLabels};
pub use result::{FileResult, CANCELLED, ERROR_LANGUAGE, NOT_PROCESSED, SUCCESS};
