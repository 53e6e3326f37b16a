//! Motion detection over the camera's thumbnail stream
//!
//! Thumbnails are scored against their predecessor ([`scoring`]) and the
//! resulting signal is segmented into activity requests ([`classifier`]).

pub mod classifier;
pub mod scoring;

pub use classifier::{ActivityClassifier, Classification, ClassifierState};
pub use scoring::{score_frames, DissimilarityScorer, MseScorer};

use crate::types::{FrameItem, ProcessingCursor};

/// Drop frames already covered by `cursor`.
///
/// A frame starting at or before the cursor's end time was handled by an
/// earlier pass and must not be classified again.
pub fn filter_processed(frames: Vec<FrameItem>, cursor: Option<&ProcessingCursor>) -> Vec<FrameItem> {
    match cursor {
        Some(cursor) => frames.into_iter().filter(|f| !cursor.covers(f)).collect(),
        None => frames,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_filter_processed_excludes_boundary() {
        let frames: Vec<_> = (0..5)
            .map(|i| FrameItem::instant(format!("{}.mp4", i), Utc.timestamp_opt(100 + i * 5, 0).unwrap()))
            .collect();
        let cursor = ProcessingCursor::new(frames[2].clone());

        let remaining = filter_processed(frames.clone(), Some(&cursor));

        let names: Vec<_> = remaining.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["3.mp4", "4.mp4"]);
        assert_eq!(filter_processed(frames, None).len(), 5);
    }
}
