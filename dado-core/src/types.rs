//! Core domain types for dado
//!
//! These types describe what the camera reports and what the daemon decides
//! to fetch from it.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Frame item** | One catalog entry: a recording segment and its thumbnail |
//! | **Dissimilarity** | Change score of a thumbnail against its predecessor |
//! | **Activity request** | A closed time range believed to contain real activity |
//! | **Processing cursor** | The last frame item confirmed fully processed |
//! | **Marker file** | An operator-created file naming a time range to fetch |

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================
// Frame items
// ============================================

/// One recording segment (and its thumbnail) listed by the camera.
///
/// Recordings and thumbnails share timestamps, so the same item serves as a
/// motion-detection sample and as a catalog entry to download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameItem {
    /// Remote recording file name
    pub name: String,
    /// Remote thumbnail file name, if the device provides one
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// When the segment starts
    pub start_time: DateTime<Utc>,
    /// When the segment ends (equal to `start_time` for instantaneous items)
    pub end_time: DateTime<Utc>,
    /// Change score against the previous thumbnail
    #[serde(default)]
    pub dissimilarity: Option<f64>,
    /// Local thumbnail path, assigned by path templating
    #[serde(default)]
    pub thumbnail_path: Option<PathBuf>,
    /// Local recording path, assigned by path templating
    #[serde(default)]
    pub recording_path: Option<PathBuf>,
}

impl FrameItem {
    pub fn new(name: impl Into<String>, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            thumbnail: None,
            start_time,
            end_time,
            dissimilarity: None,
            thumbnail_path: None,
            recording_path: None,
        }
    }

    /// An item without duration (`end_time == start_time`).
    pub fn instant(name: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::new(name, at, at)
    }

    pub fn with_dissimilarity(mut self, score: f64) -> Self {
        self.dissimilarity = Some(score);
        self
    }

    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    /// Inclusive overlap test against `[start, end]`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.end_time >= start && self.start_time <= end
    }
}

// ============================================
// Activity requests
// ============================================

/// Where an activity request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Emitted by the activity classifier
    Motion,
    /// Parsed from an operator marker file
    Manual,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Motion => "motion",
            RequestKind::Manual => "manual",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for RequestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "motion" => Ok(RequestKind::Motion),
            "manual" => Ok(RequestKind::Manual),
            _ => Err(format!("unknown request kind: {}", s)),
        }
    }
}

/// A contiguous interval of activity to retrieve.
///
/// Invariant: `start_time <= end_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRequest {
    pub kind: RequestKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Frame whose score first crossed the start threshold
    pub trigger_frame: Option<FrameItem>,
    /// Frame whose transition closed the interval
    pub closing_frame: Option<FrameItem>,
    /// Marker file to remove once a manual request has been handled
    pub marker_path: Option<PathBuf>,
}

impl ActivityRequest {
    /// Request spanning `[trigger.start_time, closing.end_time]`.
    pub fn motion(trigger: FrameItem, closing: FrameItem) -> Self {
        Self {
            kind: RequestKind::Motion,
            start_time: trigger.start_time,
            end_time: closing.end_time,
            trigger_frame: Some(trigger),
            closing_frame: Some(closing),
            marker_path: None,
        }
    }

    /// Request with only its boundaries known; frames are snapped by the matcher.
    pub fn manual(start_time: DateTime<Utc>, end_time: DateTime<Utc>, marker_path: PathBuf) -> Self {
        Self {
            kind: RequestKind::Manual,
            start_time,
            end_time,
            trigger_frame: None,
            closing_frame: None,
            marker_path: Some(marker_path),
        }
    }

    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }
}

/// An activity request together with the catalog entries it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRequest {
    pub request: ActivityRequest,
    /// Matched catalog items, in catalog order (never empty)
    pub recordings: Vec<FrameItem>,
}

// ============================================
// Processing cursor
// ============================================

/// Persisted marker of the last frame confirmed fully processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingCursor {
    pub frame: FrameItem,
}

impl ProcessingCursor {
    pub fn new(frame: FrameItem) -> Self {
        Self { frame }
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.frame.end_time
    }

    /// Whether `item` lies at or before the cursor boundary.
    pub fn covers(&self, item: &FrameItem) -> bool {
        item.start_time <= self.frame.end_time
    }
}

// ============================================
// Request log
// ============================================

/// One handled request, as recorded in the request log.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestLogEntry {
    /// UUID v4
    pub id: String,
    pub kind: RequestKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub recording_count: usize,
    pub downloaded_count: usize,
    /// `None` when merging was disabled or skipped
    pub merge_status: Option<bool>,
    pub handled_at: DateTime<Utc>,
}

impl RequestLogEntry {
    /// Fresh entry for a request handled just now.
    pub fn handled(matched: &MatchedRequest, downloaded_count: usize, merge_status: Option<bool>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: matched.request.kind,
            start_time: matched.request.start_time,
            end_time: matched.request.end_time,
            recording_count: matched.recordings.len(),
            downloaded_count,
            merge_status,
            handled_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_600_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_overlap_is_inclusive() {
        let item = FrameItem::new("a.mp4", at(10), at(20));
        assert!(item.overlaps(at(20), at(30)));
        assert!(item.overlaps(at(0), at(10)));
        assert!(!item.overlaps(at(21), at(30)));
        assert!(!item.overlaps(at(0), at(9)));
    }

    #[test]
    fn test_motion_request_spans_frames() {
        let trigger = FrameItem::new("a.mp4", at(0), at(5));
        let closing = FrameItem::new("c.mp4", at(10), at(15));
        let request = ActivityRequest::motion(trigger, closing);
        assert_eq!(request.kind, RequestKind::Motion);
        assert_eq!(request.start_time, at(0));
        assert_eq!(request.end_time, at(15));
        assert_eq!(request.duration(), Duration::seconds(15));
    }

    #[test]
    fn test_request_kind_round_trip() {
        assert_eq!("manual".parse::<RequestKind>(), Ok(RequestKind::Manual));
        assert_eq!(RequestKind::Motion.to_string(), "motion");
        assert!("event".parse::<RequestKind>().is_err());
    }

    #[test]
    fn test_cursor_covers_boundary() {
        let cursor = ProcessingCursor::new(FrameItem::new("a.mp4", at(0), at(60)));
        assert!(cursor.covers(&FrameItem::instant("b.mp4", at(60))));
        assert!(!cursor.covers(&FrameItem::instant("c.mp4", at(61))));
    }
}
