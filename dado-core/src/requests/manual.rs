//! Manual requests from marker files
//!
//! An operator asks for a time range by dropping an empty file such as
//! `2020-05-14-1200-1210.request` anywhere under the output root. The name
//! is parsed into a local time range; the file is removed once the range has
//! been downloaded.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use glob::MatchOptions;
use regex::{Regex, RegexBuilder};

use crate::config::ManualConfig;
use crate::error::{Error, Result};
use crate::types::ActivityRequest;

/// Parses marker file names into manual requests.
#[derive(Debug, Clone)]
pub struct MarkerParser {
    regex: Regex,
    extension: String,
    timestamp_format: String,
}

impl MarkerParser {
    pub fn new(config: &ManualConfig) -> Result<Self> {
        let pattern = format!("{}{}$", config.pattern, regex::escape(&config.extension));
        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::Config(format!("invalid manual.pattern: {}", e)))?;

        Ok(Self {
            regex,
            extension: config.extension.clone(),
            timestamp_format: config.timestamp_format.clone(),
        })
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Parse one marker path.
    ///
    /// Returns `Ok(None)` when the file name does not follow the pattern, and
    /// an error when it does but names an impossible time.
    pub fn parse(&self, path: &Path) -> Result<Option<ActivityRequest>> {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        let Some(caps) = self.regex.captures(file_name) else {
            return Ok(None);
        };

        let (Some(date), Some(start), Some(end)) = (caps.get(1), caps.get(2), caps.get(3)) else {
            return Err(invalid(path, "pattern must capture date, start and end"));
        };

        let start = self.local_time(path, &format!("{}-{}", date.as_str(), start.as_str()))?;
        let mut end = self.local_time(path, &format!("{}-{}", date.as_str(), end.as_str()))?;
        if end < start {
            // Range crosses midnight
            end += Duration::days(1);
        }

        Ok(Some(ActivityRequest::manual(
            to_utc(path, start)?,
            to_utc(path, end)?,
            path.to_path_buf(),
        )))
    }

    fn local_time(&self, path: &Path, text: &str) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(text, &self.timestamp_format)
            .map_err(|e| invalid(path, &format!("cannot parse {:?}: {}", text, e)))
    }
}

fn to_utc(path: &Path, local: NaiveDateTime) -> Result<DateTime<Utc>> {
    Local
        .from_local_datetime(&local)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| invalid(path, &format!("{} does not exist in the local timezone", local)))
}

fn invalid(path: &Path, message: &str) -> Error {
    Error::ManualRequest {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Find marker files under `root` and parse them, ordered by start time.
///
/// Unparseable markers are logged and skipped so a single typo does not block
/// the others.
pub fn find_manual_requests(root: &Path, config: &ManualConfig) -> Result<Vec<ActivityRequest>> {
    let parser = MarkerParser::new(config)?;
    let mut requests = Vec::new();

    for path in find_markers(root, parser.extension())? {
        match parser.parse(&path) {
            Ok(Some(request)) => {
                tracing::info!(
                    marker = %path.display(),
                    start = %request.start_time,
                    end = %request.end_time,
                    "Found manual request"
                );
                requests.push(request);
            }
            Ok(None) => {
                tracing::warn!(marker = %path.display(), "Marker name does not match the request pattern");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping manual request");
            }
        }
    }

    requests.sort_by_key(|r| (r.start_time, r.end_time));
    Ok(requests)
}

fn find_markers(root: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    tracing::debug!(root = %root.display(), extension, "Searching for marker files");

    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let pattern = format!(
        "{}/**/*{}",
        glob::Pattern::escape(&root.to_string_lossy()),
        glob::Pattern::escape(extension)
    );
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };

    let paths = glob::glob_with(&pattern, options)
        .map_err(|e| Error::Config(format!("invalid marker glob {}: {}", pattern, e)))?;

    let mut markers = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() => markers.push(path),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read marker directory"),
        }
    }
    Ok(markers)
}

/// Delete the marker behind a handled manual request.
///
/// Returns whether a file was removed. Motion requests have no marker.
pub fn remove_marker(request: &ActivityRequest) -> Result<bool> {
    let Some(path) = request.marker_path.as_deref() else {
        return Ok(false);
    };
    if !path.is_file() {
        return Ok(false);
    }

    std::fs::remove_file(path)?;
    tracing::info!(marker = %path.display(), "Removed manual request marker");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestKind;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        let naive = NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap();
        Local
            .from_local_datetime(&naive)
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn parser() -> MarkerParser {
        MarkerParser::new(&ManualConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_marker_name() {
        let request = parser()
            .parse(Path::new("/media/dashcam/2020-05-14-1200-1210.request"))
            .unwrap()
            .unwrap();

        assert_eq!(request.kind, RequestKind::Manual);
        assert_eq!(request.start_time, local(2020, 5, 14, 12, 0));
        assert_eq!(request.end_time, local(2020, 5, 14, 12, 10));
        assert!(request.trigger_frame.is_none());
        assert_eq!(
            request.marker_path.as_deref(),
            Some(Path::new("/media/dashcam/2020-05-14-1200-1210.request"))
        );
    }

    #[test]
    fn test_parse_rolls_end_past_midnight() {
        let request = parser()
            .parse(Path::new("2020-05-14-2350-0010.request"))
            .unwrap()
            .unwrap();

        assert_eq!(request.start_time, local(2020, 5, 14, 23, 50));
        assert_eq!(request.end_time, local(2020, 5, 15, 0, 10));
    }

    #[test]
    fn test_parse_ignores_other_names() {
        let parser = parser();
        assert!(parser.parse(Path::new("notes.request")).unwrap().is_none());
        assert!(parser.parse(Path::new("2020-05-14-1200-1210.txt")).unwrap().is_none());
    }

    #[test]
    fn test_parse_extension_case_insensitive() {
        let request = parser().parse(Path::new("2020-05-14-1200-1210.REQUEST")).unwrap();
        assert!(request.is_some());
    }

    #[test]
    fn test_parse_rejects_impossible_time() {
        let err = parser()
            .parse(Path::new("2020-05-14-2575-2580.request"))
            .unwrap_err();
        assert!(matches!(err, Error::ManualRequest { .. }));
    }

    #[test]
    fn test_find_manual_requests_recurses_and_sorts() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("2020-05-14");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("2020-05-14-1300-1305.request"), "").unwrap();
        std::fs::write(dir.path().join("2020-05-14-0900-0930.request"), "").unwrap();
        std::fs::write(dir.path().join("bogus.request"), "").unwrap();
        std::fs::write(dir.path().join("recording.mp4"), "data").unwrap();

        let requests = find_manual_requests(dir.path(), &ManualConfig::default()).unwrap();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].start_time, local(2020, 5, 14, 9, 0));
        assert_eq!(requests[1].start_time, local(2020, 5, 14, 13, 0));
    }

    #[test]
    fn test_find_manual_requests_missing_root() {
        let dir = TempDir::new().unwrap();
        let requests = find_manual_requests(&dir.path().join("absent"), &ManualConfig::default()).unwrap();
        assert!(requests.is_empty());
    }

    #[test]
    fn test_remove_marker() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("2020-05-14-1200-1210.request");
        std::fs::write(&marker, "").unwrap();
        let request = parser().parse(&marker).unwrap().unwrap();

        assert!(remove_marker(&request).unwrap());
        assert!(!marker.exists());
        assert!(!remove_marker(&request).unwrap());
    }

    #[test]
    fn test_remove_marker_ignores_motion_requests() {
        let frame = crate::types::FrameItem::instant("a.mp4", local(2020, 5, 14, 12, 0));
        let request = ActivityRequest::motion(frame.clone(), frame);
        assert!(!remove_marker(&request).unwrap());
    }
}
