//! Activity requests and the catalog items that satisfy them
//!
//! Requests come from two places: the motion classifier and operator marker
//! files ([`manual`]). Both are resolved against the camera catalog here.

pub mod manual;

pub use manual::{find_manual_requests, remove_marker, MarkerParser};

use crate::types::{ActivityRequest, FrameItem, MatchedRequest};

/// Attach overlapping catalog items to each request.
///
/// An item matches when `item.end_time >= request.start_time` and
/// `item.start_time <= request.end_time`. Missing trigger or closing frames
/// are filled with the first and last match. Requests matching nothing are
/// dropped.
pub fn match_requests(requests: Vec<ActivityRequest>, catalog: &[FrameItem]) -> Vec<MatchedRequest> {
    let mut matched = Vec::with_capacity(requests.len());

    for mut request in requests {
        let recordings: Vec<FrameItem> = catalog
            .iter()
            .filter(|item| item.overlaps(request.start_time, request.end_time))
            .cloned()
            .collect();

        let (Some(first), Some(last)) = (recordings.first(), recordings.last()) else {
            tracing::info!(
                kind = %request.kind,
                start = %request.start_time,
                end = %request.end_time,
                "No recordings found matching request"
            );
            continue;
        };

        if request.trigger_frame.is_none() {
            request.trigger_frame = Some(first.clone());
        }
        if request.closing_frame.is_none() {
            request.closing_frame = Some(last.clone());
        }

        tracing::debug!(
            kind = %request.kind,
            count = recordings.len(),
            from = %first.start_time,
            to = %last.end_time,
            "Requesting download of recordings"
        );

        matched.push(MatchedRequest { request, recordings });
    }

    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use std::path::PathBuf;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_589_457_600 + secs, 0).unwrap()
    }

    /// One-minute segments starting at each offset.
    fn catalog(starts: &[i64]) -> Vec<FrameItem> {
        starts
            .iter()
            .map(|&s| FrameItem::new(format!("{}.mp4", s), at(s), at(s + 60)))
            .collect()
    }

    #[test]
    fn test_manual_request_matches_overlapping_items() {
        let catalog = catalog(&[0, 60, 120, 600, 660]);
        let request = ActivityRequest::manual(at(30), at(150), PathBuf::from("x.request"));

        let matched = match_requests(vec![request], &catalog);

        assert_eq!(matched.len(), 1);
        let names: Vec<_> = matched[0].recordings.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["0.mp4", "60.mp4", "120.mp4"]);
    }

    #[test]
    fn test_unset_frames_snap_to_matches() {
        let catalog = catalog(&[0, 60, 120]);
        let request = ActivityRequest::manual(at(70), at(130), PathBuf::from("x.request"));

        let matched = match_requests(vec![request], &catalog);
        let request = &matched[0].request;

        assert_eq!(request.trigger_frame.as_ref().unwrap().name, "60.mp4");
        assert_eq!(request.closing_frame.as_ref().unwrap().name, "120.mp4");
        // Boundaries stay as requested
        assert_eq!(request.start_time, at(70));
        assert_eq!(request.end_time, at(130));
    }

    #[test]
    fn test_motion_frames_are_kept() {
        let catalog = catalog(&[0, 60, 120, 180]);
        let trigger = catalog[1].clone();
        let closing = catalog[2].clone();
        let request = ActivityRequest::motion(trigger.clone(), closing.clone());

        let matched = match_requests(vec![request], &catalog);

        // Touching boundaries are inclusive
        assert_eq!(matched[0].recordings.len(), 4);
        assert_eq!(matched[0].request.trigger_frame, Some(trigger));
        assert_eq!(matched[0].request.closing_frame, Some(closing));
    }

    #[test]
    fn test_empty_matches_are_dropped() {
        let catalog = catalog(&[0, 60]);
        let requests = vec![
            ActivityRequest::manual(at(1000), at(1100), PathBuf::from("late.request")),
            ActivityRequest::manual(at(10), at(20), PathBuf::from("early.request")),
        ];

        let matched = match_requests(requests, &catalog);

        assert_eq!(matched.len(), 1);
        assert_eq!(
            matched[0].request.marker_path.as_deref(),
            Some(std::path::Path::new("early.request"))
        );
    }

    #[test]
    fn test_empty_catalog() {
        let request = ActivityRequest::manual(at(0), at(10), PathBuf::from("x.request"));
        assert!(match_requests(vec![request], &[]).is_empty());
    }
}
