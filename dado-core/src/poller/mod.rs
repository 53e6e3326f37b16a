//! One polling cycle against the camera
//!
//! ```text
//! list ─► filter by cursor ─► fetch thumbnails ─► score ─► classify
//!                                                            │
//!    save cursor ◄── merge ◄── fetch recordings ◄── match ◄──┘
//! ```
//!
//! Download and merge failures are counted in the [`CycleResult`]; only
//! local problems (state store, path templates) abort a cycle.

mod fetch;

pub use fetch::{fetch_files, is_present, FetchResult, Stage};

use std::path::PathBuf;

use crate::camera::Camera;
use crate::config::Config;
use crate::db::CursorStore;
use crate::error::Result;
use crate::media;
use crate::motion::{filter_processed, score_frames, ActivityClassifier, DissimilarityScorer, MseScorer};
use crate::paths;
use crate::requests::{find_manual_requests, match_requests, remove_marker};
use crate::types::{ActivityRequest, FrameItem, MatchedRequest, ProcessingCursor, RequestLogEntry};

/// What happened during one cycle.
#[derive(Debug, Default)]
pub struct CycleResult {
    /// Whether the camera answered at all
    pub camera_available: bool,
    /// Recordings listed by the camera
    pub recordings_listed: usize,
    /// Recordings after the processing cursor
    pub recordings_unprocessed: usize,
    /// Manual requests found on disk
    pub manual_requests: usize,
    /// Requests emitted by motion detection
    pub motion_requests: usize,
    /// Requests that matched at least one recording
    pub requests_matched: usize,
    pub thumbnails: FetchResult,
    pub recordings: FetchResult,
    pub events: FetchResult,
    pub merges_succeeded: usize,
    pub merges_failed: usize,
    pub markers_removed: usize,
    /// Requests handled this cycle, for the request log
    pub handled: Vec<RequestLogEntry>,
    /// Cursor at the end of the cycle
    pub cursor: Option<ProcessingCursor>,
    /// Whether the cursor moved
    pub cursor_advanced: bool,
    /// Problems that did not abort the cycle
    pub errors: Vec<String>,
}

/// Drives the camera, classifier and downloads for one cycle at a time.
pub struct PollCoordinator<'a, C, S, D = MseScorer>
where
    C: Camera,
    S: CursorStore,
    D: DissimilarityScorer,
{
    config: Config,
    camera: C,
    store: &'a S,
    scorer: D,
    classifier: ActivityClassifier,
    dry_run: bool,
}

impl<'a, C, S> PollCoordinator<'a, C, S, MseScorer>
where
    C: Camera,
    S: CursorStore,
{
    /// Coordinator scoring thumbnails by mean squared error.
    pub fn new(config: Config, camera: C, store: &'a S) -> Self {
        Self::with_scorer(config, camera, store, MseScorer)
    }
}

impl<'a, C, S, D> PollCoordinator<'a, C, S, D>
where
    C: Camera,
    S: CursorStore,
    D: DissimilarityScorer,
{
    pub fn with_scorer(config: Config, camera: C, store: &'a S, scorer: D) -> Self {
        let classifier = ActivityClassifier::new(config.motion.clone());
        Self {
            config,
            camera,
            store,
            scorer,
            classifier,
            dry_run: false,
        }
    }

    /// List and classify only: no recording downloads, merges, marker
    /// removal, or cursor writes. Thumbnails already on disk are still scored.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    /// Run one cycle.
    pub fn run_cycle(&mut self) -> Result<CycleResult> {
        self.run_cycle_with_progress(|_, _, _, _| {})
    }

    /// Run one cycle with a download progress callback.
    ///
    /// The callback receives `(stage, current_index, total, remote_name)`
    /// before each file is downloaded.
    pub fn run_cycle_with_progress<F>(&mut self, mut on_progress: F) -> Result<CycleResult>
    where
        F: FnMut(Stage, usize, usize, &str),
    {
        let mut result = CycleResult::default();

        match self.camera.initiate() {
            Ok(true) => result.camera_available = true,
            Ok(false) => return Ok(result),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to open camera session");
                result.errors.push(e.to_string());
                return Ok(result);
            }
        }

        if self.config.daemon.download_events {
            self.download_events(&mut result, &mut on_progress)?;
        }

        if self.config.daemon.download_recordings {
            self.process_recordings(&mut result, &mut on_progress)?;
        }

        Ok(result)
    }

    fn download_events<F>(&mut self, result: &mut CycleResult, on_progress: &mut F) -> Result<()>
    where
        F: FnMut(Stage, usize, usize, &str),
    {
        let events = match self.camera.list_events() {
            Ok(events) => events,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list events");
                result.errors.push(e.to_string());
                return Ok(());
            }
        };
        tracing::info!(count = events.len(), "Events on device");

        if self.dry_run || events.is_empty() {
            return Ok(());
        }

        let mut files = Vec::with_capacity(events.len());
        for event in &events {
            files.push((event.name.clone(), paths::event_path(&self.config.output, event)?));
        }
        result.events = fetch_files(&mut self.camera, &files, Stage::Events, on_progress);
        Ok(())
    }

    fn process_recordings<F>(&mut self, result: &mut CycleResult, on_progress: &mut F) -> Result<()>
    where
        F: FnMut(Stage, usize, usize, &str),
    {
        let mut catalog = match self.camera.list_recordings() {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list recordings");
                result.errors.push(e.to_string());
                return Ok(());
            }
        };
        paths::assign_paths(&self.config.output, &mut catalog)?;

        let cursor = self.store.load_cursor()?;
        let mut unprocessed = filter_processed(catalog.clone(), cursor.as_ref());
        result.recordings_listed = catalog.len();
        result.recordings_unprocessed = unprocessed.len();
        result.cursor = cursor.clone();

        tracing::info!(
            total = catalog.len(),
            unprocessed = unprocessed.len(),
            "Recordings on device"
        );
        if let Some(oldest) = unprocessed.first() {
            tracing::info!(start = %oldest.start_time, "Oldest unprocessed recording");
        }

        let mut requests: Vec<ActivityRequest> = Vec::new();

        if self.config.daemon.process_manual_requests {
            tracing::info!("Processing manual requests");
            match find_manual_requests(&self.config.output.root, &self.config.manual) {
                Ok(manual) => {
                    result.manual_requests = manual.len();
                    requests.extend(manual);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to search for manual requests");
                    result.errors.push(e.to_string());
                }
            }
        }

        let mut next_cursor = cursor.clone();
        if self.config.daemon.process_motion_detection && !unprocessed.is_empty() {
            tracing::info!("Processing motion detection");

            // On contiguous recordings this is the boundary item after the cursor.
            let anchor = scoring_anchor(&catalog, &unprocessed[0]);

            if !self.dry_run {
                let mut thumbnails = thumbnail_files(anchor.as_slice());
                thumbnails.extend(thumbnail_files(&unprocessed));
                result.thumbnails = fetch_files(&mut self.camera, &thumbnails, Stage::Thumbnails, on_progress);
            }

            score_frames(&mut unprocessed, anchor.as_ref(), &self.scorer);

            let classification = self.classifier.identify_requests(&unprocessed, cursor.clone());
            result.motion_requests = classification.requests.len();
            requests.extend(classification.requests);
            next_cursor = classification.cursor;
        }

        let matched = match_requests(requests, &catalog);
        result.requests_matched = matched.len();

        for request in &matched {
            if self.dry_run {
                tracing::info!(
                    kind = %request.request.kind,
                    start = %request.request.start_time,
                    end = %request.request.end_time,
                    recordings = request.recordings.len(),
                    "Would download request"
                );
                continue;
            }
            self.handle_request(request, result, on_progress)?;
        }

        if self.config.daemon.force_download_all && !self.dry_run {
            tracing::info!("Processing forced download of all recordings");
            let files = recording_files(&unprocessed);
            let forced = fetch_files(&mut self.camera, &files, Stage::Recordings, on_progress);
            result.recordings.add(&forced);
        }

        result.cursor_advanced = next_cursor != cursor;
        if result.cursor_advanced && !self.dry_run {
            if let Some(next) = &next_cursor {
                self.store.save_cursor(next)?;
                tracing::info!(end = %next.end_time(), "Processing cursor advanced");
            }
        }
        result.cursor = next_cursor;

        Ok(())
    }

    /// Download, merge, and clean up after one matched request.
    fn handle_request<F>(&mut self, matched: &MatchedRequest, result: &mut CycleResult, on_progress: &mut F) -> Result<()>
    where
        F: FnMut(Stage, usize, usize, &str),
    {
        let files = recording_files(&matched.recordings);
        let fetched = fetch_files(&mut self.camera, &files, Stage::Recordings, on_progress);
        result.recordings.add(&fetched);

        let available: Vec<PathBuf> = files
            .iter()
            .map(|(_, local)| local.clone())
            .filter(|local| is_present(local))
            .collect();
        tracing::debug!(
            requested = files.len(),
            available = available.len(),
            "Recordings downloaded"
        );

        let merge_status = if self.config.merge.enabled && !available.is_empty() {
            let base = paths::merged_base(&self.config.output, &matched.request)?;
            match media::merge_recordings(&available, &base, &self.config.output, &self.config.merge) {
                Ok(output) => {
                    tracing::info!(output = %output.display(), "Merged recordings");
                    result.merges_succeeded += 1;
                    Some(true)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error merging recordings with ffmpeg");
                    result.merges_failed += 1;
                    result.errors.push(e.to_string());
                    Some(false)
                }
            }
        } else {
            None
        };

        if fetched.is_complete() {
            match remove_marker(&matched.request) {
                Ok(true) => result.markers_removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to remove manual request marker");
                    result.errors.push(e.to_string());
                }
            }
        }

        result
            .handled
            .push(RequestLogEntry::handled(matched, available.len(), merge_status));
        Ok(())
    }
}

/// The catalog item right before `first`, whose thumbnail is the reference
/// for `first`'s score.
fn scoring_anchor(catalog: &[FrameItem], first: &FrameItem) -> Option<FrameItem> {
    catalog
        .iter()
        .take_while(|item| item.start_time < first.start_time)
        .last()
        .cloned()
}

fn thumbnail_files(items: &[FrameItem]) -> Vec<(String, PathBuf)> {
    items
        .iter()
        .filter_map(|item| Some((item.thumbnail.clone()?, item.thumbnail_path.clone()?)))
        .collect()
}

fn recording_files(items: &[FrameItem]) -> Vec<(String, PathBuf)> {
    items
        .iter()
        .filter_map(|item| Some((item.name.clone(), item.recording_path.clone()?)))
        .collect()
}
