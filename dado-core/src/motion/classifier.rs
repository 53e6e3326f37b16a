//! Hysteresis state machine turning per-frame change scores into requests.
//!
//! A frame is *triggered* when its dissimilarity is strictly above the
//! configured sensitivity. A recording starts once `start_count` further
//! triggered frames follow the first one, and ends once `stop_count` further
//! quiet frames follow the first quiet one:
//!
//! ```text
//!            triggered                 count >= start_count
//!   Idle ───────────────► CountingIn ─────────────────────► Recording
//!    ▲                        │ quiet                        │    ▲
//!    └────────────────────────┘                        quiet │    │ triggered
//!    ▲                                                       ▼    │
//!    └─────────────── count >= stop_count ──────────────── CountingOut
//! ```
//!
//! Recordings longer than `maximum_video_length` are split without waiting
//! for the activity to stop.

use chrono::Duration;

use crate::config::MotionConfig;
use crate::types::{ActivityRequest, FrameItem, ProcessingCursor};

/// State of one classification pass.
///
/// The pending trigger frame only exists in the states that need it.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierState {
    Idle,
    CountingIn { trigger: FrameItem, count: i64 },
    Recording { trigger: FrameItem },
    CountingOut { trigger: FrameItem, count: i64 },
}

impl ClassifierState {
    pub fn name(&self) -> &'static str {
        match self {
            ClassifierState::Idle => "idle",
            ClassifierState::CountingIn { .. } => "counting_in",
            ClassifierState::Recording { .. } => "recording",
            ClassifierState::CountingOut { .. } => "counting_out",
        }
    }

    /// Apply one frame. Returns the next state and the request closed by
    /// this frame, if any.
    pub fn transition(
        self,
        frame: &FrameItem,
        triggered: bool,
        config: &MotionConfig,
    ) -> (ClassifierState, Option<ActivityRequest>) {
        match self {
            ClassifierState::Idle => {
                if triggered {
                    confirm_start(frame.clone(), 0, frame, config)
                } else {
                    (ClassifierState::Idle, None)
                }
            }

            ClassifierState::CountingIn { trigger, count } => {
                if triggered {
                    confirm_start(trigger, count + 1, frame, config)
                } else {
                    // False alarm
                    (ClassifierState::Idle, None)
                }
            }

            ClassifierState::Recording { trigger } => {
                if triggered {
                    (ClassifierState::Recording { trigger }, None)
                } else {
                    (ClassifierState::CountingOut { trigger, count: 0 }, None)
                }
            }

            ClassifierState::CountingOut { trigger, count } => {
                if triggered {
                    (ClassifierState::Recording { trigger }, None)
                } else {
                    let count = count + 1;
                    if count >= config.stop_count {
                        tracing::info!(at = %frame.start_time, "Detected a recording finishing");
                        let request = ActivityRequest::motion(trigger, frame.clone());
                        tracing::info!(
                            start = %request.start_time,
                            end = %request.end_time,
                            "Requesting recording"
                        );
                        (ClassifierState::Idle, Some(request))
                    } else {
                        (ClassifierState::CountingOut { trigger, count }, None)
                    }
                }
            }
        }
    }
}

fn confirm_start(
    trigger: FrameItem,
    count: i64,
    frame: &FrameItem,
    config: &MotionConfig,
) -> (ClassifierState, Option<ActivityRequest>) {
    if count >= config.start_count {
        tracing::info!(at = %frame.start_time, "Detected a recording starting");
        (ClassifierState::Recording { trigger }, None)
    } else {
        (ClassifierState::CountingIn { trigger, count }, None)
    }
}

/// Output of one classification pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// Closed requests, in time order
    pub requests: Vec<ActivityRequest>,
    /// Cursor to persist for the next pass (the input cursor if unchanged)
    pub cursor: Option<ProcessingCursor>,
}

/// Classifies ordered frame items into activity requests.
#[derive(Debug, Clone)]
pub struct ActivityClassifier {
    config: MotionConfig,
}

impl ActivityClassifier {
    pub fn new(config: MotionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Whether the frame's score is above the sensitivity threshold.
    ///
    /// Frames without a score are never triggered.
    pub fn is_triggered(&self, frame: &FrameItem) -> bool {
        frame.dissimilarity.unwrap_or(0.0) > self.config.sensitivity
    }

    /// Run one pass over `frames`, which must be in time order and already
    /// exclude everything covered by `cursor`.
    ///
    /// The pass always starts `Idle`. An interval still open when the frames
    /// run out is not emitted, and the cursor is left at the last idle point
    /// so the next pass sees the tail again.
    pub fn identify_requests(
        &self,
        frames: &[FrameItem],
        cursor: Option<ProcessingCursor>,
    ) -> Classification {
        // Out of TimeDelta's range means the limit is never reached.
        let max_length = i64::try_from(self.config.maximum_video_length)
            .ok()
            .and_then(Duration::try_seconds);
        let mut state = ClassifierState::Idle;
        let mut requests = Vec::new();
        let mut cursor = cursor;
        let mut last: Option<&FrameItem> = None;

        for frame in frames {
            let triggered = self.is_triggered(frame);
            tracing::debug!(
                at = %frame.start_time,
                state = state.name(),
                dissimilarity = ?frame.dissimilarity,
                "Classifying frame"
            );

            let (next, closed) = state.transition(frame, triggered, &self.config);
            state = next;
            requests.extend(closed);

            if let Some(previous) = last {
                // Lags one frame behind so a quiet tail is re-read next pass.
                if matches!(state, ClassifierState::Idle)
                    && !triggered
                    && !self.is_triggered(previous)
                {
                    cursor = Some(ProcessingCursor::new(previous.clone()));
                }

                if let ClassifierState::Recording { trigger } = &state {
                    if max_length.is_some_and(|max| frame.end_time - trigger.start_time > max) {
                        let request = ActivityRequest::motion(trigger.clone(), previous.clone());
                        tracing::info!(
                            start = %request.start_time,
                            end = %request.end_time,
                            "Splitting recording at maximum length"
                        );
                        requests.push(request);
                        cursor = Some(ProcessingCursor::new(previous.clone()));
                        state = ClassifierState::Recording {
                            trigger: frame.clone(),
                        };
                    }
                }
            }

            last = Some(frame);
        }

        if !matches!(state, ClassifierState::Idle) {
            tracing::debug!(
                state = state.name(),
                "Pass ended with an open interval, leaving it for the next pass"
            );
        }

        Classification { requests, cursor }
    }
}
