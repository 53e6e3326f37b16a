//! Dissimilarity scores between consecutive thumbnails.
//!
//! The classifier only sees the resulting number; everything that touches
//! pixels lives here.

use std::path::Path;

use image::RgbImage;

use crate::error::{Error, Result};
use crate::types::FrameItem;

/// Produces a non-negative change score for a pair of consecutive frames.
pub trait DissimilarityScorer {
    /// Decoded frame
    type Frame;

    /// Decode a thumbnail from disk.
    fn load(&self, path: &Path) -> Result<Self::Frame>;

    /// Score `current` against `previous`.
    fn score(&self, previous: &Self::Frame, current: &Self::Frame) -> Result<f64>;
}

/// Mean squared error over all colour channels, normalised by pixel count.
#[derive(Debug, Clone, Copy, Default)]
pub struct MseScorer;

impl DissimilarityScorer for MseScorer {
    type Frame = RgbImage;

    fn load(&self, path: &Path) -> Result<RgbImage> {
        let decoded = image::open(path)
            .map_err(|e| Error::Image(format!("failed to decode {}: {}", path.display(), e)))?;
        Ok(decoded.to_rgb8())
    }

    fn score(&self, previous: &RgbImage, current: &RgbImage) -> Result<f64> {
        if previous.dimensions() != current.dimensions() {
            return Err(Error::Image(format!(
                "size mismatch: {:?} vs {:?}",
                previous.dimensions(),
                current.dimensions()
            )));
        }

        let (width, height) = current.dimensions();
        let pixels = f64::from(width) * f64::from(height);
        if pixels == 0.0 {
            return Ok(0.0);
        }

        let sum: f64 = previous
            .as_raw()
            .iter()
            .zip(current.as_raw())
            .map(|(a, b)| {
                let d = f64::from(*a) - f64::from(*b);
                d * d
            })
            .sum();

        Ok(round_tenth(sum / pixels))
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Score each frame against its predecessor, in place.
///
/// `anchor` is the catalog item right before `frames[0]`,
/// so the first new frame still has something to compare with. Frames whose
/// thumbnail is missing, empty, or unreadable score `0.0` and break the chain:
/// the next frame is also scored `0.0`.
///
/// Returns the number of frames that received a real comparison.
pub fn score_frames<S: DissimilarityScorer>(
    frames: &mut [FrameItem],
    anchor: Option<&FrameItem>,
    scorer: &S,
) -> usize {
    let mut previous = anchor.and_then(|frame| load_thumbnail(frame, scorer));
    let mut compared = 0;

    for frame in frames.iter_mut() {
        let current = load_thumbnail(frame, scorer);

        let score = match (&previous, &current) {
            (Some(prev), Some(cur)) => match scorer.score(prev, cur) {
                Ok(score) => {
                    compared += 1;
                    score
                }
                Err(e) => {
                    tracing::error!(frame = %frame.name, error = %e, "Error comparing images");
                    0.0
                }
            },
            _ => 0.0,
        };
        frame.dissimilarity = Some(score);

        previous = current;
    }

    compared
}

fn load_thumbnail<S: DissimilarityScorer>(frame: &FrameItem, scorer: &S) -> Option<S::Frame> {
    let path = frame.thumbnail_path.as_deref()?;

    let non_empty = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    if !non_empty {
        tracing::info!(
            path = %path.display(),
            "Skipping calculation as file does not exist or is empty"
        );
        return None;
    }

    match scorer.load(path) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Error loading image");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use image::Rgb;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Reads a single number from the file instead of decoding pixels.
    struct TextScorer;

    impl DissimilarityScorer for TextScorer {
        type Frame = f64;

        fn load(&self, path: &Path) -> Result<f64> {
            let text = std::fs::read_to_string(path)?;
            text.trim()
                .parse()
                .map_err(|_| Error::Image(format!("not a number: {}", text)))
        }

        fn score(&self, previous: &f64, current: &f64) -> Result<f64> {
            Ok((current - previous).abs())
        }
    }

    fn frame_with_thumbnail(dir: &TempDir, index: i64, contents: Option<&str>) -> FrameItem {
        let path = dir.path().join(format!("{}.txt", index));
        if let Some(contents) = contents {
            std::fs::write(&path, contents).unwrap();
        }
        let mut frame = FrameItem::instant(
            format!("{}.mp4", index),
            Utc.timestamp_opt(1_590_000_000 + index * 5, 0).unwrap(),
        );
        frame.thumbnail_path = Some(path);
        frame
    }

    fn solid(dir: &TempDir, name: &str, width: u32, height: u32, value: u8) -> PathBuf {
        let path = dir.path().join(name);
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_scores_against_predecessor() {
        let dir = TempDir::new().unwrap();
        let mut frames = vec![
            frame_with_thumbnail(&dir, 0, Some("10")),
            frame_with_thumbnail(&dir, 1, Some("14")),
            frame_with_thumbnail(&dir, 2, Some("4")),
        ];

        let compared = score_frames(&mut frames, None, &TextScorer);

        assert_eq!(compared, 2);
        let scores: Vec<_> = frames.iter().map(|f| f.dissimilarity).collect();
        assert_eq!(scores, vec![Some(0.0), Some(4.0), Some(10.0)]);
    }

    #[test]
    fn test_anchor_links_first_frame() {
        let dir = TempDir::new().unwrap();
        let anchor = frame_with_thumbnail(&dir, 0, Some("1"));
        let mut frames = vec![frame_with_thumbnail(&dir, 1, Some("8"))];

        score_frames(&mut frames, Some(&anchor), &TextScorer);

        assert_eq!(frames[0].dissimilarity, Some(7.0));
    }

    #[test]
    fn test_missing_and_broken_thumbnails_score_zero() {
        let dir = TempDir::new().unwrap();
        let mut frames = vec![
            frame_with_thumbnail(&dir, 0, Some("10")),
            frame_with_thumbnail(&dir, 1, None),
            frame_with_thumbnail(&dir, 2, Some("30")),
            frame_with_thumbnail(&dir, 3, Some("garbage")),
            frame_with_thumbnail(&dir, 4, Some("")),
            frame_with_thumbnail(&dir, 5, Some("50")),
            frame_with_thumbnail(&dir, 6, Some("52")),
        ];

        let compared = score_frames(&mut frames, None, &TextScorer);

        assert_eq!(compared, 1);
        let scores: Vec<_> = frames.iter().map(|f| f.dissimilarity.unwrap()).collect();
        assert_eq!(scores, vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0]);
    }

    #[test]
    fn test_mse_identical_images() {
        let dir = TempDir::new().unwrap();
        let a = MseScorer.load(&solid(&dir, "a.png", 8, 6, 120)).unwrap();
        let b = MseScorer.load(&solid(&dir, "b.png", 8, 6, 120)).unwrap();

        assert_eq!(MseScorer.score(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn test_mse_sums_channels_per_pixel() {
        let dir = TempDir::new().unwrap();
        let a = MseScorer.load(&solid(&dir, "a.png", 4, 4, 10)).unwrap();
        let b = MseScorer.load(&solid(&dir, "b.png", 4, 4, 13)).unwrap();

        // Three channels each differ by 3
        assert_eq!(MseScorer.score(&a, &b).unwrap(), 27.0);
    }

    #[test]
    fn test_mse_rejects_size_mismatch() {
        let dir = TempDir::new().unwrap();
        let a = MseScorer.load(&solid(&dir, "a.png", 4, 4, 10)).unwrap();
        let b = MseScorer.load(&solid(&dir, "b.png", 5, 4, 10)).unwrap();

        assert!(MseScorer.score(&a, &b).is_err());
    }

    #[test]
    fn test_round_tenth() {
        assert_eq!(round_tenth(12.345), 12.3);
        assert_eq!(round_tenth(0.05), 0.1);
    }
}
