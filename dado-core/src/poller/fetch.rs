//! Downloading files from the camera into the local layout

use std::path::{Path, PathBuf};

use crate::camera::Camera;

/// Which part of a cycle a download belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Thumbnails,
    Recordings,
    Events,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Thumbnails => "thumbnails",
            Stage::Recordings => "recordings",
            Stage::Events => "events",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for one batch of downloads.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FetchResult {
    /// Files fetched in this batch
    pub downloaded: usize,
    /// Files already present locally
    pub skipped: usize,
    /// Files the camera could not deliver
    pub failed: usize,
    /// Bytes written
    pub bytes: u64,
}

impl FetchResult {
    /// Every requested file is now present.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    pub fn add(&mut self, other: &FetchResult) {
        self.downloaded += other.downloaded;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.bytes += other.bytes;
    }
}

/// A non-empty file exists at `path`.
pub fn is_present(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Download `(remote name, local path)` pairs, skipping files already present.
///
/// The callback receives `(stage, current_index, total_missing, remote_name)`
/// before each download. Failures are logged and counted, never returned.
pub fn fetch_files<C, F>(
    camera: &mut C,
    files: &[(String, PathBuf)],
    stage: Stage,
    on_progress: &mut F,
) -> FetchResult
where
    C: Camera + ?Sized,
    F: FnMut(Stage, usize, usize, &str),
{
    let mut result = FetchResult::default();

    let missing: Vec<&(String, PathBuf)> = files.iter().filter(|(_, local)| !is_present(local)).collect();
    result.skipped = files.len() - missing.len();

    tracing::info!(
        stage = %stage,
        already_downloaded = result.skipped,
        remaining = missing.len(),
        "Fetching files"
    );

    let total = missing.len();
    for (i, (remote, local)) in missing.into_iter().enumerate() {
        on_progress(stage, i, total, remote);

        if let Some(dir) = local.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::error!(dir = %dir.display(), error = %e, "Failed to create directory");
                result.failed += 1;
                continue;
            }
        }

        match camera.download(remote, local) {
            Ok(bytes) => {
                tracing::debug!(
                    "{}/{}: Downloaded {} ({} bytes)",
                    i + 1,
                    total,
                    remote,
                    bytes
                );
                result.downloaded += 1;
                result.bytes += bytes;
            }
            Err(e) => {
                tracing::error!(file = %remote, error = %e, "Failed to download");
                result.failed += 1;
            }
        }
    }

    result
}
