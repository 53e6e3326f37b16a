//! Merging downloaded recordings with ffmpeg
//!
//! Recordings are joined without re-encoding through ffmpeg's concat
//! demuxer: a list file names every input, ffmpeg copies the streams.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::{MergeConfig, OutputConfig};
use crate::error::{Error, Result};

/// Paths used by one concat run.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatJob {
    /// ffmpeg concat list
    pub list_file: PathBuf,
    /// Merged video
    pub output: PathBuf,
}

impl ConcatJob {
    /// Derive the list and output paths from a merged base path.
    pub fn new(base: &Path, output: &OutputConfig) -> Self {
        Self {
            list_file: with_suffix(base, &output.list_extension),
            output: with_suffix(base, &output.recording_extension),
        }
    }

    /// ffmpeg arguments for this job.
    pub fn args(&self, log_level: &str) -> Vec<String> {
        vec![
            "-loglevel".to_string(),
            log_level.to_string(),
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            self.list_file.to_string_lossy().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            self.output.to_string_lossy().to_string(),
        ]
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> Result<PathBuf> {
    which::which("ffmpeg").map_err(|_| Error::Merge("ffmpeg not found in PATH".to_string()))
}

/// Render a concat list, one `file '<absolute path>'` line per input.
pub fn concat_list(recordings: &[PathBuf]) -> Result<String> {
    let mut list = String::new();
    for recording in recordings {
        let absolute = std::path::absolute(recording)?;
        let quoted = absolute.to_string_lossy().replace('\'', r"'\''");
        list.push_str(&format!("file '{}'\n", quoted));
    }
    Ok(list)
}

/// Concatenate `recordings` into `<base><recording_extension>`.
///
/// An existing output is replaced. The list file is removed on success and
/// kept for inspection on failure.
pub fn merge_recordings(
    recordings: &[PathBuf],
    base: &Path,
    output: &OutputConfig,
    merge: &MergeConfig,
) -> Result<PathBuf> {
    if recordings.is_empty() {
        return Err(Error::Merge("nothing to merge".to_string()));
    }

    let job = ConcatJob::new(base, output);
    tracing::info!(output = %job.output.display(), inputs = recordings.len(), "Merging recordings");

    if let Some(dir) = job.list_file.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&job.list_file, concat_list(recordings)?)?;

    if job.output.is_file() {
        std::fs::remove_file(&job.output)?;
    }

    let ffmpeg = check_ffmpeg()?;
    let args = job.args(&merge.ffmpeg_log_level);
    tracing::debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

    let result = Command::new(ffmpeg)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(Error::Merge(format!(
            "ffmpeg exited with {}: {}",
            result.status,
            stderr.lines().last().unwrap_or("")
        )));
    }

    Ok(finish(job))
}

/// Drop the concat list of a successful merge. The merged file is kept
/// even if the list cannot be removed.
fn finish(job: ConcatJob) -> PathBuf {
    if let Err(e) = std::fs::remove_file(&job.list_file) {
        tracing::warn!(
            list = %job.list_file.display(),
            error = %e,
            "Failed to remove ffmpeg concat list"
        );
    }
    job.output
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_job_paths() {
        let job = ConcatJob::new(Path::new("/srv/2020-05-14/2020-05-14-120000"), &OutputConfig::default());
        assert_eq!(job.list_file, PathBuf::from("/srv/2020-05-14/2020-05-14-120000.txt"));
        assert_eq!(job.output, PathBuf::from("/srv/2020-05-14/2020-05-14-120000.mp4"));
    }

    #[test]
    fn test_finish_survives_missing_list() {
        let dir = TempDir::new().unwrap();
        let job = ConcatJob::new(&dir.path().join("merged"), &OutputConfig::default());
        std::fs::write(&job.output, "video").unwrap();

        // List already gone: still a successful merge
        assert_eq!(finish(job.clone()), job.output);

        std::fs::write(&job.list_file, "file 'a.mp4'\n").unwrap();
        assert_eq!(finish(job.clone()), job.output);
        assert!(!job.list_file.exists());
        assert!(job.output.exists());
    }

    #[test]
    fn test_args() {
        let job = ConcatJob {
            list_file: PathBuf::from("/tmp/a.txt"),
            output: PathBuf::from("/tmp/a.mp4"),
        };
        assert_eq!(
            job.args("error").join(" "),
            "-loglevel error -y -f concat -safe 0 -i /tmp/a.txt -c copy /tmp/a.mp4"
        );
    }

    #[test]
    fn test_concat_list_quotes_paths() {
        let list = concat_list(&[
            PathBuf::from("/rec/one.mp4"),
            PathBuf::from("/rec/it's.mp4"),
        ])
        .unwrap();
        assert_eq!(list, "file '/rec/one.mp4'\nfile '/rec/it'\\''s.mp4'\n");
    }

    #[test]
    fn test_concat_list_makes_paths_absolute() {
        let list = concat_list(&[PathBuf::from("relative.mp4")]).unwrap();
        let cwd = std::env::current_dir().unwrap();
        assert!(list.contains(&cwd.join("relative.mp4").to_string_lossy().to_string()));
    }

    #[test]
    fn test_merge_nothing() {
        let dir = TempDir::new().unwrap();
        let err = merge_recordings(
            &[],
            &dir.path().join("out"),
            &OutputConfig::default(),
            &MergeConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Merge(_)));
    }
}
