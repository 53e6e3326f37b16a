//! Networked dashcam access
//!
//! The daemon talks to the device through the [`Camera`] trait. The only
//! implementation today is [`DdpaiCamera`].

pub mod ddpai;

pub use ddpai::{DdpaiCamera, DdpaiClient};

use std::path::Path;

use crate::error::Result;
use crate::types::FrameItem;

/// Blocking access to one camera.
pub trait Camera {
    /// Open a session. `Ok(false)` means the device is not reachable and the
    /// polling cycle should be skipped.
    fn initiate(&mut self) -> Result<bool>;

    /// Recordings on the device, ordered by start time, with thumbnail names.
    fn list_recordings(&mut self) -> Result<Vec<FrameItem>>;

    /// Event clips and snapshots saved by the device.
    fn list_events(&mut self) -> Result<Vec<FrameItem>>;

    /// Fetch `remote_name` into `dest`, returning the number of bytes written.
    fn download(&mut self, remote_name: &str, dest: &Path) -> Result<u64>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::path::Path;

    use super::Camera;
    use crate::error::{Error, Result};
    use crate::types::FrameItem;

    /// In-memory camera serving fixed listings and file contents.
    #[derive(Debug, Default)]
    pub struct FakeCamera {
        pub available: bool,
        pub recordings: Vec<FrameItem>,
        pub events: Vec<FrameItem>,
        pub files: HashMap<String, Vec<u8>>,
        pub downloads: Vec<String>,
    }

    impl FakeCamera {
        pub fn new() -> Self {
            Self {
                available: true,
                ..Default::default()
            }
        }

        pub fn serve(&mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) {
            self.files.insert(name.into(), contents.into());
        }
    }

    impl Camera for FakeCamera {
        fn initiate(&mut self) -> Result<bool> {
            Ok(self.available)
        }

        fn list_recordings(&mut self) -> Result<Vec<FrameItem>> {
            Ok(self.recordings.clone())
        }

        fn list_events(&mut self) -> Result<Vec<FrameItem>> {
            Ok(self.events.clone())
        }

        fn download(&mut self, remote_name: &str, dest: &Path) -> Result<u64> {
            let contents = self
                .files
                .get(remote_name)
                .ok_or_else(|| Error::Camera(format!("API error (404 Not Found): {}", remote_name)))?;
            std::fs::write(dest, contents)?;
            self.downloads.push(remote_name.to_string());
            Ok(contents.len() as u64)
        }
    }
}
