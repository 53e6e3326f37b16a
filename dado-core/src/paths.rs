//! Local file layout
//!
//! Output locations are templates relative to `output.root`. A template is a
//! strftime pattern evaluated on the item's local start time, with `{name}`
//! (the remote file name) and `{stem}` (the name without extension)
//! substituted afterwards.

use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, Utc};

use crate::config::OutputConfig;
use crate::error::{Error, Result};
use crate::types::{ActivityRequest, FrameItem};

/// Reject templates chrono cannot format.
pub fn validate_template(template: &str) -> Result<()> {
    if StrftimeItems::new(template).any(|item| matches!(item, Item::Error)) {
        return Err(Error::Config(format!("invalid path template: {}", template)));
    }
    Ok(())
}

/// Render `template` for a file called `name` starting at `at`.
pub fn render(template: &str, root: &Path, name: &str, at: DateTime<Utc>) -> Result<PathBuf> {
    validate_template(template)?;

    let local = at.with_timezone(&Local);
    let dated = local.format(template).to_string();
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let relative = dated.replace("{name}", name).replace("{stem}", stem);

    Ok(root.join(relative))
}

/// Where an item's thumbnail is stored
pub fn thumbnail_path(output: &OutputConfig, item: &FrameItem) -> Result<Option<PathBuf>> {
    item.thumbnail
        .as_deref()
        .map(|thumbnail| render(&output.thumbnail, &output.root, thumbnail, item.start_time))
        .transpose()
}

/// Where an item's recording is stored
pub fn recording_path(output: &OutputConfig, item: &FrameItem) -> Result<PathBuf> {
    render(&output.recording, &output.root, &item.name, item.start_time)
}

/// Where a device event is stored
pub fn event_path(output: &OutputConfig, item: &FrameItem) -> Result<PathBuf> {
    render(&output.event, &output.root, &item.name, item.start_time)
}

/// Base path (without extension) of a request's merged video
pub fn merged_base(output: &OutputConfig, request: &ActivityRequest) -> Result<PathBuf> {
    render(&output.merged, &output.root, request.kind.as_str(), request.start_time)
}

/// Fill in thumbnail and recording paths for catalog items.
pub fn assign_paths(output: &OutputConfig, items: &mut [FrameItem]) -> Result<()> {
    for item in items.iter_mut() {
        item.thumbnail_path = thumbnail_path(output, item)?;
        item.recording_path = Some(recording_path(output, item)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn output() -> OutputConfig {
        OutputConfig {
            root: PathBuf::from("/srv/dashcam"),
            ..Default::default()
        }
    }

    fn item() -> FrameItem {
        let start = Local
            .with_ymd_and_hms(2020, 5, 14, 12, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let mut item = FrameItem::new("20200514120000_0060.mp4", start, start);
        item.thumbnail = Some("20200514120000_0060_T.jpg".to_string());
        item
    }

    #[test]
    fn test_render_placeholders() {
        let item = item();
        let path = render("clips/%Y/%m/{stem}-%H%M.mkv", Path::new("/out"), &item.name, item.start_time).unwrap();
        assert_eq!(path, PathBuf::from("/out/clips/2020/05/20200514120000_0060-1200.mkv"));
    }

    #[test]
    fn test_default_layout() {
        let output = output();
        let mut items = vec![item()];

        assign_paths(&output, &mut items).unwrap();

        assert_eq!(
            items[0].thumbnail_path,
            Some(PathBuf::from(
                "/srv/dashcam/.thumbnails/2020-05-14/20200514120000_0060_T.jpg"
            ))
        );
        assert_eq!(
            items[0].recording_path,
            Some(PathBuf::from(
                "/srv/dashcam/.recordings/2020-05-14/20200514120000_0060.mp4"
            ))
        );
        assert_eq!(
            event_path(&output, &items[0]).unwrap(),
            PathBuf::from("/srv/dashcam/events/2020-05-14/20200514120000_0060.mp4")
        );
    }

    #[test]
    fn test_merged_base() {
        let item = item();
        let request = ActivityRequest::motion(item.clone(), item);
        assert_eq!(
            merged_base(&output(), &request).unwrap(),
            PathBuf::from("/srv/dashcam/2020-05-14/2020-05-14-120000")
        );
    }

    #[test]
    fn test_item_without_thumbnail() {
        let mut item = item();
        item.thumbnail = None;
        assert_eq!(thumbnail_path(&output(), &item).unwrap(), None);
    }

    #[test]
    fn test_invalid_template() {
        assert!(validate_template("%Y-%Q/{name}").is_err());
        assert!(validate_template("%Y-%m-%d/{name}").is_ok());
    }
}
