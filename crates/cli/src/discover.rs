//! Expand file and folder arguments into an ordered list of videos

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions treated as video files (compared case-insensitively)
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "mkv", "avi", "webm", "mts", "mpg", "mpeg", "wmv"];

pub fn is_video(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|ext| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)))
}

/// Files are taken as given; folders are walked recursively (sorted, hidden
/// entries skipped) for video files. Duplicates keep their first position.
pub fn discover_videos(paths: &[PathBuf]) -> Vec<PathBuf> {
  let mut videos = Vec::new();

  for path in paths {
    if path.is_file() {
      videos.push(path.clone());
      continue;
    }
    if !path.is_dir() {
      warn!(path = %path.display(), "Not found, skipping");
      continue;
    }

    let walker = WalkDir::new(path)
      .follow_links(true)
      .sort_by_file_name()
      .into_iter()
      .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in walker {
      match entry {
        Ok(entry) if entry.file_type().is_file() && is_video(entry.path()) => videos.push(entry.into_path()),
        Ok(_) => {}
        Err(e) => debug!("Skipping unreadable entry: {e}"),
      }
    }
  }

  let mut seen = std::collections::HashSet::new();
  videos.retain(|v| seen.insert(v.clone()));
  videos
}
