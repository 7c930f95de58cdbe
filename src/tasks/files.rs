use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

pub const DEFAULT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Collects image files from `folders`, in folder order. Each folder's files
/// are sorted by path so unshuffled playlists are reproducible. Missing or
/// unreadable folders are logged and skipped.
#[instrument(skip_all, fields(folders = folders.len(), recursive = recursive))]
pub fn discover_images(folders: &[PathBuf], extensions: &[String], recursive: bool) -> Vec<PathBuf> {
    let mut images = Vec::new();
    for folder in folders {
        if !folder.is_dir() {
            warn!(folder = %folder.display(), "image folder not found; skipping");
            continue;
        }
        let walker = WalkDir::new(folder)
            .follow_links(true)
            .max_depth(if recursive { usize::MAX } else { 1 });
        let mut found: Vec<PathBuf> = walker
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!(error = %err, "skipping unreadable entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_image(p, extensions))
            .collect();
        found.sort();
        debug!(folder = %folder.display(), found = found.len(), "folder scanned");
        images.extend(found);
    }
    info!(discovered = images.len(), "image scan complete");
    images
}

/// Case-insensitive extension match. `extensions` are given without the dot.
pub fn is_image(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}
