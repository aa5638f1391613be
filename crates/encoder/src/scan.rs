use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{EncodeError, Result};

/// Media file extensions to consider for transcoding
const MEDIA_EXTENSIONS: &[&str] = &["mkv", "mp4", "m4v", "avi", "mov", "webm", "ts", "m2ts"];

/// Prefix shared by the pipeline's scratch files
const SCRATCH_PREFIX: &str = "temp_";

/// Whether a path looks like a media file the pipeline should pick up
pub fn is_media_candidate(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };
    if name.starts_with(SCRATCH_PREFIX) {
        return false;
    }
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| MEDIA_EXTENSIONS.contains(&s.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// List media files directly inside `dir`, sorted by file name.
pub fn collect_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(EncodeError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ));
    }

    info!("Scanning directory: {}", dir.display());

    let mut inputs = Vec::new();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        if !is_media_candidate(path) {
            debug!("Ignoring non-media file: {}", path.display());
            continue;
        }

        debug!("Found media file: {}", path.display());
        inputs.push(path.to_path_buf());
    }

    info!("Scan complete: {} media file(s) in {}", inputs.len(), dir.display());
    Ok(inputs)
}
