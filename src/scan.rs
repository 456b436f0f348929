use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions picked up when walking a directory. Files named explicitly on
/// the command line are never filtered by extension.
pub const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"];

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Build the ordered input list from command-line paths.
///
/// Without `recursive` the arguments pass through untouched and directories
/// are left for the reducer to reject. With it, each real directory (not a
/// link to one) is replaced in place by the image files below it, sorted by
/// file name.
pub fn collect_inputs(args: &[PathBuf], recursive: bool) -> Vec<PathBuf> {
    if !recursive {
        return args.to_vec();
    }

    let mut inputs = Vec::with_capacity(args.len());
    for arg in args {
        if is_real_dir(arg) {
            let found = walk_images(arg);
            log::debug!("{}: {} image(s) found", arg.display(), found.len());
            inputs.extend(found);
        } else {
            inputs.push(arg.clone());
        }
    }
    inputs
}

fn is_real_dir(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Recursively walk `dir`, returning image file paths in a stable order.
fn walk_images(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::warn!("Skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && has_image_extension(entry.path()))
        .map(|entry| entry.into_path())
        .collect()
}
