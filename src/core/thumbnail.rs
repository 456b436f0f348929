use image::{imageops::FilterType, DynamicImage, ImageReader};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reasons a path cannot be reduced to a thumbnail.
///
/// Every variant is recoverable: the caller drops the file and carries on.
#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not be opened as image: {0}")]
    Image(#[from] image::ImageError),

    #[error("is a directory: {path}")]
    Directory { path: String },

    #[error("is a symbolic link: {path}")]
    SymbolicLink { path: String },
}

/// Fixed target shape every source image is resampled to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailShape {
    pub width: u32,
    pub height: u32,
}

impl ThumbnailShape {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl Default for ThumbnailShape {
    fn default() -> Self {
        Self::new(100, 100)
    }
}

/// Grayscale, fixed-shape reduction of one source image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageThumbnail {
    path: PathBuf,
    pixels: Vec<u8>,
}

impl ImageThumbnail {
    pub fn new(path: impl Into<PathBuf>, pixels: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            pixels,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Row-major luminance values.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// An input that failed to reduce, with its 1-based position in the input list.
#[derive(Debug)]
pub struct Rejection {
    pub position: usize,
    pub path: PathBuf,
    pub error: ThumbnailError,
}

/// Outcome of reducing a whole input list.
#[derive(Debug, Default)]
pub struct Reduction {
    /// Thumbnails in submission order, failures skipped in place.
    pub accepted: Vec<ImageThumbnail>,
    pub rejected: Vec<Rejection>,
}

/// ITU-R BT.601 luma in 16.16 fixed point, rounded.
pub fn luma([r, g, b]: [u8; 3]) -> u8 {
    let weighted = u32::from(r) * 19595 + u32::from(g) * 38470 + u32::from(b) * 7471;
    ((weighted + 0x8000) >> 16) as u8
}

pub struct ThumbnailReducer {
    shape: ThumbnailShape,
}

impl ThumbnailReducer {
    pub fn new(shape: ThumbnailShape) -> Self {
        Self { shape }
    }

    pub fn shape(&self) -> ThumbnailShape {
        self.shape
    }

    /// Reduce a single image file to its grayscale thumbnail.
    ///
    /// Directories and symbolic links are rejected before any decoding is
    /// attempted. The format is sniffed from the file contents, so a
    /// misnamed file still decodes and a non-image never does.
    pub fn reduce(&self, path: &Path) -> Result<ImageThumbnail, ThumbnailError> {
        let metadata = fs::symlink_metadata(path)?;
        if metadata.file_type().is_symlink() {
            return Err(ThumbnailError::SymbolicLink {
                path: path.to_string_lossy().to_string(),
            });
        }
        if metadata.is_dir() {
            return Err(ThumbnailError::Directory {
                path: path.to_string_lossy().to_string(),
            });
        }

        let img = self.load_image(path)?;
        let pixels = self.grayscale_pixels(&img);
        debug_assert_eq!(pixels.len(), self.shape.pixel_count());

        Ok(ImageThumbnail::new(path, pixels))
    }

    /// Reduce every path on the rayon pool.
    ///
    /// `on_done` is called once per path as it finishes, in completion order.
    /// The returned thumbnails keep submission order regardless.
    pub fn reduce_all<F>(&self, paths: &[PathBuf], on_done: F) -> Reduction
    where
        F: Fn(&Path) + Sync,
    {
        let results: Vec<Result<ImageThumbnail, ThumbnailError>> = paths
            .par_iter()
            .map(|path| {
                let result = self.reduce(path);
                on_done(path);
                result
            })
            .collect();

        let mut reduction = Reduction::default();
        for (index, (path, result)) in paths.iter().zip(results).enumerate() {
            match result {
                Ok(thumbnail) => reduction.accepted.push(thumbnail),
                Err(error) => {
                    log::debug!("rejected {}: {}", path.display(), error);
                    reduction.rejected.push(Rejection {
                        position: index + 1,
                        path: path.clone(),
                        error,
                    });
                }
            }
        }
        reduction
    }

    // The reader owns the file handle and drops it before returning, on
    // success and on error alike.
    fn load_image(&self, path: &Path) -> Result<DynamicImage, ThumbnailError> {
        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        Ok(img)
    }

    fn grayscale_pixels(&self, img: &DynamicImage) -> Vec<u8> {
        // Aspect ratio is not kept: every thumbnail must have the same length.
        let resized = img.resize_exact(self.shape.width, self.shape.height, FilterType::Lanczos3);
        resized.to_rgb8().pixels().map(|p| luma(p.0)).collect()
    }
}

impl Default for ThumbnailReducer {
    fn default() -> Self {
        Self::new(ThumbnailShape::default())
    }
}
