use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::thumbnail::ImageThumbnail;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatrixError {
    /// Thumbnails of differing length reached the matrix. This means the
    /// reducer was misconfigured; there is no per-pair recovery.
    #[error("thumbnail {index} ({}) has {found} pixels, expected {expected}", .path.display())]
    DimensionMismatch {
        index: usize,
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    /// The two sides of a single comparison differ in length.
    #[error(
        "cannot compare {} ({left} pixels) with {} ({right} pixels)",
        .left_path.display(),
        .right_path.display()
    )]
    LengthMismatch {
        left_path: PathBuf,
        left: usize,
        right_path: PathBuf,
        right: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Band {
    NearDuplicate,
    Similar,
    Distinct,
}

impl Band {
    pub fn label(&self) -> &'static str {
        match self {
            Band::NearDuplicate => "near-duplicate",
            Band::Similar => "similar",
            Band::Distinct => "distinct",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Band boundaries. Lower bounds are inclusive: a coefficient equal to
/// `near` is already `Similar`, one equal to `similar` is `Distinct`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub near: f64,
    pub similar: f64,
}

impl Thresholds {
    pub const fn new(near: f64, similar: f64) -> Self {
        Self { near, similar }
    }

    pub fn band(&self, coefficient: f64) -> Band {
        if coefficient < self.near {
            Band::NearDuplicate
        } else if coefficient < self.similar {
            Band::Similar
        } else {
            Band::Distinct
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::new(1.5, 10.0)
    }
}

/// Mean absolute per-pixel difference of two equally long thumbnails.
pub fn coefficient(a: &ImageThumbnail, b: &ImageThumbnail) -> Result<f64, MatrixError> {
    if a.len() != b.len() {
        return Err(MatrixError::LengthMismatch {
            left_path: a.path().to_path_buf(),
            left: a.len(),
            right_path: b.path().to_path_buf(),
            right: b.len(),
        });
    }
    Ok(mean_abs_diff(a.pixels(), b.pixels()))
}

fn mean_abs_diff(a: &[u8], b: &[u8]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let total: u64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| u64::from(x.abs_diff(y)))
        .sum();
    total as f64 / a.len() as f64
}

// First cell of `row` in the packed lower triangle.
fn row_offset(row: usize) -> usize {
    row * row.saturating_sub(1) / 2
}

/// Strictly lower-triangular table of pairwise coefficients.
///
/// Cells are packed row after row: row `i` holds the `i` coefficients
/// against files `0..i`. The diagonal and the upper triangle are never
/// stored. Pixel data is dropped once the table is filled; only the
/// accepted paths are kept for reporting.
#[derive(Debug, Clone)]
pub struct SimilarityMatrix {
    paths: Vec<PathBuf>,
    cells: Vec<f64>,
    thresholds: Thresholds,
}

impl SimilarityMatrix {
    pub fn build(thumbnails: Vec<ImageThumbnail>) -> Result<Self, MatrixError> {
        Self::build_with_progress(thumbnails, |_| {})
    }

    /// Like [`build`](Self::build), calling `on_row` as each row completes.
    /// Rows are filled in parallel, so calls arrive in no particular order.
    pub fn build_with_progress<F>(
        thumbnails: Vec<ImageThumbnail>,
        on_row: F,
    ) -> Result<Self, MatrixError>
    where
        F: Fn(usize) + Sync,
    {
        if let Some(first) = thumbnails.first() {
            let expected = first.len();
            if let Some((index, odd)) = thumbnails
                .iter()
                .enumerate()
                .find(|(_, t)| t.len() != expected)
            {
                return Err(MatrixError::DimensionMismatch {
                    index,
                    path: odd.path().to_path_buf(),
                    expected,
                    found: odd.len(),
                });
            }
        }

        let n = thumbnails.len();
        let cells: Vec<f64> = (1..n.max(1))
            .into_par_iter()
            .flat_map_iter(|row| {
                let current = thumbnails[row].pixels();
                let values: Vec<f64> = thumbnails[..row]
                    .iter()
                    .map(|earlier| mean_abs_diff(current, earlier.pixels()))
                    .collect();
                on_row(row);
                values
            })
            .collect();
        debug_assert_eq!(cells.len(), row_offset(n));

        let paths = thumbnails
            .into_iter()
            .map(ImageThumbnail::into_path)
            .collect();

        Ok(Self {
            paths,
            cells,
            thresholds: Thresholds::default(),
        })
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Number of accepted files.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Accepted paths in index order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Symmetric lookup. The diagonal reads as `0.0`.
    pub fn coefficient(&self, i: usize, j: usize) -> Option<f64> {
        let n = self.len();
        if i >= n || j >= n {
            return None;
        }
        if i == j {
            return Some(0.0);
        }
        let (row, col) = if i > j { (i, j) } else { (j, i) };
        Some(self.cells[row_offset(row) + col])
    }

    /// Every reported pair, row by row then column by column.
    ///
    /// The iterator is lazy and borrows the matrix; call again to restart.
    pub fn classify(&self) -> Pairs<'_> {
        Pairs {
            matrix: self,
            row: 1,
            col: 0,
        }
    }
}

/// One classified lower-triangle cell. `first` is the later-accepted file
/// (`row`), `second` the earlier one (`col`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifiedPair<'a> {
    pub row: usize,
    pub col: usize,
    pub first: &'a Path,
    pub second: &'a Path,
    pub coefficient: f64,
    pub band: Band,
}

#[derive(Debug, Clone)]
pub struct Pairs<'a> {
    matrix: &'a SimilarityMatrix,
    row: usize,
    col: usize,
}

impl<'a> Iterator for Pairs<'a> {
    type Item = ClassifiedPair<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let matrix = self.matrix;
        while self.row < matrix.len() {
            if self.col >= self.row {
                self.row += 1;
                self.col = 0;
                continue;
            }

            let (row, col) = (self.row, self.col);
            self.col += 1;

            let coefficient = matrix.cells[row_offset(row) + col];
            let band = matrix.thresholds.band(coefficient);
            if band != Band::Distinct {
                return Some(ClassifiedPair {
                    row,
                    col,
                    first: &matrix.paths[row],
                    second: &matrix.paths[col],
                    coefficient,
                    band,
                });
            }
        }
        None
    }
}

impl FusedIterator for Pairs<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::thumbnail::ThumbnailReducer;
    use image::{Rgb, RgbImage};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn uniform(name: &str, value: u8) -> ImageThumbnail {
        ImageThumbnail::new(name, vec![value; 100 * 100])
    }

    fn pattern(name: &str, seed: u32) -> ImageThumbnail {
        let pixels = (0..100u32 * 100)
            .map(|k| (k.wrapping_mul(seed).wrapping_add(seed * 7) % 256) as u8)
            .collect();
        ImageThumbnail::new(name, pixels)
    }

    #[test]
    fn test_white_vs_blue_is_226_both_ways() {
        let white = uniform("white.png", 255);
        let blue = uniform("blue.png", 29);

        assert_eq!(coefficient(&white, &blue).unwrap(), 226.0);
        assert_eq!(coefficient(&blue, &white).unwrap(), 226.0);

        let matrix = SimilarityMatrix::build(vec![white, blue]).unwrap();
        assert_eq!(matrix.coefficient(1, 0), Some(226.0));
        assert_eq!(matrix.coefficient(0, 1), Some(226.0));
    }

    #[test]
    fn test_identity_and_symmetry() {
        let thumbs: Vec<ImageThumbnail> = (1..6).map(|s| pattern(&format!("{}", s), s)).collect();
        for a in &thumbs {
            assert_eq!(coefficient(a, a).unwrap(), 0.0);
            for b in &thumbs {
                assert_eq!(coefficient(a, b).unwrap(), coefficient(b, a).unwrap());
            }
        }

        let matrix = SimilarityMatrix::build(thumbs.clone()).unwrap();
        for i in 0..thumbs.len() {
            assert_eq!(matrix.coefficient(i, i), Some(0.0));
            for j in 0..thumbs.len() {
                assert_eq!(matrix.coefficient(i, j), matrix.coefficient(j, i));
                assert_eq!(
                    matrix.coefficient(i, j).unwrap(),
                    coefficient(&thumbs[i], &thumbs[j]).unwrap()
                );
            }
        }
        assert_eq!(matrix.coefficient(0, thumbs.len()), None);
    }

    #[test]
    fn test_mean_of_mixed_differences() {
        let a = ImageThumbnail::new("a", vec![0, 10, 20, 30]);
        let b = ImageThumbnail::new("b", vec![4, 4, 24, 30]);
        // |0-4| + |10-4| + |20-24| + 0 = 14
        assert_eq!(coefficient(&a, &b).unwrap(), 3.5);
    }

    #[test]
    fn test_band_boundaries() {
        let t = Thresholds::default();
        assert_eq!(t.band(0.0), Band::NearDuplicate);
        assert_eq!(t.band(1.49), Band::NearDuplicate);
        assert_eq!(t.band(1.5), Band::Similar);
        assert_eq!(t.band(9.99), Band::Similar);
        assert_eq!(t.band(10.0), Band::Distinct);
        assert_eq!(t.band(226.0), Band::Distinct);
    }

    #[test]
    fn test_dimension_mismatch_fails_whole_build() {
        let thumbs = vec![
            uniform("a", 0),
            uniform("b", 0),
            ImageThumbnail::new("c", vec![0; 64]),
        ];
        let err = SimilarityMatrix::build(thumbs).unwrap_err();
        assert_eq!(
            err,
            MatrixError::DimensionMismatch {
                index: 2,
                path: PathBuf::from("c"),
                expected: 10000,
                found: 64,
            }
        );

        let short = ImageThumbnail::new("short", vec![1, 2, 3]);
        assert_eq!(
            coefficient(&uniform("a", 0), &short).unwrap_err(),
            MatrixError::LengthMismatch {
                left_path: PathBuf::from("a"),
                left: 10000,
                right_path: PathBuf::from("short"),
                right: 3,
            }
        );
    }

    #[test]
    fn test_empty_and_single_have_no_pairs() {
        let empty = SimilarityMatrix::build(Vec::new()).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.classify().count(), 0);

        let single = SimilarityMatrix::build(vec![uniform("only", 0)]).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single.classify().count(), 0);
        assert_eq!(single.coefficient(0, 0), Some(0.0));
    }

    #[test]
    fn test_classify_order_and_bands() {
        // values chosen so every band occurs
        let thumbs = vec![
            uniform("p0", 100),
            uniform("p1", 101), // 1.0 to p0
            uniform("p2", 105), // 5.0 / 4.0
            uniform("p3", 200), // distinct from all
            uniform("p4", 100), // 0.0 to p0
        ];
        let matrix = SimilarityMatrix::build(thumbs).unwrap();
        let pairs: Vec<(usize, usize, f64, Band)> = matrix
            .classify()
            .map(|p| (p.row, p.col, p.coefficient, p.band))
            .collect();

        assert_eq!(
            pairs,
            vec![
                (1, 0, 1.0, Band::NearDuplicate),
                (2, 0, 5.0, Band::Similar),
                (2, 1, 4.0, Band::Similar),
                (4, 0, 0.0, Band::NearDuplicate),
                (4, 1, 1.0, Band::NearDuplicate),
                (4, 2, 5.0, Band::Similar),
            ]
        );

        let first = matrix.classify().next().unwrap();
        assert_eq!(first.first, Path::new("p1"));
        assert_eq!(first.second, Path::new("p0"));
    }

    #[test]
    fn test_classify_is_restartable_and_bounded() {
        let thumbs: Vec<ImageThumbnail> = (0..12u8)
            .map(|v| uniform(&format!("f{}", v), v * 2))
            .collect();
        let n = thumbs.len();
        let matrix = SimilarityMatrix::build(thumbs).unwrap();

        let first_pass: Vec<_> = matrix.classify().collect();
        let second_pass: Vec<_> = matrix.classify().collect();
        assert_eq!(first_pass, second_pass);

        assert!(first_pass.len() <= n * (n - 1) / 2);
        assert!(first_pass.iter().all(|p| p.band != Band::Distinct));
        assert!(first_pass.iter().all(|p| p.row > p.col));

        let unique: HashSet<(usize, usize)> = first_pass.iter().map(|p| (p.row, p.col)).collect();
        assert_eq!(unique.len(), first_pass.len());

        let order: Vec<(usize, usize)> = first_pass.iter().map(|p| (p.row, p.col)).collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
    }

    #[test]
    fn test_custom_thresholds() {
        let thumbs = vec![uniform("a", 0), uniform("b", 3)];
        let matrix = SimilarityMatrix::build(thumbs)
            .unwrap()
            .with_thresholds(Thresholds::new(0.5, 2.0));
        assert_eq!(matrix.classify().count(), 0);

        let matrix = matrix.with_thresholds(Thresholds::new(3.5, 20.0));
        let pair = matrix.classify().next().unwrap();
        assert_eq!(pair.band, Band::NearDuplicate);
        assert_eq!(pair.coefficient, 3.0);
    }

    #[test]
    fn test_progress_called_once_per_row() {
        use std::sync::Mutex;

        let thumbs: Vec<ImageThumbnail> = (0..6).map(|v| uniform(&format!("{}", v), v)).collect();
        let rows = Mutex::new(Vec::new());
        SimilarityMatrix::build_with_progress(thumbs, |row| rows.lock().unwrap().push(row)).unwrap();

        let mut rows = rows.into_inner().unwrap();
        rows.sort();
        assert_eq!(rows, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_rescaled_black_images_are_near_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        let small = temp_dir.path().join("10x10_black.png");
        let large = temp_dir.path().join("100x100_black.png");
        RgbImage::from_pixel(10, 10, Rgb([0, 0, 0])).save(&small).unwrap();
        RgbImage::from_pixel(100, 100, Rgb([0, 0, 0])).save(&large).unwrap();

        let reducer = ThumbnailReducer::default();
        let thumbs = vec![reducer.reduce(&small).unwrap(), reducer.reduce(&large).unwrap()];
        let matrix = SimilarityMatrix::build(thumbs).unwrap();

        let pairs: Vec<_> = matrix.classify().collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].coefficient, 0.0);
        assert_eq!(pairs[0].band, Band::NearDuplicate);
        assert_eq!(pairs[0].first, large.as_path());
        assert_eq!(pairs[0].second, small.as_path());
    }

    #[test]
    fn test_band_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&Band::NearDuplicate).unwrap(),
            "\"near-duplicate\""
        );
        assert_eq!(Band::Similar.to_string(), "similar");
    }
}
