// Similarity engine: grayscale thumbnail reduction and the pairwise
// difference matrix built from it.

pub mod similarity;
pub mod thumbnail;

pub use similarity::{Band, ClassifiedPair, MatrixError, Pairs, SimilarityMatrix, Thresholds};
pub use thumbnail::{
    ImageThumbnail, Reduction, Rejection, ThumbnailError, ThumbnailReducer, ThumbnailShape,
};
