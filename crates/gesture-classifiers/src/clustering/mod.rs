//! Clustering used by the quantizer and the distance-based classifiers.
pub mod kmeans;

pub use kmeans::KMeans;
