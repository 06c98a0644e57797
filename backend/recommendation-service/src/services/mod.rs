//! Recommendation core
//!
//! `id_mapper` -> `rating_matrix` -> `similarity` -> `aggregator`, each stage
//! borrowing the read-only output of the previous one.

pub mod aggregator;
pub mod id_mapper;
pub mod rating_matrix;
pub mod similarity;

pub use aggregator::{AggregatorConfig, RecommendationAggregator, TieBreak};
pub use id_mapper::{IdMapper, IdMappers};
pub use rating_matrix::RatingMatrix;
pub use similarity::{DistanceMetric, SimilarityConfig, SimilarityEngine};
