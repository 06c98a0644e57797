pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use context::JobContext;
pub use error::{AppError, Result};
pub use jobs::{compute_outputs, RecommendationBatchJob};
pub use services::{RatingMatrix, RecommendationAggregator, SimilarityEngine};
