use crate::error::{AppError, Result};
use crate::services::{AggregatorConfig, DistanceMetric, SimilarityConfig, TieBreak};
use db_pool::DbConfig;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Prefixes of the three databases the job talks to
pub const RATING_DB_PREFIX: &str = "RATING";
pub const BOOK_DB_PREFIX: &str = "BOOK";
pub const RECOMMENDATION_DB_PREFIX: &str = "RECOMMENDATION";

#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    /// Source of the `ratings` relation
    pub ratings_db: DbConfig,
    /// Source of the `books` relation
    pub books_db: DbConfig,
    /// Target of `book_similarities` / `user_recommendations`
    pub recommendations_db: DbConfig,
    pub recommendation: RecommendationSettings,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub service_name: String,
}

/// Algorithm and run settings, read from `RECOMMENDATION_*` variables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecommendationSettings {
    /// Neighbors per query book (k)
    pub neighbors: usize,
    /// Length of each user's recommendation list
    pub top_n: usize,
    /// Minimum rating (1-10) for a book to seed recommendations
    pub rating_threshold: i32,
    /// Seeds taken from the user's best ratings when none reach the threshold
    pub fallback_seeds: usize,
    /// cosine, euclidean (l2) or manhattan (l1, cityblock), any letter case
    pub metric: DistanceMetric,
    pub tie_break: TieBreak,
    /// Processed subset of books, in ascending isbn order (0 = all)
    pub max_books: usize,
    pub book_offset: usize,
    /// Processed subset of users, in ascending user_id order (0 = all)
    pub max_users: usize,
    pub user_offset: usize,
    pub parallel: bool,
    /// Drop ratings whose isbn is missing from the books relation
    pub filter_unknown_books: bool,
    /// Skip ratings whose isbn fails the ISBN-10/ISBN-13 check digit
    pub strict_isbn: bool,
    pub run_migrations: bool,
    pub run_once: bool,
    pub interval_secs: u64,
    /// Prometheus textfile written at the end of every pass
    pub metrics_textfile: Option<PathBuf>,
    /// Rows logged by the post-run verification
    pub verify_sample: i64,
}

impl Default for RecommendationSettings {
    fn default() -> Self {
        Self {
            neighbors: 10,
            top_n: 10,
            rating_threshold: 4,
            fallback_seeds: 3,
            metric: DistanceMetric::Cosine,
            tie_break: TieBreak::IsbnAscending,
            max_books: 0,
            book_offset: 0,
            max_users: 0,
            user_offset: 0,
            parallel: true,
            filter_unknown_books: true,
            strict_isbn: false,
            run_migrations: true,
            run_once: true,
            interval_secs: 86_400,
            metrics_textfile: None,
            verify_sample: 5,
        }
    }
}

impl RecommendationSettings {
    /// Read `RECOMMENDATION_*` variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Ok(envy::prefixed("RECOMMENDATION_").from_env::<RecommendationSettings>()?)
    }

    pub fn similarity_config(&self) -> SimilarityConfig {
        SimilarityConfig {
            metric: self.metric,
            parallel: self.parallel,
        }
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            rating_threshold: self.rating_threshold,
            fallback_seeds: self.fallback_seeds,
            tie_break: self.tie_break,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.neighbors == 0 {
            return Err(AppError::Configuration(
                "RECOMMENDATION_NEIGHBORS must be at least 1".to_string(),
            ));
        }

        if self.top_n == 0 {
            return Err(AppError::Configuration(
                "RECOMMENDATION_TOP_N must be at least 1".to_string(),
            ));
        }

        if !(1..=10).contains(&self.rating_threshold) {
            return Err(AppError::Configuration(format!(
                "RECOMMENDATION_RATING_THRESHOLD must be in 1..=10, got {}",
                self.rating_threshold
            )));
        }

        if self.fallback_seeds == 0 {
            return Err(AppError::Configuration(
                "RECOMMENDATION_FALLBACK_SEEDS must be at least 1".to_string(),
            ));
        }

        if !self.run_once && self.interval_secs == 0 {
            return Err(AppError::Configuration(
                "RECOMMENDATION_INTERVAL_SECS must be positive when RUN_ONCE=false".to_string(),
            ));
        }

        Ok(())
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let service_name =
            env::var("SERVICE_NAME").unwrap_or_else(|_| "recommendation-service".to_string());

        let db_config = |prefix: &str| {
            DbConfig::from_prefix(
                &format!("{}-{}", service_name, prefix.to_ascii_lowercase()),
                prefix,
            )
            .map_err(AppError::Configuration)
        };

        Ok(Config {
            app: AppConfig {
                env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                service_name: service_name.clone(),
            },
            ratings_db: db_config(RATING_DB_PREFIX)?,
            books_db: db_config(BOOK_DB_PREFIX)?,
            recommendations_db: db_config(RECOMMENDATION_DB_PREFIX)?,
            recommendation: RecommendationSettings::from_env()?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.recommendation.validate()
    }
}
