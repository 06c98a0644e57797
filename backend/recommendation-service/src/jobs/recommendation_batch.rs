// ============================================
// Recommendation Batch Job
// ============================================
//
// Rebuilds the recommendation snapshot from the current ratings.
// Designed to run as a Kubernetes CronJob or standalone process; at most one
// instance may run against a target database at a time.
//
// Workflow:
// 1. Read ratings and books once
// 2. Build the sparse item x user rating matrix
// 3. k-NN neighbors per book, weighted multi-seed recommendations per user
// 4. Replace book_similarities / user_recommendations in one transaction
// 5. Read back counts and a sample for verification

use crate::config::{Config, RecommendationSettings};
use crate::context::JobContext;
use crate::db::{
    self, BookRepository, IngestStats, RecommendationRepository, Snapshot, SnapshotRepository,
};
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{SimilarityResult, UserRecommendation};
use crate::services::{RatingMatrix, RecommendationAggregator, SimilarityEngine};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Recommendation batch job statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchJobStats {
    pub run_id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub ingest: IngestStats,
    pub books_processed: usize,
    pub users_processed: usize,
    pub similarities_written: usize,
    pub recommendations_written: usize,
    /// The snapshot had no ratings or no books; nothing was replaced
    pub skipped_empty: bool,
    pub total_duration_ms: u64,
}

/// Everything computed from one snapshot, ready to persist
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutputs {
    pub similarities: Vec<SimilarityResult>,
    pub recommendations: Vec<UserRecommendation>,
    pub books_in_matrix: usize,
    pub users_in_matrix: usize,
    pub duplicate_ratings: usize,
}

/// `limit` ids starting at `offset`; a limit of 0 takes everything after the offset
pub fn select_subset<T>(ids: &[T], offset: usize, limit: usize) -> &[T] {
    let start = offset.min(ids.len());
    let end = if limit == 0 {
        ids.len()
    } else {
        start.saturating_add(limit).min(ids.len())
    };
    &ids[start..end]
}

/// Matrix, similarities and recommendations for a snapshot, no I/O
///
/// Books and users are processed in ascending id order, so identical
/// snapshots produce identical outputs.
pub fn compute_outputs(snapshot: &Snapshot, settings: &RecommendationSettings) -> BatchOutputs {
    let matrix = RatingMatrix::build_with_unscored(&snapshot.ratings, &snapshot.unscored);
    // Book queries and user seeds share one neighbor list per row
    let engine = SimilarityEngine::new(&matrix, settings.similarity_config())
        .with_neighbor_cache(settings.neighbors);
    let aggregator = RecommendationAggregator::new(&engine, settings.aggregator_config());

    let mappers = matrix.mappers();
    let books = select_subset(mappers.books.ids(), settings.book_offset, settings.max_books);
    let users = select_subset(mappers.users.ids(), settings.user_offset, settings.max_users);

    let similarities = engine.similar_for_books(books, settings.neighbors);
    let recommendations = aggregator.recommend_for_users(users, settings.neighbors, settings.top_n);
    debug!(rows_scanned = engine.cached_rows(), "Neighbor lists computed");

    BatchOutputs {
        similarities,
        recommendations,
        books_in_matrix: mappers.books.len(),
        users_in_matrix: mappers.users.len(),
        duplicate_ratings: matrix.duplicates(),
    }
}

/// Recommendation batch job runner
pub struct RecommendationBatchJob {
    settings: RecommendationSettings,
    snapshots: SnapshotRepository,
    recommendations: RecommendationRepository,
    books: BookRepository,
}

impl RecommendationBatchJob {
    pub fn new(settings: RecommendationSettings, ctx: &JobContext) -> Self {
        Self {
            settings,
            snapshots: SnapshotRepository::new(ctx.ratings_pool.clone(), ctx.books_pool.clone()),
            recommendations: RecommendationRepository::new(
                ctx.recommendations_pool.clone(),
                ctx.recommendations_pool_name.clone(),
            ),
            books: BookRepository::new(ctx.books_pool.clone()),
        }
    }

    /// Run the batch job
    pub async fn run(&self) -> Result<BatchJobStats> {
        loop {
            let stats = self.run_pass().await?;

            info!(
                run_id = %stats.run_id,
                books = stats.books_processed,
                users = stats.users_processed,
                similarities = stats.similarities_written,
                recommendations = stats.recommendations_written,
                skipped_empty = stats.skipped_empty,
                duration_ms = stats.total_duration_ms,
                "Recommendation batch job pass completed"
            );

            if self.settings.run_once {
                return Ok(stats);
            }

            info!(
                interval_secs = self.settings.interval_secs,
                "Sleeping until next pass"
            );
            sleep(Duration::from_secs(self.settings.interval_secs)).await;
        }
    }

    /// One pass plus run metrics, written whether or not the pass succeeded
    pub async fn run_pass(&self) -> Result<BatchJobStats> {
        let start_time = Instant::now();
        let result = self.run_single_pass().await;

        metrics::record_run(start_time.elapsed().as_secs_f64(), result.is_ok());
        if let Some(path) = &self.settings.metrics_textfile {
            if let Err(e) = metrics::write_textfile(path) {
                warn!(path = %path.display(), error = %e, "Failed to write metrics textfile");
            }
        }

        result
    }

    async fn run_single_pass(&self) -> Result<BatchJobStats> {
        let start_time = Instant::now();
        let mut stats = BatchJobStats {
            run_id: Uuid::new_v4(),
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        info!(
            run_id = %stats.run_id,
            neighbors = self.settings.neighbors,
            top_n = self.settings.top_n,
            metric = %self.settings.metric,
            max_books = self.settings.max_books,
            max_users = self.settings.max_users,
            "Starting recommendation batch job pass"
        );

        let snapshot = self
            .snapshots
            .load(self.settings.filter_unknown_books, self.settings.strict_isbn)
            .await?;
        stats.ingest = snapshot.stats.clone();
        metrics::record_ingest(&snapshot.stats);

        info!(
            run_id = %stats.run_id,
            rows = snapshot.stats.rows_read,
            loaded = snapshot.stats.loaded,
            unrated = snapshot.stats.unrated,
            skipped = snapshot.stats.skipped(),
            books = snapshot.book_isbns.len(),
            "Loaded snapshot"
        );

        if snapshot.is_empty() {
            warn!(
                run_id = %stats.run_id,
                "Snapshot has no ratings or no books, keeping previous recommendations"
            );
            stats.skipped_empty = true;
            stats.completed_at = Some(Utc::now());
            stats.total_duration_ms = start_time.elapsed().as_millis() as u64;
            return Ok(stats);
        }

        let settings = self.settings.clone();
        let compute_start = Instant::now();
        let outputs = tokio::task::spawn_blocking(move || compute_outputs(&snapshot, &settings))
            .await
            .map_err(|e| AppError::Internal(format!("compute task failed: {}", e)))?;

        stats.books_processed = outputs.similarities.len();
        stats.users_processed = outputs.recommendations.len();

        info!(
            run_id = %stats.run_id,
            books_in_matrix = outputs.books_in_matrix,
            users_in_matrix = outputs.users_in_matrix,
            duplicates = outputs.duplicate_ratings,
            books = stats.books_processed,
            users = stats.users_processed,
            duration_ms = compute_start.elapsed().as_millis() as u64,
            "Computed similarities and recommendations"
        );

        let written = self
            .recommendations
            .replace_snapshot(&outputs.similarities, &outputs.recommendations)
            .await?;
        metrics::record_written(&written);
        stats.similarities_written = written.similarities_written;
        stats.recommendations_written = written.recommendations_written;

        if let Err(e) = self.verify(stats.run_id).await {
            warn!(run_id = %stats.run_id, error = %e, "Post-run verification failed");
        }

        stats.completed_at = Some(Utc::now());
        stats.total_duration_ms = start_time.elapsed().as_millis() as u64;

        Ok(stats)
    }

    /// Read back what was committed and log a sample
    async fn verify(&self, run_id: Uuid) -> Result<()> {
        let counts = self.recommendations.count_rows().await?;
        info!(
            run_id = %run_id,
            book_similarities = counts.book_similarities,
            user_recommendations = counts.user_recommendations,
            "Verified stored snapshot"
        );

        let limit = self.settings.verify_sample;
        if limit <= 0 {
            return Ok(());
        }

        for row in self.recommendations.sample_similarities(limit).await? {
            debug!(isbn = %row.isbn, similar = ?row.similar_isbns, "Sample similarity");
        }

        for row in self.recommendations.sample_recommendations(limit).await? {
            let books = self
                .books
                .fetch_books_by_isbns(&row.recommended_isbns)
                .await?;
            let titles: Vec<&str> = books.iter().filter_map(|b| b.title.as_deref()).collect();
            debug!(
                user_id = row.user_id,
                recommended = ?row.recommended_isbns,
                titles = ?titles,
                "Sample recommendation"
            );
        }

        Ok(())
    }
}

/// Entry point for running the recommendation batch job as a standalone process
pub async fn run_recommendation_batch_job() -> Result<BatchJobStats> {
    info!("Initializing recommendation batch job");

    let config = Config::from_env()?;
    config.validate()?;

    let ctx = JobContext::connect(&config).await?;
    let result = run_with_context(&config, &ctx).await;
    ctx.close().await;

    result
}

async fn run_with_context(config: &Config, ctx: &JobContext) -> Result<BatchJobStats> {
    if config.recommendation.run_migrations {
        db::run_migrations(&ctx.recommendations_pool).await?;
        info!("Recommendation table migrations applied");
    }

    let job = RecommendationBatchJob::new(config.recommendation.clone(), ctx);
    job.run().await
}
