/// Recommendation repository - owns `book_similarities` and `user_recommendations`
use crate::error::{AppError, Result};
use crate::models::{SimilarityResult, UserRecommendation};
use db_pool::acquire_with_metrics;
use serde::Serialize;
use sqlx::{Connection, PgPool, Postgres, QueryBuilder};
use std::time::Instant;
use tracing::{error, info};

/// Rows per multi-row INSERT; two binds per row stays far below the
/// 65535 parameter limit
const INSERT_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaceStats {
    pub similarities_written: usize,
    pub recommendations_written: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub book_similarities: i64,
    pub user_recommendations: i64,
}

#[derive(Clone)]
pub struct RecommendationRepository {
    pool: PgPool,
    /// Label for `db_pool_*` metrics
    pool_name: String,
}

impl RecommendationRepository {
    pub fn new(pool: PgPool, pool_name: impl Into<String>) -> Self {
        Self {
            pool,
            pool_name: pool_name.into(),
        }
    }

    /// Replace both tables with a new snapshot in one transaction
    ///
    /// Readers see either the previous rows or the new ones. On any error
    /// the transaction is rolled back and `AppError::Persistence` returned.
    pub async fn replace_snapshot(
        &self,
        similarities: &[SimilarityResult],
        recommendations: &[UserRecommendation],
    ) -> Result<ReplaceStats> {
        let start = Instant::now();

        self.write_snapshot(similarities, recommendations)
            .await
            .map_err(|e| {
                error!(error = %e, "Snapshot replace failed, previous snapshot kept");
                AppError::Persistence(e.to_string())
            })?;

        let stats = ReplaceStats {
            similarities_written: similarities.len(),
            recommendations_written: recommendations.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            similarities = stats.similarities_written,
            recommendations = stats.recommendations_written,
            duration_ms = stats.duration_ms,
            "Replaced recommendation snapshot"
        );

        Ok(stats)
    }

    async fn write_snapshot(
        &self,
        similarities: &[SimilarityResult],
        recommendations: &[UserRecommendation],
    ) -> std::result::Result<(), sqlx::Error> {
        let mut conn = acquire_with_metrics(&self.pool, &self.pool_name).await?;
        let mut tx = conn.begin().await?;

        sqlx::query("DELETE FROM user_recommendations")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM book_similarities")
            .execute(&mut *tx)
            .await?;

        for chunk in similarities.chunks(INSERT_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO book_similarities (isbn, similar_isbns) ");
            builder.push_values(chunk, |mut row, result| {
                row.push_bind(&result.isbn).push_bind(&result.similar_isbns);
            });
            builder.build().execute(&mut *tx).await?;
        }

        for chunk in recommendations.chunks(INSERT_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO user_recommendations (user_id, recommended_isbns) ",
            );
            builder.push_values(chunk, |mut row, rec| {
                row.push_bind(rec.user_id).push_bind(&rec.recommended_isbns);
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await
    }

    /// Stored neighbor list of a book, `None` when the book has no row
    pub async fn get_similar_isbns(&self, isbn: &str) -> Result<Option<Vec<String>>> {
        let similar = sqlx::query_scalar::<_, Vec<String>>(
            "SELECT similar_isbns FROM book_similarities WHERE isbn = $1",
        )
        .bind(isbn)
        .fetch_optional(&self.pool)
        .await?;

        Ok(similar)
    }

    /// Stored recommendation list of a user, `None` when the user has no row
    pub async fn get_recommended_isbns(&self, user_id: i64) -> Result<Option<Vec<String>>> {
        let recommended = sqlx::query_scalar::<_, Vec<String>>(
            "SELECT recommended_isbns FROM user_recommendations WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(recommended)
    }

    pub async fn count_rows(&self) -> Result<TableCounts> {
        let (book_similarities, user_recommendations) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM book_similarities),
                (SELECT COUNT(*) FROM user_recommendations)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(TableCounts {
            book_similarities,
            user_recommendations,
        })
    }

    /// First `limit` similarity rows by isbn
    pub async fn sample_similarities(&self, limit: i64) -> Result<Vec<SimilarityResult>> {
        let rows = sqlx::query_as::<_, SimilarityResult>(
            "SELECT isbn, similar_isbns FROM book_similarities ORDER BY isbn LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// First `limit` recommendation rows by user_id
    pub async fn sample_recommendations(&self, limit: i64) -> Result<Vec<UserRecommendation>> {
        let rows = sqlx::query_as::<_, UserRecommendation>(
            r#"
            SELECT user_id, recommended_isbns
            FROM user_recommendations
            ORDER BY user_id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
