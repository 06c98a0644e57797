/// Snapshot repository - reads the ratings and books relations once per run
use crate::error::{AppError, Result};
use crate::models::{Rating, RawRatingRow};
use crate::utils::isbn::{clean_isbn, is_valid_isbn};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, warn};

/// Per-row outcome counts of one ingestion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub rows_read: usize,
    /// Ratings 1-10 kept for the matrix
    pub loaded: usize,
    /// Rating-0 records, kept only to exclude books from recommendations
    pub unrated: usize,
    pub malformed: usize,
    pub invalid_isbn: usize,
    pub unknown_book: usize,
}

impl IngestStats {
    pub fn skipped(&self) -> usize {
        self.malformed + self.invalid_isbn + self.unknown_book
    }
}

/// Everything one pass reads from the source databases
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Parsed ratings in source order (`ORDER BY user_id, isbn`)
    pub ratings: Vec<Rating>,
    /// (user_id, isbn) of rows whose rating could not be read; never matrix
    /// cells, but the book is still excluded from that user's recommendations
    pub unscored: Vec<(i64, String)>,
    /// Cleaned, sorted, distinct isbns of the books relation
    pub book_isbns: Vec<String>,
    pub stats: IngestStats,
}

impl Snapshot {
    /// Nothing to compute: no usable rating or no book at all
    pub fn is_empty(&self) -> bool {
        self.book_isbns.is_empty() || self.ratings.iter().all(Rating::is_unrated)
    }
}

/// Parse and filter raw rows into a snapshot
///
/// Bad rows are counted and skipped, never propagated. `book_isbns` must
/// already be cleaned; it is sorted and deduplicated here.
pub fn prepare_snapshot(
    rows: Vec<RawRatingRow>,
    mut book_isbns: Vec<String>,
    filter_unknown_books: bool,
    strict_isbn: bool,
) -> Snapshot {
    book_isbns.sort_unstable();
    book_isbns.dedup();

    let mut stats = IngestStats {
        rows_read: rows.len(),
        ..IngestStats::default()
    };
    let mut ratings = Vec::with_capacity(rows.len());
    let mut unscored = Vec::new();

    for row in rows {
        let key = row.record_key();
        let rating = match Rating::try_from(row) {
            Ok(rating) => rating,
            Err(e) => {
                stats.malformed += 1;
                debug!("Skipping rating row: {}", e);
                unscored.extend(key);
                continue;
            }
        };

        if strict_isbn && !is_valid_isbn(&rating.isbn) {
            stats.invalid_isbn += 1;
            debug!(isbn = %rating.isbn, user_id = rating.user_id, "Skipping invalid isbn");
            continue;
        }

        if filter_unknown_books && book_isbns.binary_search(&rating.isbn).is_err() {
            stats.unknown_book += 1;
            continue;
        }

        if rating.is_unrated() {
            stats.unrated += 1;
        } else {
            stats.loaded += 1;
        }
        ratings.push(rating);
    }

    if stats.skipped() > 0 {
        warn!(
            malformed = stats.malformed,
            invalid_isbn = stats.invalid_isbn,
            unknown_book = stats.unknown_book,
            "Skipped rating rows during ingestion"
        );
    }

    Snapshot {
        ratings,
        unscored,
        book_isbns,
        stats,
    }
}

#[derive(Clone)]
pub struct SnapshotRepository {
    ratings_pool: PgPool,
    books_pool: PgPool,
}

impl SnapshotRepository {
    pub fn new(ratings_pool: PgPool, books_pool: PgPool) -> Self {
        Self {
            ratings_pool,
            books_pool,
        }
    }

    /// All rating rows, read as text so one bad row cannot fail the query
    ///
    /// Ordered by the typed columns, so user ids sort numerically.
    pub async fn load_ratings(&self) -> Result<Vec<RawRatingRow>> {
        let rows = sqlx::query_as::<_, RawRatingRow>(
            r#"
            SELECT r.user_id::text AS user_id, r.isbn::text AS isbn, r.rating::text AS rating
            FROM ratings r
            ORDER BY r.user_id, r.isbn
            "#,
        )
        .fetch_all(&self.ratings_pool)
        .await
        .map_err(|e| AppError::Database(format!("failed to read ratings: {}", e)))?;

        Ok(rows)
    }

    /// Cleaned isbns of the books relation
    pub async fn load_book_isbns(&self) -> Result<Vec<String>> {
        let isbns = sqlx::query_scalar::<_, Option<String>>("SELECT isbn::text FROM books")
            .fetch_all(&self.books_pool)
            .await
            .map_err(|e| AppError::Database(format!("failed to read books: {}", e)))?;

        Ok(isbns
            .into_iter()
            .flatten()
            .map(|isbn| clean_isbn(&isbn))
            .filter(|isbn| !isbn.is_empty())
            .collect())
    }

    pub async fn load(&self, filter_unknown_books: bool, strict_isbn: bool) -> Result<Snapshot> {
        let (rows, book_isbns) = tokio::try_join!(self.load_ratings(), self.load_book_isbns())?;
        Ok(prepare_snapshot(
            rows,
            book_isbns,
            filter_unknown_books,
            strict_isbn,
        ))
    }
}
