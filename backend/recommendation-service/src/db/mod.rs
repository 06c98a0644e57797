pub mod book_repo;
pub mod recommendation_repo;
pub mod snapshot_repo;

pub use book_repo::BookRepository;
pub use recommendation_repo::{RecommendationRepository, ReplaceStats, TableCounts};
pub use snapshot_repo::{prepare_snapshot, IngestStats, Snapshot, SnapshotRepository};

use sqlx::PgPool;

/// Create `book_similarities` / `user_recommendations` if they are missing
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
