use crate::config::Config;
use crate::error::{AppError, Result};
use db_pool::create_pool;
use sqlx::PgPool;
use tracing::info;

/// Database handles of one job run
///
/// Created once at job start and closed at job end; every repository gets a
/// clone of the pool it needs.
#[derive(Clone)]
pub struct JobContext {
    pub ratings_pool: PgPool,
    pub books_pool: PgPool,
    pub recommendations_pool: PgPool,
    /// Label of the target pool in `db_pool_*` metrics
    pub recommendations_pool_name: String,
}

impl JobContext {
    pub async fn connect(config: &Config) -> Result<Self> {
        let connect = |db: &db_pool::DbConfig| {
            let db = db.clone();
            async move {
                create_pool(&db).await.map_err(|e| {
                    AppError::Database(format!("failed to connect {}: {}", db.pool_name, e))
                })
            }
        };

        let (ratings_pool, books_pool, recommendations_pool) = tokio::try_join!(
            connect(&config.ratings_db),
            connect(&config.books_db),
            connect(&config.recommendations_db),
        )?;

        info!("Connected to ratings, books and recommendations databases");

        Ok(Self {
            ratings_pool,
            books_pool,
            recommendations_pool,
            recommendations_pool_name: config.recommendations_db.pool_name.clone(),
        })
    }

    pub async fn close(&self) {
        self.ratings_pool.close().await;
        self.books_pool.close().await;
        self.recommendations_pool.close().await;
        info!("Closed database pools");
    }
}
