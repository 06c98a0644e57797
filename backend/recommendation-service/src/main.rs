use anyhow::Context;
use recommendation_service::jobs::run_recommendation_batch_job;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!(
        "Starting recommendation-service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let stats = run_recommendation_batch_job()
        .await
        .map_err(|e| {
            error!(error = %e, fatal = e.is_fatal(), "Recommendation batch job failed");
            e
        })
        .context("recommendation batch job failed")?;

    info!(
        run_id = %stats.run_id,
        similarities = stats.similarities_written,
        recommendations = stats.recommendations_written,
        skipped_empty = stats.skipped_empty,
        duration_ms = stats.total_duration_ms,
        "Recommendation batch job completed"
    );

    match serde_json::to_string(&stats) {
        Ok(summary) => info!(summary = %summary, "Run summary"),
        Err(e) => error!(error = %e, "Failed to serialize run summary"),
    }

    Ok(())
}

/// `LOG_FORMAT=json` switches to JSON lines for log shipping
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,recommendation_service=debug,sqlx=warn".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
