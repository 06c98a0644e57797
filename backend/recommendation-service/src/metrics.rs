//! Prometheus metrics for the batch job
//!
//! The job has no HTTP surface, so the default registry (which also holds
//! the `db_pool_*` metrics) is rendered to a node-exporter textfile at the
//! end of every pass.

use crate::db::{IngestStats, ReplaceStats};
use crate::error::Result;
use prometheus::{
    register_gauge, register_int_counter_vec, register_int_gauge, Encoder, Gauge, IntCounterVec,
    IntGauge, TextEncoder,
};
use std::fs;
use std::path::Path;

lazy_static::lazy_static! {
    /// Ratings (1-10) that made it into the last matrix
    static ref RATINGS_LOADED: IntGauge = register_int_gauge!(
        "recommendation_ratings_loaded",
        "Ratings loaded into the rating matrix by the last pass"
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Source rows dropped during ingestion (malformed/invalid_isbn/unknown_book)
    static ref ROWS_SKIPPED: IntCounterVec = register_int_counter_vec!(
        "recommendation_rows_skipped_total",
        "Rating rows skipped during ingestion",
        &["reason"]
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref SIMILARITIES_WRITTEN: IntGauge = register_int_gauge!(
        "recommendation_similarities_written",
        "book_similarities rows written by the last pass"
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref RECOMMENDATIONS_WRITTEN: IntGauge = register_int_gauge!(
        "recommendation_recommendations_written",
        "user_recommendations rows written by the last pass"
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref RUN_DURATION_SECONDS: Gauge = register_gauge!(
        "recommendation_run_duration_seconds",
        "Wall time of the last pass"
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref LAST_SUCCESS_TIMESTAMP: IntGauge = register_int_gauge!(
        "recommendation_last_success_timestamp_seconds",
        "Unix time of the last pass that committed a snapshot or completed as a no-op"
    ).expect("Prometheus metrics registration should succeed at startup");
}

pub fn record_ingest(stats: &IngestStats) {
    RATINGS_LOADED.set(stats.loaded as i64);
    for (reason, count) in [
        ("malformed", stats.malformed),
        ("invalid_isbn", stats.invalid_isbn),
        ("unknown_book", stats.unknown_book),
    ] {
        ROWS_SKIPPED
            .with_label_values(&[reason])
            .inc_by(count as u64);
    }
}

pub fn record_written(stats: &ReplaceStats) {
    SIMILARITIES_WRITTEN.set(stats.similarities_written as i64);
    RECOMMENDATIONS_WRITTEN.set(stats.recommendations_written as i64);
}

pub fn record_run(duration_secs: f64, succeeded: bool) {
    RUN_DURATION_SECONDS.set(duration_secs);
    if succeeded {
        LAST_SUCCESS_TIMESTAMP.set(chrono::Utc::now().timestamp());
    }
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Write the metrics textfile atomically (temp file + rename), so the
/// collector never reads a half-written file
pub fn write_textfile(path: &Path) -> Result<()> {
    let body = render()?;
    let tmp = path.with_extension("prom.tmp");
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
