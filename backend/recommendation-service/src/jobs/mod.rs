// ============================================
// Background Jobs Module
// ============================================
//
// The recommendation batch job can be triggered via:
// - CronJob (Kubernetes)
// - The `recommendation-service` binary (one pass, or a loop with
//   RECOMMENDATION_RUN_ONCE=false)

pub mod recommendation_batch;

pub use recommendation_batch::{
    compute_outputs, run_recommendation_batch_job, select_subset, BatchJobStats, BatchOutputs,
    RecommendationBatchJob,
};
