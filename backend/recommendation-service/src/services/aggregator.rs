//! Weighted multi-seed recommendation
//!
//! Every book a user liked ("seed") contributes its k nearest neighbors,
//! weighted by the user's rating and by similarity. A candidate surfaced by
//! several seeds accumulates all their contributions.

use super::similarity::{descending, SimilarityEngine};
use crate::error::{AppError, Result};
use crate::models::UserRecommendation;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Ordering among candidates with the same accumulated score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Lower isbn first; output is fully deterministic
    #[default]
    IsbnAscending,
    /// Order in which the candidate was first surfaced by a seed
    FirstSeen,
}

#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    /// Ratings at or above this value make a book a seed
    pub rating_threshold: i32,
    /// Seeds taken when nothing reaches the threshold
    pub fallback_seeds: usize,
    pub tie_break: TieBreak,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            rating_threshold: 4,
            fallback_seeds: 3,
            tie_break: TieBreak::IsbnAscending,
        }
    }
}

struct Candidate {
    row: usize,
    score: f64,
    first_seen: usize,
}

pub struct RecommendationAggregator<'a> {
    engine: &'a SimilarityEngine<'a>,
    config: AggregatorConfig,
}

impl<'a> RecommendationAggregator<'a> {
    pub fn new(engine: &'a SimilarityEngine<'a>, config: AggregatorConfig) -> Self {
        Self { engine, config }
    }

    /// Ranked isbns for a user, best first, at most `top_n`
    ///
    /// Unknown users are logged and get an empty list.
    pub fn recommend_for_user(&self, user_id: i64, k: usize, top_n: usize) -> Vec<String> {
        match self.try_scored_recommendations(user_id, k, top_n) {
            Ok(scored) => scored.into_iter().map(|(isbn, _)| isbn).collect(),
            Err(e) => {
                info!(user_id, "{}", e);
                Vec::new()
            }
        }
    }

    /// Ranked (isbn, score) pairs; `NotFound` for users outside the snapshot
    pub fn try_scored_recommendations(
        &self,
        user_id: i64,
        k: usize,
        top_n: usize,
    ) -> Result<Vec<(String, f64)>> {
        let matrix = self.engine.matrix();
        let not_found = || AppError::NotFound(format!("User {} not found", user_id));

        let ratings = matrix.user_ratings(user_id).ok_or_else(not_found)?;
        let known = matrix.user_known_rows(user_id).ok_or_else(not_found)?;

        let seeds = self.select_seeds(&ratings);

        let mut candidates: HashMap<usize, Candidate> = HashMap::new();
        for (seed_isbn, rating) in &seeds {
            let Some(seed_row) = matrix.mappers().book_index(seed_isbn) else {
                continue;
            };

            for &(row, distance) in self.engine.neighbor_rows(seed_row, k).iter() {
                if known.binary_search(&row).is_ok() {
                    continue;
                }

                let next = candidates.len();
                let entry = candidates.entry(row).or_insert(Candidate {
                    row,
                    score: 0.0,
                    first_seen: next,
                });
                entry.score += f64::from(*rating) * (1.0 - distance);
            }
        }

        let mut ranked: Vec<Candidate> = candidates.into_values().collect();
        // Rows are in ascending isbn order, so comparing rows compares isbns
        match self.config.tie_break {
            TieBreak::IsbnAscending => ranked
                .sort_unstable_by(|a, b| descending(a.score, b.score).then(a.row.cmp(&b.row))),
            TieBreak::FirstSeen => ranked.sort_unstable_by(|a, b| {
                descending(a.score, b.score).then(a.first_seen.cmp(&b.first_seen))
            }),
        }
        ranked.truncate(top_n);

        debug!(
            user_id,
            seeds = seeds.len(),
            recommended = ranked.len(),
            "Scored recommendations"
        );

        Ok(ranked
            .into_iter()
            .filter_map(|c| {
                matrix
                    .mappers()
                    .isbn(c.row)
                    .map(|isbn| (isbn.to_string(), c.score))
            })
            .collect())
    }

    /// Recommendations for a batch of users, one independent unit per user
    ///
    /// Users missing from the snapshot are skipped; users with no candidates
    /// keep an empty list so their previous row is replaced.
    pub fn recommend_for_users(
        &self,
        user_ids: &[i64],
        k: usize,
        top_n: usize,
    ) -> Vec<UserRecommendation> {
        let unit = |&user_id: &i64| -> Option<UserRecommendation> {
            self.try_scored_recommendations(user_id, k, top_n)
                .map(|scored| UserRecommendation {
                    user_id,
                    recommended_isbns: scored.into_iter().map(|(isbn, _)| isbn).collect(),
                })
                .map_err(|e| info!(user_id, "{}", e))
                .ok()
        };

        let results: Vec<UserRecommendation> = if self.engine.is_parallel() {
            user_ids.par_iter().filter_map(unit).collect()
        } else {
            user_ids.iter().filter_map(unit).collect()
        };

        debug!(
            requested = user_ids.len(),
            computed = results.len(),
            k,
            top_n,
            "Computed user recommendations"
        );

        results
    }

    /// Seeds: every rating at or above the threshold, otherwise the best
    /// `fallback_seeds` ratings with ties kept in snapshot order
    fn select_seeds<'r>(&self, ratings: &[(&'r str, i32)]) -> Vec<(&'r str, i32)> {
        let liked: Vec<(&str, i32)> = ratings
            .iter()
            .copied()
            .filter(|&(_, rating)| rating >= self.config.rating_threshold)
            .collect();
        if !liked.is_empty() {
            return liked;
        }

        let mut best = ratings.to_vec();
        best.sort_by(|a, b| b.1.cmp(&a.1));
        best.truncate(self.config.fallback_seeds);
        best
    }
}
