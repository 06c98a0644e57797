//! Item-item k-nearest-neighbor search
//!
//! Exact brute-force search: every query scores all book rows of the rating
//! matrix. A query costs O(nnz) thanks to the sparse rows, but there is no
//! index, so very large catalogs pay the full scan per book.

use super::rating_matrix::RatingMatrix;
use crate::error::{AppError, Result};
use crate::models::{Neighbor, SimilarityResult};
use once_cell::sync::OnceCell;
use rayon::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Below this many rows a scan is cheaper than spreading it over threads
const PARALLEL_MIN_ROWS: usize = 2048;

/// Distance between two book rating vectors
///
/// Deserializes through [`FromStr`], so config values accept the same
/// aliases and letter case as the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// 1 - cosine similarity
    Cosine,
    /// L2 distance
    Euclidean,
    /// L1 distance
    Manhattan,
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Manhattan => "manhattan",
        };
        f.write_str(name)
    }
}

impl FromStr for DistanceMetric {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "manhattan" | "l1" | "cityblock" => Ok(DistanceMetric::Manhattan),
            other => Err(AppError::Configuration(format!(
                "unknown distance metric: {}",
                other
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for DistanceMetric {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimilarityConfig {
    pub metric: DistanceMetric,
    /// Spread row scans and batch queries over the rayon pool
    pub parallel: bool,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Cosine,
            parallel: true,
        }
    }
}

/// k-NN search over the rows of a [`RatingMatrix`]
pub struct SimilarityEngine<'a> {
    matrix: &'a RatingMatrix,
    config: SimilarityConfig,
    /// Ranked (row, distance) lists per query row, filled on first use
    cache: Vec<OnceCell<Vec<(usize, f64)>>>,
    cache_k: usize,
}

impl<'a> SimilarityEngine<'a> {
    pub fn new(matrix: &'a RatingMatrix, config: SimilarityConfig) -> Self {
        Self {
            matrix,
            config,
            cache: Vec::new(),
            cache_k: 0,
        }
    }

    /// Keep every neighbor list computed for `k`, so each row is scanned at
    /// most once however many books and seeds ask for it
    pub fn with_neighbor_cache(mut self, k: usize) -> Self {
        self.cache = (0..self.matrix.num_books()).map(|_| OnceCell::new()).collect();
        self.cache_k = k;
        self
    }

    /// Rows whose neighbor list has been computed and cached
    pub fn cached_rows(&self) -> usize {
        self.cache.iter().filter(|cell| cell.get().is_some()).count()
    }

    pub fn metric(&self) -> DistanceMetric {
        self.config.metric
    }

    pub fn matrix(&self) -> &RatingMatrix {
        self.matrix
    }

    pub fn is_parallel(&self) -> bool {
        self.config.parallel
    }

    /// The `k` books closest to `isbn`, nearest first
    ///
    /// A book that is not part of the snapshot is an expected condition for
    /// never-rated books: it is logged and yields an empty list.
    pub fn find_similar(&self, isbn: &str, k: usize) -> Vec<Neighbor> {
        match self.try_find_similar(isbn, k) {
            Ok(neighbors) => neighbors,
            Err(e) => {
                info!(isbn = %isbn, "{}", e);
                Vec::new()
            }
        }
    }

    /// Like [`find_similar`](Self::find_similar) but reports unknown books as `NotFound`
    pub fn try_find_similar(&self, isbn: &str, k: usize) -> Result<Vec<Neighbor>> {
        let query = self
            .matrix
            .mappers()
            .book_index(isbn)
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found in book_mapper", isbn)))?;

        Ok(self.neighbors_of(query, k))
    }

    /// Neighbors of a matrix row, excluding the row itself
    ///
    /// Ordered by ascending distance, ties by ascending isbn (which is
    /// ascending row index). Returns min(k, books - 1) entries.
    pub fn neighbors_of(&self, query: usize, k: usize) -> Vec<Neighbor> {
        self.neighbor_rows(query, k)
            .iter()
            .filter_map(|&(row, distance)| {
                self.matrix.mappers().isbn(row).map(|isbn| Neighbor {
                    isbn: isbn.to_string(),
                    distance,
                })
            })
            .collect()
    }

    /// Ranked (row, distance) neighbors of `query`, from the cache when it
    /// was built for this `k`
    pub(crate) fn neighbor_rows(&self, query: usize, k: usize) -> Cow<'_, [(usize, f64)]> {
        match self.cache.get(query) {
            // No nested rayon work inside the cell: a stolen task on this
            // thread could block on the same cell
            Some(cell) if k == self.cache_k => {
                Cow::Borrowed(cell.get_or_init(|| self.rank(query, k, false)).as_slice())
            }
            _ => Cow::Owned(self.rank(query, k, self.config.parallel)),
        }
    }

    fn rank(&self, query: usize, k: usize, parallel_scan: bool) -> Vec<(usize, f64)> {
        if k == 0 || query >= self.matrix.num_books() {
            return Vec::new();
        }

        let mut scored = self.distances_from(query, parallel_scan);
        let by_distance =
            |a: &(usize, f64), b: &(usize, f64)| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0));

        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance);
        scored
    }

    /// Similarity lists for a batch of books, one independent query per book
    ///
    /// Books missing from the snapshot are skipped. Output order follows the
    /// input order.
    pub fn similar_for_books(&self, isbns: &[String], k: usize) -> Vec<SimilarityResult> {
        let query = |isbn: &String| -> Option<SimilarityResult> {
            let index = self.matrix.mappers().book_index(isbn)?;
            Some(SimilarityResult {
                isbn: isbn.clone(),
                similar_isbns: self
                    .neighbor_rows(index, k)
                    .iter()
                    .filter_map(|&(row, _)| self.matrix.mappers().isbn(row))
                    .map(str::to_string)
                    .collect(),
            })
        };

        let results: Vec<SimilarityResult> = if self.config.parallel {
            isbns.par_iter().filter_map(query).collect()
        } else {
            isbns.iter().filter_map(query).collect()
        };

        debug!(
            requested = isbns.len(),
            computed = results.len(),
            k,
            metric = %self.config.metric,
            "Computed book similarities"
        );

        results
    }

    /// Distance from `query` to every other row
    fn distances_from(&self, query: usize, parallel_scan: bool) -> Vec<(usize, f64)> {
        let (num_books, num_users) = self.matrix.shape();

        // Scatter the query row so each candidate row only walks its own nonzeros
        let mut dense = vec![0.0_f64; num_users];
        let mut query_l1 = 0.0;
        if let Some(row) = self.matrix.row(query) {
            for (col, value) in row.iter() {
                dense[col] = *value;
                query_l1 += value.abs();
            }
        }
        let query_norm = self.matrix.row_norm(query);

        let score = |row: usize| -> (usize, f64) {
            let distance = self.distance(row, &dense, query_norm, query_l1);
            (row, distance)
        };

        if parallel_scan && num_books >= PARALLEL_MIN_ROWS {
            (0..num_books)
                .into_par_iter()
                .filter(|&row| row != query)
                .map(score)
                .collect()
        } else {
            (0..num_books)
                .filter(|&row| row != query)
                .map(score)
                .collect()
        }
    }

    fn distance(&self, row: usize, query: &[f64], query_norm: f64, query_l1: f64) -> f64 {
        let Some(candidate) = self.matrix.row(row) else {
            return f64::INFINITY;
        };

        match self.config.metric {
            DistanceMetric::Cosine => {
                let norm = self.matrix.row_norm(row);
                if norm == 0.0 || query_norm == 0.0 {
                    return 1.0;
                }
                let dot: f64 = candidate.iter().map(|(col, v)| v * query[col]).sum();
                (1.0 - dot / (norm * query_norm)).clamp(0.0, 2.0)
            }
            DistanceMetric::Euclidean => {
                let norm = self.matrix.row_norm(row);
                let dot: f64 = candidate.iter().map(|(col, v)| v * query[col]).sum();
                (query_norm * query_norm + norm * norm - 2.0 * dot)
                    .max(0.0)
                    .sqrt()
            }
            DistanceMetric::Manhattan => {
                // |q|_1 counts every query coordinate once; correct the ones
                // where the candidate is nonzero
                let overlap: f64 = candidate
                    .iter()
                    .map(|(col, v)| (v - query[col]).abs() - query[col].abs())
                    .sum();
                query_l1 + overlap
            }
        }
    }
}

/// Sort helper shared with the aggregator: descending score, NaN last
pub(crate) fn descending(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rating;

    fn scenario() -> RatingMatrix {
        RatingMatrix::build(&[
            Rating::new(1, "A", 5),
            Rating::new(1, "B", 5),
            Rating::new(2, "A", 3),
            Rating::new(2, "B", 4),
            Rating::new(2, "C", 5),
        ])
    }

    fn engine(matrix: &RatingMatrix, metric: DistanceMetric) -> SimilarityEngine<'_> {
        SimilarityEngine::new(
            matrix,
            SimilarityConfig {
                metric,
                parallel: false,
            },
        )
    }

    #[test]
    fn test_find_similar_excludes_query() {
        let matrix = scenario();
        let engine = engine(&matrix, DistanceMetric::Cosine);

        let neighbors = engine.find_similar("A", 1);
        assert_eq!(neighbors.len(), 1);
        assert_ne!(neighbors[0].isbn, "A");
        assert!(["B", "C"].contains(&neighbors[0].isbn.as_str()));
        // A = (5, 3), B = (5, 4): closest by cosine
        assert_eq!(neighbors[0].isbn, "B");
    }

    #[test]
    fn test_cosine_distances() {
        let matrix = scenario();
        let engine = engine(&matrix, DistanceMetric::Cosine);

        let neighbors = engine.find_similar("A", 2);
        assert_eq!(neighbors.len(), 2);

        let a_b = 1.0 - (25.0 + 12.0) / (34f64.sqrt() * 41f64.sqrt());
        let a_c = 1.0 - 15.0 / (34f64.sqrt() * 5.0);
        assert!((neighbors[0].distance - a_b).abs() < 1e-12);
        assert!((neighbors[1].distance - a_c).abs() < 1e-12);
        assert!(neighbors[0].distance <= neighbors[1].distance);
    }

    #[test]
    fn test_k_larger_than_catalog() {
        let matrix = scenario();
        let engine = engine(&matrix, DistanceMetric::Cosine);

        let neighbors = engine.find_similar("C", 10);
        assert_eq!(neighbors.len(), 2);
        assert!(neighbors.iter().all(|n| n.isbn != "C"));
    }

    #[test]
    fn test_unknown_isbn_yields_empty() {
        let matrix = scenario();
        let engine = engine(&matrix, DistanceMetric::Cosine);

        assert!(engine.find_similar("missing", 3).is_empty());
        assert!(matches!(
            engine.try_find_similar("missing", 3),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_ties_break_by_isbn() {
        // B and C are both identical to A
        let matrix = RatingMatrix::build(&[
            Rating::new(1, "A", 4),
            Rating::new(1, "C", 4),
            Rating::new(1, "B", 4),
        ]);
        let engine = engine(&matrix, DistanceMetric::Cosine);

        let neighbors = engine.find_similar("A", 2);
        let isbns: Vec<&str> = neighbors.iter().map(|n| n.isbn.as_str()).collect();
        assert_eq!(isbns, vec!["B", "C"]);
        assert!(neighbors.iter().all(|n| n.distance.abs() < 1e-12));
    }

    #[test]
    fn test_euclidean_and_manhattan() {
        let matrix = scenario();

        // A = (5, 3), B = (5, 4), C = (0, 5)
        let euclid = engine(&matrix, DistanceMetric::Euclidean).find_similar("A", 2);
        assert_eq!(euclid[0].isbn, "B");
        assert!((euclid[0].distance - 1.0).abs() < 1e-9);
        assert!((euclid[1].distance - 29f64.sqrt()).abs() < 1e-9);

        let manhattan = engine(&matrix, DistanceMetric::Manhattan).find_similar("A", 2);
        assert_eq!(manhattan[0].isbn, "B");
        assert!((manhattan[0].distance - 1.0).abs() < 1e-9);
        assert!((manhattan[1].distance - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let ratings: Vec<Rating> = (0..60)
            .flat_map(|user| {
                (0..40).filter_map(move |book| {
                    let value = ((user * 7 + book * 3) % 11) as i32;
                    (value > 0).then(|| Rating::new(user, format!("{:04}", book), value))
                })
            })
            .collect();
        let matrix = RatingMatrix::build(&ratings);
        let isbns: Vec<String> = matrix.mappers().books.ids().to_vec();

        let sequential = engine(&matrix, DistanceMetric::Cosine).similar_for_books(&isbns, 5);
        let parallel = SimilarityEngine::new(
            &matrix,
            SimilarityConfig {
                metric: DistanceMetric::Cosine,
                parallel: true,
            },
        )
        .similar_for_books(&isbns, 5);

        assert_eq!(sequential, parallel);
        assert!(sequential.iter().all(|r| r.similar_isbns.len() == 5));
    }

    #[test]
    fn test_cached_neighbors_match_fresh_scan() {
        let matrix = scenario();
        let fresh = engine(&matrix, DistanceMetric::Cosine);
        let cached = engine(&matrix, DistanceMetric::Cosine).with_neighbor_cache(2);
        assert_eq!(cached.cached_rows(), 0);

        for row in 0..matrix.num_books() {
            assert_eq!(cached.neighbors_of(row, 2), fresh.neighbors_of(row, 2));
            // Second lookup is served from the cache
            assert_eq!(cached.neighbors_of(row, 2), fresh.neighbors_of(row, 2));
        }
        assert_eq!(cached.cached_rows(), matrix.num_books());

        // Another k bypasses the cache
        assert_eq!(cached.neighbors_of(0, 1), fresh.neighbors_of(0, 1));
        assert_eq!(cached.neighbor_rows(0, 1).len(), 1);
    }

    #[test]
    fn test_metric_deserializes_through_parser() {
        let metric: DistanceMetric = serde_json::from_str("\"L2\"").unwrap();
        assert_eq!(metric, DistanceMetric::Euclidean);
        let metric: DistanceMetric = serde_json::from_str("\"cityblock\"").unwrap();
        assert_eq!(metric, DistanceMetric::Manhattan);
        assert!(serde_json::from_str::<DistanceMetric>("\"hamming\"").is_err());
        assert_eq!(
            serde_json::to_string(&DistanceMetric::Manhattan).unwrap(),
            "\"manhattan\""
        );
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!("cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert_eq!("L2".parse::<DistanceMetric>().unwrap(), DistanceMetric::Euclidean);
        assert_eq!(
            "cityblock".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::Manhattan
        );
        assert!("hamming".parse::<DistanceMetric>().is_err());
        assert_eq!(DistanceMetric::Euclidean.to_string(), "euclidean");
    }
}
