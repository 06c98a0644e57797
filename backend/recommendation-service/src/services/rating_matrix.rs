use super::id_mapper::{IdMapper, IdMappers};
use crate::models::Rating;
use sprs::{CsMat, CsVecView, TriMat};
use tracing::debug;

/// Sparse item x user rating matrix
///
/// Row `r` is the rating vector of book `mappers.isbn(r)`, column `c` is user
/// `mappers.user_id(c)`. Only explicit ratings are stored, construction is
/// O(number of ratings).
#[derive(Debug, Clone)]
pub struct RatingMatrix {
    matrix: CsMat<f64>,
    mappers: IdMappers,
    /// L2 norm of every row, used by the cosine and euclidean metrics
    row_norms: Vec<f64>,
    /// Ratings per user column, in snapshot order
    user_rows: Vec<Vec<(usize, i32)>>,
    /// Rows a user has a record for that is not a cell (rating 0 or an
    /// unreadable rating), sorted
    user_unscored: Vec<Vec<usize>>,
    duplicates: usize,
}

impl RatingMatrix {
    /// Build the matrix from a ratings snapshot
    ///
    /// Ratings of 0 never become matrix cells, but are remembered per user
    /// so those books are not recommended back. When the same (user, isbn)
    /// pair appears more than once the last occurrence wins.
    pub fn build(ratings: &[Rating]) -> Self {
        Self::build_with_unscored(ratings, &[])
    }

    /// Like [`build`](Self::build), plus (user_id, isbn) pairs whose rating
    /// could not be read; they are remembered the same way as rating-0 records
    pub fn build_with_unscored(ratings: &[Rating], unscored: &[(i64, String)]) -> Self {
        let rated: Vec<&Rating> = ratings.iter().filter(|r| !r.is_unrated()).collect();

        let users = IdMapper::from_ids(rated.iter().map(|r| r.user_id));
        let books = IdMapper::from_ids(rated.iter().map(|r| r.isbn.clone()));
        let mappers = IdMappers::new(users, books);

        let num_books = mappers.books.len();
        let num_users = mappers.users.len();

        // (row, col, value) for every rating, positions resolved through the mappers
        let mut cells: Vec<(usize, usize, usize, i32)> = Vec::with_capacity(rated.len());
        for (seq, rating) in rated.iter().enumerate() {
            if let (Some(row), Some(col)) = (
                mappers.book_index(&rating.isbn),
                mappers.user_index(rating.user_id),
            ) {
                cells.push((row, col, seq, rating.rating));
            }
        }

        // Last write wins: order by cell then by sequence and keep the tail of each run
        cells.sort_unstable_by_key(|&(row, col, seq, _)| (row, col, seq));
        let before = cells.len();
        let mut deduped: Vec<(usize, usize, usize, i32)> = Vec::with_capacity(before);
        for cell in cells {
            match deduped.last_mut() {
                Some(last) if last.0 == cell.0 && last.1 == cell.1 => *last = cell,
                _ => deduped.push(cell),
            }
        }
        let duplicates = before - deduped.len();

        let mut triplets = TriMat::with_capacity((num_books, num_users), deduped.len());
        let mut user_rows: Vec<Vec<(usize, i32)>> = vec![Vec::new(); num_users];
        for &(row, col, _, value) in &deduped {
            triplets.add_triplet(row, col, f64::from(value));
        }

        // Per-user lists keep snapshot order for fallback seed ties
        deduped.sort_unstable_by_key(|&(_, col, seq, _)| (col, seq));
        for &(row, col, _, value) in &deduped {
            user_rows[col].push((row, value));
        }

        let unrated = ratings
            .iter()
            .filter(|r| r.is_unrated())
            .map(|r| (r.user_id, r.isbn.as_str()))
            .chain(unscored.iter().map(|(user_id, isbn)| (*user_id, isbn.as_str())));

        let mut user_unscored: Vec<Vec<usize>> = vec![Vec::new(); num_users];
        for (user_id, isbn) in unrated {
            if let (Some(row), Some(col)) = (mappers.book_index(isbn), mappers.user_index(user_id)) {
                user_unscored[col].push(row);
            }
        }
        for rows in &mut user_unscored {
            rows.sort_unstable();
            rows.dedup();
        }

        let matrix: CsMat<f64> = triplets.to_csr();
        let row_norms = matrix
            .outer_iterator()
            .map(|row| row.iter().map(|(_, v)| v * v).sum::<f64>().sqrt())
            .collect();

        debug!(
            books = num_books,
            users = num_users,
            nnz = matrix.nnz(),
            duplicates,
            "Built rating matrix"
        );

        Self {
            matrix,
            mappers,
            row_norms,
            user_rows,
            user_unscored,
            duplicates,
        }
    }

    /// (num_books, num_users)
    pub fn shape(&self) -> (usize, usize) {
        (self.matrix.rows(), self.matrix.cols())
    }

    pub fn nnz(&self) -> usize {
        self.matrix.nnz()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.nnz() == 0
    }

    /// Number of (user, isbn) pairs that were rated more than once
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn mappers(&self) -> &IdMappers {
        &self.mappers
    }

    pub fn num_books(&self) -> usize {
        self.matrix.rows()
    }

    /// Rating vector of a book row
    pub fn row(&self, index: usize) -> Option<CsVecView<'_, f64>> {
        self.matrix.outer_view(index)
    }

    pub fn row_norm(&self, index: usize) -> f64 {
        self.row_norms.get(index).copied().unwrap_or(0.0)
    }

    /// Stored rating for a (user, isbn) pair
    pub fn rating(&self, user_id: i64, isbn: &str) -> Option<f64> {
        let row = self.mappers.book_index(isbn)?;
        let col = self.mappers.user_index(user_id)?;
        self.matrix.get(row, col).copied()
    }

    /// A user's ratings as (isbn, rating) pairs, in snapshot order
    pub fn user_ratings(&self, user_id: i64) -> Option<Vec<(&str, i32)>> {
        let col = self.mappers.user_index(user_id)?;
        Some(
            self.user_rows[col]
                .iter()
                .filter_map(|&(row, value)| self.mappers.isbn(row).map(|isbn| (isbn, value)))
                .collect(),
        )
    }

    /// Sorted rows the user has any record for, rated or not
    pub fn user_known_rows(&self, user_id: i64) -> Option<Vec<usize>> {
        let col = self.mappers.user_index(user_id)?;
        let mut rows: Vec<usize> = self.user_rows[col].iter().map(|&(row, _)| row).collect();
        rows.extend_from_slice(&self.user_unscored[col]);
        rows.sort_unstable();
        rows.dedup();
        Some(rows)
    }
}
