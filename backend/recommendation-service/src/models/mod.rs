use crate::error::AppError;
use crate::utils::isbn::clean_isbn;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lowest and highest explicit rating on the platform's 1-10 scale
pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 10;

/// One rating record from the ratings snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: i64,
    pub isbn: String,
    pub rating: i32,
}

impl Rating {
    pub fn new(user_id: i64, isbn: impl Into<String>, rating: i32) -> Self {
        Self {
            user_id,
            isbn: isbn.into(),
            rating,
        }
    }

    /// rating = 0 is the platform's "read but not rated" marker
    pub fn is_unrated(&self) -> bool {
        self.rating == 0
    }
}

/// A ratings row as read from the source, before validation
///
/// Every column is read as text so that a single bad row can be skipped
/// instead of failing the whole bulk query.
#[derive(Debug, Clone, Default, FromRow)]
pub struct RawRatingRow {
    pub user_id: Option<String>,
    pub isbn: Option<String>,
    pub rating: Option<String>,
}

impl RawRatingRow {
    /// The (user_id, cleaned isbn) pair, when both columns are usable
    ///
    /// A row with a usable pair but an unreadable rating still shows that the
    /// user has a record for the book.
    pub fn record_key(&self) -> Option<(i64, String)> {
        let user_id = self.parse_user_id().ok()?;
        let isbn = self.parse_isbn(user_id).ok()?;
        Some((user_id, isbn))
    }

    fn parse_user_id(&self) -> Result<i64, AppError> {
        self.user_id
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::MalformedInput("missing user_id".to_string()))?
            .parse::<i64>()
            .map_err(|_| {
                AppError::MalformedInput(format!("non-numeric user_id {:?}", self.user_id))
            })
    }

    fn parse_isbn(&self, user_id: i64) -> Result<String, AppError> {
        self.isbn
            .as_deref()
            .map(clean_isbn)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::MalformedInput(format!("missing isbn for user {}", user_id)))
    }
}

impl TryFrom<RawRatingRow> for Rating {
    type Error = AppError;

    fn try_from(row: RawRatingRow) -> Result<Self, Self::Error> {
        let user_id = row.parse_user_id()?;
        let isbn = row.parse_isbn(user_id)?;

        let rating = row
            .rating
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::MalformedInput(format!("missing rating for ({}, {})", user_id, isbn))
            })?
            .parse::<i32>()
            .map_err(|_| {
                AppError::MalformedInput(format!(
                    "non-numeric rating {:?} for ({}, {})",
                    row.rating, user_id, isbn
                ))
            })?;

        match rating {
            0 | MIN_RATING..=MAX_RATING => Ok(Rating {
                user_id,
                isbn,
                rating,
            }),
            other => Err(AppError::MalformedInput(format!(
                "rating {} out of range for ({}, {})",
                other, user_id, isbn
            ))),
        }
    }
}

/// Book record as stored by the book service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Book {
    pub isbn: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub year_of_publication: Option<i32>,
    pub publisher: Option<String>,
    pub image_url_s: Option<String>,
    pub image_url_m: Option<String>,
    pub image_url_l: Option<String>,
}

/// A neighbor returned by the similarity engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub isbn: String,
    pub distance: f64,
}

/// Row of `book_similarities`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SimilarityResult {
    pub isbn: String,
    pub similar_isbns: Vec<String>,
}

/// Row of `user_recommendations`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UserRecommendation {
    pub user_id: i64,
    pub recommended_isbns: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(user_id: &str, isbn: &str, rating: &str) -> RawRatingRow {
        RawRatingRow {
            user_id: Some(user_id.to_string()),
            isbn: Some(isbn.to_string()),
            rating: Some(rating.to_string()),
        }
    }

    #[test]
    fn test_valid_row_parses() {
        let parsed = Rating::try_from(raw("276725", "034545104X", "5")).unwrap();
        assert_eq!(parsed, Rating::new(276725, "034545104X", 5));
    }

    #[test]
    fn test_isbn_is_cleaned() {
        let parsed = Rating::try_from(raw("1", " 0-345-45104-X\"", "7")).unwrap();
        assert_eq!(parsed, Rating::new(1, "034545104X", 7));
    }

    #[test]
    fn test_zero_rating_is_unrated() {
        let parsed = Rating::try_from(raw("1", "0155061224", "0")).unwrap();
        assert!(parsed.is_unrated());
    }

    #[test]
    fn test_malformed_rows() {
        assert!(matches!(
            Rating::try_from(raw("1", "0155061224", "five")),
            Err(AppError::MalformedInput(_))
        ));
        assert!(matches!(
            Rating::try_from(raw("abc", "0155061224", "5")),
            Err(AppError::MalformedInput(_))
        ));
        assert!(matches!(
            Rating::try_from(raw("1", "0155061224", "11")),
            Err(AppError::MalformedInput(_))
        ));
        assert!(matches!(
            Rating::try_from(RawRatingRow {
                user_id: Some("1".into()),
                isbn: None,
                rating: Some("5".into()),
            }),
            Err(AppError::MalformedInput(_))
        ));
        assert!(matches!(
            Rating::try_from(raw("1", "  ", "5")),
            Err(AppError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_record_key_survives_bad_rating() {
        assert_eq!(
            raw("7", " 0-15-506122-4", "11").record_key(),
            Some((7, "0155061224".to_string()))
        );
        assert_eq!(
            raw("7", "0155061224", "").record_key(),
            Some((7, "0155061224".to_string()))
        );
        assert_eq!(raw("x", "0155061224", "5").record_key(), None);
        assert_eq!(raw("7", "  ", "5").record_key(), None);
    }
}
