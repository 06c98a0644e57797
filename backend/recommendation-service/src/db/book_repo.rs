/// Book repository - materializes stored isbn lists into book records
use crate::error::Result;
use crate::models::Book;
use sqlx::PgPool;
use std::collections::HashMap;

#[derive(Clone)]
pub struct BookRepository {
    pool: PgPool,
}

impl BookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Books for the given isbns, in the order of `isbns`
    ///
    /// Isbns without a books row are left out.
    pub async fn fetch_books_by_isbns(&self, isbns: &[String]) -> Result<Vec<Book>> {
        if isbns.is_empty() {
            return Ok(Vec::new());
        }

        let books = sqlx::query_as::<_, Book>(
            r#"
            SELECT b.isbn, b.title, a.name AS author, b.year_of_publication::int4 AS year_of_publication,
                   b.publisher, b.image_url_s, b.image_url_m, b.image_url_l
            FROM books b
            LEFT JOIN authors a ON a.id = b.author_id
            WHERE b.isbn = ANY($1)
            "#,
        )
        .bind(isbns)
        .fetch_all(&self.pool)
        .await?;

        Ok(order_like(isbns, books))
    }
}

/// Reorder rows fetched with `= ANY(...)` to follow the stored list
fn order_like(isbns: &[String], books: Vec<Book>) -> Vec<Book> {
    let mut by_isbn: HashMap<String, Book> = books
        .into_iter()
        .map(|book| (book.isbn.clone(), book))
        .collect();

    isbns
        .iter()
        .filter_map(|isbn| by_isbn.remove(isbn))
        .collect()
}
