/// Dense index assignment for raw identifiers
///
/// Every distinct id observed in a snapshot gets a zero-based index in
/// ascending id order. The inverse mapping is the sorted id array itself and
/// the forward mapping is a binary search over it, so both directions are
/// plain array lookups with no hashing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMapper<T> {
    ids: Vec<T>,
}

impl<T: Ord + Clone> IdMapper<T> {
    /// Build from any collection of ids; duplicates collapse to one index
    pub fn from_ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let mut ids: Vec<T> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }

    /// Raw id -> dense index
    pub fn index_of(&self, id: &T) -> Option<usize> {
        self.ids.binary_search(id).ok()
    }

    /// Dense index -> raw id
    pub fn id_at(&self, index: usize) -> Option<&T> {
        self.ids.get(index)
    }

    pub fn contains(&self, id: &T) -> bool {
        self.index_of(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in index order
    pub fn ids(&self) -> &[T] {
        &self.ids
    }
}

/// Forward and inverse lookups for both matrix dimensions
#[derive(Debug, Clone, Default)]
pub struct IdMappers {
    /// user_id -> column
    pub users: IdMapper<i64>,
    /// isbn -> row
    pub books: IdMapper<String>,
}

impl IdMappers {
    pub fn new(users: IdMapper<i64>, books: IdMapper<String>) -> Self {
        Self { users, books }
    }

    pub fn user_index(&self, user_id: i64) -> Option<usize> {
        self.users.index_of(&user_id)
    }

    pub fn book_index(&self, isbn: &str) -> Option<usize> {
        // binary search on &str avoids allocating a String for the probe
        self.books
            .ids()
            .binary_search_by(|probe| probe.as_str().cmp(isbn))
            .ok()
    }

    pub fn user_id(&self, index: usize) -> Option<i64> {
        self.users.id_at(index).copied()
    }

    pub fn isbn(&self, index: usize) -> Option<&str> {
        self.books.id_at(index).map(String::as_str)
    }
}
