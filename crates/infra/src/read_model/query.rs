//! Pre-compiled read-model query clause.
//!
//! Stores receive a [`ReadModelQuery`] already built by the caller; they only
//! run it over their rows. Translating an external query language into one is
//! outside this crate.

use core::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Pagination parameters for read-model queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of rows to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(1000),
            offset: offset.unwrap_or(0),
        }
    }
}

type Filter<V> = Box<dyn Fn(&V) -> bool + Send + Sync>;
type Sort<V> = Box<dyn Fn(&V, &V) -> Ordering + Send + Sync>;

/// Filter + sort + pagination over read-model rows of type `V`.
pub struct ReadModelQuery<V> {
    filters: Vec<Filter<V>>,
    sort: Option<Sort<V>>,
    pagination: Option<Pagination>,
}

impl<V> Default for ReadModelQuery<V> {
    fn default() -> Self {
        Self::all()
    }
}

impl<V> ReadModelQuery<V> {
    /// Every row, unsorted, unpaginated.
    pub fn all() -> Self {
        Self {
            filters: Vec::new(),
            sort: None,
            pagination: None,
        }
    }

    /// Keep rows matching `predicate` (filters are AND-ed).
    pub fn filter(mut self, predicate: impl Fn(&V) -> bool + Send + Sync + 'static) -> Self {
        self.filters.push(Box::new(predicate));
        self
    }

    pub fn sort_by(mut self, compare: impl Fn(&V, &V) -> Ordering + Send + Sync + 'static) -> Self {
        self.sort = Some(Box::new(compare));
        self
    }

    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn matches(&self, row: &V) -> bool {
        self.filters.iter().all(|f| f(row))
    }

    /// Run the clause over `rows`: filter, then sort, then paginate.
    pub fn run(&self, rows: impl IntoIterator<Item = V>) -> Vec<V> {
        let mut out: Vec<V> = rows.into_iter().filter(|r| self.matches(r)).collect();
        if let Some(sort) = &self.sort {
            out.sort_by(|a, b| sort(a, b));
        }
        match self.pagination {
            Some(p) => out
                .into_iter()
                .skip(p.offset as usize)
                .take(p.limit as usize)
                .collect(),
            None => out,
        }
    }
}

impl<V> core::fmt::Debug for ReadModelQuery<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReadModelQuery")
            .field("filters", &self.filters.len())
            .field("sorted", &self.sort.is_some())
            .field("pagination", &self.pagination)
            .finish()
    }
}
