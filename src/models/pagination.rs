//! Page/offset windowing for diff category listings.
//!
//! Category listings can run to thousands of findings on a large scan, so
//! callers page through them with a bounded window.

use serde::{Deserialize, Serialize};

/// Caller-supplied page window. Both fields are optional; out-of-range
/// values are clamped rather than rejected.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl Pagination {
    const MAX_PER_PAGE: i64 = 100;
    const DEFAULT_PER_PAGE: i64 = 25;

    /// Effective window size, clamped to `1..=MAX_PER_PAGE`.
    pub fn limit(&self) -> i64 {
        self.per_page
            .unwrap_or(Self::DEFAULT_PER_PAGE)
            .clamp(1, Self::MAX_PER_PAGE)
    }

    /// Rows to skip before the window starts. Pages are 1-based.
    pub fn offset(&self) -> i64 {
        (self.current_page() - 1) * self.limit()
    }

    pub fn current_page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }
}

/// One page of results plus the counts a caller needs to keep paging.
#[derive(Debug, Clone, Serialize)]
pub struct PagedResult<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T: Serialize> PagedResult<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: &Pagination) -> Self {
        let per_page = pagination.limit();
        Self {
            items,
            total,
            page: pagination.current_page(),
            per_page,
            total_pages: total.div_euclid(per_page) + (total.rem_euclid(per_page) != 0) as i64,
        }
    }
}
