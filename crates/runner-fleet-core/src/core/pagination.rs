// crates/runner-fleet-core/src/core/pagination.rs
// ============================================================================
// Module: Runner Fleet Pagination
// Description: Page requests and paged results for list queries.
// Purpose: Normalize 1-indexed paging inputs and compute page counts.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Pages are 1-indexed. A zero page or zero page size is normalized to the
//! defaults (page 1, [`DEFAULT_PAGE_SIZE`] rows) rather than rejected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Page size used when the caller passes zero.
pub const DEFAULT_PAGE_SIZE: u64 = 20;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Requested page of a list query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageRequest {
    /// 1-indexed page number; zero means the first page.
    pub page: u64,
    /// Rows per page; zero means [`DEFAULT_PAGE_SIZE`].
    pub page_size: u64,
}

impl PageRequest {
    /// Creates a page request.
    #[must_use]
    pub const fn new(page: u64, page_size: u64) -> Self {
        Self {
            page,
            page_size,
        }
    }

    /// Returns the request with zero inputs replaced by their defaults.
    #[must_use]
    pub const fn normalized(self) -> Self {
        Self {
            page: if self.page == 0 { 1 } else { self.page },
            page_size: if self.page_size == 0 { DEFAULT_PAGE_SIZE } else { self.page_size },
        }
    }

    /// Returns the row offset of the normalized page.
    #[must_use]
    pub const fn offset(self) -> u64 {
        let normalized = self.normalized();
        (normalized.page - 1).saturating_mul(normalized.page_size)
    }

    /// Returns the number of pages needed for `total` rows.
    #[must_use]
    pub const fn total_pages(self, total: u64) -> u64 {
        total.div_ceil(self.normalized().page_size)
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Rows on this page.
    pub items: Vec<T>,
    /// Normalized page number.
    pub page: u64,
    /// Normalized page size.
    pub page_size: u64,
    /// Total rows matching the query.
    pub total_count: u64,
    /// Total pages for the query at this page size.
    pub total_pages: u64,
}

impl<T> Page<T> {
    /// Assembles a page from rows and the total count.
    #[must_use]
    pub const fn new(items: Vec<T>, request: PageRequest, total_count: u64) -> Self {
        let normalized = request.normalized();
        Self {
            items,
            page: normalized.page,
            page_size: normalized.page_size,
            total_count,
            total_pages: request.total_pages(total_count),
        }
    }

    /// Converts every row, keeping the page bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `convert`.
    pub fn try_map<U, E>(self, convert: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        Ok(Page {
            items: self.items.into_iter().map(convert).collect::<Result<Vec<_>, E>>()?,
            page: self.page,
            page_size: self.page_size,
            total_count: self.total_count,
            total_pages: self.total_pages,
        })
    }
}
