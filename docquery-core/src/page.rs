//! Pagination parameters and result pages.
//!
//! [`PaginationParams`] feeds [`Builder::for_page`](crate::builder::Builder::for_page) and
//! [`Builder::paginate`](crate::builder::Builder::paginate); [`Page`] is what `paginate` returns.

use serde::{Deserialize, Serialize};

/// A single page of results.
///
/// # Example
///
/// ```ignore
/// use docquery::page::{Page, PaginationParams};
///
/// let page: Page<i32> = Page::builder(vec![11, 12])
///     .with_total(12)
///     .with_params(&PaginationParams::new(2, 10))
///     .build();
///
/// assert_eq!(page.next_page, None);
/// assert_eq!(page.previous_page, Some(1));
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of records matched across all pages.
    pub total: u64,
    /// The page number (1-indexed).
    pub page: u64,
    pub per_page: u64,
    pub next_page: Option<u64>,
    pub previous_page: Option<u64>,
}

impl<T> Page<T> {
    pub fn builder(items: Vec<T>) -> PageBuilder<T> {
        PageBuilder::new(items)
    }

    /// Number of pages needed to hold `total` records.
    pub fn page_count(&self) -> u64 {
        if self.per_page == 0 {
            0
        } else {
            self.total.div_ceil(self.per_page)
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            page: 1,
            per_page: 0,
            next_page: None,
            previous_page: None,
        }
    }
}

/// Builder for [`Page`]. Navigation links are derived from the total and the page params.
pub struct PageBuilder<T> {
    items: Vec<T>,
    total: u64,
    params: PaginationParams,
}

impl<T> PageBuilder<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            total: 0,
            params: PaginationParams::default(),
        }
    }

    /// Sets the number of records matched across all pages.
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = total;
        self
    }

    pub fn with_params(mut self, params: &PaginationParams) -> Self {
        self.params = params.clone();
        self
    }

    pub fn build(self) -> Page<T> {
        let PaginationParams { page, per_page } = self.params;
        let page = page.max(1);
        let end = page.saturating_mul(per_page);

        Page {
            items: self.items,
            total: self.total,
            page,
            per_page,
            next_page: (end < self.total).then_some(page + 1),
            previous_page: (page > 1).then_some(page - 1),
        }
    }
}

/// Which page to read and how many records a page holds. Pages are 1-indexed; page `0` is
/// treated as page `1`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaginationParams {
    pub page: u64,
    pub per_page: u64,
}

impl PaginationParams {
    pub fn new(page: u64, per_page: u64) -> Self {
        Self { page, per_page }
    }

    pub fn builder() -> PaginationParamsBuilder {
        PaginationParamsBuilder::new()
    }

    /// Number of records to skip to reach this page.
    ///
    /// ```ignore
    /// assert_eq!(PaginationParams::new(3, 20).offset(), 40);
    /// ```
    pub fn offset(&self) -> u64 {
        self.page.max(1).saturating_sub(1).saturating_mul(self.per_page)
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { page: 1, per_page: 10 }
    }
}

/// Builder for [`PaginationParams`]. Unset values default to page 1 with 10 per page.
#[derive(Default)]
pub struct PaginationParamsBuilder {
    page: Option<u64>,
    per_page: Option<u64>,
}

impl PaginationParamsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_per_page(mut self, per_page: u64) -> Self {
        self.per_page = Some(per_page);
        self
    }

    pub fn build(self) -> PaginationParams {
        PaginationParams {
            page: self.page.unwrap_or(1),
            per_page: self.per_page.unwrap_or(10),
        }
    }
}
