use std::time::SystemTime;

use serde::Serialize;

use crate::models::JobRecord;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_previous: bool,
}

impl Pagination {
    pub fn for_total(page: u32, page_size: u32, total_found: u64) -> Self {
        let page_size = page_size.max(1);
        let total_pages = total_found.div_ceil(u64::from(page_size)).max(1);
        let total_pages = u32::try_from(total_pages).unwrap_or(u32::MAX);
        Self {
            page,
            page_size,
            total_pages,
            has_next: page < total_pages,
            has_previous: page > 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResultPage {
    pub records: Vec<JobRecord>,
    pub pagination: Pagination,
    pub total_found: u64,
    #[serde(skip)]
    pub timestamp: SystemTime,
}

impl ResultPage {
    pub fn new(records: Vec<JobRecord>, pagination: Pagination, total_found: u64) -> Self {
        Self {
            records,
            pagination,
            total_found,
            timestamp: SystemTime::now(),
        }
    }

    pub fn page(&self) -> u32 {
        self.pagination.page
    }

    pub fn is_first(&self) -> bool {
        self.pagination.page <= 1
    }

    /// Recomputes page counts after `total_found` moved, keeping the
    /// current page number.
    pub fn set_total_found(&mut self, total_found: u64) {
        self.total_found = total_found;
        self.pagination =
            Pagination::for_total(self.pagination.page, self.pagination.page_size, total_found);
    }
}

#[cfg(test)]
mod tests {
    use super::Pagination;

    #[test]
    fn pagination_rounds_partial_pages_up() {
        let pagination = Pagination::for_total(2, 20, 41);
        assert_eq!(pagination.total_pages, 3);
        assert!(pagination.has_next);
        assert!(pagination.has_previous);
    }

    #[test]
    fn empty_result_still_has_one_page() {
        let pagination = Pagination::for_total(1, 20, 0);
        assert_eq!(pagination.total_pages, 1);
        assert!(!pagination.has_next);
        assert!(!pagination.has_previous);
    }
}
