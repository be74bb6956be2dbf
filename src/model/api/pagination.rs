use serde::{Deserialize, Serialize};

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 500;

/// Pagination query parameters: `?page_num=<n>&page_size=<n>`, both optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromForm)]
pub struct PaginationRequest {
    page_num: Option<u32>,
    page_size: Option<u32>,
}

impl PaginationRequest {
    pub fn new(page_num: u32, page_size: u32) -> Self {
        Self {
            page_num: Some(page_num),
            page_size: Some(page_size),
        }
    }

    /// 1-based page number.
    pub fn page_num(&self) -> u32 {
        self.page_num.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    /// Number of items before this page.
    pub fn skip(&self) -> u64 {
        u64::from(self.page_num() - 1) * u64::from(self.page_size())
    }

    pub fn to_paginated<T>(self, total: u64, items: Vec<T>) -> Paginated<T> {
        Paginated {
            items,
            pagination: PaginationResult {
                page_num: self.page_num(),
                page_size: self.page_size(),
                total,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationResult {
    page_num: u32,
    page_size: u32,
    total: u64,
}

/// One page of results plus where it sits in the whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: PaginationResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_bounds() {
        let default = PaginationRequest::default();
        assert_eq!(default.page_num(), 1);
        assert_eq!(default.page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(default.skip(), 0);

        let silly = PaginationRequest::new(0, 100_000);
        assert_eq!(silly.page_num(), 1);
        assert_eq!(silly.page_size(), MAX_PAGE_SIZE);

        assert_eq!(PaginationRequest::new(3, 20).skip(), 40);
    }
}
