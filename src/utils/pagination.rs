use rocket_okapi::okapi::schemars::JsonSchema;
use serde::Serialize;

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;
/// Upper bound for `page`; keeps the skip computation in range.
pub const MAX_PAGE: i64 = 1_000_000;

/// Page/limit pair resolved from optional query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
}

impl Pagination {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Pagination {
            page: page.unwrap_or(1).clamp(1, MAX_PAGE),
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }

    pub fn skip(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit).max(0) as u64
    }

    pub fn meta(&self, total: u64) -> PageMeta {
        PageMeta {
            page: self.page,
            limit: self.limit,
            total,
            pages: (total as f64 / self.limit as f64).ceil() as i64,
        }
    }
}

#[derive(Debug, Serialize, JsonSchema, PartialEq)]
pub struct PageMeta {
    pub page: i64,
    pub limit: i64,
    pub total: u64,
    pub pages: i64,
}
