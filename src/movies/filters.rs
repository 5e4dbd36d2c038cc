/// Paging and sorting for list endpoints
use crate::{
    error::{ApiError, ApiResult},
    validation::{permitted_value, Validator},
};
use serde::Serialize;

pub const MAX_PAGE: i64 = 10_000_000;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Sort keys accepted by the movie listing
pub const MOVIE_SORT_SAFELIST: &[&str] = &[
    "id", "title", "year", "runtime", "-id", "-title", "-year", "-runtime",
];

#[derive(Debug, Clone)]
pub struct Filters {
    pub page: i64,
    pub page_size: i64,
    pub sort: String,
    pub sort_safelist: &'static [&'static str],
}

impl Filters {
    /// Column to interpolate into `ORDER BY`.
    ///
    /// Only safelisted values ever reach SQL; anything else means
    /// validation was skipped.
    pub fn sort_column(&self) -> ApiResult<&str> {
        if permitted_value(&self.sort.as_str(), self.sort_safelist) {
            Ok(self.sort.trim_start_matches('-'))
        } else {
            Err(ApiError::Invariant(format!("unsafe sort parameter: {}", self.sort)))
        }
    }

    pub fn sort_direction(&self) -> &'static str {
        if self.sort.starts_with('-') {
            "DESC"
        } else {
            "ASC"
        }
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

pub fn validate_filters(v: &mut Validator, f: &Filters) {
    v.check(f.page > 0, "page", "must be greater than zero");
    v.check(f.page < MAX_PAGE, "page", "must be less than 10 million");
    v.check(f.page_size > 0, "page_size", "must be greater than zero");
    v.check(
        f.page_size <= MAX_PAGE_SIZE,
        "page_size",
        "must be a maximum of 100",
    );
    v.check(
        permitted_value(&f.sort.as_str(), f.sort_safelist),
        "sort",
        "invalid sort value",
    );
}

/// Pagination details returned alongside a page of results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub current_page: i64,
    pub page_size: i64,
    pub first_page: i64,
    pub last_page: i64,
    pub total: i64,
}

impl Metadata {
    pub fn calculate(total: i64, page: i64, page_size: i64) -> Self {
        if total == 0 || page_size == 0 {
            return Metadata::default();
        }

        Metadata {
            current_page: page,
            page_size,
            first_page: 1,
            last_page: (total + page_size - 1) / page_size,
            total,
        }
    }
}
