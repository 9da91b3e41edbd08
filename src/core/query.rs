//! List parameters, sorting and pagination metadata

use serde::{Deserialize, Serialize};

/// Default number of records per page
pub const DEFAULT_PER_PAGE: usize = 50;

/// Largest accepted `_perPage` value
pub const MAX_PER_PAGE: usize = 499;

/// Reserved list parameters, as they appear in the query string
pub const PAGE_PARAM: &str = "_page";
pub const PER_PAGE_PARAM: &str = "_perPage";
pub const SORT_PARAM: &str = "_sort";
pub const FULL_QUERY_PARAM: &str = "query";

/// Sort direction for a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One entry of a sort specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub direction: SortDirection,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }

    /// Parse one entry: `-field`, `field:desc`, `field:asc` or `field`
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(field) = raw.strip_prefix('-') {
            return (!field.is_empty()).then(|| Self::desc(field));
        }
        let (field, direction) = match raw.rsplit_once(':') {
            Some((field, "desc")) => (field, SortDirection::Descending),
            Some((field, "asc")) => (field, SortDirection::Ascending),
            _ => (raw, SortDirection::Ascending),
        };
        (!field.is_empty()).then(|| Self {
            field: field.to_string(),
            direction,
        })
    }

    /// Parse a comma separated list, skipping empty entries
    pub fn parse_list(raw: &str) -> Vec<Self> {
        raw.split(',').filter_map(Self::parse).collect()
    }
}

/// Pagination and sort settings for one list request
///
/// # Example
/// ```text
/// GET /api/pages?_page=2&_perPage=10&_sort=-created,title
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    /// Page number (starts at 1)
    pub page: usize,

    /// Records per page
    pub per_page: usize,

    /// Sort fields in priority order
    pub sort: Vec<SortField>,
}

impl ListParams {
    /// Read list parameters from decoded query pairs.
    ///
    /// Out-of-range or malformed values fall back to the defaults rather than
    /// failing the request.
    pub fn from_pairs(pairs: &[(String, String)], default_per_page: usize, max_per_page: usize) -> Self {
        let lookup = |name: &str| {
            pairs
                .iter()
                .find(|(k, v)| k == name && !v.is_empty())
                .map(|(_, v)| v.as_str())
        };

        let page = lookup(PAGE_PARAM)
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(1);

        let per_page = lookup(PER_PAGE_PARAM)
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|p| (1..=max_per_page).contains(p))
            .unwrap_or(default_per_page);

        let sort = lookup(SORT_PARAM)
            .map(SortField::parse_list)
            .unwrap_or_default();

        Self {
            page,
            per_page,
            sort,
        }
    }
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            sort: Vec::new(),
        }
    }
}

/// Pagination metadata computed by the storage layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    /// Current page (0 when nothing matched)
    pub current: usize,

    /// Total number of pages
    pub total_pages: usize,

    /// Records per page
    pub per_page: usize,

    /// Total number of matching records
    pub total_records: usize,

    /// Records on the current page
    pub records_on_page: usize,
}

impl PaginationInfo {
    /// Compute page metadata from a total count.
    ///
    /// A requested page past the end is clamped to the last page.
    pub fn compute(total_records: usize, per_page: usize, page: usize) -> Self {
        let per_page = per_page.max(1);
        if total_records == 0 {
            return Self {
                per_page,
                ..Self::default()
            };
        }

        let total_pages = total_records.div_ceil(per_page);
        let current = page.clamp(1, total_pages);
        let start = (current - 1) * per_page;
        let records_on_page = per_page.min(total_records - start);

        Self {
            current,
            total_pages,
            per_page,
            total_records,
            records_on_page,
        }
    }

    /// Number of records to skip for the current page
    pub fn offset(&self) -> usize {
        self.current.saturating_sub(1) * self.per_page
    }
}
