//! Pagination, sorting and filtering resolver
//!
//! Turns UI-level list state into a normalized [`QueryDescriptor`], which doubles
//! as the list cache key. Normalization makes semantically equal inputs produce
//! equal descriptors:
//!
//! - a status or priority of "all" means no constraint
//! - search is trimmed and lowercased; blank search means no constraint
//! - page size is clamped into the configured bounds
//! - missing sorting falls back to `requested_at` descending

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::PaginationConfig;
use crate::model::{ParseEnumError, Priority, RequestStatus};

/// A select-box value where "all" disables the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Choice<T> {
    All,
    Only(T),
}

impl<T> Default for Choice<T> {
    fn default() -> Self {
        Choice::All
    }
}

impl<T> Choice<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Choice::All => None,
            Choice::Only(value) => Some(value),
        }
    }
}

impl<T> FromStr for Choice<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") || s.trim().is_empty() {
            Ok(Choice::All)
        } else {
            s.parse().map(Choice::Only)
        }
    }
}

/// Raw filter state as the UI holds it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterInput {
    pub status: Choice<RequestStatus>,
    pub priority: Choice<Priority>,
    pub search: String,
}

impl FilterInput {
    pub fn search(text: impl Into<String>) -> Self {
        Self {
            search: text.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page_index: usize,
    pub page_size: usize,
}

impl PageRequest {
    pub fn new(page_index: usize, page_size: usize) -> Self {
        Self {
            page_index,
            page_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortColumn {
    MaterialName,
    Quantity,
    Status,
    Priority,
    RequestedAt,
    CreatedAt,
    UpdatedAt,
}

impl SortColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            SortColumn::MaterialName => "material_name",
            SortColumn::Quantity => "quantity",
            SortColumn::Status => "status",
            SortColumn::Priority => "priority",
            SortColumn::RequestedAt => "requested_at",
            SortColumn::CreatedAt => "created_at",
            SortColumn::UpdatedAt => "updated_at",
        }
    }
}

impl FromStr for SortColumn {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "material_name" => Ok(SortColumn::MaterialName),
            "quantity" => Ok(SortColumn::Quantity),
            "status" => Ok(SortColumn::Status),
            "priority" => Ok(SortColumn::Priority),
            "requested_at" => Ok(SortColumn::RequestedAt),
            "created_at" => Ok(SortColumn::CreatedAt),
            "updated_at" => Ok(SortColumn::UpdatedAt),
            other => Err(ParseEnumError {
                kind: "sort column",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sorting {
    pub column: SortColumn,
    pub direction: SortDirection,
}

impl Sorting {
    pub fn new(column: SortColumn, direction: SortDirection) -> Self {
        Self { column, direction }
    }

    pub fn ascending(self) -> bool {
        self.direction == SortDirection::Asc
    }
}

impl Default for Sorting {
    fn default() -> Self {
        Self {
            column: SortColumn::RequestedAt,
            direction: SortDirection::Desc,
        }
    }
}

/// Normalized filter constraints. `None` means unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Filters {
    status: Option<RequestStatus>,
    priority: Option<Priority>,
    search: Option<String>,
}

impl Filters {
    pub fn status(&self) -> Option<RequestStatus> {
        self.status
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    /// Lowercased, trimmed search text
    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.priority.is_none() && self.search.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Pagination {
    page_index: usize,
    page_size: usize,
}

impl Pagination {
    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

/// Cache key for a list read. Only the resolver builds these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct QueryDescriptor {
    filters: Filters,
    pagination: Pagination,
    sorting: Sorting,
}

impl QueryDescriptor {
    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    pub fn sorting(&self) -> Sorting {
        self.sorting
    }

    /// Inclusive row range `(start, end)` for the store
    pub fn range(&self) -> (usize, usize) {
        // Saturates for absurd page indexes instead of wrapping the offset
        let start = self
            .pagination
            .page_index
            .saturating_mul(self.pagination.page_size);
        (start, start.saturating_add(self.pagination.page_size - 1))
    }

    pub fn next_page(&self) -> QueryDescriptor {
        let mut next = self.clone();
        next.pagination.page_index = next.pagination.page_index.saturating_add(1);
        next
    }

    pub fn page_meta(&self, total_count: u64) -> PageMeta {
        PageMeta::new(total_count, self.pagination)
    }
}

impl fmt::Display for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status={} priority={} search={:?} page={}x{} sort={}.{}",
            self.filters.status.map_or("all", RequestStatus::as_str),
            self.filters.priority.map_or("all", Priority::as_str),
            self.filters.search.as_deref().unwrap_or(""),
            self.pagination.page_index,
            self.pagination.page_size,
            self.sorting.column.as_str(),
            if self.sorting.ascending() { "asc" } else { "desc" },
        )
    }
}

/// Pagination metadata derived from an exact total count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub total_count: u64,
    pub page_index: usize,
    pub page_size: usize,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl PageMeta {
    pub fn new(total_count: u64, pagination: Pagination) -> Self {
        let page_size = pagination.page_size.max(1) as u64;
        let total_pages = total_count.div_ceil(page_size);
        let page_index = pagination.page_index;
        Self {
            total_count,
            page_index,
            page_size: pagination.page_size,
            total_pages,
            has_next_page: (page_index as u64).saturating_add(1) < total_pages,
            has_previous_page: page_index > 0,
        }
    }
}

/// Pure mapping from UI state to descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolver {
    min_page_size: usize,
    max_page_size: usize,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(&PaginationConfig::default())
    }
}

impl Resolver {
    pub fn new(config: &PaginationConfig) -> Self {
        let min_page_size = config.min_page_size.max(1);
        Self {
            min_page_size,
            max_page_size: config.max_page_size.max(min_page_size),
        }
    }

    pub fn resolve(
        &self,
        filters: &FilterInput,
        pagination: PageRequest,
        sorting: Option<Sorting>,
    ) -> QueryDescriptor {
        QueryDescriptor {
            filters: Self::normalize_filters(filters),
            pagination: Pagination {
                page_index: pagination.page_index,
                page_size: pagination
                    .page_size
                    .clamp(self.min_page_size, self.max_page_size),
            },
            sorting: sorting.unwrap_or_default(),
        }
    }

    pub fn normalize_filters(filters: &FilterInput) -> Filters {
        let search = filters.search.trim();
        Filters {
            status: filters.status.into_option(),
            priority: filters.priority.into_option(),
            search: (!search.is_empty()).then(|| search.to_lowercase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> Resolver {
        Resolver::default()
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let input = FilterInput {
            status: Choice::Only(RequestStatus::Pending),
            priority: Choice::Only(Priority::High),
            search: "Steel".to_string(),
        };
        let a = resolver().resolve(&input, PageRequest::new(2, 20), None);
        let b = resolver().resolve(&input, PageRequest::new(2, 20), None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_huge_page_index_saturates_instead_of_overflowing() {
        let descriptor = resolver().resolve(
            &FilterInput::default(),
            PageRequest::new(usize::MAX / 5, 10),
            None,
        );
        assert_eq!(descriptor.range(), (usize::MAX, usize::MAX));

        let last = resolver().resolve(&FilterInput::default(), PageRequest::new(usize::MAX, 10), None);
        assert_eq!(last.next_page().pagination().page_index(), usize::MAX);

        let meta = last.page_meta(50);
        assert!(!meta.has_next_page);
        assert!(meta.has_previous_page);
    }

    #[test]
    fn test_all_means_no_constraint() {
        let input = FilterInput {
            status: "all".parse().unwrap(),
            priority: "ALL".parse().unwrap(),
            search: String::new(),
        };
        let descriptor = resolver().resolve(&input, PageRequest::new(0, 10), None);
        assert_eq!(descriptor.filters().status(), None);
        assert_eq!(descriptor.filters().priority(), None);
        assert!(descriptor.filters().is_empty());
    }

    #[test]
    fn test_blank_search_equals_empty_search() {
        let blank = resolver().resolve(&FilterInput::search("   "), PageRequest::new(0, 10), None);
        let empty = resolver().resolve(&FilterInput::search(""), PageRequest::new(0, 10), None);
        assert_eq!(blank, empty);
        assert_eq!(blank.filters().search(), None);
    }

    #[test]
    fn test_search_is_trimmed_and_case_folded() {
        let a = resolver().resolve(&FilterInput::search("  Steel Bars "), PageRequest::new(0, 10), None);
        let b = resolver().resolve(&FilterInput::search("steel bars"), PageRequest::new(0, 10), None);
        assert_eq!(a, b);
        assert_eq!(a.filters().search(), Some("steel bars"));
    }

    #[test]
    fn test_page_size_is_clamped() {
        let small = resolver().resolve(&FilterInput::default(), PageRequest::new(0, 0), None);
        assert_eq!(small.pagination().page_size(), 5);
        let large = resolver().resolve(&FilterInput::default(), PageRequest::new(0, 1000), None);
        assert_eq!(large.pagination().page_size(), 100);
    }

    #[test]
    fn test_default_sorting() {
        let descriptor = resolver().resolve(&FilterInput::default(), PageRequest::new(0, 10), None);
        assert_eq!(
            descriptor.sorting(),
            Sorting::new(SortColumn::RequestedAt, SortDirection::Desc)
        );
    }

    #[test]
    fn test_page_meta_last_page() {
        let descriptor = resolver().resolve(&FilterInput::default(), PageRequest::new(9, 10), None);
        let meta = descriptor.page_meta(95);
        assert_eq!(meta.total_pages, 10);
        assert!(!meta.has_next_page);
        assert!(meta.has_previous_page);
    }

    #[test]
    fn test_page_meta_edges() {
        let first = resolver().resolve(&FilterInput::default(), PageRequest::new(0, 10), None);
        let meta = first.page_meta(0);
        assert_eq!(meta.total_pages, 0);
        assert!(!meta.has_next_page);
        assert!(!meta.has_previous_page);

        let meta = first.page_meta(11);
        assert_eq!(meta.total_pages, 2);
        assert!(meta.has_next_page);
    }

    #[test]
    fn test_range_and_next_page() {
        let descriptor = resolver().resolve(&FilterInput::default(), PageRequest::new(3, 25), None);
        assert_eq!(descriptor.range(), (75, 99));
        let next = descriptor.next_page();
        assert_eq!(next.pagination().page_index(), 4);
        assert_eq!(next.filters(), descriptor.filters());
        assert_ne!(next, descriptor);
    }

    #[test]
    fn test_choice_rejects_unknown_values() {
        assert!("bogus".parse::<Choice<RequestStatus>>().is_err());
        assert_eq!(
            "approved".parse::<Choice<RequestStatus>>().unwrap(),
            Choice::Only(RequestStatus::Approved)
        );
    }
}
