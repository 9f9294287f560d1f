//! Program/conversation queries: filtering, stable sorting, pagination

use serde::{Deserialize, Serialize};

use crate::model::Program;

/// Default page size when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Program sort key. Unknown names fall back to [`SortKey::Generation`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Generation
    #[default]
    Generation,
    /// Composite score
    Score,
    /// Creation time
    Timestamp,
    /// Complexity feature
    Complexity,
    /// Island (missing island sorts as 0)
    Island,
    /// Derived children count
    ChildrenCount,
}

impl SortKey {
    /// Parse a sort key name, falling back to `Generation`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "score" => Self::Score,
            "timestamp" => Self::Timestamp,
            "complexity" => Self::Complexity,
            "island" | "island_id" => Self::Island,
            "children_count" => Self::ChildrenCount,
            _ => Self::Generation,
        }
    }

    fn key(self, p: &Program) -> f64 {
        match self {
            Self::Generation => p.generation as f64,
            Self::Score => p.score,
            Self::Timestamp => p.timestamp,
            Self::Complexity => p.complexity,
            Self::Island => f64::from(p.island_id.unwrap_or(0)),
            Self::ChildrenCount => p.children_count as f64,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Smallest first
    Ascending,
    /// Largest first
    #[default]
    Descending,
}

/// Program filters; every `Some`/`true` field must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramFilter {
    /// Only this island
    pub island_id: Option<u32>,
    /// Generation lower bound (inclusive)
    pub generation_min: Option<u64>,
    /// Generation upper bound (inclusive)
    pub generation_max: Option<u64>,
    /// Score lower bound (inclusive)
    pub score_min: Option<f64>,
    /// Only archive members
    pub archive_only: bool,
    /// Only correct programs
    pub correct_only: bool,
}

impl ProgramFilter {
    /// Whether `p` passes every active filter.
    #[must_use]
    pub fn matches(&self, p: &Program) -> bool {
        self.island_id.map_or(true, |i| p.island_id == Some(i))
            && self.generation_min.map_or(true, |g| p.generation >= g)
            && self.generation_max.map_or(true, |g| p.generation <= g)
            && self.score_min.map_or(true, |s| p.score >= s)
            && (!self.archive_only || p.in_archive)
            && (!self.correct_only || p.correct)
    }
}

/// 1-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Page number, starting at 1
    pub page: usize,
    /// Items per page
    pub page_size: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    /// Create a pagination; page 0 is treated as page 1.
    #[must_use]
    pub fn new(page: usize, page_size: usize) -> Self {
        Self {
            page: page.max(1),
            page_size,
        }
    }

    /// Number of items skipped before this page.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }
}

/// One page of results plus the pre-pagination total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Items across all pages
    pub total: usize,
}

/// `listPrograms` arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramQuery {
    /// Page selection
    pub pagination: Pagination,
    /// Sort key
    pub sort: SortKey,
    /// Sort direction
    pub direction: SortDirection,
    /// Filters
    pub filter: ProgramFilter,
}

impl ProgramQuery {
    /// Default query: first page, newest generation first.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sort key.
    #[must_use]
    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort = key;
        self
    }

    /// Set the sort direction.
    #[must_use]
    pub fn direction(mut self, direction: SortDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Set the filters.
    #[must_use]
    pub fn filter(mut self, filter: ProgramFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Select a page.
    #[must_use]
    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.pagination = Pagination::new(page, page_size);
        self
    }
}

/// `listConversations` arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationQuery {
    /// Page selection
    pub pagination: Pagination,
    /// Only entries whose child beat its parent
    pub improvements_only: bool,
    /// Only this island
    pub island_id: Option<u32>,
}

/// Stable sort by `key`. Equal keys keep their input order in both
/// directions.
pub fn sort_programs(programs: &mut [Program], key: SortKey, direction: SortDirection) {
    programs.sort_by(|a, b| {
        let ord = key.key(a).total_cmp(&key.key(b));
        match direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    });
}

/// Slice one page out of an already filtered and sorted list.
#[must_use]
pub fn paginate<T>(items: Vec<T>, pagination: Pagination) -> Page<T> {
    let total = items.len();
    let items = items
        .into_iter()
        .skip(pagination.offset())
        .take(pagination.page_size)
        .collect();
    Page { items, total }
}
