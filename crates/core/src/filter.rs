//! Listing filters, sorting, and pagination.

use serde::{Deserialize, Serialize};

use crate::limits::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Liveness filter for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Only sessions whose expiry is in the future
    Active,
    /// Only sessions whose expiry has passed
    Expired,
}

/// Sortable session attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Sort by creation time
    #[default]
    CreatedAt,
    /// Sort by last activity time
    LastActive,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest first
    Asc,
    /// Newest first
    #[default]
    Desc,
}

/// Pagination window, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Page number, first page is 1
    pub number: usize,
    /// Items per page, clamped to 1..=100
    pub size: usize,
}

impl Default for Page {
    fn default() -> Self {
        Page { number: 1, size: DEFAULT_PAGE_SIZE }
    }
}

impl Page {
    /// Clamp out-of-range values into the supported window.
    pub fn normalized(self) -> Page {
        Page {
            number: self.number.max(1),
            size: self.size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Index of the first item on this page.
    pub fn offset(self) -> usize {
        let page = self.normalized();
        (page.number - 1).saturating_mul(page.size)
    }
}

/// Listing filter. Empty filter matches every live session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionFilter {
    /// Restrict to a single user (served from the user index)
    pub user_id: Option<String>,
    /// Restrict to a single device
    pub device_id: Option<String>,
    /// Restrict to sessions created by this principal
    pub created_by: Option<String>,
    /// Restrict to sessions created from this IP
    pub ip_address: Option<String>,
    /// Liveness filter; `None` means active only by default reads
    pub status: Option<SessionStatus>,
    /// Only sessions created strictly after this time (ms since epoch)
    pub created_after: Option<i64>,
    /// Only sessions created strictly before this time (ms since epoch)
    pub created_before: Option<i64>,
    /// Only sessions active at or after this time (ms since epoch)
    pub active_after: Option<i64>,
    /// Sort attribute
    pub sort_by: SortKey,
    /// Sort direction
    pub order: SortOrder,
    /// Pagination window
    pub page: Page,
}

impl SessionFilter {
    /// Filter scoped to one user.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        SessionFilter { user_id: Some(user_id.into()), ..Default::default() }
    }
}

/// One page of listing results plus the total match count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPage<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Total matches across all pages
    pub total: usize,
    /// Page number served
    pub page: usize,
    /// Page size served
    pub page_size: usize,
}
