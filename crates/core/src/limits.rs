//! Input bounds enforced at the service boundary.

/// Maximum length of a user ID in bytes.
pub const MAX_USER_ID_LEN: usize = 128;

/// Maximum length of a device ID in bytes.
pub const MAX_DEVICE_ID_LEN: usize = 128;

/// Maximum length of IP address and user-agent strings in bytes.
pub const MAX_METADATA_LEN: usize = 512;

/// Maximum number of entries in a session's data map.
pub const MAX_DATA_ENTRIES: usize = 32;

/// Maximum length of a data map key in bytes.
pub const MAX_DATA_KEY_LEN: usize = 64;

/// Maximum length of a data map value in bytes.
pub const MAX_DATA_VALUE_LEN: usize = 1024;

/// Minimum session TTL in seconds.
pub const MIN_TTL_SECS: i64 = 60;

/// Maximum session TTL in seconds (30 days).
pub const MAX_TTL_SECS: i64 = 30 * 24 * 3600;

/// TTL applied when the caller does not supply one (24 hours).
pub const DEFAULT_TTL_SECS: i64 = 24 * 3600;

/// Maximum page size for session listings.
pub const MAX_PAGE_SIZE: usize = 100;

/// Page size applied when the caller does not supply one.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// How many times a mutating service call retries an optimistic version
/// conflict before surfacing it.
pub const VERSION_RETRY_LIMIT: usize = 3;
