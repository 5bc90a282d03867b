//! Global constants for the artifact layout, remote feed defaults, and polling cadence
use std::time::Duration;

/// Binary name used in user agents and banners
pub const BINARY_NAME: &str = "delegation-indexer";

/// Package version from Cargo.toml (set at compile time)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the user agent string for HTTP requests
pub fn user_agent() -> String {
    format!("{}/{}", BINARY_NAME, VERSION)
}

// ============================================================================
// Artifact Layout
// ============================================================================
//
// {"lastTimestamp":"1970-01-01T00:00:00Z","data":[ ... ]}
// ^0                ^18                 ^38       ^48

/// Cursor value of an empty log
pub const ZERO_TIMESTAMP: &str = "1970-01-01T00:00:00Z";

/// Fixed width of the cursor field (ISO-8601 UTC, second precision)
pub const TIMESTAMP_LEN: usize = 20;

/// Bytes preceding the cursor field
pub const HEADER_PREFIX: &str = "{\"lastTimestamp\":\"";

/// Byte offset of the cursor field
pub const TIMESTAMP_OFFSET: usize = HEADER_PREFIX.len();

/// Bytes between the cursor field and the first record
pub const BODY_OPENING: &str = "\",\"data\":[";

/// Byte offset right after the array's opening bracket, where new batches are spliced
pub const BODY_SEAM_OFFSET: usize = TIMESTAMP_OFFSET + TIMESTAMP_LEN + BODY_OPENING.len();

/// Bytes closing the document
pub const ARTIFACT_CLOSING: &str = "]}";

/// Content of a freshly initialized artifact
pub const EMPTY_ARTIFACT: &str = "{\"lastTimestamp\":\"1970-01-01T00:00:00Z\",\"data\":[]}";

/// Suffix of the scratch file used for atomic replacement
pub const TEMP_SUFFIX: &str = "tmp";

/// Default artifact path (relative to the working directory)
pub const DEFAULT_DB_PATH: &str = "db";

// ============================================================================
// Ingestion Constants
// ============================================================================

/// Page size used while catching up on history
pub const BACKFILL_PAGE_SIZE: usize = 3000;

/// Largest page the TzKT API accepts
pub const MAX_PAGE_SIZE: usize = 10_000;

/// Default number of delegations fetched per tail poll
pub const DEFAULT_POLL_MAX_SIZE: usize = 100;

/// Default tail poll period in seconds
pub const DEFAULT_POLL_RATE_SECS: u64 = 10;

/// Returns the default tail poll period
pub fn default_poll_interval() -> Duration {
    Duration::from_secs(DEFAULT_POLL_RATE_SECS)
}

// ============================================================================
// Network Constants
// ============================================================================

/// Default TzKT API base URL
pub const DEFAULT_TZKT_URL: &str = "https://api.tzkt.io";

/// Path of the delegation operations endpoint
pub const DELEGATIONS_ENDPOINT: &str = "/v1/operations/delegations";

/// Default HTTP request timeout
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Requests per minute allowed towards the remote feed
pub const DEFAULT_RATE_LIMIT: usize = 60;

/// Attempts per remote fetch before giving up
pub const FETCH_MAX_RETRIES: usize = 3;

/// Upper bound on honoring a Retry-After header
pub const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Default HTTP listen host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default HTTP listen port
pub const DEFAULT_PORT: u16 = 8080;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
