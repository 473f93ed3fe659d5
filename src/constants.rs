//! Global constants for the restupload engine.
//!
//! This module centralizes all hardcoded values to improve maintainability
//! and make configuration changes easier.

// Size helpers
/// One mebibyte
pub const MIB: u64 = 1024 * 1024;

/// One gibibyte
pub const GIB: u64 = 1024 * MIB;

// Strategy selection
/// Known lengths above this use cloud multipart when the descriptor allows it (64MB)
pub const MULTIPART_THRESHOLD: u64 = 64 * MIB;

/// Largest body a single-shot PUT may carry (5GB)
pub const SINGLE_PUT_MAX_SIZE: u64 = 5 * GIB;

// Part sizing
/// Default number of parts uploaded concurrently
pub const DEFAULT_PARALLEL_UPLOADS: usize = 3;

/// Default maximum size of one cloud part (1GB)
pub const DEFAULT_MAX_PART_SIZE: u64 = GIB;

/// Cloud part size grows by this much per part number (64MB)
pub const DEFAULT_MULTIPART_STEP: u64 = 64 * MIB;

/// Provider minimum for every non-final cloud part (5MB)
pub const S3_MIN_PART_SIZE: u64 = 5 * MIB;

/// Buffer used when copying the source into a spool (64KB)
pub const SPOOL_COPY_BUFFER_SIZE: usize = 64 * 1024;

// Stall detection
/// Window after which a read with too little progress counts as stalled
pub const DEFAULT_STALL_TIMEOUT_SECS: u64 = 30;

/// Minimum bytes per window before a read counts as stalled (150KB)
pub const DEFAULT_STALL_THRESHOLD: u64 = 150 * 1024;

// Timeout and retry constants
/// Maximum attempts for one part, first try included
pub const MAX_UPLOAD_ATTEMPTS: u32 = 5;

/// Base retry delay in milliseconds
pub const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Maximum retry delay in seconds
pub const RETRY_MAX_DELAY_SECS: u64 = 30;

/// Overall timeout for origin service calls in seconds
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 300;

/// Timeout for establishing a storage connection in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

// Cloud storage protocol
/// sha256 of the empty string, used as payload hash for bodiless requests
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Signature algorithm line of the canonical signing string
pub const SIGNING_ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Timestamp format used by cloud storage requests
pub const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

// Origin service
/// Default scheme for the origin REST API
pub const DEFAULT_API_SCHEME: &str = "https";

/// Default host of the origin REST API
pub const DEFAULT_API_HOST: &str = "www.atonline.com";

/// Path prefix of every REST endpoint
pub const REST_PATH_PREFIX: &str = "/_special/rest/";

/// Content type used when the caller gives none
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

// Environment variables
pub const ENV_PARALLEL_UPLOADS: &str = "RESTUPLOAD_PARALLEL_UPLOADS";
pub const ENV_MAX_PART_SIZE_MB: &str = "RESTUPLOAD_MAX_PART_SIZE_MB";
pub const ENV_STALL_TIMEOUT_SECS: &str = "RESTUPLOAD_STALL_TIMEOUT_SECS";
pub const ENV_MAX_ATTEMPTS: &str = "RESTUPLOAD_MAX_ATTEMPTS";
pub const ENV_API_HOST: &str = "RESTUPLOAD_API_HOST";
pub const ENV_TOKEN: &str = "RESTUPLOAD_TOKEN";
