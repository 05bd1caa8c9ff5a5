/// Constants describing the upstream REST endpoint and its tables.
pub mod upstream {
    /// Environment variable holding the REST project URL.
    pub const ENV_URL: &str = "SUPABASE_URL";
    /// Environment variable holding the anonymous API key.
    pub const ENV_ANON_KEY: &str = "SUPABASE_ANON_KEY";
    /// Optional environment override for the page size.
    pub const ENV_PAGE_SIZE: &str = "FLOODMAP_PAGE_SIZE";
    /// Optional environment override for the option-cache TTL in seconds.
    pub const ENV_CACHE_TTL_SECS: &str = "FLOODMAP_CACHE_TTL_SECS";
    /// Path prefix of the auto-generated table API.
    pub const REST_PATH: &str = "rest/v1";
    /// Table holding historical flood events.
    pub const FLOODS_TABLE: &str = "floods";
    /// Table receiving community corrections.
    pub const SUBMISSIONS_TABLE: &str = "flood_submissions";
    /// Maximum rows returned by a single upstream response.
    pub const MAX_PAGE_SIZE: usize = 1000;
    /// Primary-key column used to keep offset pagination stable.
    pub const ID_COLUMN: &str = "id";
    /// Placeholder fragments that mark an unconfigured deployment.
    pub const PLACEHOLDER_MARKERS: [&str; 4] =
        ["YOUR_", "your-project", "<project", "example.supabase"];
}

/// Constants used by the REST transport.
pub mod transport {
    /// Default per-request timeout in seconds.
    pub const REQUEST_TIMEOUT_SECS: u64 = 10;
    /// Default number of retries after the first failed attempt.
    pub const MAX_RETRIES: u32 = 3;
    /// First backoff delay; doubles on every further retry.
    pub const BASE_BACKOFF_MS: u64 = 250;
    /// Maximum number of response-body characters kept in error messages.
    pub const ERROR_BODY_CHARS: usize = 300;
}

/// Constants used by filter option loading.
pub mod filters {
    /// Time-to-live for the unfiltered option snapshot.
    pub const OPTION_CACHE_TTL_SECS: i64 = 300;
    /// Default capacity of the filter worker intent channel.
    pub const INTENT_CHANNEL_CAPACITY: usize = 4;
    /// Events held for the presentation layer before new ones are discarded.
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;
}

/// Constants used by user-facing notices.
pub mod notices {
    /// Lifetime of an auto-expiring error notice.
    pub const ERROR_TTL_SECS: i64 = 8;
    /// Lifetime of an informational notice.
    pub const INFO_TTL_SECS: i64 = 4;
}

/// Constants used by the community submission workflow.
pub mod submissions {
    /// Submissions allowed per contributor per window.
    pub const MAX_PER_WINDOW: usize = 5;
    /// Rolling window length in seconds.
    pub const WINDOW_SECS: i64 = 3600;
    /// Earliest year accepted for a proposed flood.
    pub const MIN_YEAR: i32 = 1800;
    /// Maximum accepted length of free-form notes.
    pub const MAX_NOTES_CHARS: usize = 2000;
    /// Maximum accepted length of short text fields.
    pub const MAX_FIELD_CHARS: usize = 200;
}

/// Constants used by the bulk importer.
pub mod import {
    /// Rows per insert request.
    pub const BATCH_SIZE: usize = 100;
}
