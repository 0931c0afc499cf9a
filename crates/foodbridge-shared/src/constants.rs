/// Application name
pub const APP_NAME: &str = "FoodBridge";

/// Number of decimal digits in a delivery verification code
pub const DELIVERY_CODE_LEN: usize = 4;

/// Exclusive upper bound of the numeric delivery code space (0000..=9999)
pub const DELIVERY_CODE_SPACE: u32 = 10_000;

/// Freshness window applied when the predictor supplied none (6 hours)
pub const DEFAULT_FRESHNESS_MINUTES: i64 = 6 * 60;

/// Longest freshness window a listing may carry (7 days)
pub const MAX_FRESHNESS_MINUTES: i64 = 7 * 24 * 60;

/// Maximum number of listings returned by the "available" feed
pub const AVAILABLE_LISTING_LIMIT: u32 = 50;

/// Maximum chat message length in characters
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Request header carrying the caller's identity, set by the auth proxy
pub const USER_ID_HEADER: &str = "x-user-id";
