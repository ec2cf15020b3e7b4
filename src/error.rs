use thiserror::Error;

/// Type alias for Result with GmailError
pub type Result<T> = std::result::Result<T, GmailError>;

/// Error types for filter reconciliation, label merging and bulk relabeling
#[derive(Error, Debug)]
pub enum GmailError {
    /// Remote call rejected with a non-success HTTP status
    #[error("HTTP {status}: {status_text}")]
    Http { status: u16, status_text: String },

    /// Gmail API returned an error that carries no HTTP status
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// A bounded fetch finished with at least one failed item
    #[error("Fetched {succeeded} of {total} items; {} failed", failed_ids.len())]
    PartialFetch {
        total: usize,
        succeeded: usize,
        failed_ids: Vec<String>,
    },

    /// Rule row names a label that does not exist
    #[error("No label named '{0}'")]
    LabelNotFound(String),

    /// More than one label carries the requested name
    #[error("Label name '{name}' is ambiguous, matching ids: {}", ids.join(", "))]
    AmbiguousLabel { name: String, ids: Vec<String> },

    /// Listing cursor revisited an earlier token or never terminated
    #[error("Pagination stalled on token '{token}' after {pages} pages")]
    PaginationStall { token: String, pages: usize },

    /// Merge target was deleted but the source label was not renamed
    #[error(
        "Merge {merge_id} stranded: target {target_id} deleted, source {source_id} not renamed to '{final_name}'"
    )]
    MergeStranded {
        merge_id: String,
        source_id: String,
        target_id: String,
        final_name: String,
        #[source]
        cause: Box<GmailError>,
    },

    /// Label-related errors
    #[error("Label error: {0}")]
    LabelError(String),

    /// Filter-related errors
    #[error("Filter error: {0}")]
    FilterError(String),

    /// Malformed row in the rule file
    #[error("Rule file line {line}: {message}")]
    RuleFile { line: usize, message: String },

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl GmailError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            GmailError::RateLimitExceeded { .. } | GmailError::NetworkError(_) => true,
            GmailError::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }

    /// Any failure of a remote call
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            GmailError::Http { .. }
                | GmailError::ApiError(_)
                | GmailError::RateLimitExceeded { .. }
                | GmailError::NetworkError(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GmailError::Http { status: 404, .. })
    }
}

/// Wait used when a 429 names no usable Retry-After
const DEFAULT_RETRY_AFTER: u64 = 5;

/// Seconds to wait according to a 429 response's Retry-After header.
///
/// Accepts both delay-seconds and HTTP-date forms; anything missing,
/// unparsable or already in the past falls back to 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {

    let Some(value) = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
    else {
        return DEFAULT_RETRY_AFTER;
    };

    if let Ok(seconds) = value.trim().parse::<u64>() {
        return seconds;
    }

    httpdate::parse_http_date(value)
        .ok()
        .and_then(|at| at.duration_since(std::time::SystemTime::now()).ok())
        .map(|wait| wait.as_secs())
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// Map a Gmail JSON error body (`{"error": {"code", "status", "message"}}`)
/// to the status it carries. Bodies without a code stay `ApiError`.
fn from_error_body(body: &serde_json::Value) -> GmailError {
    let error = &body["error"];
    let Some(code) = error["code"].as_u64().and_then(|c| u16::try_from(c).ok()) else {
        return GmailError::ApiError(format!("Bad request: {}", body));
    };

    if code == 429 {
        return GmailError::RateLimitExceeded {
            retry_after: DEFAULT_RETRY_AFTER,
        };
    }

    let status_text = hyper::StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_string)
        .or_else(|| error["status"].as_str().map(str::to_string))
        .or_else(|| error["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| "Unknown".to_string());

    GmailError::Http {
        status: code,
        status_text,
    }
}

impl From<google_gmail1::Error> for GmailError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                if status.as_u16() == 429 {
                    return GmailError::RateLimitExceeded {
                        retry_after: parse_retry_after_header(response),
                    };
                }
                GmailError::Http {
                    status: status.as_u16(),
                    status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
                }
            }
            google_gmail1::Error::BadRequest(ref body) => from_error_body(body),
            google_gmail1::Error::HttpError(ref err) => {
                GmailError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => GmailError::NetworkError(err.to_string()),
            _ => GmailError::ApiError(error.to_string()),
        }
    }
}
