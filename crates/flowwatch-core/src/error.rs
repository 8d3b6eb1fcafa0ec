use thiserror::Error;

/// Application-wide error types.
///
/// This enum represents all possible errors that can occur in Flowwatch.
/// It uses the `thiserror` crate for ergonomic error handling and automatic conversion
/// from underlying library errors.
///
/// # Error Conversion
///
/// Most errors automatically convert from their source types using the `#[from]` attribute:
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `serde_json::Error` → `AppError::SerializationError`
/// - `std::io::Error` → `AppError::IoError`
/// - `regex::Error` → `AppError::InvalidPattern`
///
/// # Examples
///
/// ```no_run
/// use flowwatch_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     // Errors automatically convert
///     Err(AppError::Generic("Something went wrong".to_string()))
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// Wraps errors from the PostgreSQL watermark store, including
    /// connection failures and transaction errors.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// HTTP client request failed.
    ///
    /// This error occurs when HTTP requests fail due to network issues,
    /// unexpected status codes, or unreadable bodies.
    #[error("API Client error: {0}")]
    ClientError(String),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Reading or writing a local state or config file failed.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The name exclusion pattern is not a valid regular expression.
    #[error("Invalid exclusion pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// A configuration value is missing or out of its allowed range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// URL parsing failed.
    ///
    /// This error occurs when the instance base URL or a webhook URL
    /// cannot be parsed or is not http(s).
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Workflow not found on the remote instance.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// The listing response had neither an array nor a known wrapper field.
    #[error("Unexpected response shape: {0}")]
    UnexpectedResponse(String),

    /// The remote instance rejected the configured credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Network or connection error.
    ///
    /// This error occurs when a network request fails due to connectivity issues,
    /// DNS resolution failures, or the remote server being unreachable.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timeout.
    ///
    /// This error occurs when a request takes longer than the configured timeout.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimitExceeded,

    /// The emission sink refused or failed to accept a batch.
    #[error("Emission failed: {0}")]
    EmissionError(String),

    /// Generic application error for cases not covered by specific variants.
    ///
    /// Use this sparingly - prefer creating specific error variants
    /// for better error handling and debugging.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("connection") {
                    "Cannot connect to database. Is PostgreSQL running?\n   Or drop --database-url to use the local state file.".to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::ClientError(msg) => {
                if msg.contains("connect") {
                    format!(
                        "Cannot connect to instance: {}\n   Check your network connection and the base URL.",
                        msg
                    )
                } else {
                    format!("API error: {}", msg)
                }
            }
            AppError::Unauthorized(_) => {
                "The instance rejected the credentials.\n   Check your N8N_API_KEY (or basic/bearer credentials).".to_string()
            }
            AppError::InvalidUrl(url) => {
                format!(
                    "Invalid URL: {}\n   Example: https://n8n.example.com",
                    url
                )
            }
            AppError::InvalidPattern(e) => {
                format!("Invalid exclusion pattern: {}\n   The pattern must be a valid regular expression.", e)
            }
            AppError::NetworkError(msg) => {
                format!("Network error: {}\n   Check your internet connection.", msg)
            }
            AppError::Timeout(ms) => {
                format!(
                    "Request timed out after {} ms.\n   Raise --request-timeout-ms or check the instance load.",
                    ms
                )
            }
            AppError::RateLimitExceeded => {
                "Too many requests. Consider a longer --interval.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is transient, i.e. the next cycle may succeed.
    ///
    /// # Examples
    ///
    /// ```
    /// use flowwatch_core::error::AppError;
    ///
    /// // Network errors are retryable
    /// let err = AppError::NetworkError("connection reset".to_string());
    /// assert!(err.is_retryable());
    ///
    /// // Rate limits are retryable (after a delay)
    /// let err = AppError::RateLimitExceeded;
    /// assert!(err.is_retryable());
    ///
    /// // Bad credentials are NOT retryable
    /// let err = AppError::Unauthorized("401".to_string());
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::NetworkError(_)
                | AppError::Timeout(_)
                | AppError::RateLimitExceeded
                | AppError::ClientError(_)
                | AppError::EmissionError(_)
        )
    }
}
