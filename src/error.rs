use thiserror::Error;

/// Type alias for Result with ExporterError
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Error types for the exporter
#[derive(Error, Debug)]
pub enum ExporterError {
    /// Gmail API returned an error
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// No usable token yet; the operator has to complete authorization
    #[error("Authorization required: {0}")]
    AuthRequired(String),

    /// OAuth client secret file is missing
    #[error("Client secret file does not exist: {path}")]
    ClientSecretMissing { path: String },

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404), e.g. a label deleted after startup
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// The API answered with a payload we could not make sense of
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Label discovery returned nothing to export
    #[error("No labels found to export")]
    NoLabels,

    /// Gauge registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic catch-all error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ExporterError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExporterError::RateLimitExceeded { .. }
                | ExporterError::ServerError { .. }
                | ExporterError::NetworkError(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Errors that must stop the process instead of being skipped per cycle
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExporterError::NoLabels
                | ExporterError::ClientSecretMissing { .. }
                | ExporterError::ConfigError(_)
        )
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// The header is either delay-seconds ("120") or an HTTP-date.
/// Missing, invalid or past values fall back to 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    if let Some(retry_after_value) = response.headers().get("retry-after") {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                let now = std::time::SystemTime::now();
                if let Ok(duration) = http_date.duration_since(now) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}

impl From<google_gmail1::Error> for ExporterError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    429 => {
                        let retry_after = parse_retry_after_header(response);
                        ExporterError::RateLimitExceeded { retry_after }
                    }
                    404 => ExporterError::NotFound("Resource not found".to_string()),
                    400 => ExporterError::BadRequest(message),
                    401 => ExporterError::AuthError(message),
                    403 => ExporterError::Forbidden(message),
                    500..=599 => ExporterError::ServerError {
                        status: status_code,
                        message,
                    },
                    _ => ExporterError::ApiError(message),
                }
            }
            google_gmail1::Error::BadRequest(ref err) => {
                ExporterError::BadRequest(format!("{}", err))
            }
            google_gmail1::Error::HttpError(ref err) => {
                ExporterError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => ExporterError::NetworkError(err.to_string()),
            // Undecodable JSON from the backend
            google_gmail1::Error::JsonDecodeError(body, err) => ExporterError::InvalidResponse(
                format!("{} (body: {} bytes)", err, body.len()),
            ),
            google_gmail1::Error::MissingToken(err) => {
                ExporterError::AuthRequired(err.to_string())
            }
            _ => ExporterError::ApiError(error.to_string()),
        }
    }
}
