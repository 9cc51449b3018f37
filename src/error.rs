use thiserror::Error;

/// Fatal errors. Any of these aborts the run with a non-zero exit status.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Per-symbol quote failure. Recorded in the run's error text; the symbol is skipped.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{symbol}: request failed: {source}")]
    Http {
        symbol: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{symbol}: provider returned HTTP {status}")]
    Status { symbol: String, status: u16 },

    #[error("{0}: no quote returned")]
    NotFound(String),

    #[error("{symbol}: malformed quote: {reason}")]
    Malformed { symbol: String, reason: String },
}

/// Notification failure. The alert stays persisted with `email_sent = false`.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification credentials not configured")]
    NotConfigured,

    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification rejected with HTTP {0}")]
    Rejected(u16),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("could not build mail message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("could not render alert email: {0}")]
    Render(#[from] askama::Error),
}

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("trading calendar unavailable: {0}")]
    Unavailable(String),
}
