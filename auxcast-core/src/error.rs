use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Broadcast not found")]
    BroadcastNotFound,

    #[error("Message not found")]
    MessageNotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Curator already has a live broadcast")]
    AlreadyLive,

    #[error("No current track known for curator")]
    NoActiveTrack,

    #[error("Broadcast is not live")]
    NotLive,

    #[error("Broadcast is not live")]
    BroadcastNotLive,

    #[error("Only the broadcast owner may do this")]
    NotOwner,

    #[error("Only the message author may do this")]
    NotAuthor,

    #[error("Rate limit exceeded. Try again in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for the error class
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::BroadcastNotFound => "broadcast_not_found",
            Self::MessageNotFound => "message_not_found",
            Self::Conflict(_) => "conflict",
            Self::AlreadyLive => "already_live",
            Self::NoActiveTrack => "no_active_track",
            Self::NotLive => "not_live",
            Self::BroadcastNotLive => "broadcast_not_live",
            Self::NotOwner => "not_owner",
            Self::NotAuthor => "not_author",
            Self::RateLimited { .. } => "rate_limited",
            Self::Database(_) => "database",
            Self::Cache(_) => "cache",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }

    /// Domain failures are terminal; infrastructure failures and rate
    /// limits may succeed on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Database(_)
                | Self::Cache(_)
                | Self::Internal(_)
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            // Postgres constraint violations carry domain meaning
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                match code.as_ref() {
                    // unique_violation; the partial index on live broadcasts
                    // is the one-live-per-curator guard
                    "23505" => {
                        if db_err.message().contains("live_curator") {
                            Self::AlreadyLive
                        } else {
                            Self::Conflict("duplicate row".to_string())
                        }
                    }
                    // foreign_key_violation
                    "23503" => Self::NotFound("referenced row missing".to_string()),
                    // check_violation
                    "23514" => Self::Validation("value rejected by check constraint".to_string()),
                    // not_null_violation
                    "23502" => Self::Validation("required column missing".to_string()),
                    _ => Self::Database(err),
                }
            }
            _ => Self::Database(err),
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Self::Cache(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
