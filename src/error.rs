use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum MemoryError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid salience pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub(crate) enum SearchError {
    #[error("search provider is rate limiting (status {status})")]
    RateLimited { status: u16 },

    #[error("search transport failed: {0}")]
    Transport(String),

    #[error("search provider returned {code}")]
    Status { code: u16 },

    #[error("could not parse search results: {0}")]
    Parse(String),

    #[error("no results")]
    Empty,
}

impl SearchError {
    /// Rate-limit signals earn a backoff retry; everything else moves on to the next backend.
    pub(crate) fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

#[derive(Debug, Error)]
pub(crate) enum InferenceError {
    #[error("inference request timed out")]
    Timeout,

    #[error("inference transport failed: {0}")]
    Transport(String),

    #[error("inference service returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("could not decode inference response: {0}")]
    Decode(String),
}

impl InferenceError {
    pub(crate) fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {name}")]
    Invalid { name: String },
}

/// Faults raised inside a trigger handler; the dispatcher turns them into an apology.
#[derive(Debug, Error)]
pub(crate) enum CommandError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
