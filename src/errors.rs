use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    /// Construction-time failure: the country code has no locale entry.
    #[error("invalid country code: {0}")]
    InvalidCountry(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL construction error: {0}")]
    Url(#[from] url::ParseError),

    /// The retry budget for a request ran out. Carries the last observed
    /// status code (0 when the failure never reached the HTTP layer).
    #[error("server replied with HTTP {status} while opening {url}")]
    RetriesExhausted { status: u16, url: String },

    /// Embedded payload could not be extracted or decrypted.
    #[error("payload error: {0}")]
    Payload(String),

    #[error("invalid date `{0}`, expected YYYY-MM-DD")]
    Date(String),

    #[error("provider response is missing `{0}`")]
    MissingData(&'static str),
}

pub type Result<T> = std::result::Result<T, EtlError>;
