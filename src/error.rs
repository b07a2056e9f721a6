use thiserror::Error;

pub type RippandaResult<T> = std::result::Result<T, RippandaError>;

#[derive(Debug, Error)]
pub enum RippandaError {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("network error: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("malformed json: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("invalid url: {source}")]
    Url {
        #[from]
        source: url::ParseError,
    },

    #[error("invalid cookie string: {0}")]
    InvalidCookies(String),

    #[error("required cookie 'ipb_member_id' is missing")]
    MissingMemberId,

    #[error("could not satisfy filename length constraints for {0:?}")]
    FilenameTooLong(String),

    #[error("server returned HTTP {status} for {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("{context}: expected element {selector:?} not found")]
    VerificationFailed { context: String, selector: String },

    #[error("invalid update interval: {0}")]
    InvalidInterval(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("gallery {id} failed after {attempts} attempt(s): {message}")]
    GalleryFailed {
        id: u64,
        attempts: u32,
        message: String,
    },

    #[error("aborting: {0} consecutive gallery failures")]
    TooManyConsecutiveFailures(u32),

    #[error("zip preparation page did not resolve after {0} attempt(s)")]
    ZipPreparationExhausted(u32),

    #[error("interrupted")]
    Interrupted,

    #[error("{0}")]
    Generic(String),
}
