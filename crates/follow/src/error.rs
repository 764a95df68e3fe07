use thiserror::Error;

#[derive(Error, Debug)]
pub enum FollowError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Redirected more than {0} times")]
    TooManyRedirects(usize),

    #[error("Invalid redirect target: {0:?}")]
    InvalidRedirect(Option<String>),

    #[error("Token or signature is missing in access token response")]
    MissingCredentials,

    #[error("Channel is offline")]
    ChannelOffline,

    #[error("No manifest url found in usher response")]
    ManifestNotFound,

    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: u64, expected: u64 },

    #[error("Invalid stream specification: {0}")]
    InvalidStreamSpec(String),

    #[error("Unknown proxy type: {0}")]
    UnknownProxyType(String),

    #[error("Invalid proxy: {0}")]
    InvalidProxy(String),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

pub type FollowResult<T> = Result<T, FollowError>;
