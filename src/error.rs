//! Error types for the scan client and session controller.

use thiserror::Error;

use crate::types::SessionId;

/// Failure talking to the remote scanning service.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("malformed response from {endpoint}: {reason}")]
    Malformed { endpoint: String, reason: String },

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// The start request was rejected or never reached the service.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("start scan failed: {0}")]
    Api(#[from] ApiError),

    #[error("service returned an empty scan id")]
    EmptySessionId,

    #[error("submit superseded by a reset or a newer submit")]
    Superseded,
}

/// A poll tick failed; the previous summary and findings stay in place.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("summary fetch for {session} failed: {source}")]
    Summary {
        session: SessionId,
        #[source]
        source: ApiError,
    },

    #[error("findings fetch for {session} failed: {source}")]
    Findings {
        session: SessionId,
        #[source]
        source: ApiError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid API base URL {url:?}: {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("API base URL must use http or https, got {0:?}")]
    Scheme(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;
