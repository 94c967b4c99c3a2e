use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("invalid url \"{0}\"")]
    InvalidUrl(String),
}

impl FetchError {
    pub fn from_reqwest(url: &str, source: reqwest::Error) -> FetchError {
        if source.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                source,
            }
        }
    }
}

/// Everything that can go wrong while one hoster tries to produce a file url.
/// None of these are fatal, the resolver moves on to the next hoster.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{host}: could not find {what}")]
    NotFound { host: &'static str, what: String },
    #[error("{host}: {reason}")]
    Malformed { host: &'static str, reason: String },
}

impl ExtractError {
    pub fn not_found(host: &'static str, what: impl Into<String>) -> ExtractError {
        ExtractError::NotFound {
            host,
            what: what.into(),
        }
    }

    pub fn malformed(host: &'static str, reason: impl Into<String>) -> ExtractError {
        ExtractError::Malformed {
            host,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("season heading \"{0}\" carries no season number")]
    MalformedSeason(String),
    #[error("episode name \"{0}\" carries no episode number")]
    MalformedEpisode(String),
}
