use std::fmt;

use thiserror::Error;

pub type IngestResult<T> = Result<T, IngestError>;
pub type StoreResult<T> = Result<T, StoreError>;

/// What a lookup expected to find but did not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    Match(String),
    MatchEvents(String),
    Player(String),
    Season(String),
    Playlist(String),
    MapVariant(String),
    Leaderboard { season: String, playlist: String },
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Missing::Match(id) => write!(f, "match {id}"),
            Missing::MatchEvents(id) => write!(f, "events for match {id}"),
            Missing::Player(tag) => write!(f, "player {tag}"),
            Missing::Season(id) => write!(f, "season {id}"),
            Missing::Playlist(id) => write!(f, "playlist {id}"),
            Missing::MapVariant(id) => write!(f, "map variant {id}"),
            Missing::Leaderboard { season, playlist } => {
                write!(f, "leaderboard for season {season} playlist {playlist}")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("upstream unavailable for {url}: {reason}")]
    UpstreamUnavailable { url: String, reason: String },
    #[error("{0} not found")]
    NotFound(Missing),
    #[error("match {0} does not have a complete set of events yet; retry later")]
    IncompleteEventSet(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn upstream(url: &str, reason: impl fmt::Display) -> Self {
        IngestError::UpstreamUnavailable {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Errors the caller may retry later without changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::UpstreamUnavailable { .. } | IngestError::IncompleteEventSet(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("uniqueness conflict on {0}")]
    Conflict(String),
    #[error("missing reference: {0}")]
    MissingReference(String),
    #[error("stored value could not be decoded: {0}")]
    Decode(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_events_are_retryable_but_not_found_is_not() {
        assert!(IngestError::IncompleteEventSet("abc".into()).is_retryable());
        assert!(IngestError::upstream("http://x", "timeout").is_retryable());
        assert!(!IngestError::NotFound(Missing::Match("abc".into())).is_retryable());
    }

    #[test]
    fn messages_name_the_missing_entity() {
        let err = IngestError::NotFound(Missing::Season("s-1".into()));
        assert_eq!(err.to_string(), "season s-1 not found");
    }
}
