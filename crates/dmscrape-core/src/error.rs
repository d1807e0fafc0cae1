//! Error taxonomy for scraping.
//!
//! Kinds map onto how the failure is handled: transient host errors are
//! retried inside the session, per-target data errors skip one target, and
//! the scavenger charges each kind its own damage against the shared health
//! pool.

use thiserror::Error;

/// Damage charged for an error the taxonomy does not know about
/// (panics, exporter failures, invalid targets slipping through).
pub const UNEXPECTED_DAMAGE: f64 = 119.9;

/// Any failure the scraping core can produce.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// All attempts to open a connection to the host timed out.
    #[error("failed to open connection to the host: {0}")]
    ConnectTimeout(String),

    /// Nothing was read from the host before the read timeout.
    #[error("read nothing from the host before timeout")]
    ReadTimeout,

    /// The connection was reset or closed mid-exchange.
    #[error("connection to the host was broken: {0}")]
    ConnectionBroken(String),

    /// The host accepted the request but sent back zero bytes. Happens
    /// frequently when the host silently drops kept-alive connections.
    #[error("no response from the host")]
    NoResponseRead,

    /// The response could not be parsed as HTTP (bad status line, bad
    /// framing, broken chunk lengths) or carried a non-2xx status.
    #[error("response from the host was invalid: {0}")]
    InvalidResponse(String),

    /// Retries exhausted with more than one distinct kind of host error.
    #[error("{} distinct error(s) occurred: {}", .0.len(), format_multiple(.0))]
    Multiple(Vec<ScrapeError>),

    /// The response body could not be inflated or was not UTF-8.
    #[error("failed to decode the data from the response")]
    Decode,

    /// The decoded text could not be parsed as XML or JSON.
    #[error("failed to parse the data: {0}")]
    Parse(String),

    /// The host answered with its "error" sentinel or an empty document.
    #[error("the response contains no data")]
    Content,

    /// The URI ended in a 404 page: the canonical "no such pool" signal.
    #[error("404 page")]
    PageNotFound,

    /// A claimed target failed validation.
    #[error("invalid target id: {0}")]
    InvalidTarget(u64),

    /// All targets have been distributed. Terminates worker loops; never
    /// reaches the scavenger.
    #[error("no more items")]
    NoMoreItems,

    /// Anything outside the taxonomy, charged near-lethal damage.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

fn format_multiple(errors: &[ScrapeError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ScrapeError {
    /// Health damage charged by the scavenger for this kind.
    pub fn damage(&self) -> f64 {
        match self {
            ScrapeError::ConnectTimeout(_)
            | ScrapeError::ReadTimeout
            | ScrapeError::ConnectionBroken(_)
            | ScrapeError::InvalidResponse(_) => 40.0,
            ScrapeError::NoResponseRead => 10.0,
            ScrapeError::Decode | ScrapeError::Parse(_) => 30.0,
            ScrapeError::Content => 5.0,
            ScrapeError::PageNotFound | ScrapeError::NoMoreItems => 0.0,
            ScrapeError::Multiple(errors) => errors
                .iter()
                .map(ScrapeError::damage)
                .fold(0.0, f64::max),
            ScrapeError::InvalidTarget(_) | ScrapeError::Unexpected(_) => UNEXPECTED_DAMAGE,
        }
    }

    /// Stable kind name, used to tell whether repeated failures were all of
    /// the same kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::ConnectTimeout(_) => "connect-timeout",
            ScrapeError::ReadTimeout => "read-timeout",
            ScrapeError::ConnectionBroken(_) => "connection-broken",
            ScrapeError::NoResponseRead => "no-response",
            ScrapeError::InvalidResponse(_) => "invalid-response",
            ScrapeError::Multiple(_) => "multiple",
            ScrapeError::Decode => "decode",
            ScrapeError::Parse(_) => "parse",
            ScrapeError::Content => "content",
            ScrapeError::PageNotFound => "page-not-found",
            ScrapeError::InvalidTarget(_) => "invalid-target",
            ScrapeError::NoMoreItems => "no-more-items",
            ScrapeError::Unexpected(_) => "unexpected",
        }
    }

    /// Whether the session should retry this error with a reconnect.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScrapeError::ConnectTimeout(_)
                | ScrapeError::ReadTimeout
                | ScrapeError::ConnectionBroken(_)
                | ScrapeError::NoResponseRead
                | ScrapeError::InvalidResponse(_)
        )
    }

    /// Log level the scavenger uses when recording this error.
    pub fn is_noteworthy(&self) -> bool {
        matches!(
            self,
            ScrapeError::ConnectTimeout(_) | ScrapeError::Decode
        )
    }

    /// Collapse the errors gathered over one retried request: a single
    /// consistent kind is re-raised as itself, mixed kinds become
    /// [`ScrapeError::Multiple`].
    pub fn collapse(mut errors: Vec<ScrapeError>) -> ScrapeError {
        debug_assert!(!errors.is_empty());
        let first_kind = errors[0].kind();
        if errors.iter().all(|e| e.kind() == first_kind) {
            errors.pop().expect("at least one error")
        } else {
            ScrapeError::Multiple(errors)
        }
    }
}
