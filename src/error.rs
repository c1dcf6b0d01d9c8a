//! Error types shared by the gateways, the resolver, and the username source.

use thiserror::Error;

/// A failure talking to Fragment or to the Telegram web front end.
///
/// [`is_transient`](GatewayError::is_transient) tells the resolver which of
/// these are worth retrying inside the auction query loop.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// Connection, TLS, or protocol failure.
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },
    /// The request exceeded the configured timeout.
    #[error("request to {url} timed out")]
    Timeout { url: String },
    /// The server answered with a non-success status code.
    #[error("request to {url} returned HTTP {code}")]
    Status { url: String, code: u16 },
    /// The body could not be decoded as JSON.
    #[error("response from {url} is not valid JSON: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    /// The auction reply decoded, but not to a JSON object (usually throttling).
    #[error("auction reply is not a JSON object")]
    NotAnObject,
    /// The auction reply is an object without a usable `html` fragment.
    #[error("auction reply carries no html payload")]
    MissingHtml,
    /// The auction fragment did not contain the tag, price, and status cells.
    #[error("auction reply has {found} value cells, expected 3")]
    TooFewCells { found: usize },
    /// No `ajInit` payload with an `apiUrl` was found on the landing page.
    #[error("api url not found on {url}")]
    EndpointNotFound { url: String },
    /// A URL could not be built or resolved.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl GatewayError {
    /// Build a [`GatewayError`] from a ureq failure, splitting out the cases
    /// the resolver treats differently.
    pub(crate) fn from_ureq(url: &str, err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::Status {
                url: url.to_owned(),
                code,
            },
            ureq::Error::Timeout(_) => Self::Timeout {
                url: url.to_owned(),
            },
            other => Self::Http {
                url: url.to_owned(),
                source: Box::new(other),
            },
        }
    }

    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::NotAnObject | Self::MissingHtml => true,
            Self::Status { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    /// Whether the remote side told us to slow down.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status { code: 429, .. })
    }
}

/// Why a resolution did not produce an outcome.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResolveError {
    /// The batch was cancelled while this check was in flight.
    #[error("check cancelled")]
    Cancelled,
    /// A gateway call failed outside the retrying auction loop.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl From<crate::cancel::Cancelled> for ResolveError {
    fn from(_: crate::cancel::Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Errors loading the candidate username list.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SourceError {
    /// The list URL could not be parsed.
    #[error("invalid list url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    /// Only raw GitHub content is accepted as a list source.
    #[error("list url must be on {expected}, got `{host}`")]
    UntrustedHost { host: String, expected: &'static str },
    /// Fetching the list failed.
    #[error(transparent)]
    Fetch(#[from] GatewayError),
    /// The list is empty or only whitespace.
    #[error("username list at {url} is empty")]
    Empty { url: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://fragment.test/api";

    fn status(code: u16) -> GatewayError {
        GatewayError::Status {
            url: URL.into(),
            code,
        }
    }

    #[test]
    fn transient_classification() {
        let cases = [
            (status(429), true),
            (status(500), true),
            (status(503), true),
            (status(404), false),
            (GatewayError::from_ureq(URL, ureq::Error::HostNotFound), false),
            (GatewayError::Timeout { url: URL.into() }, true),
            (GatewayError::NotAnObject, true),
            (GatewayError::MissingHtml, true),
            (GatewayError::TooFewCells { found: 1 }, false),
            (GatewayError::EndpointNotFound { url: URL.into() }, false),
        ];
        for (err, transient) in cases {
            assert_eq!(err.is_transient(), transient, "{err}");
        }
    }

    #[test]
    fn only_429_is_rate_limited() {
        assert!(status(429).is_rate_limited());
        assert!(!status(503).is_rate_limited());
        assert!(!GatewayError::Timeout { url: URL.into() }.is_rate_limited());
    }

    #[test]
    fn ureq_status_and_timeout_are_split_out() {
        assert!(matches!(
            GatewayError::from_ureq(URL, ureq::Error::StatusCode(429)),
            GatewayError::Status { code: 429, .. }
        ));
        assert!(matches!(
            GatewayError::from_ureq(URL, ureq::Error::HostNotFound),
            GatewayError::Http { .. }
        ));
    }
}
