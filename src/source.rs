//! Candidate lists: remote text files, one username per line.

use std::collections::HashSet;

use tracing::debug;
use ureq::Agent;
use url::Url;

use crate::check::canon_username;
use crate::error::{GatewayError, SourceError};

/// The only host lists are fetched from.
pub const TRUSTED_HOST: &str = "raw.githubusercontent.com";

/// Fetch a newline-delimited list from raw GitHub content.
///
/// # Errors
///
/// [`SourceError::InvalidUrl`] or [`SourceError::UntrustedHost`] before any
/// request is made, [`SourceError::Fetch`] on transport failure, and
/// [`SourceError::Empty`] when the file has no usernames.
pub fn fetch_candidates(agent: &Agent, url: &str) -> Result<Vec<String>, SourceError> {
    let parsed = Url::parse(url).map_err(|source| SourceError::InvalidUrl {
        url: url.to_owned(),
        source,
    })?;
    let host = parsed.host_str().unwrap_or_default();
    if host != TRUSTED_HOST {
        return Err(SourceError::UntrustedHost {
            host: host.to_owned(),
            expected: TRUSTED_HOST,
        });
    }

    debug!(%url, "loading username list");
    let mut response = agent
        .get(parsed.as_str())
        .call()
        .map_err(|e| GatewayError::from_ureq(url, e))?;
    let text = response
        .body_mut()
        .read_to_string()
        .map_err(|e| GatewayError::from_ureq(url, e))?;

    let candidates = parse_candidates(&text);
    if candidates.is_empty() {
        return Err(SourceError::Empty { url: url.to_owned() });
    }
    debug!(count = candidates.len(), "usernames loaded");
    Ok(candidates)
}

/// Split a list into trimmed, non-blank lines.
#[must_use]
pub fn parse_candidates(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Drop later spellings of a username already seen, ignoring case.
pub fn collapse_duplicates(candidates: &mut Vec<String>) {
    let mut seen = HashSet::new();
    candidates.retain(|name| seen.insert(canon_username(name)));
}
