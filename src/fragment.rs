//! Queries against Fragment's undocumented web API.
//!
//! Fragment has no public API. Its landing page boots a script with
//! `ajInit({...})`, whose `apiUrl` is a session-bound endpoint accepting
//! form-encoded POSTs with a `method` discriminator. Replies are JSON,
//! sometimes wrapping a rendered HTML fragment.
//!
//! The HTTP plumbing lives in [`FragmentClient`]; the scraping and decoding
//! are free functions so they can be tested against captured payloads.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use ureq::Agent;
use url::Url;

use crate::check::{ApiEndpoint, AuctionSnapshot, Username};
use crate::error::GatewayError;

/// Fragment's landing page.
pub const FRAGMENT_URL: &str = "https://fragment.com";

static AJ_INIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)ajInit\((\{.*?\})\);").unwrap());

static SCRIPT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("script").unwrap());

static VALUE_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"div[class*="tm-value"]"#).unwrap());

/// The read-only slice of Fragment a status check needs.
///
/// Implemented over HTTP by [`FragmentClient`]; tests substitute fakes.
pub trait Marketplace {
    /// Find the session's API endpoint on the landing page.
    ///
    /// # Errors
    ///
    /// [`GatewayError::EndpointNotFound`] if no script carries an `apiUrl`,
    /// or a transport error.
    fn discover_api_url(&self) -> Result<ApiEndpoint, GatewayError>;

    /// Run `searchAuctions` for `username` and extract its value cells.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotAnObject`] and [`GatewayError::MissingHtml`] for
    /// throttled or empty replies, [`GatewayError::TooFewCells`] when the
    /// fragment does not describe a username, or a transport error.
    fn query_auction(
        &self,
        username: &Username,
        endpoint: &ApiEndpoint,
    ) -> Result<AuctionSnapshot, GatewayError>;

    /// Run `searchPremiumGiftRecipient` and return its `error` text, if any.
    ///
    /// `None` means the lookup resolved to an ordinary account.
    ///
    /// # Errors
    ///
    /// A transport error, or a reply that is not a JSON object.
    fn query_recipient(
        &self,
        username: &Username,
        endpoint: &ApiEndpoint,
    ) -> Result<Option<String>, GatewayError>;
}

impl<M: Marketplace + ?Sized> Marketplace for &M {
    fn discover_api_url(&self) -> Result<ApiEndpoint, GatewayError> {
        (**self).discover_api_url()
    }

    fn query_auction(
        &self,
        username: &Username,
        endpoint: &ApiEndpoint,
    ) -> Result<AuctionSnapshot, GatewayError> {
        (**self).query_auction(username, endpoint)
    }

    fn query_recipient(
        &self,
        username: &Username,
        endpoint: &ApiEndpoint,
    ) -> Result<Option<String>, GatewayError> {
        (**self).query_recipient(username, endpoint)
    }
}

/// HTTP client for Fragment, one per worker.
///
/// The wrapped agent keeps Fragment's session cookie, which the discovered
/// API URL is tied to. Do not share one across workers.
#[derive(Debug, Clone)]
pub struct FragmentClient {
    agent: Agent,
    base: Url,
}

impl FragmentClient {
    /// A client for the public site.
    ///
    /// # Errors
    ///
    /// Never in practice; [`FRAGMENT_URL`] is a valid URL.
    pub fn new(agent: Agent) -> Result<Self, GatewayError> {
        Ok(Self::with_base(agent, Url::parse(FRAGMENT_URL)?))
    }

    /// A client for a mirror or a local stand-in of the site.
    pub fn with_base(agent: Agent, base: Url) -> Self {
        Self { agent, base }
    }

    fn get(&self, url: &str) -> Result<String, GatewayError> {
        let mut response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| GatewayError::from_ureq(url, e))?;
        response
            .body_mut()
            .read_to_string()
            .map_err(|e| GatewayError::from_ureq(url, e))
    }

    fn post_form(
        &self,
        endpoint: &ApiEndpoint,
        form: &[(&str, &str)],
    ) -> Result<String, GatewayError> {
        let url = endpoint.url().as_str();
        let mut response = self
            .agent
            .post(url)
            .header("X-Requested-With", "XMLHttpRequest")
            .send_form(form.iter().copied())
            .map_err(|e| GatewayError::from_ureq(url, e))?;
        response
            .body_mut()
            .read_to_string()
            .map_err(|e| GatewayError::from_ureq(url, e))
    }
}

impl Marketplace for FragmentClient {
    fn discover_api_url(&self) -> Result<ApiEndpoint, GatewayError> {
        let page = self.get(self.base.as_str())?;
        extract_api_url(&page, &self.base).ok_or_else(|| GatewayError::EndpointNotFound {
            url: self.base.to_string(),
        })
    }

    fn query_auction(
        &self,
        username: &Username,
        endpoint: &ApiEndpoint,
    ) -> Result<AuctionSnapshot, GatewayError> {
        let body = self.post_form(
            endpoint,
            &[
                ("type", "usernames"),
                ("query", username.as_str()),
                ("method", "searchAuctions"),
            ],
        )?;
        parse_auction_reply(&body)
    }

    fn query_recipient(
        &self,
        username: &Username,
        endpoint: &ApiEndpoint,
    ) -> Result<Option<String>, GatewayError> {
        let body = self.post_form(
            endpoint,
            &[
                ("query", username.as_str()),
                ("months", "3"),
                ("method", "searchPremiumGiftRecipient"),
            ],
        )?;
        parse_recipient_reply(endpoint.url().as_str(), &body)
    }
}

#[derive(Deserialize)]
struct InitPayload {
    #[serde(rename = "apiUrl")]
    api_url: Option<String>,
}

/// Find the `ajInit({...})` payload among the page's scripts and resolve its
/// `apiUrl` against `base`.
///
/// Returns `None` when no script matches or the payload has no `apiUrl`.
#[must_use]
pub fn extract_api_url(page: &str, base: &Url) -> Option<ApiEndpoint> {
    let document = Html::parse_document(page);
    document
        .select(&SCRIPT)
        .map(|script| script.text().collect::<String>())
        .find_map(|text| {
            let payload = AJ_INIT.captures(&text)?.get(1)?.as_str().to_owned();
            let init: InitPayload = serde_json::from_str(&payload).ok()?;
            base.join(&init.api_url?).ok()
        })
        .map(ApiEndpoint::new)
}

/// Decode a `searchAuctions` reply into its first three value cells:
/// tag, price, status.
///
/// Anything that is not a JSON object, including a non-JSON throttling page,
/// is [`GatewayError::NotAnObject`].
///
/// # Errors
///
/// [`GatewayError::NotAnObject`], [`GatewayError::MissingHtml`], or
/// [`GatewayError::TooFewCells`].
pub fn parse_auction_reply(body: &str) -> Result<AuctionSnapshot, GatewayError> {
    let Ok(Value::Object(reply)) = serde_json::from_str::<Value>(body) else {
        return Err(GatewayError::NotAnObject);
    };
    let html = reply
        .get("html")
        .and_then(Value::as_str)
        .filter(|html| !html.trim().is_empty())
        .ok_or(GatewayError::MissingHtml)?;

    let fragment = Html::parse_fragment(html);
    let cells: Vec<String> = fragment
        .select(&VALUE_CELL)
        .take(3)
        .map(|cell| cell.text().collect::<String>().trim().to_owned())
        .collect();

    match <[String; 3]>::try_from(cells) {
        Ok([tag, price, status]) => Ok(AuctionSnapshot { tag, price, status }),
        Err(cells) => Err(GatewayError::TooFewCells { found: cells.len() }),
    }
}

/// Decode a `searchPremiumGiftRecipient` reply into its `error` text.
///
/// # Errors
///
/// [`GatewayError::Json`] for an undecodable body, [`GatewayError::NotAnObject`]
/// for a JSON value that is not an object.
pub fn parse_recipient_reply(url: &str, body: &str) -> Result<Option<String>, GatewayError> {
    let reply: Value = serde_json::from_str(body).map_err(|source| GatewayError::Json {
        url: url.to_owned(),
        source,
    })?;
    let Value::Object(reply) = reply else {
        return Err(GatewayError::NotAnObject);
    };
    Ok(match reply.get("error") {
        None | Some(Value::Null) => None,
        Some(Value::String(error)) if error.is_empty() => None,
        Some(Value::String(error)) => Some(error.clone()),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LANDING: &str = r#"<!DOCTYPE html>
<html><head>
<script src="/js/jquery.min.js"></script>
<script>var Aj = {};</script>
</head><body>
<script>
  $(document).ready(function(){
    ajInit({"version":1,"apiUrl":"\/api?hash=0123abcd","unauth":true,"state":{"x":1}});
  });
</script>
</body></html>"#;

    fn auction_html(cells: &[&str]) -> String {
        let cells: String = cells
            .iter()
            .map(|c| format!(r#"<td><div class="table-cell-value tm-value">{c}</div></td>"#))
            .collect();
        let html = format!(r#"<table class="tm-table"><tbody><tr>{cells}</tr></tbody></table>"#);
        serde_json::json!({ "html": html }).to_string()
    }

    #[test]
    fn api_url_is_resolved_against_base() {
        let base = Url::parse(FRAGMENT_URL).unwrap();
        let endpoint = extract_api_url(LANDING, &base).expect("endpoint");
        assert_eq!(endpoint.url().as_str(), "https://fragment.com/api?hash=0123abcd");
    }

    #[test]
    fn api_url_missing_when_no_init_script() {
        let base = Url::parse(FRAGMENT_URL).unwrap();
        let page = "<html><script>var x = 1;</script></html>";
        assert_eq!(extract_api_url(page, &base), None);
    }

    #[test]
    fn api_url_missing_when_payload_lacks_field() {
        let base = Url::parse(FRAGMENT_URL).unwrap();
        let page = r#"<script>ajInit({"version":1});</script>"#;
        assert_eq!(extract_api_url(page, &base), None);
    }

    #[test]
    fn auction_reply_yields_three_cells_in_order() {
        let snapshot = parse_auction_reply(&auction_html(&["@abcde", "5,000", "Sold"])).unwrap();
        assert_eq!(snapshot.tag, "@abcde");
        assert_eq!(snapshot.price, "5,000");
        assert_eq!(snapshot.status, "Sold");
    }

    #[test]
    fn auction_reply_ignores_extra_cells() {
        let snapshot =
            parse_auction_reply(&auction_html(&["@abcde", "Unknown", "Unavailable", "extra"]))
                .unwrap();
        assert_eq!(snapshot.status, "Unavailable");
    }

    #[test]
    fn auction_reply_with_too_few_cells() {
        match parse_auction_reply(&auction_html(&["@abcde", "Unknown"])) {
            Err(GatewayError::TooFewCells { found }) => assert_eq!(found, 2),
            other => panic!("expected TooFewCells, got {other:?}"),
        }
    }

    #[test]
    fn auction_reply_not_an_object() {
        assert!(matches!(parse_auction_reply("[]"), Err(GatewayError::NotAnObject)));
        assert!(matches!(parse_auction_reply("true"), Err(GatewayError::NotAnObject)));
        assert!(matches!(
            parse_auction_reply("<html>Too Many Requests</html>"),
            Err(GatewayError::NotAnObject)
        ));
    }

    #[test]
    fn auction_reply_without_html() {
        assert!(matches!(parse_auction_reply("{}"), Err(GatewayError::MissingHtml)));
        assert!(matches!(
            parse_auction_reply(r#"{"html":""}"#),
            Err(GatewayError::MissingHtml)
        ));
        assert!(matches!(
            parse_auction_reply(r#"{"html":false}"#),
            Err(GatewayError::MissingHtml)
        ));
    }

    #[test]
    fn recipient_reply_error_field() {
        let url = "https://fragment.com/api";
        assert_eq!(parse_recipient_reply(url, r#"{"ok":true}"#).unwrap(), None);
        assert_eq!(parse_recipient_reply(url, r#"{"error":null}"#).unwrap(), None);
        assert_eq!(
            parse_recipient_reply(url, r#"{"error":"No Telegram users found."}"#).unwrap(),
            Some("No Telegram users found.".to_owned())
        );
    }

    #[test]
    fn recipient_reply_rejects_non_objects() {
        let url = "https://fragment.com/api";
        assert!(matches!(
            parse_recipient_reply(url, "not json"),
            Err(GatewayError::Json { .. })
        ));
        assert!(matches!(
            parse_recipient_reply(url, "[1,2]"),
            Err(GatewayError::NotAnObject)
        ));
    }

    #[test]
    fn client_targets_public_site() {
        let client = FragmentClient::new(crate::config::Settings::default().agent()).unwrap();
        assert_eq!(client.base.as_str(), "https://fragment.com/");
    }

    #[test]
    #[ignore = "requires network access; run with: cargo test -- --ignored"]
    fn live_endpoint_discovery() {
        let client = FragmentClient::new(crate::config::Settings::default().agent()).unwrap();
        let endpoint = client.discover_api_url().unwrap();
        assert!(endpoint.url().as_str().starts_with("https://fragment.com/api"));
    }
}
