//! Last-resort probe of `t.me/<username>`.

use scraper::Html;
use ureq::Agent;
use url::Url;

use crate::check::Username;
use crate::error::GatewayError;

/// Telegram's public web front end.
pub const TELEGRAM_WEB_URL: &str = "https://t.me";

/// Looks for evidence that a live account answers to a username.
pub trait ContactProbe {
    /// Whether the public page for `username` offers to contact it.
    ///
    /// # Errors
    ///
    /// Any transport failure. A failed probe must not read as "no account".
    fn has_public_contact_affordance(&self, username: &Username) -> Result<bool, GatewayError>;
}

impl<P: ContactProbe + ?Sized> ContactProbe for &P {
    fn has_public_contact_affordance(&self, username: &Username) -> Result<bool, GatewayError> {
        (**self).has_public_contact_affordance(username)
    }
}

/// HTTP client for `t.me` profile pages.
#[derive(Debug, Clone)]
pub struct TelegramWebClient {
    agent: Agent,
    base: Url,
}

impl TelegramWebClient {
    /// A client for the public front end.
    ///
    /// # Errors
    ///
    /// Never in practice; [`TELEGRAM_WEB_URL`] is a valid URL.
    pub fn new(agent: Agent) -> Result<Self, GatewayError> {
        Ok(Self::with_base(agent, Url::parse(TELEGRAM_WEB_URL)?))
    }

    /// A client for a local stand-in of `t.me`.
    pub fn with_base(agent: Agent, base: Url) -> Self {
        Self { agent, base }
    }
}

impl ContactProbe for TelegramWebClient {
    fn has_public_contact_affordance(&self, username: &Username) -> Result<bool, GatewayError> {
        let url = self.base.join(username.as_str())?;
        let url = url.as_str();
        let mut response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| GatewayError::from_ureq(url, e))?;
        let page = response
            .body_mut()
            .read_to_string()
            .map_err(|e| GatewayError::from_ureq(url, e))?;
        Ok(has_contact_affordance(&page, username))
    }
}

/// Whether the rendered text of `page` says
/// "you can contact @username right away" (case-insensitive).
#[must_use]
pub fn has_contact_affordance(page: &str, username: &Username) -> bool {
    let document = Html::parse_document(page);
    let text = document
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    text.contains(&format!("you can contact @{username} right away"))
}
