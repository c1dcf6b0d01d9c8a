//! Turns Fragment and `t.me` signals into an [`Outcome`].
//!
//! Per username the resolver discovers the API endpoint, queries the auction
//! listing (retrying transient failures), and, unless the name is priced on
//! the market, asks the premium-gift recipient lookup who holds it. Only the
//! auction query retries; every other failure is final for that check.

use std::time::Duration;

use tracing::{debug, warn};

use crate::cancel::Sleeper;
use crate::check::{self, AuctionSnapshot, Outcome, UnknownReason, Username};
use crate::config::Settings;
use crate::error::{GatewayError, ResolveError};
use crate::fragment::Marketplace;
use crate::web::ContactProbe;

const PREMIUM_USER: &str = "This account is already subscribed to Telegram Premium.";
const CHANNEL: &str = "Please enter a username assigned to a user.";
const NOT_FOUND: &str = "No Telegram users found.";
const BAD_REQUEST: &str = "Bad request";

/// Retry budget and waits for the auction query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total auction queries per check, first attempt included.
    pub attempts: u32,
    /// Wait after a throttled reply (not a JSON object, HTTP 429, timeout).
    pub throttled_cooldown: Duration,
    /// Wait after an object reply without the html payload.
    pub empty_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 6,
            throttled_cooldown: Duration::from_secs(10),
            empty_cooldown: Duration::from_secs(6),
        }
    }
}

impl RetryPolicy {
    fn cooldown_for(&self, err: &GatewayError) -> Duration {
        match err {
            GatewayError::MissingHtml => self.empty_cooldown,
            _ => self.throttled_cooldown,
        }
    }
}

/// Classifies usernames against one marketplace session.
///
/// `M` and `W` are the gateways, `S` provides every wait and the
/// cancellation signal.
#[derive(Debug)]
pub struct StatusResolver<M, W, S> {
    market: M,
    web: W,
    sleeper: S,
    retry: RetryPolicy,
    check_cooldown: Duration,
    web_fallback: bool,
}

impl<M, W, S> StatusResolver<M, W, S>
where
    M: Marketplace,
    W: ContactProbe,
    S: Sleeper,
{
    #[must_use]
    pub fn new(market: M, web: W, sleeper: S, settings: &Settings) -> Self {
        Self {
            market,
            web,
            sleeper,
            retry: settings.retry,
            check_cooldown: settings.check_cooldown,
            web_fallback: settings.web_fallback,
        }
    }

    /// Validate `raw`, resolve it if it may reach the network, then observe
    /// the per-check cooldown.
    ///
    /// Rejected candidates return immediately without I/O or cooldown.
    ///
    /// # Errors
    ///
    /// [`ResolveError::Cancelled`] if cancelled before the outcome was known,
    /// or [`ResolveError::Gateway`] when a non-retrying call failed.
    pub fn check(&self, raw: &str) -> Result<Outcome, ResolveError> {
        let username = match check::validate(raw) {
            Ok(username) => username,
            Err(rejection) => {
                debug!(username = raw, %rejection, "rejected before lookup");
                return Ok(rejection.into());
            }
        };

        let result = self.resolve(&username);
        if !matches!(result, Err(ResolveError::Cancelled)) {
            // A cancelled cooldown still lets a finished result through.
            let _ = self.sleeper.sleep(self.check_cooldown);
        }
        result
    }

    /// Classify an already validated username.
    ///
    /// # Errors
    ///
    /// See [`StatusResolver::check`].
    pub fn resolve(&self, username: &Username) -> Result<Outcome, ResolveError> {
        if self.sleeper.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        let endpoint = match self.market.discover_api_url() {
            Ok(endpoint) => endpoint,
            Err(GatewayError::EndpointNotFound { url }) => {
                warn!(%username, %url, "api url not found");
                return Ok(Outcome::Unknown(UnknownReason::EndpointNotFound));
            }
            Err(err) => return Err(err.into()),
        };
        debug!(%username, %endpoint, "discovered api endpoint");

        let snapshot = match self.query_auction_with_retry(username, &endpoint)? {
            Ok(snapshot) => snapshot,
            Err(reason) => return Ok(Outcome::Unknown(reason)),
        };

        if snapshot.is_priced() {
            return Ok(Outcome::SoldAtAuction {
                status: snapshot.status,
                price: snapshot.price,
            });
        }

        if self.sleeper.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        let lookup = match self.market.query_recipient(username, &endpoint) {
            Ok(lookup) => lookup,
            Err(err) if err.is_rate_limited() => return Ok(Outcome::RateLimited),
            Err(err) => return Err(err.into()),
        };
        self.classify_lookup(username, &snapshot, lookup)
    }

    /// The retry loop. The outer `Result` carries cancellation and hard
    /// failures; the inner one an `Unknown` verdict.
    fn query_auction_with_retry(
        &self,
        username: &Username,
        endpoint: &check::ApiEndpoint,
    ) -> Result<Result<AuctionSnapshot, UnknownReason>, ResolveError> {
        let attempts = self.retry.attempts;
        for attempt in 1..=attempts {
            if self.sleeper.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            match self.market.query_auction(username, endpoint) {
                Ok(snapshot) if snapshot.describes(username) => return Ok(Ok(snapshot)),
                Ok(snapshot) => {
                    warn!(%username, tag = %snapshot.tag, "username not found in response");
                    return Ok(Err(UnknownReason::TagMismatch { tag: snapshot.tag }));
                }
                Err(GatewayError::TooFewCells { found }) => {
                    warn!(%username, found, "not enough username data");
                    return Ok(Err(UnknownReason::TooFewCells { found }));
                }
                Err(err) if err.is_transient() => {
                    debug!(
                        %username,
                        attempt,
                        attempts,
                        error = %err,
                        "auction query failed, retrying"
                    );
                    if attempt < attempts {
                        self.sleeper.sleep(self.retry.cooldown_for(&err))?;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        warn!(%username, attempts, "auction query retries exhausted");
        Ok(Err(UnknownReason::RetriesExhausted { attempts }))
    }

    fn classify_lookup(
        &self,
        username: &Username,
        snapshot: &AuctionSnapshot,
        lookup: Option<String>,
    ) -> Result<Outcome, ResolveError> {
        let Some(error) = lookup else {
            return Ok(Outcome::RegisteredUser);
        };

        if error.contains(PREMIUM_USER) {
            return Ok(Outcome::PremiumUser);
        }
        if error.contains(CHANNEL) {
            return Ok(Outcome::Channel);
        }
        if error == NOT_FOUND && snapshot.is_unavailable() {
            if !self.web_fallback {
                return Ok(Outcome::ReservedOrReleased);
            }
            if self.sleeper.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            return match self.web.has_public_contact_affordance(username) {
                Ok(true) => Ok(Outcome::PremiumUserPrivate),
                Ok(false) => Ok(Outcome::Free),
                Err(err) if err.is_rate_limited() => Ok(Outcome::RateLimited),
                Err(err) => Err(err.into()),
            };
        }
        if error.contains(BAD_REQUEST) {
            return Ok(Outcome::BadRequest);
        }

        debug!(%username, %error, status = %snapshot.status, "unknown api behaviour");
        Ok(Outcome::Unknown(UnknownReason::UnrecognizedLookup {
            error,
            status: snapshot.status.clone(),
        }))
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::time::Duration;

    use url::Url;

    use crate::cancel::{Cancelled, Sleeper};
    use crate::check::{ApiEndpoint, AuctionSnapshot, Username};
    use crate::error::GatewayError;
    use crate::fragment::Marketplace;
    use crate::web::ContactProbe;

    pub fn snapshot(tag: &str, price: &str, status: &str) -> AuctionSnapshot {
        AuctionSnapshot {
            tag: tag.into(),
            price: price.into(),
            status: status.into(),
        }
    }

    pub fn endpoint() -> ApiEndpoint {
        ApiEndpoint::new(Url::parse("https://fragment.test/api?hash=1").unwrap())
    }

    /// A scripted auction reply. The last one in a script repeats forever.
    #[derive(Clone)]
    pub enum Reply {
        Snapshot(AuctionSnapshot),
        NotAnObject,
        MissingHtml,
        TooFewCells(usize),
        Throttled,
        TimedOut,
    }

    impl Reply {
        pub fn listing(tag: &str, price: &str, status: &str) -> Self {
            Self::Snapshot(snapshot(tag, price, status))
        }

        fn into_result(self) -> Result<AuctionSnapshot, GatewayError> {
            match self {
                Self::Snapshot(snapshot) => Ok(snapshot),
                Self::NotAnObject => Err(GatewayError::NotAnObject),
                Self::MissingHtml => Err(GatewayError::MissingHtml),
                Self::TooFewCells(found) => Err(GatewayError::TooFewCells { found }),
                Self::Throttled => Err(GatewayError::Status {
                    url: "https://fragment.test/api".into(),
                    code: 429,
                }),
                Self::TimedOut => Err(GatewayError::Timeout {
                    url: "https://fragment.test/api".into(),
                }),
            }
        }
    }

    /// Replays scripted replies and counts every call.
    pub struct FakeMarket {
        pub endpoint: RefCell<Option<Result<ApiEndpoint, GatewayError>>>,
        pub auctions: RefCell<VecDeque<Reply>>,
        pub recipient: RefCell<Option<Result<Option<String>, GatewayError>>>,
        pub discover_calls: Cell<u32>,
        pub auction_calls: Cell<u32>,
        pub recipient_calls: Cell<u32>,
    }

    impl FakeMarket {
        pub fn new(auctions: Vec<Reply>, recipient: Result<Option<String>, GatewayError>) -> Self {
            Self {
                endpoint: RefCell::new(Some(Ok(endpoint()))),
                auctions: RefCell::new(auctions.into()),
                recipient: RefCell::new(Some(recipient)),
                discover_calls: Cell::new(0),
                auction_calls: Cell::new(0),
                recipient_calls: Cell::new(0),
            }
        }

        pub fn without_endpoint() -> Self {
            Self::failing_discovery(GatewayError::EndpointNotFound {
                url: "https://fragment.test".into(),
            })
        }

        pub fn failing_discovery(err: GatewayError) -> Self {
            let market = Self::new(Vec::new(), Ok(None));
            *market.endpoint.borrow_mut() = Some(Err(err));
            market
        }
    }

    impl Marketplace for FakeMarket {
        fn discover_api_url(&self) -> Result<ApiEndpoint, GatewayError> {
            self.discover_calls.set(self.discover_calls.get() + 1);
            self.endpoint.borrow_mut().take().unwrap_or(Ok(endpoint()))
        }

        fn query_auction(
            &self,
            _: &Username,
            _: &ApiEndpoint,
        ) -> Result<AuctionSnapshot, GatewayError> {
            self.auction_calls.set(self.auction_calls.get() + 1);
            let mut auctions = self.auctions.borrow_mut();
            let reply = if auctions.len() > 1 {
                auctions.pop_front()
            } else {
                auctions.front().cloned()
            };
            reply.unwrap_or(Reply::NotAnObject).into_result()
        }

        fn query_recipient(
            &self,
            _: &Username,
            _: &ApiEndpoint,
        ) -> Result<Option<String>, GatewayError> {
            self.recipient_calls.set(self.recipient_calls.get() + 1);
            self.recipient.borrow_mut().take().unwrap_or(Ok(None))
        }
    }

    pub struct FakeWeb {
        pub answer: RefCell<Option<Result<bool, GatewayError>>>,
        pub calls: Cell<u32>,
    }

    impl FakeWeb {
        pub fn answering(answer: bool) -> Self {
            Self::with(Ok(answer))
        }

        pub fn with(answer: Result<bool, GatewayError>) -> Self {
            Self {
                answer: RefCell::new(Some(answer)),
                calls: Cell::new(0),
            }
        }
    }

    impl ContactProbe for FakeWeb {
        fn has_public_contact_affordance(&self, _: &Username) -> Result<bool, GatewayError> {
            self.calls.set(self.calls.get() + 1);
            self.answer.borrow_mut().take().unwrap_or(Ok(false))
        }
    }

    /// Records waits instead of performing them.
    #[derive(Default)]
    pub struct RecordingSleeper {
        pub waits: RefCell<Vec<Duration>>,
        pub cancel_after_waits: Option<usize>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
            let mut waits = self.waits.borrow_mut();
            waits.push(duration);
            match self.cancel_after_waits {
                Some(limit) if waits.len() >= limit => Err(Cancelled),
                _ => Ok(()),
            }
        }

        fn is_cancelled(&self) -> bool {
            self.cancel_after_waits
                .is_some_and(|limit| self.waits.borrow().len() >= limit)
        }
    }
}
