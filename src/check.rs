//! Username rules and the values a check produces.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use url::Url;

pub(crate) mod validation {
    use std::fmt;

    pub const MIN_NAME_LENGTH: usize = 5;
    pub const MAX_NAME_LENGTH: usize = 32;

    /// Why a candidate is not a syntactically valid Telegram username.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum InvalidUsername {
        Empty,
        TooShort { name: String },
        TooLong { name: String },
        Start { first_char: char, name: String },
        Char { ch: char, name: String },
    }

    impl fmt::Display for InvalidUsername {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::Empty => write!(f, "username cannot be empty"),
                Self::TooShort { name } => write!(
                    f,
                    "username `{name}` is too short (min {MIN_NAME_LENGTH} characters)"
                ),
                Self::TooLong { name } => write!(
                    f,
                    "username `{name}` is too long (max {MAX_NAME_LENGTH} characters)"
                ),
                Self::Start { first_char, name } => write!(
                    f,
                    "invalid character `{first_char}` in username `{name}`, \
                     the first character must be an ASCII letter"
                ),
                Self::Char { ch, name } => write!(
                    f,
                    "invalid character `{ch}` in username `{name}`, \
                     characters must be ASCII alphanumeric or `_`"
                ),
            }
        }
    }

    impl std::error::Error for InvalidUsername {}

    /// Equivalent to `^[A-Za-z][A-Za-z0-9_]{4,31}$`.
    pub fn validate_username(name: &str) -> Result<(), InvalidUsername> {
        if name.is_empty() {
            return Err(InvalidUsername::Empty);
        }

        let mut chars = name.chars();
        if let Some(ch) = chars.next() {
            if !ch.is_ascii_alphabetic() {
                return Err(InvalidUsername::Start {
                    first_char: ch,
                    name: name.into(),
                });
            }
        }

        for ch in chars {
            if !(ch.is_ascii_alphanumeric() || ch == '_') {
                return Err(InvalidUsername::Char {
                    ch,
                    name: name.into(),
                });
            }
        }

        // All ASCII from here on, so byte length is character length.
        if name.len() < MIN_NAME_LENGTH {
            return Err(InvalidUsername::TooShort { name: name.into() });
        }
        if name.len() > MAX_NAME_LENGTH {
            return Err(InvalidUsername::TooLong { name: name.into() });
        }

        Ok(())
    }
}

pub use validation::InvalidUsername;

// Path segments t.me and the Telegram clients claim for themselves.
const RESERVED_WORDS: &[&str] = &[
    "addemoji",
    "addlist",
    "addstickers",
    "addtheme",
    "admin",
    "administrator",
    "android",
    "api",
    "apps",
    "blog",
    "boost",
    "botfather",
    "business",
    "channel",
    "contact",
    "contacts",
    "confirmphone",
    "desktop",
    "durov",
    "faq",
    "fragment",
    "gift",
    "giftcode",
    "group",
    "help",
    "invoice",
    "iphone",
    "joinchat",
    "login",
    "macos",
    "message",
    "premium",
    "privacy",
    "privacypolicy",
    "proxy",
    "security",
    "setlanguage",
    "settings",
    "share",
    "socks",
    "spambot",
    "stars",
    "stickers",
    "support",
    "telegram",
    "telegraph",
    "username",
    "usernames",
    "verify",
    "webapp",
];

static RESERVED_SET: LazyLock<HashSet<String>> =
    LazyLock::new(|| RESERVED_WORDS.iter().map(|s| canon_username(s)).collect());

/// Canonicalize a username for lookups: Telegram usernames are case-insensitive.
///
/// ```
/// use tg_avail::check::canon_username;
/// assert_eq!(canon_username("Durov_Fan"), "durov_fan");
/// ```
#[must_use]
pub fn canon_username(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Whether `name` collides with a platform-reserved word (case-insensitive).
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    RESERVED_SET.contains(&canon_username(name))
}

/// A syntactically valid, non-reserved, lowercased Telegram username.
///
/// The only way to obtain one is [`validate`], so anything holding a
/// `Username` is allowed to reach the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Username(String);

impl Username {
    /// The canonical (lowercase) form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Why a candidate was turned away before any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Rejection {
    /// The candidate does not match Telegram's username syntax.
    NotAllowed(InvalidUsername),
    /// The candidate is a platform-reserved word.
    Reserved,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAllowed(e) => write!(f, "not allowed: {e}"),
            Self::Reserved => write!(f, "reserved"),
        }
    }
}

impl std::error::Error for Rejection {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NotAllowed(e) => Some(e),
            Self::Reserved => None,
        }
    }
}

impl From<InvalidUsername> for Rejection {
    fn from(e: InvalidUsername) -> Self {
        Self::NotAllowed(e)
    }
}

impl From<Rejection> for Outcome {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::NotAllowed(_) => Self::NotAllowed,
            Rejection::Reserved => Self::Reserved,
        }
    }
}

/// Validate a raw candidate and canonicalize it.
///
/// Syntax is checked first, so a candidate that is both malformed and
/// reserved reports as [`Rejection::NotAllowed`].
///
/// # Errors
///
/// Returns [`Rejection::NotAllowed`] for names outside
/// `^[A-Za-z][A-Za-z0-9_]{4,31}$` and [`Rejection::Reserved`] for reserved
/// words.
///
/// ```
/// use tg_avail::check::{validate, Rejection};
///
/// assert_eq!(validate("Pavel_Fan").unwrap().as_str(), "pavel_fan");
/// assert_eq!(validate("settings"), Err(Rejection::Reserved));
/// assert!(matches!(validate("1abcde"), Err(Rejection::NotAllowed(_))));
/// ```
pub fn validate(raw: &str) -> Result<Username, Rejection> {
    validation::validate_username(raw)?;
    if is_reserved(raw) {
        return Err(Rejection::Reserved);
    }
    Ok(Username(canon_username(raw)))
}

/// The marketplace API URL for the current session.
///
/// Fragment embeds a session-bound URL in its landing page; it is discovered
/// per check rather than hard-coded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoint(Url);

impl ApiEndpoint {
    /// Wrap an already resolved, absolute API URL.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self(url)
    }

    /// The URL form-encoded queries are posted to.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for ApiEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The three value cells Fragment renders for a username search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionSnapshot {
    /// The username as displayed, with its leading `@`.
    pub tag: String,
    /// A number of TON for listed or sold names, a placeholder otherwise.
    pub price: String,
    /// Fragment's status label, e.g. `Sold`, `On auction`, `Unavailable`.
    pub status: String,
}

impl AuctionSnapshot {
    /// Whether the tag, minus its `@`, names `username` (case-insensitive).
    #[must_use]
    pub fn describes(&self, username: &Username) -> bool {
        self.tag
            .strip_prefix('@')
            .is_some_and(|tag| tag.eq_ignore_ascii_case(username.as_str()))
    }

    /// Whether the price cell holds an amount, i.e. the name is on the market.
    ///
    /// Fragment groups thousands with commas (`5,250`), which still counts.
    #[must_use]
    pub fn is_priced(&self) -> bool {
        let digits = self.price.replace(',', "");
        !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
    }

    /// Whether Fragment labels the name as `Unavailable` (not for sale there).
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        self.status == "Unavailable"
    }
}

/// Why a check ended in [`Outcome::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UnknownReason {
    /// The landing page no longer carries the API URL.
    EndpointNotFound,
    /// Every auction query in the retry budget failed transiently.
    RetriesExhausted { attempts: u32 },
    /// The auction fragment did not contain three value cells.
    TooFewCells { found: usize },
    /// The auction fragment describes some other username.
    TagMismatch { tag: String },
    /// The recipient lookup returned an error text with no known meaning.
    UnrecognizedLookup { error: String, status: String },
    /// A gateway call failed outright, or the check crashed.
    Failed(String),
}

impl fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndpointNotFound => write!(f, "endpoint not found"),
            Self::RetriesExhausted { attempts } => {
                write!(f, "no usable auction reply after {attempts} attempts")
            }
            Self::TooFewCells { found } => write!(f, "not enough username data ({found} cells)"),
            Self::TagMismatch { tag } => write!(f, "response describes `{tag}`"),
            Self::UnrecognizedLookup { error, status } => {
                write!(f, "unknown api behaviour: {error} | {status}")
            }
            Self::Failed(msg) => write!(f, "failed: {msg}"),
        }
    }
}

/// The final classification of one candidate.
///
/// Exactly one is produced per input per run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
#[non_exhaustive]
pub enum Outcome {
    /// Nobody appears to hold the name.
    ///
    /// Heuristic: Fragment says `Unavailable`, the lookup finds no user, and
    /// `t.me` shows no contact page. Platform-held names look the same, so
    /// this can be a false positive.
    Free,
    /// Same signals as [`Outcome::Free`], reported without the `t.me` probe.
    ReservedOrReleased,
    /// An ordinary account owns the name.
    RegisteredUser,
    /// A Telegram Premium account owns the name.
    PremiumUser,
    /// An account owns the name but hides itself from the lookup.
    PremiumUserPrivate,
    /// A channel or group owns the name.
    Channel,
    /// The name is listed or sold on Fragment.
    SoldAtAuction { status: String, price: String },
    /// Fragment rejected the lookup request.
    BadRequest,
    /// Fragment or Telegram throttled the lookup.
    RateLimited,
    /// The signals did not add up to a classification.
    Unknown(UnknownReason),
    /// The candidate is not a valid username.
    NotAllowed,
    /// The candidate is a platform-reserved word.
    Reserved,
}

impl Outcome {
    /// Short label used in reports.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::ReservedOrReleased => "reserved-or-released",
            Self::RegisteredUser => "user",
            Self::PremiumUser => "premium",
            Self::PremiumUserPrivate => "premium-private",
            Self::Channel => "channel",
            Self::SoldAtAuction { .. } => "fragment",
            Self::BadRequest => "bad-request",
            Self::RateLimited => "rate-limited",
            Self::Unknown(_) => "unknown",
            Self::NotAllowed => "not-allowed",
            Self::Reserved => "reserved",
        }
    }

    /// Whether the name looks claimable.
    ///
    /// Only [`Outcome::Free`] counts; [`Outcome::ReservedOrReleased`] is an
    /// unprobed guess and may still belong to someone.
    #[must_use]
    pub fn is_free(&self) -> bool {
        matches!(self, Self::Free)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SoldAtAuction { status, price } => {
                write!(f, "{}: {status} for {price} TON", self.label())
            }
            Self::Unknown(reason) => write!(f, "{}: {reason}", self.label()),
            other => f.write_str(other.label()),
        }
    }
}
