#![warn(missing_debug_implementations)]

//! Check whether Telegram usernames are free.
//!
//! Telegram has no public availability API. This library combines the
//! signals available without logging in: the Fragment marketplace's auction
//! search, its premium-gift recipient lookup, and as a last resort the public
//! `t.me` page. Candidates are validated against Telegram's username rules
//! and reserved words before anything touches the network.
//!
//! # Example
//!
//! ```no_run
//! use tg_avail::cancel::CancelToken;
//! use tg_avail::config::Settings;
//! use tg_avail::fragment::FragmentClient;
//! use tg_avail::resolve::StatusResolver;
//! use tg_avail::web::TelegramWebClient;
//!
//! let settings = Settings::default();
//! let agent = settings.agent();
//! let resolver = StatusResolver::new(
//!     FragmentClient::new(agent.clone()).unwrap(),
//!     TelegramWebClient::new(agent).unwrap(),
//!     CancelToken::new(),
//!     &settings,
//! );
//! match resolver.check("some_name") {
//!     Ok(outcome) if outcome.is_free() => println!("probably free"),
//!     Ok(outcome) => println!("{outcome}"),
//!     Err(e) => eprintln!("error: {e}"),
//! }
//! ```

pub mod cancel;
pub mod check;
pub mod config;
pub mod error;
pub mod fragment;
pub mod resolve;
pub mod runner;
pub mod source;
pub mod web;
