use std::io::{self, BufRead, IsTerminal};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use tg_avail::cancel::CancelToken;
use tg_avail::config::{Settings, default_concurrency};
use tg_avail::fragment::{FRAGMENT_URL, FragmentClient};
use tg_avail::resolve::{RetryPolicy, StatusResolver};
use tg_avail::runner::run_batch;
use tg_avail::source::{collapse_duplicates, fetch_candidates};
use tg_avail::web::{TELEGRAM_WEB_URL, TelegramWebClient};

#[derive(Parser)]
#[command(
    name = "tg-avail",
    about = "Check whether Telegram usernames are free",
    after_help = "Validates username syntax (5-32 characters, leading letter, \
                  letters/digits/underscore) and reserved words, then asks \
                  Fragment's auction search and premium-gift lookup who holds \
                  each name, probing t.me when those signals are ambiguous.\n\n\
                  `free` is a heuristic: names held back by Telegram look the \
                  same from the outside."
)]
struct Cli {
    /// Usernames to check (also reads from stdin)
    #[arg(allow_hyphen_values = true)]
    names: Vec<String>,

    /// URL of a newline-delimited username list on raw.githubusercontent.com
    #[arg(long, value_name = "URL")]
    file: Option<String>,

    /// Number of parallel workers [default: available parallelism]
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    jobs: Option<u16>,

    /// Auction queries per username before giving up
    #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(1..))]
    retries: u32,

    /// Seconds to wait after each username that reached the network
    #[arg(long, default_value_t = 5, value_name = "SECS")]
    cooldown: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 10, value_name = "SECS")]
    timeout: u64,

    /// Stop dispatching and abandon in-flight checks after this many seconds
    #[arg(long, value_name = "SECS")]
    deadline: Option<u64>,

    /// Do not probe t.me; ambiguous names report as reserved-or-released
    #[arg(long)]
    no_web_fallback: bool,

    /// Suppress output, exit code only
    #[arg(short, long)]
    quiet: bool,

    /// Only print free names
    #[arg(short, long)]
    free_only: bool,

    /// Log retries and raw lookup diagnostics
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            request_timeout: Duration::from_secs(self.timeout),
            retry: RetryPolicy {
                attempts: self.retries,
                ..RetryPolicy::default()
            },
            check_cooldown: Duration::from_secs(self.cooldown),
            web_fallback: !self.no_web_fallback,
            concurrency: self.jobs.map_or_else(default_concurrency, usize::from),
        }
    }
}

fn init_logging(quiet: bool, verbose: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, true) => "debug",
        (false, false) => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);
    let settings = cli.settings();

    let mut names: Vec<String> = cli.names.clone();

    if let Some(url) = &cli.file {
        match fetch_candidates(&settings.agent(), url) {
            Ok(loaded) => names.extend(loaded),
            Err(e) => {
                error!(error = %e, "could not load username list");
                return ExitCode::from(2);
            }
        }
    }

    // Read from stdin if not a terminal
    if cli.file.is_none() && !io::stdin().is_terminal() {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(l) => {
                    let trimmed = l.trim();
                    if !trimmed.is_empty() {
                        names.push(trimmed.to_owned());
                    }
                }
                Err(e) => {
                    eprintln!("error: reading stdin: {e}");
                    return ExitCode::from(2);
                }
            }
        }
    }

    if names.is_empty() {
        eprintln!("error: no usernames provided");
        eprintln!("usage: tg-avail [OPTIONS] [NAMES...]");
        return ExitCode::from(2);
    }

    collapse_duplicates(&mut names);

    let (fragment_base, web_base) = match (Url::parse(FRAGMENT_URL), Url::parse(TELEGRAM_WEB_URL)) {
        (Ok(fragment), Ok(web)) => (fragment, web),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "invalid base url");
            return ExitCode::from(2);
        }
    };

    let cancel = CancelToken::new();
    if let Some(secs) = cli.deadline {
        cancel.cancel_after(Duration::from_secs(secs));
    }

    let make_resolver = || {
        let agent = settings.agent();
        StatusResolver::new(
            FragmentClient::with_base(agent.clone(), fragment_base.clone()),
            TelegramWebClient::with_base(agent, web_base.clone()),
            cancel.clone(),
            &settings,
        )
    };

    let report = run_batch(&names, settings.concurrency, &cancel, make_resolver, |name, outcome| {
        if cli.quiet || (cli.free_only && !outcome.is_free()) {
            return;
        }
        println!("{name}\t{outcome}");
    });

    if !report.cancelled.is_empty() {
        warn!(
            count = report.cancelled.len(),
            names = %report.cancelled.join(", "),
            "not checked before cancellation"
        );
    }

    if report.all_free() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
