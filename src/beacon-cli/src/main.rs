//! Beacon CLI — simulates a page against an in-memory host and prints every
//! beacon the tracker sends.

use std::sync::Arc;

use anyhow::Context;
use beacon_core::event_bus::capture_sink;
use beacon_core::TrackerConfig;
use beacon_web_sdk::{Document, Element, Navigator, NoDelay, Page, StaticHost};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "beacon-cli")]
#[command(about = "Headless page simulator for the beacon tracker")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "BEACON_CONFIG")]
    config: Option<String>,

    /// Report suite list (overrides config)
    #[arg(long, env = "BEACON__ACCOUNT")]
    account: Option<String>,

    /// Page location to simulate
    #[arg(long, default_value = "http://www.example.com/")]
    url: String,

    /// Referrer of the simulated page
    #[arg(long)]
    referrer: Option<String>,

    #[arg(long, value_enum, default_value_t = Browser::Gecko)]
    browser: Browser,

    /// Seed for the host's random source
    #[arg(long, default_value_t = 0)]
    seed: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one page view
    PageView {
        #[arg(long)]
        page_name: Option<String>,

        /// Extra variables as name=value (e.g. prop1=home, s_eVar3=x)
        #[arg(long = "var", value_parser = parse_assignment)]
        vars: Vec<(String, String)>,
    },
    /// Click a link on the page
    Click {
        /// Link href, absolute or relative to --url
        href: String,

        /// Window target of the link
        #[arg(long)]
        target: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Browser {
    Gecko,
    Ie5,
    Ie6,
    Opera,
}

impl Browser {
    fn navigator(self) -> Navigator {
        match self {
            Browser::Gecko => Navigator::gecko(),
            Browser::Ie5 => Navigator::internet_explorer("5.01", false),
            Browser::Ie6 => Navigator::internet_explorer("6.0", false),
            Browser::Opera => Navigator::opera(),
        }
    }
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon_cli=info,beacon_web_sdk=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = TrackerConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        TrackerConfig::default()
    });
    if let Some(account) = cli.account {
        config.account = account;
    }
    if config.account.trim().is_empty() {
        anyhow::bail!("no report suite configured; pass --account or set BEACON__ACCOUNT");
    }
    info!(account = %config.account, url = %cli.url, browser = ?cli.browser, "Simulating page");

    let mut host = StaticHost::new(&cli.url)
        .context("invalid page location")?
        .with_navigator(cli.browser.navigator())
        .with_seed(cli.seed);
    if let Some(referrer) = cli.referrer {
        host = host.with_referrer(referrer);
    }
    let host = Arc::new(host);
    let sink = capture_sink();
    let mut page = Page::new(host, Document::new())
        .with_sink(sink.clone())
        .with_delay(Arc::new(NoDelay));
    let tracker = page.tracker("", config)?;

    match cli.command {
        Command::PageView { page_name, vars } => {
            let mut tracker = tracker.lock();
            if let Some(name) = page_name {
                tracker.set_by_name("pageName", name)?;
            }
            for (name, value) in vars {
                tracker
                    .set_by_name(&name, value)
                    .with_context(|| format!("unknown variable '{name}'"))?;
            }
            tracker.track_page_view();
        }
        Command::Click { href, target } => {
            let body = page.document().body();
            let mut link = Element::anchor(&href);
            if let Some(target) = target {
                link = link.with_target(&target);
            }
            let node = page.document_mut().append(body, link);
            page.load();
            let proceeds = page.click(node);
            info!(href = %href, proceeds, "Click dispatched");
        }
    }

    for record in sink.records() {
        println!("{}", serde_json::to_string(&record)?);
    }
    info!(beacons = sink.count(), "Simulation finished");
    Ok(())
}
