use anyhow::{anyhow, Error};
use clap::{App, Arg};
use colorful::Color;
use colorful::Colorful;
use futures::stream::{self, StreamExt};
use rand::{rngs::StdRng, SeedableRng};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use config::Config;
use dispatch::{Aria2Sink, Dispatcher, DownloadSink, Outcome, PrintSink};
use fetcher::{Fetch, HttpFetcher};
use registry::{Preferred, Registry, Shuffled, TrialOrder};
use resolver::Resolver;
use watchseries::{Episode, Series};

mod config;
mod cookie;
mod dispatch;
mod error;
mod fetcher;
mod hoster;
mod registry;
mod resolver;
mod watchseries;

fn done(log: &str) {
    println!("{} {}", "[+]".color(Color::Green), log.color(Color::Green))
}

fn fail(log: &str) {
    println!("{} {}", "[!]".color(Color::Red), log.color(Color::Red))
}

fn pending(log: &str) {
    println!(
        "{} {}",
        "[-]".color(Color::Yellow),
        log.color(Color::Yellow)
    )
}

fn app() -> App<'static, 'static> {
    App::new("watchseries-dl")
        .version(clap::crate_version!())
        .author(clap::crate_authors!())
        .about(clap::crate_description!())
        .arg(
            Arg::with_name("serie")
                .required(true)
                .value_name("SERIE")
                .help("Series slug as found in the catalog url, i.e. the_wire."),
        )
        .arg(
            Arg::with_name("domain")
                .long("domain")
                .takes_value(true)
                .value_name("URL")
                .default_value(watchseries::DEFAULT_DOMAIN)
                .help("Base url of the catalog."),
        )
        .arg(
            Arg::with_name("out")
                .long("out")
                .short("o")
                .takes_value(true)
                .value_name("DIRECTORY")
                .help("Downloads the episodes below the specified path."),
        )
        .arg(
            Arg::with_name("order")
                .long("order")
                .takes_value(true)
                .possible_values(&["asc", "desc"])
                .default_value("asc")
                .help("Processes seasons and episodes in ascending or descending order."),
        )
        .arg(
            Arg::with_name("season")
                .long("season")
                .short("s")
                .takes_value(true)
                .validator(config::is_number)
                .value_name("SEASON")
                .help("Only processes the given season."),
        )
        .arg(
            Arg::with_name("episodes")
                .long("episodes")
                .short("e")
                .takes_value(true)
                .validator(config::is_range)
                .value_name("RANGE")
                .help("Processes episodes by a given range, i.e. 2,5 will process episodes 2 through 5."),
        )
        .arg(
            Arg::with_name("hosts")
                .long("hosts")
                .takes_value(true)
                .validator(config::is_host_list)
                .value_name("HOSTERS")
                .help("Comma separated hosters to use, all supported ones by default."),
        )
        .arg(
            Arg::with_name("prefer")
                .long("prefer")
                .takes_value(true)
                .validator(config::is_host_list)
                .value_name("HOSTERS")
                .help("Tries these hosters first in the given order instead of a random order."),
        )
        .arg(
            Arg::with_name("workers")
                .long("workers")
                .short("w")
                .takes_value(true)
                .default_value("2")
                .validator(config::is_positive)
                .value_name("COUNT")
                .help("Number of episodes resolved at the same time."),
        )
        .arg(
            Arg::with_name("timeout")
                .long("timeout")
                .takes_value(true)
                .default_value("30")
                .validator(config::is_positive)
                .value_name("SECONDS")
                .help("Timeout of every single request."),
        )
        .arg(
            Arg::with_name("delay")
                .long("delay")
                .takes_value(true)
                .default_value("0")
                .validator(config::is_number)
                .value_name("DELAY")
                .help("The delay in milliseconds after each episode."),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .takes_value(true)
                .validator(config::is_number)
                .value_name("SEED")
                .help("Makes the hoster order of every episode reproducible."),
        )
        .arg(
            Arg::with_name("aria2_rpc")
                .long("aria2-rpc")
                .takes_value(true)
                .default_value(config::DEFAULT_ARIA2_RPC)
                .value_name("URL")
                .help("JSON-RPC endpoint of aria2."),
        )
        .arg(
            Arg::with_name("aria2_secret")
                .long("aria2-secret")
                .takes_value(true)
                .value_name("TOKEN")
                .help("RPC secret of aria2, read from ARIA2_SECRET if omitted."),
        )
        .arg(
            Arg::with_name("connections")
                .long("connections")
                .short("c")
                .takes_value(true)
                .default_value("4")
                .validator(config::is_positive)
                .value_name("COUNT")
                .help("Maximum simultaneous connections per download."),
        )
        .arg(
            Arg::with_name("max_downloads")
                .long("max-downloads")
                .short("j")
                .takes_value(true)
                .default_value("3")
                .validator(config::is_positive)
                .value_name("COUNT")
                .help("Maximum downloads aria2 runs at the same time."),
        )
        .arg(
            Arg::with_name("dry_run")
                .long("dry-run")
                .help("Prints the resolved links instead of queueing them."),
        )
        .arg(
            Arg::with_name("verbose")
                .long("verbose")
                .short("v")
                .help("Logs every request and hoster attempt."),
        )
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn trial_order(config: &Config, episode: &Episode) -> Box<dyn TrialOrder + Send> {
    if !config.prefer.is_empty() {
        return Box::new(Preferred(config.prefer.clone()));
    }
    let rng = match config.seed {
        Some(seed) => {
            StdRng::seed_from_u64(seed ^ (u64::from(episode.season) << 32 | u64::from(episode.number)))
        }
        None => StdRng::from_entropy(),
    };
    Box::new(Shuffled(rng))
}

#[derive(Default)]
struct Summary {
    queued: usize,
    skipped: usize,
    missing: usize,
    failed: usize,
}

async fn run<F, S>(
    config: &Config,
    series: &Series,
    dispatcher: &Dispatcher<F, S>,
    cancel: &CancellationToken,
) -> Summary
where
    F: Fetch,
    S: DownloadSink,
{
    let mut results = stream::iter(series.episodes.iter())
        .map(|episode| async move {
            if cancel.is_cancelled() {
                return (episode, Outcome::Cancelled);
            }
            let mut order = trial_order(config, episode);
            let outcome = dispatcher.process(episode, order.as_mut(), cancel).await;
            if !config.delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = sleep(config.delay) => {}
                }
            }
            (episode, outcome)
        })
        .buffered(config.workers);

    let mut summary = Summary::default();
    while let Some((episode, outcome)) = results.next().await {
        let name = episode.basename();
        match outcome {
            Outcome::Queued { host } => {
                summary.queued += 1;
                done(format!("Queued \"{}\" from {}.", name, host).as_str());
            }
            Outcome::Skipped => {
                summary.skipped += 1;
                done(format!("\"{}\" is already downloaded.", name).as_str());
            }
            Outcome::Exhausted => {
                summary.missing += 1;
                fail(format!("No hoster available for \"{}\".", name).as_str());
            }
            Outcome::Failed(err) => {
                summary.failed += 1;
                fail(format!("Failed to queue \"{}\": {}", name, err).as_str());
            }
            Outcome::Cancelled => {}
        }
    }
    summary
}

async fn start<S: DownloadSink>(
    config: &Config,
    series: &Series,
    fetcher: HttpFetcher,
    sink: S,
    cancel: &CancellationToken,
) -> Summary {
    let registry = Registry::new(
        config
            .hosts
            .iter()
            .filter_map(|name| hoster::by_name(name))
            .collect(),
    );
    let dispatcher = Dispatcher::new(
        Resolver::new(fetcher, registry),
        sink,
        series.directory(&config.out),
    );
    if !dispatcher.prepare().await {
        fail("Could not set the download manager options, continuing with its defaults.");
    }
    run(config, series, &dispatcher, cancel).await
}

#[tokio::main]
pub async fn main() -> Result<(), Error> {
    let matches = app().get_matches();
    let config = Config::from_matches(&matches)?;
    init_logging(config.verbose);

    let fetcher = HttpFetcher::new(config.timeout)?;
    pending(format!("Fetching catalog of \"{}\"...", config.serie).as_str());
    let mut series = watchseries::fetch_series(&fetcher, &config.domain, &config.serie).await?;
    series.retain(config.season, config.episodes);
    series.sort(config.order);
    if series.episodes.is_empty() {
        Err(anyhow!("No episodes found for \"{}\"", config.serie))?
    }
    done(
        format!(
            "Found series \"{}\" with {} episodes.",
            series.title,
            series.episodes.len()
        )
        .as_str(),
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        pending("Interrupted, finishing up. Press Ctrl-C again to quit immediately.");
        on_interrupt.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            fail("Interrupted twice, quitting.");
            std::process::exit(130);
        }
    });

    let summary = if config.dry_run {
        start(&config, &series, fetcher, PrintSink, &cancel).await
    } else {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        let sink = Aria2Sink::new(
            client,
            &config.aria2_rpc,
            config.aria2_secret.clone(),
            config.connections,
            config.max_downloads,
        );
        start(&config, &series, fetcher, sink, &cancel).await
    };

    if cancel.is_cancelled() {
        fail("Interrupted, remaining episodes were not processed.");
    }
    done(
        format!(
            "{} queued, {} already downloaded, {} without hoster, {} failed.",
            summary.queued, summary.skipped, summary.missing, summary.failed
        )
        .as_str(),
    );
    Ok(())
}
