mod config;

use std::{num::NonZeroUsize, path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use clap::Parser;
use hls_follow::{
    api::{ApiEndpoints, UsherVariant},
    config::{DedupeMode, OfflinePolicy, SessionConfig, StreamSpec},
    SessionSupervisor,
};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};
use url::Url;

use crate::config::Config;

#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
pub struct FollowerArgs {
    /// Debug output
    #[clap(long, alias = "debug")]
    verbose: bool,

    /// Configuration file
    ///
    /// Streams listed there are followed in addition to the ones given on the
    /// command line. Command line options override the file.
    #[clap(short, long, env = "FOLLOWER_CONFIG")]
    config: Option<PathBuf>,

    /// Usher request shape. hls or select.
    #[clap(long)]
    usher_variant: Option<UsherVariant>,

    /// Base url of the access token api
    #[clap(long, env = "FOLLOWER_API_BASE")]
    api_base: Option<Url>,

    /// Base url of the usher
    #[clap(long, env = "FOLLOWER_USHER_BASE")]
    usher_base: Option<Url>,

    /// How saved segments are recognised. filesystem-only or time-limited.
    #[clap(long)]
    dedupe: Option<DedupeMode>,

    /// Seconds a saved segment is remembered in time-limited mode
    #[clap(long)]
    dedupe_ttl: Option<u64>,

    /// What to do while the channel is offline. retry or wait-for-reauth.
    #[clap(long)]
    offline: Option<OfflinePolicy>,

    /// Seconds between token refreshes
    #[clap(long)]
    reauth_interval: Option<u64>,

    /// Seconds between manifest reloads
    #[clap(long)]
    poll_interval: Option<u64>,

    /// Seconds to wait before retrying a failed token or usher request
    #[clap(long)]
    retry_delay: Option<u64>,

    /// Seconds covered by one output subdirectory, 0 disables subdirectories
    #[clap(long)]
    bucket_window: Option<u64>,

    /// Do not prefix file names with the capture time
    #[clap(long)]
    no_timestamp: bool,

    /// Concurrent segment downloads per stream
    #[clap(long)]
    concurrency: Option<NonZeroUsize>,

    /// Streams to follow
    ///
    /// `channel,dir` or `channel,dir,type,host,port`, where type is http or socks.
    streams: Vec<StreamSpec>,
}

impl FollowerArgs {
    fn session_config(&self, file: &Config) -> SessionConfig {
        let default = SessionConfig::default();
        let secs = |cli: Option<u64>, file: Option<u64>, default: Duration| {
            cli.or(file).map(Duration::from_secs).unwrap_or(default)
        };

        let endpoints = ApiEndpoints {
            api_base: self
                .api_base
                .clone()
                .or_else(|| file.api_base.clone())
                .unwrap_or(default.endpoints.api_base),
            usher_base: self
                .usher_base
                .clone()
                .or_else(|| file.usher_base.clone())
                .unwrap_or(default.endpoints.usher_base),
            variant: self
                .usher_variant
                .or(file.usher_variant)
                .unwrap_or(default.endpoints.variant),
        };

        let bucket_window = match self.bucket_window.or(file.bucket_window) {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => default.bucket_window,
        };

        SessionConfig {
            endpoints,
            reauth_interval: secs(
                self.reauth_interval,
                file.reauth_interval,
                default.reauth_interval,
            ),
            poll_interval: secs(self.poll_interval, file.poll_interval, default.poll_interval),
            retry_delay: secs(self.retry_delay, file.retry_delay, default.retry_delay),
            dedupe: self.dedupe.or(file.dedupe).unwrap_or(default.dedupe),
            dedupe_ttl: secs(self.dedupe_ttl, file.dedupe_ttl, default.dedupe_ttl),
            offline: self.offline.or(file.offline).unwrap_or(default.offline),
            bucket_window,
            timestamp_prefix: !self.no_timestamp
                && file.timestamp_prefix.unwrap_or(default.timestamp_prefix),
            concurrency: self
                .concurrency
                .map(NonZeroUsize::get)
                .or(file.concurrency)
                .unwrap_or(default.concurrency),
        }
    }
}

fn init_logger(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .try_from_env()
                .unwrap_or_else(|_| EnvFilter::new(level.to_string())),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = FollowerArgs::parse();
    init_logger(args.verbose);

    let file = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    // every stream is validated before the first session starts
    let mut streams = file.stream_specs()?;
    streams.extend(args.streams.iter().cloned());
    if streams.is_empty() {
        bail!("No stream specified.");
    }

    let mut supervisor = SessionSupervisor::new(args.session_config(&file));
    for spec in streams {
        let channel = spec.channel.clone();
        supervisor
            .spawn(spec)
            .with_context(|| format!("start session for {channel}"))?;
    }

    log::info!("Following {} stream(s).", supervisor.len());
    supervisor.run().await;

    Ok(())
}
