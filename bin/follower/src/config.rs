use std::path::Path;

use anyhow::Context;
use hls_follow::{
    api::UsherVariant,
    config::{DedupeMode, OfflinePolicy, StreamSpec},
};
use serde::Deserialize;
use url::Url;

/// Optional configuration file, every field can also be given on the
/// command line.
///
/// ```toml
/// streams = ["cirno_tv,outdir_direct", "misskaddykins,outdir_proxy,http,192.168.115.1,8118"]
/// dedupe = "time-limited"
/// poll-interval = 1
/// ```
#[derive(Deserialize, Default, Debug)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    pub streams: Vec<String>,

    pub usher_variant: Option<UsherVariant>,
    pub api_base: Option<Url>,
    pub usher_base: Option<Url>,

    pub dedupe: Option<DedupeMode>,
    pub dedupe_ttl: Option<u64>,
    pub offline: Option<OfflinePolicy>,

    pub reauth_interval: Option<u64>,
    pub poll_interval: Option<u64>,
    pub retry_delay: Option<u64>,

    pub bucket_window: Option<u64>,
    pub timestamp_prefix: Option<bool>,
    pub concurrency: Option<usize>,
}

impl Config {
    pub fn load(file: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(file)
            .with_context(|| format!("read config file {}", file.display()))?;
        let config = toml::from_str(&data)
            .with_context(|| format!("parse config file {}", file.display()))?;
        Ok(config)
    }

    pub fn stream_specs(&self) -> anyhow::Result<Vec<StreamSpec>> {
        self.streams
            .iter()
            .map(|s| {
                s.parse::<StreamSpec>()
                    .with_context(|| format!("stream {s:?} in config file"))
            })
            .collect()
    }
}
