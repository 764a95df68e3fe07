use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    api::ApiEndpoints,
    error::{FollowError, FollowResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Http,
    Socks,
}

impl FromStr for ProxyKind {
    type Err = FollowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Self::Http),
            "socks" => Ok(Self::Socks),
            _ => Err(FollowError::UnknownProxyType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    pub fn url(&self) -> String {
        let scheme = match self.kind {
            ProxyKind::Http => "http",
            ProxyKind::Socks => "socks5",
        };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    pub fn to_proxy(&self) -> FollowResult<reqwest::Proxy> {
        reqwest::Proxy::all(self.url()).map_err(|e| FollowError::InvalidProxy(e.to_string()))
    }
}

impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// One followed channel: `channel,dir` or `channel,dir,type,host,port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub channel: String,
    pub destination: PathBuf,
    pub proxy: Option<ProxyConfig>,
}

impl FromStr for StreamSpec {
    type Err = FollowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').map(str::trim).collect();
        let invalid = || FollowError::InvalidStreamSpec(s.to_string());

        let (channel, destination, proxy) = match fields.as_slice() {
            [channel, destination] => (channel, destination, None),
            [channel, destination, kind, host, port] => {
                let kind: ProxyKind = kind.parse()?;
                if host.is_empty() {
                    return Err(invalid());
                }
                let port: u16 = port
                    .parse()
                    .map_err(|_| FollowError::InvalidProxy(format!("bad port {port:?}")))?;
                let proxy = ProxyConfig {
                    kind,
                    host: host.to_string(),
                    port,
                };
                (channel, destination, Some(proxy))
            }
            _ => return Err(invalid()),
        };

        if channel.is_empty() || destination.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            channel: channel.to_string(),
            destination: PathBuf::from(destination),
            proxy,
        })
    }
}

/// How already fetched segments are recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupeMode {
    /// Skip a segment whose target file already exists.
    FilesystemOnly,
    /// Remember completed segments for a while.
    #[default]
    TimeLimited,
}

/// What happens when the usher reports the channel as offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OfflinePolicy {
    /// Try again after the retry delay.
    #[default]
    Retry,
    /// Do nothing until the next periodic reauth.
    WaitForReauth,
}

impl FromStr for DedupeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filesystem-only" | "filesystem" => Ok(Self::FilesystemOnly),
            "time-limited" | "timed" => Ok(Self::TimeLimited),
            _ => Err(format!("unknown dedupe mode: {s}")),
        }
    }
}

impl FromStr for OfflinePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(Self::Retry),
            "wait-for-reauth" | "wait" => Ok(Self::WaitForReauth),
            _ => Err(format!("unknown offline policy: {s}")),
        }
    }
}

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Tuning shared by all sessions of a process.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoints: ApiEndpoints,
    pub reauth_interval: Duration,
    pub poll_interval: Duration,
    pub retry_delay: Duration,
    pub dedupe: DedupeMode,
    pub dedupe_ttl: Duration,
    pub offline: OfflinePolicy,
    /// `None` writes every segment straight into the destination directory.
    pub bucket_window: Option<Duration>,
    pub timestamp_prefix: bool,
    pub concurrency: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoints: ApiEndpoints::default(),
            reauth_interval: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(1),
            retry_delay: Duration::from_secs(10),
            dedupe: DedupeMode::default(),
            dedupe_ttl: Duration::from_secs(120),
            offline: OfflinePolicy::default(),
            bucket_window: Some(Duration::from_secs(5 * 60 * 60)),
            timestamp_prefix: true,
            concurrency: 8,
        }
    }
}

impl SessionConfig {
    /// Fix up combinations that can not work together.
    pub fn normalized(mut self) -> Self {
        if self.dedupe == DedupeMode::FilesystemOnly && self.timestamp_prefix {
            log::warn!("Timestamp prefix disabled, filesystem dedupe needs stable file names.");
            self.timestamp_prefix = false;
        }
        if self.bucket_window.is_some_and(|w| w.as_secs() == 0) {
            self.bucket_window = None;
        }
        // tokio intervals can not have a zero period
        self.reauth_interval = self.reauth_interval.max(MIN_INTERVAL);
        self.poll_interval = self.poll_interval.max(MIN_INTERVAL);
        self.concurrency = self.concurrency.max(1);
        self
    }
}
