use std::{
    collections::HashSet,
    future::pending,
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
};

use chrono::Utc;
use tokio::{
    sync::Semaphore,
    task::JoinSet,
    time::{self, Instant, Interval, MissedTickBehavior, Sleep},
};
use url::Url;

use crate::{
    api::{segment_names, segment_url, Credentials, UsherClient},
    config::{DedupeMode, OfflinePolicy, SessionConfig, StreamSpec},
    error::{FollowError, FollowResult},
    fetch::Fetcher,
    output::{save_segment, OutputLayout},
    timed_set::TimedSet,
    util::http::HttpClient,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    TokenPending,
    ManifestPending,
    Polling,
}

/// Completion of a network task spawned by a session.
enum SessionEvent {
    Token(FollowResult<Credentials>),
    Usher(FollowResult<Url>),
    Manifest {
        url: Url,
        result: FollowResult<String>,
    },
    Segment {
        name: String,
        path: PathBuf,
        result: FollowResult<u64>,
    },
    AlreadySaved {
        name: String,
        path: PathBuf,
    },
}

/// Follows one channel until dropped.
///
/// All mutable state lives on the task running [`StreamSession::run`].
/// Network requests are spawned into a [`JoinSet`] owned by the session and
/// their results are applied back here one at a time.
pub struct StreamSession {
    stream: String,
    config: SessionConfig,
    client: UsherClient,
    layout: OutputLayout,

    state: SessionState,
    credentials: Option<Credentials>,
    manifest_url: Option<Url>,

    in_flight: HashSet<String>,
    recently_completed: Option<TimedSet<String>>,
    auth_in_flight: bool,
    poll_in_flight: bool,

    reauth_timer: Interval,
    poll_timer: Option<Interval>,
    retry_timer: Option<Pin<Box<Sleep>>>,

    permits: Arc<Semaphore>,
    tasks: JoinSet<SessionEvent>,
}

impl StreamSession {
    /// Must be called from within a tokio runtime.
    pub fn new(spec: StreamSpec, config: SessionConfig) -> FollowResult<Self> {
        let client = HttpClient::with_proxy(spec.proxy.as_ref())?;
        let client = UsherClient::new(Fetcher::new(client), config.endpoints.clone());
        if let Some(proxy) = &spec.proxy {
            log::info!("[{}] Using proxy {proxy}", spec.channel);
        }
        Ok(Self::with_client(spec.channel, spec.destination, client, config))
    }

    pub fn with_client(
        stream: String,
        destination: PathBuf,
        client: UsherClient,
        config: SessionConfig,
    ) -> Self {
        let config = config.normalized();
        let layout = OutputLayout::from_config(destination, &config);

        let recently_completed = match config.dedupe {
            DedupeMode::TimeLimited => Some(TimedSet::new(config.dedupe_ttl)),
            DedupeMode::FilesystemOnly => None,
        };

        // the first tick fires immediately and performs the initial auth
        let mut reauth_timer = time::interval(config.reauth_interval);
        reauth_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            stream,
            client,
            layout,

            state: SessionState::Unauthenticated,
            credentials: None,
            manifest_url: None,

            in_flight: HashSet::new(),
            recently_completed,
            auth_in_flight: false,
            poll_in_flight: false,

            reauth_timer,
            poll_timer: None,
            retry_timer: None,

            permits: Arc::new(Semaphore::new(config.concurrency)),
            tasks: JoinSet::new(),
            config,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn manifest_url(&self) -> Option<&Url> {
        self.manifest_url.as_ref()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub async fn run(mut self) {
        log::info!(
            "[{}] Following stream, saving to {}",
            self.stream,
            self.layout.root().display()
        );

        loop {
            tokio::select! {
                _ = self.reauth_timer.tick() => self.reauth(),
                _ = tick(&mut self.poll_timer) => self.poll_manifest(),
                _ = expired(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    self.reauth();
                }
                Some(joined) = self.tasks.join_next() => match joined {
                    Ok(event) => self.handle_event(event),
                    Err(e) => log::error!("[{}] Network task failed: {e}", self.stream),
                },
            }
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Token(result) => self.token_reply(result),
            SessionEvent::Usher(result) => self.usher_reply(result),
            SessionEvent::Manifest { url, result } => self.manifest_reply(url, result),
            SessionEvent::Segment { name, path, result } => self.save_part(name, &path, result),
            SessionEvent::AlreadySaved { name, path } => {
                log::debug!("[{}] {name} already saved at {}", self.stream, path.display());
                self.in_flight.remove(&name);
            }
        }
    }

    fn transition(&mut self, state: SessionState) {
        if self.state != state {
            log::debug!("[{}] {:?} -> {:?}", self.stream, self.state, state);
            self.state = state;
        }
    }

    /// Move back to `state` unless a working manifest keeps us polling.
    fn fall_back(&mut self, state: SessionState) {
        if self.state != SessionState::Polling {
            self.transition(state);
        }
    }

    /// Restarts the one-shot retry timer, which re-enters through reauth.
    fn schedule_retry(&mut self) {
        log::info!(
            "[{}] Retrying in {}s",
            self.stream,
            self.config.retry_delay.as_secs_f32()
        );
        self.retry_timer = Some(Box::pin(time::sleep(self.config.retry_delay)));
    }

    fn reauth(&mut self) {
        if self.auth_in_flight {
            log::debug!("[{}] Token request already in flight", self.stream);
            return;
        }
        self.auth_in_flight = true;
        self.fall_back(SessionState::TokenPending);

        let client = self.client.clone();
        let stream = self.stream.clone();
        self.tasks
            .spawn(async move { SessionEvent::Token(client.access_token(&stream).await) });
    }

    fn token_reply(&mut self, result: FollowResult<Credentials>) {
        let credentials = match result {
            Ok(credentials) => credentials,
            Err(FollowError::MissingCredentials) => {
                // not retried, the next periodic reauth tries again
                log::warn!("[{}] New token info is empty!", self.stream);
                self.auth_in_flight = false;
                self.fall_back(SessionState::Unauthenticated);
                return;
            }
            Err(e) => {
                log::warn!("[{}] Get token failed: {e}", self.stream);
                self.auth_in_flight = false;
                self.fall_back(SessionState::Unauthenticated);
                self.schedule_retry();
                return;
            }
        };

        self.credentials = Some(credentials.clone());
        self.resolve_manifest(credentials);
    }

    fn resolve_manifest(&mut self, credentials: Credentials) {
        self.fall_back(SessionState::ManifestPending);

        let client = self.client.clone();
        let stream = self.stream.clone();
        self.tasks.spawn(async move {
            SessionEvent::Usher(client.resolve_manifest(&stream, &credentials).await)
        });
    }

    fn usher_reply(&mut self, result: FollowResult<Url>) {
        self.auth_in_flight = false;

        match result {
            Ok(url) => self.new_playlist(url),
            Err(FollowError::ChannelOffline) => {
                self.fall_back(SessionState::Unauthenticated);
                match self.config.offline {
                    OfflinePolicy::Retry => {
                        log::info!("[{}] Usher playlist is empty, channel likely not live", self.stream);
                        self.schedule_retry();
                    }
                    OfflinePolicy::WaitForReauth => log::info!(
                        "[{}] Usher playlist is empty, channel likely not live, waiting for next reauth",
                        self.stream
                    ),
                }
            }
            Err(e) => {
                log::warn!("[{}] Get usher failed: {e}", self.stream);
                self.fall_back(SessionState::Unauthenticated);
                self.schedule_retry();
            }
        }
    }

    fn new_playlist(&mut self, url: Url) {
        log::info!("[{}] Following manifest {url}", self.stream);
        self.manifest_url = Some(url);

        let period = self.config.poll_interval;
        let mut timer = time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.poll_timer = Some(timer);
        self.transition(SessionState::Polling);

        self.poll_manifest();
    }

    fn poll_manifest(&mut self) {
        let Some(url) = self.manifest_url.clone() else {
            log::debug!("[{}] Tried to update manifest without url set", self.stream);
            return;
        };
        if self.poll_in_flight {
            log::debug!("[{}] Previous manifest request still pending", self.stream);
            return;
        }
        self.poll_in_flight = true;

        let client = self.client.clone();
        self.tasks.spawn(async move {
            let result = client.manifest(url.clone()).await;
            SessionEvent::Manifest { url, result }
        });
    }

    fn manifest_reply(&mut self, url: Url, result: FollowResult<String>) {
        self.poll_in_flight = false;

        let body = match result {
            Ok(body) => body,
            // a newer manifest has replaced this one meanwhile
            Err(e) if self.manifest_url.as_ref() != Some(&url) => {
                log::debug!("[{}] Stale manifest {url} failed: {e}", self.stream);
                return;
            }
            Err(e) => {
                log::warn!("[{}] Get manifest failed: {e}", self.stream);
                self.poll_timer = None;
                self.transition(SessionState::Unauthenticated);
                self.schedule_retry();
                return;
            }
        };

        for name in segment_names(&body) {
            self.download_segment(&url, name);
        }
    }

    fn download_segment(&mut self, manifest: &Url, name: &str) {
        if self.in_flight.contains(name) {
            return;
        }
        if let Some(completed) = &self.recently_completed {
            if completed.contains(name) {
                return;
            }
        }

        let now = Utc::now();
        let path = self.layout.segment_path(name, now);
        let url = segment_url(manifest, name);
        self.in_flight.insert(name.to_string());

        let saved_lookup = match self.config.dedupe {
            DedupeMode::FilesystemOnly => Some(self.layout.clone()),
            DedupeMode::TimeLimited => None,
        };
        let stream = self.stream.clone();
        let client = self.client.clone();
        let permits = self.permits.clone();
        let name = name.to_string();
        self.tasks.spawn(async move {
            if let Some(layout) = saved_lookup {
                if let Some(path) = layout.find_saved(&name, now).await {
                    return SessionEvent::AlreadySaved { name, path };
                }
            }

            log::info!("[{stream}] Downloading {url} to {}", path.display());
            // the semaphore is never closed
            let _permit = permits.acquire().await;
            let result = fetch_part(&client, url, &path).await;
            SessionEvent::Segment { name, path, result }
        });
    }

    fn save_part(&mut self, name: String, path: &Path, result: FollowResult<u64>) {
        self.in_flight.remove(&name);

        match result {
            Ok(written) => {
                log::info!("[{}] Wrote {} ({written} bytes)", self.stream, path.display());
                if let Some(completed) = &self.recently_completed {
                    completed.insert(name);
                }
            }
            Err(e @ FollowError::ShortWrite { .. }) => {
                log::error!("[{}] Error writing full data to {}: {e}", self.stream, path.display());
            }
            Err(e) => log::warn!("[{}] Get segment {name} failed: {e}", self.stream),
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            log::debug!(
                "[{}] Cancelling {} pending request(s)",
                self.stream,
                self.tasks.len()
            );
        }
        self.tasks.abort_all();
    }
}

async fn fetch_part(client: &UsherClient, url: Url, path: &Path) -> FollowResult<u64> {
    let data = client.segment(url).await?;
    save_segment(path, &data).await
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending().await,
    }
}

async fn expired(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
