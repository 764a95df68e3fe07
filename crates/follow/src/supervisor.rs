use std::future::{pending, Future};

use tokio::{sync::oneshot, task::JoinSet};

use crate::{
    config::{SessionConfig, StreamSpec},
    error::FollowResult,
    session::StreamSession,
};

/// Owns every session of the process.
pub struct SessionSupervisor {
    config: SessionConfig,
    sessions: JoinSet<()>,
}

impl SessionSupervisor {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config: config.normalized(),
            sessions: JoinSet::new(),
        }
    }

    /// Start following `spec`. Must be called from within a tokio runtime.
    pub fn spawn(&mut self, spec: StreamSpec) -> FollowResult<()> {
        let session = StreamSession::new(spec, self.config.clone())?;
        self.sessions.spawn(session.run());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Run until every session ended or `shutdown` resolves.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                joined = self.sessions.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => log::error!("Session stopped unexpectedly: {e}"),
                    None => break,
                },
                _ = &mut shutdown => {
                    log::info!("Stopping {} session(s).", self.sessions.len());
                    self.sessions.shutdown().await;
                    break;
                }
            }
        }

        log::info!("All sessions ended.");
    }

    /// Run until every session ended or Ctrl-C is pressed.
    ///
    /// A second Ctrl-C exits the process immediately.
    pub async fn run(self) {
        let (stop_sender, stop_receiver) = oneshot::channel();
        let ctrlc_handler = tokio::spawn(async move {
            // wait for the first ctrl-c to stop sessions
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::warn!("Failed to listen for Ctrl-C: {e}");
                return;
            }
            log::info!("Ctrl-C received, stopping sessions.");
            _ = stop_sender.send(());

            // wait for the second ctrl-c to force exit
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Ctrl-C received again, force exit.");
                std::process::exit(1);
            }
        });

        self.run_until(async move {
            if stop_receiver.await.is_err() {
                // no signal handler, run until the sessions end
                pending::<()>().await;
            }
        })
        .await;

        ctrlc_handler.abort();
    }
}
