//! Per-venue supervisor
//!
//! Keeps one adapter alive for the whole process: every terminal error is
//! logged, followed by a fixed cooldown and a fresh session. One failing
//! venue never affects the others.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::Sender;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::oracle::sources::CandleSource;
use crate::types::CandleObservation;

/// Cooldown between a failed session and the next attempt
pub const DEFAULT_RESTART_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Supervisor {
    assets: Vec<String>,
    tx: Sender<CandleObservation>,
    cooldown: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    pub fn new(
        assets: Vec<String>,
        tx: Sender<CandleObservation>,
        cooldown: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            assets,
            tx,
            cooldown,
            shutdown,
        }
    }

    /// Run one venue until shutdown or a non-retryable failure.
    ///
    /// Returns the number of sessions started.
    pub async fn supervise(&self, source: Arc<dyn CandleSource>) -> u32 {
        let mut shutdown = self.shutdown.clone();
        let mut sessions = 0u32;

        loop {
            if *shutdown.borrow() || source.is_closed() {
                break;
            }

            sessions = sessions.saturating_add(1);
            tracing::info!(venue = %source.name(), session = sessions, "Starting candle session");

            let result = tokio::select! {
                result = source.run(&self.assets, &self.tx) => result,
                _ = shutdown.changed() => {
                    source.close();
                    break;
                }
            };

            match result {
                Ok(()) if self.tx.is_closed() => {
                    tracing::warn!(venue = %source.name(), "Queue closed, supervisor exiting");
                    break;
                }
                Ok(()) => {
                    tracing::warn!(venue = %source.name(), "Candle session ended");
                }
                Err(e) if !e.is_retryable() => {
                    tracing::error!(venue = %source.name(), error = %e, "Venue cannot be started, giving up");
                    break;
                }
                Err(e) => {
                    tracing::error!(venue = %source.name(), error = %e, "Candle session failed");
                }
            }

            tracing::info!(
                venue = %source.name(),
                cooldown_secs = self.cooldown.as_secs_f64(),
                "Restarting after cooldown"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.cooldown) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!(venue = %source.name(), sessions, "Supervisor stopped");
        sessions
    }

    /// Spawn one supervised task per source
    pub fn spawn_all(&self, sources: Vec<Arc<dyn CandleSource>>) -> JoinSet<u32> {
        let mut tasks = JoinSet::new();
        for source in sources {
            let supervisor = self.clone();
            tasks.spawn(async move { supervisor.supervise(source).await });
        }
        tasks
    }
}
