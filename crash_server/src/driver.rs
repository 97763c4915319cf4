// Tick driver: owns the engine on its own task and fans snapshots out.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use crash_core::{Clock, RoundEngine, SeedSource, Snapshot};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Capacity of the per-emission broadcast channel.
const FANOUT_CAPACITY: usize = 256;

/// Clock backed by tokio's timer, so paused-time tests move it too.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Read-only, cloneable view of a running engine's output.
#[derive(Clone)]
pub struct SnapshotFeed {
    latest: watch::Receiver<Snapshot>,
    updates: broadcast::Sender<Snapshot>,
}

impl SnapshotFeed {
    /// Latest snapshot, without waiting.
    pub fn snapshot(&self) -> Snapshot {
        self.latest.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.latest.clone()
    }

    /// Every snapshot emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.updates.subscribe()
    }
}

/// Handle to a running engine. The engine task is the single writer.
pub struct EngineTask {
    feed: SnapshotFeed,
    shutdown: oneshot::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl EngineTask {
    pub fn spawn<C, S>(mut engine: RoundEngine<C, S>, tick_interval: Duration) -> Self
    where
        C: Clock + 'static,
        S: SeedSource + 'static,
    {
        let (latest_tx, latest) = watch::channel(engine.snapshot());
        let (updates, _) = broadcast::channel(FANOUT_CAPACITY);
        let fanout = updates.clone();
        engine.subscribe(move |snap| {
            latest_tx.send_replace(snap.clone());
            // nobody listening is fine
            let _ = fanout.send(snap.clone());
        });

        let (shutdown, mut stop) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(round_id = engine.round_id(), ?tick_interval, "engine started");
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = interval.tick() => engine.tick(),
                }
            }
            info!(round_id = engine.round_id(), phase = ?engine.phase(), "engine stopped");
        });

        EngineTask {
            feed: SnapshotFeed { latest, updates },
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn feed(&self) -> SnapshotFeed {
        self.feed.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.feed.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.feed.subscribe()
    }

    /// Resolves only if the engine task ends without being stopped, which
    /// means an invariant check panicked. Safe to cancel and call again.
    pub async fn failed(&mut self) -> anyhow::Error {
        let Some(handle) = self.handle.as_mut() else {
            return std::future::pending().await;
        };
        let res = handle.await;
        self.handle = None;
        match res {
            Err(e) => anyhow::Error::new(e).context("engine task failed"),
            Ok(()) => anyhow!("engine task exited unexpectedly"),
        }
    }

    /// Halt the scheduler and wait for the task. A panic inside the engine
    /// surfaces here as an error.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle {
            handle.await.context("engine task failed")?;
        }
        Ok(())
    }
}
