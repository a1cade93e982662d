//! Playback pacing

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::JitterBufferEngine;

/// Playout clock advanced by fixed ticks.
///
/// The clock is the media time observed at the last resync plus the ticks
/// counted since. It resyncs whenever arriving packets move the media time,
/// so it runs on its own only while the stream is silent.
#[derive(Debug, Clone, Default)]
pub struct PlaybackClock {
    synced_ms: Option<i64>,
    ticks: i64,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current playout time in milliseconds
    pub fn playout_ms(&self, current_ms: i64, tick_ms: i64) -> i64 {
        match self.synced_ms {
            Some(base) => base + self.ticks * tick_ms,
            None => current_ms,
        }
    }

    /// Count one tick, or resync if the media time moved
    pub fn advance(&mut self, current_ms: i64) {
        if self.synced_ms == Some(current_ms) {
            self.ticks += 1;
        } else {
            self.resync(current_ms);
        }
    }

    pub fn resync(&mut self, current_ms: i64) {
        self.synced_ms = Some(current_ms);
        self.ticks = 0;
    }

    pub fn ticks(&self) -> i64 {
        self.ticks
    }
}

/// Handle to a running playback task
#[derive(Debug)]
pub struct PlaybackHandle {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PlaybackHandle {
    /// Signal the task to stop and wait for it to exit
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Playback task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Spawn the fixed-interval playback loop for `engine`
pub(super) fn spawn(engine: JitterBufferEngine, tick: Duration) -> PlaybackHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("Playback loop started with {:?} tick", tick);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                    engine.playback_tick();
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Playback loop stopped");
    });

    PlaybackHandle {
        stop_tx,
        task: Some(task),
    }
}
