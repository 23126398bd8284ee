//! Publish-run lifecycle: the phase machine's event types, the observer seam
//! the Archiver reports through, and the Progress Watcher that owns the
//! single authoritative [`PublishRun`] record.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::contract::EventSink;
use crate::error::{EngineError, Result};

/// Linear phase machine of one publish run; no branching except the optional
/// asset leg and the terminal stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    None,
    LoadStart,
    LoadEnd,
    XformStart,
    XformEnd,
    ZipDataStart,
    ZipDataEnd,
    UploadDataStart,
    UploadDataEnd,
    ZipAssetsStart,
    /// Emitted once per asset retrieved, carrying the running counter.
    AssetLoaded,
    ZipAssetsEnd,
    UploadAssetsStart,
    UploadAssetsEnd,
    AssetsSkipped,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunResult {
    Success,
    Failure,
}

/// One progress event; payload fields are populated per phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseEvent {
    pub phase: Phase,
    /// Per-entity-type record counts; `LoadEnd` only.
    pub entity_counts: Option<BTreeMap<String, u64>>,
    /// `(done, total)` running counter; asset phases only.
    pub asset_progress: Option<(u64, u64)>,
    /// Terminal outcome; `Stopped` only.
    pub result: Option<RunResult>,
    /// Rendered error message; `Stopped` with `Failure` only.
    pub error: Option<String>,
}

impl PhaseEvent {
    pub fn of(phase: Phase) -> Self {
        Self {
            phase,
            entity_counts: None,
            asset_progress: None,
            result: None,
            error: None,
        }
    }

    pub fn loaded(entity_counts: BTreeMap<String, u64>) -> Self {
        Self {
            entity_counts: Some(entity_counts),
            ..Self::of(Phase::LoadEnd)
        }
    }

    pub fn asset_loaded(done: u64, total: u64) -> Self {
        Self {
            asset_progress: Some((done, total)),
            ..Self::of(Phase::AssetLoaded)
        }
    }

    pub fn stopped(result: RunResult, error: Option<String>) -> Self {
        Self {
            result: Some(result),
            error,
            ..Self::of(Phase::Stopped)
        }
    }
}

/// Explicit observer seam: the Archiver reports to whoever owns it, instead
/// of a module-level emitter.
#[async_trait]
pub trait PhaseObserver: Send + Sync {
    async fn on_phase(&self, event: &PhaseEvent);
}

/// The in-flight or last-completed publish run.
#[derive(Debug, Clone, Serialize)]
pub struct PublishRun {
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub last_update_at: DateTime<Utc>,
    pub result: Option<RunResult>,
    pub error: Option<String>,
    pub assets_total: u64,
    pub assets_done: u64,
}

impl Default for PublishRun {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            phase: Phase::None,
            started_at: now,
            last_update_at: now,
            result: None,
            error: None,
            assets_total: 0,
            assets_done: 0,
        }
    }
}

/// Readable status surface: whether a run is active plus the run record.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub active: bool,
    pub status: PublishRun,
}

/// [`EventSink`] adapter that mirrors progress into the structured log,
/// for callers without a real broadcast channel (the CLI, tests).
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn publish(&self, event: &PhaseEvent) {
        info!(
            phase = ?event.phase,
            asset_progress = ?event.asset_progress,
            result = ?event.result,
            "Publish progress"
        );
    }
}

struct WatcherState {
    active: bool,
    run: PublishRun,
}

/// Keeps exactly one [`PublishRun`], rejects overlapping runs, and mirrors
/// every event to the broadcast sink.
pub struct ProgressWatcher<S: EventSink> {
    sink: S,
    state: Mutex<WatcherState>,
}

impl<S: EventSink> ProgressWatcher<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            state: Mutex::new(WatcherState {
                active: false,
                run: PublishRun::default(),
            }),
        }
    }

    /// Check-and-set the single-run guard. Fails with `Conflict` — and
    /// changes nothing — while a run is active. Interactive and scheduled
    /// runs both go through here.
    pub fn begin(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.active {
            return Err(EngineError::Conflict);
        }
        state.active = true;
        state.run = PublishRun::default();
        info!("Publish run guard acquired");
        Ok(())
    }

    pub fn status(&self) -> RunStatus {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        RunStatus {
            active: state.active,
            status: state.run.clone(),
        }
    }
}

#[async_trait]
impl<S: EventSink> PhaseObserver for ProgressWatcher<S> {
    async fn on_phase(&self, event: &PhaseEvent) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let run = &mut state.run;
            run.phase = event.phase;
            run.last_update_at = Utc::now();
            if let Some((done, total)) = event.asset_progress {
                run.assets_done = done;
                run.assets_total = total;
            }
            if event.phase == Phase::Stopped {
                run.result = event.result;
                run.error = event.error.clone();
                // The guard clears only on a terminal state.
                state.active = false;
            }
        }
        debug!(phase = ?event.phase, "Forwarding phase event to sink");
        self.sink.publish(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockEventSink;

    fn watcher(expected_events: usize) -> ProgressWatcher<MockEventSink> {
        let mut sink = MockEventSink::new();
        sink.expect_publish().times(expected_events).returning(|_| ());
        ProgressWatcher::new(sink)
    }

    #[tokio::test]
    async fn overlapping_runs_are_rejected_without_state_change() {
        let watcher = watcher(1);
        watcher.begin().unwrap();
        watcher.on_phase(&PhaseEvent::of(Phase::LoadStart)).await;

        let err = watcher.begin().unwrap_err();
        assert!(matches!(err, EngineError::Conflict));
        // The first run's record is unaffected by the rejected attempt.
        let status = watcher.status();
        assert!(status.active);
        assert_eq!(status.status.phase, Phase::LoadStart);
    }

    #[tokio::test]
    async fn guard_clears_only_on_terminal_phase() {
        let watcher = watcher(3);
        watcher.begin().unwrap();
        watcher.on_phase(&PhaseEvent::of(Phase::LoadStart)).await;
        watcher.on_phase(&PhaseEvent::of(Phase::UploadDataEnd)).await;
        assert!(watcher.status().active);

        watcher
            .on_phase(&PhaseEvent::stopped(
                RunResult::Failure,
                Some("upstream failure (502): Bad Gateway".into()),
            ))
            .await;
        let status = watcher.status();
        assert!(!status.active);
        assert_eq!(status.status.result, Some(RunResult::Failure));
        assert!(status.status.error.is_some());

        // A new run may start now.
        watcher.begin().unwrap();
    }

    #[tokio::test]
    async fn asset_counter_is_tracked_on_the_run_record() {
        let watcher = watcher(2);
        watcher.begin().unwrap();
        watcher.on_phase(&PhaseEvent::asset_loaded(3, 10)).await;
        watcher.on_phase(&PhaseEvent::asset_loaded(4, 10)).await;
        let status = watcher.status();
        assert_eq!(status.status.assets_done, 4);
        assert_eq!(status.status.assets_total, 10);
    }
}
