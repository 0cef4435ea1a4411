// Drives a session on its own OS thread and publishes complete snapshots

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreflowError, Result};
use crate::orchestrator::session::{Session, UpdateResults};
use crate::plugins::MonitoringConfig;
use crate::prom::SampleExporter;

/// One fully rendered tick, swapped in atomically for readers
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub sequence: u64,
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub results: UpdateResults,
}

pub type SnapshotReceiver = watch::Receiver<Option<Arc<Snapshot>>>;

/// A config switch and the channel its outcome is reported on
type SelectCommand = (&'static MonitoringConfig, oneshot::Sender<Result<()>>);

/// Polling loop on a dedicated thread
///
/// Affinity pinning applies to the calling OS thread, so every session
/// call happens on the one thread spawned here. Readers only ever see a
/// complete [`Snapshot`]; failed ticks publish nothing.
pub struct Poller {
    handle: Option<std::thread::JoinHandle<()>>,
    snapshots: SnapshotReceiver,
    commands: mpsc::UnboundedSender<SelectCommand>,
    cancel: CancellationToken,
}

impl Poller {
    /// Start polling `config` every `interval`
    ///
    /// Returns once the first initialization finished; its error, if any,
    /// is returned and no thread is left running.
    pub async fn spawn(
        session: Session,
        config: &'static MonitoringConfig,
        interval: Duration,
        exporter: Option<Arc<SampleExporter>>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let (snapshot_tx, snapshots) = watch::channel(None);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let loop_cancel = cancel.clone();
        let handle = std::thread::Builder::new()
            .name("coreflow-poller".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(CoreflowError::IoError(e)));
                        return;
                    }
                };
                runtime.block_on(poll_loop(PollLoop {
                    session,
                    config,
                    interval,
                    exporter,
                    cancel: loop_cancel,
                    snapshot_tx,
                    command_rx,
                    ready_tx,
                }));
            })?;

        let ready = ready_rx.await.unwrap_or_else(|_| {
            Err(CoreflowError::ConfigError(
                "poller thread exited before initializing".to_string(),
            ))
        });
        if let Err(e) = ready {
            if handle.join().is_err() {
                tracing::error!("Poller thread panicked");
            }
            return Err(e);
        }

        Ok(Self {
            handle: Some(handle),
            snapshots,
            commands,
            cancel,
        })
    }

    pub fn subscribe(&self) -> SnapshotReceiver {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.snapshots.borrow().clone()
    }

    /// Switch the live config and wait for it to be programmed
    ///
    /// On failure the previous config is programmed again and keeps
    /// publishing; if that fails too, the latest snapshot becomes `None`
    /// until a later switch succeeds.
    pub async fn select(&self, config: &'static MonitoringConfig) -> Result<()> {
        let stopped = || CoreflowError::NotInitialized("poller has stopped".to_string());
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands.send((config, reply_tx)).map_err(|_| stopped())?;
        reply_rx.await.map_err(|_| stopped())?
    }

    /// Cancel the loop and wait for the session to shut down
    pub fn stop(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Poller thread panicked");
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.join();
    }
}

struct PollLoop {
    session: Session,
    config: &'static MonitoringConfig,
    interval: Duration,
    exporter: Option<Arc<SampleExporter>>,
    cancel: CancellationToken,
    snapshot_tx: watch::Sender<Option<Arc<Snapshot>>>,
    command_rx: mpsc::UnboundedReceiver<SelectCommand>,
    ready_tx: oneshot::Sender<Result<()>>,
}

async fn poll_loop(state: PollLoop) {
    let PollLoop {
        mut session,
        config,
        interval,
        exporter,
        cancel,
        snapshot_tx,
        mut command_rx,
        ready_tx,
    } = state;

    let init = session.initialize(config);
    let failed = init.is_err();
    let _ = ready_tx.send(init);
    if failed {
        return;
    }

    tracing::warn!("Polling every {:?}", interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;
    let mut last = Instant::now();
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some((next, reply)) = command_rx.recv() => {
                let previous = session.config();
                let result = session.initialize(next);
                let fatal = matches!(&result, Err(e) if e.is_fatal());
                if let Err(e) = &result {
                    tracing::error!("Switching to '{}' failed: {}", next.name, e);
                    if !fatal {
                        restore(&mut session, previous, &snapshot_tx);
                    }
                }
                last = Instant::now();
                ticker.reset();
                let _ = reply.send(result);
                if fatal {
                    break;
                }
            }
            _ = ticker.tick(), if session.is_live() => {
                let now = Instant::now();
                let elapsed = now.duration_since(last);
                last = now;

                match session.update(elapsed) {
                    Ok(results) => {
                        sequence += 1;
                        if let Some(exporter) = &exporter {
                            exporter.publish(&results);
                        }
                        snapshot_tx.send_replace(Some(Arc::new(Snapshot {
                            sequence,
                            timestamp_ms: unix_millis(),
                            results,
                        })));
                    }
                    Err(e) => {
                        if let Some(exporter) = &exporter {
                            exporter.record_failure();
                        }
                        if e.is_fatal() {
                            tracing::error!("Polling stopped: {}", e);
                            break;
                        }
                        tracing::warn!("Tick abandoned: {}", e);
                    }
                }
            }
        }
    }

    if let Err(e) = session.shutdown() {
        tracing::warn!("Failed to disable counters: {}", e);
    }
    // Stops the rest of the agent when the loop ended on its own
    cancel.cancel();
    tracing::info!("Poller stopped after {} ticks", sequence);
}

/// Reprogram `previous` after a failed switch, or clear the snapshot
fn restore(
    session: &mut Session,
    previous: Option<&'static MonitoringConfig>,
    snapshot_tx: &watch::Sender<Option<Arc<Snapshot>>>,
) {
    let restored = match previous {
        Some(config) => match session.initialize(config) {
            Ok(()) => {
                tracing::warn!("Restored '{}'", config.name);
                true
            }
            Err(e) => {
                tracing::error!("Failed to restore '{}': {}", config.name, e);
                false
            }
        },
        None => false,
    };
    if !restored {
        snapshot_tx.send_replace(None);
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::arch::Family;
    use crate::common::topology::Topology;
    use crate::counters::CounterWidths;
    use crate::counters::{CounterProgram, EventSelectSpec};
    use crate::plugins::MetricContext;
    use crate::testing::{MockAffinity, MockDriver};
    use coreflow_raw::current_arch::core::msr;

    fn no_cells(_: &MetricContext<'_>) -> Vec<String> {
        Vec::new()
    }

    // PMC2-only event placed in slot 0
    static MISPLACED: MonitoringConfig = MonitoringConfig {
        name: "Misplaced",
        family: Family::Haswell,
        columns: &["Item"],
        help_text: "",
        program: CounterProgram::new([
            Some(
                EventSelectSpec::new(0xA3, 0x0C, "CYCLE_ACTIVITY.STALLS_L1D_PENDING")
                    .cmask(0x0C)
                    .only_in_slot(2),
            ),
            None,
            None,
            None,
        ]),
        fold_overrides: &[],
        formula: no_cells,
    };

    fn session(driver: &Arc<MockDriver>) -> Session {
        Session::new(
            driver.clone(),
            Box::new(MockAffinity::new(&[0, 1])),
            Arc::new(Topology::uniform(1, 1, 2).unwrap()),
            CounterWidths::default(),
        )
    }

    async fn next_snapshot(rx: &mut SnapshotReceiver) -> Arc<Snapshot> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                rx.changed().await.unwrap();
                if let Some(snapshot) = rx.borrow_and_update().clone() {
                    return snapshot;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_publishes_snapshots_and_switches_configs() {
        let driver = MockDriver::new();
        let branch = crate::plugins::find(Family::Haswell, "Branch Prediction").unwrap();
        let l2 = crate::plugins::find(Family::Haswell, "L2 Cache").unwrap();

        let poller = Poller::spawn(
            session(&driver),
            branch,
            Duration::from_millis(10),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let mut rx = poller.subscribe();

        let first = next_snapshot(&mut rx).await;
        assert_eq!(first.results.config, "Branch Prediction");
        assert_eq!(first.results.thread_rows.len(), 2);

        // Served as JSON straight from the shared snapshot
        let response = axum::response::IntoResponse::into_response(axum::Json(first.as_ref()));
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = String::from_utf8(body.to_vec()).unwrap();
        assert!(json.contains(r#""config":"Branch Prediction""#));
        assert!(json.contains(r#""family":"haswell""#));
        assert!(json.contains(r#""sequence":"#));

        poller.select(l2).await.unwrap();
        let mut snapshot = next_snapshot(&mut rx).await;
        while snapshot.results.config != "L2 Cache" {
            snapshot = next_snapshot(&mut rx).await;
        }
        assert!(snapshot.sequence > first.sequence);
        assert_eq!(driver.get(0, msr::IA32_PERFEVTSEL0), 0x43_FF24);

        poller.stop();
        assert_eq!(driver.get(0, msr::IA32_PERF_GLOBAL_CTRL), 0);
        assert_eq!(driver.get(1, msr::IA32_PERF_GLOBAL_CTRL), 0);
    }

    #[tokio::test]
    async fn test_rejected_switch_keeps_previous_config() {
        let driver = MockDriver::new();
        let branch = crate::plugins::find(Family::Haswell, "Branch Prediction").unwrap();
        let poller = Poller::spawn(
            session(&driver),
            branch,
            Duration::from_millis(10),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let mut rx = poller.subscribe();
        let before = next_snapshot(&mut rx).await;

        let result = poller.select(&MISPLACED).await;
        assert!(matches!(result, Err(CoreflowError::UnsupportedEvent(_))));

        let after = next_snapshot(&mut rx).await;
        assert!(after.sequence > before.sequence);
        assert_eq!(after.results.config, "Branch Prediction");
        assert_eq!(driver.get(0, msr::IA32_PERFEVTSEL0), 0x43_00C4);
        assert_eq!(driver.get(1, msr::IA32_PERF_GLOBAL_CTRL), 0x7_0000_000F);
    }

    #[tokio::test]
    async fn test_failed_switch_is_reported_and_clears_snapshot() {
        let driver = MockDriver::new();
        let branch = crate::plugins::find(Family::Haswell, "Branch Prediction").unwrap();
        let l2 = crate::plugins::find(Family::Haswell, "L2 Cache").unwrap();
        let poller = Poller::spawn(
            session(&driver),
            branch,
            Duration::from_millis(10),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let mut rx = poller.subscribe();
        next_snapshot(&mut rx).await;

        // Both the new and the previous config write this register
        driver.fail_address(msr::IA32_PERFEVTSEL1);
        let result = poller.select(l2).await;
        assert!(matches!(result, Err(CoreflowError::MsrError(_))));

        assert!(poller.latest().is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(poller.latest().is_none());
        assert_eq!(driver.get(0, msr::IA32_PERF_GLOBAL_CTRL), 0);
        assert_eq!(driver.get(1, msr::IA32_PERF_GLOBAL_CTRL), 0);
    }

    #[tokio::test]
    async fn test_initialization_failure_is_returned() {
        let driver = MockDriver::unavailable();
        let branch = crate::plugins::find(Family::Haswell, "Branch Prediction").unwrap();

        let result = Poller::spawn(
            session(&driver),
            branch,
            Duration::from_millis(10),
            None,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(CoreflowError::DriverUnavailable(_))));
        assert!(driver.writes().is_empty());
    }
}
