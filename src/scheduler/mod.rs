//! Scheduler module: one repeating probe loop per target.
//!
//! Each target gets its own timer task. Every tick dispatches a probe on a
//! separate task; completed probes are applied to the [`FailureTracker`]
//! under a single lock, which also serializes them against stop and
//! reschedule. A tick that finds the previous probe of the same target still
//! outstanding is skipped, so at most one probe per target is ever in flight.

mod events;
mod failure_log;
mod tracker;

pub use events::*;
pub use failure_log::*;
pub use tracker::*;

use crate::db::{FailureLogEntry, TargetConfig, TargetId};
use crate::probe::{ProbeOutcome, ProbeRequest, Prober, DEFAULT_PROBE_TIMEOUT};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock, Semaphore};
use tokio::task::JoinHandle;

/// A target whose timer task is running.
struct RunningTarget {
    generation: u64,
    stop_tx: broadcast::Sender<()>,
}

#[derive(Default)]
struct TrackerState {
    tracker: FailureTracker,
    latest: HashMap<TargetId, StatusUpdate>,
    subscribers: Vec<mpsc::UnboundedSender<MonitorEvent>>,
}

impl TrackerState {
    /// Send to every live subscriber, dropping the ones that hung up.
    fn publish(&mut self, event: MonitorEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Everything a completed probe touches.
struct Shared {
    state: Mutex<TrackerState>,
    failure_log: Arc<FailureLog>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one probe result. Results for removed or rescheduled targets
    /// are dropped.
    fn apply(&self, target_id: TargetId, generation: u64, outcome: ProbeOutcome) {
        let now = Utc::now();
        let mut state = self.lock();

        let transition = match state.tracker.record(target_id, generation, outcome) {
            Some(t) => t,
            None => {
                tracing::debug!("Scheduler: Discarding stale result for target {}", target_id);
                return;
            }
        };

        // Queued under the lock so entries keep probe order
        if !outcome.reachable {
            self.failure_log
                .append(FailureLogEntry::for_target(&transition.target, now));
        }

        let status = StatusUpdate {
            target_id,
            reachable: outcome.reachable,
            latency_ms: outcome.latency_ms,
            consecutive_failures: transition.consecutive_failures,
            time: now,
        };
        state.latest.insert(target_id, status.clone());
        state.publish(MonitorEvent::Status(status));

        if transition.alert {
            let target = transition.target;
            state.publish(MonitorEvent::Alert(Alert {
                target_id,
                name: target.name,
                address: target.address,
                port: target.port,
                threshold: target.max_consecutive_failures,
                time: now,
            }));
        }
    }
}

/// The main scheduler that orchestrates probe execution.
pub struct Scheduler {
    prober: Arc<dyn Prober>,
    probe_timeout: Duration,
    shared: Arc<Shared>,
    stop_chans: RwLock<HashMap<TargetId, RunningTarget>>,
    next_generation: AtomicU64,
}

impl Scheduler {
    /// Create a scheduler with no targets.
    pub fn new(prober: Arc<dyn Prober>, failure_log: Arc<FailureLog>) -> Self {
        Self {
            prober,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            shared: Arc::new(Shared {
                state: Mutex::new(TrackerState::default()),
                failure_log,
            }),
            stop_chans: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Start monitoring a target. The first probe fires immediately.
    ///
    /// Returns `false` if the target is already scheduled.
    pub async fn start(&self, target: TargetConfig) -> bool {
        let mut stop_chans = self.stop_chans.write().await;

        if stop_chans.contains_key(&target.id) {
            return false;
        }

        self.spawn_locked(&mut stop_chans, target);
        true
    }

    /// Stop monitoring a target and drop its failure state.
    ///
    /// A probe already in flight finishes, but its result is discarded.
    /// Returns `false` if the target was not scheduled.
    pub async fn stop(&self, id: TargetId) -> bool {
        let mut stop_chans = self.stop_chans.write().await;

        let running = stop_chans.remove(&id);
        if let Some(running) = &running {
            let _ = running.stop_tx.send(());
        }

        let mut state = self.shared.lock();
        state.tracker.forget(id);
        state.latest.remove(&id);
        drop(state);

        if running.is_some() {
            tracing::info!("Scheduler: Removed target {}", id);
        }
        running.is_some()
    }

    /// Replace a target's config, resetting its failure streak.
    ///
    /// The old timer is stopped before the new one starts, with no await in
    /// between, so only one timer is ever registered for the target.
    pub async fn reschedule(&self, target: TargetConfig) {
        let mut stop_chans = self.stop_chans.write().await;

        if let Some(old) = stop_chans.remove(&target.id) {
            let _ = old.stop_tx.send(());
            tracing::debug!(
                "Scheduler: Stopped generation {} of target {}",
                old.generation,
                target.id
            );
        }
        self.shared.lock().latest.remove(&target.id);

        self.spawn_locked(&mut stop_chans, target);
    }

    /// Stop every target.
    pub async fn shutdown(&self) {
        let mut stop_chans = self.stop_chans.write().await;
        let mut state = self.shared.lock();

        for (id, running) in stop_chans.drain() {
            let _ = running.stop_tx.send(());
            state.tracker.forget(id);
            state.latest.remove(&id);
        }

        tracing::info!("Scheduler: Shut down");
    }

    fn spawn_locked(&self, stop_chans: &mut HashMap<TargetId, RunningTarget>, target: TargetConfig) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (stop_tx, stop_rx) = broadcast::channel(1);

        // Tracker state exists before the first tick can complete
        self.shared.lock().tracker.track(target.clone(), generation);
        stop_chans.insert(
            target.id,
            RunningTarget {
                generation,
                stop_tx,
            },
        );

        tracing::info!(
            "Scheduler: Adding target {} ({}) every {} ms",
            target.name,
            target.endpoint(),
            target.interval_ms
        );

        let run = ProbeLoop {
            request: ProbeRequest {
                address: target.address.clone(),
                port: target.port,
                kind: target.probe_kind,
                timeout: self.probe_timeout,
            },
            target,
            generation,
            prober: self.prober.clone(),
            shared: self.shared.clone(),
        };
        tokio::spawn(run.run(stop_rx));
    }

    // --- Queries ---

    pub async fn is_scheduled(&self, id: TargetId) -> bool {
        self.stop_chans.read().await.contains_key(&id)
    }

    pub async fn scheduled_count(&self) -> usize {
        self.stop_chans.read().await.len()
    }

    pub fn consecutive_failures(&self, id: TargetId) -> Option<u32> {
        self.shared.lock().tracker.consecutive_failures(id)
    }

    /// Most recent status of a target, if it has completed a probe.
    pub fn latest_status(&self, id: TargetId) -> Option<StatusUpdate> {
        self.shared.lock().latest.get(&id).cloned()
    }

    /// Most recent status of every target, ordered by target ID.
    pub fn statuses(&self) -> Vec<StatusUpdate> {
        let mut statuses: Vec<_> = self.shared.lock().latest.values().cloned().collect();
        statuses.sort_by_key(|s| s.target_id);
        statuses
    }

    // --- Events ---

    /// Receive every status update and alert in the order they were
    /// produced. The channel is unbounded, so a slow reader loses nothing.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MonitorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.lock().subscribers.push(tx);
        rx
    }

    /// Call `callback` for every status update.
    pub fn on_status_update<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(StatusUpdate) + Send + 'static,
    {
        self.forward(move |event| {
            if let MonitorEvent::Status(s) = event {
                callback(s);
            }
        })
    }

    /// Call `callback` for every alert.
    pub fn on_alert<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(Alert) + Send + 'static,
    {
        self.forward(move |event| {
            if let MonitorEvent::Alert(a) = event {
                callback(a);
            }
        })
    }

    fn forward<F>(&self, handler: F) -> JoinHandle<()>
    where
        F: Fn(MonitorEvent) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event);
            }
        })
    }
}

/// The timer task of one target generation.
struct ProbeLoop {
    target: TargetConfig,
    request: ProbeRequest,
    generation: u64,
    prober: Arc<dyn Prober>,
    shared: Arc<Shared>,
}

impl ProbeLoop {
    async fn run(self, mut stop_rx: broadcast::Receiver<()>) {
        let interval_duration = Duration::from_millis(self.target.interval_ms.max(1));

        // One permit: a tick is skipped while the previous probe is outstanding
        let in_flight = Arc::new(Semaphore::new(1));

        // The first tick completes immediately
        let mut interval = tokio::time::interval(interval_duration);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.recv() => {
                    break;
                }
                _ = interval.tick() => {
                    let permit = match in_flight.clone().try_acquire_owned() {
                        Ok(p) => p,
                        Err(_) => {
                            tracing::debug!(
                                "Skipping probe for {}: previous probe still running",
                                self.target.name
                            );
                            continue;
                        }
                    };

                    let prober = self.prober.clone();
                    let shared = self.shared.clone();
                    let request = self.request.clone();
                    let target_id = self.target.id;
                    let generation = self.generation;

                    tokio::spawn(async move {
                        let _permit = permit;
                        let outcome = prober.probe(request).await;
                        shared.apply(target_id, generation, outcome);
                    });
                }
            }
        }

        tracing::debug!(
            "Scheduler: Probe loop for target {} (generation {}) exited",
            self.target.id,
            self.generation
        );
    }
}
