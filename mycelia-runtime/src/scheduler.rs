//! Cooperative, single-threaded round-robin scheduler (spec.md §4.8).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// A subsystem's tick entry point. Object-safe (boxed future) so the
/// scheduler can hold a heterogeneous list of subsystems, mirroring how the
/// teacher's `SchedulerHandle` wraps a `CancellationToken` behind a stable,
/// dyn-friendly handle rather than exposing generic subsystem types.
pub trait Tickable: Send + Sync {
    fn tick<'a>(&'a self, time_slice_ms: u64) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
    fn name(&self) -> &str;
}

/// Handle returned by `Scheduler::start`; mirrors the teacher's
/// `SchedulerHandle` (a `CancellationToken` wrapper exposing `cancel`/
/// `is_cancelled`).
#[derive(Clone)]
pub struct SchedulerHandle {
    cancel: CancellationToken,
}

impl SchedulerHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Holds the set of active subsystems and, on each tick, calls
/// `process(time_slice_ms)` on each in round-robin (spec.md §4.8).
/// `start()`/`stop()` are idempotent.
pub struct Scheduler {
    subsystems: RwLock<Vec<Arc<dyn Tickable>>>,
    time_slice_ms: u64,
    cancel: CancellationToken,
    running: std::sync::atomic::AtomicBool,
}

impl Scheduler {
    pub fn new(time_slice_ms: u64) -> Self {
        Scheduler {
            subsystems: RwLock::new(Vec::new()),
            time_slice_ms,
            cancel: CancellationToken::new(),
            running: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub async fn attach(&self, subsystem: Arc<dyn Tickable>) {
        self.subsystems.write().await.push(subsystem);
    }

    pub async fn detach(&self, name: &str) {
        self.subsystems.write().await.retain(|s| s.name() != name);
    }

    /// Run exactly one round-robin pass over every attached subsystem. Used
    /// directly by tests and by `mycelia-test::TestSystem::tick` for
    /// deterministic, non-background-task scheduling.
    pub async fn tick_once(&self) {
        let subsystems = self.subsystems.read().await;
        for subsystem in subsystems.iter() {
            subsystem.tick(self.time_slice_ms).await;
        }
    }

    /// Idempotent: calling `start` while already running is a no-op and
    /// returns the existing handle's cancellation token semantics.
    pub fn start(self: &Arc<Self>) -> SchedulerHandle {
        if self
            .running
            .compare_exchange(false, true, std::sync::atomic::Ordering::SeqCst, std::sync::atomic::Ordering::SeqCst)
            .is_ok()
        {
            let this = Arc::clone(self);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = this.tick_once() => {}
                    }
                }
                tracing::debug!("scheduler loop stopped");
            });
        }
        SchedulerHandle { cancel: self.cancel.clone() }
    }

    /// Idempotent: calling `stop` more than once is harmless.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.running.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn time_slice_ms(&self) -> u64 {
        self.time_slice_ms
    }
}
