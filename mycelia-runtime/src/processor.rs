//! Per-subsystem `accept`/`process` (spec.md §4.8).

use std::future::Future;
use std::time::{Duration, Instant};

use mycelia_core::config::SubsystemConfig;
use mycelia_core::error::{MyceliaError, Result};
use mycelia_core::message::Message;
use mycelia_core::security::SendOptions;

use crate::queue::{CircularBuffer, EnqueueOutcome};

/// The seam a subsystem implements so `Processor::process` can dispatch a
/// dequeued message through that subsystem's router without this crate
/// depending on the router's type. Returns the handler-defined value per
/// spec.md §4.7 ("not meaningful for fire-and-forget").
pub trait SubsystemRuntimeHost: Send + Sync {
    fn dispatch(&self, msg: Message, opts: SendOptions) -> impl Future<Output = Result<serde_json::Value>> + Send;

    /// Called when `dispatch` returns an error, so the host can emit a
    /// synthetic error response if the message required one.
    fn on_handler_error(&self, msg: &Message, opts: &SendOptions, err: &MyceliaError) -> impl Future<Output = ()> + Send;

    /// Called once per dequeued message, success or error alike, for
    /// messages stamped `from_pool` — the processor's half of spec.md §4.6's
    /// scoped `pool.release(msg)` guard, deferred from the send call to
    /// here since a pool-acquired message can sit queued, unprocessed,
    /// between `accept` and `process`. No-op by default.
    fn release_pooled(&self, _msg: Message) -> impl Future<Output = ()> + Send {
        async {}
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessorStats {
    pub accepted: u64,
    pub rejected_full: u64,
    pub rejected_paused: u64,
    pub dropped_oldest: u64,
    pub dropped_newest: u64,
    pub processed: u64,
    pub handler_errors: u64,
}

/// Owns the bounded queue and pause/resume state for one subsystem.
pub struct Processor {
    queue: CircularBuffer<(Message, SendOptions)>,
    paused: bool,
    accept_while_paused: bool,
    stats: ProcessorStats,
}

impl Processor {
    pub fn new(config: &SubsystemConfig) -> Self {
        Processor {
            queue: CircularBuffer::new(config.queue_capacity, config.overflow_policy),
            paused: false,
            accept_while_paused: false,
            stats: ProcessorStats::default(),
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats
    }

    pub fn queue_len(&self) -> usize {
        self.queue.size()
    }

    /// Validate and enqueue `(msg, opts)`. Validation here is limited to the
    /// invariants this crate can check without a router (non-empty id,
    /// non-empty path string); path grammar validation happens earlier, in
    /// `Kernel::send_protected` via `Path::parse`.
    pub fn accept(&mut self, msg: Message, opts: SendOptions) -> Result<()> {
        if msg.id().is_empty() || msg.path().is_empty() {
            return Err(MyceliaError::InvalidPath {
                path: msg.path().to_string(),
            });
        }
        if self.paused && !self.accept_while_paused {
            self.stats.rejected_paused += 1;
            return Err(MyceliaError::Paused {
                subsystem: subsystem_of(msg.path()),
            });
        }
        let path = msg.path().to_string();
        match self.queue.enqueue((msg, opts)) {
            EnqueueOutcome::Enqueued => {
                self.stats.accepted += 1;
                Ok(())
            }
            EnqueueOutcome::EnqueuedDroppingOldest => {
                self.stats.accepted += 1;
                self.stats.dropped_oldest += 1;
                Ok(())
            }
            EnqueueOutcome::DroppedNewest => {
                self.stats.dropped_newest += 1;
                Ok(())
            }
            EnqueueOutcome::RejectedFull => {
                self.stats.rejected_full += 1;
                Err(MyceliaError::QueueFull {
                    subsystem: subsystem_of(&path),
                })
            }
        }
    }

    /// Dequeue and dispatch messages until either the queue drains or the
    /// elapsed wall time exceeds `time_slice_ms`. Handler errors never
    /// poison the loop: they are caught, surfaced to the host for an
    /// optional error response, and recorded in statistics.
    pub async fn process<H: SubsystemRuntimeHost>(&mut self, time_slice_ms: u64, host: &H) -> ProcessorStats {
        let deadline = Duration::from_millis(time_slice_ms);
        let started = Instant::now();
        loop {
            if started.elapsed() >= deadline {
                break;
            }
            let Some((msg, opts)) = self.queue.dequeue() else {
                break;
            };
            self.stats.processed += 1;
            let msg_for_error = msg.clone();
            let opts_for_error = opts.clone();
            let from_pool = opts.from_pool;
            if let Err(err) = host.dispatch(msg, opts).await {
                self.stats.handler_errors += 1;
                host.on_handler_error(&msg_for_error, &opts_for_error, &err).await;
            }
            if from_pool {
                host.release_pooled(msg_for_error).await;
            }
        }
        self.stats
    }
}

fn subsystem_of(path: &str) -> String {
    path.split("://").next().unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mycelia_core::config::OverflowPolicy;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct CountingHost {
        processed: Arc<AtomicU64>,
        fail_first: Arc<AtomicU64>,
    }

    impl SubsystemRuntimeHost for CountingHost {
        async fn dispatch(&self, _msg: Message, _opts: SendOptions) -> Result<serde_json::Value> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(MyceliaError::HandlerError {
                    inner: "boom".to_string(),
                });
            }
            Ok(serde_json::Value::Null)
        }

        async fn on_handler_error(&self, _msg: &Message, _opts: &SendOptions, _err: &MyceliaError) {}
    }

    #[tokio::test]
    async fn processes_in_fifo_order_within_time_slice() {
        let config = SubsystemConfig {
            queue_capacity: 8,
            overflow_policy: OverflowPolicy::Reject,
            time_slice_ms: None,
        };
        let mut proc = Processor::new(&config);
        for i in 0..4 {
            proc.accept(Message::new(format!("api://item/{i}"), serde_json::Value::Null), SendOptions::default())
                .unwrap();
        }
        let host = CountingHost {
            processed: Arc::new(AtomicU64::new(0)),
            fail_first: Arc::new(AtomicU64::new(0)),
        };
        let stats = proc.process(50, &host).await;
        assert_eq!(stats.processed, 4);
        assert_eq!(proc.queue_len(), 0);
    }

    #[tokio::test]
    async fn handler_errors_do_not_abort_the_loop() {
        let config = SubsystemConfig::default();
        let mut proc = Processor::new(&config);
        for i in 0..3 {
            proc.accept(Message::new(format!("api://item/{i}"), serde_json::Value::Null), SendOptions::default())
                .unwrap();
        }
        let host = CountingHost {
            processed: Arc::new(AtomicU64::new(0)),
            fail_first: Arc::new(AtomicU64::new(2)),
        };
        let stats = proc.process(50, &host).await;
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.handler_errors, 2);
    }

    #[test]
    fn paused_subsystem_rejects_accept_by_default() {
        let config = SubsystemConfig::default();
        let mut proc = Processor::new(&config);
        proc.pause();
        let result = proc.accept(Message::new("api://x", serde_json::Value::Null), SendOptions::default());
        assert!(matches!(result, Err(MyceliaError::Paused { .. })));
    }

    #[test]
    fn queue_full_under_reject_policy_surfaces_error() {
        let config = SubsystemConfig {
            queue_capacity: 1,
            overflow_policy: OverflowPolicy::Reject,
            time_slice_ms: None,
        };
        let mut proc = Processor::new(&config);
        proc.accept(Message::new("api://a", serde_json::Value::Null), SendOptions::default())
            .unwrap();
        let result = proc.accept(Message::new("api://b", serde_json::Value::Null), SendOptions::default());
        assert!(matches!(result, Err(MyceliaError::QueueFull { .. })));
    }
}
