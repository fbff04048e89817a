//! `MessageSystem`: the process root (spec.md §4.13). Owns the `Kernel`,
//! starts/stops the scheduler's background tick loop, and exposes the
//! top-level `send`/`sendPooled` surface a host binary calls before any
//! subsystem-scoped identity exists.

use std::sync::Arc;

use mycelia_core::config::{MessageSystemConfig, SubsystemConfig};
use mycelia_core::error::Result;
use mycelia_core::message::{Message, PoolStats};
use mycelia_core::security::{Pkr, SendOptions};
use mycelia_rpc::RegisterChannelOpts;
use mycelia_runtime::SchedulerHandle;

use crate::kernel::Kernel;
use crate::subsystem::Subsystem;

/// Process root. Grounded in the teacher's `AppBuilder`/`App`: a single
/// owning handle a host binary builds once at startup and disposes once at
/// shutdown, wrapping a background task (there: the Axum server loop; here:
/// the scheduler's round-robin loop).
pub struct MessageSystem {
    kernel: Arc<Kernel>,
    scheduler_handle: std::sync::Mutex<Option<SchedulerHandle>>,
}

impl MessageSystem {
    /// `bootstrap()`: builds the kernel (principal registry, channel manager,
    /// response manager, request engine, message pool, scheduler) and starts
    /// the scheduler's background loop immediately, matching the teacher's
    /// `App::bootstrap` starting its listener loop before returning.
    pub fn bootstrap(config: MessageSystemConfig) -> Result<Self> {
        let kernel = Kernel::bootstrap(config)?;
        let handle = kernel.scheduler().start();
        Ok(MessageSystem {
            kernel,
            scheduler_handle: std::sync::Mutex::new(Some(handle)),
        })
    }

    /// `registerSubsystem(sub)`: see `Kernel::register_subsystem` for the
    /// identity-wiring and scheduler-attach steps.
    pub async fn register_subsystem(&self, name: impl Into<String>, config: SubsystemConfig) -> Result<Arc<Subsystem<Kernel>>> {
        self.kernel.register_subsystem(name, config).await
    }

    pub fn get_subsystem(&self, name: &str) -> Option<Arc<Subsystem<Kernel>>> {
        self.kernel.get_subsystem(name)
    }

    pub fn register_channel(&self, route: impl Into<String>, owner: Pkr, opts: RegisterChannelOpts) -> Result<()> {
        self.kernel.register_channel(route, owner, opts)
    }

    /// `send(message)`: a top-level send made under the kernel's own
    /// authority, for callers that have no subsystem identity of their own
    /// (an embedding host reacting to an external event, for instance).
    /// Subsystems and request builders reach `sendProtected` through their
    /// own `identity`, not through this method.
    pub async fn send(&self, msg: Message) -> Result<()> {
        let caller = self.kernel.kernel_pkr_owned();
        self.kernel.send_protected(caller, msg, SendOptions::default()).await
    }

    /// `sendPooled(path, body)`.
    pub async fn send_pooled(&self, path: impl Into<String>, body: serde_json::Value) -> Result<()> {
        let caller = self.kernel.kernel_pkr_owned();
        self.kernel.send_pooled_protected(caller, path.into(), body, SendOptions::default()).await
    }

    /// `getKernel()` (debug-only, per spec.md §6): exposed unconditionally
    /// here since Rust has no runtime debug-build gate worth emulating with
    /// a cfg flag a downstream crate could not otherwise reach; callers are
    /// expected to treat it as an escape hatch, not part of the stable API.
    pub fn get_kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub async fn get_pool_stats(&self) -> PoolStats {
        self.kernel.pool_stats().await
    }

    pub async fn warmup_pool(&self, n: usize) {
        self.kernel.warmup_pool(n).await;
    }

    /// `dispose()`: stop the scheduler loop first so no tick races a
    /// subsystem being torn down, then dispose every subsystem depth-first
    /// is unnecessary here (subsystems don't nest), so disposal order is
    /// simply "all of them".
    pub async fn dispose(&self) {
        if let Some(handle) = self.scheduler_handle.lock().expect("scheduler handle lock poisoned").take() {
            handle.cancel();
        }
        let names: Vec<String> = self.kernel.subsystem_names();
        for name in names {
            self.kernel.dispose_subsystem(&name).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mycelia_core::config::{MatchPolicy, OverflowPolicy};

    fn test_config() -> MessageSystemConfig {
        MessageSystemConfig {
            pool_size: 16,
            warmup_on_boot: false,
            debug: true,
            time_slice_ms: 5,
            default_queue_capacity: 32,
            response_default_timeout_ms: 200,
            response_max_pending: 64,
            match_policy: MatchPolicy::Longest,
        }
    }

    fn queue_config() -> SubsystemConfig {
        SubsystemConfig {
            queue_capacity: 32,
            overflow_policy: OverflowPolicy::Reject,
            time_slice_ms: None,
        }
    }

    #[tokio::test]
    async fn bootstrap_registers_and_routes_through_background_scheduler() {
        let system = MessageSystem::bootstrap(test_config()).unwrap();
        let sub = system.register_subsystem("orders", queue_config()).await.unwrap();
        sub.register_route(
            "orders://ping",
            std::sync::Arc::new(|_msg, _params, _opts| Box::pin(async move { Ok(serde_json::json!({"pong": true})) })),
        )
        .unwrap();

        system.send_pooled("orders://ping", serde_json::Value::Null).await.unwrap();

        let mut processed = 0;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            processed = sub.processor_stats().await.processed;
            if processed > 0 {
                break;
            }
        }
        assert_eq!(processed, 1);
        system.dispose().await;
    }

    #[tokio::test]
    async fn dispose_stops_scheduler_and_clears_subsystems() {
        let system = MessageSystem::bootstrap(test_config()).unwrap();
        system.register_subsystem("orders", queue_config()).await.unwrap();
        system.dispose().await;
        assert!(system.get_subsystem("orders").is_none());
    }

    #[tokio::test]
    async fn warmed_up_pool_reuses_instead_of_allocating() {
        let system = MessageSystem::bootstrap(test_config()).unwrap();
        system.register_subsystem("orders", queue_config()).await.unwrap();
        system.warmup_pool(4).await;
        system.send_pooled("orders://ping", serde_json::Value::Null).await.unwrap();
        let stats = system.get_pool_stats().await;
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.created, 0);
        system.dispose().await;
    }
}
