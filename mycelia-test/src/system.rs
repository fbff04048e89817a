//! `TestSystem`: a `Kernel` wrapper for deterministic tests — no background
//! scheduler task, just `tick()` driving exactly one round-robin pass.
//! Grounded in the teacher's `TestApp` (an in-process client wrapping a
//! `Router` via `tower::oneshot` instead of a bound TCP listener); here the
//! thing being bypassed is the scheduler's `tokio::spawn` loop rather than a
//! network socket.

use std::sync::Arc;

use mycelia::kernel::Kernel;
use mycelia::subsystem::Subsystem;
use mycelia_core::config::{MatchPolicy, MessageSystemConfig, SubsystemConfig};
use mycelia_core::error::Result;
use mycelia_core::message::Message;
use mycelia_core::security::SendOptions;

/// A small, fast default config: short time slices, small pool/queues, debug
/// logging on. Mirrors the `timeSliceMs` small / `debug: true` defaults
/// called out for the test harness.
pub fn test_config() -> MessageSystemConfig {
    MessageSystemConfig {
        pool_size: 64,
        warmup_on_boot: false,
        debug: true,
        time_slice_ms: 5,
        default_queue_capacity: 64,
        response_default_timeout_ms: 200,
        response_max_pending: 256,
        match_policy: MatchPolicy::Longest,
    }
}

pub struct TestSystem {
    kernel: Arc<Kernel>,
}

impl TestSystem {
    /// Bootstrap with `test_config()`.
    pub fn bootstrap() -> Self {
        Self::bootstrap_with(test_config())
    }

    pub fn bootstrap_with(config: MessageSystemConfig) -> Self {
        TestSystem {
            kernel: Kernel::bootstrap(config).expect("test kernel bootstrap never fails with a valid config"),
        }
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub async fn register_subsystem(&self, name: impl Into<String>, config: SubsystemConfig) -> Result<Arc<Subsystem<Kernel>>> {
        self.kernel.register_subsystem(name, config).await
    }

    pub fn get_subsystem(&self, name: &str) -> Option<Arc<Subsystem<Kernel>>> {
        self.kernel.get_subsystem(name)
    }

    /// `send(message)` under the kernel's own authority — see
    /// `mycelia::MessageSystem::send` for the same rationale.
    pub async fn send(&self, msg: Message) -> Result<()> {
        let caller = self.kernel.kernel_pkr_owned();
        self.kernel.send_protected(caller, msg, SendOptions::default()).await
    }

    pub async fn send_pooled(&self, path: impl Into<String>, body: serde_json::Value) -> Result<()> {
        let caller = self.kernel.kernel_pkr_owned();
        self.kernel.send_pooled_protected(caller, path.into(), body, SendOptions::default()).await
    }

    /// Drive exactly one round-robin pass over every attached subsystem,
    /// without spawning the background scheduler task `MessageSystem::bootstrap`
    /// would otherwise start.
    pub async fn tick(&self) {
        self.kernel.scheduler().tick_once().await;
    }

    /// Tick until every registered subsystem's queue is empty, or
    /// `max_ticks` elapse — whichever comes first. Returns `true` if every
    /// queue drained before the bound was hit.
    pub async fn wait_for_idle(&self, max_ticks: usize) -> bool {
        for _ in 0..max_ticks {
            let mut idle = true;
            for name in self.kernel.subsystem_names() {
                if let Some(sub) = self.kernel.get_subsystem(&name) {
                    if sub.queue_len().await > 0 {
                        idle = false;
                    }
                }
            }
            if idle {
                return true;
            }
            self.tick().await;
        }
        false
    }

    pub async fn dispose(&self) {
        for name in self.kernel.subsystem_names() {
            self.kernel.dispose_subsystem(&name).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertions::MessageAssertions;
    use mycelia_core::config::OverflowPolicy;

    fn queue_config() -> SubsystemConfig {
        SubsystemConfig {
            queue_capacity: 16,
            overflow_policy: OverflowPolicy::Reject,
            time_slice_ms: None,
        }
    }

    #[tokio::test]
    async fn tick_processes_exactly_one_round() {
        let system = TestSystem::bootstrap();
        let sub = system.register_subsystem("orders", queue_config()).await.unwrap();
        sub.register_route(
            "orders://ping",
            std::sync::Arc::new(|_msg, _params, _opts| Box::pin(async move { Ok(serde_json::json!({"pong": true})) })),
        )
        .unwrap();

        system.send_pooled("orders://ping", serde_json::Value::Null).await.unwrap();
        assert_eq!(sub.queue_len().await, 1);

        system.tick().await;
        assert_eq!(sub.queue_len().await, 0);
        assert_eq!(sub.processor_stats().await.processed, 1);
    }

    #[tokio::test]
    async fn wait_for_idle_drains_a_backlog() {
        let system = TestSystem::bootstrap();
        let sub = system.register_subsystem("orders", queue_config()).await.unwrap();
        sub.register_route(
            "orders://ping",
            std::sync::Arc::new(|_msg, _params, _opts| Box::pin(async move { Ok(serde_json::Value::Null) })),
        )
        .unwrap();

        for _ in 0..5 {
            system.send_pooled("orders://ping", serde_json::Value::Null).await.unwrap();
        }
        assert!(system.wait_for_idle(10).await);
        assert_eq!(sub.processor_stats().await.processed, 5);
    }

    #[tokio::test]
    async fn one_shot_timeout_response_reports_error_kind() {
        let system = TestSystem::bootstrap();
        let sub = system.register_subsystem("orders", queue_config()).await.unwrap();
        let response = sub
            .requests()
            .unwrap()
            .one_shot()
            .timeout_ms(5)
            .send(Message::new("orders://slow", serde_json::Value::Null))
            .await
            .unwrap();
        response.assert_error_kind("timeout");
    }
}
