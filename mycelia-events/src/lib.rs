//! Listeners: one-to-many fan-out with registration policies (spec.md
//! §4.10).
//!
//! Grounded in the teacher's `r2e-events::EventBus`, but keyed by path
//! pattern (the same grammar the router uses, spec.md §6) rather than by
//! `TypeId`: a listener subscribes to a path pattern and is invoked with
//! every message whose path matches it, same as `EventBus::subscribe`
//! keys by the event's Rust type and is invoked on every matching `emit`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use mycelia_core::error::{MyceliaError, Result};
use mycelia_core::message::Message;
use mycelia_core::path::{Path, Pattern};

/// Opaque handle returned by `ListenerRegistry::on`, used to target a single
/// handler with `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registration policy, set the first time a path is registered and held
/// for the lifetime of that path's topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerPolicy {
    /// Any number of listeners per path (default).
    Multiple,
    /// Exactly one listener per path; a second `on()` call is an error.
    Single,
    /// A new `on()` call replaces any existing listener(s) for the path.
    Replace,
    /// Caps the number of listeners registered for the path.
    Limited { max_listeners: usize },
}

impl Default for ListenerPolicy {
    fn default() -> Self {
        ListenerPolicy::Multiple
    }
}

type Handler = Arc<dyn Fn(Arc<Message>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

struct Registration {
    id: ListenerId,
    handler: Handler,
}

struct Topic {
    pattern: Pattern,
    policy: ListenerPolicy,
    registrations: Vec<Registration>,
}

/// Stores path-pattern-keyed listener topics and fans messages out to every
/// matching one, in registration order, on `emit`.
pub struct ListenerRegistry {
    topics: DashMap<String, Topic>,
    next_id: AtomicU64,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        ListenerRegistry {
            topics: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` under `pattern` with the default `Multiple`
    /// policy. See `on_with_policy` for the other policies.
    pub fn on<F, Fut>(&self, pattern: &str, handler: F) -> Result<ListenerId>
    where
        F: Fn(Arc<Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_with_policy(pattern, ListenerPolicy::Multiple, handler)
    }

    pub fn on_with_policy<F, Fut>(&self, pattern: &str, policy: ListenerPolicy, handler: F) -> Result<ListenerId>
    where
        F: Fn(Arc<Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let compiled = Pattern::parse(pattern)?;
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let boxed: Handler = Arc::new(move |msg| Box::pin(handler(msg)));

        let mut topic = self.topics.entry(pattern.to_string()).or_insert_with(|| Topic {
            pattern: compiled,
            policy,
            registrations: Vec::new(),
        });

        match topic.policy {
            ListenerPolicy::Single if !topic.registrations.is_empty() => {
                return Err(MyceliaError::AccessDenied {
                    path: pattern.to_string(),
                    reason: "listener already registered under the single policy",
                });
            }
            ListenerPolicy::Replace => {
                topic.registrations.clear();
            }
            ListenerPolicy::Limited { max_listeners } if topic.registrations.len() >= max_listeners => {
                return Err(MyceliaError::AccessDenied {
                    path: pattern.to_string(),
                    reason: "listener limit reached for this path",
                });
            }
            _ => {}
        }

        topic.registrations.push(Registration { id, handler: boxed });
        Ok(id)
    }

    /// Remove a specific listener by id, or every listener registered under
    /// `pattern` if `id` is `None`.
    pub fn off(&self, pattern: &str, id: Option<ListenerId>) {
        let Some(mut topic) = self.topics.get_mut(pattern) else {
            return;
        };
        match id {
            Some(target) => topic.registrations.retain(|r| r.id != target),
            None => topic.registrations.clear(),
        }
        let empty = topic.registrations.is_empty();
        drop(topic);
        if empty {
            self.topics.remove(pattern);
        }
    }

    /// Deliver `message` to every topic whose pattern matches its path, in
    /// registration order within each topic. Handler errors are caught,
    /// logged, and never abort the fan-out. Returns the number of handlers
    /// invoked.
    pub async fn emit(&self, path: &str, message: Message) -> Result<usize> {
        let parsed = Path::parse(path)?;
        let message = Arc::new(message);
        let mut invoked = 0usize;

        let matching: Vec<Handler> = self
            .topics
            .iter()
            .filter(|entry| entry.pattern.subsystem == parsed.subsystem && entry.pattern.matches(&parsed.segments).is_some())
            .flat_map(|entry| entry.registrations.iter().map(|r| r.handler.clone()).collect::<Vec<_>>())
            .collect();

        for handler in matching {
            invoked += 1;
            if let Err(err) = handler(message.clone()).await {
                tracing::warn!(path, error = %err, "listener handler failed");
            }
        }
        Ok(invoked)
    }

    pub fn listener_count(&self, pattern: &str) -> usize {
        self.topics.get(pattern).map(|t| t.registrations.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn multiple_listeners_all_fire_in_order() {
        let registry = ListenerRegistry::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = order.clone();
            registry
                .on("events://users/{id}", move |_msg| {
                    let order = order.clone();
                    let tag = tag.to_string();
                    async move {
                        order.lock().unwrap().push(tag);
                        Ok(())
                    }
                })
                .unwrap();
        }
        let count = registry
            .emit("events://users/42", Message::new("events://users/42", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn single_policy_rejects_second_registration() {
        let registry = ListenerRegistry::new();
        registry
            .on_with_policy("events://once", ListenerPolicy::Single, |_| async { Ok(()) })
            .unwrap();
        let err = registry
            .on_with_policy("events://once", ListenerPolicy::Single, |_| async { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, MyceliaError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn replace_policy_drops_prior_listener() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = hits.clone();
        registry
            .on_with_policy("events://latest", ListenerPolicy::Replace, move |_| {
                let h1 = h1.clone();
                async move {
                    h1.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        let h2 = hits.clone();
        registry
            .on_with_policy("events://latest", ListenerPolicy::Replace, move |_| {
                let h2 = h2.clone();
                async move {
                    h2.fetch_add(10, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        registry
            .emit("events://latest", Message::new("events://latest", serde_json::Value::Null))
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 10, "only the replacement handler should fire");
    }

    #[tokio::test]
    async fn limited_policy_caps_registrations() {
        let registry = ListenerRegistry::new();
        registry
            .on_with_policy("events://capped", ListenerPolicy::Limited { max_listeners: 1 }, |_| async { Ok(()) })
            .unwrap();
        let err = registry
            .on_with_policy("events://capped", ListenerPolicy::Limited { max_listeners: 1 }, |_| async { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, MyceliaError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn handler_error_does_not_abort_fan_out() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        registry
            .on("events://mixed", |_| async { Err(MyceliaError::HandlerError { inner: "boom".into() }) })
            .unwrap();
        let h = hits.clone();
        registry
            .on("events://mixed", move |_| {
                let h = h.clone();
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        let count = registry
            .emit("events://mixed", Message::new("events://mixed", serde_json::Value::Null))
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn off_removes_only_targeted_listener() {
        let registry = ListenerRegistry::new();
        let id1 = registry.on("events://x", |_| async { Ok(()) }).unwrap();
        registry.on("events://x", |_| async { Ok(()) }).unwrap();
        assert_eq!(registry.listener_count("events://x"), 2);
        registry.off("events://x", Some(id1));
        assert_eq!(registry.listener_count("events://x"), 1);
    }

    #[tokio::test]
    async fn wildcard_pattern_matches_emit() {
        let registry = ListenerRegistry::new();
        registry.on("files://static/*", |_| async { Ok(()) }).unwrap();
        let count = registry
            .emit("files://static/a/b", Message::new("files://static/a/b", serde_json::Value::Null))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
