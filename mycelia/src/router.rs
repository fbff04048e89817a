//! Per-subsystem route table (spec.md §4.7): the `(pattern, handler, options)`
//! table a subsystem's `router` facet exposes via `registerRoute`/
//! `unregisterRoute`, and the match/tie-break logic `Processor::process`
//! consults once it has dequeued a message.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use mycelia_core::error::{MyceliaError, Result};
use mycelia_core::message::Message;
use mycelia_core::path::{Path, Pattern};
use mycelia_core::security::SendOptions;

/// A route handler's return value is "handler-defined... not meaningful for
/// fire-and-forget" (spec.md §4.7); callers that need it back (the request
/// builders) read it out of the returned `serde_json::Value`.
pub type RouteHandler =
    std::sync::Arc<dyn Fn(Message, BTreeMap<String, String>, SendOptions) -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>> + Send + Sync>;

/// Router tie-break policy a subsystem's table is configured with (spec.md
/// §6 "Router: {matchPolicy: longest|firstRegistered}").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    Longest,
    FirstRegistered,
}

impl From<mycelia_core::config::MatchPolicy> for MatchPolicy {
    fn from(policy: mycelia_core::config::MatchPolicy) -> Self {
        match policy {
            mycelia_core::config::MatchPolicy::Longest => MatchPolicy::Longest,
            mycelia_core::config::MatchPolicy::FirstRegistered => MatchPolicy::FirstRegistered,
        }
    }
}

struct RouteEntry {
    pattern: Pattern,
    raw: String,
    handler: RouteHandler,
    registration_order: usize,
}

/// The pattern table itself. Not `Sync`-free: guarded by an `RwLock` since
/// `registerRoute` can be called from any task while `process()` is
/// concurrently matching against it.
pub struct Router {
    match_policy: MatchPolicy,
    routes: RwLock<Vec<RouteEntry>>,
    next_order: std::sync::atomic::AtomicUsize,
}

impl Router {
    pub fn new(match_policy: MatchPolicy) -> Self {
        Router {
            match_policy,
            routes: RwLock::new(Vec::new()),
            next_order: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// `registerRoute(pattern, handler, opts?)`.
    pub fn register_route(&self, pattern: &str, handler: RouteHandler) -> Result<()> {
        let compiled = Pattern::parse(pattern)?;
        let order = self.next_order.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.routes.write().expect("router lock poisoned").push(RouteEntry {
            pattern: compiled,
            raw: pattern.to_string(),
            handler,
            registration_order: order,
        });
        Ok(())
    }

    /// `unregisterRoute(pattern)`.
    pub fn unregister_route(&self, pattern: &str) {
        self.routes.write().expect("router lock poisoned").retain(|r| r.raw != pattern);
    }

    /// Resolve the best-matching handler for `path`, honoring the configured
    /// tie-break policy: under `Longest`, exact > more literal segments >
    /// fewer params (spec.md §4.7), with registration order as the final
    /// stable tie-break; under `FirstRegistered`, the first pattern
    /// registered that matches wins outright.
    pub fn find_match(&self, path: &Path) -> Option<(RouteHandler, BTreeMap<String, String>)> {
        let routes = self.routes.read().expect("router lock poisoned");
        let mut best: Option<(&RouteEntry, BTreeMap<String, String>)> = None;

        for entry in routes.iter() {
            if entry.pattern.subsystem != path.subsystem {
                continue;
            }
            let Some(params) = entry.pattern.matches(&path.segments) else {
                continue;
            };
            match self.match_policy {
                MatchPolicy::FirstRegistered => return Some((entry.handler.clone(), params)),
                MatchPolicy::Longest => {
                    let better = match &best {
                        None => true,
                        Some((current, _)) => {
                            let cmp = entry.pattern.specificity().cmp(&current.pattern.specificity());
                            cmp == std::cmp::Ordering::Greater
                                || (cmp == std::cmp::Ordering::Equal && entry.registration_order < current.registration_order)
                        }
                    };
                    if better {
                        best = Some((entry, params));
                    }
                }
            }
        }

        best.map(|(entry, params)| (entry.handler.clone(), params))
    }

    /// Route a message and dispatch it to its matched handler, returning
    /// `NoRoute` if nothing matches.
    pub async fn dispatch(&self, msg: Message, opts: SendOptions) -> Result<serde_json::Value> {
        let path = msg.parsed_path()?;
        let Some((handler, params)) = self.find_match(&path) else {
            return Err(MyceliaError::NoRoute { path: msg.path().to_string() });
        };
        handler(msg, params, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_handler(body: serde_json::Value) -> RouteHandler {
        std::sync::Arc::new(move |_msg, _params, _opts| {
            let body = body.clone();
            Box::pin(async move { Ok(body) })
        })
    }

    #[tokio::test]
    async fn exact_match_beats_parameterized_pattern() {
        let router = Router::new(MatchPolicy::Longest);
        router.register_route("api://users/{id}", ok_handler(serde_json::json!({"via": "param"}))).unwrap();
        router.register_route("api://users/42", ok_handler(serde_json::json!({"via": "exact"}))).unwrap();

        let msg = Message::new("api://users/42", serde_json::Value::Null);
        let result = router.dispatch(msg, SendOptions::default()).await.unwrap();
        assert_eq!(result, serde_json::json!({"via": "exact"}));
    }

    #[tokio::test]
    async fn params_are_captured_and_passed_to_handler() {
        let router = Router::new(MatchPolicy::Longest);
        router
            .register_route(
                "api://users/{id}",
                std::sync::Arc::new(|_msg, params, _opts| Box::pin(async move { Ok(serde_json::json!({"id": params.get("id")})) })),
            )
            .unwrap();
        let msg = Message::new("api://users/42", serde_json::Value::Null);
        let result = router.dispatch(msg, SendOptions::default()).await.unwrap();
        assert_eq!(result, serde_json::json!({"id": "42"}));
    }

    #[tokio::test]
    async fn unmatched_path_is_no_route() {
        let router = Router::new(MatchPolicy::Longest);
        router.register_route("api://users/{id}", ok_handler(serde_json::Value::Null)).unwrap();
        let msg = Message::new("api://orders/1", serde_json::Value::Null);
        let err = router.dispatch(msg, SendOptions::default()).await.unwrap_err();
        assert!(matches!(err, MyceliaError::NoRoute { .. }));
    }

    #[tokio::test]
    async fn unregister_removes_the_route() {
        let router = Router::new(MatchPolicy::Longest);
        router.register_route("api://users/{id}", ok_handler(serde_json::Value::Null)).unwrap();
        router.unregister_route("api://users/{id}");
        let msg = Message::new("api://users/42", serde_json::Value::Null);
        assert!(router.dispatch(msg, SendOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn first_registered_policy_ignores_specificity() {
        let router = Router::new(MatchPolicy::FirstRegistered);
        router.register_route("api://users/{id}", ok_handler(serde_json::json!({"via": "param"}))).unwrap();
        router.register_route("api://users/42", ok_handler(serde_json::json!({"via": "exact"}))).unwrap();
        let msg = Message::new("api://users/42", serde_json::Value::Null);
        let result = router.dispatch(msg, SendOptions::default()).await.unwrap();
        assert_eq!(result, serde_json::json!({"via": "param"}), "first registered pattern should win regardless of specificity");
    }
}
