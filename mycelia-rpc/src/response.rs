//! Response Manager: correlation-id tracking, timeouts, synthetic timeout
//! responses (spec.md §4.5).

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use mycelia_core::message::Message;
use mycelia_core::security::Pkr;

/// `{ correlationId, ownerPkr, replyTo, timeoutMs, createdAt, resolved }`.
#[derive(Debug, Clone)]
pub struct ResponseEntry {
    pub correlation_id: String,
    pub owner: Pkr,
    pub reply_to: String,
    pub timeout_ms: u64,
    pub created_at: Instant,
}

/// The seam the response manager uses to emit a synthetic timeout response
/// back through the kernel, without depending on the kernel's crate.
pub trait TimeoutEmitter: Send + Sync + 'static {
    fn emit_timeout(&self, entry: ResponseEntry) -> impl Future<Output = ()> + Send;
}

struct Tracked {
    entry: ResponseEntry,
    resolved: Arc<AtomicBool>,
    cancel: CancellationToken,
}

/// Maintains `correlationId -> ResponseEntry` and races each entry's
/// registered deadline against `handle_response` resolving it first
/// (spec.md §5: "when both race, the resolver wins and the timeout is
/// dropped").
pub struct ResponseManager<E: TimeoutEmitter> {
    pending: DashMap<String, Tracked>,
    emitter: Arc<E>,
    max_pending: usize,
}

impl<E: TimeoutEmitter> ResponseManager<E> {
    pub fn new(emitter: Arc<E>, max_pending: usize) -> Self {
        ResponseManager {
            pending: DashMap::new(),
            emitter,
            max_pending,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether an entry is already tracked for `correlation_id`. Lets
    /// `Kernel::send_protected` skip re-registering a response-required send
    /// whose request builder already called `register_response_required_for`
    /// directly, avoiding a duplicate timer for the same correlation id.
    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.pending.contains_key(correlation_id)
    }

    /// Record `correlationId = message.id`, start a timer for `timeoutMs`,
    /// store `replyTo`.
    pub fn register_response_required_for(&self, owner: Pkr, message: &Message, reply_to: String, timeout_ms: u64) {
        if self.pending.len() >= self.max_pending {
            tracing::warn!(correlation_id = message.id(), "response manager at max_pending, entry dropped");
            return;
        }
        let correlation_id = message.id().to_string();
        let resolved = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let entry = ResponseEntry {
            correlation_id: correlation_id.clone(),
            owner,
            reply_to,
            timeout_ms,
            created_at: Instant::now(),
        };
        self.pending.insert(
            correlation_id.clone(),
            Tracked {
                entry: entry.clone(),
                resolved: resolved.clone(),
                cancel: cancel.clone(),
            },
        );

        let emitter = Arc::clone(&self.emitter);
        let pending_map_entry = correlation_id.clone();
        let timeout_entry = entry;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(std::time::Duration::from_millis(timeout_entry.timeout_ms)) => {
                    if !resolved.swap(true, Ordering::SeqCst) {
                        emitter.emit_timeout(timeout_entry).await;
                    }
                }
            }
            let _ = pending_map_entry;
        });
    }

    pub fn get_reply_to(&self, correlation_id: &str) -> Option<String> {
        self.pending.get(correlation_id).map(|t| t.entry.reply_to.clone())
    }

    /// Validates a pending entry exists for `inReplyTo`, marks resolved,
    /// cancels the timer. Duplicate or unknown responses are dropped
    /// (returns `false`, caller logs).
    pub fn handle_response(&self, response: &Message) -> Option<ResponseEntry> {
        let in_reply_to = response.meta.fixed.in_reply_to.as_deref()?;
        let (_, tracked) = self.pending.remove(in_reply_to)?;
        if tracked.resolved.swap(true, Ordering::SeqCst) {
            // Already resolved by a racing timeout; treat as a duplicate.
            return None;
        }
        tracked.cancel.cancel();
        Some(tracked.entry)
    }

    /// Cancel every entry owned by `owner`, e.g. on subsystem disposal
    /// (spec.md §5: "Subsystem disposal cancels all pending requests owned
    /// by it with an `OperationCancelled` error"). Callers are responsible
    /// for surfacing that error to whoever is awaiting the request.
    pub fn cancel_owned_by(&self, owner: &Pkr) -> Vec<ResponseEntry> {
        let mut cancelled = Vec::new();
        let keys: Vec<String> = self
            .pending
            .iter()
            .filter(|t| t.entry.owner.public_key == owner.public_key)
            .map(|t| t.entry.correlation_id.clone())
            .collect();
        for key in keys {
            if let Some((_, tracked)) = self.pending.remove(&key) {
                tracked.resolved.store(true, Ordering::SeqCst);
                tracked.cancel.cancel();
                cancelled.push(tracked.entry);
            }
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mycelia_core::security::{CreatePrincipalOpts, PrincipalKind, PrincipalRegistry};
    use std::sync::Mutex;

    struct RecordingEmitter {
        fired: Mutex<Vec<String>>,
    }

    impl TimeoutEmitter for RecordingEmitter {
        async fn emit_timeout(&self, entry: ResponseEntry) {
            self.fired.lock().unwrap().push(entry.correlation_id);
        }
    }

    #[tokio::test]
    async fn handle_response_cancels_pending_timeout() {
        let reg = PrincipalRegistry::new();
        let owner = reg.create_principal(PrincipalKind::TopLevel, CreatePrincipalOpts::default()).unwrap();
        let emitter = Arc::new(RecordingEmitter { fired: Mutex::new(Vec::new()) });
        let manager = ResponseManager::new(emitter.clone(), 100);
        let request = Message::new("api://do-thing", serde_json::Value::Null);
        manager.register_response_required_for(owner.clone(), &request, "caller://request/oneShot/x".into(), 1_000);

        let response = request.respond("caller://request/oneShot/x", serde_json::json!({"ok": true}));
        let resolved = manager.handle_response(&response);
        assert!(resolved.is_some());
        assert_eq!(manager.pending_count(), 0);

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(emitter.fired.lock().unwrap().is_empty(), "timeout must not fire after resolution");
    }

    #[tokio::test]
    async fn unknown_response_is_dropped_without_panicking() {
        let reg = PrincipalRegistry::new();
        let owner = reg.create_principal(PrincipalKind::TopLevel, CreatePrincipalOpts::default()).unwrap();
        let emitter = Arc::new(RecordingEmitter { fired: Mutex::new(Vec::new()) });
        let manager = ResponseManager::new(emitter, 100);
        let orphan_request = Message::new("api://do-thing", serde_json::Value::Null);
        let response = orphan_request.respond("caller://request/oneShot/x", serde_json::json!({}));
        assert!(manager.handle_response(&response).is_none());
        let _ = owner;
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_when_no_response_arrives() {
        let reg = PrincipalRegistry::new();
        let owner = reg.create_principal(PrincipalKind::TopLevel, CreatePrincipalOpts::default()).unwrap();
        let emitter = Arc::new(RecordingEmitter { fired: Mutex::new(Vec::new()) });
        let manager = ResponseManager::new(emitter.clone(), 100);
        let request = Message::new("api://slow", serde_json::Value::Null);
        let correlation_id = request.id().to_string();
        manager.register_response_required_for(owner, &request, "caller://request/oneShot/x".into(), 50);

        tokio::time::advance(std::time::Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(emitter.fired.lock().unwrap().as_slice(), [correlation_id]);
    }
}
