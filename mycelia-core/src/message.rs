//! `Message` and its metadata, plus the `MessagePool` bounded free-list.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::path::Path;

/// The closed set of message kinds carried in fixed metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    Simple,
    Atomic,
    Batch,
    Query,
    Command,
    Retry,
    Transaction,
    Response,
}

/// Immutable-after-construction metadata. Implementers must not mutate these
/// fields once a message identity has been assigned; `Message::clone_fresh`
/// is the only sanctioned way to derive a new identity from existing fixed
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedMeta {
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub trace_id: String,
    pub sender_id: Option<String>,
    pub transaction: Option<String>,
    pub seq: Option<u64>,
    pub is_atomic: bool,
    pub is_batch: bool,
    pub is_query: bool,
    pub is_command: bool,
    pub is_error: bool,
    pub max_retries: Option<u32>,
    /// The caller principal this message was stamped with by the kernel at
    /// send time. Set once, by `Kernel::send_protected`, never by callers.
    pub caller: Option<String>,
    pub is_response: Option<bool>,
    pub in_reply_to: Option<String>,
}

impl FixedMeta {
    /// A fixed meta for a freshly constructed `simple` message with a new trace id.
    pub fn new_simple() -> Self {
        FixedMeta {
            timestamp: now_millis(),
            kind: MessageType::Simple,
            trace_id: Uuid::new_v4().to_string(),
            sender_id: None,
            transaction: None,
            seq: None,
            is_atomic: false,
            is_batch: false,
            is_query: false,
            is_command: false,
            is_error: false,
            max_retries: None,
            caller: None,
            is_response: None,
            in_reply_to: None,
        }
    }

    /// Derive a child trace id context: inherit the parent's `trace_id`
    /// rather than generating a new one.
    pub fn child_of(parent: &FixedMeta) -> Self {
        let mut meta = Self::new_simple();
        meta.trace_id = parent.trace_id.clone();
        meta
    }
}

/// Mutable, transient metadata — routing hints and retry bookkeeping. Never
/// part of the message's identity or equality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutableMeta {
    pub retries: u32,
    pub query_result: Option<serde_json::Value>,
    pub reply_to: Option<String>,
    pub response_required: bool,
    pub error: Option<serde_json::Value>,
}

/// Fixed + mutable metadata, as carried on every `Message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMeta {
    pub fixed: FixedMeta,
    pub mutable: MutableMeta,
}

impl MessageMeta {
    pub fn new_simple() -> Self {
        MessageMeta {
            fixed: FixedMeta::new_simple(),
            mutable: MutableMeta::default(),
        }
    }
}

/// A message travelling through the kernel. `id` and `path` are read-only
/// after construction (I1): nothing in this crate exposes a mutator for
/// either field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: String,
    path: String,
    pub body: serde_json::Value,
    pub meta: MessageMeta,
}

impl Message {
    /// Construct a brand-new message with a fresh id and `simple` fixed meta.
    pub fn new(path: impl Into<String>, body: serde_json::Value) -> Self {
        Message {
            id: Uuid::new_v4().to_string(),
            path: path.into(),
            body,
            meta: MessageMeta::new_simple(),
        }
    }

    /// Construct with explicit metadata (used by the pool and by request
    /// builders that need a particular `MessageType`/trace lineage).
    pub fn with_meta(path: impl Into<String>, body: serde_json::Value, meta: MessageMeta) -> Self {
        Message {
            id: Uuid::new_v4().to_string(),
            path: path.into(),
            body,
            meta,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Parse `path()` as a structured `Path`. Only fails if a caller managed
    /// to construct a `Message` with a path that no longer satisfies the
    /// grammar (not possible through this crate's constructors, but kept
    /// fallible since the wire shape in spec.md §6 allows deserializing
    /// arbitrary JSON into a `Message`).
    pub fn parsed_path(&self) -> crate::error::Result<Path> {
        Path::parse(&self.path)
    }

    /// Clone semantics per spec.md §8 "Round-trips": fresh `id`, equal
    /// `path`, `body`, and fixed meta; mutable meta resets to default.
    pub fn clone_fresh(&self) -> Self {
        Message {
            id: Uuid::new_v4().to_string(),
            path: self.path.clone(),
            body: self.body.clone(),
            meta: MessageMeta {
                fixed: self.meta.fixed.clone(),
                mutable: MutableMeta::default(),
            },
        }
    }

    /// Build a response message addressed back via `in_reply_to`.
    pub fn respond(&self, reply_path: impl Into<String>, body: serde_json::Value) -> Self {
        let mut fixed = FixedMeta::child_of(&self.meta.fixed);
        fixed.kind = MessageType::Response;
        fixed.is_response = Some(true);
        fixed.in_reply_to = Some(self.id.clone());
        Message::with_meta(
            reply_path,
            body,
            MessageMeta {
                fixed,
                mutable: MutableMeta::default(),
            },
        )
    }

    /// Reinitialize this instance in place for pool reuse: new id, new path,
    /// new body, fresh fixed+mutable meta. Used only by `MessagePool`.
    fn reset(&mut self, path: String, body: serde_json::Value, meta: Option<MessageMeta>) {
        self.id = Uuid::new_v4().to_string();
        self.path = path;
        self.body = body;
        self.meta = meta.unwrap_or_else(MessageMeta::new_simple);
    }

    /// Clear body and mutable routing hints for release back into the pool.
    /// Per spec.md §4.1, released instances must never be read afterwards by
    /// routing code; this just keeps the allocation's shape ready for reuse.
    fn clear_for_release(&mut self) {
        self.body = serde_json::Value::Null;
        self.meta.mutable = MutableMeta::default();
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Running counters for `MessagePool`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub released: u64,
}

impl PoolStats {
    pub fn pool_size(&self, free_list_len: usize) -> usize {
        free_list_len
    }

    /// `reused / (created + reused)`.
    pub fn reuse_rate(&self) -> f64 {
        let total = self.created + self.reused;
        if total == 0 {
            0.0
        } else {
            self.reused as f64 / total as f64
        }
    }

    /// `reused / acquires`, where `acquires = created + reused`.
    pub fn efficiency(&self) -> f64 {
        self.reuse_rate()
    }
}

/// A bounded free-list of reusable `Message` instances (spec.md §4.1).
///
/// Not thread-safe by contract: the runtime is cooperative single-threaded
/// (§5). Callers that need the pool from more than one task must guard it
/// externally (e.g. `tokio::sync::Mutex<MessagePool>`), same as the teacher
/// stack documents for its own non-`Sync` internals rather than baking a
/// lock into the type itself.
#[derive(Debug)]
pub struct MessagePool {
    capacity: usize,
    free: Vec<Message>,
    stats: PoolStats,
    allow_construct_when_empty: bool,
}

impl MessagePool {
    /// Create a pool bounded to `capacity` instances.
    pub fn new(capacity: usize) -> Self {
        MessagePool {
            capacity,
            free: Vec::with_capacity(capacity.min(64)),
            stats: PoolStats::default(),
            allow_construct_when_empty: true,
        }
    }

    /// Construct a pool that raises `PoolExhausted` instead of constructing
    /// new messages once both the free list and a fresh allocation budget
    /// are spent. Used only under the "rare configuration" spec.md §7 calls
    /// out for `PoolExhausted`.
    pub fn bounded_strict(capacity: usize) -> Self {
        MessagePool {
            allow_construct_when_empty: false,
            ..Self::new(capacity)
        }
    }

    /// Pre-fill the pool with `k` stub instances.
    pub fn warmup(&mut self, k: usize) {
        for _ in 0..k {
            if self.free.len() >= self.capacity {
                break;
            }
            self.free.push(Message::new("system://pool/stub", serde_json::Value::Null));
        }
    }

    /// Acquire a message reset to `{path, body, meta}`. Never fails in the
    /// default configuration: if the pool is empty it constructs. Under
    /// `bounded_strict`, returns `PoolExhausted` once the free list is empty.
    pub fn acquire(
        &mut self,
        path: impl Into<String>,
        body: serde_json::Value,
        meta: Option<MessageMeta>,
    ) -> crate::error::Result<Message> {
        if let Some(mut msg) = self.free.pop() {
            msg.reset(path.into(), body, meta);
            self.stats.reused += 1;
            return Ok(msg);
        }
        if !self.allow_construct_when_empty {
            return Err(crate::error::MyceliaError::PoolExhausted);
        }
        self.stats.created += 1;
        Ok(Message::with_meta(path, body, meta.unwrap_or_else(MessageMeta::new_simple)))
    }

    /// Release a message back into the pool, clearing body and mutable meta
    /// first. Dropped silently if the pool is at capacity.
    pub fn release(&mut self, mut msg: Message) {
        msg.clear_for_release();
        self.stats.released += 1;
        if self.free.len() < self.capacity {
            self.free.push(msg);
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    pub fn pool_size(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_and_path_are_immutable_after_construction() {
        let msg = Message::new("api://users/42", serde_json::json!({}));
        let id = msg.id().to_string();
        let path = msg.path().to_string();
        let again = msg.clone();
        assert_eq!(again.id(), id);
        assert_eq!(again.path(), path);
    }

    #[test]
    fn clone_fresh_gets_new_id_but_same_path_and_body() {
        let msg = Message::new("api://users/42", serde_json::json!({"a": 1}));
        let cloned = msg.clone_fresh();
        assert_ne!(cloned.id(), msg.id());
        assert_eq!(cloned.path(), msg.path());
        assert_eq!(cloned.body, msg.body);
    }

    #[test]
    fn pool_acquire_never_fails_and_reuses_after_release() {
        let mut pool = MessagePool::new(4);
        let m1 = pool.acquire("a://x", serde_json::Value::Null, None).unwrap();
        assert_eq!(pool.stats().created, 1);
        pool.release(m1);
        assert_eq!(pool.stats().released, 1);
        let m2 = pool.acquire("a://y", serde_json::Value::Null, None).unwrap();
        assert_eq!(pool.stats().reused, 1);
        assert_eq!(pool.stats().created, 1);
        assert_ne!(m2.path(), "");
    }

    #[test]
    fn released_instance_drops_body_and_mutable_meta() {
        let mut pool = MessagePool::new(4);
        let mut msg = pool
            .acquire("a://x", serde_json::json!({"secret": true}), None)
            .unwrap();
        msg.meta.mutable.reply_to = Some("a://channel/reply".to_string());
        pool.release(msg);
        let reused = pool.acquire("a://y", serde_json::Value::Null, None).unwrap();
        assert_eq!(reused.meta.mutable.reply_to, None);
    }

    #[test]
    fn pool_drops_release_beyond_capacity() {
        let mut pool = MessagePool::new(1);
        let a = pool.acquire("a://x", serde_json::Value::Null, None).unwrap();
        let b = pool.acquire("a://y", serde_json::Value::Null, None).unwrap();
        pool.release(a);
        assert_eq!(pool.pool_size(), 1);
        pool.release(b);
        assert_eq!(pool.pool_size(), 1, "second release should be dropped at capacity");
    }

    #[test]
    fn pool_conservation_invariant() {
        let mut pool = MessagePool::new(8);
        let mut acquires = 0u64;
        for _ in 0..100 {
            let m = pool.acquire("a://x", serde_json::Value::Null, None).unwrap();
            acquires += 1;
            if acquires % 2 == 0 {
                pool.release(m);
            }
        }
        let stats = pool.stats();
        assert_eq!(stats.created + stats.reused, acquires);
        assert!(stats.released <= stats.created);
    }

    #[test]
    fn strict_pool_exhausts() {
        let mut pool = MessagePool::bounded_strict(1);
        let first = pool.acquire("a://x", serde_json::Value::Null, None).unwrap();
        let second = pool.acquire("a://y", serde_json::Value::Null, None);
        assert!(second.is_err());
        pool.release(first);
        assert!(pool.acquire("a://z", serde_json::Value::Null, None).is_ok());
    }
}
