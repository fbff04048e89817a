//! Request/Response Engine: one-shot temporary routes and channel-based
//! command requests (spec.md §4.9).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;

use mycelia_core::error::{MyceliaError, Result};
use mycelia_core::message::Message;
use mycelia_core::path::Path;
use mycelia_core::security::{IdentityHandle, KernelLink, ResponseRequiredOpts, SendOptions};

use crate::response::{ResponseManager, TimeoutEmitter};

/// Extra wall-clock slack added on top of the caller-supplied deadline before
/// a request gives up locally. The `ResponseManager`'s timer is authoritative
/// and fires at exactly `timeout_ms`; this grace only protects against a
/// synthetic timeout response never making it back to this process (spec.md
/// §4.9: "Local one-shot timers are permitted as a fast-path but must never
/// resolve before the registered deadline").
const LOCAL_GRACE_MS: u64 = 50;

fn synthetic_timeout_message(reply_path: &str, timeout_ms: u64) -> Message {
    let mut msg = Message::new(
        reply_path.to_string(),
        serde_json::json!({ "error": { "kind": "timeout", "timeoutMs": timeout_ms } }),
    );
    msg.meta.fixed.is_response = Some(true);
    msg.meta.fixed.is_error = true;
    msg.meta.mutable.error = Some(serde_json::json!({ "kind": "timeout", "timeoutMs": timeout_ms }));
    msg
}

/// Tracks in-flight one-shot temporary routes and channel-based command
/// correlations, and owns the `ResponseManager` both request kinds register
/// their deadline with.
pub struct RequestEngine<K: KernelLink + TimeoutEmitter> {
    response_manager: Arc<ResponseManager<K>>,
    one_shot_routes: DashMap<String, oneshot::Sender<Message>>,
    pending_commands: DashMap<String, oneshot::Sender<Message>>,
}

impl<K: KernelLink + TimeoutEmitter> RequestEngine<K> {
    pub fn new(response_manager: Arc<ResponseManager<K>>) -> Self {
        RequestEngine {
            response_manager,
            one_shot_routes: DashMap::new(),
            pending_commands: DashMap::new(),
        }
    }

    pub fn response_manager(&self) -> &Arc<ResponseManager<K>> {
        &self.response_manager
    }

    pub fn one_shot(&self, identity: Arc<IdentityHandle<K>>) -> OneShotRequestBuilder<'_, K> {
        OneShotRequestBuilder {
            engine: self,
            identity,
            timeout_ms: 5_000,
            reply_subsystem: None,
        }
    }

    pub fn command(&self, identity: Arc<IdentityHandle<K>>) -> CommandRequestBuilder<'_, K> {
        CommandRequestBuilder {
            engine: self,
            identity,
            timeout_ms: 5_000,
            reply_to: None,
        }
    }

    /// The router calls this on its "processImmediately" fast path when a
    /// message's path matches a registered one-shot temp route (spec.md
    /// §4.7). Returns `true` if a waiting request consumed it; the route is
    /// deleted either way per spec.md §4.5 ("deleted after first dispatch").
    pub fn resolve_one_shot(&self, path: &str, response: Message) -> bool {
        match self.one_shot_routes.remove(path) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// The channel dispatcher calls this before forwarding to listeners
    /// (spec.md §4.9: "non-matching responses are passed to the channel's
    /// listeners").
    pub fn try_resolve_command(&self, response: &Message) -> bool {
        let Some(in_reply_to) = response.meta.fixed.in_reply_to.as_deref() else {
            return false;
        };
        match self.pending_commands.remove(in_reply_to) {
            Some((_, tx)) => tx.send(response.clone()).is_ok(),
            None => false,
        }
    }

    /// Subsystem disposal cancels every pending request it owns (spec.md
    /// §5); dropping the sender makes the corresponding `send().await`
    /// observe a channel close and fall through to its local timeout path
    /// rather than hang.
    pub fn cancel_one_shot(&self, path: &str) {
        self.one_shot_routes.remove(path);
    }

    pub fn cancel_command(&self, correlation_id: &str) {
        self.pending_commands.remove(correlation_id);
    }
}

/// `oneShot().with({timeoutMs, replyTo?}).forMessage(msg).send()`.
pub struct OneShotRequestBuilder<'a, K: KernelLink + TimeoutEmitter> {
    engine: &'a RequestEngine<K>,
    identity: Arc<IdentityHandle<K>>,
    timeout_ms: u64,
    reply_subsystem: Option<String>,
}

impl<'a, K: KernelLink + TimeoutEmitter> OneShotRequestBuilder<'a, K> {
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Subsystem the temporary reply path `{sub}://request/oneShot/{msgId}`
    /// is registered under. Defaults to the sending identity's own PKR name.
    pub fn reply_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.reply_subsystem = Some(subsystem.into());
        self
    }

    /// 1. builds the temp reply path, 2. registers it, 3. starts the
    /// `ResponseManager` deadline, 4. sends the protected message.
    pub async fn send(self, msg: Message) -> Result<Message> {
        let reply_subsystem = self
            .reply_subsystem
            .clone()
            .or_else(|| self.identity.pkr.name.clone())
            .unwrap_or_else(|| self.identity.pkr.uuid.clone());
        let temp_path = Path::one_shot_for(&reply_subsystem, msg.id()).render();

        let (tx, rx) = oneshot::channel();
        self.engine.one_shot_routes.insert(temp_path.clone(), tx);

        self.engine.response_manager.register_response_required_for(
            self.identity.pkr.clone(),
            &msg,
            temp_path.clone(),
            self.timeout_ms,
        );

        let opts = SendOptions {
            response_required: Some(ResponseRequiredOpts {
                reply_to: temp_path.clone(),
                timeout_ms: self.timeout_ms,
            }),
            ..Default::default()
        };

        if let Err(err) = self.identity.send_protected(msg, opts).await {
            self.engine.one_shot_routes.remove(&temp_path);
            return Err(err);
        }

        let deadline = Duration::from_millis(self.timeout_ms + LOCAL_GRACE_MS);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) | Err(_) => {
                self.engine.one_shot_routes.remove(&temp_path);
                Ok(synthetic_timeout_message(&temp_path, self.timeout_ms))
            }
        }
    }
}

/// `command().with({replyTo, timeoutMs}).forMessage(msg).send()`.
pub struct CommandRequestBuilder<'a, K: KernelLink + TimeoutEmitter> {
    engine: &'a RequestEngine<K>,
    identity: Arc<IdentityHandle<K>>,
    timeout_ms: u64,
    reply_to: Option<String>,
}

impl<'a, K: KernelLink + TimeoutEmitter> CommandRequestBuilder<'a, K> {
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// The already-registered channel route responses will be sent back on.
    pub fn reply_to(mut self, route: impl Into<String>) -> Self {
        self.reply_to = Some(route.into());
        self
    }

    pub async fn send(self, msg: Message) -> Result<Message> {
        let Some(reply_to) = self.reply_to.clone() else {
            return Err(MyceliaError::InvalidPath { path: String::new() });
        };
        let correlation_id = msg.id().to_string();

        let (tx, rx) = oneshot::channel();
        self.engine.pending_commands.insert(correlation_id.clone(), tx);

        self.engine.response_manager.register_response_required_for(
            self.identity.pkr.clone(),
            &msg,
            reply_to.clone(),
            self.timeout_ms,
        );

        let opts = SendOptions {
            response_required: Some(ResponseRequiredOpts {
                reply_to,
                timeout_ms: self.timeout_ms,
            }),
            ..Default::default()
        };

        if let Err(err) = self.identity.send_protected(msg, opts).await {
            self.engine.pending_commands.remove(&correlation_id);
            return Err(err);
        }

        let deadline = Duration::from_millis(self.timeout_ms + LOCAL_GRACE_MS);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) | Err(_) => {
                self.engine.pending_commands.remove(&correlation_id);
                Ok(synthetic_timeout_message(&correlation_id, self.timeout_ms))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mycelia_core::security::{CreatePrincipalOpts, Pkr, PrincipalKind, PrincipalRegistry};
    use std::sync::Mutex as StdMutex;

    struct FakeKernel {
        kernel_pkr: Pkr,
        sent: StdMutex<Vec<(String, SendOptions)>>,
    }

    impl KernelLink for FakeKernel {
        fn kernel_pkr(&self) -> Pkr {
            self.kernel_pkr.clone()
        }

        async fn send_protected(&self, _caller: Pkr, msg: Message, opts: SendOptions) -> Result<()> {
            self.sent.lock().unwrap().push((msg.path().to_string(), opts));
            Ok(())
        }

        async fn send_pooled_protected(&self, _caller: Pkr, _path: String, _body: serde_json::Value, _opts: SendOptions) -> Result<()> {
            Ok(())
        }
    }

    impl TimeoutEmitter for FakeKernel {
        async fn emit_timeout(&self, _entry: crate::response::ResponseEntry) {}
    }

    fn setup() -> (Arc<FakeKernel>, Arc<IdentityHandle<FakeKernel>>, Arc<RequestEngine<FakeKernel>>) {
        let reg = Arc::new(PrincipalRegistry::new());
        let kernel_pkr = reg.create_principal(PrincipalKind::Kernel, CreatePrincipalOpts::default()).unwrap();
        let caller_pkr = reg
            .create_principal(
                PrincipalKind::TopLevel,
                CreatePrincipalOpts {
                    name: Some("caller".to_string()),
                    ..CreatePrincipalOpts::default()
                },
            )
            .unwrap();
        let kernel = Arc::new(FakeKernel {
            kernel_pkr,
            sent: StdMutex::new(Vec::new()),
        });
        let identity = Arc::new(IdentityHandle::new(caller_pkr, reg, kernel.clone()));
        let response_manager = Arc::new(ResponseManager::new(kernel.clone(), 1000));
        let engine = Arc::new(RequestEngine::new(response_manager));
        (kernel, identity, engine)
    }

    #[tokio::test]
    async fn one_shot_resolves_when_temp_route_is_fulfilled() {
        let (_kernel, identity, engine) = setup();
        let msg = Message::new("api://do-thing", serde_json::Value::Null);
        let msg_id = msg.id().to_string();
        let reply_subsystem = identity.pkr.name.clone();

        let engine_for_responder = engine.clone();
        let responder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let temp_path = Path::one_shot_for(&reply_subsystem, &msg_id).render();
            let response = Message::new(temp_path.clone(), serde_json::json!({"ok": true}));
            engine_for_responder.resolve_one_shot(&temp_path, response);
        });

        let response = engine.one_shot(identity).timeout_ms(200).send(msg).await.unwrap();
        assert_eq!(response.body, serde_json::json!({"ok": true}));
        responder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_times_out_when_nobody_responds() {
        let (_kernel, identity, engine) = setup();
        let msg = Message::new("api://slow", serde_json::Value::Null);
        let handle = tokio::spawn({
            let engine = engine.clone();
            async move { engine.one_shot(identity).timeout_ms(10).send(msg).await }
        });
        tokio::time::advance(Duration::from_millis(200)).await;
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.meta.fixed.is_error, true);
        assert_eq!(response.body["error"]["kind"], serde_json::json!("timeout"));
    }

    #[tokio::test]
    async fn command_resolves_via_correlation_id() {
        let (_kernel, identity, engine) = setup();
        let msg = Message::new("api://do-thing", serde_json::Value::Null);
        let msg_id = msg.id().to_string();

        let engine_for_responder = engine.clone();
        let responder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let response = Message::new("caller://channel/replies", serde_json::json!({"ok": true})).respond("caller://channel/replies", serde_json::json!({"ok": true}));
            let mut response = response;
            response.meta.fixed.in_reply_to = Some(msg_id.clone());
            assert!(engine_for_responder.try_resolve_command(&response));
        });

        let response = engine
            .command(identity)
            .reply_to("caller://channel/replies")
            .timeout_ms(200)
            .send(msg)
            .await
            .unwrap();
        assert_eq!(response.body, serde_json::json!({"ok": true}));
        responder.await.unwrap();
    }
}
