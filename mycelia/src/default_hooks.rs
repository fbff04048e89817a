//! Default hook set installed into every subsystem unless overridden by a
//! user hook of the same kind (spec.md §4.11 step 1). Grounded in the
//! teacher's `quarlus-core::beans::BeanRegistry`: a small, fixed list of
//! zero-sized hook types, each producing exactly one facet kind from data
//! already sitting on `BuildContext`, registered and resolved the same way
//! `BeanRegistry::resolve` walks its registration list.

use std::sync::Arc;

use mycelia_build::error::Result as BuildResult;
use mycelia_build::{BoxedHook, Facet, FacetKind, Hook};
use mycelia_core::message::{Message, MessageMeta, MessageType};
use mycelia_core::security::{IdentityHandle, KernelLink};
use mycelia_rpc::{CommandRequestBuilder, OneShotRequestBuilder, RequestEngine, ResponseManager, TimeoutEmitter};

use mycelia_events::ListenerRegistry;

use crate::router::Router;
use crate::subsystem::BuildContext;

/// The `requests` facet (spec.md §4.9): builds one-shot and command requests
/// bound to this subsystem's own identity and the shared `RequestEngine`.
pub struct RequestsFacet<K: KernelLink + TimeoutEmitter> {
    engine: Arc<RequestEngine<K>>,
    identity: Arc<IdentityHandle<K>>,
}

impl<K: KernelLink + TimeoutEmitter> RequestsFacet<K> {
    pub fn one_shot(&self) -> OneShotRequestBuilder<'_, K> {
        self.engine.one_shot(self.identity.clone())
    }

    pub fn command(&self) -> CommandRequestBuilder<'_, K> {
        self.engine.command(self.identity.clone())
    }
}

/// The `responses` facet (spec.md §6 `sendResponse/sendSuccess/sendError`):
/// looks up the `replyTo` a request handler's message is tracked under and
/// sends the handler's result back along that route, addressed via
/// `Message::respond` (`inReplyTo = request.id`) and `is_response: true` so
/// the kernel's `send_protected` resolves the waiting `ResponseManager`
/// entry (spec.md §4.6 step 3) instead of queuing a second request.
pub struct ResponsesFacet<K: KernelLink + TimeoutEmitter> {
    manager: Arc<ResponseManager<K>>,
    identity: Arc<IdentityHandle<K>>,
}

impl<K: KernelLink + TimeoutEmitter> ResponsesFacet<K> {
    pub fn pending_count(&self) -> usize {
        self.manager.pending_count()
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.manager.is_pending(correlation_id)
    }

    /// `sendResponse(request, body, isError)`: resolves `request`'s tracked
    /// `replyTo` and delivers `body` there. A no-op (returns `Ok(())`) if
    /// no entry is pending for `request.id()` — the request may already
    /// have timed out, in which case the synthetic timeout response has
    /// already settled the caller.
    pub async fn send_response(&self, request: &Message, body: serde_json::Value, is_error: bool) -> mycelia_core::error::Result<()> {
        let Some(reply_to) = self.manager.get_reply_to(request.id()) else {
            return Ok(());
        };
        let mut response = request.respond(reply_to, body);
        response.meta.fixed.is_error = is_error;
        self.identity
            .send_protected(response, mycelia_core::security::SendOptions { is_response: true, ..Default::default() })
            .await
    }

    /// `sendSuccess(request, body)`.
    pub async fn send_success(&self, request: &Message, body: serde_json::Value) -> mycelia_core::error::Result<()> {
        self.send_response(request, body, false).await
    }

    /// `sendError(request, error)`: wraps `error` under the same
    /// `{"error": ...}` shape the kernel's synthetic timeout/handler-error
    /// responses use.
    pub async fn send_error(&self, request: &Message, error: serde_json::Value) -> mycelia_core::error::Result<()> {
        self.send_response(request, serde_json::json!({ "error": error }), true).await
    }
}

/// The `commands` facet: a typed constructor for `command`-kind messages,
/// distinguished from `simple` messages only by `FixedMeta.is_command`
/// (spec.md GLOSSARY "MessageType").
pub struct CommandsFacet;

impl CommandsFacet {
    pub fn build(&self, path: impl Into<String>, body: serde_json::Value) -> Message {
        let mut meta = MessageMeta::new_simple();
        meta.fixed.kind = MessageType::Command;
        meta.fixed.is_command = true;
        Message::with_meta(path, body, meta)
    }
}

/// The `queries` facet: a typed constructor for `query`-kind messages.
pub struct QueriesFacet;

impl QueriesFacet {
    pub fn build(&self, path: impl Into<String>, body: serde_json::Value) -> Message {
        let mut meta = MessageMeta::new_simple();
        meta.fixed.kind = MessageType::Query;
        meta.fixed.is_query = true;
        Message::with_meta(path, body, meta)
    }
}

struct RouterHook;

impl<K: KernelLink + TimeoutEmitter> Hook<BuildContext<K>> for RouterHook {
    fn kind(&self) -> FacetKind {
        FacetKind::Router
    }

    fn source(&self) -> &'static str {
        "default/router"
    }

    fn build(&self, ctx: &BuildContext<K>) -> BuildResult<Facet> {
        Ok(Facet::new(FacetKind::Router, Arc::new(Router::new(ctx.match_policy))))
    }
}

struct ListenersHook;

impl<K: KernelLink + TimeoutEmitter> Hook<BuildContext<K>> for ListenersHook {
    fn kind(&self) -> FacetKind {
        FacetKind::Listeners
    }

    fn source(&self) -> &'static str {
        "default/listeners"
    }

    fn build(&self, _ctx: &BuildContext<K>) -> BuildResult<Facet> {
        Ok(Facet::new(FacetKind::Listeners, Arc::new(ListenerRegistry::new())))
    }
}

struct IdentityHook;

impl<K: KernelLink + TimeoutEmitter> Hook<BuildContext<K>> for IdentityHook {
    fn kind(&self) -> FacetKind {
        FacetKind::Identity
    }

    fn source(&self) -> &'static str {
        "default/identity"
    }

    fn build(&self, ctx: &BuildContext<K>) -> BuildResult<Facet> {
        Ok(Facet::new(FacetKind::Identity, ctx.identity.clone()))
    }
}

struct RequestsHook;

impl<K: KernelLink + TimeoutEmitter> Hook<BuildContext<K>> for RequestsHook {
    fn kind(&self) -> FacetKind {
        FacetKind::Requests
    }

    fn source(&self) -> &'static str {
        "default/requests"
    }

    fn build(&self, ctx: &BuildContext<K>) -> BuildResult<Facet> {
        Ok(Facet::new(
            FacetKind::Requests,
            Arc::new(RequestsFacet {
                engine: ctx.request_engine.clone(),
                identity: ctx.identity.clone(),
            }),
        ))
    }
}

struct ResponsesHook;

impl<K: KernelLink + TimeoutEmitter> Hook<BuildContext<K>> for ResponsesHook {
    fn kind(&self) -> FacetKind {
        FacetKind::Responses
    }

    fn source(&self) -> &'static str {
        "default/responses"
    }

    fn build(&self, ctx: &BuildContext<K>) -> BuildResult<Facet> {
        Ok(Facet::new(
            FacetKind::Responses,
            Arc::new(ResponsesFacet {
                manager: ctx.request_engine.response_manager().clone(),
                identity: ctx.identity.clone(),
            }),
        ))
    }
}

struct CommandsHook;

impl<K: KernelLink + TimeoutEmitter> Hook<BuildContext<K>> for CommandsHook {
    fn kind(&self) -> FacetKind {
        FacetKind::Commands
    }

    fn source(&self) -> &'static str {
        "default/commands"
    }

    fn build(&self, _ctx: &BuildContext<K>) -> BuildResult<Facet> {
        Ok(Facet::new(FacetKind::Commands, Arc::new(CommandsFacet)))
    }
}

struct QueriesHook;

impl<K: KernelLink + TimeoutEmitter> Hook<BuildContext<K>> for QueriesHook {
    fn kind(&self) -> FacetKind {
        FacetKind::Queries
    }

    fn source(&self) -> &'static str {
        "default/queries"
    }

    fn build(&self, _ctx: &BuildContext<K>) -> BuildResult<Facet> {
        Ok(Facet::new(FacetKind::Queries, Arc::new(QueriesFacet)))
    }
}

/// The canonical default hook set every subsystem build starts from.
pub fn default_hooks<K: KernelLink + TimeoutEmitter>() -> Vec<BoxedHook<BuildContext<K>>> {
    vec![
        Arc::new(RouterHook),
        Arc::new(ListenersHook),
        Arc::new(IdentityHook),
        Arc::new(RequestsHook),
        Arc::new(ResponsesHook),
        Arc::new(CommandsHook),
        Arc::new(QueriesHook),
    ]
}
