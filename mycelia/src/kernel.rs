//! The Kernel: the sole holder of the `sendProtected` pipeline (spec.md
//! §4.6), the subsystem registry, and the process-wide singletons (principal
//! registry, channel manager, response manager, message pool, scheduler).

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

use mycelia_core::config::{MessageSystemConfig, SubsystemConfig};
use mycelia_core::error::{MyceliaError, Result};
use mycelia_core::message::{Message, MessagePool, PoolStats};
use mycelia_core::security::{
    CreatePrincipalOpts, IdentityHandle, KernelLink, Pkr, PrincipalKind, PrincipalRegistry, SendOptions,
};
use mycelia_rpc::{ChannelManager, RegisterChannelOpts, RequestEngine, ResponseEntry, ResponseManager, TimeoutEmitter};
use mycelia_runtime::Scheduler;

use crate::subsystem::Subsystem;

/// The message kernel: validates, stamps, and routes every protected send
/// (spec.md §4.6), and owns the registries every subsystem shares.
pub struct Kernel {
    kernel_pkr: Pkr,
    config: MessageSystemConfig,
    principal_registry: Arc<PrincipalRegistry>,
    channel_manager: Arc<ChannelManager>,
    message_pool: AsyncMutex<MessagePool>,
    subsystems: DashMap<String, Arc<Subsystem<Kernel>>>,
    scheduler: Arc<Scheduler>,
    // Both require an `Arc<Kernel>` to construct (`Kernel` is the
    // `TimeoutEmitter`/shared identity target), so they are filled in once,
    // immediately after `bootstrap`'s own `Arc::new` produces that handle —
    // see the note on `bootstrap` below.
    response_manager: OnceLock<Arc<ResponseManager<Kernel>>>,
    request_engine: OnceLock<Arc<RequestEngine<Kernel>>>,
}

impl Kernel {
    /// Construct the kernel singleton. `Kernel` and its `ResponseManager`
    /// hold `Arc`s back to each other (the manager emits synthetic timeouts
    /// by calling back into the kernel); rather than reach for
    /// `Arc::new_cyclic` — which only hands back a `Weak` during
    /// construction, and `ResponseManager::new` needs an owning `Arc` — the
    /// two late-bound fields are filled in immediately after the kernel's
    /// own `Arc` exists. The resulting cycle is intentional: the kernel is a
    /// process-lifetime singleton that is never expected to be dropped while
    /// its subsystems are live.
    pub fn bootstrap(config: MessageSystemConfig) -> Result<Arc<Kernel>> {
        let principal_registry = Arc::new(PrincipalRegistry::new());
        let kernel_pkr = principal_registry.create_principal(PrincipalKind::Kernel, CreatePrincipalOpts::default())?;
        principal_registry.create_rws(&kernel_pkr)?;

        let mut pool = MessagePool::new(config.pool_size);
        if config.warmup_on_boot {
            pool.warmup(config.pool_size);
        }

        let kernel = Arc::new(Kernel {
            kernel_pkr,
            scheduler: Arc::new(Scheduler::new(config.time_slice_ms)),
            config,
            principal_registry,
            channel_manager: Arc::new(ChannelManager::new()),
            message_pool: AsyncMutex::new(pool),
            subsystems: DashMap::new(),
            response_manager: OnceLock::new(),
            request_engine: OnceLock::new(),
        });

        let response_manager = Arc::new(ResponseManager::new(kernel.clone(), kernel.config.response_max_pending));
        kernel
            .response_manager
            .set(response_manager.clone())
            .unwrap_or_else(|_| unreachable!("response_manager set exactly once during bootstrap"));

        let request_engine = Arc::new(RequestEngine::new(response_manager));
        kernel
            .request_engine
            .set(request_engine)
            .unwrap_or_else(|_| unreachable!("request_engine set exactly once during bootstrap"));

        Ok(kernel)
    }

    pub fn kernel_pkr_owned(&self) -> Pkr {
        self.kernel_pkr.clone()
    }

    pub fn principal_registry(&self) -> &Arc<PrincipalRegistry> {
        &self.principal_registry
    }

    pub fn channel_manager(&self) -> &Arc<ChannelManager> {
        &self.channel_manager
    }

    pub fn request_engine(&self) -> &Arc<RequestEngine<Kernel>> {
        self.request_engine.get().expect("kernel is bootstrapped before use")
    }

    pub fn response_manager(&self) -> &Arc<ResponseManager<Kernel>> {
        self.response_manager.get().expect("kernel is bootstrapped before use")
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn config(&self) -> &MessageSystemConfig {
        &self.config
    }

    pub async fn pool_stats(&self) -> PoolStats {
        self.message_pool.lock().await.stats()
    }

    pub async fn warmup_pool(&self, k: usize) {
        self.message_pool.lock().await.warmup(k);
    }

    /// `registerChannel(route, owner, opts)` (spec.md §4.4), exposed here
    /// since only the kernel knows the owner's PKR provenance is itself valid.
    pub fn register_channel(&self, route: impl Into<String>, owner: Pkr, opts: RegisterChannelOpts) -> Result<()> {
        self.principal_registry.resolve_pkr(&owner)?;
        self.channel_manager.register_channel(route, owner, opts)?;
        Ok(())
    }

    /// Mint a top-level subsystem: a fresh principal + RWS, an `IdentityHandle`
    /// bound to this kernel, a built `Subsystem`, registered and attached to
    /// the scheduler (spec.md §3 "Subsystem", §4.8).
    pub async fn register_subsystem(self: &Arc<Self>, name: impl Into<String>, queue_config: SubsystemConfig) -> Result<Arc<Subsystem<Kernel>>> {
        let name = name.into();
        if self.subsystems.contains_key(&name) {
            return Err(MyceliaError::AccessDenied {
                path: format!("kernel://register/{name}"),
                reason: "a subsystem with this name is already registered",
            });
        }

        let pkr = self.principal_registry.create_principal(
            PrincipalKind::TopLevel,
            CreatePrincipalOpts {
                name: Some(name.clone()),
                ..Default::default()
            },
        )?;
        self.principal_registry.create_rws(&pkr)?;
        let identity = Arc::new(IdentityHandle::new(pkr, self.principal_registry.clone(), self.clone()));

        let subsystem = Arc::new(Subsystem::new(
            name.clone(),
            identity,
            self.clone(),
            queue_config,
            self.config.match_policy,
            self.request_engine().clone(),
            self.config.time_slice_ms,
        ));
        subsystem.build()?;
        subsystem.activate();

        self.scheduler.attach(subsystem.clone() as Arc<dyn mycelia_runtime::Tickable>).await;
        self.subsystems.insert(name, subsystem.clone());
        Ok(subsystem)
    }

    pub fn get_subsystem(&self, name: &str) -> Option<Arc<Subsystem<Kernel>>> {
        self.subsystems.get(name).map(|e| e.clone())
    }

    pub fn subsystem_names(&self) -> Vec<String> {
        self.subsystems.iter().map(|e| e.key().clone()).collect()
    }

    /// Dispose and deregister a subsystem (spec.md §5): detach from the
    /// scheduler first so no further ticks race the teardown, then cancel
    /// its pending requests and dispose its facets.
    pub async fn dispose_subsystem(&self, name: &str) {
        if let Some((_, subsystem)) = self.subsystems.remove(name) {
            self.scheduler.detach(subsystem.name()).await;
            subsystem.dispose();
        }
    }

    /// Release `msg` back to the pool if it was acquired by
    /// `send_pooled_protected` and this is an exit path the processor will
    /// never observe (i.e. `msg` never reached a subsystem queue).
    async fn release_if_pooled(&self, opts: &SendOptions, msg: Message) {
        if opts.from_pool {
            self.message_pool.lock().await.release(msg);
        }
    }
}

impl KernelLink for Kernel {
    fn kernel_pkr(&self) -> Pkr {
        self.kernel_pkr.clone()
    }

    /// The six-step protected send pipeline (spec.md §4.6):
    /// 1. validate the caller's PKR,
    /// 2. stamp `caller`/`callerId`/`callerIdSetBy` so only the kernel can
    ///    authenticate a message's sender,
    /// 3. resolve any pending response-required timer this message answers,
    /// 4. register a new one if the caller asked for a reply and no request
    ///    builder already registered it,
    /// 5. enforce channel ACLs,
    /// 6. route: one-shot replies resolve directly against the request
    ///    engine; everything else reaches a subsystem's queue.
    async fn send_protected(&self, caller: Pkr, mut msg: Message, mut opts: SendOptions) -> Result<()> {
        if let Err(err) = self.principal_registry.resolve_pkr(&caller) {
            self.release_if_pooled(&opts, msg).await;
            return Err(err);
        }

        msg.meta.fixed.caller = Some(caller.uuid.clone());
        opts.caller_id = Some(caller.public_key.clone());
        opts.caller_id_set_by = Some(self.kernel_pkr.public_key.clone());

        if msg.meta.fixed.is_response == Some(true) {
            self.response_manager().handle_response(&msg);
        }

        if let Some(required) = opts.response_required.clone() {
            if !self.response_manager().is_pending(msg.id()) {
                self.response_manager()
                    .register_response_required_for(caller.clone(), &msg, required.reply_to.clone(), required.timeout_ms);
            }
            msg.meta.mutable.response_required = true;
            msg.meta.mutable.reply_to = Some(required.reply_to);
        }

        let path = match msg.parsed_path() {
            Ok(path) => path,
            Err(err) => {
                self.release_if_pooled(&opts, msg).await;
                return Err(err);
            }
        };
        if path.is_channel_path() && !self.channel_manager.verify_access(msg.path(), &caller.public_key, &self.kernel_pkr.public_key) {
            let err = MyceliaError::AccessDenied {
                path: msg.path().to_string(),
                reason: "caller is not a participant of this channel",
            };
            self.release_if_pooled(&opts, msg).await;
            return Err(err);
        }

        if path.is_one_shot() {
            // Scoped guard (spec.md §4.6): the one-shot resolver runs on the
            // calling stack, so a pool-acquired message is released right
            // here rather than by the processor, which this path bypasses.
            if opts.from_pool {
                let for_pool = msg.clone();
                self.request_engine().resolve_one_shot(msg.path(), msg);
                self.message_pool.lock().await.release(for_pool);
            } else {
                self.request_engine().resolve_one_shot(msg.path(), msg);
            }
            return Ok(());
        }

        let subsystem = match self.subsystems.get(&path.subsystem).map(|e| e.clone()) {
            Some(subsystem) => subsystem,
            None => {
                let err = MyceliaError::NoRoute { path: msg.path().to_string() };
                self.release_if_pooled(&opts, msg).await;
                return Err(err);
            }
        };
        // Beyond this point `msg` is owned by the subsystem's queue; release
        // happens later, once `Processor::process` has dispatched it (see
        // `release_pooled` below), since the scoped guard can't span a
        // message's time sitting unprocessed in a queue.
        subsystem.accept(msg, opts).await
    }

    async fn send_pooled_protected(&self, caller: Pkr, path: String, body: serde_json::Value, opts: SendOptions) -> Result<()> {
        let msg = self.message_pool.lock().await.acquire(path, body, None)?;
        let mut opts = opts;
        opts.from_pool = true;
        self.send_protected(caller, msg, opts).await
    }

    async fn release_pooled(&self, msg: Message) {
        self.message_pool.lock().await.release(msg);
    }
}

impl TimeoutEmitter for Kernel {
    /// Deliver a synthetic error response to `entry.reply_to` when nobody
    /// answered in time (spec.md §4.5). Goes through the ordinary protected
    /// send path under the kernel's own identity, marked as a response so
    /// step 3 of `send_protected` resolves (no-ops, since the entry has
    /// already been removed by the timer that fired this callback) rather
    /// than re-registering a new timeout.
    async fn emit_timeout(&self, entry: ResponseEntry) {
        let mut msg = Message::new(
            entry.reply_to.clone(),
            serde_json::json!({ "error": { "kind": "timeout", "timeoutMs": entry.timeout_ms } }),
        );
        msg.meta.fixed.is_response = Some(true);
        msg.meta.fixed.is_error = true;
        msg.meta.fixed.in_reply_to = Some(entry.correlation_id.clone());
        msg.meta.mutable.error = Some(serde_json::json!({ "kind": "timeout", "timeoutMs": entry.timeout_ms }));

        if let Err(err) = self.send_protected(self.kernel_pkr.clone(), msg, SendOptions { is_response: true, ..Default::default() }).await {
            tracing::warn!(correlation_id = %entry.correlation_id, error = %err, "failed to deliver synthetic timeout response");
        }
    }
}
