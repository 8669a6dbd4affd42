//! The node runtime.
//!
//! A [`Node`] owns its identity, the message-id counter, the handler table,
//! the pending-callback table and the periodic tasks. [`Node::run`] reads
//! inbound lines one at a time and hands each message to a callback or a
//! handler on its own tokio task, so a handler waiting on a service reply
//! never blocks the line that carries that reply.

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::message::{Body, Message};
use crate::transport;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Message type of the handshake, handled by the runtime itself.
pub const INIT: &str = "init";

/// Who this node is and who else is in the cluster, fixed by `init`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub node_id: String,
    pub node_ids: Vec<String>,
}

impl Identity {
    /// Every cluster member except this node.
    pub fn peers(&self) -> impl Iterator<Item = &str> {
        self.node_ids
            .iter()
            .map(String::as_str)
            .filter(move |id| *id != self.node_id)
    }
}

/// Key a pending callback is filed under.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CallbackKey {
    /// Caller-chosen token, matched against an inbound `callback_id`.
    Explicit(String),
    /// Outgoing `msg_id`, matched against an inbound `in_reply_to`.
    MsgId(u64),
}

/// One-shot continuation consuming the reply envelope.
pub type Callback = Box<dyn FnOnce(Message) + Send + 'static>;

type PeriodicFn = Arc<dyn Fn(Node) -> BoxFuture<'static, ()> + Send + Sync>;

struct PeriodicTask {
    name: String,
    interval: Duration,
    run: PeriodicFn,
}

/// A request handler for one message type.
///
/// Any `Fn(Node, Message) -> impl Future<Output = Result<()>>` closure is a
/// handler. Returning `Err` makes the runtime answer the request with an
/// `error` body.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, node: Node, msg: Message) -> Result<()>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Node, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, node: Node, msg: Message) -> Result<()> {
        (self)(node, msg).await
    }
}

/// Collects handlers and periodic tasks, then freezes them into a [`Node`].
pub struct NodeBuilder {
    config: NodeConfig,
    handlers: HashMap<String, Arc<dyn Handler>>,
    periodic: Vec<PeriodicTask>,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self::with_config(NodeConfig::default())
    }

    pub fn with_config(config: NodeConfig) -> Self {
        Self {
            config,
            handlers: HashMap::new(),
            periodic: Vec::new(),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Register `handler` for messages whose body `type` is `kind`.
    ///
    /// Fails with [`NodeError::DuplicateHandler`] if `kind` is taken. `init`
    /// always is.
    pub fn handler<H: Handler>(mut self, kind: impl Into<String>, handler: H) -> Result<Self> {
        let kind = kind.into();
        if kind == INIT || self.handlers.contains_key(&kind) {
            return Err(NodeError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, Arc::new(handler));
        Ok(self)
    }

    /// Run `task` forever every `interval`, starting once `init` completes.
    pub fn periodic<F, Fut>(mut self, name: impl Into<String>, interval: Duration, task: F) -> Self
    where
        F: Fn(Node) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let run: PeriodicFn = Arc::new(move |node| task(node).boxed());
        self.periodic.push(PeriodicTask {
            name: name.into(),
            interval,
            run,
        });
        self
    }

    pub fn build(self) -> Node {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Node {
            inner: Arc::new(NodeInner {
                config: self.config,
                identity: OnceLock::new(),
                next_msg_id: Mutex::new(0),
                callbacks: Mutex::new(HashMap::new()),
                handlers: self.handlers,
                periodic: self.periodic,
                outbound,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct NodeInner {
    config: NodeConfig,
    identity: OnceLock<Identity>,
    next_msg_id: Mutex<u64>,
    callbacks: Mutex<HashMap<CallbackKey, Callback>>,
    handlers: HashMap<String, Arc<dyn Handler>>,
    periodic: Vec<PeriodicTask>,
    outbound: mpsc::UnboundedSender<Message>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    shutdown: CancellationToken,
}

/// Cheap-to-clone handle on a running node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    pub fn builder() -> NodeBuilder {
        NodeBuilder::new()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn identity(&self) -> Result<&Identity> {
        self.inner.identity.get().ok_or(NodeError::NotInitialized)
    }

    pub fn node_id(&self) -> Result<&str> {
        self.identity().map(|identity| identity.node_id.as_str())
    }

    /// Send `body` to `dest`, stamping a fresh `msg_id` unless one is set.
    /// Returns the message id the body went out with.
    pub fn send(&self, dest: &str, body: Body) -> Result<u64> {
        self.send_inner(dest, body, None)
    }

    /// Send `body` and file `callback` to receive the reply.
    ///
    /// The callback is keyed by `callback_id` when given, otherwise by the
    /// outgoing `msg_id`. It fires at most once and is never fired if no reply
    /// arrives.
    pub fn send_with_callback<F>(
        &self,
        dest: &str,
        body: Body,
        callback_id: Option<String>,
        callback: F,
    ) -> Result<u64>
    where
        F: FnOnce(Message) + Send + 'static,
    {
        self.send_inner(dest, body, Some((callback_id, Box::new(callback))))
    }

    /// Answer `request`: sends `body` back to its source with `in_reply_to`
    /// set to the request's `msg_id`.
    pub fn reply(&self, request: &Message, mut body: Body) -> Result<u64> {
        body.in_reply_to = request.body.msg_id;
        self.send(&request.src, body)
    }

    pub fn reply_error(&self, request: &Message, err: &NodeError) -> Result<u64> {
        self.reply(request, Body::error(err))
    }

    /// Drop a pending callback without firing it.
    pub fn cancel_callback(&self, key: &CallbackKey) -> bool {
        self.inner.callbacks.lock().remove(key).is_some()
    }

    pub fn pending_callbacks(&self) -> usize {
        self.inner.callbacks.lock().len()
    }

    /// Token cancelled when the node stops; background work should watch it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn send_inner(
        &self,
        dest: &str,
        mut body: Body,
        callback: Option<(Option<String>, Callback)>,
    ) -> Result<u64> {
        let src = self.node_id()?.to_string();
        let allocated = self.next_msg_id();
        let msg_id = *body.msg_id.get_or_insert(allocated);

        let key = callback.map(|(callback_id, callback)| {
            let key = match callback_id {
                Some(id) => CallbackKey::Explicit(id),
                None => CallbackKey::MsgId(msg_id),
            };
            self.inner.callbacks.lock().insert(key.clone(), callback);
            key
        });

        let message = Message {
            src,
            dest: dest.to_string(),
            body,
        };
        debug!(dest, body = ?message.body, "send");
        if self.inner.outbound.send(message).is_err() {
            if let Some(key) = key {
                self.cancel_callback(&key);
            }
            return Err(NodeError::Closed);
        }
        Ok(msg_id)
    }

    fn next_msg_id(&self) -> u64 {
        let mut next = self.inner.next_msg_id.lock();
        *next += 1;
        *next
    }

    /// Serve `reader` -> handlers -> `writer` until the inbound stream ends or
    /// [`Node::shutdown`] is called. Either way the shutdown token is
    /// cancelled on return and queued outbound lines are flushed.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let outbound = self
            .inner
            .outbound_rx
            .lock()
            .take()
            .ok_or_else(|| NodeError::Crash("node is already running".into()))?;
        let shutdown = self.inner.shutdown.clone();
        let writer_task = tokio::spawn(transport::run_writer(writer, outbound, shutdown.clone()));

        let mut reader = BufReader::new(reader);
        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                line = transport::read_line(&mut reader) => match line {
                    Ok(Some(line)) => self.dispatch_line(&line),
                    Ok(None) => {
                        debug!("inbound stream closed");
                        break Ok(());
                    }
                    Err(err) => break Err(NodeError::from(err)),
                },
            }
        };

        shutdown.cancel();
        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "outbound writer failed"),
            Err(err) => warn!(error = %err, "outbound writer panicked"),
        }
        result
    }

    fn dispatch_line(&self, line: &str) {
        match Message::decode(line) {
            Ok(message) if message.body.kind == INIT => self.handle_init(message),
            Ok(message) => self.dispatch(message),
            Err(err) => warn!(error = %err, line, "dropping undecodable line"),
        }
    }

    /// Route one inbound message: a pending callback by `callback_id`, then a
    /// pending callback by `in_reply_to`, then the handler for its `type`.
    /// Anything else is dropped.
    pub fn dispatch(&self, message: Message) {
        if let Some(callback) = self.take_callback(&message.body) {
            tokio::spawn(async move { callback(message) });
            return;
        }

        match self.inner.handlers.get(&message.body.kind) {
            Some(handler) => {
                let handler = Arc::clone(handler);
                let node = self.clone();
                tokio::spawn(async move { node.run_handler(handler, message).await });
            }
            None => debug!(
                src = %message.src,
                kind = %message.body.kind,
                "dropping unroutable message"
            ),
        }
    }

    fn take_callback(&self, body: &Body) -> Option<Callback> {
        let mut callbacks = self.inner.callbacks.lock();
        if let Some(id) = &body.callback_id {
            if let Some(callback) = callbacks.remove(&CallbackKey::Explicit(id.clone())) {
                return Some(callback);
            }
        }
        body.in_reply_to
            .and_then(|id| callbacks.remove(&CallbackKey::MsgId(id)))
    }

    async fn run_handler(&self, handler: Arc<dyn Handler>, message: Message) {
        let src = message.src.clone();
        let kind = message.body.kind.clone();
        let msg_id = message.body.msg_id;

        if let Err(err) = handler.handle(self.clone(), message).await {
            warn!(%src, %kind, error = %err, "handler failed");
            if msg_id.is_some() {
                let mut body = Body::error(&err);
                body.in_reply_to = msg_id;
                if let Err(err) = self.send(&src, body) {
                    warn!(%src, error = %err, "could not deliver error reply");
                }
            }
        }
    }

    fn handle_init(&self, message: Message) {
        let body = match self.initialise(&message.body) {
            Ok(()) => Body::new("init_ok"),
            Err(err) => {
                warn!(error = %err, "rejecting init");
                Body::error(&err)
            }
        };
        if let Err(err) = self.reply(&message, body) {
            warn!(error = %err, "could not answer init");
        }
    }

    fn initialise(&self, body: &Body) -> Result<()> {
        let node_id: String = body.field("node_id")?;
        let node_ids: Vec<String> = body
            .optional("node_ids")?
            .unwrap_or_else(|| vec![node_id.clone()]);

        self.inner
            .identity
            .set(Identity { node_id, node_ids })
            .map_err(|_| NodeError::MalformedRequest("node already initialised".into()))?;

        let identity = self.identity()?;
        info!(node_id = %identity.node_id, cluster = ?identity.node_ids, "node initialised");
        self.start_periodic_tasks();
        Ok(())
    }

    fn start_periodic_tasks(&self) {
        for task in &self.inner.periodic {
            let node = self.clone();
            let run = Arc::clone(&task.run);
            let interval = task.interval;
            let name = task.name.clone();
            let shutdown = self.inner.shutdown.clone();

            tokio::spawn(async move {
                debug!(task = %name, ?interval, "periodic task started");
                loop {
                    run(node.clone()).await;
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                debug!(task = %name, "periodic task stopped");
            });
        }
    }
}
