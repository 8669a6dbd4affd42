//! In-process cluster simulation for tests and demos.
//!
//! Each node runs its real dispatch loop over in-memory pipes. A router reads
//! every line a node writes and delivers it to another node, to a registered
//! service, or to the client queue. Links between two parties can be cut and
//! healed to model partitions; messages over a cut link are dropped.

use crate::error::{NodeError, Result};
use crate::message::{Body, Message};
use crate::node::{Node, INIT};
use crate::transport;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{trace, warn};

const PIPE_CAPACITY: usize = 64 * 1024;
const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Default source id for client requests.
pub const CLIENT: &str = "c1";

/// A synchronous stand-in for an external service. Returns the reply body, or
/// `None` to stay silent. `in_reply_to` is filled in by the router.
pub type Service = Box<dyn FnMut(&Message) -> Option<Body> + Send>;

struct Router {
    inboxes: Mutex<HashMap<String, mpsc::UnboundedSender<Message>>>,
    services: Mutex<HashMap<String, Service>>,
    down: Mutex<HashSet<(String, String)>>,
    client_tx: mpsc::UnboundedSender<Message>,
}

fn link(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl Router {
    fn route(&self, message: Message) {
        if self.down.lock().contains(&link(&message.src, &message.dest)) {
            trace!(src = %message.src, dest = %message.dest, "link down, dropping");
            return;
        }

        let inbox = self.inboxes.lock().get(&message.dest).cloned();
        if let Some(inbox) = inbox {
            let _ = inbox.send(message);
            return;
        }

        let reply = {
            let mut services = self.services.lock();
            services.get_mut(&message.dest).map(|service| service(&message))
        };
        match reply {
            Some(Some(mut body)) => {
                body.in_reply_to = message.body.msg_id;
                self.route(Message {
                    src: message.dest,
                    dest: message.src,
                    body,
                });
            }
            Some(None) => {}
            None => {
                let _ = self.client_tx.send(message);
            }
        }
    }
}

/// A set of nodes wired together in memory.
pub struct Cluster {
    router: Arc<Router>,
    client_rx: mpsc::UnboundedReceiver<Message>,
    unclaimed: VecDeque<Message>,
    nodes: BTreeMap<String, Node>,
    next_client_msg_id: u64,
}

impl Cluster {
    pub fn new() -> Self {
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        Self {
            router: Arc::new(Router {
                inboxes: Mutex::new(HashMap::new()),
                services: Mutex::new(HashMap::new()),
                down: Mutex::new(HashSet::new()),
                client_tx,
            }),
            client_rx,
            unclaimed: VecDeque::new(),
            nodes: BTreeMap::new(),
            next_client_msg_id: 0,
        }
    }

    /// Start `node` under `id`. Must be called inside a tokio runtime.
    pub fn add_node(&mut self, id: impl Into<String>, node: Node) {
        let id = id.into();
        let (mut inbox_writer, node_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (node_writer, outbox_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel::<Message>();
        self.router.inboxes.lock().insert(id.clone(), inbox_tx);

        let runner = node.clone();
        let name = id.clone();
        tokio::spawn(async move {
            if let Err(err) = runner.run(node_reader, node_writer).await {
                warn!(node = %name, error = %err, "simulated node stopped with error");
            }
        });

        tokio::spawn(async move {
            while let Some(message) = inbox_rx.recv().await {
                if transport::write_message(&mut inbox_writer, &message).await.is_err() {
                    break;
                }
            }
        });

        let router = Arc::clone(&self.router);
        tokio::spawn(async move {
            let mut reader = BufReader::new(outbox_reader);
            while let Ok(Some(line)) = transport::read_line(&mut reader).await {
                match Message::decode(&line) {
                    Ok(message) => router.route(message),
                    Err(err) => warn!(error = %err, "node wrote an undecodable line"),
                }
            }
        });

        self.nodes.insert(id, node);
    }

    /// Answer messages addressed to `name` with `service`.
    pub fn add_service<F>(&mut self, name: impl Into<String>, service: F)
    where
        F: FnMut(&Message) -> Option<Body> + Send + 'static,
    {
        self.router
            .services
            .lock()
            .insert(name.into(), Box::new(service));
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Send `body` from `src`, stamping a client `msg_id` if it has none.
    pub fn send_from(&mut self, src: &str, dest: &str, mut body: Body) -> u64 {
        self.next_client_msg_id += 1;
        let msg_id = *body.msg_id.get_or_insert(self.next_client_msg_id);
        self.router.route(Message {
            src: src.to_string(),
            dest: dest.to_string(),
            body,
        });
        msg_id
    }

    pub fn send(&mut self, dest: &str, body: Body) -> u64 {
        self.send_from(CLIENT, dest, body)
    }

    /// Next message addressed to anyone outside the cluster.
    pub async fn recv(&mut self) -> Option<Message> {
        self.recv_within(DEFAULT_WAIT).await
    }

    pub async fn recv_within(&mut self, wait: Duration) -> Option<Message> {
        if let Some(message) = self.unclaimed.pop_front() {
            return Some(message);
        }
        tokio::time::timeout(wait, self.client_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Send a client request and wait for the reply to it. Other client-bound
    /// messages seen meanwhile stay queued for [`Cluster::recv`].
    pub async fn request(&mut self, dest: &str, body: Body) -> Option<Message> {
        let msg_id = self.send(dest, body);
        let deadline = tokio::time::Instant::now() + DEFAULT_WAIT;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let message = tokio::time::timeout(left, self.client_rx.recv())
                .await
                .ok()
                .flatten()?;
            if message.dest == CLIENT && message.body.in_reply_to == Some(msg_id) {
                return Some(message);
            }
            self.unclaimed.push_back(message);
        }
    }

    /// Run the `init` handshake on every node with full membership.
    pub async fn init_all(&mut self) -> Result<()> {
        let ids = self.node_ids();
        for id in &ids {
            let body = Body::new(INIT)
                .with("node_id", id.clone())
                .with("node_ids", ids.clone());
            match self.request(id, body).await {
                Some(reply) if reply.body.kind == "init_ok" => {}
                other => {
                    return Err(NodeError::Crash(format!(
                        "{} did not complete init: {:?}",
                        id, other
                    )))
                }
            }
        }
        Ok(())
    }

    /// Cut the link between `a` and `b` in both directions.
    pub fn partition(&self, a: &str, b: &str) {
        self.router.down.lock().insert(link(a, b));
    }

    pub fn heal(&self, a: &str, b: &str) {
        self.router.down.lock().remove(&link(a, b));
    }

    pub fn heal_all(&self) {
        self.router.down.lock().clear();
    }

    pub fn shutdown(&self) {
        for node in self.nodes.values() {
            node.shutdown();
        }
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.shutdown();
    }
}
