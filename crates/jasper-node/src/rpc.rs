//! Blocking-style calls to external services (`lin-kv`, `lww-kv`, ...).

use crate::error::{NodeError, Result};
use crate::message::Body;
use crate::node::{CallbackKey, Node};
use tokio::sync::oneshot;
use tracing::debug;

impl Node {
    /// Send `body` to `service` and wait for its reply body.
    ///
    /// Waits at most `rpc_timeout`, then fails with [`NodeError::Timeout`] and
    /// forgets the pending callback, so a late reply is dropped. Each call has
    /// its own reply channel and is safe to run from many handlers at once.
    /// Error replies are returned as bodies; use [`Body::into_result`] to
    /// turn them into typed errors.
    pub async fn service_call(&self, service: &str, body: Body) -> Result<Body> {
        let (tx, rx) = oneshot::channel();
        let msg_id = self.send_with_callback(service, body, None, move |reply| {
            let _ = tx.send(reply.body);
        })?;

        let timeout = self.config().rpc_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(NodeError::Closed),
            Err(_) => {
                self.cancel_callback(&CallbackKey::MsgId(msg_id));
                debug!(service, msg_id, ?timeout, "service call timed out");
                Err(NodeError::Timeout(format!(
                    "{} did not answer msg {} within {:?}",
                    service, msg_id, timeout
                )))
            }
        }
    }

    /// [`Node::service_call`], with `error` replies turned into typed errors.
    pub async fn service_request(&self, service: &str, body: Body) -> Result<Body> {
        self.service_call(service, body).await?.into_result()
    }
}
