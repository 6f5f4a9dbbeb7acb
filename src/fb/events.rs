//! Database event notifications.
//!
//! Events arrive on an auxiliary connection opened with
//! `op_connect_request`. A background task owns that connection and routes
//! each `op_event` packet to the subscription registered under its local id.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::connection::FbConnection;
use super::error::{FbError, FbResult};
use super::protocol::{op, EPB_VERSION1};
use super::xdr::XdrRead;

type Registry = Arc<Mutex<HashMap<i32, UnboundedSender<Bytes>>>>;

/// Counter change for one event name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCount {
    pub name: String,
    pub count: u32,
    /// Posts since the previous notification
    pub delta: u32,
}

/// Parse an EPB counts buffer into `(name, count)` pairs.
pub fn parse_event_counts(buf: &[u8]) -> FbResult<Vec<(String, u32)>> {
    let malformed = || FbError::Protocol("malformed event parameter buffer".to_string());
    match buf.first() {
        None => return Ok(Vec::new()),
        Some(&EPB_VERSION1) => {}
        Some(other) => {
            return Err(FbError::Protocol(format!(
                "unsupported event buffer version {}",
                other
            )))
        }
    }
    let mut counts = Vec::new();
    let mut pos = 1;
    while pos < buf.len() {
        let len = buf[pos] as usize;
        let name = buf.get(pos + 1..pos + 1 + len).ok_or_else(malformed)?;
        let raw = buf
            .get(pos + 1 + len..pos + 5 + len)
            .ok_or_else(malformed)?;
        let count = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        counts.push((String::from_utf8_lossy(name).into_owned(), count));
        pos += 5 + len;
    }
    Ok(counts)
}

// ============================================================================
// Subscription
// ============================================================================

/// A set of event names queued together.
///
/// Notifications are one-shot: after [`EventSubscription::recv`] returns,
/// pass the subscription to `FbDatabase::queue_events` again to keep
/// listening from the updated counts.
#[derive(Debug)]
pub struct EventSubscription {
    names: Vec<String>,
    counts: Vec<u32>,
    local_id: i32,
    remote_id: i32,
    tx: UnboundedSender<Bytes>,
    rx: UnboundedReceiver<Bytes>,
}

impl EventSubscription {
    pub fn new<I, S>(names: I) -> FbResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(FbError::Type("no event names given".to_string()));
        }
        if let Some(name) = names.iter().find(|n| n.is_empty() || n.len() > 255) {
            return Err(FbError::Type(format!("invalid event name: {:?}", name)));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            counts: vec![0; names.len()],
            names,
            local_id: 0,
            remote_id: 0,
            tx,
            rx,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Last counts received, in name order.
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn local_id(&self) -> i32 {
        self.local_id
    }

    pub fn remote_id(&self) -> i32 {
        self.remote_id
    }

    /// EPB carrying each name with its last known count.
    pub fn to_epb(&self) -> FbResult<Vec<u8>> {
        let mut epb = vec![EPB_VERSION1];
        for (name, count) in self.names.iter().zip(&self.counts) {
            let len = u8::try_from(name.len())
                .map_err(|_| FbError::Type(format!("event name too long: {}", name)))?;
            epb.push(len);
            epb.extend_from_slice(name.as_bytes());
            epb.extend_from_slice(&count.to_le_bytes());
        }
        Ok(epb)
    }

    pub(crate) fn sender(&self) -> UnboundedSender<Bytes> {
        self.tx.clone()
    }

    pub(crate) fn set_ids(&mut self, local_id: i32, remote_id: i32) {
        self.local_id = local_id;
        self.remote_id = remote_id;
    }

    /// Wait for the next notification.
    ///
    /// Returns every subscribed name with its new count and delta. `None`
    /// once the listener has stopped.
    pub async fn recv(&mut self) -> Option<FbResult<Vec<EventCount>>> {
        let buf = self.rx.recv().await?;
        Some(self.apply(&buf))
    }

    fn apply(&mut self, buf: &[u8]) -> FbResult<Vec<EventCount>> {
        let received = parse_event_counts(buf)?;
        let mut out = Vec::with_capacity(self.names.len());
        for (i, name) in self.names.iter().enumerate() {
            let Some(&(_, count)) = received.iter().find(|(n, _)| n == name) else {
                continue;
            };
            let delta = count.saturating_sub(self.counts[i]);
            self.counts[i] = count;
            out.push(EventCount {
                name: name.clone(),
                count,
                delta,
            });
        }
        Ok(out)
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Owner of the auxiliary connection and its listener task.
pub(crate) struct EventManager {
    registry: Registry,
    task: JoinHandle<()>,
}

impl EventManager {
    /// Spawn the listener on `conn`.
    pub(crate) fn start(conn: FbConnection) -> Self {
        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
        let task = tokio::spawn(listen(conn, registry.clone()));
        Self { registry, task }
    }

    pub(crate) fn register(&self, local_id: i32, sender: UnboundedSender<Bytes>) {
        self.registry.lock().insert(local_id, sender);
    }

    pub(crate) fn unregister(&self, local_id: i32) -> bool {
        self.registry.lock().remove(&local_id).is_some()
    }

    #[cfg(test)]
    fn registered(&self) -> usize {
        self.registry.lock().len()
    }

    pub(crate) fn close(self) {
        self.task.abort();
        self.registry.lock().clear();
    }
}

impl Drop for EventManager {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn listen(mut conn: FbConnection, registry: Registry) {
    loop {
        let operation = match conn.read_operation().await {
            Ok(operation) => operation,
            Err(FbError::ConnectionClosed) => break,
            Err(e) => {
                warn!(error = %e, "event listener read failed");
                break;
            }
        };
        match operation {
            op::EVENT => match read_event(&mut conn).await {
                Ok((local_id, data)) => dispatch(&registry, local_id, data),
                Err(e) => {
                    warn!(error = %e, "event listener read failed");
                    break;
                }
            },
            op::EXIT | op::DISCONNECT => break,
            other => {
                if let Err(e) = conn.process_operation(other).await {
                    warn!(error = %e, operation = other, "event listener read failed");
                    break;
                }
            }
        }
    }
    let _ = conn.disconnect().await;
    debug!("event listener stopped");
}

/// Body of `op_event`: db handle, counts, AST address, local id.
async fn read_event<R: XdrRead>(reader: &mut R) -> FbResult<(i32, Bytes)> {
    reader.read_i32().await?;
    let data = reader.read_buffer().await?;
    reader.skip(8).await?;
    let local_id = reader.read_i32().await?;
    Ok((local_id, data))
}

/// Deliver to the registered subscriber, unregistering it.
fn dispatch(registry: &Registry, local_id: i32, data: Bytes) {
    let Some(sender) = registry.lock().remove(&local_id) else {
        debug!(local_id, "event for unknown subscription");
        return;
    };
    if sender.send(data).is_err() {
        debug!(local_id, "event subscriber dropped");
    }
}
