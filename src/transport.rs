//! Boundary between the overlay-network session and the core.
//!
//! The overlay (an anonymity network reached through a datagram bridge) is
//! an external collaborator: it hands us `(from, bytes)` pairs and accepts
//! `(destination, bytes)` sends, with destinations as opaque base64 strings.
//! [`OverlaySession`] is that seam; [`Transport`] is the thin adapter the
//! core talks to. No retries, no routing decisions, no parsing here.
//!
//! [`MemoryOverlay`] is an in-process session over channels, used by the
//! integration tests to wire several nodes into one mesh.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::batch::PacketBatch;
use crate::wire::Cid;

/// Capacity of a session's inbound datagram queue.
const RECV_QUEUE_DEPTH: usize = 256;

/// A datagram session on the overlay network.
#[async_trait]
pub trait OverlaySession: Send + Sync {
    /// The local destination's base64 address.
    fn local_destination(&self) -> String;

    /// Enqueue one datagram for transmission. The overlay handles
    /// fragmentation.
    async fn send(&self, destination: &str, bytes: Vec<u8>) -> Result<()>;

    /// Take the inbound queue. Yields `(from, bytes)` pairs; may only be
    /// taken once.
    fn take_incoming(&self) -> Option<mpsc::Receiver<(String, Vec<u8>)>>;
}

/// Adapter moving byte buffers between the session and the core.
#[derive(Clone)]
pub struct Transport {
    session: Arc<dyn OverlaySession>,
}

impl Transport {
    pub fn new(session: Arc<dyn OverlaySession>) -> Self {
        Self { session }
    }

    pub fn local_destination(&self) -> String {
        self.session.local_destination()
    }

    pub fn take_incoming(&self) -> Option<mpsc::Receiver<(String, Vec<u8>)>> {
        self.session.take_incoming()
    }

    pub async fn send(&self, destination: &str, bytes: Vec<u8>) -> Result<()> {
        trace!(len = bytes.len(), "send datagram");
        self.session.send(destination, bytes).await
    }

    /// Send every queued outbound packet of a batch. A failed enqueue is
    /// logged and treated as "no response from that node"; the verb's
    /// timeout machinery covers it.
    pub async fn send_batch(&self, batch: &PacketBatch) -> usize {
        let mut sent = 0usize;
        for (destination, bytes) in batch.outbound() {
            match self.send(&destination, bytes).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(owner = %batch.owner(), error = %e, "batch send failed for one node");
                }
            }
        }
        sent
    }

    /// Fill a fresh request-correlation ID with cryptographic randomness.
    pub fn random_cid(&self) -> Cid {
        let mut cid = [0u8; 32];
        OsRng.fill_bytes(&mut cid);
        cid
    }
}

// ============================================================================
// In-memory overlay
// ============================================================================

/// Routing fabric connecting [`MemoryOverlay`] endpoints by destination.
#[derive(Default)]
pub struct MemoryHub {
    endpoints: Mutex<HashMap<String, mpsc::Sender<(String, Vec<u8>)>>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a session for `destination` on this hub.
    pub fn open(self: &Arc<Self>, destination: &str) -> Arc<MemoryOverlay> {
        let (tx, rx) = mpsc::channel(RECV_QUEUE_DEPTH);
        self.endpoints
            .lock()
            .expect("hub lock")
            .insert(destination.to_string(), tx);
        Arc::new(MemoryOverlay {
            hub: Arc::clone(self),
            destination: destination.to_string(),
            incoming: Mutex::new(Some(rx)),
        })
    }

    /// Drop an endpoint; further sends to it fail.
    pub fn close(&self, destination: &str) {
        self.endpoints.lock().expect("hub lock").remove(destination);
    }

    fn sender_for(&self, destination: &str) -> Option<mpsc::Sender<(String, Vec<u8>)>> {
        self.endpoints.lock().expect("hub lock").get(destination).cloned()
    }
}

/// Channel-backed overlay session for tests and local wiring.
pub struct MemoryOverlay {
    hub: Arc<MemoryHub>,
    destination: String,
    incoming: Mutex<Option<mpsc::Receiver<(String, Vec<u8>)>>>,
}

#[async_trait]
impl OverlaySession for MemoryOverlay {
    fn local_destination(&self) -> String {
        self.destination.clone()
    }

    async fn send(&self, destination: &str, bytes: Vec<u8>) -> Result<()> {
        let sender = self
            .hub
            .sender_for(destination)
            .ok_or_else(|| anyhow!("unknown destination"))?;
        sender
            .send((self.destination.clone(), bytes))
            .await
            .map_err(|_| anyhow!("destination closed"))
    }

    fn take_incoming(&self) -> Option<mpsc::Receiver<(String, Vec<u8>)>> {
        self.incoming.lock().expect("overlay lock").take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_overlay_delivers_between_endpoints() {
        let hub = MemoryHub::new();
        let alice = Transport::new(hub.open("alice"));
        let bob = Transport::new(hub.open("bob"));

        let mut bob_rx = bob.take_incoming().unwrap();
        alice.send("bob", b"hello".to_vec()).await.unwrap();

        let (from, bytes) = bob_rx.recv().await.unwrap();
        assert_eq!(from, "alice");
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn send_to_unknown_destination_errors() {
        let hub = MemoryHub::new();
        let alice = Transport::new(hub.open("alice"));
        assert!(alice.send("nobody", vec![1]).await.is_err());
    }

    #[tokio::test]
    async fn incoming_taken_once() {
        let hub = MemoryHub::new();
        let session = hub.open("solo");
        assert!(session.take_incoming().is_some());
        assert!(session.take_incoming().is_none());
    }

    #[tokio::test]
    async fn send_batch_counts_reachable_nodes() {
        let hub = MemoryHub::new();
        let alice = Transport::new(hub.open("alice"));
        let bob = Transport::new(hub.open("bob"));
        let mut bob_rx = bob.take_incoming().unwrap();

        let batch = PacketBatch::new("test");
        batch.add([1u8; 32], "bob".into(), vec![1]);
        batch.add([2u8; 32], "gone".into(), vec![2]);

        assert_eq!(alice.send_batch(&batch).await, 1);
        assert!(bob_rx.recv().await.is_some());
    }

    #[test]
    fn random_cids_are_distinct() {
        let hub = MemoryHub::new();
        let transport = Transport::new(hub.open("x"));
        assert_ne!(transport.random_cid(), transport.random_cid());
    }
}
