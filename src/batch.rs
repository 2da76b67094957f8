//! In-flight request batches and the registry correlating response CIDs.
//!
//! A [`PacketBatch`] is one verb invocation's worth of outbound requests:
//! an ordered set of `(CID, destination, bytes)` slots plus the responses
//! that have come back so far. Two wait primitives cover the verbs' needs:
//!
//! - [`PacketBatch::wait_first`] returns as soon as at least one response is
//!   stored, or at the deadline;
//! - [`PacketBatch::wait_last`] returns once no response has arrived for a
//!   full timeout window — every arrival re-arms the window.
//!
//! The [`BatchRegistry`] owns the process-wide CID → batch map. A CID maps
//! to at most one live batch; responses whose CID is unknown fall through to
//! the general inbound handler. Verbs always remove their batch before
//! returning, releasing any waiters even on timeout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::wire::{Cid, CommPacket};

#[derive(Clone, Copy, Debug, Default)]
struct Progress {
    responses: usize,
    released: bool,
}

struct BatchState {
    outbound: Vec<(Cid, String, Vec<u8>)>,
    responses: HashMap<Cid, CommPacket>,
}

/// One in-flight group of outbound requests sharing an owner label.
pub struct PacketBatch {
    owner: String,
    state: Mutex<BatchState>,
    progress_tx: watch::Sender<Progress>,
}

impl PacketBatch {
    pub fn new(owner: impl Into<String>) -> Arc<Self> {
        let (progress_tx, _) = watch::channel(Progress::default());
        Arc::new(Self {
            owner: owner.into(),
            state: Mutex::new(BatchState { outbound: Vec::new(), responses: HashMap::new() }),
            progress_tx,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Append an outbound slot. A CID already present in this batch is
    /// rejected.
    pub fn add(&self, cid: Cid, destination: String, bytes: Vec<u8>) -> bool {
        let mut state = self.state.lock().expect("batch lock");
        if state.outbound.iter().any(|(existing, _, _)| *existing == cid) {
            warn!(owner = %self.owner, "duplicate CID refused");
            return false;
        }
        state.outbound.push((cid, destination, bytes));
        true
    }

    /// Store a response if its CID belongs to this batch.
    pub fn accept(&self, packet: CommPacket) -> bool {
        let mut state = self.state.lock().expect("batch lock");
        if !state.outbound.iter().any(|(cid, _, _)| *cid == packet.cid) {
            return false;
        }
        state.responses.insert(packet.cid, packet);
        let count = state.responses.len();
        drop(state);
        self.progress_tx.send_modify(|progress| progress.responses = count);
        true
    }

    pub fn cids(&self) -> Vec<Cid> {
        let state = self.state.lock().expect("batch lock");
        state.outbound.iter().map(|(cid, _, _)| *cid).collect()
    }

    /// Snapshot of the queued outbound packets, in insertion order.
    pub fn outbound(&self) -> Vec<(String, Vec<u8>)> {
        let state = self.state.lock().expect("batch lock");
        state
            .outbound
            .iter()
            .map(|(_, dest, bytes)| (dest.clone(), bytes.clone()))
            .collect()
    }

    pub fn packet_count(&self) -> usize {
        self.state.lock().expect("batch lock").outbound.len()
    }

    pub fn response_count(&self) -> usize {
        self.state.lock().expect("batch lock").responses.len()
    }

    pub fn responses(&self) -> Vec<CommPacket> {
        let state = self.state.lock().expect("batch lock");
        state.responses.values().cloned().collect()
    }

    /// Block until at least one response is stored or the deadline elapses.
    pub async fn wait_first(&self, timeout: Duration) {
        let mut rx = self.progress_tx.subscribe();
        let _ = tokio::time::timeout(
            timeout,
            rx.wait_for(|progress| progress.responses >= 1 || progress.released),
        )
        .await;
    }

    /// Block until no response has arrived for a full `timeout` window.
    pub async fn wait_last(&self, timeout: Duration) {
        let mut rx = self.progress_tx.subscribe();
        loop {
            let seen = {
                let progress = *rx.borrow();
                if progress.released {
                    return;
                }
                progress.responses
            };
            match tokio::time::timeout(
                timeout,
                rx.wait_for(|progress| progress.responses > seen || progress.released),
            )
            .await
            {
                Ok(_) => continue,
                Err(_) => return,
            }
        }
    }

    fn release(&self) {
        self.progress_tx.send_modify(|progress| progress.released = true);
    }

    fn rearm(&self) {
        self.progress_tx.send_modify(|progress| progress.released = false);
    }
}

impl std::fmt::Debug for PacketBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketBatch")
            .field("owner", &self.owner)
            .field("packets", &self.packet_count())
            .field("responses", &self.response_count())
            .finish()
    }
}

/// Process-wide set of live batches, indexed by every outstanding CID.
#[derive(Default)]
pub struct BatchRegistry {
    by_cid: Mutex<HashMap<Cid, Arc<PacketBatch>>>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every CID of the batch. Called each time the batch is
    /// (re)sent; re-registering after [`Self::remove_batch`] re-arms its
    /// waiters.
    pub fn register(&self, batch: &Arc<PacketBatch>) {
        batch.rearm();
        let mut by_cid = self.by_cid.lock().expect("registry lock");
        for cid in batch.cids() {
            if let Some(previous) = by_cid.insert(cid, Arc::clone(batch)) {
                if !Arc::ptr_eq(&previous, batch) {
                    warn!(owner = %previous.owner(), "CID already owned by another batch");
                }
            }
        }
    }

    /// Unregister all of a batch's CIDs and release its waiters.
    pub fn remove_batch(&self, batch: &Arc<PacketBatch>) {
        {
            let mut by_cid = self.by_cid.lock().expect("registry lock");
            for cid in batch.cids() {
                if let Some(owner) = by_cid.get(&cid) {
                    if Arc::ptr_eq(owner, batch) {
                        by_cid.remove(&cid);
                    }
                }
            }
        }
        batch.release();
    }

    /// Route a response packet to its pending batch. Returns `true` iff the
    /// CID was recognized.
    pub fn deliver(&self, packet: CommPacket) -> bool {
        let batch = {
            let by_cid = self.by_cid.lock().expect("registry lock");
            by_cid.get(&packet.cid).cloned()
        };
        match batch {
            Some(batch) => {
                debug!(owner = %batch.owner(), "response correlated");
                batch.accept(packet)
            }
            None => false,
        }
    }

    /// Remove every live batch, releasing all waiters. Used at shutdown.
    pub fn clear(&self) {
        let batches: Vec<Arc<PacketBatch>> = {
            let by_cid = self.by_cid.lock().expect("registry lock");
            by_cid.values().cloned().collect()
        };
        for batch in batches {
            self.remove_batch(&batch);
        }
    }

    pub fn pending_cids(&self) -> usize {
        self.by_cid.lock().expect("registry lock").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{PacketType, PROTOCOL_V4};
    use std::time::Instant;

    fn response(cid: Cid) -> CommPacket {
        CommPacket {
            packet_type: PacketType::Response,
            ver: PROTOCOL_V4,
            cid,
            payload: vec![0, 0, 0],
            from: "peer".into(),
        }
    }

    #[test]
    fn duplicate_cid_rejected_within_batch() {
        let batch = PacketBatch::new("test");
        assert!(batch.add([1u8; 32], "a".into(), vec![1]));
        assert!(!batch.add([1u8; 32], "a".into(), vec![2]));
        assert!(batch.add([2u8; 32], "a".into(), vec![3]));
        assert_eq!(batch.packet_count(), 2);
    }

    #[test]
    fn accept_only_known_cids() {
        let batch = PacketBatch::new("test");
        batch.add([1u8; 32], "a".into(), vec![]);
        assert!(batch.accept(response([1u8; 32])));
        assert!(!batch.accept(response([9u8; 32])));
        assert_eq!(batch.response_count(), 1);
    }

    #[tokio::test]
    async fn wait_first_returns_on_response() {
        let batch = PacketBatch::new("test");
        batch.add([1u8; 32], "a".into(), vec![]);

        let waiter = Arc::clone(&batch);
        let handle = tokio::spawn(async move {
            waiter.wait_first(Duration::from_secs(5)).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        batch.accept(response([1u8; 32]));

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait_first should complete quickly")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_first_times_out_without_responses() {
        let batch = PacketBatch::new("test");
        batch.add([1u8; 32], "a".into(), vec![]);
        let start = Instant::now();
        batch.wait_first(Duration::from_millis(50)).await;
        assert!(start.elapsed() >= Duration::from_millis(45));
        assert_eq!(batch.response_count(), 0);
    }

    #[tokio::test]
    async fn wait_last_extends_while_responses_arrive() {
        let batch = PacketBatch::new("test");
        for seed in 0..3u8 {
            batch.add([seed; 32], "a".into(), vec![]);
        }

        let feeder = Arc::clone(&batch);
        tokio::spawn(async move {
            for seed in 0..3u8 {
                tokio::time::sleep(Duration::from_millis(30)).await;
                feeder.accept(response([seed; 32]));
            }
        });

        let start = Instant::now();
        batch.wait_last(Duration::from_millis(80)).await;
        // three arrivals 30 ms apart, then one full quiet window
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert_eq!(batch.response_count(), 3);
    }

    #[tokio::test]
    async fn registry_delivers_by_cid_and_falls_through() {
        let registry = BatchRegistry::new();
        let batch = PacketBatch::new("verb");
        batch.add([7u8; 32], "a".into(), vec![]);
        registry.register(&batch);

        assert!(registry.deliver(response([7u8; 32])));
        assert!(!registry.deliver(response([8u8; 32])));
        assert_eq!(batch.response_count(), 1);

        registry.remove_batch(&batch);
        assert!(!registry.deliver(response([7u8; 32])));
        assert_eq!(registry.pending_cids(), 0);
    }

    #[tokio::test]
    async fn remove_batch_releases_waiters() {
        let registry = Arc::new(BatchRegistry::new());
        let batch = PacketBatch::new("verb");
        batch.add([7u8; 32], "a".into(), vec![]);
        registry.register(&batch);

        let waiter = Arc::clone(&batch);
        let handle = tokio::spawn(async move {
            waiter.wait_last(Duration::from_secs(30)).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.remove_batch(&batch);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("release should unblock wait_last")
            .unwrap();
    }

    #[tokio::test]
    async fn reregister_rearms_waits() {
        let registry = BatchRegistry::new();
        let batch = PacketBatch::new("verb");
        batch.add([1u8; 32], "a".into(), vec![]);
        registry.register(&batch);
        registry.remove_batch(&batch);

        // a released batch waits return immediately
        let start = Instant::now();
        batch.wait_first(Duration::from_secs(5)).await;
        assert!(start.elapsed() < Duration::from_millis(50));

        // re-sending re-arms the timeout behavior
        registry.register(&batch);
        let start = Instant::now();
        batch.wait_first(Duration::from_millis(60)).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
