//! Inbound packet dispatcher.
//!
//! Every datagram from the overlay goes through one pipeline:
//! parse the envelope, offer the packet to the batch registry (a recognized
//! CID means some verb is waiting on it), and otherwise hand it to the DHT
//! engine's handler for its type. Parse failures are logged and dropped
//! without a response; unknown types answer INVALID_PACKET via the engine;
//! the reserved relay types return silently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::batch::BatchRegistry;
use crate::dht::DhtEngine;
use crate::wire::{CommPacket, PacketType};

pub struct PacketDispatcher {
    registry: Arc<BatchRegistry>,
    engine: Arc<DhtEngine>,
}

impl PacketDispatcher {
    pub fn new(registry: Arc<BatchRegistry>, engine: Arc<DhtEngine>) -> Self {
        Self { registry, engine }
    }

    /// Drain the inbound queue until it closes or the node stops.
    pub async fn run(
        &self,
        mut incoming: mpsc::Receiver<(String, Vec<u8>)>,
        started: Arc<AtomicBool>,
    ) {
        info!("packet dispatcher running");
        while let Some((from, bytes)) = incoming.recv().await {
            if !started.load(Ordering::Acquire) {
                break;
            }
            self.handle_datagram(&from, &bytes).await;
        }
        info!("packet dispatcher stopped");
    }

    pub async fn handle_datagram(&self, from: &str, bytes: &[u8]) {
        let packet = match CommPacket::parse(from, bytes) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, len = bytes.len(), "cannot parse packet");
                return;
            }
        };

        // a pending batch claims the CID before any local handling
        if self.registry.deliver(packet.clone()) {
            debug!(packet = ?packet.packet_type, "packet passed to batch");
            return;
        }

        match packet.packet_type {
            PacketType::Relay | PacketType::RelayReturn => {
                debug!("relay packet ignored");
            }
            PacketType::Response => self.engine.handle_unexpected_response(&packet),
            PacketType::PeerListRequest => self.engine.handle_peer_list_request(&packet).await,
            PacketType::Retrieve => self.engine.handle_retrieve(&packet).await,
            PacketType::DeletionQuery => self.engine.handle_deletion_query(&packet).await,
            PacketType::Store => self.engine.handle_store(&packet).await,
            PacketType::EmailDelete => self.engine.handle_email_delete(&packet).await,
            PacketType::IndexDelete => self.engine.handle_index_delete(&packet).await,
            PacketType::FindClosePeers => self.engine.handle_find_close_peers(&packet).await,
        }
    }
}
