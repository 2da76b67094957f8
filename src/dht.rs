//! # DHT Engine
//!
//! Kademlia verbs over the overlay mesh, plus the server side of the same
//! protocol.
//!
//! ## Client verbs
//!
//! | Verb | Wait | Returns |
//! |------|------|---------|
//! | [`DhtEngine::find_one`] | first response | response packets |
//! | [`DhtEngine::find_all`] | quiet window | response packets |
//! | [`DhtEngine::store`] | quiet window | responders that accepted |
//! | [`DhtEngine::closest_nodes_lookup`] | iterative | discovered peers |
//!
//! Every verb selects nodes closest to the (daily-rotating) routing key,
//! falls back to the whole table below [`MIN_CLOSEST_NODES`], and resends
//! its batch up to [`MAX_BATCH_RETRIES`] times when nothing answers.
//! Timeouts are not errors: a verb returns whatever responses it has,
//! possibly none, and the caller decides.
//!
//! ## Server handlers
//!
//! Inbound requests are dispatched here after batch correlation fails.
//! Every handler adds the requester to the node table as a side effect and
//! always answers, except the reserved relay types.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::batch::{BatchRegistry, PacketBatch};
use crate::crypto::sha256;
use crate::identity::{IdentHash, NodeIdentity};
use crate::node_table::NodeTable;
use crate::storage::ContentStore;
use crate::transport::Transport;
use crate::wire::{
    Cid, CommPacket, ContentClass, EmailEncryptedPacket, FindClosePeersRequest,
    IndexDeleteRequest, IndexPacket, PacketType, PeerList, ResponsePacket, RetrieveRequest,
    StatusCode, StoreRequest,
};

/// Bound on a single batch wait.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on one whole iterative closest-nodes lookup.
pub const CLOSEST_NODES_LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Floor on the selected node set for a verb to proceed.
pub const MIN_CLOSEST_NODES: usize = 3;

/// How many times a verb resends its batch when nothing answered.
pub const MAX_BATCH_RETRIES: usize = 5;

/// Peers returned per find-close-peers response under the closest-k policy.
pub const MAX_PEERS_IN_RESPONSE: usize = 20;

/// Which peers a find-close-peers response carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClosePeersPolicy {
    /// The k nodes closest to the requested key (default).
    ClosestK,
    /// Every known node, the permissive variant some peers answer with.
    AllKnown,
}

/// Knobs for the engine's waits and selection floors. Tests shrink the
/// timeouts; production uses the defaults above.
#[derive(Clone, Copy, Debug)]
pub struct DhtTuning {
    pub response_timeout: Duration,
    pub lookup_timeout: Duration,
    pub min_closest_nodes: usize,
    pub max_batch_retries: usize,
    pub peers_in_response: usize,
    pub close_peers_policy: ClosePeersPolicy,
}

impl Default for DhtTuning {
    fn default() -> Self {
        Self {
            response_timeout: RESPONSE_TIMEOUT,
            lookup_timeout: CLOSEST_NODES_LOOKUP_TIMEOUT,
            min_closest_nodes: MIN_CLOSEST_NODES,
            max_batch_retries: MAX_BATCH_RETRIES,
            peers_in_response: MAX_PEERS_IN_RESPONSE,
            close_peers_policy: ClosePeersPolicy::ClosestK,
        }
    }
}

/// The DHT engine: client verbs and inbound handlers over shared subsystems.
pub struct DhtEngine {
    table: Arc<NodeTable>,
    store: Arc<ContentStore>,
    registry: Arc<BatchRegistry>,
    transport: Transport,
    tuning: DhtTuning,
}

impl DhtEngine {
    pub fn new(
        table: Arc<NodeTable>,
        store: Arc<ContentStore>,
        registry: Arc<BatchRegistry>,
        transport: Transport,
        tuning: DhtTuning,
    ) -> Self {
        Self { table, store, registry, transport, tuning }
    }

    pub fn table(&self) -> &Arc<NodeTable> {
        &self.table
    }

    pub fn content_store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Client verbs
    // ------------------------------------------------------------------

    pub async fn find_one(&self, key: [u8; 32], class: ContentClass) -> Vec<CommPacket> {
        self.find(key, class, false).await
    }

    pub async fn find_all(&self, key: [u8; 32], class: ContentClass) -> Vec<CommPacket> {
        self.find(key, class, true).await
    }

    /// Ask the nodes closest to `key` for stored content of `class`.
    ///
    /// Exhaustive mode waits out the full quiet window and is used when
    /// every copy matters; non-exhaustive returns at the first response.
    pub async fn find(&self, key: [u8; 32], class: ContentClass, exhaustive: bool) -> Vec<CommPacket> {
        let Some(nodes) = self.select_nodes(key).await else {
            warn!("not enough nodes for find");
            return Vec::new();
        };

        let batch = PacketBatch::new("dht-find");
        for node in &nodes {
            let request = RetrieveRequest {
                cid: self.transport.random_cid(),
                class,
                key,
            };
            batch.add(request.cid, node.to_base64(), request.to_bytes());
        }
        debug!(nodes = batch.packet_count(), class = ?class, "find dispatch");

        self.dispatch(&batch).await;
        self.wait(&batch, exhaustive).await;

        let mut attempt = 0;
        while batch.response_count() < 1 && attempt < self.tuning.max_batch_retries {
            warn!(attempt, "find got no responses, resending batch");
            self.registry.remove_batch(&batch);
            self.dispatch(&batch).await;
            self.wait(&batch, exhaustive).await;
            attempt += 1;
        }

        debug!(responses = batch.response_count(), "find complete");
        self.registry.remove_batch(&batch);
        batch.responses()
    }

    /// Store content on the nodes closest to `key`. Returns the overlay
    /// addresses of every node that answered `OK`.
    ///
    /// Stores are not idempotent server-side, so every outbound packet gets
    /// its own freshly randomized CID.
    pub async fn store(&self, key: [u8; 32], hashcash: Vec<u8>, data: Vec<u8>) -> Vec<String> {
        let Some(nodes) = self.select_nodes(key).await else {
            warn!("not enough nodes for store");
            return Vec::new();
        };

        let batch = PacketBatch::new("dht-store");
        for node in &nodes {
            let request = StoreRequest {
                cid: self.transport.random_cid(),
                hashcash: hashcash.clone(),
                data: data.clone(),
            };
            batch.add(request.cid, node.to_base64(), request.to_bytes());
        }
        debug!(nodes = batch.packet_count(), "store dispatch");

        self.dispatch(&batch).await;
        batch.wait_last(self.tuning.response_timeout).await;

        let mut attempt = 0;
        while batch.response_count() < 1 && attempt < self.tuning.max_batch_retries {
            warn!(attempt, "store got no responses, resending batch");
            self.registry.remove_batch(&batch);
            self.dispatch(&batch).await;
            batch.wait_last(self.tuning.response_timeout).await;
            attempt += 1;
        }

        self.registry.remove_batch(&batch);

        batch
            .responses()
            .into_iter()
            .filter(|response| {
                response.packet_type == PacketType::Response
                    && matches!(
                        ResponsePacket::parse_payload(&response.payload),
                        Ok((StatusCode::Ok, _))
                    )
            })
            .map(|response| response.from)
            .collect()
    }

    /// Delete one stored encrypted email: the local copy first, then on the
    /// nodes holding it.
    pub async fn delete_email(&self, key: [u8; 32], delete_auth: [u8; 32]) -> Vec<CommPacket> {
        self.delete_email_locally(key, delete_auth);
        let Some(nodes) = self.select_nodes(key).await else {
            return Vec::new();
        };
        let batch = PacketBatch::new("dht-delete-email");
        for node in &nodes {
            let request = crate::wire::EmailDeleteRequest {
                cid: self.transport.random_cid(),
                key,
                delete_auth,
            };
            batch.add(request.cid, node.to_base64(), request.to_bytes());
        }
        self.dispatch(&batch).await;
        batch.wait_last(self.tuning.response_timeout).await;
        self.registry.remove_batch(&batch);
        batch.responses()
    }

    /// Remove one entry from a recipient's stored index packets, locally
    /// and on the nodes holding them.
    pub async fn delete_index_entry(
        &self,
        owner: [u8; 32],
        key: [u8; 32],
        delete_auth: [u8; 32],
    ) -> Vec<CommPacket> {
        self.delete_index_entry_locally(owner, key, delete_auth);
        let Some(nodes) = self.select_nodes(owner).await else {
            return Vec::new();
        };
        let batch = PacketBatch::new("dht-delete-index");
        for node in &nodes {
            let request = IndexDeleteRequest {
                cid: self.transport.random_cid(),
                owner,
                entries: vec![crate::wire::IndexDeleteEntry { key, delete_auth }],
            };
            batch.add(request.cid, node.to_base64(), request.to_bytes());
        }
        self.dispatch(&batch).await;
        batch.wait_last(self.tuning.response_timeout).await;
        self.registry.remove_batch(&batch);
        batch.responses()
    }

    /// Iterative discovery of the peers closest to `key`.
    ///
    /// Seeds a batch with every known node, then rounds of
    /// send → quiet-window wait → absorb peer lists, until the active set
    /// drains, the lookup deadline passes, or a round already produced
    /// enough close nodes. Discovered peers are folded into the node table;
    /// table insertion handles deduplication.
    pub async fn closest_nodes_lookup(&self, key: [u8; 32]) -> Vec<NodeIdentity> {
        let started = Instant::now();
        let batch = PacketBatch::new("dht-closest-lookup");
        let mut active: HashMap<Cid, IdentHash> = HashMap::new();

        for node in self.table.all() {
            let request = FindClosePeersRequest { cid: self.transport.random_cid(), key };
            active.insert(request.cid, node.identity.ident_hash());
            batch.add(request.cid, node.identity.to_base64(), request.to_bytes());
        }

        let mut responses: Vec<CommPacket> = Vec::new();
        while !active.is_empty() && started.elapsed() < self.tuning.lookup_timeout {
            debug!(pending = active.len(), "lookup round");
            self.dispatch(&batch).await;
            batch.wait_last(self.tuning.response_timeout).await;

            responses = batch.responses();
            if responses.is_empty() {
                warn!("lookup round got no responses, resending batch");
                self.registry.remove_batch(&batch);
                continue;
            }
            for response in &responses {
                if let Some(hash) = active.remove(&response.cid) {
                    self.table.mark_response(&hash);
                }
            }
            if responses.len() >= self.tuning.min_closest_nodes {
                break;
            }
        }

        let mut discovered: Vec<NodeIdentity> = Vec::new();
        for response in &responses {
            if response.packet_type != PacketType::Response {
                warn!(packet = ?response.packet_type, "non-response packet in lookup batch");
                continue;
            }
            let (status, data) = match ResponsePacket::parse_payload(&response.payload) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(error = %e, "bad response payload in lookup");
                    continue;
                }
            };
            if status != StatusCode::Ok {
                warn!(%status, "lookup response status");
                continue;
            }
            if data.len() < 4 {
                warn!("lookup response without payload, skip parsing");
                continue;
            }
            match PeerList::decode(&data) {
                Ok(list) => {
                    // keep peers the table accepts (or already knows); the
                    // local node never qualifies
                    for identity in list.entries {
                        let hash = identity.ident_hash();
                        if self.table.add(identity.clone())
                            || self.table.find(&hash).is_some()
                        {
                            discovered.push(identity);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "undecodable peer list"),
            }
        }

        self.registry.remove_batch(&batch);
        debug!(discovered = discovered.len(), "lookup finished");
        discovered
    }

    fn delete_email_locally(&self, key: [u8; 32], delete_auth: [u8; 32]) {
        let hash = IdentHash::from_bytes(key);
        let stored = self
            .store
            .get(ContentClass::Email, &hash)
            .and_then(|bytes| EmailEncryptedPacket::from_bytes(&bytes).ok());
        if let Some(email) = stored {
            if sha256(&[&delete_auth]) == email.delete_hash {
                self.store.delete(ContentClass::Email, &hash);
            }
        }
    }

    fn delete_index_entry_locally(&self, owner: [u8; 32], key: [u8; 32], delete_auth: [u8; 32]) {
        let owner_hash = IdentHash::from_bytes(owner);
        let stored = self
            .store
            .get(ContentClass::Index, &owner_hash)
            .and_then(|bytes| IndexPacket::from_bytes(&bytes).ok());
        let Some(mut index) = stored else {
            return;
        };
        let auth_hash = sha256(&[&delete_auth]);
        let before = index.entries.len();
        index
            .entries
            .retain(|entry| !(entry.key == key && entry.delete_hash == auth_hash));
        if index.entries.len() == before {
            return;
        }
        if index.entries.is_empty() {
            self.store.delete(ContentClass::Index, &owner_hash);
        } else if let Err(e) = self.store.put(ContentClass::Index, &owner_hash, &index.to_bytes()) {
            warn!(error = %e, "local index rewrite failed");
        }
    }

    /// Closest-node selection shared by the verbs: iterative lookup first,
    /// whole table as fallback, `None` when even that is too thin.
    async fn select_nodes(&self, key: [u8; 32]) -> Option<Vec<NodeIdentity>> {
        let mut nodes: Vec<NodeIdentity> = self.closest_nodes_lookup(key).await;

        if nodes.len() < self.tuning.min_closest_nodes {
            debug!(found = nodes.len(), "lookup too thin, adding known nodes");
            for record in self.table.all() {
                nodes.push(record.identity);
            }
        }

        let mut seen = std::collections::HashSet::new();
        nodes.retain(|identity| seen.insert(identity.ident_hash()));

        if nodes.len() < self.tuning.min_closest_nodes {
            return None;
        }
        Some(nodes)
    }

    async fn dispatch(&self, batch: &Arc<PacketBatch>) {
        self.registry.register(batch);
        self.transport.send_batch(batch).await;
    }

    async fn wait(&self, batch: &PacketBatch, exhaustive: bool) {
        if exhaustive {
            batch.wait_last(self.tuning.response_timeout).await;
        } else {
            batch.wait_first(self.tuning.response_timeout).await;
        }
    }

    // ------------------------------------------------------------------
    // Local accessors used by the email worker
    // ------------------------------------------------------------------

    pub fn local_index(&self, owner: &IdentHash) -> Option<Vec<u8>> {
        self.store.get(ContentClass::Index, owner)
    }

    pub fn local_email(&self, key: &IdentHash) -> Option<Vec<u8>> {
        self.store.get(ContentClass::Email, key)
    }

    /// Persist a retrieved payload under its self-declared class and key.
    pub fn safe(&self, bytes: &[u8]) -> bool {
        self.store.safe(bytes)
    }

    // ------------------------------------------------------------------
    // Server-side handlers
    // ------------------------------------------------------------------

    fn note_requester(&self, packet: &CommPacket) {
        if self.table.add_base64(&packet.from) {
            debug!("requester added to node table");
        }
    }

    async fn respond(&self, packet: &CommPacket, status: StatusCode, data: Vec<u8>) {
        let response = ResponsePacket::new(packet.cid, status, data);
        if let Err(e) = self.transport.send(&packet.from, response.to_bytes()).await {
            warn!(error = %e, "response send failed");
        }
    }

    /// `Q`: look the key up in the content store for the requested class.
    pub async fn handle_retrieve(&self, packet: &CommPacket) {
        self.note_requester(packet);
        let (class, key) = match RetrieveRequest::parse_payload(&packet.payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "bad retrieve request");
                self.respond(packet, StatusCode::InvalidPacket, Vec::new()).await;
                return;
            }
        };
        let hash = IdentHash::from_bytes(key);
        debug!(class = ?class, key = %hash, "retrieve request");
        match self.store.get(class, &hash) {
            Some(data) => self.respond(packet, StatusCode::Ok, data).await,
            None => self.respond(packet, StatusCode::NoDataFound, Vec::new()).await,
        }
    }

    /// `S`: validate the payload against its declared class and persist it.
    pub async fn handle_store(&self, packet: &CommPacket) {
        self.note_requester(packet);
        let (_hashcash, data) = match StoreRequest::parse_payload(&packet.payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "bad store request");
                self.respond(packet, StatusCode::InvalidPacket, Vec::new()).await;
                return;
            }
        };
        let status = self.accept_store(&data);
        self.respond(packet, status, Vec::new()).await;
    }

    /// Acceptance policy: the payload must parse as its declared class and
    /// carry a self-consistent key. Index packets merge into any stored
    /// index for the same owner.
    fn accept_store(&self, data: &[u8]) -> StatusCode {
        let Some(&tag) = data.first() else {
            return StatusCode::InvalidPacket;
        };
        match ContentClass::from_wire_byte(tag) {
            Ok(ContentClass::Index) => {
                let Ok(incoming) = IndexPacket::from_bytes(data) else {
                    return StatusCode::InvalidPacket;
                };
                let owner = IdentHash::from_bytes(incoming.owner);
                let merged = match self
                    .store
                    .get(ContentClass::Index, &owner)
                    .and_then(|bytes| IndexPacket::from_bytes(&bytes).ok())
                {
                    Some(mut existing) => {
                        let before = existing.entries.len();
                        for entry in incoming.entries {
                            if !existing.entries.iter().any(|e| e.key == entry.key) {
                                existing.entries.push(entry);
                            }
                        }
                        if existing.entries.len() == before {
                            return StatusCode::DuplicatedData;
                        }
                        existing
                    }
                    None => incoming,
                };
                match self.store.put(ContentClass::Index, &owner, &merged.to_bytes()) {
                    Ok(()) => StatusCode::Ok,
                    Err(_) => StatusCode::NoDiskSpace,
                }
            }
            Ok(ContentClass::Email) => {
                let Ok(email) = EmailEncryptedPacket::from_bytes(data) else {
                    return StatusCode::InvalidPacket;
                };
                if EmailEncryptedPacket::compute_key(&email.edata) != email.key {
                    return StatusCode::InvalidPacket;
                }
                let key = IdentHash::from_bytes(email.key);
                if self.store.get(ContentClass::Email, &key).as_deref() == Some(data) {
                    return StatusCode::DuplicatedData;
                }
                match self.store.put(ContentClass::Email, &key, data) {
                    Ok(()) => StatusCode::Ok,
                    Err(_) => StatusCode::NoDiskSpace,
                }
            }
            Ok(ContentClass::Directory) => {
                let Ok(key) = IdentHash::from_slice(data.get(2..).unwrap_or_default()) else {
                    return StatusCode::InvalidPacket;
                };
                if self.store.get(ContentClass::Directory, &key).as_deref() == Some(data) {
                    return StatusCode::DuplicatedData;
                }
                match self.store.put(ContentClass::Directory, &key, data) {
                    Ok(()) => StatusCode::Ok,
                    Err(_) => StatusCode::NoDiskSpace,
                }
            }
            Err(_) => StatusCode::InvalidPacket,
        }
    }

    /// `D`: erase an encrypted email iff the caller knows the delete-auth
    /// preimage of the stored delete-verification hash.
    pub async fn handle_email_delete(&self, packet: &CommPacket) {
        self.note_requester(packet);
        let (key, delete_auth) = match crate::wire::EmailDeleteRequest::parse_payload(&packet.payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "bad email delete request");
                self.respond(packet, StatusCode::InvalidPacket, Vec::new()).await;
                return;
            }
        };
        let hash = IdentHash::from_bytes(key);
        let stored = self
            .store
            .get(ContentClass::Email, &hash)
            .and_then(|bytes| EmailEncryptedPacket::from_bytes(&bytes).ok());
        let Some(email) = stored else {
            debug!(key = %hash, "email delete: key not found");
            self.respond(packet, StatusCode::NoDataFound, Vec::new()).await;
            return;
        };
        if sha256(&[&delete_auth]) != email.delete_hash {
            warn!(key = %hash, "email delete: delete-auth mismatch");
            self.respond(packet, StatusCode::NoDataFound, Vec::new()).await;
            return;
        }
        self.store.delete(ContentClass::Email, &hash);
        self.respond(packet, StatusCode::Ok, Vec::new()).await;
    }

    /// `X`: remove entries whose delete-auth checks out against the stored
    /// index; answers OK when at least one entry was removed.
    pub async fn handle_index_delete(&self, packet: &CommPacket) {
        self.note_requester(packet);
        let (owner, requested) = match IndexDeleteRequest::parse_payload(&packet.payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "bad index delete request");
                self.respond(packet, StatusCode::InvalidPacket, Vec::new()).await;
                return;
            }
        };
        let owner_hash = IdentHash::from_bytes(owner);
        let stored = self
            .store
            .get(ContentClass::Index, &owner_hash)
            .and_then(|bytes| IndexPacket::from_bytes(&bytes).ok());
        let Some(mut index) = stored else {
            debug!(owner = %owner_hash, "index delete: no index stored");
            self.respond(packet, StatusCode::NoDataFound, Vec::new()).await;
            return;
        };

        let before = index.entries.len();
        for request in &requested {
            let auth_hash = sha256(&[&request.delete_auth]);
            index
                .entries
                .retain(|entry| !(entry.key == request.key && entry.delete_hash == auth_hash));
        }
        if index.entries.len() == before {
            self.respond(packet, StatusCode::NoDataFound, Vec::new()).await;
            return;
        }

        let result = if index.entries.is_empty() {
            self.store.delete(ContentClass::Index, &owner_hash);
            Ok(())
        } else {
            self.store.put(ContentClass::Index, &owner_hash, &index.to_bytes())
        };
        match result {
            Ok(()) => self.respond(packet, StatusCode::Ok, Vec::new()).await,
            Err(e) => {
                warn!(error = %e, "index rewrite failed");
                self.respond(packet, StatusCode::GeneralError, Vec::new()).await;
            }
        }
    }

    /// `Y`: read-only probe. OK means nothing is stored under the key any
    /// more; NO_DATA_FOUND means data still exists.
    pub async fn handle_deletion_query(&self, packet: &CommPacket) {
        self.note_requester(packet);
        let key = match crate::wire::DeletionQueryPacket::parse_payload(&packet.payload) {
            Ok(key) => key,
            Err(e) => {
                debug!(error = %e, "bad deletion query");
                self.respond(packet, StatusCode::InvalidPacket, Vec::new()).await;
                return;
            }
        };
        let hash = IdentHash::from_bytes(key);
        if self.store.contains(ContentClass::Email, &hash) {
            self.respond(packet, StatusCode::NoDataFound, Vec::new()).await;
        } else {
            self.respond(packet, StatusCode::Ok, Vec::new()).await;
        }
    }

    /// `F`: answer with known peers, list version matching the request.
    pub async fn handle_find_close_peers(&self, packet: &CommPacket) {
        self.note_requester(packet);
        let key = match FindClosePeersRequest::parse_payload(&packet.payload) {
            Ok(key) => key,
            Err(e) => {
                debug!(error = %e, "bad find-close-peers request");
                self.respond(packet, StatusCode::InvalidPacket, Vec::new()).await;
                return;
            }
        };

        let records = match self.tuning.close_peers_policy {
            ClosePeersPolicy::ClosestK => {
                self.table.closest_to(&key, self.tuning.peers_in_response, false)
            }
            ClosePeersPolicy::AllKnown => self.table.all(),
        };
        if records.is_empty() {
            debug!("find-close-peers: no nodes to offer");
            self.respond(packet, StatusCode::GeneralError, Vec::new()).await;
            return;
        }

        let list = PeerList {
            entries: records.into_iter().map(|record| record.identity).collect(),
        };
        let data = list.encode(packet.ver);
        debug!(count = list.entries.len(), ver = packet.ver, "find-close-peers response");
        self.respond(packet, StatusCode::Ok, data).await;
    }

    /// `A`: a plain peer-list request gets every known node.
    pub async fn handle_peer_list_request(&self, packet: &CommPacket) {
        self.note_requester(packet);
        let list = PeerList {
            entries: self.table.all().into_iter().map(|record| record.identity).collect(),
        };
        let data = list.encode(packet.ver);
        self.respond(packet, StatusCode::Ok, data).await;
    }

    /// A response nothing was waiting for. Peer lists inside are still
    /// merged into the node table; anything else is logged and dropped.
    pub fn handle_unexpected_response(&self, packet: &CommPacket) {
        warn!(from = %packet.from, "unexpected response received");
        let Ok((status, data)) = ResponsePacket::parse_payload(&packet.payload) else {
            return;
        };
        if status != StatusCode::Ok || data.is_empty() {
            return;
        }
        if data[0] == b'L' || data[0] == b'P' {
            if let Ok(list) = PeerList::decode(&data) {
                for identity in list.entries {
                    self.table.add(identity);
                }
            }
        }
    }
}
