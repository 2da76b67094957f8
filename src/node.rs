//! # Composed Node
//!
//! A [`Node`] owns every subsystem — content store, node table, transport,
//! batch registry, DHT engine, packet dispatcher, email worker — and hands
//! cheap handles to the tasks that need them. There are no globals; a
//! process can run several nodes side by side, which is exactly what the
//! integration tests do.
//!
//! ## Lifecycle
//!
//! [`Node::start`] initializes the filesystem layout, loads or bootstraps
//! the node table, and spawns the worker tasks: the packet dispatcher, the
//! node-persistence ticker, and the email worker supervisor. [`Node::stop`]
//! clears the started flag, removes outstanding batches (releasing their
//! waiters), aborts the tasks, and persists the node table one last time.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::batch::BatchRegistry;
use crate::config::{init_mailboxes, Config};
use crate::dht::{DhtEngine, DhtTuning};
use crate::email::{AddressBook, EmailIdentity, EmailWorker, EmptyAddressBook};
use crate::handler::PacketDispatcher;
use crate::identity::{IdentHash, NodeIdentity};
use crate::node_table::NodeTable;
use crate::storage::ContentStore;
use crate::transport::{OverlaySession, Transport};

/// Seconds between node-table persistence passes.
pub const NODES_PERSIST_INTERVAL: Duration = Duration::from_secs(60);

pub struct Node {
    config: Config,
    datadir: PathBuf,
    started: Arc<AtomicBool>,
    table: Arc<NodeTable>,
    store: Arc<ContentStore>,
    registry: Arc<BatchRegistry>,
    transport: Transport,
    engine: Arc<DhtEngine>,
    email: Arc<EmailWorker>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Everything a node needs besides its config: the overlay session and the
/// mail collaborators.
pub struct NodeDeps {
    pub session: Arc<dyn OverlaySession>,
    pub identities: Vec<EmailIdentity>,
    pub address_book: Arc<dyn AddressBook>,
    pub tuning: DhtTuning,
}

impl NodeDeps {
    pub fn new(session: Arc<dyn OverlaySession>) -> Self {
        Self {
            session,
            identities: Vec::new(),
            address_book: Arc::new(EmptyAddressBook),
            tuning: DhtTuning::default(),
        }
    }
}

impl Node {
    pub fn new(config: Config, deps: NodeDeps) -> Result<Arc<Self>> {
        let datadir = config.resolve_datadir();
        std::fs::create_dir_all(&datadir)
            .with_context(|| format!("create {}", datadir.display()))?;
        init_mailboxes(&datadir)?;

        let transport = Transport::new(Arc::clone(&deps.session));
        let local_hash = local_ident_hash(&transport.local_destination());

        let table = Arc::new(NodeTable::new(local_hash, &datadir));
        let store = Arc::new(ContentStore::open(&datadir)?);
        let registry = Arc::new(BatchRegistry::new());
        let started = Arc::new(AtomicBool::new(false));

        let engine = Arc::new(DhtEngine::new(
            Arc::clone(&table),
            Arc::clone(&store),
            Arc::clone(&registry),
            transport.clone(),
            deps.tuning,
        ));

        let email = EmailWorker::new(
            Arc::clone(&engine),
            datadir.clone(),
            deps.address_book,
            deps.identities,
            Arc::clone(&started),
        );

        Ok(Arc::new(Self {
            config,
            datadir,
            started,
            table,
            store,
            registry,
            transport,
            engine,
            email,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn engine(&self) -> &Arc<DhtEngine> {
        &self.engine
    }

    pub fn email_worker(&self) -> &Arc<EmailWorker> {
        &self.email
    }

    pub fn table(&self) -> &Arc<NodeTable> {
        &self.table
    }

    pub fn content_store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub fn datadir(&self) -> &PathBuf {
        &self.datadir
    }

    pub fn local_destination(&self) -> String {
        self.transport.local_destination()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Bring the node up: load peers, start the dispatcher, the persistence
    /// ticker, and the email workers.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.is_started() {
            return Ok(());
        }
        self.started.store(true, Ordering::Release);

        if !self.table.load(&self.config.bootstrap.address) {
            error!("have no nodes for start");
        }
        info!(nodes = self.table.len(), datadir = %self.datadir.display(), "node starting");

        let incoming = self
            .transport
            .take_incoming()
            .context("overlay session's inbound queue already taken")?;

        let mut tasks = self.tasks.lock().expect("tasks lock");

        let dispatcher =
            PacketDispatcher::new(Arc::clone(&self.registry), Arc::clone(&self.engine));
        let started = Arc::clone(&self.started);
        tasks.push(tokio::spawn(async move {
            dispatcher.run(incoming, started).await;
        }));

        let table = Arc::clone(&self.table);
        let started = Arc::clone(&self.started);
        tasks.push(tokio::spawn(async move {
            while started.load(Ordering::Acquire) {
                tokio::time::sleep(NODES_PERSIST_INTERVAL).await;
                if let Err(e) = table.persist() {
                    warn!(error = %e, "node persistence failed");
                }
            }
        }));

        let email = Arc::clone(&self.email);
        tasks.push(tokio::spawn(email.run()));

        Ok(())
    }

    /// Stop every worker, release outstanding batch waiters, persist peers.
    pub async fn stop(&self) {
        if !self.is_started() {
            return;
        }
        warn!("node stopping");
        self.started.store(false, Ordering::Release);
        self.email.shutdown_now();
        self.registry.clear();

        let tasks: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.tasks.lock().expect("tasks lock"));
        for task in tasks {
            task.abort();
        }

        if let Err(e) = self.table.persist() {
            warn!(error = %e, "final node persistence failed");
        }
        warn!("node stopped");
    }
}

/// The local node's DHT address. A destination that is not a full identity
/// blob (in-memory overlays use plain labels) is hashed as-is.
fn local_ident_hash(destination: &str) -> IdentHash {
    match NodeIdentity::from_base64(destination) {
        Ok(identity) => identity.ident_hash(),
        Err(_) => {
            let digest: [u8; 32] = Sha256::digest(destination.as_bytes()).into();
            IdentHash::from_bytes(digest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryHub;
    use tempfile::TempDir;

    fn node(datadir: &std::path::Path, dest: &str) -> Arc<Node> {
        let hub = MemoryHub::new();
        let config = Config {
            datadir: datadir.to_string_lossy().into_owned(),
            ..Default::default()
        };
        Node::new(config, NodeDeps::new(hub.open(dest))).unwrap()
    }

    #[tokio::test]
    async fn start_creates_layout_and_stop_is_clean() {
        let dir = TempDir::new().unwrap();
        let node = node(dir.path(), "local");

        node.start().unwrap();
        assert!(node.is_started());
        for sub in ["inbox", "outbox", "sent", "incomplete", "DHTindex", "DHTemail"] {
            assert!(dir.path().join(sub).is_dir(), "{sub} missing");
        }

        node.stop().await;
        assert!(!node.is_started());
        // nodes.txt written on shutdown
        assert!(dir.path().join("nodes.txt").is_file());
    }

    #[tokio::test]
    async fn double_start_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let node = node(dir.path(), "solo");
        node.start().unwrap();
        node.start().unwrap();
        node.stop().await;
    }
}
