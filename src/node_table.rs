//! Thread-safe table of known peers with XOR-closeness queries.
//!
//! The table is a flat map keyed by identity hash — small overlay meshes do
//! not need bucketed routing tables, and closeness queries sort against the
//! daily routing key at call time. Writes are serialized by one mutex;
//! readers take short-lived snapshots. The mutex is never held across disk
//! I/O or a transport send.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::identity::{distance_cmp, routing_key, IdentHash, NodeIdentity};

/// Relative path of the persisted peer list under the data directory.
pub const NODES_FILE: &str = "nodes.txt";

/// One known peer: its identity, a lock flag excluding it from selection,
/// and a count of responses observed from it.
#[derive(Clone, Debug)]
pub struct NodeRecord {
    pub identity: NodeIdentity,
    pub locked: bool,
    pub responses: u32,
}

impl NodeRecord {
    fn new(identity: NodeIdentity) -> Self {
        Self { identity, locked: false, responses: 0 }
    }
}

/// Concurrent map from identity hash to node record.
pub struct NodeTable {
    local: IdentHash,
    nodes: Mutex<HashMap<IdentHash, NodeRecord>>,
    nodes_file: PathBuf,
}

impl NodeTable {
    pub fn new(local: IdentHash, datadir: &Path) -> Self {
        Self {
            local,
            nodes: Mutex::new(HashMap::new()),
            nodes_file: datadir.join(NODES_FILE),
        }
    }

    /// Insert a peer on first observation. Returns whether insertion
    /// happened; the local node and duplicates are refused.
    pub fn add(&self, identity: NodeIdentity) -> bool {
        let hash = identity.ident_hash();
        if hash == self.local {
            debug!("skip local destination");
            return false;
        }
        let mut nodes = self.nodes.lock().expect("node table lock");
        if nodes.contains_key(&hash) {
            return false;
        }
        nodes.insert(hash, NodeRecord::new(identity));
        true
    }

    /// Parse and insert a base64 destination.
    pub fn add_base64(&self, dest: &str) -> bool {
        match NodeIdentity::from_base64(dest) {
            Ok(identity) => self.add(identity),
            Err(e) => {
                debug!(error = %e, "cannot build node from base64");
                false
            }
        }
    }

    pub fn find(&self, hash: &IdentHash) -> Option<NodeRecord> {
        self.nodes.lock().expect("node table lock").get(hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().expect("node table lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<NodeRecord> {
        self.nodes.lock().expect("node table lock").values().cloned().collect()
    }

    pub fn unlocked(&self) -> Vec<NodeRecord> {
        self.nodes
            .lock()
            .expect("node table lock")
            .values()
            .filter(|record| !record.locked)
            .cloned()
            .collect()
    }

    /// Up to `n` unlocked nodes sorted ascending by
    /// `routing_key(key) XOR node_hash`. When `bias_local` is set, nodes
    /// strictly farther from the key than the local node are pruned.
    pub fn closest_to(&self, key: &[u8; 32], n: usize, bias_local: bool) -> Vec<NodeRecord> {
        let dest_key = IdentHash::from_bytes(routing_key(key));
        let local_metric = dest_key.xor_distance(&self.local);

        let mut candidates: Vec<(NodeRecord, [u8; 32])> = {
            let nodes = self.nodes.lock().expect("node table lock");
            nodes
                .iter()
                .filter(|(_, record)| !record.locked)
                .map(|(hash, record)| (record.clone(), dest_key.xor_distance(hash)))
                .collect()
        };

        if bias_local {
            candidates.retain(|(_, metric)| {
                distance_cmp(metric, &local_metric) != std::cmp::Ordering::Greater
            });
        }
        candidates.sort_by(|a, b| distance_cmp(&a.1, &b.1));
        candidates.truncate(n);
        candidates.into_iter().map(|(record, _)| record).collect()
    }

    pub fn set_locked(&self, hash: &IdentHash, locked: bool) {
        if let Some(record) = self.nodes.lock().expect("node table lock").get_mut(hash) {
            record.locked = locked;
        }
    }

    /// Record a response from a peer: bump its health counter, clear any
    /// lock.
    pub fn mark_response(&self, hash: &IdentHash) {
        if let Some(record) = self.nodes.lock().expect("node table lock").get_mut(hash) {
            record.responses += 1;
            record.locked = false;
        }
    }

    /// Load peers from the nodes file; fall back to bootstrap addresses when
    /// nothing loads. Returns whether any node is known afterwards.
    pub fn load(&self, bootstrap: &[String]) -> bool {
        let loaded = self.read_nodes_file();
        let mut added = 0usize;
        let mut dup = 0usize;
        for dest in &loaded {
            if self.add_base64(dest) {
                added += 1;
            } else {
                dup += 1;
            }
        }
        if added > 0 {
            info!(added, dup, "nodes loaded");
            return true;
        }

        info!("no stored nodes, trying bootstrap");
        for dest in bootstrap {
            if self.add_base64(dest) {
                debug!("bootstrap node added");
            }
        }
        !self.is_empty()
    }

    fn read_nodes_file(&self) -> Vec<String> {
        let content = match std::fs::read_to_string(&self.nodes_file) {
            Ok(content) => content,
            Err(e) => {
                info!(path = %self.nodes_file.display(), error = %e, "cannot open nodes file");
                return Vec::new();
            }
        };
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    }

    /// Write all known peers to the nodes file, one base64 destination per
    /// line. The snapshot is taken before any I/O happens.
    pub fn persist(&self) -> Result<()> {
        let lines: Vec<String> = {
            let nodes = self.nodes.lock().expect("node table lock");
            nodes.values().map(|record| record.identity.to_base64()).collect()
        };

        let mut out = String::new();
        out.push_str("# Each line is one Base64-encoded overlay destination.\n");
        out.push_str("# Do not edit this file while the node is running as it will be overwritten.\n\n");
        for line in &lines {
            out.push_str(line);
            out.push('\n');
        }
        std::fs::write(&self.nodes_file, out)
            .with_context(|| format!("write {}", self.nodes_file.display()))?;
        debug!(count = lines.len(), "nodes saved");
        Ok(())
    }
}

impl std::fmt::Debug for NodeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeTable")
            .field("local", &self.local)
            .field("len", &self.len())
            .finish()
    }
}
