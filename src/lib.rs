//! # rboted — serverless encrypted-mail peer node
//!
//! A peer of a serverless, anonymity-network-resident email system. Peers
//! cooperatively store and exchange encrypted email through a Kademlia-style
//! DHT layered on an overlay network, holding three content families:
//! index packets (mailbox listings), encrypted email packets, and
//! directory-entry packets.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `node` | Composed [`Node`] owning all subsystems |
//! | `config` | Recognized keys, defaults, file loading |
//! | `identity` | Overlay destinations, email addresses, XOR metric |
//! | `crypto` | Hashing, delete-auth tokens, sealed boxes |
//! | `wire` | Typed packet codec for the big-endian wire protocol |
//! | `storage` | Persistent per-key content store, hashed sharding |
//! | `node_table` | Known peers, closeness queries, persistence |
//! | `transport` | Overlay session seam and datagram adapter |
//! | `batch` | CID correlation, wait-first / wait-last primitives |
//! | `dht` | Kademlia verbs and inbound request handlers |
//! | `handler` | Inbound packet dispatcher |
//! | `email` | Send and check rounds over the DHT verbs |
//!
//! ## Concurrency
//!
//! Every worker is a tokio task holding handles (`Arc`) to the shared
//! subsystems. Locks are short-lived and never held across a transport
//! send or a batch wait.

pub mod batch;
pub mod config;
pub mod crypto;
pub mod dht;
pub mod email;
pub mod handler;
pub mod identity;
pub mod node;
pub mod node_table;
pub mod storage;
pub mod transport;
pub mod wire;

pub use config::Config;
pub use dht::{DhtEngine, DhtTuning};
pub use email::{AddressBook, EmailIdentity, EmailWorker};
pub use node::{Node, NodeDeps};
