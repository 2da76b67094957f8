//! End-to-end send / check / delete pipeline: one node composes and sends,
//! a mesh of peers stores, the recipient's node checks its mailbox,
//! decrypts, delivers to the inbox, and scrubs the mesh.

use std::sync::Arc;
use std::time::Duration;

use rboted::crypto::EmailKeypair;
use rboted::dht::DhtTuning;
use rboted::email::EmailIdentity;
use rboted::identity::{NodeIdentity, KEY_BLOCK_LEN};
use rboted::node::{Node, NodeDeps};
use rboted::transport::MemoryHub;
use rboted::wire::ContentClass;
use rboted::Config;

fn test_tuning() -> DhtTuning {
    DhtTuning {
        response_timeout: Duration::from_millis(200),
        lookup_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn make_identity(seed: u8) -> NodeIdentity {
    let mut block = [0u8; KEY_BLOCK_LEN];
    for (i, byte) in block.iter_mut().enumerate() {
        *byte = seed.wrapping_add((i % 239) as u8);
    }
    NodeIdentity::from_key_block(block)
}

struct TestNode {
    node: Arc<Node>,
    identity: NodeIdentity,
    datadir: tempfile::TempDir,
}

fn spawn_node(hub: &Arc<MemoryHub>, seed: u8) -> TestNode {
    let identity = make_identity(seed);
    let datadir = tempfile::TempDir::new().unwrap();
    let session = hub.open(&identity.to_base64());
    let config = Config {
        datadir: datadir.path().to_string_lossy().into_owned(),
        ..Default::default()
    };
    let mut deps = NodeDeps::new(session);
    deps.tuning = test_tuning();
    let node = Node::new(config, deps).unwrap();
    node.start().unwrap();
    TestNode { node, identity, datadir }
}

#[tokio::test]
async fn send_check_delete_round_trip() {
    let hub = MemoryHub::new();

    let sender_keys = EmailKeypair::generate();
    let recipient_keys = EmailKeypair::generate();
    let recipient = EmailIdentity { name: "bob".to_string(), keypair: recipient_keys.clone() };

    // identities stay unconfigured so no background check task races the
    // explicit rounds below
    let alice = spawn_node(&hub, 1);
    let bob = spawn_node(&hub, 2);
    let carol = spawn_node(&hub, 3);
    let dave = spawn_node(&hub, 4);
    let nodes = [&alice, &bob, &carol, &dave];
    for a in nodes {
        for b in nodes {
            if a.identity != b.identity {
                a.node.table().add(b.identity.clone());
            }
        }
    }

    // ------------------------------------------------------------------
    // compose into alice's outbox and run one send round
    // ------------------------------------------------------------------
    let mail = format!(
        "From: alice <{}>\r\nTo: bob <{}>\r\nSubject: hello\r\n\r\nmeet me at the docks\r\n",
        sender_keys.address().to_v1_b64(),
        recipient_keys.address().to_v1_b64(),
    );
    let outbox_file = alice.datadir.path().join("outbox").join("letter.mail");
    std::fs::write(&outbox_file, mail.as_bytes()).unwrap();

    let sent = alice.node.email_worker().send_round().await;
    assert_eq!(sent, 1, "the composed mail must go out");
    assert!(!outbox_file.exists(), "sent mail leaves the outbox");

    let sent_file = alice.datadir.path().join("sent").join("letter.mail");
    let sent_bytes = std::fs::read(&sent_file).unwrap();
    let sent_text = String::from_utf8_lossy(&sent_bytes);
    assert!(sent_text.contains("X-I2PBote-DHT-Key: "));
    assert!(sent_text.contains("X-I2PBote-Delete-Auth-Hash: "));
    assert!(sent_text.contains("X-I2PBote-Deleted: false"));
    assert!(sent_text.contains("Message-ID: "));

    // the encrypted packet and the index landed on the mesh
    let recipient_hash = recipient.address().ident_hash();
    let holders_with_index = nodes
        .iter()
        .filter(|peer| {
            peer.node
                .content_store()
                .get(ContentClass::Index, &recipient_hash)
                .is_some()
        })
        .count();
    assert!(holders_with_index >= 2, "index must be replicated");

    // ------------------------------------------------------------------
    // bob's node checks the mailbox
    // ------------------------------------------------------------------
    let delivered = bob.node.email_worker().check_round(&recipient).await;
    assert_eq!(delivered, 1, "exactly one mail must be delivered");

    let inbox_dir = bob.datadir.path().join("inbox");
    let inbox_files: Vec<_> = std::fs::read_dir(&inbox_dir).unwrap().flatten().collect();
    assert_eq!(inbox_files.len(), 1);
    let delivered_bytes = std::fs::read(inbox_files[0].path()).unwrap();
    let delivered_text = String::from_utf8_lossy(&delivered_bytes);
    assert!(delivered_text.contains("Subject: hello"));
    assert!(delivered_text.contains("meet me at the docks"));

    // ------------------------------------------------------------------
    // the mesh is scrubbed after delivery
    // ------------------------------------------------------------------
    // find the DHT key the sender recorded to check every store directly
    let dht_key_b64 = sent_text
        .lines()
        .find_map(|line| line.strip_prefix("X-I2PBote-DHT-Key: "))
        .unwrap()
        .trim();
    let mut found_anywhere = false;
    for peer in nodes {
        let mut any = false;
        peer.node
            .content_store()
            .for_each(ContentClass::Email, |_, _| any = true)
            .unwrap();
        found_anywhere |= any;
    }
    assert!(
        !found_anywhere,
        "no encrypted email may remain after delivery (key {dht_key_b64})"
    );

    let index_left = nodes
        .iter()
        .filter(|peer| {
            peer.node
                .content_store()
                .get(ContentClass::Index, &recipient_hash)
                .is_some()
        })
        .count();
    assert_eq!(index_left, 0, "index entries must be removed after delivery");

    // a second check round finds nothing new
    let delivered_again = bob.node.email_worker().check_round(&recipient).await;
    assert_eq!(delivered_again, 0);

    for peer in nodes {
        peer.node.stop().await;
    }
}

#[tokio::test]
async fn unresolvable_alias_keeps_mail_in_outbox() {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, 1);

    // "name <user@domain>" needs the address book; the empty book skips it
    let mail = b"From: alice <alice@bote.mail>\r\nTo: bob <bob@bote.mail>\r\nSubject: x\r\n\r\nhi\r\n";
    let outbox_file = alice.datadir.path().join("outbox").join("aliased.mail");
    std::fs::write(&outbox_file, mail).unwrap();

    let sent = alice.node.email_worker().send_round().await;
    assert_eq!(sent, 0);
    assert!(outbox_file.exists(), "skipped mail is retained for retry");

    alice.node.stop().await;
}

#[tokio::test]
async fn store_skip_propagates_when_mesh_is_empty() {
    let hub = MemoryHub::new();
    let sender_keys = EmailKeypair::generate();
    let recipient_keys = EmailKeypair::generate();
    let alice = spawn_node(&hub, 1);

    let mail = format!(
        "From: a <{}>\r\nTo: b <{}>\r\nSubject: x\r\n\r\nhi\r\n",
        sender_keys.address().to_v1_b64(),
        recipient_keys.address().to_v1_b64(),
    );
    let outbox_file = alice.datadir.path().join("outbox").join("stuck.mail");
    std::fs::write(&outbox_file, mail.as_bytes()).unwrap();

    // no peers: the store verb returns an empty responder set and the mail
    // is skipped, not lost
    let sent = alice.node.email_worker().send_round().await;
    assert_eq!(sent, 0);
    assert!(outbox_file.exists());

    // the Message-ID pinned during the failed attempt survives for retries
    let retained = std::fs::read_to_string(&outbox_file).unwrap();
    assert!(retained.contains("Message-ID: "));

    alice.node.stop().await;
}
