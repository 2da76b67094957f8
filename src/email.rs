//! # Email Worker
//!
//! The per-identity pipeline turning DHT verbs into mailbox operations.
//!
//! ## Check round (one task per identity)
//!
//! 1. Retrieve the identity's index packets (`find_all` on the identity
//!    hash) and merge the locally stored index.
//! 2. Retrieve every referenced encrypted email (`find_all` per entry) and
//!    merge local copies.
//! 3. Decrypt, verify `SHA-256(delete_auth) == delete_hash`, drop
//!    mismatches.
//! 4. Write verified mail to `inbox/`, then delete the email packet and its
//!    index entry from the DHT.
//!
//! ## Send round (one task per process)
//!
//! Scans `outbox/`, resolves `alias <name@domain>` headers through the
//! address book, pins a stable Message-ID into the file, seals the payload
//! for the recipient, stores the encrypted packet and a one-entry index
//! packet, and moves the file to `sent/`. Any failure marks the mail as
//! skipped for this round; it stays in the outbox and is retried on the
//! next one. Mail in `sent/` is never sent again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::crypto::{seal, sha256, CryptoError, DeleteAuth, EmailKeypair};
use crate::dht::DhtEngine;
use crate::identity::{BoteAddress, IdentHash};
use crate::wire::{
    CommPacket, ContentClass, EmailEncryptedPacket, EmailUnencryptedPacket, IndexEntry,
    IndexPacket, PacketType, ResponsePacket, StatusCode,
};

/// Seconds between mailbox check rounds of one identity.
pub const CHECK_EMAIL_INTERVAL: Duration = Duration::from_secs(300);

/// Seconds between outbox send rounds.
pub const SEND_EMAIL_INTERVAL: Duration = Duration::from_secs(30);

/// Seconds between supervisor passes over the identity list.
const SUPERVISE_INTERVAL: Duration = Duration::from_secs(60);

const HEADER_DHT_KEY: &str = "X-I2PBote-DHT-Key";
const HEADER_DELETE_AUTH_HASH: &str = "X-I2PBote-Delete-Auth-Hash";
const HEADER_DELETED: &str = "X-I2PBote-Deleted";

/// One configured email identity: a public name plus its key material.
#[derive(Clone)]
pub struct EmailIdentity {
    pub name: String,
    pub keypair: EmailKeypair,
}

impl EmailIdentity {
    pub fn address(&self) -> BoteAddress {
        self.keypair.address()
    }
}

/// Address-book collaborator resolving local names and aliases to full
/// addresses.
pub trait AddressBook: Send + Sync {
    fn address_for_name(&self, name: &str) -> Option<String>;
    fn address_for_alias(&self, alias: &str) -> Option<String>;
}

/// Address book that knows nobody; every aliased header is skipped.
pub struct EmptyAddressBook;

impl AddressBook for EmptyAddressBook {
    fn address_for_name(&self, _name: &str) -> Option<String> {
        None
    }
    fn address_for_alias(&self, _alias: &str) -> Option<String> {
        None
    }
}

// ============================================================================
// Mail files
// ============================================================================

/// A parsed mail file: ordered headers plus the body. This is the narrow
/// mail-file interface; full MIME handling is a collaborator concern.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MailFile {
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl MailFile {
    pub fn parse(bytes: &[u8]) -> Self {
        let mut headers = Vec::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            let line_end = bytes[pos..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|i| pos + i)
                .unwrap_or(bytes.len());
            let line = &bytes[pos..line_end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                pos = line_end + 1;
                break;
            }
            if let Some(colon) = line.iter().position(|&b| b == b':') {
                let name = String::from_utf8_lossy(&line[..colon]).trim().to_string();
                let value = String::from_utf8_lossy(&line[colon + 1..]).trim().to_string();
                headers.push((name, value));
            }
            pos = line_end + 1;
        }
        let body = bytes.get(pos..).unwrap_or_default().to_vec();
        Self { headers, body }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_field(&mut self, name: &str, value: &str) {
        if let Some(slot) = self.headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            slot.1 = value.to_string();
        } else {
            self.headers.push((name.to_string(), value.to_string()));
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.body.is_empty()
    }
}

/// Split `alias <address>` into its parts, if the header has that shape
/// with the angle part containing an `@`.
fn split_aliased(header: &str) -> Option<(&str, &str)> {
    let open = header.find('<')?;
    let close = header[open..].find('>')? + open;
    let inner = &header[open + 1..close];
    if !inner.contains('@') || header.find('@')? < open {
        return None;
    }
    Some((header[..open].trim(), inner))
}

// ============================================================================
// Worker
// ============================================================================

pub struct EmailWorker {
    engine: Arc<DhtEngine>,
    datadir: PathBuf,
    address_book: Arc<dyn AddressBook>,
    identities: Mutex<Vec<EmailIdentity>>,
    started: Arc<AtomicBool>,
    shutdown: tokio::sync::Notify,
    check_interval: Duration,
    send_interval: Duration,
}

impl EmailWorker {
    pub fn new(
        engine: Arc<DhtEngine>,
        datadir: PathBuf,
        address_book: Arc<dyn AddressBook>,
        identities: Vec<EmailIdentity>,
        started: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            datadir,
            address_book,
            identities: Mutex::new(identities),
            started,
            shutdown: tokio::sync::Notify::new(),
            check_interval: CHECK_EMAIL_INTERVAL,
            send_interval: SEND_EMAIL_INTERVAL,
        })
    }

    /// Wake every sleeping worker loop so it can observe the cleared
    /// started flag instead of finishing its interval.
    pub fn shutdown_now(&self) {
        self.shutdown.notify_waiters();
    }

    pub fn set_identities(&self, identities: Vec<EmailIdentity>) {
        *self.identities.lock().expect("identities lock") = identities;
    }

    pub fn identities(&self) -> Vec<EmailIdentity> {
        self.identities.lock().expect("identities lock").clone()
    }

    fn mailbox(&self, name: &str) -> PathBuf {
        self.datadir.join(name)
    }

    /// Supervisor: keeps one check task per identity and one send task
    /// alive while the node runs, starting tasks for identities that appear
    /// and letting tasks for removed identities wind down.
    pub async fn run(self: Arc<Self>) {
        if self.identities().is_empty() {
            warn!("no email identities configured");
        }
        let mut check_tasks: HashMap<String, JoinHandle<()>> = HashMap::new();
        let mut send_task: Option<JoinHandle<()>> = None;

        while self.started.load(Ordering::Acquire) {
            let identities = self.identities();
            if identities.is_empty() {
                debug!("no identities, workers idle");
            }

            check_tasks.retain(|_, handle| !handle.is_finished());
            for identity in &identities {
                if check_tasks.contains_key(&identity.name) {
                    continue;
                }
                info!(identity = %identity.name, "starting check task");
                let worker = Arc::clone(&self);
                let identity = identity.clone();
                check_tasks.insert(
                    identity.name.clone(),
                    tokio::spawn(async move { worker.check_loop(identity).await }),
                );
            }

            if send_task.as_ref().map_or(true, |handle| handle.is_finished())
                && !identities.is_empty()
            {
                info!("starting send task");
                let worker = Arc::clone(&self);
                send_task = Some(tokio::spawn(async move { worker.send_loop().await }));
            }

            tokio::select! {
                _ = tokio::time::sleep(SUPERVISE_INTERVAL) => {}
                _ = self.shutdown.notified() => break,
            }
        }

        for (name, handle) in check_tasks {
            debug!(identity = %name, "stopping check task");
            handle.abort();
        }
        if let Some(handle) = send_task {
            handle.abort();
        }
        info!("email worker stopped");
    }

    async fn check_loop(&self, identity: EmailIdentity) {
        let mut first_round = true;
        while self.started.load(Ordering::Acquire) {
            if !first_round {
                tokio::select! {
                    _ = tokio::time::sleep(self.check_interval) => {}
                    _ = self.shutdown.notified() => break,
                }
            }
            first_round = false;
            let delivered = self.check_round(&identity).await;
            info!(identity = %identity.name, delivered, "check round complete");
        }
    }

    async fn send_loop(&self) {
        while self.started.load(Ordering::Acquire) {
            tokio::select! {
                _ = tokio::time::sleep(self.send_interval) => {}
                _ = self.shutdown.notified() => break,
            }
            let sent = self.send_round().await;
            if sent > 0 {
                info!(sent, "send round complete");
            }
        }
    }

    // ------------------------------------------------------------------
    // Check round
    // ------------------------------------------------------------------

    /// One full mailbox check for an identity. Returns the number of mails
    /// delivered to the inbox.
    pub async fn check_round(&self, identity: &EmailIdentity) -> usize {
        let index_packets = self.retrieve_index(identity).await;
        debug!(identity = %identity.name, indexes = index_packets.len(), "index packets");

        let email_packets = self.retrieve_email_packets(&index_packets).await;
        debug!(identity = %identity.name, emails = email_packets.len(), "email packets");
        if email_packets.is_empty() {
            return 0;
        }

        let owner = identity.address().ident_hash();
        let mut delivered = 0usize;
        for encrypted in email_packets {
            let Some(plain) = self.open_and_verify(identity, &encrypted) else {
                continue;
            };
            if let Err(e) = self.deliver_to_inbox(&plain) {
                warn!(error = %e, "inbox write failed");
                continue;
            }
            delivered += 1;

            // the mail is ours now; remove it from the mesh
            self.engine.delete_email(encrypted.key, plain.delete_auth).await;
            self.engine
                .delete_index_entry(*owner.as_bytes(), encrypted.key, plain.delete_auth)
                .await;
        }
        delivered
    }

    async fn retrieve_index(&self, identity: &EmailIdentity) -> Vec<IndexPacket> {
        let owner = identity.address().ident_hash();
        // find_all, not find_one: peers may hold partial indexes and each
        // of them later needs its own delete requests
        let responses = self.engine.find_all(*owner.as_bytes(), ContentClass::Index).await;

        let mut by_owner: HashMap<[u8; 32], IndexPacket> = HashMap::new();
        for data in self.ok_payloads(responses, 4) {
            self.engine.safe(&data);
            match IndexPacket::from_bytes(&data) {
                Ok(index) if !index.entries.is_empty() => {
                    by_owner.insert(index.owner, index);
                }
                Ok(_) => debug!("index packet without entries"),
                Err(e) => warn!(error = %e, "undecodable index packet"),
            }
        }

        if let Some(local) = self.engine.local_index(&owner) {
            if let Ok(index) = IndexPacket::from_bytes(&local) {
                by_owner.entry(index.owner).or_insert(index);
            }
        }
        by_owner.into_values().collect()
    }

    async fn retrieve_email_packets(
        &self,
        index_packets: &[IndexPacket],
    ) -> Vec<EmailEncryptedPacket> {
        let mut by_key: HashMap<[u8; 32], EmailEncryptedPacket> = HashMap::new();

        for index in index_packets {
            for entry in &index.entries {
                let key = IdentHash::from_bytes(entry.key);
                if let Some(local) = self.engine.local_email(&key) {
                    if let Ok(email) = EmailEncryptedPacket::from_bytes(&local) {
                        if !email.edata.is_empty() {
                            by_key.insert(email.key, email);
                        }
                    }
                }

                let responses = self.engine.find_all(entry.key, ContentClass::Email).await;
                for data in self.ok_payloads(responses, 1) {
                    self.engine.safe(&data);
                    match EmailEncryptedPacket::from_bytes(&data) {
                        Ok(email) if !email.edata.is_empty() => {
                            by_key.insert(email.key, email);
                        }
                        Ok(_) => debug!("email packet without ciphertext"),
                        Err(e) => warn!(error = %e, "undecodable email packet"),
                    }
                }
            }
        }
        by_key.into_values().collect()
    }

    /// Extract the payloads of OK responses carrying at least `min_len`
    /// bytes of data.
    fn ok_payloads(&self, responses: Vec<CommPacket>, min_len: usize) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();
        for response in responses {
            if response.packet_type != PacketType::Response {
                warn!(packet = ?response.packet_type, "non-response packet in batch");
                continue;
            }
            match ResponsePacket::parse_payload(&response.payload) {
                Ok((StatusCode::Ok, data)) if data.len() >= min_len => payloads.push(data),
                Ok((StatusCode::Ok, _)) => debug!("response without payload, skipped"),
                Ok((status, _)) => warn!(%status, "response status"),
                Err(e) => warn!(error = %e, "bad response payload"),
            }
        }
        payloads
    }

    fn open_and_verify(
        &self,
        identity: &EmailIdentity,
        encrypted: &EmailEncryptedPacket,
    ) -> Option<EmailUnencryptedPacket> {
        let plaintext = match identity.keypair.open(&encrypted.edata) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(error = %e, "cannot decrypt email packet");
                return None;
            }
        };
        let plain = match EmailUnencryptedPacket::from_bytes(&plaintext) {
            Ok(plain) => plain,
            Err(e) => {
                warn!(error = %e, "cannot parse decrypted email");
                return None;
            }
        };
        if sha256(&[&plain.delete_auth]) != encrypted.delete_hash {
            warn!("delete-auth hash mismatch, dropping email");
            return None;
        }
        Some(plain)
    }

    fn deliver_to_inbox(&self, plain: &EmailUnencryptedPacket) -> Result<()> {
        let inbox = self.mailbox("inbox");
        std::fs::create_dir_all(&inbox)?;
        let name = format!("{}.mail", hex::encode(&plain.message_id_hash[..16]));
        let path = inbox.join(name);
        std::fs::write(&path, &plain.content)
            .with_context(|| format!("write {}", path.display()))?;
        info!(path = %path.display(), "mail delivered");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Send round
    // ------------------------------------------------------------------

    /// One pass over the outbox. Returns the number of mails moved to
    /// `sent/`; everything else stays for the next round.
    pub async fn send_round(&self) -> usize {
        let outbox = self.mailbox("outbox");
        let entries = match std::fs::read_dir(&outbox) {
            Ok(entries) => entries,
            Err(_) => {
                debug!("no outbox to scan");
                return 0;
            }
        };

        let mut sent = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match self.send_one(&path).await {
                Ok(true) => sent += 1,
                Ok(false) => debug!(path = %path.display(), "mail skipped this round"),
                Err(e) => warn!(path = %path.display(), error = %e, "send failed"),
            }
        }
        sent
    }

    /// Process one outbox file end to end. `Ok(false)` means skip-and-retry.
    async fn send_one(&self, path: &Path) -> Result<bool> {
        let bytes = std::fs::read(path)?;
        let mut mail = MailFile::parse(&bytes);
        if mail.field("From").is_none() || mail.field("To").is_none() {
            warn!("mail without From or To header, skipped");
            return Ok(false);
        }

        if !self.rewrite_headers(&mut mail) {
            return Ok(false);
        }

        // the Message-ID survives retries so a resent mail dedups remotely
        let message_id = match mail.field("Message-ID") {
            Some(id) => id.to_string(),
            None => {
                let mut raw = [0u8; 16];
                OsRng.fill_bytes(&mut raw);
                let id = format!("<{}@bote>", hex::encode(raw));
                mail.set_field("Message-ID", &id);
                std::fs::write(path, mail.to_bytes())?;
                id
            }
        };

        let sender = match BoteAddress::parse(self.address_part(mail.field("From"))) {
            Ok(sender) => sender,
            Err(e) => {
                warn!(error = %e, "cannot parse sender address, skipped");
                return Ok(false);
            }
        };
        let recipient = match BoteAddress::parse(self.address_part(mail.field("To"))) {
            Ok(recipient) => recipient,
            Err(e) => {
                warn!(error = %e, "cannot parse recipient address, skipped");
                return Ok(false);
            }
        };

        let delete_auth = DeleteAuth::random();
        let delete_hash = delete_auth.verification_hash();
        mail.set_field(
            HEADER_DELETE_AUTH_HASH,
            &IdentHash::from_bytes(delete_hash).to_base64(),
        );

        let plain = EmailUnencryptedPacket {
            message_id_hash: sha256(&[message_id.as_bytes()]),
            delete_auth: delete_auth.0,
            fragment_index: 0,
            num_fragments: 1,
            content: mail.to_bytes(),
        };

        let edata = match seal(&recipient, &plain.to_bytes()) {
            Ok(edata) => edata,
            Err(CryptoError::UnsupportedKeyType) => {
                warn!("recipient key type unsupported for sealing, skipped");
                return Ok(false);
            }
            Err(e) => {
                warn!(error = %e, "sealing failed, skipped");
                return Ok(false);
            }
        };

        let encrypted = EmailEncryptedPacket {
            key: EmailEncryptedPacket::compute_key(&edata),
            delete_hash,
            alg: sender.key_type().wire_byte(),
            stored_time: 0,
            edata,
        };
        mail.set_field(
            HEADER_DHT_KEY,
            &IdentHash::from_bytes(encrypted.key).to_base64(),
        );

        let responders = self
            .engine
            .store(encrypted.key, Vec::new(), encrypted.to_bytes())
            .await;
        if responders.is_empty() {
            warn!("email packet not stored anywhere, skipped");
            return Ok(false);
        }
        self.engine.safe(&encrypted.to_bytes());
        debug!(nodes = responders.len(), "email packet stored");

        let recipient_hash = recipient.ident_hash();
        let index = IndexPacket {
            owner: *recipient_hash.as_bytes(),
            entries: vec![IndexEntry {
                key: encrypted.key,
                delete_hash,
                time: time::OffsetDateTime::now_utc().unix_timestamp() as u32,
            }],
        };
        let responders = self
            .engine
            .store(*recipient_hash.as_bytes(), Vec::new(), index.to_bytes())
            .await;
        if responders.is_empty() {
            warn!("index packet not stored anywhere, skipped");
            return Ok(false);
        }
        self.engine.safe(&index.to_bytes());
        debug!(nodes = responders.len(), "index packet stored");

        mail.set_field(HEADER_DELETED, "false");
        std::fs::write(path, mail.to_bytes())?;
        self.move_to_sent(path)?;
        Ok(true)
    }

    /// Resolve `alias <name@domain>` From/To headers through the address
    /// book. Returns `false` when a name cannot be resolved (skip the mail).
    fn rewrite_headers(&self, mail: &mut MailFile) -> bool {
        let from = mail.field("From").unwrap_or_default().to_string();
        if let Some((name, alias)) = split_aliased(&from) {
            match self
                .address_book
                .address_for_name(name)
                .or_else(|| self.address_book.address_for_alias(alias))
            {
                Some(address) => {
                    let new_from = format!("{name} <{address}>");
                    debug!(old = %from, new = %new_from, "From replaced");
                    mail.set_field("From", &new_from);
                }
                None => {
                    warn!(name, alias, "no address for From header");
                    return false;
                }
            }
        }

        let to = mail.field("To").unwrap_or_default().to_string();
        if let Some((name, alias)) = split_aliased(&to) {
            match self
                .address_book
                .address_for_name(name)
                .or_else(|| self.address_book.address_for_alias(alias))
            {
                Some(address) => {
                    let new_to = format!("{name} <{address}>");
                    debug!(old = %to, new = %new_to, "To replaced");
                    mail.set_field("To", &new_to);
                }
                None => {
                    warn!(name, alias, "no address for To header");
                    return false;
                }
            }
        }
        true
    }

    /// The address inside `name <address>`, or the whole trimmed header.
    fn address_part<'a>(&self, header: Option<&'a str>) -> &'a str {
        let header = header.unwrap_or_default();
        match (header.find('<'), header.rfind('>')) {
            (Some(open), Some(close)) if open < close => &header[open + 1..close],
            _ => header.trim(),
        }
    }

    fn move_to_sent(&self, path: &Path) -> Result<()> {
        let sent = self.mailbox("sent");
        std::fs::create_dir_all(&sent)?;
        let name = path.file_name().context("outbox file has a name")?;
        std::fs::rename(path, sent.join(name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mail_file_round_trip() {
        let raw = b"From: alice\r\nTo: bob\r\nSubject: hi\r\n\r\nbody text";
        let mail = MailFile::parse(raw);
        assert_eq!(mail.field("From"), Some("alice"));
        assert_eq!(mail.field("subject"), Some("hi"));
        assert_eq!(mail.body(), b"body text");
        assert_eq!(MailFile::parse(&mail.to_bytes()), mail);
    }

    #[test]
    fn mail_file_set_field_replaces_case_insensitively() {
        let mut mail = MailFile::parse(b"From: a\r\n\r\n");
        mail.set_field("FROM", "b");
        assert_eq!(mail.field("From"), Some("b"));
        mail.set_field("X-New", "1");
        assert_eq!(mail.field("x-new"), Some("1"));
    }

    #[test]
    fn mail_file_tolerates_bare_newlines() {
        let mail = MailFile::parse(b"From: a\nTo: b\n\nbody");
        assert_eq!(mail.field("To"), Some("b"));
        assert_eq!(mail.body(), b"body");
    }

    #[test]
    fn split_aliased_detects_the_form() {
        assert_eq!(
            split_aliased("alice <alice@bote.mail>"),
            Some(("alice", "alice@bote.mail"))
        );
        assert_eq!(split_aliased("b64.AAAA"), None);
        assert_eq!(split_aliased("plain text"), None);
        // '@' before '<' is not the aliased form
        assert_eq!(split_aliased("a@b <c>"), None);
    }

    #[test]
    fn address_part_extracts_bracketed() {
        let hub = crate::transport::MemoryHub::new();
        let dir = tempfile::TempDir::new().unwrap();
        let engine = Arc::new(DhtEngine::new(
            Arc::new(crate::node_table::NodeTable::new(
                IdentHash::from_bytes([0u8; 32]),
                dir.path(),
            )),
            Arc::new(crate::storage::ContentStore::open(dir.path()).unwrap()),
            Arc::new(crate::batch::BatchRegistry::new()),
            crate::transport::Transport::new(hub.open("t")),
            crate::dht::DhtTuning::default(),
        ));
        let worker = EmailWorker::new(
            engine,
            dir.path().to_path_buf(),
            Arc::new(EmptyAddressBook),
            Vec::new(),
            Arc::new(AtomicBool::new(true)),
        );
        assert_eq!(worker.address_part(Some("alice <b64.AAAA>")), "b64.AAAA");
        assert_eq!(worker.address_part(Some("  b64.BBBB ")), "b64.BBBB");
        assert_eq!(worker.address_part(None), "");
    }
}
