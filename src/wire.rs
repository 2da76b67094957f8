//! # Wire Protocol Codec
//!
//! Bidirectional mapping between typed packets and the big-endian byte
//! protocol spoken between peers.
//!
//! ## Envelope
//!
//! Every datagram starts with a fixed 4-byte prefix, a one-byte packet type,
//! a protocol version (4 or 5), and a 32-byte request ID (CID) correlating
//! responses with in-flight requests:
//!
//! ```text
//! prefix(4) || type(1) || version(1) || cid(32) || payload
//! ```
//!
//! ## Packet families
//!
//! | Tag | Packet | Direction |
//! |-----|--------|-----------|
//! | `R`,`K` | relay variants | reserved, accepted silently |
//! | `N` | [`ResponsePacket`] | both |
//! | `A` | peer-list request | inbound |
//! | `Q` | [`RetrieveRequest`] | both |
//! | `Y` | [`DeletionQueryPacket`] | both |
//! | `S` | [`StoreRequest`] | both |
//! | `D` | [`EmailDeleteRequest`] | both |
//! | `X` | [`IndexDeleteRequest`] | both |
//! | `F` | [`FindClosePeersRequest`] | both |
//!
//! Peer lists (`L`/`P`) and the three content classes (`I`/`E`/`C`) travel
//! inside response payloads, never as bare envelopes.
//!
//! All integers on the wire are big-endian. A response whose declared data
//! length disagrees with the remaining bytes is logged and clamped, not
//! rejected.

use thiserror::Error;
use tracing::warn;

use crate::crypto::sha256;
use crate::identity::NodeIdentity;

/// Fixed communication-packet prefix.
pub const PACKET_PREFIX: [u8; 4] = [0x6D, 0x30, 0x52, 0xE9];

/// Protocol versions this node accepts.
pub const PROTOCOL_V4: u8 = 4;
pub const PROTOCOL_V5: u8 = 5;

/// 32-byte request-correlation identifier.
pub type Cid = [u8; 32];

const ENVELOPE_LEN: usize = 4 + 1 + 1 + 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("packet truncated")]
    Truncated,
    #[error("missing communication prefix")]
    MissingPrefix,
    #[error("unknown packet type {0:#04x}")]
    UnknownType(u8),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown content class {0:#04x}")]
    UnknownContentClass(u8),
    #[error("unexpected payload tag {0:#04x}")]
    UnexpectedTag(u8),
}

// ============================================================================
// Tags and status codes
// ============================================================================

/// Envelope packet types with their explicit wire bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketType {
    Relay,
    RelayReturn,
    Response,
    PeerListRequest,
    Retrieve,
    DeletionQuery,
    Store,
    EmailDelete,
    IndexDelete,
    FindClosePeers,
}

impl PacketType {
    pub fn wire_byte(self) -> u8 {
        match self {
            PacketType::Relay => b'R',
            PacketType::RelayReturn => b'K',
            PacketType::Response => b'N',
            PacketType::PeerListRequest => b'A',
            PacketType::Retrieve => b'Q',
            PacketType::DeletionQuery => b'Y',
            PacketType::Store => b'S',
            PacketType::EmailDelete => b'D',
            PacketType::IndexDelete => b'X',
            PacketType::FindClosePeers => b'F',
        }
    }

    pub fn from_wire_byte(byte: u8) -> Result<Self, WireError> {
        Ok(match byte {
            b'R' => PacketType::Relay,
            b'K' => PacketType::RelayReturn,
            b'N' => PacketType::Response,
            b'A' => PacketType::PeerListRequest,
            b'Q' => PacketType::Retrieve,
            b'Y' => PacketType::DeletionQuery,
            b'S' => PacketType::Store,
            b'D' => PacketType::EmailDelete,
            b'X' => PacketType::IndexDelete,
            b'F' => PacketType::FindClosePeers,
            other => return Err(WireError::UnknownType(other)),
        })
    }
}

/// The three stored content classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContentClass {
    Index,
    Email,
    Directory,
}

impl ContentClass {
    pub const ALL: [ContentClass; 3] =
        [ContentClass::Index, ContentClass::Email, ContentClass::Directory];

    pub fn wire_byte(self) -> u8 {
        match self {
            ContentClass::Index => b'I',
            ContentClass::Email => b'E',
            ContentClass::Directory => b'C',
        }
    }

    pub fn from_wire_byte(byte: u8) -> Result<Self, WireError> {
        Ok(match byte {
            b'I' => ContentClass::Index,
            b'E' => ContentClass::Email,
            b'C' => ContentClass::Directory,
            other => return Err(WireError::UnknownContentClass(other)),
        })
    }
}

/// Response status codes. The numeric values are fixed by the wire
/// protocol and must not be reordered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    Ok = 0,
    GeneralError = 1,
    NoDataFound = 2,
    InvalidPacket = 3,
    InvalidHashcash = 4,
    InsufficientHashcash = 5,
    NoDiskSpace = 6,
    DuplicatedData = 7,
}

impl StatusCode {
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => StatusCode::Ok,
            1 => StatusCode::GeneralError,
            2 => StatusCode::NoDataFound,
            3 => StatusCode::InvalidPacket,
            4 => StatusCode::InvalidHashcash,
            5 => StatusCode::InsufficientHashcash,
            6 => StatusCode::NoDiskSpace,
            7 => StatusCode::DuplicatedData,
            _ => return None,
        })
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StatusCode::Ok => "OK",
            StatusCode::GeneralError => "GENERAL_ERROR",
            StatusCode::NoDataFound => "NO_DATA_FOUND",
            StatusCode::InvalidPacket => "INVALID_PACKET",
            StatusCode::InvalidHashcash => "INVALID_HASHCASH",
            StatusCode::InsufficientHashcash => "INSUFFICIENT_HASHCASH",
            StatusCode::NoDiskSpace => "NO_DISK_SPACE",
            StatusCode::DuplicatedData => "DUPLICATED_DATA",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Cursor
// ============================================================================

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        let byte = *self.buf.get(self.pos).ok_or(WireError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    fn u16_be(&mut self) -> Result<u16, WireError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32_be(&mut self) -> Result<u32, WireError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take32(&mut self) -> Result<[u8; 32], WireError> {
        let slice = self.take(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(slice);
        Ok(out)
    }
}

// ============================================================================
// Communication envelope
// ============================================================================

/// A parsed inbound datagram: envelope fields plus the raw payload and the
/// overlay address it arrived from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommPacket {
    pub packet_type: PacketType,
    pub ver: u8,
    pub cid: Cid,
    pub payload: Vec<u8>,
    pub from: String,
}

impl CommPacket {
    /// Parse an envelope. Rejects a missing prefix, an unknown type tag, an
    /// unsupported version, and truncation before the CID.
    pub fn parse(from: &str, bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < 4 {
            return Err(WireError::Truncated);
        }
        if bytes[..4] != PACKET_PREFIX {
            return Err(WireError::MissingPrefix);
        }
        if bytes.len() < ENVELOPE_LEN {
            return Err(WireError::Truncated);
        }
        let packet_type = PacketType::from_wire_byte(bytes[4])?;
        let ver = bytes[5];
        if ver != PROTOCOL_V4 && ver != PROTOCOL_V5 {
            return Err(WireError::UnsupportedVersion(ver));
        }
        let mut cid = [0u8; 32];
        cid.copy_from_slice(&bytes[6..38]);
        Ok(Self {
            packet_type,
            ver,
            cid,
            payload: bytes[ENVELOPE_LEN..].to_vec(),
            from: from.to_string(),
        })
    }
}

fn encode_envelope(packet_type: PacketType, ver: u8, cid: &Cid, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ENVELOPE_LEN + payload.len());
    out.extend_from_slice(&PACKET_PREFIX);
    out.push(packet_type.wire_byte());
    out.push(ver);
    out.extend_from_slice(cid);
    out.extend_from_slice(payload);
    out
}

// ============================================================================
// Requests and responses
// ============================================================================

/// `N`: status plus optional payload, echoing the request's CID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponsePacket {
    pub cid: Cid,
    pub status: StatusCode,
    pub data: Vec<u8>,
}

impl ResponsePacket {
    pub fn new(cid: Cid, status: StatusCode, data: Vec<u8>) -> Self {
        Self { cid, status, data }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(3 + self.data.len());
        payload.push(self.status as u8);
        payload.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        payload.extend_from_slice(&self.data);
        encode_envelope(PacketType::Response, PROTOCOL_V4, &self.cid, &payload)
    }

    /// Parse a response payload (status, declared length, data).
    ///
    /// A declared length longer than the remaining bytes is clamped with a
    /// warning; shorter cuts the data at the declared length. Zero length is
    /// an empty payload.
    pub fn parse_payload(payload: &[u8]) -> Result<(StatusCode, Vec<u8>), WireError> {
        let mut reader = Reader::new(payload);
        let status_byte = reader.u8()?;
        let status = StatusCode::from_u8(status_byte)
            .ok_or(WireError::UnknownType(status_byte))?;
        let declared = reader.u16_be()? as usize;
        let available = reader.remaining();
        if declared != available {
            warn!(declared, available, "response length mismatch");
        }
        let take = declared.min(available);
        let data = reader.take(take)?.to_vec();
        Ok((status, data))
    }
}

/// `Q`: fetch stored content by class and key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrieveRequest {
    pub cid: Cid,
    pub class: ContentClass,
    pub key: [u8; 32],
}

impl RetrieveRequest {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(33);
        payload.push(self.class.wire_byte());
        payload.extend_from_slice(&self.key);
        encode_envelope(PacketType::Retrieve, PROTOCOL_V4, &self.cid, &payload)
    }

    pub fn parse_payload(payload: &[u8]) -> Result<(ContentClass, [u8; 32]), WireError> {
        let mut reader = Reader::new(payload);
        let class = ContentClass::from_wire_byte(reader.u8()?)?;
        let key = reader.take32()?;
        Ok((class, key))
    }
}

/// `S`: store new content, carrying an opaque hashcash token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreRequest {
    pub cid: Cid,
    pub hashcash: Vec<u8>,
    pub data: Vec<u8>,
}

impl StoreRequest {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(4 + self.hashcash.len() + self.data.len());
        payload.extend_from_slice(&(self.hashcash.len() as u16).to_be_bytes());
        payload.extend_from_slice(&self.hashcash);
        payload.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        payload.extend_from_slice(&self.data);
        encode_envelope(PacketType::Store, PROTOCOL_V4, &self.cid, &payload)
    }

    pub fn parse_payload(payload: &[u8]) -> Result<(Vec<u8>, Vec<u8>), WireError> {
        let mut reader = Reader::new(payload);
        let hc_len = reader.u16_be()? as usize;
        let hashcash = reader.take(hc_len)?.to_vec();
        let data_len = reader.u16_be()? as usize;
        let data = reader.take(data_len)?.to_vec();
        Ok((hashcash, data))
    }
}

/// `F`: ask for the peers closest to a key. Always sent as version 5.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FindClosePeersRequest {
    pub cid: Cid,
    pub key: [u8; 32],
}

impl FindClosePeersRequest {
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_envelope(PacketType::FindClosePeers, PROTOCOL_V5, &self.cid, &self.key)
    }

    pub fn parse_payload(payload: &[u8]) -> Result<[u8; 32], WireError> {
        Reader::new(payload).take32()
    }
}

/// `Y`: probe whether content under a key is gone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletionQueryPacket {
    pub cid: Cid,
    pub key: [u8; 32],
}

impl DeletionQueryPacket {
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_envelope(PacketType::DeletionQuery, PROTOCOL_V4, &self.cid, &self.key)
    }

    pub fn parse_payload(payload: &[u8]) -> Result<[u8; 32], WireError> {
        Reader::new(payload).take32()
    }
}

/// `D`: delete one encrypted email packet, proving authority with the
/// 32-byte delete-auth preimage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailDeleteRequest {
    pub cid: Cid,
    pub key: [u8; 32],
    pub delete_auth: [u8; 32],
}

impl EmailDeleteRequest {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(64);
        payload.extend_from_slice(&self.key);
        payload.extend_from_slice(&self.delete_auth);
        encode_envelope(PacketType::EmailDelete, PROTOCOL_V4, &self.cid, &payload)
    }

    pub fn parse_payload(payload: &[u8]) -> Result<([u8; 32], [u8; 32]), WireError> {
        let mut reader = Reader::new(payload);
        Ok((reader.take32()?, reader.take32()?))
    }
}

/// One `(email key, delete auth)` pair of an index-delete request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDeleteEntry {
    pub key: [u8; 32],
    pub delete_auth: [u8; 32],
}

/// `X`: remove entries from the index stored under `owner`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDeleteRequest {
    pub cid: Cid,
    pub owner: [u8; 32],
    pub entries: Vec<IndexDeleteEntry>,
}

impl IndexDeleteRequest {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(33 + self.entries.len() * 64);
        payload.extend_from_slice(&self.owner);
        payload.push(self.entries.len() as u8);
        for entry in &self.entries {
            payload.extend_from_slice(&entry.key);
            payload.extend_from_slice(&entry.delete_auth);
        }
        encode_envelope(PacketType::IndexDelete, PROTOCOL_V4, &self.cid, &payload)
    }

    pub fn parse_payload(payload: &[u8]) -> Result<([u8; 32], Vec<IndexDeleteEntry>), WireError> {
        let mut reader = Reader::new(payload);
        let owner = reader.take32()?;
        let count = reader.u8()? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(IndexDeleteEntry {
                key: reader.take32()?,
                delete_auth: reader.take32()?,
            });
        }
        Ok((owner, entries))
    }
}

// ============================================================================
// Peer lists
// ============================================================================

/// `L`/`P` payload inside a response: a list of encoded node identities.
///
/// Version 4 entries are bare 384-byte key blocks (the certificate bytes are
/// zero-filled on parse); version 5 entries are full self-delimiting
/// destinations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerList {
    pub entries: Vec<NodeIdentity>,
}

impl PeerList {
    pub fn encode(&self, ver: u8) -> Vec<u8> {
        let mut out = vec![b'L', ver];
        out.extend_from_slice(&(self.entries.len() as u16).to_be_bytes());
        for entry in &self.entries {
            match ver {
                PROTOCOL_V4 => out.extend_from_slice(entry.key_block()),
                _ => out.extend_from_slice(&entry.to_bytes()),
            }
        }
        out
    }

    /// Decode a peer-list payload of either version, tolerating short
    /// buffers the way the protocol requires: a truncated trailing entry
    /// ends the list instead of failing it.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(data);
        let tag = reader.u8()?;
        if tag != b'L' && tag != b'P' {
            return Err(WireError::UnexpectedTag(tag));
        }
        let ver = reader.u8()?;
        let count = reader.u16_be()? as usize;
        let mut entries = Vec::with_capacity(count.min(1024));

        for _ in 0..count {
            if reader.remaining() == 0 {
                warn!("peer list ended before declared count");
                break;
            }
            match ver {
                PROTOCOL_V4 => {
                    let Ok(block) = reader.take(crate::identity::KEY_BLOCK_LEN) else {
                        warn!("incomplete v4 peer list entry");
                        break;
                    };
                    let mut key_block = [0u8; crate::identity::KEY_BLOCK_LEN];
                    key_block.copy_from_slice(block);
                    entries.push(NodeIdentity::from_key_block(key_block));
                }
                PROTOCOL_V5 => {
                    match NodeIdentity::from_buffer(&data[data.len() - reader.remaining()..]) {
                        Ok((identity, consumed)) => {
                            let _ = reader.take(consumed);
                            entries.push(identity);
                        }
                        Err(_) => {
                            warn!("incomplete v5 peer list entry");
                            break;
                        }
                    }
                }
                other => return Err(WireError::UnsupportedVersion(other)),
            }
        }
        Ok(Self { entries })
    }
}

// ============================================================================
// Stored data packets
// ============================================================================

/// One mailbox-index entry: where an encrypted email lives, the hash that
/// authorizes deleting it, and when it was stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: [u8; 32],
    pub delete_hash: [u8; 32],
    pub time: u32,
}

/// `I`: a recipient's mailbox listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexPacket {
    pub owner: [u8; 32],
    pub entries: Vec<IndexEntry>,
}

impl IndexPacket {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(38 + self.entries.len() * 68);
        out.push(ContentClass::Index.wire_byte());
        out.push(PROTOCOL_V4);
        out.extend_from_slice(&self.owner);
        out.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.key);
            out.extend_from_slice(&entry.delete_hash);
            out.extend_from_slice(&entry.time.to_be_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        let tag = reader.u8()?;
        if tag != ContentClass::Index.wire_byte() {
            return Err(WireError::UnexpectedTag(tag));
        }
        let ver = reader.u8()?;
        if ver != PROTOCOL_V4 {
            return Err(WireError::UnsupportedVersion(ver));
        }
        let owner = reader.take32()?;
        let count = reader.u32_be()? as usize;
        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            entries.push(IndexEntry {
                key: reader.take32()?,
                delete_hash: reader.take32()?,
                time: reader.u32_be()?,
            });
        }
        Ok(Self { owner, entries })
    }
}

/// `E`: an encrypted email packet as stored in the DHT.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailEncryptedPacket {
    pub key: [u8; 32],
    pub delete_hash: [u8; 32],
    pub alg: u8,
    pub stored_time: u32,
    pub edata: Vec<u8>,
}

impl EmailEncryptedPacket {
    /// The packet's DHT key: `SHA-256(BE16(len) || ciphertext)`.
    pub fn compute_key(edata: &[u8]) -> [u8; 32] {
        let len = (edata.len() as u16).to_be_bytes();
        sha256(&[&len, edata])
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(73 + self.edata.len());
        out.push(ContentClass::Email.wire_byte());
        out.push(PROTOCOL_V4);
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.delete_hash);
        out.push(self.alg);
        out.extend_from_slice(&self.stored_time.to_be_bytes());
        out.extend_from_slice(&(self.edata.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.edata);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        let tag = reader.u8()?;
        if tag != ContentClass::Email.wire_byte() {
            return Err(WireError::UnexpectedTag(tag));
        }
        let ver = reader.u8()?;
        if ver != PROTOCOL_V4 {
            return Err(WireError::UnsupportedVersion(ver));
        }
        let key = reader.take32()?;
        let delete_hash = reader.take32()?;
        let alg = reader.u8()?;
        let stored_time = reader.u32_be()?;
        let len = reader.u16_be()? as usize;
        let edata = reader.take(len)?.to_vec();
        Ok(Self { key, delete_hash, alg, stored_time, edata })
    }
}

/// Wire tag of decrypted email payloads (never stored in the DHT).
pub const UNENCRYPTED_TAG: u8 = b'U';

/// `U`: the plaintext email payload carried inside the sealed box.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailUnencryptedPacket {
    pub message_id_hash: [u8; 32],
    pub delete_auth: [u8; 32],
    pub fragment_index: u16,
    pub num_fragments: u16,
    pub content: Vec<u8>,
}

impl EmailUnencryptedPacket {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(76 + self.content.len());
        out.push(UNENCRYPTED_TAG);
        out.push(PROTOCOL_V4);
        out.extend_from_slice(&self.message_id_hash);
        out.extend_from_slice(&self.delete_auth);
        out.extend_from_slice(&self.fragment_index.to_be_bytes());
        out.extend_from_slice(&self.num_fragments.to_be_bytes());
        out.extend_from_slice(&(self.content.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.content);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        let tag = reader.u8()?;
        if tag != UNENCRYPTED_TAG {
            return Err(WireError::UnexpectedTag(tag));
        }
        let ver = reader.u8()?;
        if ver != PROTOCOL_V4 {
            return Err(WireError::UnsupportedVersion(ver));
        }
        let message_id_hash = reader.take32()?;
        let delete_auth = reader.take32()?;
        let fragment_index = reader.u16_be()?;
        let num_fragments = reader.u16_be()?;
        let len = reader.u16_be()? as usize;
        let content = reader.take(len)?.to_vec();
        Ok(Self { message_id_hash, delete_auth, fragment_index, num_fragments, content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::KEY_BLOCK_LEN;

    fn cid(seed: u8) -> Cid {
        [seed; 32]
    }

    fn node(seed: u8) -> NodeIdentity {
        let mut block = [0u8; KEY_BLOCK_LEN];
        for (i, byte) in block.iter_mut().enumerate() {
            *byte = seed.wrapping_add(i as u8);
        }
        NodeIdentity::from_key_block(block)
    }

    #[test]
    fn envelope_round_trip() {
        let request = RetrieveRequest {
            cid: cid(7),
            class: ContentClass::Email,
            key: [9u8; 32],
        };
        let bytes = request.to_bytes();
        let packet = CommPacket::parse("peer", &bytes).unwrap();
        assert_eq!(packet.packet_type, PacketType::Retrieve);
        assert_eq!(packet.ver, PROTOCOL_V4);
        assert_eq!(packet.cid, cid(7));
        let (class, key) = RetrieveRequest::parse_payload(&packet.payload).unwrap();
        assert_eq!(class, ContentClass::Email);
        assert_eq!(key, [9u8; 32]);
    }

    #[test]
    fn envelope_rejects_bad_prefix() {
        let mut bytes = ResponsePacket::new(cid(1), StatusCode::Ok, vec![]).to_bytes();
        bytes[0] = 0x00;
        assert_eq!(CommPacket::parse("p", &bytes).unwrap_err(), WireError::MissingPrefix);
    }

    #[test]
    fn envelope_rejects_unknown_type() {
        let mut bytes = ResponsePacket::new(cid(1), StatusCode::Ok, vec![]).to_bytes();
        bytes[4] = 0xFF;
        assert_eq!(CommPacket::parse("p", &bytes).unwrap_err(), WireError::UnknownType(0xFF));
    }

    #[test]
    fn envelope_rejects_truncation_before_cid() {
        let bytes = ResponsePacket::new(cid(1), StatusCode::Ok, vec![]).to_bytes();
        assert_eq!(
            CommPacket::parse("p", &bytes[..20]).unwrap_err(),
            WireError::Truncated
        );
    }

    #[test]
    fn response_round_trip() {
        let response = ResponsePacket::new(cid(3), StatusCode::NoDataFound, b"abc".to_vec());
        let packet = CommPacket::parse("p", &response.to_bytes()).unwrap();
        let (status, data) = ResponsePacket::parse_payload(&packet.payload).unwrap();
        assert_eq!(status, StatusCode::NoDataFound);
        assert_eq!(data, b"abc");
    }

    #[test]
    fn response_length_mismatch_is_not_fatal() {
        // declared length 10, only 3 bytes present
        let mut payload = vec![StatusCode::Ok as u8];
        payload.extend_from_slice(&10u16.to_be_bytes());
        payload.extend_from_slice(b"abc");
        let (status, data) = ResponsePacket::parse_payload(&payload).unwrap();
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(data, b"abc");
    }

    #[test]
    fn response_zero_length_is_empty_payload() {
        let mut payload = vec![StatusCode::Ok as u8];
        payload.extend_from_slice(&0u16.to_be_bytes());
        let (_, data) = ResponsePacket::parse_payload(&payload).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn store_request_round_trip() {
        let request = StoreRequest {
            cid: cid(5),
            hashcash: b"1:20:token".to_vec(),
            data: vec![0xAB; 40],
        };
        let packet = CommPacket::parse("p", &request.to_bytes()).unwrap();
        assert_eq!(packet.packet_type, PacketType::Store);
        let (hashcash, data) = StoreRequest::parse_payload(&packet.payload).unwrap();
        assert_eq!(hashcash, b"1:20:token");
        assert_eq!(data, vec![0xAB; 40]);
    }

    #[test]
    fn find_close_peers_uses_version_5() {
        let request = FindClosePeersRequest { cid: cid(2), key: [1u8; 32] };
        let packet = CommPacket::parse("p", &request.to_bytes()).unwrap();
        assert_eq!(packet.ver, PROTOCOL_V5);
        assert_eq!(FindClosePeersRequest::parse_payload(&packet.payload).unwrap(), [1u8; 32]);
    }

    #[test]
    fn email_delete_round_trip() {
        let request = EmailDeleteRequest { cid: cid(4), key: [6u8; 32], delete_auth: [7u8; 32] };
        let packet = CommPacket::parse("p", &request.to_bytes()).unwrap();
        let (key, auth) = EmailDeleteRequest::parse_payload(&packet.payload).unwrap();
        assert_eq!(key, [6u8; 32]);
        assert_eq!(auth, [7u8; 32]);
    }

    #[test]
    fn index_delete_parses_all_entries() {
        let entries: Vec<IndexDeleteEntry> = (0..5)
            .map(|i| IndexDeleteEntry { key: [i; 32], delete_auth: [i + 100; 32] })
            .collect();
        let request = IndexDeleteRequest { cid: cid(9), owner: [42u8; 32], entries: entries.clone() };
        let packet = CommPacket::parse("p", &request.to_bytes()).unwrap();
        let (owner, parsed) = IndexDeleteRequest::parse_payload(&packet.payload).unwrap();
        assert_eq!(owner, [42u8; 32]);
        assert_eq!(parsed, entries);
    }

    #[test]
    fn peer_list_v4_round_trip() {
        let list = PeerList { entries: vec![node(1), node(2), node(3)] };
        let decoded = PeerList::decode(&list.encode(PROTOCOL_V4)).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn peer_list_v5_round_trip() {
        let list = PeerList { entries: vec![node(4), node(5)] };
        let decoded = PeerList::decode(&list.encode(PROTOCOL_V5)).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn peer_list_v4_zeroes_cert() {
        // a v4 entry can only carry the key block; the parsed identity must
        // come back with a null certificate regardless of the original
        let list = PeerList { entries: vec![node(8)] };
        let decoded = PeerList::decode(&list.encode(PROTOCOL_V4)).unwrap();
        assert_eq!(decoded.entries[0].to_bytes()[KEY_BLOCK_LEN..], [0u8, 0, 0]);
    }

    #[test]
    fn peer_list_accepts_p_tag() {
        let list = PeerList { entries: vec![node(1)] };
        let mut bytes = list.encode(PROTOCOL_V5);
        bytes[0] = b'P';
        assert_eq!(PeerList::decode(&bytes).unwrap(), list);
    }

    #[test]
    fn peer_list_truncated_entry_ends_list() {
        let list = PeerList { entries: vec![node(1), node(2)] };
        let mut bytes = list.encode(PROTOCOL_V4);
        bytes.truncate(bytes.len() - 10);
        let decoded = PeerList::decode(&bytes).unwrap();
        assert_eq!(decoded.entries.len(), 1);
    }

    #[test]
    fn index_packet_round_trip() {
        let packet = IndexPacket {
            owner: [3u8; 32],
            entries: vec![
                IndexEntry { key: [1u8; 32], delete_hash: [2u8; 32], time: 1_700_000_000 },
                IndexEntry { key: [4u8; 32], delete_hash: [5u8; 32], time: 1_700_000_060 },
            ],
        };
        assert_eq!(IndexPacket::from_bytes(&packet.to_bytes()).unwrap(), packet);
    }

    #[test]
    fn email_encrypted_round_trip_and_key_rule() {
        let edata = vec![0x5A; 77];
        let packet = EmailEncryptedPacket {
            key: EmailEncryptedPacket::compute_key(&edata),
            delete_hash: [8u8; 32],
            alg: 5,
            stored_time: 0,
            edata,
        };
        let restored = EmailEncryptedPacket::from_bytes(&packet.to_bytes()).unwrap();
        assert_eq!(restored, packet);
        assert_eq!(EmailEncryptedPacket::compute_key(&restored.edata), restored.key);
    }

    #[test]
    fn email_unencrypted_round_trip() {
        let packet = EmailUnencryptedPacket {
            message_id_hash: [1u8; 32],
            delete_auth: [2u8; 32],
            fragment_index: 0,
            num_fragments: 1,
            content: b"From: a\r\nTo: b\r\n\r\nhello".to_vec(),
        };
        assert_eq!(EmailUnencryptedPacket::from_bytes(&packet.to_bytes()).unwrap(), packet);
    }

    #[test]
    fn status_codes_keep_wire_values() {
        assert_eq!(StatusCode::Ok as u8, 0);
        assert_eq!(StatusCode::GeneralError as u8, 1);
        assert_eq!(StatusCode::NoDataFound as u8, 2);
        assert_eq!(StatusCode::InvalidPacket as u8, 3);
        assert_eq!(StatusCode::InvalidHashcash as u8, 4);
        assert_eq!(StatusCode::InsufficientHashcash as u8, 5);
        assert_eq!(StatusCode::NoDiskSpace as u8, 6);
        assert_eq!(StatusCode::DuplicatedData as u8, 7);
    }
}
