//! # Identities and Addressing
//!
//! Two identity families live side by side in this node:
//!
//! - [`NodeIdentity`]: an overlay destination — the full public-key blob a
//!   peer publishes to the anonymity network. Its SHA-256 digest,
//!   [`IdentHash`], is the node's DHT address.
//! - [`BoteAddress`]: an email identity — a (crypto key, signing key) pair
//!   under one of three supported [`KeyType`] combinations, parsable from
//!   the v0 (raw base64) and v1 (`b32.`/`b64.` prefixed) address formats.
//!
//! ## Routing keyspace
//!
//! Kademlia closeness is not computed against raw hashes but against a
//! daily-rotating routing key: `SHA-256(key || YYYYMMDD)`. See
//! [`routing_key`]. Nodes are ordered by `routing_key(k) XOR ident_hash`.
//!
//! ## Wire forms
//!
//! A destination's canonical encoding is a 384-byte key block followed by a
//! self-delimiting certificate. Version-4 peer lists carry only the key
//! block; version-5 lists carry the full self-delimiting encoding.

use std::cmp::Ordering;
use std::fmt;

use base64::engine::general_purpose::PAD;
use base64::engine::GeneralPurpose;
use base64::{alphabet::Alphabet, Engine};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of the fixed public-key block of a destination (crypto + signing).
pub const KEY_BLOCK_LEN: usize = 384;

/// Minimum full destination length: key block + null certificate header.
pub const MIN_IDENTITY_LEN: usize = KEY_BLOCK_LEN + 3;

/// Dotted prefixes selecting the base encoding of a v1 address.
pub const ADDRESS_B32_PREFIX: &str = "b32.";
pub const ADDRESS_B64_PREFIX: &str = "b64.";

/// v0 address lengths in base64 characters, one per supported key pair.
pub const ECDH256_ECDSA256_ADDRESS_LEN: usize = 86;
pub const ECDH521_ECDSA521_ADDRESS_LEN: usize = 174;

const ADDRESS_FORMAT_V1: u8 = 0x01;

const CRYPTO_KIND_ECDH256: u8 = 0x02;
const CRYPTO_KIND_ECDH521: u8 = 0x03;
const CRYPTO_KIND_X25519: u8 = 0x04;
const SIGN_KIND_ECDSA256: u8 = 0x02;
const SIGN_KIND_ECDSA521: u8 = 0x03;
const SIGN_KIND_ED25519: u8 = 0x04;
const SYMM_KIND_AES256: u8 = 0x02;
const HASH_KIND_SHA256: u8 = 0x01;
const HASH_KIND_SHA512: u8 = 0x02;

/// The overlay network's base64 alphabet (`-` and `~` in place of `+`, `/`).
fn overlay_b64() -> GeneralPurpose {
    const CHARS: &str =
        "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-~";
    let alphabet = Alphabet::new(CHARS).expect("static alphabet");
    GeneralPurpose::new(&alphabet, PAD)
}

const B32_CHARS: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

fn b32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut acc: u32 = 0;
    let mut bits = 0u32;
    for &byte in data {
        acc = (acc << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(B32_CHARS[((acc >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(B32_CHARS[((acc << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

fn b32_decode(s: &str) -> Result<Vec<u8>, IdentityError> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut acc: u32 = 0;
    let mut bits = 0u32;
    for ch in s.bytes() {
        let val = B32_CHARS
            .iter()
            .position(|&c| c == ch.to_ascii_lowercase())
            .ok_or(IdentityError::BadEncoding)? as u32;
        acc = (acc << 5) | val;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((acc >> bits) & 0xff) as u8);
        }
    }
    Ok(out)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("buffer too short for identity")]
    Truncated,
    #[error("malformed base encoding")]
    BadEncoding,
    #[error("unsupported address format")]
    UnsupportedFormat,
    #[error("unsupported key type combination")]
    UnsupportedKeyType,
}

// ============================================================================
// IdentHash and the XOR metric
// ============================================================================

/// 32-byte identity digest; doubles as a DHT content key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentHash([u8; 32]);

impl IdentHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, IdentityError> {
        if slice.len() < 32 {
            return Err(IdentityError::Truncated);
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&slice[..32]);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn xor_distance(&self, other: &IdentHash) -> [u8; 32] {
        let mut dist = [0u8; 32];
        for i in 0..32 {
            dist[i] = self.0[i] ^ other.0[i];
        }
        dist
    }

    pub fn to_base64(self) -> String {
        overlay_b64().encode(self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self, IdentityError> {
        let bytes = overlay_b64()
            .decode(s)
            .map_err(|_| IdentityError::BadEncoding)?;
        if bytes.len() != 32 {
            return Err(IdentityError::BadEncoding);
        }
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for IdentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentHash({})", &hex::encode(self.0)[..16])
    }
}

impl fmt::Display for IdentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

/// Lexicographic comparison of two XOR distances.
pub fn distance_cmp(a: &[u8; 32], b: &[u8; 32]) -> Ordering {
    a.cmp(b)
}

/// Daily-rotating Kademlia routing key: `SHA-256(key || YYYYMMDD)`.
///
/// The date suffix is the current UTC date, so the whole keyspace shifts
/// once per day and stale closeness claims age out with it.
pub fn routing_key(key: &[u8; 32]) -> [u8; 32] {
    let date = time::OffsetDateTime::now_utc().date();
    let date_bytes = format!(
        "{:04}{:02}{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    );
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(date_bytes.as_bytes());
    hasher.finalize().into()
}

// ============================================================================
// NodeIdentity — overlay destinations
// ============================================================================

/// Trailing certificate of a destination. A null certificate is three zero
/// bytes; other kinds carry a payload whose length makes the whole encoding
/// self-delimiting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    pub kind: u8,
    pub payload: Vec<u8>,
}

impl Certificate {
    pub fn null() -> Self {
        Self { kind: 0, payload: Vec::new() }
    }

    fn encoded_len(&self) -> usize {
        3 + self.payload.len()
    }
}

/// A peer's full overlay destination: 384-byte key block plus certificate.
#[derive(Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    key_block: Box<[u8; KEY_BLOCK_LEN]>,
    cert: Certificate,
}

impl NodeIdentity {
    /// Build from a bare 384-byte key block with a null certificate.
    /// This is the only form a version-4 peer list can carry.
    pub fn from_key_block(block: [u8; KEY_BLOCK_LEN]) -> Self {
        Self { key_block: Box::new(block), cert: Certificate::null() }
    }

    /// Parse a self-delimiting destination, returning the identity and the
    /// number of bytes consumed.
    pub fn from_buffer(buf: &[u8]) -> Result<(Self, usize), IdentityError> {
        if buf.len() < MIN_IDENTITY_LEN {
            return Err(IdentityError::Truncated);
        }
        let mut block = [0u8; KEY_BLOCK_LEN];
        block.copy_from_slice(&buf[..KEY_BLOCK_LEN]);

        let kind = buf[KEY_BLOCK_LEN];
        let cert_len =
            u16::from_be_bytes([buf[KEY_BLOCK_LEN + 1], buf[KEY_BLOCK_LEN + 2]]) as usize;
        if buf.len() < MIN_IDENTITY_LEN + cert_len {
            return Err(IdentityError::Truncated);
        }
        let payload = buf[MIN_IDENTITY_LEN..MIN_IDENTITY_LEN + cert_len].to_vec();

        let identity = Self {
            key_block: Box::new(block),
            cert: Certificate { kind, payload },
        };
        let consumed = MIN_IDENTITY_LEN + cert_len;
        Ok((identity, consumed))
    }

    pub fn from_base64(s: &str) -> Result<Self, IdentityError> {
        let bytes = overlay_b64()
            .decode(s.trim())
            .map_err(|_| IdentityError::BadEncoding)?;
        let (identity, consumed) = Self::from_buffer(&bytes)?;
        if consumed != bytes.len() {
            return Err(IdentityError::BadEncoding);
        }
        Ok(identity)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(KEY_BLOCK_LEN + self.cert.encoded_len());
        out.extend_from_slice(self.key_block.as_ref());
        out.push(self.cert.kind);
        out.extend_from_slice(&(self.cert.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.cert.payload);
        out
    }

    pub fn to_base64(&self) -> String {
        overlay_b64().encode(self.to_bytes())
    }

    pub fn key_block(&self) -> &[u8; KEY_BLOCK_LEN] {
        self.key_block.as_ref()
    }

    /// SHA-256 over the canonical encoding; the node's DHT address.
    pub fn ident_hash(&self) -> IdentHash {
        let mut hasher = Sha256::new();
        hasher.update(self.to_bytes());
        IdentHash(hasher.finalize().into())
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeIdentity({:?})", self.ident_hash())
    }
}

// ============================================================================
// BoteAddress — email identities
// ============================================================================

/// Supported key-type combinations of an email identity.
///
/// The enum is sealed and every variant maps to explicit wire bytes; the
/// protocol never carries these as strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyType {
    /// ECDH-256 / ECDSA-256 / AES-256-CBC / SHA-256
    Ecdh256Ecdsa256,
    /// ECDH-521 / ECDSA-521 / AES-256-CBC / SHA-512
    Ecdh521Ecdsa521,
    /// X25519 / Ed25519 / AES-256-CBC / SHA-512
    X25519Ed25519,
}

impl KeyType {
    /// Length in bytes of the crypto public key (same for signing).
    pub fn public_key_len(self) -> usize {
        match self {
            KeyType::Ecdh256Ecdsa256 => 33,
            KeyType::Ecdh521Ecdsa521 => 66,
            KeyType::X25519Ed25519 => 32,
        }
    }

    /// The algorithm byte stored in encrypted email packets.
    pub fn wire_byte(self) -> u8 {
        match self {
            KeyType::Ecdh256Ecdsa256 => 2,
            KeyType::Ecdh521Ecdsa521 => 3,
            KeyType::X25519Ed25519 => 5,
        }
    }

    pub fn from_wire_byte(byte: u8) -> Result<Self, IdentityError> {
        match byte {
            2 => Ok(KeyType::Ecdh256Ecdsa256),
            3 => Ok(KeyType::Ecdh521Ecdsa521),
            5 => Ok(KeyType::X25519Ed25519),
            _ => Err(IdentityError::UnsupportedKeyType),
        }
    }

    /// The four v1 tag bytes: crypto, signing, symmetric, hash kinds.
    fn v1_tags(self) -> [u8; 4] {
        match self {
            KeyType::Ecdh256Ecdsa256 => {
                [CRYPTO_KIND_ECDH256, SIGN_KIND_ECDSA256, SYMM_KIND_AES256, HASH_KIND_SHA256]
            }
            KeyType::Ecdh521Ecdsa521 => {
                [CRYPTO_KIND_ECDH521, SIGN_KIND_ECDSA521, SYMM_KIND_AES256, HASH_KIND_SHA512]
            }
            KeyType::X25519Ed25519 => {
                [CRYPTO_KIND_X25519, SIGN_KIND_ED25519, SYMM_KIND_AES256, HASH_KIND_SHA512]
            }
        }
    }

    fn from_v1_tags(tags: &[u8]) -> Result<Self, IdentityError> {
        for kt in [KeyType::Ecdh256Ecdsa256, KeyType::Ecdh521Ecdsa521, KeyType::X25519Ed25519] {
            if tags == kt.v1_tags() {
                return Ok(kt);
            }
        }
        Err(IdentityError::UnsupportedKeyType)
    }
}

/// Public half of an email identity: crypto key + signing key.
#[derive(Clone, PartialEq, Eq)]
pub struct BoteAddress {
    key_type: KeyType,
    crypto_pub: Vec<u8>,
    signing_pub: Vec<u8>,
}

impl BoteAddress {
    pub fn new(key_type: KeyType, crypto_pub: Vec<u8>, signing_pub: Vec<u8>) -> Self {
        debug_assert_eq!(crypto_pub.len(), key_type.public_key_len());
        debug_assert_eq!(signing_pub.len(), key_type.public_key_len());
        Self { key_type, crypto_pub, signing_pub }
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn crypto_pub(&self) -> &[u8] {
        &self.crypto_pub
    }

    pub fn signing_pub(&self) -> &[u8] {
        &self.signing_pub
    }

    /// SHA-256 over the concatenated public keys; the mailbox's index key.
    pub fn ident_hash(&self) -> IdentHash {
        let mut hasher = Sha256::new();
        hasher.update(&self.crypto_pub);
        hasher.update(&self.signing_pub);
        IdentHash(hasher.finalize().into())
    }

    /// Parse either address format, selected by the dotted prefix.
    pub fn parse(address: &str) -> Result<Self, IdentityError> {
        if address.starts_with(ADDRESS_B32_PREFIX) || address.starts_with(ADDRESS_B64_PREFIX) {
            Self::parse_v1(address)
        } else {
            Self::parse_v0(address)
        }
    }

    /// v0: raw base64 of (crypto || signing), with each key's leading `'A'`
    /// character stripped; the total length selects the key pair.
    pub fn parse_v0(address: &str) -> Result<Self, IdentityError> {
        let key_type = match address.len() {
            ECDH256_ECDSA256_ADDRESS_LEN => KeyType::Ecdh256Ecdsa256,
            ECDH521_ECDSA521_ADDRESS_LEN => KeyType::Ecdh521Ecdsa521,
            _ => return Err(IdentityError::UnsupportedKeyType),
        };
        let half = address.len() / 2;
        let crypto_pub = decode_a_prefixed(&address[..half], key_type)?;
        let signing_pub = decode_a_prefixed(&address[half..], key_type)?;
        Ok(Self { key_type, crypto_pub, signing_pub })
    }

    /// Inverse of [`Self::parse_v0`]; only defined for the two v0 key pairs.
    pub fn to_v0(&self) -> Result<String, IdentityError> {
        if self.key_type == KeyType::X25519Ed25519 {
            return Err(IdentityError::UnsupportedKeyType);
        }
        let mut out = encode_a_stripped(&self.crypto_pub)?;
        out.push_str(&encode_a_stripped(&self.signing_pub)?);
        Ok(out)
    }

    /// v1: `b32.`/`b64.` prefix, then format tag, four kind tags, and the
    /// two public keys back to back.
    pub fn parse_v1(address: &str) -> Result<Self, IdentityError> {
        if address.len() < 4 {
            return Err(IdentityError::UnsupportedFormat);
        }
        let (prefix, rest) = address.split_at(4);
        let bytes = match prefix {
            ADDRESS_B32_PREFIX => b32_decode(rest)?,
            ADDRESS_B64_PREFIX => overlay_b64()
                .decode(rest)
                .map_err(|_| IdentityError::BadEncoding)?,
            _ => return Err(IdentityError::UnsupportedFormat),
        };
        Self::from_v1_bytes(&bytes)
    }

    /// Parse the decoded v1 blob (format tag onward).
    pub fn from_v1_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        if bytes.len() < 5 {
            return Err(IdentityError::Truncated);
        }
        if bytes[0] != ADDRESS_FORMAT_V1 {
            return Err(IdentityError::UnsupportedFormat);
        }
        let key_type = KeyType::from_v1_tags(&bytes[1..5])?;
        let klen = key_type.public_key_len();
        let body = &bytes[5..];
        if body.len() < 2 * klen {
            return Err(IdentityError::Truncated);
        }
        Ok(Self {
            key_type,
            crypto_pub: body[..klen].to_vec(),
            signing_pub: body[klen..2 * klen].to_vec(),
        })
    }

    /// The v1 blob: format tag, kind tags, keys.
    pub fn to_v1_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + 2 * self.key_type.public_key_len());
        out.push(ADDRESS_FORMAT_V1);
        out.extend_from_slice(&self.key_type.v1_tags());
        out.extend_from_slice(&self.crypto_pub);
        out.extend_from_slice(&self.signing_pub);
        out
    }

    pub fn to_v1_b64(&self) -> String {
        format!("{}{}", ADDRESS_B64_PREFIX, overlay_b64().encode(self.to_v1_bytes()))
    }

    pub fn to_v1_b32(&self) -> String {
        format!("{}{}", ADDRESS_B32_PREFIX, b32_encode(&self.to_v1_bytes()))
    }
}

impl fmt::Debug for BoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoteAddress({:?}, {:?})", self.key_type, self.ident_hash())
    }
}

/// Decode one v0 address half: prepend the `'A'` the serializer stripped.
fn decode_a_prefixed(half: &str, key_type: KeyType) -> Result<Vec<u8>, IdentityError> {
    let full = format!("A{half}");
    let bytes = overlay_b64()
        .decode(full)
        .map_err(|_| IdentityError::BadEncoding)?;
    if bytes.len() != key_type.public_key_len() {
        return Err(IdentityError::BadEncoding);
    }
    Ok(bytes)
}

/// Encode one key and strip the leading `'A'`. Keys whose first six bits are
/// not zero cannot be carried in a v0 address.
fn encode_a_stripped(key: &[u8]) -> Result<String, IdentityError> {
    let encoded = overlay_b64().encode(key);
    match encoded.strip_prefix('A') {
        Some(rest) => Ok(rest.to_string()),
        None => Err(IdentityError::BadEncoding),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node_identity(seed: u8) -> NodeIdentity {
        let mut block = [0u8; KEY_BLOCK_LEN];
        for (i, byte) in block.iter_mut().enumerate() {
            *byte = seed.wrapping_add(i as u8);
        }
        NodeIdentity::from_key_block(block)
    }

    #[test]
    fn ident_hash_round_trip_and_ordering() {
        let a = IdentHash::from_bytes([1u8; 32]);
        let b = IdentHash::from_bytes([2u8; 32]);
        assert_ne!(a, b);
        let dist = a.xor_distance(&b);
        assert_eq!(dist, [3u8; 32]);
        assert_eq!(distance_cmp(&dist, &dist), Ordering::Equal);
        assert_eq!(IdentHash::from_base64(&a.to_base64()).unwrap(), a);
    }

    #[test]
    fn routing_key_differs_from_raw_key() {
        let key = [7u8; 32];
        let rk = routing_key(&key);
        assert_ne!(rk, key);
        // stable within one call sequence (same day)
        assert_eq!(rk, routing_key(&key));
    }

    #[test]
    fn node_identity_base64_round_trip() {
        let identity = test_node_identity(9);
        let b64 = identity.to_base64();
        let restored = NodeIdentity::from_base64(&b64).unwrap();
        assert_eq!(identity, restored);
        assert_eq!(identity.ident_hash(), restored.ident_hash());
    }

    #[test]
    fn node_identity_self_delimiting_with_cert_payload() {
        let mut bytes = test_node_identity(3).to_bytes();
        // splice a 4-byte certificate payload in
        let len = bytes.len();
        bytes[len - 2..].copy_from_slice(&4u16.to_be_bytes());
        bytes.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        bytes.extend_from_slice(b"tail");

        let (identity, consumed) = NodeIdentity::from_buffer(&bytes).unwrap();
        assert_eq!(consumed, MIN_IDENTITY_LEN + 4);
        assert_eq!(identity.to_bytes(), bytes[..consumed]);
    }

    #[test]
    fn node_identity_truncated_rejected() {
        let bytes = test_node_identity(1).to_bytes();
        assert_eq!(
            NodeIdentity::from_buffer(&bytes[..KEY_BLOCK_LEN]).unwrap_err(),
            IdentityError::Truncated
        );
    }

    fn v0_key(len: usize, seed: u8) -> Vec<u8> {
        // compressed-point style first byte keeps the top six bits zero,
        // which the v0 'A'-stripping format requires
        let mut key = vec![0u8; len];
        key[0] = 0x02;
        for (i, byte) in key.iter_mut().enumerate().skip(1) {
            *byte = seed.wrapping_mul(3).wrapping_add(i as u8);
        }
        key
    }

    #[test]
    fn v0_round_trip_both_key_pairs() {
        for (key_type, expected_len) in [
            (KeyType::Ecdh256Ecdsa256, ECDH256_ECDSA256_ADDRESS_LEN),
            (KeyType::Ecdh521Ecdsa521, ECDH521_ECDSA521_ADDRESS_LEN),
        ] {
            let klen = key_type.public_key_len();
            let addr = BoteAddress::new(key_type, v0_key(klen, 5), v0_key(klen, 11));
            let encoded = addr.to_v0().unwrap();
            assert_eq!(encoded.len(), expected_len);
            let parsed = BoteAddress::parse_v0(&encoded).unwrap();
            assert_eq!(parsed, addr);
        }
    }

    #[test]
    fn v0_rejects_unknown_length() {
        assert_eq!(
            BoteAddress::parse_v0("AAAA").unwrap_err(),
            IdentityError::UnsupportedKeyType
        );
    }

    #[test]
    fn v1_round_trip_all_kinds_both_bases() {
        for key_type in [
            KeyType::Ecdh256Ecdsa256,
            KeyType::Ecdh521Ecdsa521,
            KeyType::X25519Ed25519,
        ] {
            let klen = key_type.public_key_len();
            let addr = BoteAddress::new(
                key_type,
                (0..klen).map(|i| i as u8).collect(),
                (0..klen).map(|i| (i as u8).wrapping_add(100)).collect(),
            );
            let parsed = BoteAddress::parse(&addr.to_v1_b64()).unwrap();
            assert_eq!(parsed, addr);
            let parsed = BoteAddress::parse(&addr.to_v1_b32()).unwrap();
            assert_eq!(parsed, addr);
        }
    }

    #[test]
    fn v1_reserializes_inner_identity() {
        let addr = BoteAddress::new(
            KeyType::X25519Ed25519,
            vec![4u8; 32],
            vec![9u8; 32],
        );
        let blob = addr.to_v1_bytes();
        let parsed = BoteAddress::from_v1_bytes(&blob).unwrap();
        assert_eq!(parsed.to_v1_bytes(), blob);
    }

    #[test]
    fn v1_rejects_bad_header() {
        let addr = BoteAddress::new(KeyType::X25519Ed25519, vec![4u8; 32], vec![9u8; 32]);
        let mut blob = addr.to_v1_bytes();
        blob[0] = 0x02;
        assert_eq!(
            BoteAddress::from_v1_bytes(&blob).unwrap_err(),
            IdentityError::UnsupportedFormat
        );
        blob[0] = ADDRESS_FORMAT_V1;
        blob[2] = 0x7F;
        assert_eq!(
            BoteAddress::from_v1_bytes(&blob).unwrap_err(),
            IdentityError::UnsupportedKeyType
        );
    }
}
