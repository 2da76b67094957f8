//! Crypto collaborator seam: hashing, delete-auth tokens, and the
//! ECIES-style sealed box used for email payloads.
//!
//! The box layout for the X25519/Ed25519 key type: ephemeral X25519 key
//! agreement, SHA-512 KDF, AES-256-CBC payload cipher. Sealed data is `ephemeral_pub(32) || iv(16) || ciphertext`.
//! The NIST-curve key types parse and serialize as identities but cannot be
//! sealed or opened here; callers get [`CryptoError::UnsupportedKeyType`]
//! and skip the message.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::identity::{BoteAddress, KeyType};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const SEALED_HEADER_LEN: usize = 32 + 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key type has no encryption support")]
    UnsupportedKeyType,
    #[error("sealed data too short")]
    Truncated,
    #[error("decryption failed")]
    DecryptFailed,
}

/// SHA-256 over a sequence of byte slices.
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// 32-byte secret authorizing deletion of one stored email packet.
/// The DHT stores only its SHA-256, the delete-verification hash.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DeleteAuth(pub [u8; 32]);

impl DeleteAuth {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn verification_hash(&self) -> [u8; 32] {
        sha256(&[&self.0])
    }
}

impl std::fmt::Debug for DeleteAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DeleteAuth(..)")
    }
}

/// Secret halves of an email identity. Only the X25519/Ed25519 combination
/// carries key material this node can generate and decrypt with.
#[derive(Clone)]
pub struct EmailKeypair {
    crypto_secret: StaticSecret,
    signing_key: SigningKey,
}

impl EmailKeypair {
    pub fn generate() -> Self {
        let crypto_secret = StaticSecret::random_from_rng(OsRng);
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { crypto_secret, signing_key }
    }

    pub fn address(&self) -> BoteAddress {
        let crypto_pub = PublicKey::from(&self.crypto_secret);
        BoteAddress::new(
            KeyType::X25519Ed25519,
            crypto_pub.as_bytes().to_vec(),
            self.signing_key.verifying_key().as_bytes().to_vec(),
        )
    }

    /// Open a sealed box addressed to this identity.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < SEALED_HEADER_LEN {
            return Err(CryptoError::Truncated);
        }
        let mut eph_pub = [0u8; 32];
        eph_pub.copy_from_slice(&sealed[..32]);
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&sealed[32..48]);

        let shared = self.crypto_secret.diffie_hellman(&PublicKey::from(eph_pub));
        let key = derive_cipher_key(shared.as_bytes());

        Aes256CbcDec::new(&key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&sealed[48..])
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

/// Seal plaintext for a recipient address with a fresh ephemeral key.
pub fn seal(recipient: &BoteAddress, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if recipient.key_type() != KeyType::X25519Ed25519 {
        return Err(CryptoError::UnsupportedKeyType);
    }
    let mut recipient_pub = [0u8; 32];
    recipient_pub.copy_from_slice(recipient.crypto_pub());

    let eph_secret = StaticSecret::random_from_rng(OsRng);
    let eph_pub = PublicKey::from(&eph_secret);
    let shared = eph_secret.diffie_hellman(&PublicKey::from(recipient_pub));
    let key = derive_cipher_key(shared.as_bytes());

    let mut iv = [0u8; 16];
    OsRng.fill_bytes(&mut iv);

    let ciphertext =
        Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(SEALED_HEADER_LEN + ciphertext.len());
    out.extend_from_slice(eph_pub.as_bytes());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// SHA-512 KDF over the shared secret; the cipher takes the first 32 bytes.
fn derive_cipher_key(shared: &[u8; 32]) -> [u8; 32] {
    let digest = Sha512::digest(shared);
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest[..32]);
    key
}
