//! Persistent content store for the three DHT content classes.
//!
//! Layout mirrors the hashed-storage convention of the data directory:
//!
//! ```text
//! <datadir>/DHTindex/i.<c>/i.k.<key>.dat
//! <datadir>/DHTemail/e.<c>/e.k.<key>.dat
//! <datadir>/DHTdirectory/d.<c>/d.k.<key>.dat
//! ```
//!
//! where `<c>` is the first character of the base64 key — a one-level shard
//! that keeps any single directory small. Keys are sanitized by replacing
//! `/` and `\` with `-`. Writes go to a temp file in the same directory and
//! rename into place, so a reader never observes a half-written value.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::identity::IdentHash;
use crate::wire::{ContentClass, EmailEncryptedPacket, IndexPacket};

const FILE_SUFFIX: &str = "dat";

fn class_dir(class: ContentClass) -> &'static str {
    match class {
        ContentClass::Index => "DHTindex",
        ContentClass::Email => "DHTemail",
        ContentClass::Directory => "DHTdirectory",
    }
}

fn class_prefix(class: ContentClass) -> &'static str {
    match class {
        ContentClass::Index => "i.",
        ContentClass::Email => "e.",
        ContentClass::Directory => "d.",
    }
}

/// Replace path-significant characters in a base64 identifier.
fn sanitize(ident: &str) -> String {
    ident.replace(['/', '\\'], "-")
}

/// Recover the key from a store file name (`<p>k.<base64>.dat`). The
/// overlay base64 alphabet contains no path separators, so sanitization is
/// the identity on these names and the encoding reverses cleanly.
fn key_from_file_name(name: &str, key_prefix: &str) -> Option<IdentHash> {
    let stem = name
        .strip_prefix(key_prefix)?
        .strip_suffix(&format!(".{FILE_SUFFIX}"))?;
    IdentHash::from_base64(stem).ok()
}

/// Key→bytes store for one data directory, all three classes.
#[derive(Clone, Debug)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open a store rooted at the data directory, creating the per-class
    /// directories if missing.
    pub fn open(datadir: &Path) -> Result<Self> {
        for class in ContentClass::ALL {
            let dir = datadir.join(class_dir(class));
            fs::create_dir_all(&dir)
                .with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(Self { root: datadir.to_path_buf() })
    }

    fn path_for(&self, class: ContentClass, key: &IdentHash) -> PathBuf {
        let ident = sanitize(&key.to_base64());
        let prefix = class_prefix(class);
        let shard = format!("{}{}", prefix, &ident[..1]);
        let file = format!("{}k.{}.{}", prefix, ident, FILE_SUFFIX);
        self.root.join(class_dir(class)).join(shard).join(file)
    }

    /// Store bytes under a key, replacing any prior value.
    pub fn put(&self, class: ContentClass, key: &IdentHash, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(class, key);
        let dir = path.parent().expect("sharded path has a parent");
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

        let tmp = dir.join(format!(".tmp.{}", sanitize(&key.to_base64())));
        {
            let mut file = fs::File::create(&tmp)
                .with_context(|| format!("create {}", tmp.display()))?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)
            .with_context(|| format!("rename into {}", path.display()))?;
        debug!(class = ?class, key = %key, len = bytes.len(), "stored");
        Ok(())
    }

    pub fn get(&self, class: ContentClass, key: &IdentHash) -> Option<Vec<u8>> {
        let path = self.path_for(class, key);
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "read failed");
                None
            }
        }
    }

    pub fn contains(&self, class: ContentClass, key: &IdentHash) -> bool {
        self.path_for(class, key).exists()
    }

    pub fn delete(&self, class: ContentClass, key: &IdentHash) -> bool {
        let path = self.path_for(class, key);
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "delete failed");
                false
            }
        }
    }

    /// Seconds since the epoch of the stored file, or 0 when absent.
    pub fn last_modified(&self, class: ContentClass, key: &IdentHash) -> u64 {
        let path = self.path_for(class, key);
        fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|age| age.as_secs())
            .unwrap_or(0)
    }

    /// Visit every stored `(key, value)` of a class. A file that cannot be
    /// read or whose name does not decode back to a key is skipped with a
    /// warning; iteration continues.
    pub fn for_each(
        &self,
        class: ContentClass,
        mut visit: impl FnMut(IdentHash, Vec<u8>),
    ) -> Result<()> {
        let class_root = self.root.join(class_dir(class));
        let shards = match fs::read_dir(&class_root) {
            Ok(shards) => shards,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let key_prefix = format!("{}k.", class_prefix(class));
        for shard in shards.flatten() {
            if !shard.path().is_dir() {
                continue;
            }
            let files = match fs::read_dir(shard.path()) {
                Ok(files) => files,
                Err(e) => {
                    warn!(shard = %shard.path().display(), error = %e, "shard unreadable");
                    continue;
                }
            };
            for file in files.flatten() {
                if !file.path().is_file() {
                    continue;
                }
                let name = file.file_name();
                let Some(key) = key_from_file_name(&name.to_string_lossy(), &key_prefix) else {
                    warn!(file = %file.path().display(), "not a store file name");
                    continue;
                };
                match fs::read(file.path()) {
                    Ok(bytes) => visit(key, bytes),
                    Err(e) => {
                        warn!(file = %file.path().display(), error = %e, "skipping unreadable value");
                    }
                }
            }
        }
        Ok(())
    }

    /// File a retrieved payload under the class and key its own header
    /// declares. Returns `false` for payloads that do not parse as any
    /// stored class.
    pub fn safe(&self, bytes: &[u8]) -> bool {
        let Some(&tag) = bytes.first() else {
            return false;
        };
        let result = match ContentClass::from_wire_byte(tag) {
            Ok(ContentClass::Index) => IndexPacket::from_bytes(bytes)
                .map_err(anyhow::Error::from)
                .and_then(|index| {
                    self.put(ContentClass::Index, &IdentHash::from_bytes(index.owner), bytes)
                }),
            Ok(ContentClass::Email) => EmailEncryptedPacket::from_bytes(bytes)
                .map_err(anyhow::Error::from)
                .and_then(|email| {
                    self.put(ContentClass::Email, &IdentHash::from_bytes(email.key), bytes)
                }),
            Ok(ContentClass::Directory) => {
                // directory entries are keyed by their leading identity hash
                match IdentHash::from_slice(bytes.get(2..).unwrap_or_default()) {
                    Ok(hash) => self.put(ContentClass::Directory, &hash, bytes),
                    Err(e) => Err(e.into()),
                }
            }
            Err(_) => {
                debug!(tag, "not a storable payload");
                return false;
            }
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to file payload locally");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::IndexEntry;
    use tempfile::TempDir;

    fn store() -> (TempDir, ContentStore) {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn key(seed: u8) -> IdentHash {
        IdentHash::from_bytes([seed; 32])
    }

    #[test]
    fn put_get_delete_cycle() {
        let (_dir, store) = store();
        let k = key(1);
        assert!(store.get(ContentClass::Email, &k).is_none());
        assert_eq!(store.last_modified(ContentClass::Email, &k), 0);

        store.put(ContentClass::Email, &k, b"ciphertext").unwrap();
        assert_eq!(store.get(ContentClass::Email, &k).unwrap(), b"ciphertext");
        assert!(store.last_modified(ContentClass::Email, &k) > 0);

        assert!(store.delete(ContentClass::Email, &k));
        assert!(store.get(ContentClass::Email, &k).is_none());
        assert!(!store.delete(ContentClass::Email, &k));
    }

    #[test]
    fn put_replaces_existing() {
        let (_dir, store) = store();
        let k = key(2);
        store.put(ContentClass::Index, &k, b"first").unwrap();
        store.put(ContentClass::Index, &k, b"second").unwrap();
        assert_eq!(store.get(ContentClass::Index, &k).unwrap(), b"second");
    }

    #[test]
    fn classes_do_not_collide() {
        let (_dir, store) = store();
        let k = key(3);
        store.put(ContentClass::Index, &k, b"index").unwrap();
        store.put(ContentClass::Email, &k, b"email").unwrap();
        assert_eq!(store.get(ContentClass::Index, &k).unwrap(), b"index");
        assert_eq!(store.get(ContentClass::Email, &k).unwrap(), b"email");
    }

    #[test]
    fn iteration_yields_keys_and_values() {
        let (_dir, store) = store();
        for seed in 0..5u8 {
            store
                .put(ContentClass::Directory, &key(seed), &[seed])
                .unwrap();
        }
        let mut seen = Vec::new();
        store
            .for_each(ContentClass::Directory, |k, bytes| {
                assert_eq!(k, key(bytes[0]));
                seen.push(bytes[0]);
            })
            .unwrap();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn path_sanitizes_separators() {
        let (_dir, store) = store();
        // a key whose base64 rendering contains no separators still must
        // produce a path under the class root
        let path = store.path_for(ContentClass::Email, &key(0xFE));
        assert!(path.starts_with(store.root.join("DHTemail")));
        assert!(!path.to_string_lossy().contains('\\'));
    }

    #[test]
    fn safe_files_index_and_email_by_embedded_key() {
        let (_dir, store) = store();

        let index = IndexPacket {
            owner: [9u8; 32],
            entries: vec![IndexEntry { key: [1u8; 32], delete_hash: [2u8; 32], time: 7 }],
        };
        assert!(store.safe(&index.to_bytes()));
        assert_eq!(
            store.get(ContentClass::Index, &key(9)).unwrap(),
            index.to_bytes()
        );

        let email = EmailEncryptedPacket {
            key: [4u8; 32],
            delete_hash: [5u8; 32],
            alg: 5,
            stored_time: 0,
            edata: vec![1, 2, 3],
        };
        assert!(store.safe(&email.to_bytes()));
        assert_eq!(
            store.get(ContentClass::Email, &key(4)).unwrap(),
            email.to_bytes()
        );

        assert!(!store.safe(b"Zgarbage"));
        assert!(!store.safe(&[]));
    }
}
