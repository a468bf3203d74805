//! File-content hashing with an `(mtime, size)` keyed cache.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use sha2::{Digest, Sha256};

/// Caches content hashes per path, keyed by the file's `(mtime, size)` so an
/// unchanged file is never re-read. Lives for one invocation; the actual
/// hashing happens outside the lock.
#[derive(Debug, Default)]
pub struct HashCache {
  entries: Mutex<HashMap<PathBuf, CacheEntry>>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
  mtime: SystemTime,
  size: u64,
  hash: String,
}

impl HashCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Hex SHA-256 of the file's contents.
  pub fn hash(&self, path: impl AsRef<Path>) -> io::Result<String> {
    let path = path.as_ref();
    let meta = std::fs::metadata(path)?;
    let mtime = meta.modified()?;
    let size = meta.len();

    {
      let entries = self.entries.lock().unwrap();
      if let Some(e) = entries.get(path) {
        if e.mtime == mtime && e.size == size {
          return Ok(e.hash.clone());
        }
      }
    }

    let hash = hash_file(path)?;

    let mut entries = self.entries.lock().unwrap();
    entries.insert(
      path.to_path_buf(),
      CacheEntry {
        mtime,
        size,
        hash: hash.clone(),
      },
    );
    Ok(hash)
  }
}

fn hash_file(path: &Path) -> io::Result<String> {
  let mut file = File::open(path)?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher)?;
  Ok(format!("{:x}", hasher.finalize()))
}

/// Hex SHA-256 of a string.
pub fn hash_str(s: &str) -> String {
  hash_bytes(s.as_bytes())
}

/// Hex SHA-256 of a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> String {
  format!("{:x}", Sha256::digest(bytes))
}
