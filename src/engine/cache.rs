// Persistent ROM cache: one record file per key, read back through a memory map.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{CACHE_STORE_NAME, CACHE_TABLE_NAME};
use crate::error::CacheError;

const RECORD_MAGIC: &[u8; 4] = b"ROMC";
const RECORD_EXT: &str = "rec";

/// A cached ROM image.
#[derive(Debug, Clone)]
pub struct ContentRecord {
    pub key: String,
    pub data: Bytes,
    pub stored_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct RecordHeader {
    key: String,
    stored_at: DateTime<Utc>,
    len: u64,
}

/// Key → blob store consulted before the network.
#[async_trait]
pub trait ContentCache: Send + Sync {
    /// Look up `key`. Storage errors are logged and reported as a miss.
    async fn get(&self, key: &str) -> Option<Bytes>;

    /// Store `data` under `key`, replacing any previous record.
    async fn put(&self, key: &str, data: Bytes) -> Result<(), CacheError>;
}

/// Filesystem-backed store at `<cache_dir>/ROMCache/roms/`.
///
/// The directory is created on first access. Each key maps to a single
/// record file that is replaced atomically by rename, so a concurrent reader
/// sees either the old record or the new one.
pub struct DiskCache {
    root: PathBuf,
    table: OnceCell<PathBuf>,
    tmp_counter: AtomicU64,
}

impl DiskCache {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            root: cache_dir.as_ref().join(CACHE_STORE_NAME),
            table: OnceCell::new(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    async fn table_dir(&self) -> Result<&Path, CacheError> {
        let dir = self
            .table
            .get_or_try_init(|| async {
                let dir = self.root.join(CACHE_TABLE_NAME);
                tokio::fs::create_dir_all(&dir).await?;
                debug!("rom cache table ready at {}", dir.display());
                Ok::<_, CacheError>(dir)
            })
            .await?;
        Ok(dir.as_path())
    }

    /// File name for a key: the SHA-256 of the key, so any key length fits.
    /// The key itself is stored in the record header and checked on read.
    fn record_file_name(key: &str) -> String {
        let digest = Sha256::digest(key.as_bytes());
        format!("{}.{}", hex::encode(digest), RECORD_EXT)
    }

    fn tmp_file_name(&self, key: &str) -> String {
        format!(
            "{}.tmp-{}-{}",
            Self::record_file_name(key),
            std::process::id(),
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Read the full record for `key`, surfacing storage errors.
    pub async fn get_record(&self, key: &str) -> Result<Option<ContentRecord>, CacheError> {
        if key.is_empty() {
            return Ok(None);
        }
        let path = self.table_dir().await?.join(Self::record_file_name(key));
        let key = key.to_string();

        tokio::task::spawn_blocking(move || read_record(&path, &key))
            .await
            .map_err(|e| CacheError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))?
    }
}

fn read_record(path: &Path, key: &str) -> Result<Option<ContentRecord>, CacheError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    // SAFETY: record files are never modified in place; writers replace them
    // by rename, which leaves this inode untouched while it is mapped.
    let mmap = unsafe { Mmap::map(&file)? };

    if mmap.len() < 8 || &mmap[0..4] != RECORD_MAGIC {
        return Err(CacheError::Corrupt(format!("bad magic in {}", path.display())));
    }
    let header_len = u32::from_le_bytes([mmap[4], mmap[5], mmap[6], mmap[7]]) as usize;
    let data_start = 8 + header_len;
    if mmap.len() < data_start {
        return Err(CacheError::Corrupt("truncated header".to_string()));
    }

    let header: RecordHeader = serde_json::from_slice(&mmap[8..data_start])
        .map_err(|e| CacheError::Corrupt(e.to_string()))?;
    if header.key != key {
        return Err(CacheError::Corrupt(format!(
            "record key mismatch: expected {}, found {}",
            key, header.key
        )));
    }
    let data = &mmap[data_start..];
    if data.len() as u64 != header.len {
        return Err(CacheError::Corrupt(format!(
            "data length {} != recorded length {}",
            data.len(),
            header.len
        )));
    }

    Ok(Some(ContentRecord {
        key: header.key,
        data: Bytes::copy_from_slice(data),
        stored_at: header.stored_at,
    }))
}

fn encode_record(key: &str, data: &[u8], stored_at: DateTime<Utc>) -> Result<Vec<u8>, CacheError> {
    let header = serde_json::to_vec(&RecordHeader {
        key: key.to_string(),
        stored_at,
        len: data.len() as u64,
    })
    .map_err(|e| CacheError::Corrupt(e.to_string()))?;

    let mut out = Vec::with_capacity(8 + header.len() + data.len());
    out.extend_from_slice(RECORD_MAGIC);
    out.extend_from_slice(&(header.len() as u32).to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(data);
    Ok(out)
}

/// Write `bytes` to `tmp` then rename it over `dest`. The temp file is removed
/// if either step fails.
async fn replace_file(tmp: &Path, dest: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let result = match tokio::fs::write(tmp, bytes).await {
        Ok(()) => tokio::fs::rename(tmp, dest).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        if let Err(cleanup) = tokio::fs::remove_file(tmp).await {
            debug!("could not remove {}: {}", tmp.display(), cleanup);
        }
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl ContentCache for DiskCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        if key.is_empty() {
            return None;
        }
        match self.get_record(key).await {
            Ok(Some(record)) => {
                info!("ROM \"{}\" found in cache ({} bytes)", key, record.data.len());
                Some(record.data)
            }
            Ok(None) => {
                info!("ROM \"{}\" not found in cache", key);
                None
            }
            Err(e) => {
                warn!("cache read failed for \"{}\": {}", key, e);
                None
            }
        }
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), CacheError> {
        if key.is_empty() {
            return Err(CacheError::InvalidArgument("no ROM cache key provided"));
        }
        if data.is_empty() {
            return Err(CacheError::InvalidArgument("no ROM data to cache"));
        }

        let dir = self.table_dir().await?;
        let final_path = dir.join(Self::record_file_name(key));
        let tmp_path = dir.join(self.tmp_file_name(key));

        let encoded = encode_record(key, &data, Utc::now())?;
        replace_file(&tmp_path, &final_path, &encoded).await?;

        info!("ROM \"{}\" cached successfully ({} bytes)", key, data.len());
        Ok(())
    }
}
