use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransferError;

/// Byte counts reported while a download is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub loaded_bytes: u64,
    /// `None` when the response did not advertise a size.
    pub total_bytes: Option<u64>,
}

impl DownloadProgress {
    pub fn new(loaded_bytes: u64, total_bytes: Option<u64>) -> Self {
        Self {
            loaded_bytes,
            total_bytes,
        }
    }

    /// Rounded percentage, only when the total is known and non-zero.
    pub fn percent(&self) -> Option<u64> {
        match self.total_bytes {
            Some(total) if total > 0 => {
                Some((self.loaded_bytes as f64 / total as f64 * 100.0).round() as u64)
            }
            _ => None,
        }
    }
}

/// Callback invoked synchronously as bytes arrive. Must not block.
pub type ProgressFn<'a> = &'a (dyn Fn(DownloadProgress) + Send + Sync);

#[async_trait]
pub trait RomSource: Send + Sync {
    /// Download the ROM with the given logical name as one contiguous buffer.
    ///
    /// All-or-nothing: on error no partial buffer is returned.
    async fn fetch(&self, name: &str, on_progress: ProgressFn<'_>) -> Result<Bytes, TransferError>;
}
