use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Write-ahead log sequence number.
pub type Lsn = u64;

/// Write-ahead log writer, held by the buffer pool as an opaque
/// collaborator. The pool does not invoke it yet; recovery integration
/// (log-before-evict ordering) will go through this seam.
///
/// Accumulates serialized records in a byte buffer and hands out
/// monotonic LSNs.
pub struct LogManager {
    next_lsn: AtomicU64,
    buffer: Mutex<Vec<u8>>,
}

impl LogManager {
    pub fn new() -> Self {
        Self {
            next_lsn: AtomicU64::new(0),
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Append a serialized record, returning its LSN.
    pub fn append(&self, record: &[u8]) -> Lsn {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        self.buffer.lock().unwrap().extend_from_slice(record);
        lsn
    }

    /// The next LSN that `append` would assign.
    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst)
    }

    /// Bytes buffered and not yet flushed to the log device.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}
