use std::path::PathBuf;

/// Configuration for a silt storage instance.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// Total buffer pool size in bytes. Default: 64 MB.
    pub buffer_pool_size: usize,
    /// Path of the backing data file. Default: "silt.db".
    pub data_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            buffer_pool_size: 64 * 1024 * 1024, // 64 MB
            data_path: PathBuf::from("silt.db"),
        }
    }
}
