#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    /// Number of page frames held in memory.
    pub pool_size: usize,
    /// Key/value pairs per page-table hash bucket before a split.
    pub bucket_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        BufferPoolConfig {
            pool_size: 1000,
            bucket_size: 64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LockManagerConfig {
    /// Hold every lock until the transaction commits or aborts.
    pub strict_2pl: bool,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        LockManagerConfig { strict_2pl: false }
    }
}
