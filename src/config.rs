/// Runtime configuration for a StrataDB instance.
#[derive(Debug, Clone)]
pub struct StrataConfig {
    /// Commits call `write_batch` with `sync = true` when set.
    pub sync_commits: bool,
    /// Bound on iterators held open per repeatable-read transaction.
    pub iterator_pool_size: usize,
    /// Dump chunks are emitted once the buffer crosses this threshold.
    pub dump_chunk_bytes: usize,
    /// A scan whose per-key column budget is exhausted keeps walking
    /// linearly while within this many columns of the budget; beyond it
    /// the scan seeks directly to the next key.
    pub column_scan_slack: usize,
    /// Capacity of the replication update stream before commits block.
    pub replication_queue_depth: usize,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            sync_commits: true,
            iterator_pool_size: 1_000,
            dump_chunk_bytes: 64 * 1024,
            column_scan_slack: 50,
            replication_queue_depth: 256,
        }
    }
}

impl StrataConfig {
    /// Profile for tests and local development: no fsync on commit and a
    /// small iterator pool so pool exhaustion is reachable in tests.
    pub fn development() -> Self {
        Self {
            sync_commits: false,
            iterator_pool_size: 16,
            ..Self::default()
        }
    }
}
