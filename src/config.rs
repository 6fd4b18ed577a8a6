use serde::{Deserialize, Serialize};

use crate::memory::TrackedAllocator;

/// Process-wide configuration. Everything defaults to off / unbounded;
/// embedders usually deserialize this from a JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Size classes preallocated by the allocator's small-object pools.
    pub pool_sizes: Vec<usize>,
    /// Enables the pooled node arena; off routes nodes to the host side.
    pub gc_enabled: bool,
    pub max_total_bytes: usize,
    pub max_single_alloc: usize,
    pub low_memory_threshold: usize,
    pub hot_function_threshold: u64,
    pub profiling_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pool_sizes: Vec::new(),
            gc_enabled: true,
            max_total_bytes: 0,
            max_single_alloc: 0,
            low_memory_threshold: 0,
            hot_function_threshold: 0,
            profiling_enabled: false,
        }
    }
}

impl Config {
    pub fn from_json(text: &str) -> Result<Config, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Allocator configured with this config's pools and limits.
    pub fn build_allocator(&self) -> TrackedAllocator {
        let mut allocator = TrackedAllocator::with_pools(&self.pool_sizes);
        if self.max_total_bytes > 0 {
            allocator.set_max_total(Some(self.max_total_bytes));
        }
        if self.max_single_alloc > 0 {
            allocator.set_max_single(Some(self.max_single_alloc));
        }
        allocator
    }
}
