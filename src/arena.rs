//! Pooled storage for AST nodes.
//!
//! The arena serves uniformly-shaped nodes from a small set of sub-pools so
//! whole trees can be dropped without walking them. Freed slots go onto a
//! per-pool LIFO free list and are recycled; freeing a slot twice is
//! reported, never fatal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::ast::Node;

/// Sub-pool count. All nodes are the same shape, so the pool choice is
/// purely round-robin distribution.
pub const POOL_COUNT: usize = 3;

const INITIAL_CHUNK: usize = 256;
const MAX_CHUNK: usize = 4096;

const HOST_BIT: u32 = 1 << 31;
const POOL_SHIFT: u32 = 29;
const CHUNK_SHIFT: u32 = 16;
const CHUNK_MASK: u32 = 0x1FFF;
const SLOT_MASK: u32 = 0xFFFF;

/// Handle to an arena node. The top bit distinguishes pooled slots from
/// host-side fallback nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn pooled(pool: usize, chunk: usize, slot: usize) -> NodeId {
        NodeId(((pool as u32) << POOL_SHIFT) | ((chunk as u32) << CHUNK_SHIFT) | slot as u32)
    }

    pub(crate) fn host_key(key: u32) -> NodeId {
        NodeId(HOST_BIT | key)
    }

    /// True when the node lives inside an arena chunk.
    pub fn is_pooled(self) -> bool {
        self.0 & HOST_BIT == 0
    }

    fn parts(self) -> (usize, usize, usize) {
        (
            ((self.0 >> POOL_SHIFT) & 0x3) as usize,
            ((self.0 >> CHUNK_SHIFT) & CHUNK_MASK) as usize,
            (self.0 & SLOT_MASK) as usize,
        )
    }

    fn host_part(self) -> u32 {
        self.0 & !HOST_BIT
    }
}

/// Slot state. `Free` doubles as the poisoned marker: reading a freed slot
/// yields nothing and freeing it again is flagged as a double free.
#[derive(Debug, Clone)]
enum Slot {
    Free,
    Used(Node),
}

struct SubPoolInner {
    chunks: Vec<Vec<Slot>>,
    free: Vec<(u32, u32)>,
    next_chunk: usize,
    allocations: u64,
    frees: u64,
    live: u64,
    peak: u64,
    chunk_allocs: u64,
    recycled: u64,
}

impl SubPoolInner {
    fn new() -> Self {
        SubPoolInner {
            chunks: Vec::new(),
            free: Vec::new(),
            next_chunk: INITIAL_CHUNK,
            allocations: 0,
            frees: 0,
            live: 0,
            peak: 0,
            chunk_allocs: 0,
            recycled: 0,
        }
    }

    fn grow(&mut self) {
        let size = self.next_chunk;
        let chunk_idx = self.chunks.len() as u32;
        self.chunks.push(vec![Slot::Free; size]);
        for slot in (0..size as u32).rev() {
            self.free.push((chunk_idx, slot));
        }
        self.next_chunk = (self.next_chunk * 2).min(MAX_CHUNK);
        self.chunk_allocs += 1;
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStats {
    pub allocations: u64,
    pub frees: u64,
    pub current_usage: u64,
    pub peak_usage: u64,
    pub chunk_count: usize,
    pub chunk_allocs: u64,
    /// Share of allocations served from a recycled slot.
    pub hit_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArenaStats {
    pub pools: Vec<PoolStats>,
    pub host_allocations: u64,
    pub host_frees: u64,
    pub double_frees: u64,
    pub live: u64,
}

struct HostNodes {
    map: HashMap<u32, Node>,
    next: u32,
    allocations: u64,
    frees: u64,
}

pub struct NodeArena {
    pools: [Mutex<SubPoolInner>; POOL_COUNT],
    cursor: AtomicUsize,
    enabled: AtomicBool,
    host: Mutex<HostNodes>,
    double_frees: Mutex<DoubleFreeLog>,
}

#[derive(Debug, Clone, Copy, Default)]
struct DoubleFreeLog {
    count: u64,
    last: Option<NodeId>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    /// A disabled arena routes every allocation to the host side.
    pub fn disabled() -> Self {
        Self::with_enabled(false)
    }

    fn with_enabled(enabled: bool) -> Self {
        NodeArena {
            pools: [
                Mutex::new(SubPoolInner::new()),
                Mutex::new(SubPoolInner::new()),
                Mutex::new(SubPoolInner::new()),
            ],
            cursor: AtomicUsize::new(0),
            enabled: AtomicBool::new(enabled),
            host: Mutex::new(HostNodes {
                map: HashMap::new(),
                next: 0,
                allocations: 0,
                frees: 0,
            }),
            double_frees: Mutex::new(DoubleFreeLog::default()),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn alloc_node(&self, node: Node) -> NodeId {
        if !self.is_enabled() {
            return self.alloc_host(node);
        }

        let pool = self.cursor.fetch_add(1, Ordering::Relaxed) % POOL_COUNT;
        let mut inner = self.pools[pool].lock().unwrap();
        let recycled = !inner.free.is_empty();
        if !recycled {
            inner.grow();
        }
        let (chunk, slot) = inner.free.pop().expect("grow always refills the free list");
        inner.chunks[chunk as usize][slot as usize] = Slot::Used(node);
        inner.allocations += 1;
        inner.live += 1;
        if inner.live > inner.peak {
            inner.peak = inner.live;
        }
        if recycled {
            inner.recycled += 1;
        }
        NodeId::pooled(pool, chunk as usize, slot as usize)
    }

    fn alloc_host(&self, node: Node) -> NodeId {
        let mut host = self.host.lock().unwrap();
        let key = host.next;
        host.next = host.next.wrapping_add(1);
        host.map.insert(key, node);
        host.allocations += 1;
        NodeId::host_key(key)
    }

    /// Clone the node out of its slot. Freed or unknown handles yield `None`.
    pub fn get(&self, id: NodeId) -> Option<Node> {
        if !id.is_pooled() {
            return self.host.lock().unwrap().map.get(&id.host_part()).cloned();
        }
        let (pool, chunk, slot) = id.parts();
        let inner = self.pools[pool].lock().unwrap();
        match inner.chunks.get(chunk).and_then(|c| c.get(slot)) {
            Some(Slot::Used(node)) => Some(node.clone()),
            _ => None,
        }
    }

    pub fn free_node(&self, id: NodeId) {
        if !id.is_pooled() {
            let mut host = self.host.lock().unwrap();
            if host.map.remove(&id.host_part()).is_none() {
                drop(host);
                self.note_double_free(id);
            } else {
                host.frees += 1;
            }
            return;
        }

        let (pool, chunk, slot) = id.parts();
        let mut inner = self.pools[pool].lock().unwrap();
        let state = inner.chunks.get_mut(chunk).and_then(|c| c.get_mut(slot));
        match state {
            Some(entry @ Slot::Used(_)) => {
                *entry = Slot::Free;
                inner.free.push((chunk as u32, slot as u32));
                inner.frees += 1;
                inner.live = inner.live.saturating_sub(1);
            }
            _ => {
                drop(inner);
                self.note_double_free(id);
            }
        }
    }

    fn note_double_free(&self, id: NodeId) {
        let mut log = self.double_frees.lock().unwrap();
        log.count += 1;
        log.last = Some(id);
    }

    pub fn double_free_count(&self) -> u64 {
        self.double_frees.lock().unwrap().count
    }

    pub fn live_count(&self) -> u64 {
        let pooled: u64 = self
            .pools
            .iter()
            .map(|p| p.lock().unwrap().live)
            .sum();
        pooled + self.host.lock().unwrap().map.len() as u64
    }

    pub fn stats(&self) -> ArenaStats {
        let pools = self
            .pools
            .iter()
            .map(|p| {
                let inner = p.lock().unwrap();
                PoolStats {
                    allocations: inner.allocations,
                    frees: inner.frees,
                    current_usage: inner.live,
                    peak_usage: inner.peak,
                    chunk_count: inner.chunks.len(),
                    chunk_allocs: inner.chunk_allocs,
                    hit_ratio: if inner.allocations == 0 {
                        0.0
                    } else {
                        inner.recycled as f64 / inner.allocations as f64
                    },
                }
            })
            .collect();
        let (host_allocations, host_frees) = {
            let host = self.host.lock().unwrap();
            (host.allocations, host.frees)
        };
        ArenaStats {
            pools,
            host_allocations,
            host_frees,
            double_frees: self.double_frees.lock().unwrap().count,
            live: self.live_count(),
        }
    }

    /// Teardown: drop whole chunks and reset every pool. Callers must not
    /// hold node handles across this.
    pub fn clear(&self) {
        for pool in &self.pools {
            *pool.lock().unwrap() = SubPoolInner::new();
        }
        let mut host = self.host.lock().unwrap();
        host.map.clear();
        host.next = 0;
        host.allocations = 0;
        host.frees = 0;
        *self.double_frees.lock().unwrap() = DoubleFreeLog::default();
    }
}

impl Default for NodeArena {
    fn default() -> Self {
        Self::new()
    }
}

static DEFAULT_ARENA: Lazy<NodeArena> = Lazy::new(NodeArena::new);

/// Process-wide default instance; prefer passing an explicit arena.
pub fn default_arena() -> &'static NodeArena {
    &DEFAULT_ARENA
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeKind;
    use crate::token::Span;

    fn number(n: f64) -> Node {
        Node::new(NodeKind::Number(n), Span::default())
    }

    #[test]
    fn alloc_then_get_returns_the_node() {
        let arena = NodeArena::new();
        let id = arena.alloc_node(number(42.0));
        let node = arena.get(id).unwrap();
        assert!(matches!(node.kind, NodeKind::Number(n) if n == 42.0));
    }

    #[test]
    fn round_robin_spreads_across_pools() {
        let arena = NodeArena::new();
        for _ in 0..POOL_COUNT {
            arena.alloc_node(number(1.0));
        }
        let stats = arena.stats();
        for pool in &stats.pools {
            assert_eq!(pool.allocations, 1);
        }
    }

    #[test]
    fn freed_slot_reads_as_absent() {
        let arena = NodeArena::new();
        let id = arena.alloc_node(number(7.0));
        arena.free_node(id);
        assert!(arena.get(id).is_none());
    }

    #[test]
    fn freed_slot_is_recycled() {
        let arena = NodeArena::new();
        let first = arena.alloc_node(number(1.0));
        arena.free_node(first);
        // Walk the cursor back around to the same sub-pool.
        for _ in 0..POOL_COUNT - 1 {
            arena.alloc_node(number(0.0));
        }
        let second = arena.alloc_node(number(2.0));
        assert_eq!(first, second, "LIFO free list should hand the slot back");
        let node = arena.get(second).unwrap();
        assert!(matches!(node.kind, NodeKind::Number(n) if n == 2.0));
    }

    #[test]
    fn double_free_is_logged_not_fatal() {
        let arena = NodeArena::new();
        let id = arena.alloc_node(number(3.0));
        arena.free_node(id);
        arena.free_node(id);
        assert_eq!(arena.double_free_count(), 1);
    }

    #[test]
    fn counters_balance_against_live() {
        let arena = NodeArena::new();
        let ids: Vec<_> = (0..10).map(|i| arena.alloc_node(number(i as f64))).collect();
        for id in ids.iter().take(4) {
            arena.free_node(*id);
        }
        let stats = arena.stats();
        let allocations: u64 = stats.pools.iter().map(|p| p.allocations).sum();
        let frees: u64 = stats.pools.iter().map(|p| p.frees).sum();
        assert_eq!(allocations - frees, stats.live);
        for pool in &stats.pools {
            assert!(pool.peak_usage >= pool.current_usage);
        }
    }

    #[test]
    fn chunks_double_up_to_the_cap() {
        let arena = NodeArena::new();
        // Enough allocations to force a second chunk in every sub-pool.
        let count = POOL_COUNT * (INITIAL_CHUNK + 1);
        for i in 0..count {
            arena.alloc_node(number(i as f64));
        }
        let stats = arena.stats();
        for pool in &stats.pools {
            assert!(pool.chunk_count >= 2, "stats: {:?}", pool);
            assert!(pool.chunk_allocs >= 2);
        }
    }

    #[test]
    fn disabled_arena_falls_back_to_host_nodes() {
        let arena = NodeArena::disabled();
        let id = arena.alloc_node(number(9.0));
        assert!(!id.is_pooled());
        assert!(arena.get(id).is_some());
        arena.free_node(id);
        assert!(arena.get(id).is_none());
        let stats = arena.stats();
        assert_eq!(stats.host_allocations, 1);
        assert_eq!(stats.host_frees, 1);
    }

    #[test]
    fn hit_ratio_reflects_recycling() {
        let arena = NodeArena::new();
        let id = arena.alloc_node(number(1.0));
        arena.free_node(id);
        for _ in 0..POOL_COUNT {
            arena.alloc_node(number(2.0));
        }
        let stats = arena.stats();
        let recycled_pool = stats.pools.iter().find(|p| p.hit_ratio > 0.0);
        assert!(recycled_pool.is_some(), "stats: {:?}", stats);
    }

    #[test]
    fn clear_resets_everything() {
        let arena = NodeArena::new();
        for i in 0..20 {
            arena.alloc_node(number(i as f64));
        }
        arena.clear();
        assert_eq!(arena.live_count(), 0);
        let stats = arena.stats();
        for pool in &stats.pools {
            assert_eq!(pool.allocations, 0);
            assert_eq!(pool.chunk_count, 0);
        }
    }
}
