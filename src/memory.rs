//! Allocation surface shared by the interpreter core.
//!
//! `TrackedAllocator` wraps the host allocator with byte accounting,
//! optional per-pointer tracking for leak reports, size-class free-list
//! pools, and configurable limits. It is an explicit context object; a
//! process-wide default instance exists for convenience only.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;
use std::panic::Location;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use serde::Serialize;

/// All blocks share one alignment so allocate/release layouts always agree.
const BLOCK_ALIGN: usize = 16;

/// Free-list depth preallocated per size class at construction.
const PREALLOC_PER_CLASS: usize = 8;

pub type LowMemoryHook = Box<dyn Fn(usize) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AllocStats {
    pub bytes_in_use: usize,
    pub peak_bytes: usize,
    pub allocations: u64,
    pub frees: u64,
    pub pool_hits: u64,
    pub pool_misses: u64,
    /// live-bytes / reserved-bytes, mapped to 0..=100.
    pub fragmentation: u8,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolClassStats {
    pub object_size: usize,
    pub allocations: u64,
    pub frees: u64,
    pub current_free: usize,
    pub capacity: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeakRecord {
    pub address: usize,
    pub size: usize,
    pub file: String,
    pub line: u32,
    pub age_micros: u128,
}

struct AllocRecord {
    size: usize,
    location: &'static Location<'static>,
    at: Duration,
}

struct SizeClass {
    size: usize,
    free: Vec<usize>,
    allocations: u64,
    frees: u64,
    created: u64,
}

#[derive(Default)]
struct Counters {
    bytes_in_use: usize,
    peak_bytes: usize,
    allocations: u64,
    frees: u64,
    pool_hits: u64,
    pool_misses: u64,
}

struct AllocState {
    classes: Vec<SizeClass>,
    counters: Counters,
    tracking: Option<HashMap<usize, AllocRecord>>,
}

pub struct TrackedAllocator {
    state: Mutex<AllocState>,
    max_total: Option<usize>,
    max_single: Option<usize>,
    low_memory: Mutex<Option<(usize, LowMemoryHook)>>,
    epoch: Instant,
}

fn block_layout(size: usize) -> Option<Layout> {
    Layout::from_size_align(size.max(1), BLOCK_ALIGN).ok()
}

impl TrackedAllocator {
    pub fn new() -> Self {
        Self::with_pools(&[])
    }

    /// Build an allocator with free-list pools for the given class sizes.
    /// Each class is preallocated so early small allocations hit the pool.
    pub fn with_pools(sizes: &[usize]) -> Self {
        let mut class_sizes: Vec<usize> = sizes.iter().copied().filter(|&s| s > 0).collect();
        class_sizes.sort_unstable();
        class_sizes.dedup();

        let mut classes = Vec::with_capacity(class_sizes.len());
        for size in class_sizes {
            let mut free = Vec::with_capacity(PREALLOC_PER_CLASS);
            let mut created = 0;
            if let Some(layout) = block_layout(size) {
                for _ in 0..PREALLOC_PER_CLASS {
                    // SAFETY: layout has non-zero size and valid alignment.
                    let ptr = unsafe { alloc_zeroed(layout) };
                    if ptr.is_null() {
                        break;
                    }
                    free.push(ptr as usize);
                    created += 1;
                }
            }
            classes.push(SizeClass {
                size,
                free,
                allocations: 0,
                frees: 0,
                created,
            });
        }

        TrackedAllocator {
            state: Mutex::new(AllocState {
                classes,
                counters: Counters::default(),
                tracking: None,
            }),
            max_total: None,
            max_single: None,
            low_memory: Mutex::new(None),
            epoch: Instant::now(),
        }
    }

    pub fn set_max_total(&mut self, limit: Option<usize>) {
        self.max_total = limit;
    }

    pub fn set_max_single(&mut self, limit: Option<usize>) {
        self.max_single = limit;
    }

    /// Register a hook called with the remaining budget whenever live bytes
    /// rise above `threshold`.
    pub fn set_low_memory_hook(&self, threshold: usize, hook: LowMemoryHook) {
        *self.low_memory.lock().unwrap() = Some((threshold, hook));
    }

    pub fn enable_tracking(&self, enabled: bool) {
        let mut state = self.state.lock().unwrap();
        state.tracking = if enabled { Some(HashMap::new()) } else { None };
    }

    fn class_index(classes: &[SizeClass], size: usize) -> Option<usize> {
        classes.iter().position(|c| c.size >= size)
    }

    /// Allocate a zero-initialized block of at least `size` bytes.
    /// Zero-byte requests and limit violations yield `None`.
    #[track_caller]
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let location = Location::caller();
        self.allocate_at(size, location)
    }

    fn allocate_at(
        &self,
        size: usize,
        location: &'static Location<'static>,
    ) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        if let Some(max) = self.max_single {
            if size > max {
                return None;
            }
        }

        let mut hook_budget: Option<usize> = None;
        let ptr = {
            let mut state = self.state.lock().unwrap();
            let class = Self::class_index(&state.classes, size);
            let block_size = class.map(|i| state.classes[i].size).unwrap_or(size);

            if let Some(max) = self.max_total {
                if state.counters.bytes_in_use + block_size > max {
                    return None;
                }
            }

            let addr = match class {
                Some(i) => {
                    let reused = state.classes[i].free.pop();
                    match reused {
                        Some(addr) => {
                            // SAFETY: addr came from alloc_zeroed with this
                            // class's layout and has not been handed out since
                            // it was returned to the free list.
                            unsafe {
                                std::ptr::write_bytes(addr as *mut u8, 0, block_size);
                            }
                            state.counters.pool_hits += 1;
                            state.classes[i].allocations += 1;
                            addr
                        }
                        None => {
                            let layout = block_layout(block_size)?;
                            // SAFETY: layout has non-zero size and valid alignment.
                            let raw = unsafe { alloc_zeroed(layout) };
                            if raw.is_null() {
                                return None;
                            }
                            state.counters.pool_misses += 1;
                            state.classes[i].allocations += 1;
                            state.classes[i].created += 1;
                            raw as usize
                        }
                    }
                }
                None => {
                    let layout = block_layout(block_size)?;
                    // SAFETY: layout has non-zero size and valid alignment.
                    let raw = unsafe { alloc_zeroed(layout) };
                    if raw.is_null() {
                        return None;
                    }
                    state.counters.pool_misses += 1;
                    raw as usize
                }
            };

            state.counters.allocations += 1;
            state.counters.bytes_in_use += block_size;
            if state.counters.bytes_in_use > state.counters.peak_bytes {
                state.counters.peak_bytes = state.counters.bytes_in_use;
            }

            let live = state.counters.bytes_in_use;
            if let Some((threshold, _)) = self.low_memory.lock().unwrap().as_ref() {
                if live > *threshold {
                    hook_budget =
                        Some(self.max_total.map(|m| m.saturating_sub(live)).unwrap_or(0));
                }
            }

            let at = self.epoch.elapsed();
            if let Some(table) = state.tracking.as_mut() {
                table.insert(addr, AllocRecord { size, location, at });
            }

            addr as *mut u8
        };

        if let Some(budget) = hook_budget {
            if let Some((_, hook)) = self.low_memory.lock().unwrap().as_ref() {
                hook(budget);
            }
        }

        NonNull::new(ptr)
    }

    /// Release a block previously produced by `allocate`/`resize`/`duplicate`
    /// with the same request size.
    pub fn release(&self, ptr: NonNull<u8>, size: usize) {
        let mut state = self.state.lock().unwrap();
        let addr = ptr.as_ptr() as usize;
        if let Some(table) = state.tracking.as_mut() {
            table.remove(&addr);
        }

        let class = Self::class_index(&state.classes, size);
        let block_size = class.map(|i| state.classes[i].size).unwrap_or(size);

        match class {
            Some(i) => {
                state.classes[i].free.push(addr);
                state.classes[i].frees += 1;
            }
            None => {
                if let Some(layout) = block_layout(block_size) {
                    // SAFETY: the block was produced by alloc_zeroed with the
                    // same (size, BLOCK_ALIGN) layout mapping.
                    unsafe { dealloc(ptr.as_ptr(), layout) };
                }
            }
        }

        state.counters.frees += 1;
        state.counters.bytes_in_use = state.counters.bytes_in_use.saturating_sub(block_size);
    }

    /// Resize semantics: absent pointer behaves like `allocate`, zero size
    /// behaves like `release`, otherwise the initial bytes are preserved.
    #[track_caller]
    pub fn resize(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let location = Location::caller();
        let old = match ptr {
            None => return self.allocate_at(new_size, location),
            Some(p) => p,
        };
        if new_size == 0 {
            self.release(old, old_size);
            return None;
        }
        let fresh = self.allocate_at(new_size, location)?;
        // SAFETY: both blocks are live, distinct, and at least
        // min(old_size, new_size) bytes long.
        unsafe {
            std::ptr::copy_nonoverlapping(
                old.as_ptr(),
                fresh.as_ptr(),
                old_size.min(new_size),
            );
        }
        self.release(old, old_size);
        Some(fresh)
    }

    /// Copy a string payload into a fresh NUL-terminated block of
    /// `s.len() + 1` bytes (release with that size).
    #[track_caller]
    pub fn duplicate(&self, s: &str) -> Option<NonNull<u8>> {
        let location = Location::caller();
        let block = self.allocate_at(s.len() + 1, location)?;
        // SAFETY: the block holds len + 1 zeroed bytes; copying len bytes
        // leaves the terminator intact.
        unsafe {
            std::ptr::copy_nonoverlapping(s.as_ptr(), block.as_ptr(), s.len());
        }
        Some(block)
    }

    pub fn live_bytes(&self) -> usize {
        self.state.lock().unwrap().counters.bytes_in_use
    }

    pub fn stats(&self) -> AllocStats {
        let state = self.state.lock().unwrap();
        let live = state.counters.bytes_in_use;
        let reserved = live
            + state
                .classes
                .iter()
                .map(|c| c.free.len() * c.size)
                .sum::<usize>();
        let fragmentation = if reserved == 0 {
            0
        } else {
            ((live * 100) / reserved) as u8
        };
        AllocStats {
            bytes_in_use: live,
            peak_bytes: state.counters.peak_bytes,
            allocations: state.counters.allocations,
            frees: state.counters.frees,
            pool_hits: state.counters.pool_hits,
            pool_misses: state.counters.pool_misses,
            fragmentation,
        }
    }

    pub fn pool_stats(&self) -> Vec<PoolClassStats> {
        let state = self.state.lock().unwrap();
        state
            .classes
            .iter()
            .map(|c| PoolClassStats {
                object_size: c.size,
                allocations: c.allocations,
                frees: c.frees,
                current_free: c.free.len(),
                capacity: c.created,
            })
            .collect()
    }

    /// Enumerate still-live tracked allocations. Empty when tracking is off.
    pub fn leak_report(&self) -> Vec<LeakRecord> {
        let state = self.state.lock().unwrap();
        let mut leaks: Vec<LeakRecord> = state
            .tracking
            .iter()
            .flat_map(|table| table.iter())
            .map(|(&address, record)| LeakRecord {
                address,
                size: record.size,
                file: record.location.file().to_string(),
                line: record.location.line(),
                age_micros: record.at.as_micros(),
            })
            .collect();
        leaks.sort_by_key(|l| l.address);
        leaks
    }
}

impl Default for TrackedAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TrackedAllocator {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap();
        for class in &mut state.classes {
            if let Some(layout) = block_layout(class.size) {
                for addr in class.free.drain(..) {
                    // SAFETY: free-list blocks were produced by alloc_zeroed
                    // with this class's layout and are not referenced anywhere.
                    unsafe { dealloc(addr as *mut u8, layout) };
                }
            }
        }
    }
}

static DEFAULT_ALLOCATOR: Lazy<TrackedAllocator> = Lazy::new(TrackedAllocator::new);

/// Process-wide default instance; prefer passing an explicit allocator.
pub fn default_allocator() -> &'static TrackedAllocator {
    &DEFAULT_ALLOCATOR
}

/// Atomic reference-count cell.
#[derive(Debug, Default)]
pub struct RefCount(AtomicUsize);

impl RefCount {
    pub fn new(initial: usize) -> Self {
        RefCount(AtomicUsize::new(initial))
    }

    /// Increment and return the new count.
    pub fn inc(&self) -> usize {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement and return the new count; a cell already at zero stays there.
    pub fn dec(&self) -> usize {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return 0;
            }
            match self.0.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current - 1,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

/// Decrement through an optional cell handle; absent cells read as zero.
pub fn ref_dec(cell: Option<&RefCount>) -> usize {
    cell.map_or(0, |c| c.dec())
}

pub fn ref_inc(cell: Option<&RefCount>) -> usize {
    cell.map_or(0, |c| c.inc())
}

pub fn ref_get(cell: Option<&RefCount>) -> usize {
    cell.map_or(0, |c| c.get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn zero_size_allocation_is_refused() {
        let alloc = TrackedAllocator::new();
        assert!(alloc.allocate(0).is_none());
    }

    #[test]
    fn allocations_are_zero_initialized() {
        let alloc = TrackedAllocator::new();
        let block = alloc.allocate(64).unwrap();
        // SAFETY: block is a live 64-byte allocation.
        let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
        alloc.release(block, 64);
    }

    #[test]
    fn pool_reuse_counts_a_hit() {
        let alloc = TrackedAllocator::with_pools(&[32, 128]);
        let a = alloc.allocate(20).unwrap();
        alloc.release(a, 20);
        let b = alloc.allocate(24).unwrap();
        alloc.release(b, 24);
        let stats = alloc.stats();
        assert!(stats.pool_hits >= 2, "stats: {:?}", stats);
    }

    #[test]
    fn oversized_request_misses_the_pools() {
        let alloc = TrackedAllocator::with_pools(&[32]);
        let big = alloc.allocate(4096).unwrap();
        let stats = alloc.stats();
        assert_eq!(stats.pool_misses, 1);
        alloc.release(big, 4096);
    }

    #[test]
    fn released_pool_block_is_rezeroed_on_reuse() {
        let alloc = TrackedAllocator::with_pools(&[16]);
        let a = alloc.allocate(16).unwrap();
        // SAFETY: a is a live 16-byte allocation.
        unsafe { std::ptr::write_bytes(a.as_ptr(), 0xAB, 16) };
        alloc.release(a, 16);
        let b = alloc.allocate(16).unwrap();
        // SAFETY: b is a live 16-byte allocation.
        let bytes = unsafe { std::slice::from_raw_parts(b.as_ptr(), 16) };
        assert!(bytes.iter().all(|&x| x == 0));
        alloc.release(b, 16);
    }

    #[test]
    fn max_single_limit_rejects_large_requests() {
        let mut alloc = TrackedAllocator::new();
        alloc.set_max_single(Some(100));
        assert!(alloc.allocate(101).is_none());
        let ok = alloc.allocate(100).unwrap();
        alloc.release(ok, 100);
    }

    #[test]
    fn max_total_limit_tracks_live_bytes() {
        let mut alloc = TrackedAllocator::new();
        alloc.set_max_total(Some(256));
        let a = alloc.allocate(200).unwrap();
        assert!(alloc.allocate(200).is_none());
        alloc.release(a, 200);
        let b = alloc.allocate(200).unwrap();
        alloc.release(b, 200);
    }

    #[test]
    fn low_memory_hook_fires_above_threshold() {
        let alloc = TrackedAllocator::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        alloc.set_low_memory_hook(
            100,
            Box::new(move |_budget| {
                flag.store(true, Ordering::SeqCst);
            }),
        );
        let small = alloc.allocate(50).unwrap();
        assert!(!fired.load(Ordering::SeqCst));
        let big = alloc.allocate(200).unwrap();
        assert!(fired.load(Ordering::SeqCst));
        alloc.release(small, 50);
        alloc.release(big, 200);
    }

    #[test]
    fn resize_preserves_initial_bytes() {
        let alloc = TrackedAllocator::new();
        let a = alloc.allocate(8).unwrap();
        // SAFETY: a is a live 8-byte allocation.
        unsafe {
            for i in 0..8 {
                *a.as_ptr().add(i) = i as u8;
            }
        }
        let b = alloc.resize(Some(a), 8, 32).unwrap();
        // SAFETY: b is a live 32-byte allocation.
        let bytes = unsafe { std::slice::from_raw_parts(b.as_ptr(), 32) };
        assert_eq!(&bytes[..8], &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert!(bytes[8..].iter().all(|&x| x == 0));
        alloc.release(b, 32);
    }

    #[test]
    fn resize_of_absent_pointer_allocates() {
        let alloc = TrackedAllocator::new();
        let a = alloc.resize(None, 0, 16).unwrap();
        alloc.release(a, 16);
    }

    #[test]
    fn resize_to_zero_releases() {
        let alloc = TrackedAllocator::new();
        let a = alloc.allocate(16).unwrap();
        assert!(alloc.resize(Some(a), 16, 0).is_none());
        assert_eq!(alloc.stats().allocations, alloc.stats().frees);
    }

    #[test]
    fn duplicate_copies_and_terminates() {
        let alloc = TrackedAllocator::new();
        let copy = alloc.duplicate("timeout").unwrap();
        // SAFETY: copy is a live 8-byte allocation ("timeout" + NUL).
        let bytes = unsafe { std::slice::from_raw_parts(copy.as_ptr(), 8) };
        assert_eq!(&bytes[..7], b"timeout");
        assert_eq!(bytes[7], 0);
        alloc.release(copy, 8);
    }

    #[test]
    fn leak_report_lists_live_blocks() {
        let alloc = TrackedAllocator::new();
        alloc.enable_tracking(true);
        let kept = alloc.allocate(40).unwrap();
        let freed = alloc.allocate(24).unwrap();
        alloc.release(freed, 24);
        let leaks = alloc.leak_report();
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].size, 40);
        assert!(leaks[0].file.contains("memory.rs"));
        alloc.release(kept, 40);
        assert!(alloc.leak_report().is_empty());
    }

    #[test]
    fn stats_balance_after_churn() {
        let alloc = TrackedAllocator::with_pools(&[64]);
        let blocks: Vec<_> = (0..10).map(|_| alloc.allocate(48).unwrap()).collect();
        for b in blocks {
            alloc.release(b, 48);
        }
        let stats = alloc.stats();
        assert_eq!(stats.allocations, stats.frees);
        assert_eq!(stats.bytes_in_use, 0);
        assert!(stats.peak_bytes >= 10 * 64);
    }

    #[test]
    fn refcount_inc_dec_roundtrip() {
        let cell = RefCount::new(1);
        assert_eq!(cell.inc(), 2);
        assert_eq!(cell.get(), 2);
        assert_eq!(cell.dec(), 1);
        assert_eq!(cell.dec(), 0);
        assert_eq!(cell.dec(), 0, "count saturates at zero");
    }

    #[test]
    fn refcount_helpers_treat_absent_cell_as_zero() {
        assert_eq!(ref_inc(None), 0);
        assert_eq!(ref_dec(None), 0);
        assert_eq!(ref_get(None), 0);
        let cell = RefCount::new(3);
        assert_eq!(ref_dec(Some(&cell)), 2);
    }
}
