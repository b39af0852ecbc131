//! The arena itself: the public surface tying region reservation, block
//! headers, the free-list index and accounting together into `init` /
//! `alloc` / `free` / `stats` / `validate` / `dump` / `destroy`.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::mem;
use std::ptr::NonNull;

use crate::block::{min_payload_size, BlockHeader, Link};
use crate::error::{ArenaError, Violation};
use crate::region::Region;
use crate::size_class::{class_of, FreeListIndex, NUM_CLASSES};
use crate::stats::Stats;

/// Written into every freshly initialized arena and cleared on destroy;
/// distinguishes a live arena from a torn-down or uninitialized one.
const ARENA_SIGNATURE: u32 = 0xDEAD_BEEF;

/// Upper bound on the number of blocks any single validation or dump walk
/// will visit, so a cyclic or corrupted chain cannot spin forever.
const VALIDATE_BLOCK_CAP: usize = 10_000;

fn round_up(n: u64, align: u64) -> u64 {
    (n + align - 1) / align * align
}

/// A single heap arena: a page-backed region of memory managed with a
/// size-segregated best-fit allocator.
///
/// An `Arena` is not [`Sync`]; sharing one across threads requires the
/// caller to wrap it in their own mutex, the same way the original driver
/// is only ever touched from a single thread at a time. See the crate-level
/// docs for why this crate does not install a [`GlobalAlloc`](std::alloc::GlobalAlloc).
pub struct Arena {
    signature: u32,
    region: Region,
    alignment: usize,
    name: String,
    debug: bool,
    first_block: usize,
    used_bytes: u64,
    peak_used_bytes: u64,
    allocation_count: u64,
    deallocation_count: u64,
    block_count: u64,
    free_list: FreeListIndex,
}

impl Arena {
    /// Reserve `size` bytes from the OS (page-rounded) and carve out a
    /// single free block spanning the whole region, minus one header.
    ///
    /// `alignment` must be a power of two of at least 8; every payload
    /// address handed back by [`Arena::alloc`] is a multiple of it.
    pub fn init(size: usize, alignment: usize, name: impl Into<String>) -> Result<Self, ArenaError> {
        if size == 0 {
            return Err(ArenaError::BadArgument("size must be nonzero".into()));
        }
        if alignment < 8 || !alignment.is_power_of_two() {
            return Err(ArenaError::BadArgument(
                "alignment must be a power of two of at least 8".into(),
            ));
        }

        let region = Region::reserve(size)?;
        let mut arena = Self {
            signature: ARENA_SIGNATURE,
            region,
            alignment,
            name: name.into(),
            debug: false,
            first_block: 0,
            used_bytes: 0,
            peak_used_bytes: 0,
            allocation_count: 0,
            deallocation_count: 0,
            block_count: 1,
            free_list: FreeListIndex::new(),
        };

        let stride = arena.header_stride() as u64;
        let region_len = arena.region.len() as u64;
        if stride >= region_len {
            return Err(ArenaError::BadArgument(
                "region too small to hold a single header".into(),
            ));
        }
        let initial_payload = region_len - stride;

        // SAFETY: offset 0 is within the freshly reserved region.
        *unsafe { arena.region.header_mut(0) } = BlockHeader::new(initial_payload, true);
        arena.freelist_insert(0);

        tracing::info!(name = %arena.name, bytes = region_len, alignment, "arena initialized");
        Ok(arena)
    }

    /// The arena's name, as given to [`Arena::init`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether verbose per-operation debug logging is enabled.
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Toggle verbose per-operation debug logging (emitted via `tracing`,
    /// at `debug` level, gated on this flag the same way the CLI's `-d`
    /// flag gates the original driver's fprintf-to-stderr trace).
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// `size_of::<BlockHeader>()` rounded up to this arena's alignment:
    /// the fixed stride from a block's offset to its payload's offset.
    pub fn header_stride(&self) -> usize {
        round_up(BlockHeader::RAW_SIZE as u64, self.alignment as u64) as usize
    }

    fn header(&self, offset: usize) -> &BlockHeader {
        // SAFETY: every offset passed here was either 0 (checked against the
        // region at init) or obtained from a `Link` written by this module.
        unsafe { self.region.header(offset) }
    }

    fn header_mut(&mut self, offset: usize) -> &mut BlockHeader {
        // SAFETY: see `header`.
        unsafe { self.region.header_mut(offset) }
    }

    /// Allocate `n` bytes, rounded up to this arena's alignment, from the
    /// best-fitting free block available.
    pub fn alloc(&mut self, n: usize) -> Result<NonNull<u8>, ArenaError> {
        if n == 0 {
            return Err(ArenaError::BadArgument("alloc size must be nonzero".into()));
        }
        let needed = round_up(n as u64, self.alignment as u64);
        let stride = self.header_stride() as u64;
        let region_len = self.region.len() as u64;

        if needed > region_len.saturating_sub(self.used_bytes) {
            return Err(ArenaError::OutOfMemory {
                requested: needed as usize,
                fragmented: false,
            });
        }

        let found = self.find_best_fit(needed);
        let (offset, entry_size) = found.ok_or(ArenaError::OutOfMemory {
            requested: needed as usize,
            fragmented: true,
        })?;

        self.freelist_remove(offset);

        let min_payload = min_payload_size(self.alignment) as u64;
        let remaining = entry_size - needed;
        if remaining >= stride + min_payload {
            self.split_block(offset, needed, stride);
        }

        let actual_payload = {
            let header = self.header_mut(offset);
            header.set_free(false);
            header.payload_size
        };

        self.allocation_count += 1;
        self.used_bytes += actual_payload;
        if self.used_bytes > self.peak_used_bytes {
            self.peak_used_bytes = self.used_bytes;
        }

        if self.debug {
            tracing::debug!(name = %self.name, offset, bytes = actual_payload, "alloc");
        }

        let ptr = self.region.byte_ptr(offset + self.header_stride());
        Ok(NonNull::new(ptr).expect("region pointer is never null"))
    }

    /// Scan buckets from `class_of(needed)` upward; within the first
    /// bucket containing any satisfying block, keep the smallest one seen,
    /// short-circuiting on an exact match.
    fn find_best_fit(&self, needed: u64) -> Option<(usize, u64)> {
        let start_class = class_of(needed);
        for class in start_class..NUM_CLASSES {
            let mut cursor = self.free_list.bucket(class).head.get();
            let mut best: Option<(usize, u64)> = None;
            while let Some(offset) = cursor {
                let header = self.header(offset);
                let size = header.payload_size;
                let next = header.freelist_next.get();
                if size >= needed {
                    let better = match best {
                        None => true,
                        Some((_, best_size)) => size < best_size,
                    };
                    if better {
                        best = Some((offset, size));
                    }
                    if size == needed {
                        break;
                    }
                }
                cursor = next;
            }
            if best.is_some() {
                return best;
            }
        }
        None
    }

    /// Split the block at `offset`, keeping `needed` bytes of payload for
    /// it and carving a new free block out of the remainder.
    fn split_block(&mut self, offset: usize, needed: u64, stride: u64) {
        let old_next = self.header(offset).physical_next;
        let new_offset = offset + stride as usize + needed as usize;
        let new_payload = self.header(offset).payload_size - needed - stride;

        {
            let new_header = self.header_mut(new_offset);
            *new_header = BlockHeader::new(new_payload, true);
            new_header.physical_prev = Link::some(offset);
            new_header.physical_next = old_next;
        }
        if let Some(next_off) = old_next.get() {
            self.header_mut(next_off).physical_prev = Link::some(new_offset);
        }
        {
            let header = self.header_mut(offset);
            header.payload_size = needed;
            header.physical_next = Link::some(new_offset);
        }

        self.block_count += 1;
        self.freelist_insert(new_offset);
        if self.debug {
            tracing::debug!(name = %self.name, offset, new_offset, new_payload, "split block");
        }
    }

    /// Return a previously allocated block to the arena, coalescing with
    /// any free physical neighbors.
    ///
    /// A null pointer is accepted and treated as a no-op, matching `free`'s
    /// usual C convention.
    pub fn free(&mut self, ptr: *mut u8) -> Result<(), ArenaError> {
        if ptr.is_null() {
            return Ok(());
        }

        let stride = self.header_stride();
        let addr_offset = self
            .region
            .offset_of(ptr as *const u8)
            .ok_or_else(|| ArenaError::Corruption("pointer is not within this arena".into()))?;
        if addr_offset < stride {
            return Err(ArenaError::Corruption(
                "pointer precedes the first possible payload".into(),
            ));
        }
        let offset = addr_offset - stride;

        {
            let header = self.header(offset);
            if !header.signatures_valid() {
                return Err(ArenaError::Corruption(format!(
                    "invalid header signature at offset {offset}"
                )));
            }
            if header.is_free() {
                return Err(ArenaError::DoubleFree);
            }
        }

        let freed_size = self.header(offset).payload_size;
        self.used_bytes -= freed_size;
        self.deallocation_count += 1;
        self.header_mut(offset).set_free(true);

        if self.debug {
            tracing::debug!(name = %self.name, offset, bytes = freed_size, "free");
        }

        let mut block = offset;

        while let Some(next_off) = self.header(block).physical_next.get() {
            if !self.header(next_off).is_free() {
                break;
            }
            self.freelist_remove(next_off);
            let (next_payload, next_next) = {
                let h = self.header(next_off);
                (h.payload_size, h.physical_next)
            };
            {
                let h = self.header_mut(block);
                h.payload_size += stride as u64 + next_payload;
                h.physical_next = next_next;
            }
            if let Some(nn) = next_next.get() {
                self.header_mut(nn).physical_prev = Link::some(block);
            }
            self.block_count -= 1;
        }

        while let Some(prev_off) = self.header(block).physical_prev.get() {
            if !self.header(prev_off).is_free() {
                break;
            }
            self.freelist_remove(prev_off);
            let cur_payload = self.header(block).payload_size;
            let cur_next = self.header(block).physical_next;
            {
                let h = self.header_mut(prev_off);
                h.payload_size += stride as u64 + cur_payload;
                h.physical_next = cur_next;
            }
            if let Some(nn) = cur_next.get() {
                self.header_mut(nn).physical_prev = Link::some(prev_off);
            }
            self.block_count -= 1;
            block = prev_off;
        }

        self.freelist_insert(block);
        Ok(())
    }

    fn freelist_insert(&mut self, offset: usize) {
        let size = self.header(offset).payload_size;
        let bucket_idx = class_of(size);
        let old_head = self.free_list.bucket(bucket_idx).head;
        {
            let header = self.header_mut(offset);
            header.freelist_prev = Link::NONE;
            header.freelist_next = old_head;
        }
        if let Some(oh) = old_head.get() {
            self.header_mut(oh).freelist_prev = Link::some(offset);
        }
        let bucket = self.free_list.bucket_mut(bucket_idx);
        bucket.head = Link::some(offset);
        bucket.count += 1;
    }

    fn freelist_remove(&mut self, offset: usize) {
        let (bucket_idx, prev, next) = {
            let header = self.header(offset);
            (class_of(header.payload_size), header.freelist_prev, header.freelist_next)
        };
        match prev.get() {
            Some(p) => self.header_mut(p).freelist_next = next,
            None => self.free_list.bucket_mut(bucket_idx).head = next,
        }
        if let Some(n) = next.get() {
            self.header_mut(n).freelist_prev = prev;
        }
        self.free_list.bucket_mut(bucket_idx).count -= 1;
        let header = self.header_mut(offset);
        header.freelist_prev = Link::NONE;
        header.freelist_next = Link::NONE;
    }

    /// Walk the physical chain from the first block, bounded by
    /// [`VALIDATE_BLOCK_CAP`].
    fn block_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::new();
        let mut cursor = Some(self.first_block);
        while let Some(offset) = cursor {
            offsets.push(offset);
            if offsets.len() > VALIDATE_BLOCK_CAP {
                break;
            }
            cursor = self.header(offset).physical_next.get();
        }
        offsets
    }

    /// A point-in-time snapshot of this arena's accounting, including the
    /// derived fields that require walking the free-list index.
    pub fn stats(&self) -> Stats {
        let mut free_counts = [0u32; NUM_CLASSES];
        let mut largest = 0u64;
        for (index, bucket) in self.free_list.iter() {
            free_counts[index] = bucket.count;
            let mut cursor = bucket.head.get();
            while let Some(offset) = cursor {
                let header = self.header(offset);
                largest = largest.max(header.payload_size);
                cursor = header.freelist_next.get();
            }
        }

        let stride = self.header_stride() as u64;
        let region_len = self.region.len();
        let fragmentation_ratio_percent = if region_len == 0 {
            0
        } else {
            self.block_count * stride * 100 / region_len as u64
        };

        Stats {
            region_bytes: region_len as u64,
            used_bytes: self.used_bytes,
            peak_used_bytes: self.peak_used_bytes,
            allocation_count: self.allocation_count,
            deallocation_count: self.deallocation_count,
            block_count: self.block_count,
            free_counts,
            largest_free_block: largest,
            fragmentation_ratio_percent,
        }
    }

    /// Walk the physical chain and every free-list bucket, checking the
    /// universal invariants, and report the first violation found (if
    /// any). Bounded to [`VALIDATE_BLOCK_CAP`] blocks per walk.
    pub fn validate(&self) -> Result<(), Violation> {
        if self.signature != ARENA_SIGNATURE {
            return Err(Violation::ArenaSignature);
        }

        let stride = self.header_stride() as u64;
        let region_len = self.region.len() as u64;

        let mut visited = HashSet::new();
        let mut computed_used = 0u64;
        let mut count = 0usize;
        let mut cursor = Some(self.first_block);
        let mut prev_free: Option<usize> = None;

        while let Some(offset) = cursor {
            count += 1;
            if count > VALIDATE_BLOCK_CAP {
                return Err(Violation::TooManyBlocks { limit: VALIDATE_BLOCK_CAP });
            }
            let header = self.header(offset);
            if !header.signatures_valid() {
                return Err(if header.payload_size == 0 {
                    Violation::ZeroSizedBlock { offset }
                } else {
                    Violation::HeaderCorrupt { offset }
                });
            }

            let next = header.physical_next.get();
            let expected_next_addr = offset as u64 + stride + header.payload_size;
            let actual_next_addr = next.map(|n| n as u64).unwrap_or(region_len);
            if expected_next_addr != actual_next_addr {
                return Err(Violation::ChainAddressMismatch { offset });
            }

            if header.is_free() {
                if let Some(prev_offset) = prev_free {
                    return Err(Violation::AdjacentFreeBlocks { first: prev_offset, second: offset });
                }
                prev_free = Some(offset);
            } else {
                computed_used += header.payload_size;
                prev_free = None;
            }

            visited.insert(offset);
            cursor = next;
        }

        for (bucket_idx, bucket) in self.free_list.iter() {
            let mut cursor = bucket.head.get();
            let mut counted = 0u32;
            while let Some(offset) = cursor {
                counted += 1;
                if counted as usize > VALIDATE_BLOCK_CAP {
                    return Err(Violation::TooManyBlocks { limit: VALIDATE_BLOCK_CAP });
                }
                let header = self.header(offset);
                if !header.is_free() || !visited.contains(&offset) {
                    return Err(Violation::DanglingFreeListEntry { offset, bucket: bucket_idx });
                }
                let actual_bucket = class_of(header.payload_size);
                if actual_bucket != bucket_idx {
                    return Err(Violation::WrongBucket {
                        offset,
                        bucket: bucket_idx,
                        expected: actual_bucket,
                    });
                }
                cursor = header.freelist_next.get();
            }
            if counted != bucket.count {
                return Err(Violation::BucketCountMismatch {
                    bucket: bucket_idx,
                    tracked: bucket.count,
                    counted,
                });
            }
        }

        if computed_used != self.used_bytes {
            return Err(Violation::UsedBytesMismatch {
                tracked: self.used_bytes,
                computed: computed_used,
            });
        }

        Ok(())
    }

    /// A human-readable, one-line-per-block layout report, in physical
    /// order, for debugging (the `layout` CLI command and the original
    /// driver's `display_memory_layout`).
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for offset in self.block_offsets() {
            let header = self.header(offset);
            let _ = writeln!(
                out,
                "{:#010x}  {:>10} bytes  {}",
                self.region.base_addr() + offset,
                header.payload_size,
                if header.is_free() { "free" } else { "used" }
            );
        }
        out
    }

    fn teardown(&mut self) {
        if self.signature != ARENA_SIGNATURE {
            return;
        }
        if self.allocation_count != self.deallocation_count {
            tracing::warn!(
                name = %self.name,
                allocations = self.allocation_count,
                deallocations = self.deallocation_count,
                "arena destroyed with outstanding allocations"
            );
        }
        tracing::info!(name = %self.name, "arena destroyed");
        self.signature = 0;
    }

    /// Consume and tear down the arena, releasing its region back to the
    /// OS. Equivalent to letting it go out of scope, spelled out for
    /// callers who want the teardown to be visible at the call site.
    pub fn destroy(mut self) {
        self.teardown();
    }

    /// Allocate space for one `T`, write `value` into it, and return an
    /// owning typed pointer. A thin convenience layered on the untyped
    /// byte API.
    ///
    /// # Safety
    /// The caller must eventually pass the returned pointer to
    /// [`Arena::dealloc_value`] exactly once, and must not otherwise alias
    /// or outlive the arena with it.
    pub unsafe fn alloc_value<T>(&mut self, value: T) -> Result<NonNull<T>, ArenaError> {
        let ptr = self.alloc(mem::size_of::<T>().max(1))?.cast::<T>();
        ptr.as_ptr().write(value);
        Ok(ptr)
    }

    /// Drop the pointee and return its storage to the arena.
    ///
    /// # Safety
    /// `ptr` must have come from [`Arena::alloc_value`] on this same
    /// arena and must not have already been passed here or to
    /// [`Arena::free`].
    pub unsafe fn dealloc_value<T>(&mut self, ptr: NonNull<T>) -> Result<(), ArenaError> {
        ptr.as_ptr().drop_in_place();
        self.free(ptr.as_ptr().cast())
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_arena() -> Arena {
        Arena::init(64 * 1024, 8, "test").unwrap()
    }

    #[test]
    fn init_rejects_bad_arguments() {
        assert!(Arena::init(0, 8, "x").is_err());
        assert!(Arena::init(4096, 7, "x").is_err());
        assert!(Arena::init(4096, 0, "x").is_err());
    }

    #[test]
    fn alloc_then_free_round_trips() {
        let mut arena = small_arena();
        let ptr = arena.alloc(128).unwrap();
        assert!(arena.validate().is_ok());
        arena.free(ptr.as_ptr()).unwrap();
        assert!(arena.validate().is_ok());
        assert_eq!(arena.stats().used_bytes, 0);
    }

    #[test]
    fn double_free_is_detected() {
        let mut arena = small_arena();
        let ptr = arena.alloc(64).unwrap();
        arena.free(ptr.as_ptr()).unwrap();
        let err = arena.free(ptr.as_ptr()).unwrap_err();
        assert!(matches!(err, ArenaError::DoubleFree));
    }

    #[test]
    fn foreign_pointer_is_rejected() {
        let mut arena = small_arena();
        let mut local = 0u8;
        let err = arena.free(&mut local as *mut u8).unwrap_err();
        assert!(matches!(err, ArenaError::Corruption(_)));
    }

    #[test]
    fn coalesces_adjacent_free_neighbors() {
        let mut arena = small_arena();
        let a = arena.alloc(64).unwrap();
        let b = arena.alloc(64).unwrap();
        let c = arena.alloc(64).unwrap();
        arena.free(b.as_ptr()).unwrap();
        arena.free(a.as_ptr()).unwrap();
        arena.free(c.as_ptr()).unwrap();
        assert!(arena.validate().is_ok());
        assert_eq!(arena.stats().block_count, 1);
    }

    #[test]
    fn out_of_memory_is_reported_cleanly() {
        let mut arena = Arena::init(4096, 8, "tiny").unwrap();
        let err = arena.alloc(1 << 20).unwrap_err();
        assert!(matches!(err, ArenaError::OutOfMemory { .. }));
    }

    #[test]
    fn allocations_are_aligned() {
        let mut arena = Arena::init(64 * 1024, 64, "aligned").unwrap();
        for n in [1usize, 7, 63, 64, 65, 200] {
            let ptr = arena.alloc(n).unwrap();
            assert_eq!(ptr.as_ptr() as usize % 64, 0);
        }
    }

    #[test]
    fn typed_helpers_round_trip() {
        let mut arena = small_arena();
        unsafe {
            let ptr = arena.alloc_value(42u64).unwrap();
            assert_eq!(*ptr.as_ptr(), 42);
            arena.dealloc_value(ptr).unwrap();
        }
        assert_eq!(arena.stats().used_bytes, 0);
    }

    #[test]
    fn destroy_on_dirty_arena_does_not_panic() {
        let mut arena = small_arena();
        let _leaked = arena.alloc(16).unwrap();
        arena.destroy();
    }
}
