//! The error taxonomy for the arena.
//!
//! Every fallible operation on [`Arena`](crate::Arena) returns a
//! [`Result`](std::result::Result) with one of the variants below. The
//! allocator never panics or aborts in response to caller-supplied input;
//! the only panics left in the core are `debug_assert!`-style checks that
//! would indicate a bug in the allocator itself, not misuse by a caller.

use std::io;

/// Failure reported by an [`Arena`](crate::Arena) operation.
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    /// The caller passed a zero size, a non-power-of-two or too-small
    /// alignment, or some other statically-checkable bad input.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// The operating system refused to reserve the initial region.
    #[error("failed to reserve {requested} bytes from the OS: {source}")]
    ResourceExhausted {
        /// The number of bytes that were requested (already page-rounded).
        requested: usize,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// No free-list bucket at or above the requested class contained a
    /// satisfying block. `fragmented` distinguishes, for debug purposes
    /// only, a failure where the region nominally has enough free bytes
    /// but none of them are contiguous.
    #[error("out of memory: no block for {requested} bytes (fragmented = {fragmented})")]
    OutOfMemory {
        /// The (alignment-rounded) byte count that could not be satisfied.
        requested: usize,
        /// Whether the region had enough free bytes in total, just not
        /// contiguously.
        fragmented: bool,
    },

    /// A block header's signatures did not match the expected constants,
    /// or the computed block address did not look like the start of a
    /// block at all.
    #[error("heap corruption detected: {0}")]
    Corruption(String),

    /// `free` was called on a block that is already marked free.
    #[error("double free detected")]
    DoubleFree,
}

/// The first invariant violation discovered by [`Arena::validate`](crate::Arena::validate).
#[derive(Debug, thiserror::Error)]
pub enum Violation {
    /// The arena's own signature word is not the expected constant; the
    /// arena has likely already been destroyed.
    #[error("arena signature is invalid (arena destroyed or never initialized)")]
    ArenaSignature,

    /// A block's header or footer signature did not match at the given
    /// byte offset from the region base.
    #[error("block header at offset {offset} is corrupted")]
    HeaderCorrupt {
        /// Byte offset of the offending block, from the region base.
        offset: usize,
    },

    /// A block claims a payload size of zero.
    #[error("block at offset {offset} has a zero payload size")]
    ZeroSizedBlock {
        /// Byte offset of the offending block, from the region base.
        offset: usize,
    },

    /// The address arithmetic between a block and its physical successor
    /// does not line up.
    #[error("block at offset {offset} does not abut its physical successor")]
    ChainAddressMismatch {
        /// Byte offset of the offending block, from the region base.
        offset: usize,
    },

    /// Two physically-adjacent blocks were both marked free.
    #[error("blocks at offsets {first} and {second} are adjacent and both free")]
    AdjacentFreeBlocks {
        /// Byte offset of the first of the two blocks.
        first: usize,
        /// Byte offset of the second of the two blocks.
        second: usize,
    },

    /// A block was found in free-list bucket `bucket`, but its size maps
    /// to a different bucket.
    #[error("block at offset {offset} lives in bucket {bucket} but maps to bucket {expected}")]
    WrongBucket {
        /// Byte offset of the offending block.
        offset: usize,
        /// The bucket it was found in.
        bucket: usize,
        /// The bucket its payload size actually maps to.
        expected: usize,
    },

    /// A block reachable from a free-list bucket is not reachable by
    /// walking the physical chain (or vice versa).
    #[error("block at offset {offset} in bucket {bucket} is not part of the physical chain")]
    DanglingFreeListEntry {
        /// Byte offset of the offending block.
        offset: usize,
        /// The bucket it was found in.
        bucket: usize,
    },

    /// `used_bytes` does not match the sum of in-use payload sizes
    /// computed by walking the chain.
    #[error("used_bytes mismatch: tracked {tracked}, computed {computed}")]
    UsedBytesMismatch {
        /// The value tracked incrementally by the arena.
        tracked: u64,
        /// The value computed by summing the chain.
        computed: u64,
    },

    /// The chain walk exceeded the bounded-work guarantee without
    /// terminating, which itself indicates corruption (a cycle, most
    /// likely).
    #[error("block chain exceeded {limit} blocks without terminating")]
    TooManyBlocks {
        /// The cap that was exceeded.
        limit: usize,
    },

    /// A free-list bucket's tracked count does not match the number of
    /// entries actually reachable by walking its list.
    #[error("bucket {bucket} count mismatch: tracked {tracked}, counted {counted}")]
    BucketCountMismatch {
        /// Which bucket.
        bucket: usize,
        /// The count the bucket itself tracks.
        tracked: u32,
        /// The count obtained by walking the list.
        counted: u32,
    },
}
