//! Page-granular reservation of the raw memory span backing an [`Arena`](crate::Arena).
//!
//! This mirrors the C original's use of `mmap`/`getpagesize` directly: a
//! private, anonymous, read/write mapping is reserved once, up-front, and
//! released exactly once on drop. Nothing above this module ever resizes
//! or remaps the span; all bookkeeping above treats it as a fixed-length
//! slice of bytes addressed by byte offset from the base.

use crate::error::ArenaError;

/// Round `size` up to the next multiple of `page_size` (a power of two).
fn round_up_to_page(size: usize, page_size: usize) -> usize {
    debug_assert!(page_size.is_power_of_two());
    (size + page_size - 1) & !(page_size - 1)
}

#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: `_SC_PAGESIZE` is a well-known, always-valid sysconf name.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

#[cfg(not(unix))]
fn page_size() -> usize {
    4096
}

/// A contiguous, page-rounded span of bytes owned by one [`Arena`].
///
/// The region is reserved once in [`Region::reserve`] and released in
/// [`Drop`]. All accessors below are bounds-checked: a caller asking for
/// bytes past `len` is a programmer error inside this crate (never a
/// result of external input), so it panics rather than propagating an
/// error, matching the teacher's `assert!`-heavy `Buffer::at`.
pub(crate) struct Region {
    base: *mut u8,
    len: usize,
}

// The region is a plain owned buffer; sending it across threads is fine as
// long as the caller provides their own synchronization (see the crate-level
// docs). We do not implement `Sync`: the arena is not safe for concurrent
// access without external locking.
unsafe impl Send for Region {}

impl Region {
    /// Reserve a page-rounded, zero-initialized span of at least `bytes`
    /// bytes from the OS.
    pub(crate) fn reserve(bytes: usize) -> Result<Self, ArenaError> {
        let len = round_up_to_page(bytes, page_size());

        #[cfg(unix)]
        {
            // SAFETY: requesting an anonymous, private mapping with no
            // backing file descriptor; the arguments are all valid by
            // construction.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(ArenaError::ResourceExhausted {
                    requested: len,
                    source: std::io::Error::last_os_error(),
                });
            }
            Ok(Self {
                base: ptr.cast(),
                len,
            })
        }

        #[cfg(not(unix))]
        {
            let layout = std::alloc::Layout::from_size_align(len, page_size())
                .map_err(|e| ArenaError::BadArgument(e.to_string()))?;
            // SAFETY: `len` is nonzero (rounded up from `bytes`, and
            // `round_up_to_page` never returns 0 for a nonzero page size
            // given the caller already rejected a zero-byte request).
            let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
            if ptr.is_null() {
                return Err(ArenaError::ResourceExhausted {
                    requested: len,
                    source: std::io::Error::new(std::io::ErrorKind::Other, "allocation failed"),
                });
            }
            Ok(Self { base: ptr, len })
        }
    }

    /// The number of bytes actually reserved (page-rounded).
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// The base address of the region, for diagnostics and address math.
    pub(crate) fn base_addr(&self) -> usize {
        self.base as usize
    }

    /// Borrow `len` bytes starting at `offset` as a typed reference.
    ///
    /// # Panics
    /// Panics if the read would run past the region, which would indicate
    /// an internal bug (an externally supplied offset is always validated
    /// before reaching this point).
    pub(crate) unsafe fn header<T>(&self, offset: usize) -> &T {
        assert!(
            offset + std::mem::size_of::<T>() <= self.len,
            "header read out of bounds"
        );
        assert_eq!(offset % std::mem::align_of::<T>(), 0, "misaligned header");
        &*(self.base.add(offset).cast::<T>())
    }

    /// Mutable counterpart of [`Region::header`].
    pub(crate) unsafe fn header_mut<T>(&mut self, offset: usize) -> &mut T {
        assert!(
            offset + std::mem::size_of::<T>() <= self.len,
            "header write out of bounds"
        );
        assert_eq!(offset % std::mem::align_of::<T>(), 0, "misaligned header");
        &mut *(self.base.add(offset).cast::<T>())
    }

    /// Raw pointer to the byte at `offset`, used to hand payload addresses
    /// out to callers and to translate them back on `free`.
    pub(crate) fn byte_ptr(&self, offset: usize) -> *mut u8 {
        assert!(offset <= self.len, "byte pointer out of bounds");
        // SAFETY: offset is within `len` by the assertion above.
        unsafe { self.base.add(offset) }
    }

    /// Translate a raw pointer previously handed out by [`Region::byte_ptr`]
    /// back into a byte offset, or `None` if it does not fall within the
    /// region at all (the caller is responsible for the header-signature
    /// check that distinguishes "foreign pointer" from "pointer into the
    /// middle of a payload").
    pub(crate) fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        let base = self.base as usize;
        let addr = ptr as usize;
        if addr < base || addr >= base.checked_add(self.len)? {
            return None;
        }
        Some(addr - base)
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            // SAFETY: `base`/`len` are exactly the values returned by the
            // matching `mmap` call in `reserve`, released exactly once.
            unsafe {
                libc::munmap(self.base.cast(), self.len);
            }
        }
        #[cfg(not(unix))]
        {
            if let Ok(layout) = std::alloc::Layout::from_size_align(self.len, page_size()) {
                // SAFETY: matches the allocation performed in `reserve`.
                unsafe { std::alloc::dealloc(self.base, layout) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_page_size() {
        let region = Region::reserve(1).unwrap();
        assert!(region.len() >= 1);
        assert_eq!(region.len() % page_size(), 0);
    }

    #[test]
    fn offset_of_rejects_foreign_pointers() {
        let region = Region::reserve(4096).unwrap();
        let mut x = 0_u8;
        assert_eq!(region.offset_of(std::ptr::addr_of!(x)), None);
        let _ = &mut x;
        assert_eq!(region.offset_of(region.byte_ptr(0)), Some(0));
    }
}
