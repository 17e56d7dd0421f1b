// SPDX-License-Identifier: MIT
//
// Backing memory for a buffer — anonymous mappings, heap blocks, and growth.
//
// Safety: This module necessarily uses `unsafe` for mmap, mremap, munmap,
// and the raw global allocator. It is the only module in the crate that does.
// Each unsafe block is minimal and documented.
#![allow(unsafe_code)]
//
// A Region is one contiguous block obtained by the first strategy that works:
//
//   HugePages — anonymous mapping with MAP_HUGETLB (Linux, standard size only)
//   Pages     — anonymous mapping of ordinary pages (unix)
//   Heap      — the global allocator
//
// The huge-page attempt fails on most systems that haven't reserved hugetlb
// pages, so the first failure flips a process-wide hint and later regions go
// straight to Pages. The hint is an AtomicBool with relaxed ordering: a
// racing reader that still sees `false` just makes one more failed attempt.
//
// Growth keeps the strategy the region was born with. Linux mappings try
// mremap in place first and only then let the kernel move them. Other unix
// mappings are re-mapped and copied. Heap blocks are realloc'd.
//
// Every byte in [0, capacity) is initialized at all times. Anonymous mappings
// are zero-filled by the kernel, heap blocks come from alloc_zeroed, and the
// tail gained by realloc is zeroed explicitly. That is what makes handing out
// `&mut [u8]` over spare capacity sound.

use std::alloc::{self, Layout};
use std::io;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::error::{FbufError, Result};
use crate::size::SizeClass;

/// Alignment of heap-backed regions.
const HEAP_ALIGN: usize = 64;

// ─── Huge-page hint ─────────────────────────────────────────────────────────

/// Set after the first failed huge-page mapping. Never cleared.
static HUGE_PAGES_UNAVAILABLE: AtomicBool = AtomicBool::new(false);

/// Whether a huge-page mapping has already failed in this process.
#[inline]
#[must_use]
pub fn huge_pages_unavailable() -> bool {
    HUGE_PAGES_UNAVAILABLE.load(Ordering::Relaxed)
}

/// Record that huge pages can't be had. Logs only on the first transition.
fn mark_huge_pages_unavailable(err: &io::Error) {
    if !HUGE_PAGES_UNAVAILABLE.swap(true, Ordering::Relaxed) {
        debug!(error = %err, "huge-page mapping failed, using normal pages from now on");
    }
}

// ─── MapFlags ───────────────────────────────────────────────────────────────

bitflags! {
    /// Options for an anonymous mapping.
    ///
    /// Both are Linux-only; other platforms map ordinary pages and ignore them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapFlags: u8 {
        /// Back the mapping with huge pages (`MAP_HUGETLB`).
        const HUGE_PAGES = 1 << 0;
        /// Pre-fault every page at map time (`MAP_POPULATE`).
        const POPULATE   = 1 << 1;
    }
}

impl MapFlags {
    #[cfg(target_os = "linux")]
    fn to_mmap_flags(self) -> libc::c_int {
        let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        if self.contains(Self::HUGE_PAGES) {
            flags |= libc::MAP_HUGETLB;
        }
        if self.contains(Self::POPULATE) {
            flags |= libc::MAP_POPULATE;
        }
        flags
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    #[allow(clippy::unused_self)]
    const fn to_mmap_flags(self) -> libc::c_int {
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS
    }
}

// ─── Strategy ───────────────────────────────────────────────────────────────

/// How a region's memory was obtained, and therefore how it grows and is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Anonymous mapping backed by huge pages.
    HugePages,
    /// Anonymous mapping backed by ordinary pages.
    Pages,
    /// Block from the global allocator.
    Heap,
}

impl Strategy {
    /// Strategies to try, in order, for a region of the given size class.
    #[cfg(target_os = "linux")]
    #[must_use]
    pub const fn candidates(class: SizeClass) -> &'static [Self] {
        match class {
            SizeClass::Small => &[Self::Pages, Self::Heap],
            SizeClass::Standard => &[Self::HugePages, Self::Pages, Self::Heap],
        }
    }

    /// Strategies to try, in order, for a region of the given size class.
    #[cfg(all(unix, not(target_os = "linux")))]
    #[must_use]
    pub const fn candidates(_class: SizeClass) -> &'static [Self] {
        &[Self::Pages, Self::Heap]
    }

    /// Strategies to try, in order, for a region of the given size class.
    #[cfg(not(unix))]
    #[must_use]
    pub const fn candidates(_class: SizeClass) -> &'static [Self] {
        &[Self::Heap]
    }

    /// Whether regions of this strategy are memory mappings.
    #[inline]
    #[must_use]
    pub const fn is_mapped(self) -> bool {
        matches!(self, Self::HugePages | Self::Pages)
    }

    /// Mapping options for this strategy (empty for `Heap`).
    #[must_use]
    pub const fn map_flags(self) -> MapFlags {
        match self {
            Self::HugePages => MapFlags::HUGE_PAGES.union(MapFlags::POPULATE),
            Self::Pages => MapFlags::POPULATE,
            Self::Heap => MapFlags::empty(),
        }
    }
}

// ─── Region ─────────────────────────────────────────────────────────────────

/// One contiguous, exclusively owned block of memory.
///
/// Freed on drop with the call matching its [`Strategy`].
pub struct Region {
    ptr: NonNull<u8>,
    capacity: usize,
    strategy: Strategy,
}

// A Region is a uniquely owned allocation, like a Box<[u8]>.
unsafe impl Send for Region {}

impl Region {
    /// Reserve the initial region for a size class, trying each candidate
    /// strategy in turn.
    ///
    /// # Errors
    ///
    /// Returns [`FbufError::Allocation`] carrying the last strategy's error
    /// if every strategy fails.
    pub fn allocate(class: SizeClass) -> Result<Self> {
        let capacity = class.initial_capacity();
        let mut last_err = None;

        for &strategy in Strategy::candidates(class) {
            if strategy == Strategy::HugePages && huge_pages_unavailable() {
                continue;
            }
            match Self::allocate_with(strategy, capacity) {
                Ok(region) => {
                    debug!(?strategy, capacity, "region allocated");
                    return Ok(region);
                }
                Err(err) => {
                    if strategy == Strategy::HugePages {
                        mark_huge_pages_unavailable(&err);
                    } else {
                        debug!(?strategy, capacity, error = %err, "allocation strategy failed");
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(FbufError::Allocation {
            requested: capacity,
            source: last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory)),
        })
    }

    /// Reserve `capacity` bytes with exactly one strategy.
    ///
    /// # Errors
    ///
    /// Returns the OS (or allocator) error if the strategy fails or isn't
    /// supported on this platform.
    pub fn allocate_with(strategy: Strategy, capacity: usize) -> io::Result<Self> {
        if capacity == 0 {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        let ptr = if strategy.is_mapped() {
            map(capacity, strategy.map_flags())?
        } else {
            heap_alloc(capacity)?
        };
        Ok(Self {
            ptr,
            capacity,
            strategy,
        })
    }

    /// Total bytes reserved.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// The strategy this region was obtained with.
    #[inline]
    #[must_use]
    pub const fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// The whole region, `[0, capacity)`.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // Initialized over its full capacity and exclusively owned.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.capacity) }
    }

    /// The whole region, `[0, capacity)`, mutably.
    #[inline]
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Initialized over its full capacity; &mut self guarantees uniqueness.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }

    /// Enlarge the region to `new_capacity` bytes, preserving its contents.
    ///
    /// The region may move. On error it is left exactly as it was.
    ///
    /// # Errors
    ///
    /// Returns the OS (or allocator) error if the region can't be enlarged.
    pub fn grow(&mut self, new_capacity: usize) -> io::Result<()> {
        if new_capacity <= self.capacity {
            return Ok(());
        }
        let old = self.ptr;
        let ptr = if self.strategy.is_mapped() {
            remap(self.ptr, self.capacity, new_capacity, self.strategy.map_flags())?
        } else {
            heap_realloc(self.ptr, self.capacity, new_capacity)?
        };
        debug!(
            strategy = ?self.strategy,
            from = self.capacity,
            to = new_capacity,
            moved = ptr != old,
            "region grown"
        );
        self.ptr = ptr;
        self.capacity = new_capacity;
        Ok(())
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if self.strategy.is_mapped() {
            unmap(self.ptr, self.capacity);
        } else if let Ok(layout) = heap_layout(self.capacity) {
            // Allocated by heap_alloc/heap_realloc with this exact layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("capacity", &self.capacity)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

// ─── Mappings ───────────────────────────────────────────────────────────────

/// Map `len` bytes of anonymous, private, read-write memory.
#[cfg(unix)]
fn map(len: usize, flags: MapFlags) -> io::Result<NonNull<u8>> {
    // No fd, no fixed address: the kernel picks where the mapping goes.
    let raw = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            flags.to_mmap_flags(),
            -1,
            0,
        )
    };
    if raw == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(raw.cast::<u8>()).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))
}

#[cfg(not(unix))]
fn map(_len: usize, _flags: MapFlags) -> io::Result<NonNull<u8>> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

/// Extend a mapping, in place if the address space after it is free.
#[cfg(target_os = "linux")]
fn remap(
    ptr: NonNull<u8>,
    old_len: usize,
    new_len: usize,
    _flags: MapFlags,
) -> io::Result<NonNull<u8>> {
    let old = ptr.as_ptr().cast::<libc::c_void>();
    // `old` is a live mapping of exactly `old_len` bytes owned by the caller.
    // Without MREMAP_MAYMOVE the kernel either extends it in place or fails,
    // leaving it untouched either way.
    let mut raw = unsafe { libc::mremap(old, old_len, new_len, 0) };
    if raw == libc::MAP_FAILED {
        // Same mapping; this time the kernel may relocate it. On failure the
        // original mapping is still intact.
        raw = unsafe { libc::mremap(old, old_len, new_len, libc::MREMAP_MAYMOVE) };
    }
    if raw == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(raw.cast::<u8>()).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))
}

/// Extend a mapping by mapping a larger one and copying into it.
#[cfg(all(unix, not(target_os = "linux")))]
fn remap(ptr: NonNull<u8>, old_len: usize, new_len: usize, flags: MapFlags) -> io::Result<NonNull<u8>> {
    let new = map(new_len, flags)?;
    // Two distinct live mappings; `new` is at least `old_len` bytes.
    unsafe { ptr::copy_nonoverlapping(ptr.as_ptr(), new.as_ptr(), old_len) };
    unmap(ptr, old_len);
    Ok(new)
}

#[cfg(not(unix))]
fn remap(_ptr: NonNull<u8>, _old_len: usize, _new_len: usize, _flags: MapFlags) -> io::Result<NonNull<u8>> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

/// Return a mapping to the kernel. Failure is logged; there's nothing else
/// to do with it.
#[cfg(unix)]
fn unmap(ptr: NonNull<u8>, len: usize) {
    // `ptr` is a live mapping of `len` bytes that nothing references anymore.
    let rc = unsafe { libc::munmap(ptr.as_ptr().cast::<libc::c_void>(), len) };
    if rc != 0 {
        warn!(error = %io::Error::last_os_error(), len, "failed to unmap region");
    }
}

#[cfg(not(unix))]
const fn unmap(_ptr: NonNull<u8>, _len: usize) {}

// ─── Heap ───────────────────────────────────────────────────────────────────

fn heap_layout(capacity: usize) -> io::Result<Layout> {
    Layout::from_size_align(capacity, HEAP_ALIGN)
        .map_err(|_| io::Error::from(io::ErrorKind::OutOfMemory))
}

fn heap_alloc(capacity: usize) -> io::Result<NonNull<u8>> {
    let layout = heap_layout(capacity)?;
    // Non-zero size is checked by allocate_with.
    let raw = unsafe { alloc::alloc_zeroed(layout) };
    NonNull::new(raw).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))
}

fn heap_realloc(ptr: NonNull<u8>, old_len: usize, new_len: usize) -> io::Result<NonNull<u8>> {
    let layout = heap_layout(old_len)?;
    // realloc requires the new size to form a valid layout with the same align.
    heap_layout(new_len)?;
    // `ptr` was allocated with `layout`; on null return it is still valid.
    let raw = unsafe { alloc::realloc(ptr.as_ptr(), layout, new_len) };
    let new = NonNull::new(raw).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))?;
    // Keep [0, capacity) initialized: zero the tail realloc handed back.
    unsafe { ptr::write_bytes(new.as_ptr().add(old_len), 0, new_len - old_len) };
    Ok(new)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
