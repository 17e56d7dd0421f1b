// SPDX-License-Identifier: MIT
//
// Fbuf — the growable output buffer.
//
// One state machine over (region, capacity, len):
//
//   uninitialized ──init──▶ ready ──append/grow/reset──▶ ready
//         ▲                   │
//         └──release/finalize─┘
//
// Every append follows the same shape: make sure there's room for the write
// (`ensure_capacity`), copy into `[len, len + k)`, advance `len`. If room
// can't be made, nothing moves: the length, the bytes, and the capacity are
// exactly what they were before the call.
//
// Growth doubles. Starting from a size class's power-of-two capacity, the
// region goes 2 MiB → 4 MiB → 8 MiB … until the request fits, and stops
// doubling once the capacity passes half of `usize`.

use std::ffi::CStr;
use std::fmt;
use std::io::{self, Write};

use tracing::trace;

use crate::error::{FbufError, Result};
use crate::region::{Region, Strategy};
use crate::size::{FORMAT_HEADROOM, GROWTH_CEILING, INT_HEADROOM, SizeClass};
use crate::window::{Window, measure};

/// A growable, binary-safe byte buffer for staging terminal output.
///
/// Contents are arbitrary bytes: not required to be UTF-8 and never
/// NUL-terminated. The buffer only grows; [`reset`](Self::reset) forgets the
/// contents but keeps the memory for the next frame.
///
/// # Example
///
/// ```
/// use n_fbuf::Fbuf;
///
/// let mut buf = Fbuf::small()?;
/// buf.put_bytes(b"\x1b[1;1H")?;
/// buf.put_int(-17)?;
/// assert_eq!(buf.as_bytes(), b"\x1b[1;1H-17");
///
/// let mut out = Vec::new();
/// buf.finalize(&mut out, true)?;
/// assert_eq!(out, b"\x1b[1;1H-17");
/// assert!(!buf.is_initialized());
/// # Ok::<(), n_fbuf::FbufError>(())
/// ```
#[derive(Default)]
pub struct Fbuf {
    region: Option<Region>,
    len: usize,
}

/// Smallest doubling of `capacity` that leaves `n` bytes free after `len`.
///
/// `None` if doubling would have to pass [`GROWTH_CEILING`] first.
fn grown_capacity(capacity: usize, len: usize, n: usize) -> Option<usize> {
    let mut size = capacity.max(1);
    while size <= GROWTH_CEILING {
        size *= 2;
        if size - len >= n {
            return Some(size);
        }
    }
    None
}

impl Fbuf {
    /// An uninitialized buffer that owns no memory.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            region: None,
            len: 0,
        }
    }

    /// Create and initialize a buffer of the given size class.
    ///
    /// # Errors
    ///
    /// Returns [`FbufError::Allocation`] if no allocation strategy succeeds.
    pub fn with_size_class(class: SizeClass) -> Result<Self> {
        let mut buf = Self::new();
        buf.init(class)?;
        Ok(buf)
    }

    /// Create a buffer with a small initial reservation.
    ///
    /// # Errors
    ///
    /// Returns [`FbufError::Allocation`] if no allocation strategy succeeds.
    pub fn small() -> Result<Self> {
        Self::with_size_class(SizeClass::Small)
    }

    /// Create a buffer with the standard (huge-page sized) reservation.
    ///
    /// # Errors
    ///
    /// Returns [`FbufError::Allocation`] if no allocation strategy succeeds.
    pub fn standard() -> Result<Self> {
        Self::with_size_class(SizeClass::Standard)
    }

    /// Reserve the initial region. The buffer must be uninitialized.
    ///
    /// # Errors
    ///
    /// Returns [`FbufError::AlreadyInitialized`] if the buffer already owns
    /// a region, or [`FbufError::Allocation`] if no strategy succeeds.
    pub fn init(&mut self, class: SizeClass) -> Result<()> {
        if self.region.is_some() {
            return Err(FbufError::AlreadyInitialized);
        }
        self.region = Some(Region::allocate(class)?);
        self.len = 0;
        Ok(())
    }

    // ── Inspection ──────────────────────────────────────────────────────

    /// Bytes of valid content.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether there is no content.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total bytes reserved (0 when uninitialized).
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.region.as_ref().map_or(0, Region::capacity)
    }

    /// Whether the buffer owns a region.
    #[inline]
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.region.is_some()
    }

    /// How the current region was obtained.
    #[inline]
    #[must_use]
    pub fn strategy(&self) -> Option<Strategy> {
        self.region.as_ref().map(Region::strategy)
    }

    /// The valid content, `[0, len)`.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match &self.region {
            Some(region) => &region.as_slice()[..self.len],
            None => &[],
        }
    }

    /// View of the content from `offset` to the end.
    ///
    /// `None` if `offset > len` or the buffer is uninitialized. The view
    /// borrows the buffer, so it can't outlive the next write.
    #[must_use]
    pub fn at(&self, offset: usize) -> Option<&[u8]> {
        if offset > self.len {
            return None;
        }
        let region = self.region.as_ref()?;
        Some(&region.as_slice()[offset..self.len])
    }

    /// Mutable view of the content from `offset` to the end, for patching
    /// bytes already written.
    #[must_use]
    pub fn at_mut(&mut self, offset: usize) -> Option<&mut [u8]> {
        if offset > self.len {
            return None;
        }
        let len = self.len;
        let region = self.region.as_mut()?;
        Some(&mut region.as_mut_slice()[offset..len])
    }

    // ── Growth ──────────────────────────────────────────────────────────

    /// Make sure at least `n` bytes can be appended without growing.
    ///
    /// Grows by doubling. A second call with the same `n` and no writes in
    /// between never grows again.
    ///
    /// # Errors
    ///
    /// - [`FbufError::Uninitialized`] if the buffer owns no region.
    /// - [`FbufError::CapacityExceeded`] if doubling can't reach the request
    ///   before passing half of `usize`.
    /// - [`FbufError::Allocation`] if the region can't be enlarged.
    ///
    /// On error the buffer is unchanged.
    pub fn ensure_capacity(&mut self, n: usize) -> Result<()> {
        let len = self.len;
        let region = self.region.as_mut().ok_or(FbufError::Uninitialized)?;
        let capacity = region.capacity();
        if capacity - len >= n {
            return Ok(());
        }
        let target = grown_capacity(capacity, len, n).ok_or(FbufError::CapacityExceeded {
            requested: n,
            len,
            capacity,
        })?;
        region
            .grow(target)
            .map_err(|source| FbufError::Allocation {
                requested: target,
                source,
            })
    }

    /// Spare capacity after `len`, at least `n` bytes long.
    fn spare(&mut self, n: usize) -> Result<&mut [u8]> {
        self.ensure_capacity(n)?;
        let len = self.len;
        let region = self.region.as_mut().ok_or(FbufError::Uninitialized)?;
        Ok(&mut region.as_mut_slice()[len..])
    }

    // ── Appends ─────────────────────────────────────────────────────────

    /// Append one byte.
    ///
    /// # Errors
    ///
    /// Fails as [`ensure_capacity`](Self::ensure_capacity) does.
    pub fn put_byte(&mut self, byte: u8) -> Result<usize> {
        self.spare(1)?[0] = byte;
        self.len += 1;
        Ok(1)
    }

    /// Append a character as UTF-8 (1–4 bytes).
    ///
    /// # Errors
    ///
    /// Fails as [`ensure_capacity`](Self::ensure_capacity) does.
    pub fn put_char(&mut self, ch: char) -> Result<usize> {
        let mut enc = [0u8; 4];
        self.put_bytes(ch.encode_utf8(&mut enc).as_bytes())
    }

    /// Append exactly `bytes.len()` bytes, zero bytes included.
    ///
    /// # Errors
    ///
    /// Fails as [`ensure_capacity`](Self::ensure_capacity) does.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<usize> {
        let n = bytes.len();
        self.spare(n)?[..n].copy_from_slice(bytes);
        self.len += n;
        Ok(n)
    }

    /// Append a string's bytes.
    ///
    /// # Errors
    ///
    /// Fails as [`ensure_capacity`](Self::ensure_capacity) does.
    #[inline]
    pub fn put_str(&mut self, s: &str) -> Result<usize> {
        self.put_bytes(s.as_bytes())
    }

    /// Append a zero-terminated string's bytes, without the terminator.
    ///
    /// # Errors
    ///
    /// Fails as [`ensure_capacity`](Self::ensure_capacity) does.
    #[inline]
    pub fn put_cstr(&mut self, s: &CStr) -> Result<usize> {
        self.put_bytes(s.to_bytes())
    }

    /// Append the decimal representation of `n`.
    ///
    /// # Errors
    ///
    /// Fails as [`ensure_capacity`](Self::ensure_capacity) does, or with
    /// [`FbufError::Format`] if the digits don't fit [`INT_HEADROOM`].
    pub fn put_int(&mut self, n: i64) -> Result<usize> {
        let spare = self.spare(INT_HEADROOM)?;
        let mut window = Window::new(&mut spare[..INT_HEADROOM]);
        if fmt::write(&mut window, format_args!("{n}")).is_err() {
            return Err(FbufError::Format {
                reserved: INT_HEADROOM,
            });
        }
        let written = window.written();
        self.len += written;
        Ok(written)
    }

    /// Append formatted text, as produced by `format_args!`.
    ///
    /// The first attempt formats straight into at least [`FORMAT_HEADROOM`]
    /// bytes of spare room. Output that doesn't fit is measured, the buffer
    /// grows to the exact size, and formatting runs once more.
    ///
    /// # Errors
    ///
    /// Fails as [`ensure_capacity`](Self::ensure_capacity) does, or with
    /// [`FbufError::Format`] if a `Display` impl reports an error. The
    /// length is not advanced on failure.
    pub fn put_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<usize> {
        if let Some(s) = args.as_str() {
            return self.put_str(s);
        }

        let spare = self.spare(FORMAT_HEADROOM)?;
        let mut window = Window::new(spare);
        if fmt::write(&mut window, args).is_ok() {
            let written = window.written();
            self.len += written;
            return Ok(written);
        }
        if !window.overflowed() {
            return Err(FbufError::Format {
                reserved: FORMAT_HEADROOM,
            });
        }

        let needed = measure(args).map_err(|_| FbufError::Format { reserved: 0 })?;
        trace!(needed, "formatted output exceeded headroom, retrying at exact size");
        let spare = self.spare(needed)?;
        let mut window = Window::new(&mut spare[..needed]);
        if fmt::write(&mut window, args).is_err() {
            return Err(FbufError::Format { reserved: needed });
        }
        let written = window.written();
        self.len += written;
        Ok(written)
    }

    /// Append an escape sequence. `None` means the terminal doesn't provide
    /// the capability.
    ///
    /// # Errors
    ///
    /// [`FbufError::MissingEscape`] for `None` (the buffer is untouched),
    /// otherwise fails as [`ensure_capacity`](Self::ensure_capacity) does.
    pub fn emit(&mut self, esc: Option<&[u8]>) -> Result<()> {
        let esc = esc.ok_or(FbufError::MissingEscape)?;
        self.put_bytes(esc)?;
        Ok(())
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Forget the content, keep the memory.
    #[inline]
    pub const fn reset(&mut self) {
        self.len = 0;
    }

    /// Return the region to the system. The buffer becomes uninitialized.
    ///
    /// No-op on an uninitialized buffer.
    pub fn release(&mut self) {
        if let Some(region) = self.region.take() {
            trace!(
                capacity = region.capacity(),
                len = self.len,
                strategy = ?region.strategy(),
                "releasing buffer"
            );
            drop(region);
        }
        self.len = 0;
    }

    /// Write the content to `sink` in one `write_all`, optionally flush it,
    /// then release the buffer whatever happened.
    ///
    /// An empty buffer writes nothing (and still flushes if asked). Returns
    /// the number of bytes handed to the sink.
    ///
    /// # Errors
    ///
    /// [`FbufError::SinkWrite`] if the write didn't transfer every byte or
    /// the flush failed. The buffer is released either way; it can't be
    /// retried.
    pub fn finalize<W: Write + ?Sized>(&mut self, sink: &mut W, flush: bool) -> Result<usize> {
        let len = self.len;
        let mut result = if len > 0 {
            sink.write_all(self.as_bytes())
        } else {
            Ok(())
        };
        if flush && result.is_ok() {
            result = sink.flush();
        }
        trace!(len, ok = result.is_ok(), "finalized buffer");
        self.release();
        result.map(|()| len).map_err(FbufError::SinkWrite)
    }
}

impl fmt::Debug for Fbuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fbuf")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("strategy", &self.strategy())
            .finish()
    }
}

impl Write for Fbuf {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.put_bytes(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Nothing to flush; content leaves only through finalize().
        Ok(())
    }
}

impl fmt::Write for Fbuf {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.put_str(s).map(|_| ()).map_err(|_| fmt::Error)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size::{SMALL_CAPACITY, STANDARD_CAPACITY};
    use pretty_assertions::assert_eq;

    /// Sink that accepts `limit` bytes, then fails.
    struct FailingSink {
        accepted: Vec<u8>,
        limit: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.limit - self.accepted.len();
            if room == 0 {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            let n = buf.len().min(room);
            self.accepted.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Sink that records writes but refuses to flush.
    #[derive(Default)]
    struct UnflushableSink {
        data: Vec<u8>,
        writes: usize,
    }

    impl Write for UnflushableSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::other("flush refused"))
        }
    }

    // ── Growth policy ───────────────────────────────────────────────────

    #[test]
    fn grown_capacity_doubles_until_fit() {
        assert_eq!(grown_capacity(16, 10, 7), Some(32));
        assert_eq!(grown_capacity(16, 10, 30), Some(64));
        assert_eq!(grown_capacity(16, 16, 16), Some(32));
    }

    #[test]
    fn grown_capacity_refuses_past_ceiling() {
        assert_eq!(grown_capacity(16, 0, usize::MAX), None);
        assert_eq!(grown_capacity(GROWTH_CEILING + 1, 0, GROWTH_CEILING + 2), None);
    }

    #[test]
    fn grown_capacity_may_reach_ceiling_doubling() {
        let top = 1usize << (usize::BITS - 1);
        assert_eq!(grown_capacity(top / 2, 0, top), Some(top));
    }

    // ── Init ────────────────────────────────────────────────────────────

    #[test]
    fn new_is_uninitialized() {
        let buf = Fbuf::new();
        assert!(!buf.is_initialized());
        assert_eq!(buf.capacity(), 0);
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.strategy(), None);
        assert_eq!(buf.as_bytes(), b"");
    }

    #[test]
    fn init_reserves_size_class() {
        let small = Fbuf::small().unwrap();
        assert_eq!(small.capacity(), SMALL_CAPACITY);
        assert!(small.is_empty());

        let standard = Fbuf::standard().unwrap();
        assert_eq!(standard.capacity(), STANDARD_CAPACITY);
        assert!(standard.strategy().is_some());
    }

    #[test]
    fn init_twice_is_rejected() {
        let mut buf = Fbuf::small().unwrap();
        buf.put_str("keep").unwrap();
        assert!(matches!(
            buf.init(SizeClass::Standard),
            Err(FbufError::AlreadyInitialized)
        ));
        assert_eq!(buf.capacity(), SMALL_CAPACITY);
        assert_eq!(buf.as_bytes(), b"keep");
    }

    #[test]
    fn init_after_release() {
        let mut buf = Fbuf::small().unwrap();
        buf.release();
        buf.init(SizeClass::Small).unwrap();
        assert_eq!(buf.capacity(), SMALL_CAPACITY);
    }

    // ── Appends ─────────────────────────────────────────────────────────

    #[test]
    fn binary_then_int() {
        let mut buf = Fbuf::standard().unwrap();
        assert_eq!(buf.put_bytes(&[0x00, 0xFF, 0x41]).unwrap(), 3);
        assert_eq!(buf.put_int(-17).unwrap(), 3);
        assert_eq!(buf.len(), 6);
        assert_eq!(buf.as_bytes(), &[0x00, 0xFF, 0x41, b'-', b'1', b'7']);
    }

    #[test]
    fn put_byte_and_char() {
        let mut buf = Fbuf::small().unwrap();
        assert_eq!(buf.put_byte(0).unwrap(), 1);
        assert_eq!(buf.put_char('A').unwrap(), 1);
        assert_eq!(buf.put_char('中').unwrap(), 3);
        assert_eq!(buf.put_char('🔥').unwrap(), 4);
        assert_eq!(buf.as_bytes(), "\0A中🔥".as_bytes());
    }

    #[test]
    fn put_cstr_stops_at_terminator() {
        let mut buf = Fbuf::small().unwrap();
        let n = buf.put_cstr(c"\x1b[0m").unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf.as_bytes(), b"\x1b[0m");
    }

    #[test]
    fn put_int_extremes() {
        let mut buf = Fbuf::small().unwrap();
        buf.put_int(i64::MIN).unwrap();
        buf.put_byte(b' ').unwrap();
        buf.put_int(i64::MAX).unwrap();
        buf.put_byte(b' ').unwrap();
        buf.put_int(0).unwrap();
        assert_eq!(
            buf.as_bytes(),
            b"-9223372036854775808 9223372036854775807 0"
        );
    }

    #[test]
    fn put_int_near_end_grows_first() {
        let mut buf = Fbuf::small().unwrap();
        buf.put_bytes(&vec![b'x'; SMALL_CAPACITY - 2]).unwrap();
        buf.put_int(12345).unwrap();
        assert_eq!(buf.capacity(), SMALL_CAPACITY * 2);
        assert!(buf.as_bytes().ends_with(b"xx12345"));
    }

    #[test]
    fn put_fmt_small() {
        let mut buf = Fbuf::small().unwrap();
        let n = buf.put_fmt(format_args!("\x1b[{};{}H", 4, 6)).unwrap();
        assert_eq!(n, 6);
        assert_eq!(buf.as_bytes(), b"\x1b[4;6H");
    }

    #[test]
    fn put_fmt_literal() {
        let mut buf = Fbuf::small().unwrap();
        assert_eq!(buf.put_fmt(format_args!("plain")).unwrap(), 5);
        assert_eq!(buf.as_bytes(), b"plain");
    }

    #[test]
    fn put_fmt_larger_than_headroom() {
        let mut buf = Fbuf::small().unwrap();
        let big = "y".repeat(FORMAT_HEADROOM * 3);
        let n = buf.put_fmt(format_args!("<{big}>")).unwrap();
        assert_eq!(n, big.len() + 2);
        assert_eq!(buf.len(), n);
        assert!(buf.as_bytes().starts_with(b"<yyy"));
        assert!(buf.as_bytes().ends_with(b"yyy>"));
    }

    #[test]
    fn put_fmt_failing_display_keeps_len() {
        struct Broken;
        impl fmt::Display for Broken {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("partial")?;
                Err(fmt::Error)
            }
        }
        let mut buf = Fbuf::small().unwrap();
        buf.put_str("ok").unwrap();
        let err = buf.put_fmt(format_args!("{Broken}")).unwrap_err();
        assert!(matches!(err, FbufError::Format { .. }));
        assert_eq!(buf.as_bytes(), b"ok");
    }

    #[test]
    fn write_macros() {
        let mut buf = Fbuf::small().unwrap();
        write!(buf, "hello {}", 42).unwrap();
        fmt::Write::write_fmt(&mut buf, format_args!(" {}", "world")).unwrap();
        assert_eq!(buf.as_bytes(), b"hello 42 world");
        assert!(Write::flush(&mut buf).is_ok());
    }

    #[test]
    fn emit_present_and_missing() {
        let mut buf = Fbuf::small().unwrap();
        buf.emit(Some(&b"\x1b[?25l"[..])).unwrap();
        assert!(matches!(buf.emit(None), Err(FbufError::MissingEscape)));
        assert_eq!(buf.as_bytes(), b"\x1b[?25l");
    }

    // ── Growth ──────────────────────────────────────────────────────────

    #[test]
    fn growth_preserves_content_and_len() {
        let mut buf = Fbuf::small().unwrap();
        buf.put_bytes(b"\0head\0").unwrap();
        buf.ensure_capacity(SMALL_CAPACITY * 3).unwrap();
        assert_eq!(buf.capacity(), SMALL_CAPACITY * 4);
        assert_eq!(buf.len(), 6);
        assert_eq!(buf.as_bytes(), b"\0head\0");
    }

    #[test]
    fn ensure_capacity_is_idempotent() {
        let mut buf = Fbuf::small().unwrap();
        buf.ensure_capacity(SMALL_CAPACITY + 1).unwrap();
        let cap = buf.capacity();
        buf.ensure_capacity(SMALL_CAPACITY + 1).unwrap();
        assert_eq!(buf.capacity(), cap);
    }

    #[test]
    fn ensure_capacity_within_room_is_noop() {
        let mut buf = Fbuf::small().unwrap();
        buf.ensure_capacity(SMALL_CAPACITY).unwrap();
        assert_eq!(buf.capacity(), SMALL_CAPACITY);
    }

    #[test]
    fn capacity_exceeded_leaves_buffer_unchanged() {
        let mut buf = Fbuf::standard().unwrap();
        buf.put_str("abc").unwrap();
        let err = buf.ensure_capacity(usize::MAX).unwrap_err();
        assert!(matches!(
            err,
            FbufError::CapacityExceeded {
                requested: usize::MAX,
                len: 3,
                capacity: STANDARD_CAPACITY,
            }
        ));
        assert_eq!(buf.capacity(), STANDARD_CAPACITY);
        assert_eq!(buf.as_bytes(), b"abc");
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn allocation_failure_leaves_buffer_unchanged() {
        let mut buf = Fbuf::small().unwrap();
        buf.put_str("abc").unwrap();
        let err = buf.ensure_capacity(1 << 60).unwrap_err();
        assert!(matches!(err, FbufError::Allocation { .. }));
        assert_eq!(buf.capacity(), SMALL_CAPACITY);
        assert_eq!(buf.as_bytes(), b"abc");
    }

    #[test]
    fn operations_on_uninitialized_fail() {
        let mut buf = Fbuf::new();
        assert!(matches!(buf.put_byte(1), Err(FbufError::Uninitialized)));
        assert!(matches!(buf.put_bytes(b"x"), Err(FbufError::Uninitialized)));
        assert!(matches!(buf.ensure_capacity(0), Err(FbufError::Uninitialized)));
        assert!(matches!(buf.put_int(1), Err(FbufError::Uninitialized)));
        assert!(Write::write(&mut buf, b"x").is_err());
        assert_eq!(buf.len(), 0);
    }

    // ── Views ───────────────────────────────────────────────────────────

    #[test]
    fn at_views_tail() {
        let mut buf = Fbuf::small().unwrap();
        buf.put_str("abcdef").unwrap();
        assert_eq!(buf.at(0), Some(&b"abcdef"[..]));
        assert_eq!(buf.at(4), Some(&b"ef"[..]));
        assert_eq!(buf.at(6), Some(&b""[..]));
        assert_eq!(buf.at(7), None);
        assert_eq!(Fbuf::new().at(0), None);
    }

    #[test]
    fn at_mut_patches_in_place() {
        let mut buf = Fbuf::small().unwrap();
        buf.put_str("\x1b[?2026h").unwrap();
        buf.at_mut(7).unwrap()[0] = b'l';
        assert_eq!(buf.as_bytes(), b"\x1b[?2026l");
        assert!(buf.at_mut(9).is_none());
    }

    // ── Reset / release / finalize ──────────────────────────────────────

    #[test]
    fn reset_keeps_capacity() {
        let mut buf = Fbuf::small().unwrap();
        buf.put_bytes(&vec![0xAA; SMALL_CAPACITY * 2]).unwrap();
        let cap = buf.capacity();
        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), cap);
        buf.put_str("new").unwrap();
        assert_eq!(buf.as_bytes(), b"new");
    }

    #[test]
    fn release_is_idempotent() {
        let mut buf = Fbuf::small().unwrap();
        buf.put_str("data").unwrap();
        buf.release();
        assert!(!buf.is_initialized());
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.capacity(), 0);
        buf.release();
        assert!(!buf.is_initialized());
    }

    #[test]
    fn finalize_writes_and_releases() {
        let mut buf = Fbuf::small().unwrap();
        buf.put_str("frame data").unwrap();
        let mut dest = Vec::new();
        assert_eq!(buf.finalize(&mut dest, true).unwrap(), 10);
        assert_eq!(dest, b"frame data");
        assert!(!buf.is_initialized());
    }

    #[test]
    fn finalize_empty_writes_nothing() {
        let mut buf = Fbuf::small().unwrap();
        let mut sink = UnflushableSink::default();
        assert_eq!(buf.finalize(&mut sink, false).unwrap(), 0);
        assert_eq!(sink.writes, 0);
        assert!(!buf.is_initialized());
    }

    #[test]
    fn finalize_failing_sink_releases() {
        let mut buf = Fbuf::small().unwrap();
        buf.put_str("0123456789").unwrap();
        let mut sink = FailingSink {
            accepted: Vec::new(),
            limit: 4,
        };
        let err = buf.finalize(&mut sink, true).unwrap_err();
        assert!(matches!(err, FbufError::SinkWrite(_)));
        assert_eq!(sink.accepted, b"0123");

        // Behaves as an uninitialized buffer from here on.
        assert!(!buf.is_initialized());
        assert_eq!(buf.capacity(), 0);
        assert!(matches!(buf.put_str("x"), Err(FbufError::Uninitialized)));
    }

    #[test]
    fn finalize_flush_failure_reported() {
        let mut buf = Fbuf::small().unwrap();
        buf.put_str("abc").unwrap();
        let mut sink = UnflushableSink::default();
        assert!(matches!(
            buf.finalize(&mut sink, true),
            Err(FbufError::SinkWrite(_))
        ));
        assert_eq!(sink.data, b"abc");
        assert!(!buf.is_initialized());
    }

    #[test]
    fn finalize_without_flush_skips_flush() {
        let mut buf = Fbuf::small().unwrap();
        buf.put_str("abc").unwrap();
        let mut sink = UnflushableSink::default();
        assert_eq!(buf.finalize(&mut sink, false).unwrap(), 3);
        assert_eq!(sink.writes, 1);
    }

    #[test]
    fn finalize_uninitialized_is_ok() {
        let mut buf = Fbuf::new();
        let mut dest = Vec::new();
        assert_eq!(buf.finalize(&mut dest, true).unwrap(), 0);
        assert!(dest.is_empty());
    }

    #[test]
    fn debug_shows_sizes() {
        let buf = Fbuf::small().unwrap();
        let dbg = format!("{buf:?}");
        assert!(dbg.contains("len: 0"));
        assert!(dbg.contains(&format!("capacity: {SMALL_CAPACITY}")));
    }
}
