// SPDX-License-Identifier: MIT
//
// Bounded formatting targets.
//
// `Window` formats directly into a fixed slice of spare capacity and refuses
// to write past its end, remembering that it ran out of room so the caller
// can tell "didn't fit" apart from a `Display` impl that failed on its own.
// `measure` runs the same formatting against a byte counter to learn the
// exact size before a second, correctly sized attempt.

use std::fmt;

/// A `fmt::Write` target over a fixed byte slice.
pub struct Window<'a> {
    buf: &'a mut [u8],
    pos: usize,
    overflowed: bool,
}

impl<'a> Window<'a> {
    #[inline]
    pub const fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            overflowed: false,
        }
    }

    /// Bytes written so far.
    #[inline]
    pub const fn written(&self) -> usize {
        self.pos
    }

    /// Whether a write was refused for lack of room.
    #[inline]
    pub const fn overflowed(&self) -> bool {
        self.overflowed
    }
}

impl fmt::Write for Window<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.pos.saturating_add(s.len());
        let Some(dst) = self.buf.get_mut(self.pos..end) else {
            self.overflowed = true;
            return Err(fmt::Error);
        };
        dst.copy_from_slice(s.as_bytes());
        self.pos = end;
        Ok(())
    }
}

/// Counts bytes without storing them.
struct Counter(usize);

impl fmt::Write for Counter {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0 = self.0.checked_add(s.len()).ok_or(fmt::Error)?;
        Ok(())
    }
}

/// Exact number of bytes `args` formats to.
pub fn measure(args: fmt::Arguments<'_>) -> Result<usize, fmt::Error> {
    let mut counter = Counter(0);
    fmt::write(&mut counter, args)?;
    Ok(counter.0)
}
