// SPDX-License-Identifier: MIT
//
// Size classes and the sizing constants behind them.
//
// The size class is the only knob a caller turns. `Small` is for short,
// transient output (a status line, a single escape burst). `Standard` is for
// whole frames: it starts at one huge-page unit so a typical full-screen
// repaint never grows, and so the region can be backed by a single 2 MiB
// page where the kernel allows it.

/// The stdio buffering unit (`BUFSIZ` on glibc, `BufWriter`'s default).
const BUFSIZ: usize = 8192;

/// Initial capacity of a [`SizeClass::Small`] buffer: the larger of one
/// 4 KiB page and `BUFSIZ`.
pub const SMALL_CAPACITY: usize = if 4096 > BUFSIZ { 4096 } else { BUFSIZ };

/// Initial capacity of a [`SizeClass::Standard`] buffer: 2 MiB, the huge page
/// size on x86-64, x86+PAE, ARMv7+LPAE and ARMv8.
pub const STANDARD_CAPACITY: usize = 0x20_0000;

/// Bytes reserved before formatting an `i64`: 19 digits plus a sign.
pub const INT_HEADROOM: usize = 20;

/// Bytes reserved before a formatted append's first attempt.
pub const FORMAT_HEADROOM: usize = BUFSIZ;

/// Capacity only doubles while it is at or below this value, so doubling can
/// never overflow `usize`.
pub const GROWTH_CEILING: usize = usize::MAX / 2;

/// Initial reservation policy, chosen at init time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SizeClass {
    /// A few KiB, sized to the platform's I/O buffering unit.
    Small,
    /// One huge-page unit (2 MiB).
    #[default]
    Standard,
}

impl SizeClass {
    /// Select a class from a "should this be small?" flag.
    #[inline]
    #[must_use]
    pub const fn from_small(small: bool) -> Self {
        if small { Self::Small } else { Self::Standard }
    }

    /// Bytes reserved when a buffer of this class is initialized.
    #[inline]
    #[must_use]
    pub const fn initial_capacity(self) -> usize {
        match self {
            Self::Small => SMALL_CAPACITY,
            Self::Standard => STANDARD_CAPACITY,
        }
    }
}
