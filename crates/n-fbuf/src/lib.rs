// SPDX-License-Identifier: MIT
//
// n-fbuf — the output buffer underneath n-term's rendering.
//
// Every byte a frame sends to the terminal (cursor moves, SGR sequences,
// the characters themselves) is staged here first and leaves in a single
// write. The buffer is binary-safe, never NUL-terminated, and grows by
// doubling. Its memory comes straight from the kernel as an anonymous
// mapping, backed by a 2 MiB huge page when the system has them, so a
// full-screen repaint costs one page fault instead of five hundred and grows
// with mremap instead of a copy.
//
// Nothing here is thread-safe. One writer owns one buffer.

pub mod buffer;
pub mod error;
pub mod region;
pub mod size;
mod window;

pub use buffer::Fbuf;
pub use error::{FbufError, Result};
pub use region::Strategy;
pub use size::SizeClass;
