// SPDX-License-Identifier: MIT
//
// n-fbuf demo — stage a colored frame and hand it to the terminal in one write.
//
// A thin stand-in for n-term's renderer: it emits cursor moves and 24-bit SGR
// colors into a standard buffer, reuses the buffer across frames with
// reset(), and finalizes the last one to stdout. Set RUST_LOG=debug to watch
// the region being allocated and grown on stderr.
//
// Usage:
//   cargo run -p n-fbuf --example frame

use std::io;

use n_fbuf::{Fbuf, FbufError};
use tracing_subscriber::EnvFilter;

const WIDTH: u16 = 48;
const HEIGHT: u16 = 12;
const FRAMES: u16 = 3;

/// Capabilities the terminal may or may not advertise.
struct Caps {
    hide_cursor: Option<&'static [u8]>,
    show_cursor: Option<&'static [u8]>,
    sync_begin: Option<&'static [u8]>,
    sync_end: Option<&'static [u8]>,
}

const CAPS: Caps = Caps {
    hide_cursor: Some(b"\x1b[?25l"),
    show_cursor: Some(b"\x1b[?25h"),
    sync_begin: Some(b"\x1b[?2026h"),
    sync_end: Some(b"\x1b[?2026l"),
};

/// Move the cursor to a 0-indexed cell.
fn cursor_to(buf: &mut Fbuf, x: u16, y: u16) -> Result<(), FbufError> {
    buf.put_fmt(format_args!("\x1b[{};{}H", y + 1, x + 1))?;
    Ok(())
}

/// Set a 24-bit background color.
fn bg(buf: &mut Fbuf, r: u8, g: u8, b: u8) -> Result<(), FbufError> {
    buf.put_bytes(b"\x1b[48;2;")?;
    buf.put_int(i64::from(r))?;
    buf.put_byte(b';')?;
    buf.put_int(i64::from(g))?;
    buf.put_byte(b';')?;
    buf.put_int(i64::from(b))?;
    buf.put_byte(b'm')?;
    Ok(())
}

/// Paint one frame: a gradient block with a caption.
fn paint(buf: &mut Fbuf, frame: u16) -> Result<(), FbufError> {
    buf.emit(CAPS.sync_begin)?;
    buf.emit(CAPS.hide_cursor)?;
    for y in 0..HEIGHT {
        cursor_to(buf, 0, y)?;
        for x in 0..WIDTH {
            let r = u8::try_from(u32::from(x) * 255 / u32::from(WIDTH)).unwrap_or(u8::MAX);
            let g = u8::try_from(u32::from(y) * 255 / u32::from(HEIGHT)).unwrap_or(u8::MAX);
            let b = u8::try_from(u32::from(frame) * 255 / u32::from(FRAMES)).unwrap_or(u8::MAX);
            bg(buf, r, g, b)?;
            buf.put_char(' ')?;
        }
    }
    buf.put_str("\x1b[0m")?;
    cursor_to(buf, 0, HEIGHT)?;
    let staged = buf.len();
    buf.put_fmt(format_args!("frame {frame}: {staged} bytes staged"))?;
    buf.emit(CAPS.show_cursor)?;
    buf.emit(CAPS.sync_end)?;
    buf.put_str("\r\n")?;
    Ok(())
}

fn main() -> Result<(), FbufError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let mut buf = Fbuf::standard()?;
    tracing::info!(strategy = ?buf.strategy(), capacity = buf.capacity(), "buffer ready");

    for frame in 0..FRAMES {
        buf.reset();
        paint(&mut buf, frame)?;
    }

    let written = buf.finalize(&mut io::stdout().lock(), true)?;
    tracing::info!(written, "frame flushed");
    Ok(())
}
