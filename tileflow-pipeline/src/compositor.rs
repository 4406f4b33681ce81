//! Tile snapshot and color composition.
//!
//! A tile is first copied (and, for packed depths, decoded) out of the live
//! frame buffer into a scratch buffer, row by row. The color-conversion pass
//! then reads this frozen block instead of re-reading the live buffer while
//! the producer may be writing nearby bytes; a tile may still interleave old
//! and new pixel generations across tile boundaries, but never mid-pixel and
//! never within one conversion pass.

use crate::pixel;
use crate::rect::Rect;
use crate::tile::TILE_CANDIDATES;
use alloc::vec::Vec;
use core::ptr;
use static_assertions::assert_eq_size;
use tileflow_common::color::Rgb565;
use tileflow_common::display::DisplayController;
use tileflow_common::mode::VideoMode;

assert_eq_size!(Rgb565, u16);

/// Rows per band in the streaming full-frame path.
pub const STREAM_BAND_ROWS: u32 = 8;

/// Bytes needed for one tile row's packed pixels: the largest tile edge at
/// 8 bits per pixel, plus a byte for a sub-byte-depth boundary straddle.
const SNAPSHOT_ROW_BYTES: usize = TILE_CANDIDATES[0] as usize + 1;

/// A raw view of the producer-owned frame memory. Reads go through
/// `ptr::copy_nonoverlapping`, never through a reference into the buffer:
/// the producer may be writing the same bytes concurrently, and forming a
/// `&[u8]` over memory mutated through another pointer is undefined
/// behavior regardless of the byte-atomicity assumption.
#[derive(Clone, Copy)]
pub struct FrameView {
    base: *const u8,
    len: usize,
}

impl FrameView {
    /// Caller guarantees `base..base + len` stays allocated for as long as
    /// the view is read from, and that all writes to it go through raw
    /// pointers.
    pub unsafe fn new(base: *const u8, len: usize) -> Self {
        Self { base, len }
    }

    /// Copies `out.len()` bytes starting at `offset`. A byte racing a
    /// producer write lands as either the old or the new value.
    fn read(&self, offset: usize, out: &mut [u8]) {
        debug_assert!(offset + out.len() <= self.len);
        unsafe { ptr::copy_nonoverlapping(self.base.add(offset), out.as_mut_ptr(), out.len()) };
    }
}

/// Copies one tile's pixels out of the frame buffer as 8-bit indices,
/// decoding packed depths. `out` receives `rect.w * rect.h` bytes.
pub fn snapshot_tile(fb: FrameView, mode: &VideoMode, rect: Rect, out: &mut [u8]) {
    let bpr = mode.bytes_per_row as usize;
    let w = rect.w as usize;
    let bits = mode.depth.bits() as usize;
    let ppb = mode.depth.pixels_per_byte() as usize;
    let first_byte = rect.x as usize * bits / 8;
    let end_byte = ((rect.x as usize + w) * bits + 7) / 8;
    let first = rect.x as usize - first_byte * ppb;
    let mut row = [0u8; SNAPSHOT_ROW_BYTES];
    let row = &mut row[..end_byte - first_byte];
    debug_assert!(out.len() >= w * rect.h as usize);
    for dy in 0..rect.h as usize {
        fb.read((rect.y as usize + dy) * bpr + first_byte, row);
        pixel::unpack_row(row, mode.depth, first, w, &mut out[dy * w..]);
    }
}

/// Maps a snapshot of `w` x `h` indices through the palette and replicates
/// each source pixel into a `scale` x `scale` block. `out` receives
/// `(w * scale) * (h * scale)` native pixels, row-major.
pub fn render_block(
    snapshot: &[u8],
    palette: &[Rgb565; 256],
    w: usize,
    h: usize,
    scale: usize,
    out: &mut [Rgb565],
) {
    let out_w = w * scale;
    for sy in 0..h {
        let src = &snapshot[sy * w..][..w];
        let first = sy * scale * out_w;
        {
            let row = &mut out[first..][..out_w];
            for (sx, index) in src.iter().enumerate() {
                let native = palette[*index as usize];
                row[sx * scale..(sx + 1) * scale].fill(native);
            }
        }
        // Replicate the finished row for the remaining scale - 1 output rows.
        for r in 1..scale {
            out.copy_within(first..first + out_w, first + r * out_w);
        }
    }
}

/// Two pixel buffers whose roles alternate each transfer: one is being
/// composed into while the other is in flight. The swap happens only after
/// the caller has waited for the in-flight transfer to retire.
pub struct DoublePixelBuffer {
    bufs: [Vec<Rgb565>; 2],
    active: usize,
}

impl DoublePixelBuffer {
    pub fn new() -> Self {
        Self {
            bufs: [Vec::new(), Vec::new()],
            active: 0,
        }
    }

    pub fn resize(&mut self, len: usize) {
        for buf in &mut self.bufs {
            buf.clear();
            buf.resize(len, Rgb565(0));
        }
    }

    /// The buffer currently owned for composing.
    pub fn compose(&mut self) -> &mut [Rgb565] {
        &mut self.bufs[self.active]
    }

    /// Swaps the composing and transferring roles.
    pub fn flip(&mut self) {
        self.active ^= 1;
    }
}

impl Default for DoublePixelBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Full-frame fallback: converts and upscales a small band of rows at a
/// time, overlapping the composition of each band with the transfer of the
/// previous one. Avoids a full-frame staging allocation.
pub fn render_full_streaming(
    fb: FrameView,
    mode: &VideoMode,
    palette: &[Rgb565; 256],
    scale: u32,
    bufs: &mut DoublePixelBuffer,
    row_bytes: &mut [u8],
    row_indices: &mut [u8],
    ctrl: &mut dyn DisplayController,
) {
    let width = mode.width as usize;
    let out_w = width * scale as usize;
    let bpr = mode.bytes_per_row as usize;
    let row_bytes = &mut row_bytes[..bpr];
    bufs.resize(out_w * (STREAM_BAND_ROWS * scale) as usize);

    let mut y = 0;
    while y < mode.height {
        let rows = STREAM_BAND_ROWS.min(mode.height - y);
        {
            let band = bufs.compose();
            for dy in 0..rows as usize {
                fb.read((y as usize + dy) * bpr, row_bytes);
                pixel::unpack_row(row_bytes, mode.depth, 0, width, row_indices);
                render_block(
                    &row_indices[..width],
                    palette,
                    width,
                    1,
                    scale as usize,
                    &mut band[dy * out_w * scale as usize..][..out_w * scale as usize],
                );
            }
        }
        // The previous band must retire before its buffer is reused; waiting
        // here also orders the controller's window updates.
        ctrl.wait_transfer_complete();
        ctrl.set_transfer_window(0, y * scale, out_w as u32, rows * scale);
        ctrl.write_pixel_block_async(&bufs.compose()[..out_w * (rows * scale) as usize]);
        bufs.flip();
        y += rows;
    }
    ctrl.wait_transfer_complete();
}
