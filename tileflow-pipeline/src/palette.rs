//! The active color lookup table. Written by the producer, snapshotted by
//! the presentation task. The table is small and the copy bounded, so a
//! short spin critical section stands in for a blocking lock; the change
//! flag spares the consumer an unconditional per-frame copy.

use core::sync::atomic::{AtomicBool, Ordering};
use log::debug;
use spin::Mutex;
use tileflow_common::color::{Color, Rgb565};
use tileflow_common::mode::PixelDepth;

pub const PALETTE_SIZE: usize = 256;

/// The classic 16-color table installed for 4-bit depth.
const DEFAULT_16: [Color; 16] = [
    Color::new(0xff, 0xff, 0xff), // white
    Color::new(0xfb, 0xf3, 0x05), // yellow
    Color::new(0xff, 0x64, 0x03), // orange
    Color::new(0xdd, 0x09, 0x07), // red
    Color::new(0xf2, 0x08, 0x84), // magenta
    Color::new(0x47, 0x00, 0xa5), // purple
    Color::new(0x00, 0x00, 0xd3), // blue
    Color::new(0x02, 0xab, 0xea), // cyan
    Color::new(0x1f, 0xb7, 0x14), // green
    Color::new(0x00, 0x64, 0x12), // dark green
    Color::new(0x56, 0x2c, 0x05), // brown
    Color::new(0x90, 0x71, 0x3a), // tan
    Color::new(0xc0, 0xc0, 0xc0), // light gray
    Color::new(0x80, 0x80, 0x80), // medium gray
    Color::new(0x40, 0x40, 0x40), // dark gray
    Color::new(0x00, 0x00, 0x00), // black
];

pub struct PaletteStore {
    table: Mutex<[Rgb565; PALETTE_SIZE]>,
    changed: AtomicBool,
}

impl PaletteStore {
    pub const fn new() -> Self {
        Self {
            table: Mutex::new([Rgb565(0); PALETTE_SIZE]),
            changed: AtomicBool::new(true),
        }
    }

    /// Overwrites entries starting at `first`, converting each to the native
    /// encoding. Entries beyond index 255 are discarded. Any call flags a
    /// pending full redraw: every already-drawn pixel's effective color is
    /// stale even though its index did not change.
    pub fn set_entries(&self, first: usize, entries: impl IntoIterator<Item = Color>) {
        if first >= PALETTE_SIZE {
            return;
        }
        {
            let mut table = self.table.lock();
            for (slot, color) in table[first..].iter_mut().zip(entries) {
                *slot = Rgb565::new(color);
            }
        }
        self.changed.store(true, Ordering::Release);
    }

    /// Installs the depth-appropriate default table. Index 0 maps to the
    /// lightest shade at 1/2/4-bit (inverted monochrome convention); 8-bit
    /// gets a 6x6x6 color cube followed by a descending gray ramp.
    pub fn install_defaults(&self, depth: PixelDepth) {
        debug!("palette: installing {:?} defaults", depth);
        match depth {
            PixelDepth::Bpp1 => self.set_entries(0, [Color::WHITE, Color::BLACK]),
            PixelDepth::Bpp2 => {
                self.set_entries(0, (0u8..4).map(|i| Color::gray(255 - i * 85)))
            }
            PixelDepth::Bpp4 => self.set_entries(0, DEFAULT_16),
            PixelDepth::Bpp8 => self.set_entries(0, (0..=255).map(default_8bit_entry)),
        }
    }

    /// Copies the table into `out` only when it changed since the last
    /// snapshot, then clears the flag. Returns whether a copy happened.
    pub fn snapshot_if_changed(&self, out: &mut [Rgb565; PALETTE_SIZE]) -> bool {
        if !self.changed.swap(false, Ordering::AcqRel) {
            return false;
        }
        out.copy_from_slice(&*self.table.lock());
        true
    }
}

/// Entry `i` of the 8-bit default: indices 0..216 are a 6x6x6 cube with the
/// lightest corner first, 216..256 a gray ramp from near-white down to black
/// at 255.
fn default_8bit_entry(i: usize) -> Color {
    if i < 216 {
        let r = 255 - 51 * (i / 36) as u8;
        let g = 255 - 51 * ((i / 6) % 6) as u8;
        let b = 255 - 51 * (i % 6) as u8;
        Color::new(r, g, b)
    } else {
        let step = (i - 216) as u16;
        Color::gray((255 - step * 255 / 39) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_only_when_changed() {
        let store = PaletteStore::new();
        let mut out = [Rgb565(0xffff); PALETTE_SIZE];

        // Fresh store counts as changed (all-zero table must be observable).
        assert!(store.snapshot_if_changed(&mut out));
        assert_eq!(out[0], Rgb565(0));
        assert!(!store.snapshot_if_changed(&mut out));

        store.set_entries(2, [Color::new(255, 0, 0)]);
        assert!(store.snapshot_if_changed(&mut out));
        assert_eq!(out[2], Rgb565::new(Color::new(255, 0, 0)));
        assert!(!store.snapshot_if_changed(&mut out));
    }

    #[test]
    fn sub_range_updates_leave_rest_alone() {
        let store = PaletteStore::new();
        store.install_defaults(PixelDepth::Bpp4);
        store.set_entries(3, [Color::BLACK, Color::BLACK]);

        let mut out = [Rgb565(0); PALETTE_SIZE];
        assert!(store.snapshot_if_changed(&mut out));
        assert_eq!(out[0], Rgb565::new(Color::WHITE));
        assert_eq!(out[3], Rgb565::new(Color::BLACK));
        assert_eq!(out[4], Rgb565::new(Color::BLACK));
        assert_eq!(out[5], Rgb565::new(DEFAULT_16[5]));
    }

    #[test]
    fn defaults_follow_inverted_convention() {
        let store = PaletteStore::new();
        let mut out = [Rgb565(0); PALETTE_SIZE];

        store.install_defaults(PixelDepth::Bpp1);
        store.snapshot_if_changed(&mut out);
        assert_eq!(out[0], Rgb565::new(Color::WHITE));
        assert_eq!(out[1], Rgb565::new(Color::BLACK));

        store.install_defaults(PixelDepth::Bpp2);
        store.snapshot_if_changed(&mut out);
        assert_eq!(out[0], Rgb565::new(Color::WHITE));
        assert_eq!(out[3], Rgb565::new(Color::gray(0)));

        store.install_defaults(PixelDepth::Bpp8);
        store.snapshot_if_changed(&mut out);
        assert_eq!(out[0], Rgb565::new(Color::WHITE));
        assert_eq!(out[215], Rgb565::new(Color::gray(0)));
        assert_eq!(out[255], Rgb565::new(Color::BLACK));
    }

    #[test]
    fn entries_beyond_the_table_are_discarded() {
        let store = PaletteStore::new();
        store.set_entries(255, [Color::WHITE, Color::BLACK, Color::WHITE]);
        store.set_entries(400, [Color::WHITE]);
        let mut out = [Rgb565(0); PALETTE_SIZE];
        store.snapshot_if_changed(&mut out);
        assert_eq!(out[255], Rgb565::new(Color::WHITE));
    }

    #[test]
    fn native_round_trip_is_stable() {
        // Converting to the native encoding and back reproduces the same
        // quantization as converting directly.
        for r in (0..=255).step_by(5) {
            for g in (0..=255).step_by(7) {
                for b in (0..=255).step_by(11) {
                    let c = Color::new(r as u8, g as u8, b as u8);
                    let native = Rgb565::new(c);
                    assert_eq!(Rgb565::new(native.color()), native);
                }
            }
        }
    }
}
