//! Decoding of packed sub-byte pixel encodings to 8-bit index values.
//! Pixels are packed most-significant-bit (or nibble) first; 8-bit depth is
//! an identity copy. Inputs are pre-validated by the caller against the
//! current video mode.

use tileflow_common::mode::PixelDepth;

/// Decodes `count` pixels of `row` starting at pixel column `first`,
/// writing one index byte per pixel into `out`.
pub fn unpack_row(row: &[u8], depth: PixelDepth, first: usize, count: usize, out: &mut [u8]) {
    debug_assert!(count <= out.len());
    match depth {
        PixelDepth::Bpp8 => out[..count].copy_from_slice(&row[first..first + count]),
        _ => {
            for (i, slot) in out.iter_mut().take(count).enumerate() {
                *slot = index_at(row, depth, first + i);
            }
        }
    }
}

/// Random access to a single pixel's index within a packed row.
pub fn index_at(row: &[u8], depth: PixelDepth, x: usize) -> u8 {
    let bits = depth.bits() as usize;
    let byte = row[x * bits / 8];
    match depth {
        PixelDepth::Bpp1 => (byte >> (7 - (x & 7))) & 0x01,
        PixelDepth::Bpp2 => (byte >> (6 - 2 * (x & 3))) & 0x03,
        PixelDepth::Bpp4 => (byte >> (4 - 4 * (x & 1))) & 0x0f,
        PixelDepth::Bpp8 => byte,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msb_first_1bpp() {
        // 0b1010_0001: pixels 0,2 and 7 set
        let row = [0xa1];
        let expected = [1, 0, 1, 0, 0, 0, 0, 1];
        for (x, e) in expected.iter().enumerate() {
            assert_eq!(index_at(&row, PixelDepth::Bpp1, x), *e);
        }
    }

    #[test]
    fn msb_first_2bpp() {
        // 0b11_00_10_01
        let row = [0xc9];
        assert_eq!(index_at(&row, PixelDepth::Bpp2, 0), 3);
        assert_eq!(index_at(&row, PixelDepth::Bpp2, 1), 0);
        assert_eq!(index_at(&row, PixelDepth::Bpp2, 2), 2);
        assert_eq!(index_at(&row, PixelDepth::Bpp2, 3), 1);
    }

    #[test]
    fn high_nibble_first_4bpp() {
        let row = [0x5f, 0x30];
        assert_eq!(index_at(&row, PixelDepth::Bpp4, 0), 0x5);
        assert_eq!(index_at(&row, PixelDepth::Bpp4, 1), 0xf);
        assert_eq!(index_at(&row, PixelDepth::Bpp4, 2), 0x3);
        assert_eq!(index_at(&row, PixelDepth::Bpp4, 3), 0x0);
    }

    #[test]
    fn unpack_is_identity_at_8bpp() {
        let row = [9, 8, 7, 6];
        let mut out = [0u8; 3];
        unpack_row(&row, PixelDepth::Bpp8, 1, 3, &mut out);
        assert_eq!(out, [8, 7, 6]);
    }

    #[test]
    fn unpack_unaligned_start() {
        // Starting mid-byte must still decode MSB-first positions.
        let row = [0b0110_1001, 0b1100_0000];
        let mut out = [0u8; 5];
        unpack_row(&row, PixelDepth::Bpp1, 3, 5, &mut out);
        assert_eq!(out, [0, 1, 0, 0, 1]);
    }
}
