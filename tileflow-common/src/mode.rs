/// Bits per pixel of the indexed frame buffer. Sub-byte depths are packed
/// most-significant-bit first, multiple pixels per byte.
#[repr(u8)]
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash)]
pub enum PixelDepth {
    Bpp1 = 1,
    Bpp2 = 2,
    Bpp4 = 4,
    Bpp8 = 8,
}

impl PixelDepth {
    pub const fn bits(self) -> u32 {
        self as u32
    }

    pub const fn pixels_per_byte(self) -> u32 {
        8 / self.bits()
    }

    pub const fn color_count(self) -> usize {
        1 << self.bits()
    }

    /// Minimum bytes needed to hold `width` pixels, rounded up to a whole byte.
    pub const fn packed_row_bytes(self, width: u32) -> u32 {
        (width * self.bits() + 7) / 8
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub struct VideoMode {
    pub width: u32,
    pub height: u32,
    pub depth: PixelDepth,
    pub bytes_per_row: u32,
}

impl VideoMode {
    pub const fn new(width: u32, height: u32, depth: PixelDepth, bytes_per_row: u32) -> Self {
        Self {
            width,
            height,
            depth,
            bytes_per_row,
        }
    }

    /// A mode with no row padding.
    pub const fn packed(width: u32, height: u32, depth: PixelDepth) -> Self {
        Self::new(width, height, depth, depth.packed_row_bytes(width))
    }

    pub const fn frame_bytes(&self) -> usize {
        self.bytes_per_row as usize * self.height as usize
    }

    /// `bytes_per_row` must always be able to hold a full row of pixels.
    pub const fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.bytes_per_row >= self.depth.packed_row_bytes(self.width)
    }
}
