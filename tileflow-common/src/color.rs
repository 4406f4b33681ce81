#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn gray(level: u8) -> Self {
        Self::new(level, level, level)
    }

    pub const WHITE: Self = Self::new(255, 255, 255);
    pub const BLACK: Self = Self::new(0, 0, 0);
}

/// A color in the display's native packed encoding: 5 bits red,
/// 6 bits green, 5 bits blue.
#[repr(transparent)]
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash, Default)]
pub struct Rgb565(pub u16);

impl Rgb565 {
    pub const fn new(c: Color) -> Self {
        Self(((c.r as u16 & 0xf8) << 8) | ((c.g as u16 & 0xfc) << 3) | (c.b as u16 >> 3))
    }

    /// Expands back to 8-bit channels by bit replication, so that
    /// `Rgb565::new(x.color()) == x` for every encodable value.
    pub const fn color(self) -> Color {
        let r = ((self.0 >> 11) & 0x1f) as u8;
        let g = ((self.0 >> 5) & 0x3f) as u8;
        let b = (self.0 & 0x1f) as u8;
        Color::new((r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2))
    }
}

impl From<Color> for Rgb565 {
    fn from(c: Color) -> Self {
        Self::new(c)
    }
}

impl From<Rgb565> for Color {
    fn from(c: Rgb565) -> Self {
        c.color()
    }
}
