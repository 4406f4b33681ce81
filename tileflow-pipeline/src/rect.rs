use derive_new::new;

/// An axis-aligned rectangle on the logical pixel grid.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash, new)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn intersect(self, other: Self) -> Option<Self> {
        let lx = self.x.max(other.x);
        let ly = self.y.max(other.y);
        let rx = (self.x + self.w).min(other.x + other.w);
        let ry = (self.y + self.h).min(other.y + other.h);
        if rx <= lx || ry <= ly {
            return None;
        }
        Some(Self::new(lx, ly, rx - lx, ry - ly))
    }

    pub fn contains(self, x: u32, y: u32) -> bool {
        self.x <= x && x < self.x + self.w && self.y <= y && y < self.y + self.h
    }

    pub fn area(self) -> u64 {
        self.w as u64 * self.h as u64
    }

    /// The same rectangle in physical display pixels.
    pub fn scaled(self, scale: u32) -> Self {
        Self::new(self.x * scale, self.y * scale, self.w * scale, self.h * scale)
    }
}
