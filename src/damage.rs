/// Hardware can only update the framebuffer in 16 pixel wide columns.
pub const X_ALIGN: i32 = 16;

/// A damaged region in framebuffer pixel coordinates, `x2`/`y2` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageRect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Default for DamageRect {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl DamageRect {
    /// Sentinel with lower bounds above upper bounds. Any union with it
    /// yields the other operand.
    pub const EMPTY: Self = Self {
        x1: i32::MAX,
        y1: i32::MAX,
        x2: 0,
        y2: 0,
    };

    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    /// True for the sentinel and for any zero-area rect.
    pub fn is_empty(&self) -> bool {
        self.x1 >= self.x2 || self.y1 >= self.y2
    }

    pub fn width(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.x2.abs_diff(self.x1)
        }
    }

    pub fn height(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.y2.abs_diff(self.y1)
        }
    }

    /// Bounding box of both rects. An empty operand contributes nothing.
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    /// True if `other` lies entirely inside `self`. Empty rects are
    /// contained by everything.
    pub fn contains(&self, other: &Self) -> bool {
        other.is_empty()
            || (!self.is_empty()
                && self.x1 <= other.x1
                && self.y1 <= other.y1
                && self.x2 >= other.x2
                && self.y2 >= other.y2)
    }

    /// Snap horizontally to 16 pixel columns and clip to the framebuffer.
    ///
    /// `x1` rounds down, `x2` rounds up but never past the framebuffer width
    /// rounded down to 16 (modes like 1366x768 lose their last 6 columns).
    /// Vertical bounds are only clipped. Returns [`DamageRect::EMPTY`] when
    /// nothing remains.
    pub fn align_to_hardware(&self, fb_width: u32, fb_height: u32) -> Self {
        if self.is_empty() {
            return Self::EMPTY;
        }
        let x_limit = align_down(fb_width.min(i32::MAX as u32) as i32);
        let y_limit = fb_height.min(i32::MAX as u32) as i32;

        let x1 = align_down(self.x1.max(0));
        let x2 = align_up(self.x2).min(x_limit);
        let y1 = self.y1.max(0);
        let y2 = self.y2.min(y_limit);

        let aligned = Self { x1, y1, x2, y2 };
        if aligned.is_empty() {
            Self::EMPTY
        } else {
            aligned
        }
    }
}

fn align_down(v: i32) -> i32 {
    v - v.rem_euclid(X_ALIGN)
}

fn align_up(v: i32) -> i32 {
    align_down(v.saturating_add(X_ALIGN - 1))
}
