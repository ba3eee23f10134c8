//! Integer geometry used for buffer sizes, damage and window bounds.
//!
//! Window bounds are kept in pixels; DIP conversions go through
//! [`Rect::scale_to_rounded`], which rounds each edge like the compositor
//! does so that a pixel→DIP→pixel trip at the same scale is stable.

/// Width and height of a buffer or window, in pixels unless noted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Number of pixels, or `None` when empty or overflowing.
    pub fn area(&self) -> Option<u64> {
        if self.is_empty() {
            return None;
        }
        (self.width as u64).checked_mul(self.height as u64)
    }
}

/// An axis-aligned rectangle in integer coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Checks if this rectangle intersects another one
    pub fn intersects(&self, other: &Rect) -> bool {
        !(self.right() <= other.x
            || other.right() <= self.x
            || self.bottom() <= other.y
            || other.bottom() <= self.y)
    }

    /// Returns the overlapping area, `None` if the rectangles do not touch.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.intersects(other) {
            return None;
        }
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        Some(Rect::new(x1, y1, x2 - x1, y2 - y1))
    }

    /// Scales every edge and rounds to the nearest integer.
    pub fn scale_to_rounded(&self, scale: f32) -> Rect {
        let x1 = (self.x as f32 * scale).round() as i32;
        let y1 = (self.y as f32 * scale).round() as i32;
        let x2 = (self.right() as f32 * scale).round() as i32;
        let y2 = (self.bottom() as f32 * scale).round() as i32;
        Rect::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn with_origin(&self, x: i32, y: i32) -> Rect {
        Rect::new(x, y, self.width, self.height)
    }
}

/// Translates `child` (in the same space as `parent`) into coordinates local
/// to `parent`'s surface. Wayland does not share global coordinates with
/// clients, so subsurfaces and popups are always placed this way.
pub fn translate_bounds_to_parent_coordinates(child: Rect, parent: Rect) -> Rect {
    child.with_origin(child.x - parent.x, child.y - parent.y)
}

/// Inverse of [`translate_bounds_to_parent_coordinates`].
pub fn translate_bounds_to_top_level_coordinates(child: Rect, parent: Rect) -> Rect {
    child.with_origin(child.x + parent.x, child.y + parent.y)
}
