//! Integer pixel rectangles (top-left origin, half-open).

use glam::{IVec2, UVec2};

/// Axis-aligned pixel rectangle covering `[min, max)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub min: IVec2,
    pub max: IVec2,
}

impl Rect {
    /// Create a rectangle from two corners, normalizing their order.
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self {
            min: IVec2::new(x0.min(x1), y0.min(y1)),
            max: IVec2::new(x0.max(x1), y0.max(y1)),
        }
    }

    /// Rectangle at the origin with the given size.
    pub fn from_size(size: UVec2) -> Self {
        Self {
            min: IVec2::ZERO,
            max: size.as_ivec2(),
        }
    }

    /// Rectangle at `origin` with the given size.
    pub fn from_origin_size(origin: IVec2, size: UVec2) -> Self {
        Self {
            min: origin,
            max: origin + size.as_ivec2(),
        }
    }

    pub fn width(&self) -> u32 {
        (self.max.x - self.min.x).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.max.y - self.min.y).max(0) as u32
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width(), self.height())
    }

    /// Number of pixels covered.
    pub fn area(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.min.x >= self.max.x || self.min.y >= self.max.y
    }

    /// Half-open point containment.
    pub fn contains(&self, p: IVec2) -> bool {
        p.x >= self.min.x && p.y >= self.min.y && p.x < self.max.x && p.y < self.max.y
    }

    /// Whether `other` lies entirely inside this rectangle.
    ///
    /// An empty `other` is contained by any rectangle.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.is_empty()
            || (other.min.x >= self.min.x
                && other.min.y >= self.min.y
                && other.max.x <= self.max.x
                && other.max.y <= self.max.y)
    }

    /// Intersection of two rectangles; empty when they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let r = Rect {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        };
        if r.is_empty() { Rect::default() } else { r }
    }

    pub fn translate(&self, offset: IVec2) -> Rect {
        Rect {
            min: self.min + offset,
            max: self.max + offset,
        }
    }
}
