//! CPU-side pixel buffers.

use crate::error::{DriverError, Result};
use glam::{IVec2, UVec2};
use image::{Rgba, RgbaImage};
use pane_gl::{BYTES_PER_PIXEL, Color, Rect};

/// A premultiplied RGBA8 image in system memory.
///
/// Buffers are the staging area for texture uploads. They are created by
/// [`Screen::new_buffer`](crate::Screen::new_buffer) and never touch a
/// rendering context themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    image: RgbaImage,
}

impl Buffer {
    pub(crate) fn new(size: UVec2) -> Self {
        Self {
            image: RgbaImage::new(size.x, size.y),
        }
    }

    /// Wrap an existing image. Its pixels must already be premultiplied.
    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.image.width(), self.image.height())
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.size())
    }

    pub fn rgba(&self) -> &RgbaImage {
        &self.image
    }

    pub fn rgba_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn pixel(&self, p: IVec2) -> Option<Color> {
        self.bounds()
            .contains(p)
            .then(|| Color::from_rgba8(self.image.get_pixel(p.x as u32, p.y as u32).0))
    }

    pub fn set_pixel(&mut self, p: IVec2, color: Color) {
        if self.bounds().contains(p) {
            self.image.put_pixel(p.x as u32, p.y as u32, Rgba(color.to_rgba8()));
        }
    }

    /// Overwrite the part of `rect` inside the buffer with `color`.
    pub fn fill(&mut self, rect: Rect, color: Color) {
        let rect = rect.intersect(&self.bounds());
        let px = Rgba(color.to_rgba8());
        for y in rect.min.y..rect.max.y {
            for x in rect.min.x..rect.max.x {
                self.image.put_pixel(x as u32, y as u32, px);
            }
        }
    }

    /// Tightly packed rows of `rect`, top to bottom.
    pub fn region_bytes(&self, rect: Rect) -> Result<Vec<u8>> {
        if !self.bounds().contains_rect(&rect) {
            return Err(DriverError::InvalidRegion {
                region: rect,
                bounds: self.bounds(),
            });
        }
        if rect.is_empty() {
            return Ok(Vec::new());
        }

        let stride = self.image.width() as usize * BYTES_PER_PIXEL;
        let row_len = rect.width() as usize * BYTES_PER_PIXEL;
        let raw = self.image.as_raw();
        let mut out = Vec::with_capacity(rect.area() * BYTES_PER_PIXEL);
        for y in rect.min.y..rect.max.y {
            let start = y as usize * stride + rect.min.x as usize * BYTES_PER_PIXEL;
            out.extend_from_slice(&raw[start..start + row_len]);
        }
        Ok(out)
    }

    /// Release the buffer's memory.
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_transparent() {
        let buf = Buffer::new(UVec2::new(3, 2));
        assert_eq!(buf.size(), UVec2::new(3, 2));
        assert!(buf.rgba().pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn test_zero_sized_buffer() {
        let buf = Buffer::new(UVec2::ZERO);
        assert!(buf.bounds().is_empty());
        assert!(buf.region_bytes(Rect::default()).unwrap().is_empty());
    }

    #[test]
    fn test_fill_clips_to_bounds() {
        let mut buf = Buffer::new(UVec2::new(4, 4));
        buf.fill(Rect::new(2, 2, 10, 10), Color::RED);

        assert_eq!(buf.pixel(IVec2::new(3, 3)), Some(Color::RED));
        assert_eq!(buf.pixel(IVec2::new(1, 1)), Some(Color::TRANSPARENT));
        assert_eq!(buf.pixel(IVec2::new(4, 4)), None);
    }

    #[test]
    fn test_region_bytes_rows() {
        let mut buf = Buffer::new(UVec2::new(3, 3));
        buf.set_pixel(IVec2::new(1, 1), Color::WHITE);
        buf.set_pixel(IVec2::new(2, 2), Color::RED);

        let bytes = buf.region_bytes(Rect::new(1, 1, 3, 3)).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &[255, 255, 255, 255]);
        assert_eq!(&bytes[12..16], &[255, 0, 0, 255]);

        assert!(matches!(
            buf.region_bytes(Rect::new(2, 2, 4, 3)),
            Err(DriverError::InvalidRegion { .. })
        ));
    }
}
