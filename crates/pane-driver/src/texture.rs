//! GPU textures.

use crate::buffer::Buffer;
use crate::draw::{self, DrawOp};
use crate::error::{DriverError, Result};
use crate::gl_mutex::{ContextId, ContextMutex, GlContext, Locked};
use glam::{Affine2, IVec2, UVec2};
use pane_gl::{BYTES_PER_PIXEL, Filter, Rect, RenderingContext, TexParam, TextureId, Wrap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// A texture on one window's rendering context.
///
/// Every operation runs as a single sequence under the context mutex.
/// The texture lives until [`Texture::release`] is called; dropping the
/// handle without releasing it leaks the GPU object.
pub struct Texture {
    id: TextureId,
    size: UVec2,
    ctx: GlContext,
    mutex: Arc<ContextMutex>,
}

impl Texture {
    pub(crate) fn create(mutex: Arc<ContextMutex>, ctx: GlContext, size: UVec2) -> Result<Self> {
        if size.x == 0 || size.y == 0 {
            return Err(DriverError::InvalidSize {
                width: size.x,
                height: size.y,
            });
        }

        let id = mutex.with(&ctx, |locked| allocate(locked, size))?;
        debug!(
            texture = %id,
            context_id = %ctx.id(),
            width = size.x,
            height = size.y,
            "Created texture"
        );

        Ok(Self {
            id,
            size,
            ctx,
            mutex,
        })
    }

    /// Create a texture on a context the caller has already locked.
    pub(crate) fn create_locked(
        locked: &mut Locked<'_>,
        mutex: Arc<ContextMutex>,
        size: UVec2,
    ) -> Result<Self> {
        let id = allocate(locked, size)?;
        Ok(Self {
            id,
            size,
            ctx: locked.context().clone(),
            mutex,
        })
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.size)
    }

    /// The context the texture lives on.
    pub fn context_id(&self) -> ContextId {
        self.ctx.id()
    }

    /// Copy the `sr` part of `src` into the texture with its top-left corner at `dp`.
    ///
    /// `sr` is clipped to the buffer; the destination must fit the texture.
    pub fn upload(&self, dp: IVec2, src: &Buffer, sr: Rect) -> Result<()> {
        let (dst, pixels) = self.stage(dp, src, sr)?;
        if dst.is_empty() {
            return Ok(());
        }
        self.mutex
            .with(&self.ctx, |locked| self.write_locked(locked.gl(), dst, &pixels))
    }

    /// Replace `region` with tightly packed premultiplied RGBA8 rows.
    pub fn upload_pixels(&self, region: Rect, pixels: &[u8]) -> Result<()> {
        self.check_region(region)?;
        let expected = region.area() * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(DriverError::PixelLength {
                expected,
                actual: pixels.len(),
            });
        }
        if region.is_empty() {
            return Ok(());
        }
        self.mutex
            .with(&self.ctx, |locked| self.write_locked(locked.gl(), region, pixels))
    }

    /// Upload on a context the caller has already locked.
    pub(crate) fn upload_locked(
        &self,
        locked: &Locked<'_>,
        dp: IVec2,
        src: &Buffer,
        sr: Rect,
    ) -> Result<()> {
        let target = locked.context().id();
        if target != self.context_id() {
            return Err(DriverError::ContextMismatch {
                texture: self.context_id(),
                target,
            });
        }
        let (dst, pixels) = self.stage(dp, src, sr)?;
        if dst.is_empty() {
            return Ok(());
        }
        self.write_locked(locked.gl(), dst, &pixels)
    }

    /// Draw the `sr` part of the texture, moved by `src2dst`, into the current viewport.
    pub fn draw(&self, src2dst: Affine2, sr: Rect) -> Result<()> {
        self.draw_with(src2dst, sr, DrawOp::Over)
    }

    pub fn draw_with(&self, src2dst: Affine2, sr: Rect, op: DrawOp) -> Result<()> {
        self.mutex.with(&self.ctx, |locked| {
            let target = locked.gl().current_viewport().size();
            draw::draw_texture(locked, target, src2dst, self, sr, op)
        })
    }

    /// Delete the GPU texture.
    pub fn release(self) {
        self.mutex
            .with(&self.ctx, |locked| locked.gl().delete_texture(self.id));
        debug!(texture = %self.id, context_id = %self.ctx.id(), "Released texture");
    }

    fn check_region(&self, region: Rect) -> Result<()> {
        if self.bounds().contains_rect(&region) {
            Ok(())
        } else {
            Err(DriverError::InvalidRegion {
                region,
                bounds: self.bounds(),
            })
        }
    }

    /// Validate an upload and copy out its pixels, before any lock is taken.
    fn stage(&self, dp: IVec2, src: &Buffer, sr: Rect) -> Result<(Rect, Vec<u8>)> {
        let sr = sr.intersect(&src.bounds());
        let dst = Rect::from_origin_size(dp, sr.size());
        self.check_region(dst)?;
        let pixels = src.region_bytes(sr)?;
        Ok((dst, pixels))
    }

    pub(crate) fn write_locked(&self, gl: &dyn RenderingContext, dst: Rect, pixels: &[u8]) -> Result<()> {
        gl.bind_texture(Some(self.id));
        gl.tex_sub_image_2d(dst, pixels)?;
        trace!(texture = %self.id, ?dst, "Uploaded texture region");
        Ok(())
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("context", &self.ctx.id())
            .finish()
    }
}

/// Allocate a texture; the shared programs are compiled first if needed.
fn allocate(locked: &mut Locked<'_>, size: UVec2) -> Result<TextureId> {
    locked.texture_program()?;

    let gl = locked.gl();
    let id = gl.create_texture()?;
    gl.bind_texture(Some(id));
    if let Err(e) = gl.tex_image_2d(size, None) {
        gl.delete_texture(id);
        return Err(e.into());
    }
    gl.tex_parameter(TexParam::MagFilter(Filter::Linear));
    gl.tex_parameter(TexParam::MinFilter(Filter::Linear));
    gl.tex_parameter(TexParam::WrapS(Wrap::ClampToEdge));
    gl.tex_parameter(TexParam::WrapT(Wrap::ClampToEdge));
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pane_gl::{Color, SoftwareContext};

    fn texture(size: UVec2) -> (Arc<SoftwareContext>, Texture) {
        let gl = Arc::new(SoftwareContext::new(UVec2::new(8, 8)));
        let ctx = GlContext::new(gl.clone());
        let tex = Texture::create(Arc::new(ContextMutex::new()), ctx, size).unwrap();
        (gl, tex)
    }

    #[test]
    fn test_create_rejects_empty_size() {
        let gl = Arc::new(SoftwareContext::new(UVec2::new(8, 8)));
        let err = Texture::create(Arc::new(ContextMutex::new()), GlContext::new(gl), UVec2::new(0, 4))
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidSize { width: 0, height: 4 }));
    }

    #[test]
    fn test_upload_outside_bounds_is_rejected() {
        let (_gl, tex) = texture(UVec2::new(4, 4));
        let mut buf = Buffer::new(UVec2::new(2, 2));
        buf.fill(buf.bounds(), Color::RED);

        let err = tex.upload(IVec2::new(3, 3), &buf, buf.bounds()).unwrap_err();
        assert!(matches!(err, DriverError::InvalidRegion { .. }));
    }

    #[test]
    fn test_upload_pixels_checks_length() {
        let (_gl, tex) = texture(UVec2::new(4, 4));
        let err = tex.upload_pixels(Rect::new(0, 0, 2, 2), &[0; 12]).unwrap_err();
        assert!(matches!(err, DriverError::PixelLength { expected: 16, actual: 12 }));
    }

    #[test]
    fn test_release_deletes_gpu_object() {
        let (gl, tex) = texture(UVec2::new(4, 4));
        let id = tex.id();
        assert!(gl.is_texture(id));

        tex.release();
        assert!(!gl.is_texture(id));
    }
}
