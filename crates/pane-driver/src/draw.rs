//! Drawing on a locked context.
//!
//! Everything here runs inside [`ContextMutex::with`](crate::ContextMutex::with)
//! and issues one complete context-call sequence per draw. Painters reach
//! these routines through [`Frame`], which wraps the lock the draw loop is
//! already holding.

use crate::buffer::Buffer;
use crate::error::{DriverError, Result};
use crate::event::WindowId;
use crate::gl_mutex::Locked;
use crate::programs::{self, QUAD_VERTICES};
use crate::texture::Texture;
use glam::{Affine2, IVec2, UVec2};
use pane_gl::{BlendFactor, Capability, Color, Primitive, Rect, RenderingContext};

/// How drawn pixels combine with the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DrawOp {
    /// Premultiplied source-over blending
    #[default]
    Over,
    /// Replace the target pixels
    Src,
}

fn apply_op(gl: &dyn RenderingContext, op: DrawOp) {
    match op {
        DrawOp::Over => {
            gl.enable(Capability::Blend);
            gl.blend_func(BlendFactor::One, BlendFactor::OneMinusSrcAlpha);
        }
        DrawOp::Src => gl.disable(Capability::Blend),
    }
}

/// Draw the `sr` part of `texture`, moved by `src2dst`, onto a `target`-sized viewport.
pub(crate) fn draw_texture(
    locked: &mut Locked<'_>,
    target: UVec2,
    src2dst: Affine2,
    texture: &Texture,
    sr: Rect,
    op: DrawOp,
) -> Result<()> {
    let target_ctx = locked.context().id();
    if texture.context_id() != target_ctx {
        return Err(DriverError::ContextMismatch {
            texture: texture.context_id(),
            target: target_ctx,
        });
    }
    let sr = sr.intersect(&texture.bounds());
    if sr.is_empty() {
        return Ok(());
    }

    let p = locked.texture_program()?;
    let gl = locked.gl();
    gl.use_program(Some(p.program));
    apply_op(gl, op);
    gl.uniform_matrix_3(p.mvp, &programs::mvp(target, src2dst, sr));
    gl.uniform_matrix_3(p.uvp, &programs::uvp(texture.size(), sr));

    gl.active_texture(0);
    gl.bind_texture(Some(texture.id()));
    gl.uniform_1_i32(p.sample, 0);

    gl.bind_array_buffer(Some(p.quad));
    gl.enable_vertex_attrib_array(p.pos);
    gl.vertex_attrib_pointer_f32(p.pos, 2, 0, 0);
    gl.enable_vertex_attrib_array(p.in_uv);
    gl.vertex_attrib_pointer_f32(p.in_uv, 2, 0, 0);

    gl.draw_arrays(Primitive::TriangleStrip, 0, QUAD_VERTICES)?;
    Ok(())
}

/// Fill `dr` with a solid color on a `target`-sized viewport.
pub(crate) fn fill_rect(
    locked: &mut Locked<'_>,
    target: UVec2,
    dr: Rect,
    color: Color,
    op: DrawOp,
) -> Result<()> {
    if dr.is_empty() {
        return Ok(());
    }

    let p = locked.fill_program()?;
    let gl = locked.gl();
    gl.use_program(Some(p.program));
    apply_op(gl, op);
    gl.uniform_matrix_3(p.mvp, &programs::mvp(target, Affine2::IDENTITY, dr));
    gl.uniform_4_f32(p.color, color.to_array());

    gl.bind_array_buffer(Some(p.quad));
    gl.enable_vertex_attrib_array(p.pos);
    gl.vertex_attrib_pointer_f32(p.pos, 2, 0, 0);

    gl.draw_arrays(Primitive::TriangleStrip, 0, QUAD_VERTICES)?;
    Ok(())
}

/// Maps `sr` onto `dr`.
fn rect_to_rect(sr: Rect, dr: Rect) -> Affine2 {
    let scale = dr.size().as_vec2() / sr.size().as_vec2();
    Affine2::from_translation(dr.min.as_vec2())
        * Affine2::from_scale(scale)
        * Affine2::from_translation(-sr.min.as_vec2())
}

/// One frame being painted on a window.
///
/// A frame only exists inside the window's draw loop, which already holds
/// the context mutex. Its methods draw straight onto the locked context;
/// calling the lock-taking APIs ([`Texture::upload`], [`Window::draw`], ...)
/// from a painter would acquire the mutex twice.
///
/// [`Window::draw`]: crate::Window::draw
pub struct Frame<'a, 'l> {
    locked: &'a mut Locked<'l>,
    window: WindowId,
    size: UVec2,
}

impl<'a, 'l> Frame<'a, 'l> {
    pub(crate) fn new(locked: &'a mut Locked<'l>, window: WindowId, size: UVec2) -> Self {
        Self {
            locked,
            window,
            size,
        }
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    /// Size of the window surface in pixels.
    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.size)
    }

    /// Direct access to the locked context.
    pub fn gl(&self) -> &dyn RenderingContext {
        self.locked.gl()
    }

    pub fn clear(&mut self, color: Color) {
        let gl = self.locked.gl();
        gl.clear_color(color);
        gl.clear();
    }

    pub fn fill(&mut self, dr: Rect, color: Color, op: DrawOp) -> Result<()> {
        fill_rect(self.locked, self.size, dr, color, op)
    }

    /// Draw the `sr` part of `texture` transformed by `src2dst`.
    pub fn draw(&mut self, src2dst: Affine2, texture: &Texture, sr: Rect, op: DrawOp) -> Result<()> {
        draw_texture(self.locked, self.size, src2dst, texture, sr, op)
    }

    /// Draw the `sr` part of `texture` unscaled with its top-left corner at `dp`.
    pub fn copy(&mut self, dp: IVec2, texture: &Texture, sr: Rect, op: DrawOp) -> Result<()> {
        let offset = (dp - sr.min).as_vec2();
        self.draw(Affine2::from_translation(offset), texture, sr, op)
    }

    /// Draw the `sr` part of `texture` stretched over `dr`.
    pub fn scale(&mut self, dr: Rect, texture: &Texture, sr: Rect, op: DrawOp) -> Result<()> {
        if sr.is_empty() || dr.is_empty() {
            return Ok(());
        }
        self.draw(rect_to_rect(sr, dr), texture, sr, op)
    }

    /// Upload the `sr` part of `src` into `texture` at `dp`.
    pub fn upload(&mut self, texture: &Texture, dp: IVec2, src: &Buffer, sr: Rect) -> Result<()> {
        texture.upload_locked(self.locked, dp, src, sr)
    }
}
