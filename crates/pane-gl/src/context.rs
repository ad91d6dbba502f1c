//! Rendering context call surface.

use crate::color::Color;
use crate::error::GlError;
use crate::geometry::Rect;
use crate::types::{
    AttribLocation, BlendFactor, BufferId, BufferUsage, Capability, Primitive, ProgramId,
    ShaderId, ShaderKind, TexParam, TextureId, UniformLocation,
};
use glam::UVec2;

/// A stateful, GL-shaped rendering context.
///
/// Calls that operate on "the bound texture", "the bound array buffer" or
/// "the current program" read hidden state left behind by earlier calls.
/// Implementations make every individual call thread-safe; they do not make
/// call *sequences* atomic.
///
/// Pixel data is tightly packed premultiplied RGBA8, rows top to bottom.
/// Viewports and read-back rectangles use a top-left origin.
pub trait RenderingContext: Send + Sync {
    // Textures

    fn create_texture(&self) -> Result<TextureId, GlError>;
    fn delete_texture(&self, texture: TextureId);
    fn is_texture(&self, texture: TextureId) -> bool;
    fn active_texture(&self, unit: u32);
    fn bind_texture(&self, texture: Option<TextureId>);

    /// Allocate storage for the bound texture, optionally initialized.
    fn tex_image_2d(&self, size: UVec2, pixels: Option<&[u8]>) -> Result<(), GlError>;

    /// Replace a region of the bound texture.
    fn tex_sub_image_2d(&self, region: Rect, pixels: &[u8]) -> Result<(), GlError>;

    fn tex_parameter(&self, param: TexParam);

    // Vertex buffers

    fn create_buffer(&self) -> Result<BufferId, GlError>;
    fn delete_buffer(&self, buffer: BufferId);
    fn bind_array_buffer(&self, buffer: Option<BufferId>);
    fn buffer_data(&self, data: &[u8], usage: BufferUsage) -> Result<(), GlError>;

    // Shaders and programs

    fn create_shader(&self, kind: ShaderKind) -> Result<ShaderId, GlError>;
    fn shader_source(&self, shader: ShaderId, source: &str);
    fn compile_shader(&self, shader: ShaderId);
    fn shader_compile_status(&self, shader: ShaderId) -> bool;
    fn shader_info_log(&self, shader: ShaderId) -> String;
    fn delete_shader(&self, shader: ShaderId);

    fn create_program(&self) -> Result<ProgramId, GlError>;
    fn attach_shader(&self, program: ProgramId, shader: ShaderId);
    fn link_program(&self, program: ProgramId);
    fn program_link_status(&self, program: ProgramId) -> bool;
    fn program_info_log(&self, program: ProgramId) -> String;
    fn is_program(&self, program: ProgramId) -> bool;
    fn delete_program(&self, program: ProgramId);
    fn use_program(&self, program: Option<ProgramId>);

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<AttribLocation>;
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    fn enable_vertex_attrib_array(&self, location: AttribLocation);
    fn disable_vertex_attrib_array(&self, location: AttribLocation);

    /// Source `components` floats per vertex from the bound array buffer.
    fn vertex_attrib_pointer_f32(
        &self,
        location: AttribLocation,
        components: u32,
        stride: u32,
        offset: u32,
    );

    /// Set a 3x3 matrix uniform of the current program (column-major).
    fn uniform_matrix_3(&self, location: UniformLocation, value: &[f32; 9]);
    fn uniform_1_i32(&self, location: UniformLocation, value: i32);
    fn uniform_4_f32(&self, location: UniformLocation, value: [f32; 4]);

    // Fixed-function state

    fn enable(&self, capability: Capability);
    fn disable(&self, capability: Capability);
    fn blend_func(&self, src: BlendFactor, dst: BlendFactor);
    fn viewport(&self, rect: Rect);
    fn current_viewport(&self) -> Rect;
    fn clear_color(&self, color: Color);
    fn clear(&self);

    // Drawing

    fn draw_arrays(&self, mode: Primitive, first: u32, count: u32) -> Result<(), GlError>;
    fn read_pixels(&self, rect: Rect) -> Result<Vec<u8>, GlError>;
    fn flush(&self);

    // Drawable surface, owned by the platform window

    fn surface_size(&self) -> UVec2;
    fn resize_surface(&self, size: UVec2);
}
