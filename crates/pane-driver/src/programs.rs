//! Shared shader programs and the quad geometry they draw.
//!
//! Every draw in the driver renders the unit quad `[0,1]²` as a triangle
//! strip, transformed by two 3x3 matrices: `mvp` places the quad in clip
//! space and `uvp` maps it into texture coordinates. The programs are
//! compiled lazily, once per context, and cached behind the context mutex.

use crate::gl_mutex::ContextId;
use glam::{Affine2, Mat3, UVec2, Vec2};
use pane_gl::{
    AttribLocation, BufferId, BufferUsage, GlError, ProgramId, Rect, RenderingContext, ShaderId,
    ShaderKind, UniformLocation,
};
use tracing::{debug, error};

/// Unit quad as a triangle strip.
pub(crate) const QUAD_COORDS: [f32; 8] = [
    0.0, 0.0, // top left
    1.0, 0.0, // top right
    0.0, 1.0, // bottom left
    1.0, 1.0, // bottom right
];

pub(crate) const QUAD_VERTICES: u32 = 4;

const TEXTURE_VERTEX_SRC: &str = r#"#version 100
uniform mat3 mvp;
uniform mat3 uvp;
attribute vec2 pos;
attribute vec2 inUV;
varying vec2 uv;
void main() {
    vec3 p = mvp * vec3(pos, 1.0);
    gl_Position = vec4(p.xy, 0.0, 1.0);
    uv = (uvp * vec3(inUV, 1.0)).xy;
}
"#;

const TEXTURE_FRAGMENT_SRC: &str = r#"#version 100
precision mediump float;
uniform sampler2D sample;
varying vec2 uv;
void main() {
    gl_FragColor = texture2D(sample, uv);
}
"#;

const FILL_VERTEX_SRC: &str = r#"#version 100
uniform mat3 mvp;
attribute vec2 pos;
void main() {
    vec3 p = mvp * vec3(pos, 1.0);
    gl_Position = vec4(p.xy, 0.0, 1.0);
}
"#;

const FILL_FRAGMENT_SRC: &str = r#"#version 100
precision mediump float;
uniform vec4 color;
void main() {
    gl_FragColor = color;
}
"#;

/// Locations of the texture-blit program.
#[derive(Debug, Clone, Copy)]
pub struct TextureProgram {
    pub program: ProgramId,
    pub pos: AttribLocation,
    pub in_uv: AttribLocation,
    pub mvp: UniformLocation,
    pub uvp: UniformLocation,
    pub sample: UniformLocation,
    pub quad: BufferId,
}

/// Locations of the solid-fill program.
#[derive(Debug, Clone, Copy)]
pub struct FillProgram {
    pub program: ProgramId,
    pub pos: AttribLocation,
    pub mvp: UniformLocation,
    pub color: UniformLocation,
    pub quad: BufferId,
}

/// Programs compiled on one context.
#[derive(Debug, Default)]
pub struct SharedPrograms {
    texture: Option<TextureProgram>,
    fill: Option<FillProgram>,
}

impl SharedPrograms {
    /// The texture program, compiling it if the context has none yet.
    pub(crate) fn texture(
        &mut self,
        gl: &dyn RenderingContext,
        ctx: ContextId,
    ) -> Result<TextureProgram, GlError> {
        if let Some(p) = self.texture.filter(|p| gl.is_program(p.program)) {
            return Ok(p);
        }

        let program = compile_program(gl, TEXTURE_VERTEX_SRC, TEXTURE_FRAGMENT_SRC)?;
        let resolved = (|| -> Result<TextureProgram, GlError> {
            Ok(TextureProgram {
                program,
                pos: attrib(gl, program, "pos")?,
                in_uv: attrib(gl, program, "inUV")?,
                mvp: uniform(gl, program, "mvp")?,
                uvp: uniform(gl, program, "uvp")?,
                sample: uniform(gl, program, "sample")?,
                quad: quad_buffer(gl)?,
            })
        })();
        if resolved.is_err() {
            gl.delete_program(program);
        }

        let p = resolved?;
        debug!(context_id = %ctx, program = %p.program, "Compiled texture program");
        self.texture = Some(p);
        Ok(p)
    }

    /// The fill program, compiling it if the context has none yet.
    pub(crate) fn fill(
        &mut self,
        gl: &dyn RenderingContext,
        ctx: ContextId,
    ) -> Result<FillProgram, GlError> {
        if let Some(p) = self.fill.filter(|p| gl.is_program(p.program)) {
            return Ok(p);
        }

        let program = compile_program(gl, FILL_VERTEX_SRC, FILL_FRAGMENT_SRC)?;
        let resolved = (|| -> Result<FillProgram, GlError> {
            Ok(FillProgram {
                program,
                pos: attrib(gl, program, "pos")?,
                mvp: uniform(gl, program, "mvp")?,
                color: uniform(gl, program, "color")?,
                quad: quad_buffer(gl)?,
            })
        })();
        if resolved.is_err() {
            gl.delete_program(program);
        }

        let p = resolved?;
        debug!(context_id = %ctx, program = %p.program, "Compiled fill program");
        self.fill = Some(p);
        Ok(p)
    }

    pub(crate) fn release(&mut self, gl: &dyn RenderingContext) {
        if let Some(p) = self.texture.take() {
            gl.delete_program(p.program);
            gl.delete_buffer(p.quad);
        }
        if let Some(p) = self.fill.take() {
            gl.delete_program(p.program);
            gl.delete_buffer(p.quad);
        }
    }
}

fn attrib(gl: &dyn RenderingContext, program: ProgramId, name: &str) -> Result<AttribLocation, GlError> {
    gl.attrib_location(program, name)
        .ok_or_else(|| GlError::ProgramLink(format!("{program} has no attribute `{name}`")))
}

fn uniform(gl: &dyn RenderingContext, program: ProgramId, name: &str) -> Result<UniformLocation, GlError> {
    gl.uniform_location(program, name)
        .ok_or_else(|| GlError::ProgramLink(format!("{program} has no uniform `{name}`")))
}

fn quad_buffer(gl: &dyn RenderingContext) -> Result<BufferId, GlError> {
    let quad = gl.create_buffer()?;
    gl.bind_array_buffer(Some(quad));
    if let Err(e) = gl.buffer_data(bytemuck::cast_slice(&QUAD_COORDS), BufferUsage::StaticDraw) {
        gl.delete_buffer(quad);
        return Err(e);
    }
    Ok(quad)
}

fn compile_shader(gl: &dyn RenderingContext, kind: ShaderKind, src: &str) -> Result<ShaderId, GlError> {
    let shader = gl.create_shader(kind)?;
    gl.shader_source(shader, src);
    gl.compile_shader(shader);
    if !gl.shader_compile_status(shader) {
        let log = gl.shader_info_log(shader);
        gl.delete_shader(shader);
        error!(%kind, %log, "Shader compilation failed");
        return Err(GlError::ShaderCompile { kind, log });
    }
    Ok(shader)
}

/// Compile and link a vertex/fragment pair.
pub(crate) fn compile_program(
    gl: &dyn RenderingContext,
    vertex_src: &str,
    fragment_src: &str,
) -> Result<ProgramId, GlError> {
    let program = gl.create_program()?;

    let vs = match compile_shader(gl, ShaderKind::Vertex, vertex_src) {
        Ok(s) => s,
        Err(e) => {
            gl.delete_program(program);
            return Err(e);
        }
    };
    let fs = match compile_shader(gl, ShaderKind::Fragment, fragment_src) {
        Ok(s) => s,
        Err(e) => {
            gl.delete_shader(vs);
            gl.delete_program(program);
            return Err(e);
        }
    };

    gl.attach_shader(program, vs);
    gl.attach_shader(program, fs);
    gl.link_program(program);

    // Attached shaders live on with the program.
    gl.delete_shader(vs);
    gl.delete_shader(fs);

    if !gl.program_link_status(program) {
        let log = gl.program_info_log(program);
        gl.delete_program(program);
        error!(%log, "Program link failed");
        return Err(GlError::ProgramLink(log));
    }
    Ok(program)
}

/// Pixel coordinates (top-left origin) of a `target`-sized surface to clip space.
pub(crate) fn pixels_to_clip(target: UVec2) -> Affine2 {
    let size = target.max(UVec2::ONE).as_vec2();
    Affine2::from_translation(Vec2::new(-1.0, 1.0))
        * Affine2::from_scale(Vec2::new(2.0 / size.x, -2.0 / size.y))
}

/// The unit quad stretched over `rect`.
pub(crate) fn quad_to_rect(rect: Rect) -> Affine2 {
    Affine2::from_translation(rect.min.as_vec2()) * Affine2::from_scale(rect.size().as_vec2())
}

/// Places the `sr` part of a source, moved by `src2dst`, on a `target`-sized surface.
pub(crate) fn mvp(target: UVec2, src2dst: Affine2, sr: Rect) -> [f32; 9] {
    Mat3::from(pixels_to_clip(target) * src2dst * quad_to_rect(sr)).to_cols_array()
}

/// Maps quad coordinates to the `sr` part of a `tex_size` texture.
pub(crate) fn uvp(tex_size: UVec2, sr: Rect) -> [f32; 9] {
    let inv = Vec2::ONE / tex_size.max(UVec2::ONE).as_vec2();
    Mat3::from(Affine2::from_scale(inv) * quad_to_rect(sr)).to_cols_array()
}
