//! Software Context - CPU reference rasterizer
//!
//! Implements the context call surface entirely on the CPU so that the
//! driver can run (and be tested) without a GPU. All hidden state lives
//! behind one internal lock, which makes each call atomic on its own while
//! still letting call sequences from different threads interleave, exactly
//! like a real driver context.
//!
//! Shaders are not interpreted. Compilation records the `attribute` and
//! `uniform` declarations of the source, and draws are executed by
//! recognizing the program interface:
//!
//! - `pos` (vec2 attribute) transformed by `mvp` (mat3 uniform)
//! - `sample` (sampler uniform): textured, coordinates are `uvp * inUV`
//!   (or `uvp * pos` when `inUV` is absent)
//! - `color` (vec4 uniform): solid fill

use crate::color::Color;
use crate::context::RenderingContext;
use crate::error::GlError;
use crate::geometry::Rect;
use crate::types::{
    AttribLocation, BlendFactor, BufferId, BufferUsage, Capability, Filter, Primitive,
    ProgramId, ShaderId, ShaderKind, TexParam, TextureId, UniformLocation, Wrap,
};
use crate::BYTES_PER_PIXEL;
use glam::{IVec2, Mat3, UVec2, Vec2, Vec3};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Largest texture edge accepted by `tex_image_2d`.
pub const MAX_TEXTURE_DIMENSION: u32 = 8192;

const MAX_TEXTURE_UNITS: u32 = 8;

/// Tolerance for edge tests and texel snapping.
const EPSILON: f32 = 1e-4;

/// A rendering context backed by CPU memory.
pub struct SoftwareContext {
    state: Mutex<State>,
}

impl SoftwareContext {
    /// Create a context whose drawable surface has the given size.
    pub fn new(surface_size: UVec2) -> Self {
        debug!(
            width = surface_size.x,
            height = surface_size.y,
            "Creating software rendering context"
        );
        Self {
            state: Mutex::new(State::new(surface_size)),
        }
    }
}

impl std::fmt::Debug for SoftwareContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("SoftwareContext")
            .field("surface", &st.surface.size)
            .field("textures", &st.textures.len())
            .field("programs", &st.programs.len())
            .finish()
    }
}

struct SoftTexture {
    size: UVec2,
    texels: Vec<[u8; 4]>,
    mag_filter: Filter,
    min_filter: Filter,
    wrap_s: Wrap,
    wrap_t: Wrap,
}

impl SoftTexture {
    fn new() -> Self {
        Self {
            size: UVec2::ZERO,
            texels: Vec::new(),
            // GL defaults
            mag_filter: Filter::Linear,
            min_filter: Filter::Nearest,
            wrap_s: Wrap::Repeat,
            wrap_t: Wrap::Repeat,
        }
    }

    fn fetch(&self, x: i32, y: i32) -> Color {
        let wrap = |v: i32, n: u32, mode: Wrap| match mode {
            Wrap::ClampToEdge => v.clamp(0, n as i32 - 1),
            Wrap::Repeat => v.rem_euclid(n as i32),
        };
        let x = wrap(x, self.size.x, self.wrap_s) as usize;
        let y = wrap(y, self.size.y, self.wrap_t) as usize;
        Color::from_rgba8(self.texels[y * self.size.x as usize + x])
    }

    /// Sample at normalized coordinates with the magnification filter.
    fn sample(&self, uv: Vec2) -> Color {
        if self.size.x == 0 || self.size.y == 0 {
            return Color::TRANSPARENT;
        }
        let x = uv.x * self.size.x as f32 - 0.5;
        let y = uv.y * self.size.y as f32 - 0.5;

        match self.mag_filter {
            Filter::Nearest => self.fetch(x.round() as i32, y.round() as i32),
            Filter::Linear => {
                let (x0, fx) = split_texel(x);
                let (y0, fy) = split_texel(y);
                let top = self.fetch(x0, y0).lerp(&self.fetch(x0 + 1, y0), fx);
                let bottom = self.fetch(x0, y0 + 1).lerp(&self.fetch(x0 + 1, y0 + 1), fx);
                top.lerp(&bottom, fy)
            }
        }
    }
}

/// Split a texel coordinate into integer part and weight, snapping weights
/// that are within rounding noise of a texel center.
fn split_texel(v: f32) -> (i32, f32) {
    let base = v.floor();
    let frac = v - base;
    if frac < EPSILON {
        (base as i32, 0.0)
    } else if frac > 1.0 - EPSILON {
        (base as i32 + 1, 0.0)
    } else {
        (base as i32, frac)
    }
}

struct SoftShader {
    kind: ShaderKind,
    source: String,
    compiled: bool,
    log: String,
    attributes: Vec<String>,
    uniforms: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum UniformValue {
    Mat3([f32; 9]),
    Int(i32),
    Vec4([f32; 4]),
}

#[derive(Default)]
struct SoftProgram {
    shaders: Vec<ShaderId>,
    linked: bool,
    log: String,
    attributes: Vec<String>,
    uniforms: Vec<String>,
    values: HashMap<u32, UniformValue>,
}

impl SoftProgram {
    fn uniform(&self, name: &str) -> Option<UniformValue> {
        let idx = self.uniforms.iter().position(|u| u == name)?;
        self.values.get(&(idx as u32)).copied()
    }

    fn has_uniform(&self, name: &str) -> bool {
        self.uniforms.iter().any(|u| u == name)
    }

    fn attribute(&self, name: &str) -> Option<u32> {
        self.attributes.iter().position(|a| a == name).map(|i| i as u32)
    }

    fn mat3(&self, name: &str) -> Mat3 {
        match self.uniform(name) {
            Some(UniformValue::Mat3(m)) => Mat3::from_cols_array(&m),
            _ => Mat3::IDENTITY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AttribPointer {
    enabled: bool,
    buffer: Option<BufferId>,
    components: u32,
    stride: u32,
    offset: u32,
}

struct Surface {
    size: UVec2,
    pixels: Vec<[u8; 4]>,
}

impl Surface {
    fn new(size: UVec2) -> Self {
        Self {
            size,
            pixels: vec![[0; 4]; size.x as usize * size.y as usize],
        }
    }

    fn bounds(&self) -> Rect {
        Rect::from_size(self.size)
    }
}

enum Shading {
    Textured { uvp: Mat3, texture: TextureId },
    Solid(Color),
}

struct State {
    next_id: u32,
    textures: HashMap<TextureId, SoftTexture>,
    buffers: HashMap<BufferId, Vec<u8>>,
    shaders: HashMap<ShaderId, SoftShader>,
    programs: HashMap<ProgramId, SoftProgram>,
    active_unit: u32,
    bound_textures: HashMap<u32, TextureId>,
    array_buffer: Option<BufferId>,
    current_program: Option<ProgramId>,
    attribs: HashMap<u32, AttribPointer>,
    blend: bool,
    blend_src: BlendFactor,
    blend_dst: BlendFactor,
    viewport: Rect,
    clear_color: Color,
    surface: Surface,
}

impl State {
    fn new(size: UVec2) -> Self {
        Self {
            next_id: 1,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            shaders: HashMap::new(),
            programs: HashMap::new(),
            active_unit: 0,
            bound_textures: HashMap::new(),
            array_buffer: None,
            current_program: None,
            attribs: HashMap::new(),
            blend: false,
            blend_src: BlendFactor::One,
            blend_dst: BlendFactor::Zero,
            viewport: Rect::from_size(size),
            clear_color: Color::TRANSPARENT,
            surface: Surface::new(size),
        }
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn bound_texture_mut(&mut self) -> Result<&mut SoftTexture, GlError> {
        let id = self
            .bound_textures
            .get(&self.active_unit)
            .copied()
            .ok_or_else(|| GlError::InvalidOperation("no texture bound".into()))?;
        self.textures
            .get_mut(&id)
            .ok_or(GlError::UnknownObject { kind: "texture", id: id.0 })
    }

    fn current_program_mut(&mut self) -> Option<&mut SoftProgram> {
        let id = self.current_program?;
        self.programs.get_mut(&id)
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        if let Some(program) = self.current_program_mut() {
            program.values.insert(location.0, value);
        }
    }

    fn fetch_attrib(&self, location: u32, vertex: u32) -> Result<Vec2, GlError> {
        let ptr = self
            .attribs
            .get(&location)
            .filter(|p| p.enabled)
            .ok_or_else(|| GlError::InvalidOperation(format!("attribute {location} not enabled")))?;
        let buffer_id = ptr
            .buffer
            .ok_or_else(|| GlError::InvalidOperation(format!("attribute {location} has no buffer")))?;
        let data = self
            .buffers
            .get(&buffer_id)
            .ok_or(GlError::UnknownObject { kind: "buffer", id: buffer_id.0 })?;

        let components = ptr.components.clamp(1, 4) as usize;
        let stride = if ptr.stride == 0 { components * 4 } else { ptr.stride as usize };
        let start = ptr.offset as usize + vertex as usize * stride;

        let read = |i: usize| -> Result<f32, GlError> {
            let at = start + i * 4;
            data.get(at..at + 4)
                .and_then(|b| b.try_into().ok())
                .map(f32::from_ne_bytes)
                .ok_or_else(|| GlError::InvalidOperation("vertex read out of buffer bounds".into()))
        };

        let x = read(0)?;
        let y = if components > 1 { read(1)? } else { 0.0 };
        Ok(Vec2::new(x, y))
    }

    fn shading(&self, program: &SoftProgram) -> Result<Shading, GlError> {
        if program.has_uniform("sample") {
            let unit = match program.uniform("sample") {
                Some(UniformValue::Int(u)) => u.max(0) as u32,
                _ => 0,
            };
            let texture = self.bound_textures.get(&unit).copied().ok_or_else(|| {
                GlError::InvalidOperation(format!("no texture bound to unit {unit}"))
            })?;
            if !self.textures.contains_key(&texture) {
                return Err(GlError::UnknownObject { kind: "texture", id: texture.0 });
            }
            Ok(Shading::Textured {
                uvp: program.mat3("uvp"),
                texture,
            })
        } else if program.has_uniform("color") {
            let color = match program.uniform("color") {
                Some(UniformValue::Vec4(c)) => Color::from(c),
                _ => Color::TRANSPARENT,
            };
            Ok(Shading::Solid(color))
        } else {
            Err(GlError::InvalidOperation(
                "program interface not supported by the software context".into(),
            ))
        }
    }

    fn draw(&mut self, mode: Primitive, first: u32, count: u32) -> Result<(), GlError> {
        let program_id = self
            .current_program
            .ok_or_else(|| GlError::InvalidOperation("no program in use".into()))?;
        let program = self
            .programs
            .get(&program_id)
            .ok_or(GlError::UnknownObject { kind: "program", id: program_id.0 })?;
        if !program.linked {
            return Err(GlError::InvalidOperation(format!("{program_id} is not linked")));
        }

        let shading = self.shading(program)?;
        let mvp = program.mat3("mvp");
        let pos = program
            .attribute("pos")
            .ok_or_else(|| GlError::InvalidOperation("program has no `pos` attribute".into()))?;
        let in_uv = program.attribute("inUV");

        let vp = self.viewport;
        let to_window = |p: Vec2| -> Vec2 {
            let ndc = mvp * Vec3::new(p.x, p.y, 1.0);
            Vec2::new(
                vp.min.x as f32 + (ndc.x + 1.0) * 0.5 * vp.width() as f32,
                vp.min.y as f32 + (1.0 - ndc.y) * 0.5 * vp.height() as f32,
            )
        };

        // (window position, interpolated coordinate source)
        let mut vertices = Vec::with_capacity(count as usize);
        for v in first..first + count {
            let p = self.fetch_attrib(pos, v)?;
            let attr = match in_uv {
                Some(loc) => self.fetch_attrib(loc, v).unwrap_or(p),
                None => p,
            };
            vertices.push((to_window(p), attr));
        }

        let triangles: Vec<[usize; 3]> = match mode {
            Primitive::Triangles => (0..vertices.len() / 3)
                .map(|t| [3 * t, 3 * t + 1, 3 * t + 2])
                .collect(),
            Primitive::TriangleStrip => (0..vertices.len().saturating_sub(2))
                .map(|t| [t, t + 1, t + 2])
                .collect(),
        };
        if triangles.is_empty() {
            return Ok(());
        }

        let (lo, hi) = vertices.iter().fold(
            (Vec2::splat(f32::MAX), Vec2::splat(f32::MIN)),
            |(lo, hi), (p, _)| (lo.min(*p), hi.max(*p)),
        );
        let clip = vp.intersect(&self.surface.bounds());
        let area = Rect::new(
            lo.x.floor() as i32,
            lo.y.floor() as i32,
            hi.x.ceil() as i32,
            hi.y.ceil() as i32,
        )
        .intersect(&clip);

        trace!(
            program = %program_id,
            pixels = area.area(),
            "Software draw_arrays"
        );

        for py in area.min.y..area.max.y {
            for px in area.min.x..area.max.x {
                let center = Vec2::new(px as f32 + 0.5, py as f32 + 0.5);
                let Some(coord) = triangles.iter().find_map(|&[a, b, c]| {
                    barycentric(center, vertices[a].0, vertices[b].0, vertices[c].0).map(|w| {
                        vertices[a].1 * w.x + vertices[b].1 * w.y + vertices[c].1 * w.z
                    })
                }) else {
                    continue;
                };

                let src = match &shading {
                    Shading::Solid(color) => *color,
                    Shading::Textured { uvp, texture } => {
                        let uv = *uvp * Vec3::new(coord.x, coord.y, 1.0);
                        self.textures[texture].sample(Vec2::new(uv.x, uv.y))
                    }
                };
                self.write_pixel(IVec2::new(px, py), src);
            }
        }
        Ok(())
    }

    fn write_pixel(&mut self, p: IVec2, src: Color) {
        let idx = p.y as usize * self.surface.size.x as usize + p.x as usize;
        let out = if self.blend {
            let dst = Color::from_rgba8(self.surface.pixels[idx]);
            let sf = blend_weight(self.blend_src, &src);
            let df = blend_weight(self.blend_dst, &src);
            Color::rgba(
                src.r * sf + dst.r * df,
                src.g * sf + dst.g * df,
                src.b * sf + dst.b * df,
                src.a * sf + dst.a * df,
            )
        } else {
            src
        };
        self.surface.pixels[idx] = out.to_rgba8();
    }
}

fn blend_weight(factor: BlendFactor, src: &Color) -> f32 {
    match factor {
        BlendFactor::Zero => 0.0,
        BlendFactor::One => 1.0,
        BlendFactor::SrcAlpha => src.a,
        BlendFactor::OneMinusSrcAlpha => 1.0 - src.a,
    }
}

/// Barycentric weights of `p` in triangle `abc`, if `p` lies inside.
fn barycentric(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> Option<Vec3> {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let den = v0.x * v1.y - v1.x * v0.y;
    if den.abs() < f32::EPSILON {
        return None;
    }
    let v = (v2.x * v1.y - v1.x * v2.y) / den;
    let w = (v0.x * v2.y - v2.x * v0.y) / den;
    let u = 1.0 - v - w;
    (u >= -EPSILON && v >= -EPSILON && w >= -EPSILON).then(|| Vec3::new(u, v, w))
}

/// Collect `attribute`/`uniform` declaration names from shader source.
fn declarations(source: &str) -> (Vec<String>, Vec<String>) {
    let mut attributes = Vec::new();
    let mut uniforms = Vec::new();
    for line in source.lines() {
        let decl = line.trim().trim_end_matches(';');
        let mut words = decl.split_whitespace();
        let list = match words.next() {
            Some("attribute") => &mut attributes,
            Some("uniform") => &mut uniforms,
            _ => continue,
        };
        if let Some(name) = words.last() {
            list.push(name.to_string());
        }
    }
    (attributes, uniforms)
}

fn check_len(what: &str, pixels: &[u8], size: UVec2) -> Result<(), GlError> {
    let expected = size.x as usize * size.y as usize * BYTES_PER_PIXEL;
    if pixels.len() != expected {
        return Err(GlError::InvalidValue(format!(
            "{what}: expected {expected} bytes, got {}",
            pixels.len()
        )));
    }
    Ok(())
}

impl RenderingContext for SoftwareContext {
    fn create_texture(&self) -> Result<TextureId, GlError> {
        let mut st = self.state.lock();
        let id = TextureId(st.alloc_id());
        st.textures.insert(id, SoftTexture::new());
        Ok(id)
    }

    fn delete_texture(&self, texture: TextureId) {
        let mut st = self.state.lock();
        st.textures.remove(&texture);
        st.bound_textures.retain(|_, t| *t != texture);
    }

    fn is_texture(&self, texture: TextureId) -> bool {
        self.state.lock().textures.contains_key(&texture)
    }

    fn active_texture(&self, unit: u32) {
        self.state.lock().active_unit = unit.min(MAX_TEXTURE_UNITS - 1);
    }

    fn bind_texture(&self, texture: Option<TextureId>) {
        let mut st = self.state.lock();
        let unit = st.active_unit;
        match texture {
            Some(id) => st.bound_textures.insert(unit, id),
            None => st.bound_textures.remove(&unit),
        };
    }

    fn tex_image_2d(&self, size: UVec2, pixels: Option<&[u8]>) -> Result<(), GlError> {
        if size.x > MAX_TEXTURE_DIMENSION || size.y > MAX_TEXTURE_DIMENSION {
            return Err(GlError::InvalidValue(format!(
                "texture size {}x{} exceeds {MAX_TEXTURE_DIMENSION}",
                size.x, size.y
            )));
        }
        if let Some(px) = pixels {
            check_len("tex_image_2d", px, size)?;
        }

        let mut st = self.state.lock();
        let tex = st.bound_texture_mut()?;
        tex.size = size;
        tex.texels = match pixels {
            Some(px) => px
                .chunks_exact(BYTES_PER_PIXEL)
                .map(|c| [c[0], c[1], c[2], c[3]])
                .collect(),
            None => vec![[0; 4]; size.x as usize * size.y as usize],
        };
        Ok(())
    }

    fn tex_sub_image_2d(&self, region: Rect, pixels: &[u8]) -> Result<(), GlError> {
        check_len("tex_sub_image_2d", pixels, region.size())?;

        let mut st = self.state.lock();
        let tex = st.bound_texture_mut()?;
        if !Rect::from_size(tex.size).contains_rect(&region) {
            return Err(GlError::InvalidValue(format!(
                "region {region:?} outside texture of size {}",
                tex.size
            )));
        }
        if region.is_empty() {
            return Ok(());
        }

        let width = tex.size.x as usize;
        let row_len = region.width() as usize;
        for (row, src) in pixels
            .chunks_exact(row_len * BYTES_PER_PIXEL)
            .enumerate()
        {
            let y = region.min.y as usize + row;
            let start = y * width + region.min.x as usize;
            for (dst, px) in tex.texels[start..start + row_len]
                .iter_mut()
                .zip(src.chunks_exact(BYTES_PER_PIXEL))
            {
                *dst = [px[0], px[1], px[2], px[3]];
            }
        }
        Ok(())
    }

    fn tex_parameter(&self, param: TexParam) {
        let mut st = self.state.lock();
        let Ok(tex) = st.bound_texture_mut() else {
            return;
        };
        match param {
            TexParam::MagFilter(f) => tex.mag_filter = f,
            TexParam::MinFilter(f) => tex.min_filter = f,
            TexParam::WrapS(w) => tex.wrap_s = w,
            TexParam::WrapT(w) => tex.wrap_t = w,
        }
    }

    fn create_buffer(&self) -> Result<BufferId, GlError> {
        let mut st = self.state.lock();
        let id = BufferId(st.alloc_id());
        st.buffers.insert(id, Vec::new());
        Ok(id)
    }

    fn delete_buffer(&self, buffer: BufferId) {
        let mut st = self.state.lock();
        st.buffers.remove(&buffer);
        if st.array_buffer == Some(buffer) {
            st.array_buffer = None;
        }
    }

    fn bind_array_buffer(&self, buffer: Option<BufferId>) {
        self.state.lock().array_buffer = buffer;
    }

    fn buffer_data(&self, data: &[u8], _usage: BufferUsage) -> Result<(), GlError> {
        let mut st = self.state.lock();
        let id = st
            .array_buffer
            .ok_or_else(|| GlError::InvalidOperation("no array buffer bound".into()))?;
        let buf = st
            .buffers
            .get_mut(&id)
            .ok_or(GlError::UnknownObject { kind: "buffer", id: id.0 })?;
        buf.clear();
        buf.extend_from_slice(data);
        Ok(())
    }

    fn create_shader(&self, kind: ShaderKind) -> Result<ShaderId, GlError> {
        let mut st = self.state.lock();
        let id = ShaderId(st.alloc_id());
        st.shaders.insert(
            id,
            SoftShader {
                kind,
                source: String::new(),
                compiled: false,
                log: String::new(),
                attributes: Vec::new(),
                uniforms: Vec::new(),
            },
        );
        Ok(id)
    }

    fn shader_source(&self, shader: ShaderId, source: &str) {
        if let Some(s) = self.state.lock().shaders.get_mut(&shader) {
            s.source = source.to_string();
        }
    }

    fn compile_shader(&self, shader: ShaderId) {
        let mut st = self.state.lock();
        let Some(s) = st.shaders.get_mut(&shader) else {
            return;
        };
        if !s.source.contains("void main") {
            s.compiled = false;
            s.log = "missing entry point `void main`".to_string();
            debug!(kind = %s.kind, "Software shader compilation failed");
            return;
        }
        let (attributes, uniforms) = declarations(&s.source);
        s.attributes = attributes;
        s.uniforms = uniforms;
        s.compiled = true;
        s.log.clear();
    }

    fn shader_compile_status(&self, shader: ShaderId) -> bool {
        self.state
            .lock()
            .shaders
            .get(&shader)
            .is_some_and(|s| s.compiled)
    }

    fn shader_info_log(&self, shader: ShaderId) -> String {
        self.state
            .lock()
            .shaders
            .get(&shader)
            .map(|s| s.log.clone())
            .unwrap_or_default()
    }

    fn delete_shader(&self, shader: ShaderId) {
        self.state.lock().shaders.remove(&shader);
    }

    fn create_program(&self) -> Result<ProgramId, GlError> {
        let mut st = self.state.lock();
        let id = ProgramId(st.alloc_id());
        st.programs.insert(id, SoftProgram::default());
        Ok(id)
    }

    fn attach_shader(&self, program: ProgramId, shader: ShaderId) {
        if let Some(p) = self.state.lock().programs.get_mut(&program) {
            p.shaders.push(shader);
        }
    }

    fn link_program(&self, program: ProgramId) {
        let mut st = self.state.lock();
        let State { shaders, programs, .. } = &mut *st;
        let Some(p) = programs.get_mut(&program) else {
            return;
        };

        let stage = |kind: ShaderKind| {
            p.shaders
                .iter()
                .filter_map(|id| shaders.get(id))
                .find(|s| s.kind == kind && s.compiled)
        };
        let (Some(vs), Some(fs)) = (stage(ShaderKind::Vertex), stage(ShaderKind::Fragment)) else {
            p.linked = false;
            p.log = "program needs one compiled vertex and one compiled fragment shader".into();
            return;
        };

        let mut uniforms = vs.uniforms.clone();
        for u in &fs.uniforms {
            if !uniforms.contains(u) {
                uniforms.push(u.clone());
            }
        }
        p.attributes = vs.attributes.clone();
        p.uniforms = uniforms;
        p.values.clear();
        p.linked = true;
        p.log.clear();
    }

    fn program_link_status(&self, program: ProgramId) -> bool {
        self.state
            .lock()
            .programs
            .get(&program)
            .is_some_and(|p| p.linked)
    }

    fn program_info_log(&self, program: ProgramId) -> String {
        self.state
            .lock()
            .programs
            .get(&program)
            .map(|p| p.log.clone())
            .unwrap_or_default()
    }

    fn is_program(&self, program: ProgramId) -> bool {
        self.state.lock().programs.contains_key(&program)
    }

    fn delete_program(&self, program: ProgramId) {
        let mut st = self.state.lock();
        st.programs.remove(&program);
        if st.current_program == Some(program) {
            st.current_program = None;
        }
    }

    fn use_program(&self, program: Option<ProgramId>) {
        self.state.lock().current_program = program;
    }

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<AttribLocation> {
        let st = self.state.lock();
        st.programs
            .get(&program)
            .filter(|p| p.linked)?
            .attribute(name)
            .map(AttribLocation)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let st = self.state.lock();
        let p = st.programs.get(&program).filter(|p| p.linked)?;
        p.uniforms
            .iter()
            .position(|u| u == name)
            .map(|i| UniformLocation(i as u32))
    }

    fn enable_vertex_attrib_array(&self, location: AttribLocation) {
        self.state.lock().attribs.entry(location.0).or_default().enabled = true;
    }

    fn disable_vertex_attrib_array(&self, location: AttribLocation) {
        self.state.lock().attribs.entry(location.0).or_default().enabled = false;
    }

    fn vertex_attrib_pointer_f32(
        &self,
        location: AttribLocation,
        components: u32,
        stride: u32,
        offset: u32,
    ) {
        let mut st = self.state.lock();
        let buffer = st.array_buffer;
        let ptr = st.attribs.entry(location.0).or_default();
        ptr.buffer = buffer;
        ptr.components = components;
        ptr.stride = stride;
        ptr.offset = offset;
    }

    fn uniform_matrix_3(&self, location: UniformLocation, value: &[f32; 9]) {
        self.state
            .lock()
            .set_uniform(location, UniformValue::Mat3(*value));
    }

    fn uniform_1_i32(&self, location: UniformLocation, value: i32) {
        self.state.lock().set_uniform(location, UniformValue::Int(value));
    }

    fn uniform_4_f32(&self, location: UniformLocation, value: [f32; 4]) {
        self.state.lock().set_uniform(location, UniformValue::Vec4(value));
    }

    fn enable(&self, capability: Capability) {
        match capability {
            Capability::Blend => self.state.lock().blend = true,
        }
    }

    fn disable(&self, capability: Capability) {
        match capability {
            Capability::Blend => self.state.lock().blend = false,
        }
    }

    fn blend_func(&self, src: BlendFactor, dst: BlendFactor) {
        let mut st = self.state.lock();
        st.blend_src = src;
        st.blend_dst = dst;
    }

    fn viewport(&self, rect: Rect) {
        self.state.lock().viewport = rect;
    }

    fn current_viewport(&self) -> Rect {
        self.state.lock().viewport
    }

    fn clear_color(&self, color: Color) {
        self.state.lock().clear_color = color;
    }

    fn clear(&self) {
        let mut st = self.state.lock();
        let px = st.clear_color.to_rgba8();
        st.surface.pixels.fill(px);
    }

    fn draw_arrays(&self, mode: Primitive, first: u32, count: u32) -> Result<(), GlError> {
        self.state.lock().draw(mode, first, count)
    }

    fn read_pixels(&self, rect: Rect) -> Result<Vec<u8>, GlError> {
        let st = self.state.lock();
        if !st.surface.bounds().contains_rect(&rect) {
            return Err(GlError::InvalidValue(format!(
                "read rectangle {rect:?} outside surface of size {}",
                st.surface.size
            )));
        }
        if rect.is_empty() {
            return Ok(Vec::new());
        }

        let width = st.surface.size.x as usize;
        let mut out = Vec::with_capacity(rect.area() * BYTES_PER_PIXEL);
        for y in rect.min.y..rect.max.y {
            let start = y as usize * width + rect.min.x as usize;
            for px in &st.surface.pixels[start..start + rect.width() as usize] {
                out.extend_from_slice(px);
            }
        }
        Ok(out)
    }

    fn flush(&self) {}

    fn surface_size(&self) -> UVec2 {
        self.state.lock().surface.size
    }

    fn resize_surface(&self, size: UVec2) {
        let mut st = self.state.lock();
        if st.surface.size != size {
            debug!(width = size.x, height = size.y, "Software surface resized");
            st.surface = Surface::new(size);
        }
    }
}
