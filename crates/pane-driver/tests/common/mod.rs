//! Shared fixtures for the driver integration tests.

#![allow(dead_code)]

use glam::UVec2;
use pane_driver::pane_gl::{
    AttribLocation, BlendFactor, BufferId, BufferUsage, Capability, Color, GlError, Primitive,
    ProgramId, Rect, RenderingContext, ShaderId, ShaderKind, SoftwareContext, TexParam, TextureId,
    UniformLocation,
};
use pane_driver::{DriverConfig, HeadlessWindowSystem, Screen, WindowSize};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Calls that end a complete driver operation on the context.
pub const OPERATION_ENDS: &[&str] = &[
    "tex_parameter_wrap_t",
    "tex_sub_image_2d",
    "draw_arrays",
    "delete_texture",
    "flush",
    "read_pixels",
];

/// A software context that logs every call with the calling thread and
/// yields after each one, so unserialized call sequences interleave.
pub struct RecordingContext {
    inner: SoftwareContext,
    log: Mutex<Vec<(ThreadId, &'static str)>>,
}

impl RecordingContext {
    pub fn new(size: UVec2) -> Self {
        Self {
            inner: SoftwareContext::new(size),
            log: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: &'static str) {
        self.log.lock().push((thread::current().id(), call));
        thread::yield_now();
    }

    pub fn calls(&self) -> Vec<(ThreadId, &'static str)> {
        self.log.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.log.lock().iter().filter(|(_, c)| *c == call).count()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    /// Positions where the log switches thread in the middle of an operation.
    pub fn split_operations(&self) -> Vec<usize> {
        let log = self.log.lock();
        log.windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[0].0 != pair[1].0 && !OPERATION_ENDS.contains(&pair[0].1))
            .map(|(i, _)| i + 1)
            .collect()
    }
}

impl RenderingContext for RecordingContext {
    fn create_texture(&self) -> Result<TextureId, GlError> {
        self.record("create_texture");
        self.inner.create_texture()
    }

    fn delete_texture(&self, texture: TextureId) {
        self.record("delete_texture");
        self.inner.delete_texture(texture)
    }

    fn is_texture(&self, texture: TextureId) -> bool {
        self.record("is_texture");
        self.inner.is_texture(texture)
    }

    fn active_texture(&self, unit: u32) {
        self.record("active_texture");
        self.inner.active_texture(unit)
    }

    fn bind_texture(&self, texture: Option<TextureId>) {
        self.record("bind_texture");
        self.inner.bind_texture(texture)
    }

    fn tex_image_2d(&self, size: UVec2, pixels: Option<&[u8]>) -> Result<(), GlError> {
        self.record("tex_image_2d");
        self.inner.tex_image_2d(size, pixels)
    }

    fn tex_sub_image_2d(&self, region: Rect, pixels: &[u8]) -> Result<(), GlError> {
        self.record("tex_sub_image_2d");
        self.inner.tex_sub_image_2d(region, pixels)
    }

    fn tex_parameter(&self, param: TexParam) {
        self.record(match param {
            TexParam::WrapT(_) => "tex_parameter_wrap_t",
            _ => "tex_parameter",
        });
        self.inner.tex_parameter(param)
    }

    fn create_buffer(&self) -> Result<BufferId, GlError> {
        self.record("create_buffer");
        self.inner.create_buffer()
    }

    fn delete_buffer(&self, buffer: BufferId) {
        self.record("delete_buffer");
        self.inner.delete_buffer(buffer)
    }

    fn bind_array_buffer(&self, buffer: Option<BufferId>) {
        self.record("bind_array_buffer");
        self.inner.bind_array_buffer(buffer)
    }

    fn buffer_data(&self, data: &[u8], usage: BufferUsage) -> Result<(), GlError> {
        self.record("buffer_data");
        self.inner.buffer_data(data, usage)
    }

    fn create_shader(&self, kind: ShaderKind) -> Result<ShaderId, GlError> {
        self.record("create_shader");
        self.inner.create_shader(kind)
    }

    fn shader_source(&self, shader: ShaderId, source: &str) {
        self.record("shader_source");
        self.inner.shader_source(shader, source)
    }

    fn compile_shader(&self, shader: ShaderId) {
        self.record("compile_shader");
        self.inner.compile_shader(shader)
    }

    fn shader_compile_status(&self, shader: ShaderId) -> bool {
        self.record("shader_compile_status");
        self.inner.shader_compile_status(shader)
    }

    fn shader_info_log(&self, shader: ShaderId) -> String {
        self.record("shader_info_log");
        self.inner.shader_info_log(shader)
    }

    fn delete_shader(&self, shader: ShaderId) {
        self.record("delete_shader");
        self.inner.delete_shader(shader)
    }

    fn create_program(&self) -> Result<ProgramId, GlError> {
        self.record("create_program");
        self.inner.create_program()
    }

    fn attach_shader(&self, program: ProgramId, shader: ShaderId) {
        self.record("attach_shader");
        self.inner.attach_shader(program, shader)
    }

    fn link_program(&self, program: ProgramId) {
        self.record("link_program");
        self.inner.link_program(program)
    }

    fn program_link_status(&self, program: ProgramId) -> bool {
        self.record("program_link_status");
        self.inner.program_link_status(program)
    }

    fn program_info_log(&self, program: ProgramId) -> String {
        self.record("program_info_log");
        self.inner.program_info_log(program)
    }

    fn is_program(&self, program: ProgramId) -> bool {
        self.record("is_program");
        self.inner.is_program(program)
    }

    fn delete_program(&self, program: ProgramId) {
        self.record("delete_program");
        self.inner.delete_program(program)
    }

    fn use_program(&self, program: Option<ProgramId>) {
        self.record("use_program");
        self.inner.use_program(program)
    }

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<AttribLocation> {
        self.record("attrib_location");
        self.inner.attrib_location(program, name)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.record("uniform_location");
        self.inner.uniform_location(program, name)
    }

    fn enable_vertex_attrib_array(&self, location: AttribLocation) {
        self.record("enable_vertex_attrib_array");
        self.inner.enable_vertex_attrib_array(location)
    }

    fn disable_vertex_attrib_array(&self, location: AttribLocation) {
        self.record("disable_vertex_attrib_array");
        self.inner.disable_vertex_attrib_array(location)
    }

    fn vertex_attrib_pointer_f32(
        &self,
        location: AttribLocation,
        components: u32,
        stride: u32,
        offset: u32,
    ) {
        self.record("vertex_attrib_pointer_f32");
        self.inner
            .vertex_attrib_pointer_f32(location, components, stride, offset)
    }

    fn uniform_matrix_3(&self, location: UniformLocation, value: &[f32; 9]) {
        self.record("uniform_matrix_3");
        self.inner.uniform_matrix_3(location, value)
    }

    fn uniform_1_i32(&self, location: UniformLocation, value: i32) {
        self.record("uniform_1_i32");
        self.inner.uniform_1_i32(location, value)
    }

    fn uniform_4_f32(&self, location: UniformLocation, value: [f32; 4]) {
        self.record("uniform_4_f32");
        self.inner.uniform_4_f32(location, value)
    }

    fn enable(&self, capability: Capability) {
        self.record("enable");
        self.inner.enable(capability)
    }

    fn disable(&self, capability: Capability) {
        self.record("disable");
        self.inner.disable(capability)
    }

    fn blend_func(&self, src: BlendFactor, dst: BlendFactor) {
        self.record("blend_func");
        self.inner.blend_func(src, dst)
    }

    fn viewport(&self, rect: Rect) {
        self.record("viewport");
        self.inner.viewport(rect)
    }

    fn current_viewport(&self) -> Rect {
        self.record("current_viewport");
        self.inner.current_viewport()
    }

    fn clear_color(&self, color: Color) {
        self.record("clear_color");
        self.inner.clear_color(color)
    }

    fn clear(&self) {
        self.record("clear");
        self.inner.clear()
    }

    fn draw_arrays(&self, mode: Primitive, first: u32, count: u32) -> Result<(), GlError> {
        self.record("draw_arrays");
        self.inner.draw_arrays(mode, first, count)
    }

    fn read_pixels(&self, rect: Rect) -> Result<Vec<u8>, GlError> {
        self.record("read_pixels");
        self.inner.read_pixels(rect)
    }

    fn flush(&self) {
        self.record("flush");
        self.inner.flush()
    }

    fn surface_size(&self) -> UVec2 {
        self.record("surface_size");
        self.inner.surface_size()
    }

    fn resize_surface(&self, size: UVec2) {
        self.record("resize_surface");
        self.inner.resize_surface(size)
    }
}

/// Test configuration: small windows, short shutdown.
pub fn config(width: u32, height: u32) -> DriverConfig {
    DriverConfig {
        default_window_size: WindowSize::new(width, height),
        shutdown_timeout_ms: 5_000,
        ..DriverConfig::default()
    }
}

/// A headless platform on plain software contexts.
pub fn headless(width: u32, height: u32) -> (Arc<HeadlessWindowSystem>, Screen) {
    let platform = Arc::new(HeadlessWindowSystem::new());
    let screen = Screen::new(platform.clone(), config(width, height)).unwrap();
    (platform, screen)
}

/// A headless platform whose contexts record their calls.
pub fn recording(
    width: u32,
    height: u32,
) -> (
    Arc<HeadlessWindowSystem>,
    Screen,
    Arc<Mutex<Vec<Arc<RecordingContext>>>>,
) {
    let contexts: Arc<Mutex<Vec<Arc<RecordingContext>>>> = Arc::default();
    let platform = {
        let contexts = contexts.clone();
        Arc::new(HeadlessWindowSystem::with_context_factory(
            move |size| -> Arc<dyn RenderingContext> {
                let ctx = Arc::new(RecordingContext::new(size));
                contexts.lock().push(ctx.clone());
                ctx
            },
        ))
    };
    let screen = Screen::new(platform.clone(), config(width, height)).unwrap();
    (platform, screen, contexts)
}

/// A headless platform that hands every window the same recording context.
pub fn shared_recording(
    width: u32,
    height: u32,
) -> (Arc<HeadlessWindowSystem>, Screen, Arc<RecordingContext>) {
    let ctx = Arc::new(RecordingContext::new(UVec2::new(width, height)));
    let platform = {
        let ctx = ctx.clone();
        Arc::new(HeadlessWindowSystem::with_context_factory(
            move |_size| -> Arc<dyn RenderingContext> { ctx.clone() },
        ))
    };
    let screen = Screen::new(platform.clone(), config(width, height)).unwrap();
    (platform, screen, ctx)
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

pub const TIMEOUT: Duration = Duration::from_secs(5);
