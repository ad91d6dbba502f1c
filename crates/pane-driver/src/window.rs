//! Windows and their draw loops.
//!
//! Each open window owns one OS thread that waits on the window's
//! [`DrawPump`] and, when asked, paints a frame under the context mutex and
//! then presents it. The application-facing [`Window`] is a handle that
//! refers to the window by id; once the window is closed, calls through it
//! fail with [`DriverError::WindowClosed`].

use crate::buffer::Buffer;
use crate::draw::{self, DrawOp, Frame};
use crate::error::{DriverError, Result};
use crate::event::{WindowEvent, WindowId};
use crate::gl_mutex::{ContextId, ContextMutex, GlContext};
use crate::platform::{PlatformError, WindowSystem};
use crate::pump::{DrawPump, EventPump, PumpState, Signal};
use crate::screen::Shared;
use crate::texture::Texture;
use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use glam::{Affine2, IVec2, UVec2};
use image::RgbaImage;
use pane_gl::{Color, GlError, Rect};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Paints one frame. Runs on the window's draw loop with the context locked.
pub type Painter = Box<dyn FnMut(&mut Frame<'_, '_>) -> Result<()> + Send>;

#[derive(Default)]
struct PainterSlot {
    painter: Option<Painter>,
    generation: u64,
}

struct Worker {
    handle: JoinHandle<()>,
    /// Disconnects when the draw loop thread ends.
    exited: Receiver<()>,
}

/// Registry-owned state of one open window.
pub(crate) struct WindowInner {
    id: WindowId,
    title: String,
    context: OnceLock<GlContext>,
    size: Mutex<UVec2>,
    pub(crate) pump: DrawPump,
    pub(crate) events: Arc<EventPump<WindowEvent>>,
    painter: Mutex<PainterSlot>,
    worker: Mutex<Option<Worker>>,
    exit: Mutex<LoopExit>,
}

/// Whether the draw loop still has to release the context's programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LoopExit {
    #[default]
    Running,
    ReleasePrograms,
    Exited,
}

impl WindowInner {
    pub(crate) fn new(id: WindowId, title: String, size: UVec2) -> Self {
        Self {
            id,
            title,
            context: OnceLock::new(),
            size: Mutex::new(size),
            pump: DrawPump::new(),
            events: Arc::new(EventPump::new()),
            painter: Mutex::new(PainterSlot::default()),
            worker: Mutex::new(None),
            exit: Mutex::new(LoopExit::default()),
        }
    }

    /// Ask the draw loop to release the context's shared programs once it
    /// exits. Returns false if the loop has already exited.
    pub(crate) fn release_programs_on_exit(&self) -> bool {
        let mut exit = self.exit.lock();
        if *exit == LoopExit::Exited {
            return false;
        }
        *exit = LoopExit::ReleasePrograms;
        true
    }

    pub(crate) fn attach_context(&self, ctx: GlContext) {
        if self.context.set(ctx).is_err() {
            warn!("{} already has a rendering context", self.id);
        }
    }

    pub(crate) fn context(&self) -> Option<&GlContext> {
        self.context.get()
    }

    fn require_context(&self) -> Result<GlContext> {
        self.context
            .get()
            .cloned()
            .ok_or(DriverError::Platform(PlatformError::NoContext(self.id)))
    }

    pub(crate) fn size(&self) -> UVec2 {
        *self.size.lock()
    }

    pub(crate) fn set_size(&self, size: UVec2) {
        *self.size.lock() = size;
    }

    fn set_painter(&self, painter: Option<Painter>) {
        let mut slot = self.painter.lock();
        slot.painter = painter;
        slot.generation += 1;
    }

    /// Start the draw loop thread.
    pub(crate) fn start(self: &Arc<Self>, shared: &Shared) -> Result<()> {
        let config = &shared.config;
        let draw_loop = DrawLoop {
            inner: self.clone(),
            mutex: shared.gl.clone(),
            platform: shared.platform.clone(),
            clear: config
                .clear_on_draw
                .then(|| Color::from(config.clear_color)),
        };

        let (exited_tx, exited) = bounded::<()>(0);
        let id = self.id;
        let handle = thread::Builder::new()
            .name(format!("{}-{}", config.draw_thread_prefix, id.0))
            .spawn(move || {
                let _exited = exited_tx;
                info!("Draw loop for {} started", id);
                draw_loop.run();
                info!("Draw loop for {} stopped", id);
            })?;

        *self.worker.lock() = Some(Worker { handle, exited });
        Ok(())
    }

    /// Stop the draw loop and wait up to `timeout` for it to exit.
    pub(crate) fn stop(&self, timeout: Duration) {
        self.pump.stop();

        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if worker.handle.thread().id() == thread::current().id() {
            // Closed from its own painter; the loop exits after this frame.
            debug!("{} closed from its draw loop", self.id);
            return;
        }

        match worker.exited.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    window_id = %self.id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Draw loop did not stop in time; detaching"
                );
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    warn!("Draw loop for {} panicked", self.id);
                }
            }
        }
    }

    /// Paint one frame on the locked context.
    fn paint(&self, mutex: &ContextMutex, clear: Option<Color>) -> Result<()> {
        let ctx = self.require_context()?;
        let size = self.size();

        let (mut painter, generation) = {
            let mut slot = self.painter.lock();
            (slot.painter.take(), slot.generation)
        };

        let result = mutex.with(&ctx, |locked| {
            let gl = locked.gl();
            gl.viewport(Rect::from_size(size));
            if let Some(color) = clear {
                gl.clear_color(color);
                gl.clear();
            }

            let result = match painter.as_mut() {
                Some(paint) => paint(&mut Frame::new(locked, self.id, size)),
                None => Ok(()),
            };
            locked.gl().flush();
            result
        });

        // Hand the painter back unless it was replaced while drawing
        if let Some(p) = painter {
            let mut slot = self.painter.lock();
            if slot.generation == generation {
                slot.painter = Some(p);
            }
        }
        result
    }
}

/// The body of a window's draw loop thread.
struct DrawLoop {
    inner: Arc<WindowInner>,
    mutex: Arc<ContextMutex>,
    platform: Arc<dyn WindowSystem>,
    clear: Option<Color>,
}

impl DrawLoop {
    fn run(self) {
        let id = self.inner.id;
        loop {
            match self.inner.pump.next_signal() {
                Signal::Stop => {
                    debug!("{} draw loop received stop", id);
                    break;
                }
                Signal::Draw => self.draw(),
                Signal::Publish => self.present(),
            }
        }
        self.inner.pump.mark_stopped();

        let exit = std::mem::replace(&mut *self.inner.exit.lock(), LoopExit::Exited);
        if exit == LoopExit::ReleasePrograms {
            if let Some(ctx) = self.inner.context() {
                debug!("{} releasing programs after close", id);
                self.mutex.release_programs(ctx);
            }
        }
    }

    fn draw(&self) {
        let id = self.inner.id;
        let pump = &self.inner.pump;
        pump.begin_draw();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.inner.paint(&self.mutex, self.clear)
        }));

        let drawn = match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("{} draw failed: {}", id, e);
                self.inner.events.send(WindowEvent::DrawFailed(e.to_string()));
                false
            }
            Err(panic_info) => {
                let error_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };

                // The painter was dropped while unwinding
                error!("{} painter panicked: {}", id, error_msg);
                self.inner.events.send(WindowEvent::DrawFailed(error_msg));
                false
            }
        };

        pump.finish_draw(drawn);
        if drawn {
            trace!(window_id = %id, frame = pump.frames_drawn(), "Frame drawn");
            pump.publish();
        }
    }

    fn present(&self) {
        let id = self.inner.id;
        let Some(ctx) = self.inner.context() else {
            return;
        };

        let result = self
            .mutex
            .with(ctx, |locked| self.platform.present(id, locked.gl()));
        match result {
            Ok(()) => self.inner.pump.presented(),
            Err(e) => warn!("{} present failed: {}", id, e),
        }
    }
}

/// Application handle to an open window.
///
/// Cheap to clone. All handles to a window observe the same event queue.
#[derive(Clone)]
pub struct Window {
    id: WindowId,
    events: Arc<EventPump<WindowEvent>>,
    shared: Arc<Shared>,
}

impl Window {
    pub(crate) fn new(inner: &WindowInner, shared: Arc<Shared>) -> Self {
        Self {
            id: inner.id,
            events: inner.events.clone(),
            shared,
        }
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    fn inner(&self) -> Result<Arc<WindowInner>> {
        self.shared.window(self.id)
    }

    pub fn title(&self) -> Result<String> {
        Ok(self.inner()?.title.clone())
    }

    /// Current surface size in pixels.
    pub fn size(&self) -> Result<UVec2> {
        Ok(self.inner()?.size())
    }

    pub fn bounds(&self) -> Result<Rect> {
        Ok(Rect::from_size(self.size()?))
    }

    /// The rendering context attached to this window.
    pub fn context_id(&self) -> Result<ContextId> {
        Ok(self.inner()?.require_context()?.id())
    }

    pub(crate) fn context(&self) -> Result<GlContext> {
        self.inner()?.require_context()
    }

    /// Ask the draw loop for a new frame. Never blocks.
    ///
    /// Returns `Ok(false)` when a request was already pending; the pending
    /// draw covers this one too.
    pub fn send_draw_request(&self) -> Result<bool> {
        Ok(self.inner()?.pump.request_draw())
    }

    /// Mark the current frame ready for presentation. Never blocks.
    pub fn publish(&self) -> Result<bool> {
        Ok(self.inner()?.pump.publish())
    }

    /// Install the closure that paints each frame.
    pub fn set_painter<F>(&self, painter: F) -> Result<()>
    where
        F: FnMut(&mut Frame<'_, '_>) -> Result<()> + Send + 'static,
    {
        self.inner()?.set_painter(Some(Box::new(painter)));
        Ok(())
    }

    pub fn clear_painter(&self) -> Result<()> {
        self.inner()?.set_painter(None);
        Ok(())
    }

    /// Wait for a draw that finishes after this call.
    pub fn wait_drawn(&self, timeout: Duration) -> Result<bool> {
        Ok(self.inner()?.pump.wait_drawn(timeout))
    }

    /// Wait until more than `seen` frames have been drawn. Pair with
    /// [`Window::frames_drawn`] sampled before the draw request.
    pub fn wait_drawn_since(&self, seen: u64, timeout: Duration) -> Result<bool> {
        Ok(self.inner()?.pump.wait_drawn_since(seen, timeout))
    }

    pub fn pump_state(&self) -> Result<PumpState> {
        Ok(self.inner()?.pump.state())
    }

    pub fn frames_drawn(&self) -> Result<u64> {
        Ok(self.inner()?.pump.frames_drawn())
    }

    pub fn frames_presented(&self) -> Result<u64> {
        Ok(self.inner()?.pump.frames_presented())
    }

    /// Block for the next window event. `None` once the window is closed
    /// and its queue drained.
    pub fn next_event(&self) -> Option<WindowEvent> {
        self.events.next_event()
    }

    pub fn next_event_timeout(&self, timeout: Duration) -> Option<WindowEvent> {
        self.events.next_event_timeout(timeout)
    }

    pub fn try_next_event(&self) -> Option<WindowEvent> {
        self.events.try_next_event()
    }

    /// Draw the `sr` part of `texture`, moved by `src2dst`, onto the window surface.
    pub fn draw(&self, src2dst: Affine2, texture: &Texture, sr: Rect, op: DrawOp) -> Result<()> {
        let inner = self.inner()?;
        let ctx = inner.require_context()?;
        let size = inner.size();
        self.shared.gl.with(&ctx, |locked| {
            locked.gl().viewport(Rect::from_size(size));
            draw::draw_texture(locked, size, src2dst, texture, sr, op)
        })
    }

    /// Fill `dr` on the window surface.
    pub fn fill(&self, dr: Rect, color: Color, op: DrawOp) -> Result<()> {
        let inner = self.inner()?;
        let ctx = inner.require_context()?;
        let size = inner.size();
        self.shared.gl.with(&ctx, |locked| {
            locked.gl().viewport(Rect::from_size(size));
            draw::fill_rect(locked, size, dr, color, op)
        })
    }

    /// Copy the `sr` part of `src` straight onto the window surface at `dp`.
    ///
    /// Stages the pixels through a temporary texture, all in one locked
    /// sequence.
    pub fn upload(&self, dp: IVec2, src: &Buffer, sr: Rect) -> Result<()> {
        let sr = sr.intersect(&src.bounds());
        if sr.is_empty() {
            return Ok(());
        }
        let pixels = src.region_bytes(sr)?;

        let inner = self.inner()?;
        let ctx = inner.require_context()?;
        let size = inner.size();
        let mutex = self.shared.gl.clone();
        self.shared.gl.with(&ctx, |locked| {
            let staging = Texture::create_locked(locked, mutex, sr.size())?;
            let result = staging
                .write_locked(locked.gl(), staging.bounds(), &pixels)
                .and_then(|()| {
                    locked.gl().viewport(Rect::from_size(size));
                    let to_dp = Affine2::from_translation(dp.as_vec2());
                    draw::draw_texture(locked, size, to_dp, &staging, staging.bounds(), DrawOp::Src)
                });
            locked.gl().delete_texture(staging.id());
            result
        })
    }

    /// Read back a region of the window surface.
    pub fn read_pixels(&self, rect: Rect) -> Result<RgbaImage> {
        let ctx = self.context()?;
        let bytes = self
            .shared
            .gl
            .with(&ctx, |locked| locked.gl().read_pixels(rect))?;
        RgbaImage::from_raw(rect.width(), rect.height(), bytes).ok_or_else(|| {
            DriverError::Gl(GlError::InvalidValue(format!(
                "read-back of {rect:?} returned a short buffer"
            )))
        })
    }

    /// Close the window and tear down its platform window.
    pub fn close(&self) -> Result<()> {
        if !self.shared.close_window(self.id) {
            return Err(DriverError::WindowClosed(self.id));
        }
        self.shared.platform.destroy_window(self.id);
        Ok(())
    }

    /// Whether the window is still registered.
    pub fn is_open(&self) -> bool {
        self.inner().is_ok()
    }
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window").field("id", &self.id).finish()
    }
}
