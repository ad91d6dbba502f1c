//! An in-process window system.
//!
//! Windows are plain software surfaces. Presenting a window snapshots its
//! surface so callers can inspect what would have reached the screen, and
//! user interaction (paint requests, resizes, close buttons) is simulated
//! by injecting events.

use crate::event::{PlatformEvent, WindowEvent, WindowId};
use crate::platform::{PlatformError, WindowSystem};
use crossbeam_channel::{Receiver, Sender, unbounded};
use glam::UVec2;
use image::RgbaImage;
use pane_gl::{Rect, RenderingContext, SoftwareContext};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

type ContextFactory = Box<dyn Fn(UVec2) -> Arc<dyn RenderingContext> + Send + Sync>;

struct HeadlessWindow {
    title: String,
    context: Arc<dyn RenderingContext>,
    presented: Option<RgbaImage>,
    presents: u64,
}

/// Window system backed by off-screen contexts.
pub struct HeadlessWindowSystem {
    next_id: AtomicU64,
    windows: Mutex<HashMap<WindowId, HeadlessWindow>>,
    events_tx: Sender<PlatformEvent>,
    events_rx: Receiver<PlatformEvent>,
    make_context: ContextFactory,
}

impl HeadlessWindowSystem {
    /// Every window gets its own [`SoftwareContext`].
    pub fn new() -> Self {
        Self::with_context_factory(|size| -> Arc<dyn RenderingContext> {
            Arc::new(SoftwareContext::new(size))
        })
    }

    /// Use `factory` to build each window's context from its initial size.
    pub fn with_context_factory<F>(factory: F) -> Self
    where
        F: Fn(UVec2) -> Arc<dyn RenderingContext> + Send + Sync + 'static,
    {
        let (events_tx, events_rx) = unbounded();
        Self {
            next_id: AtomicU64::new(1),
            windows: Mutex::new(HashMap::new()),
            events_tx,
            events_rx,
            make_context: Box::new(factory),
        }
    }

    /// Inject an arbitrary window-system event.
    pub fn emit(&self, window: WindowId, event: WindowEvent) {
        let _ = self.events_tx.send(PlatformEvent::new(window, event));
    }

    /// Simulate the window system asking for a repaint.
    pub fn request_paint(&self, window: WindowId) {
        self.emit(window, WindowEvent::Paint);
    }

    /// Resize a window's surface and report it.
    pub fn resize(&self, window: WindowId, size: UVec2) -> Result<(), PlatformError> {
        {
            let windows = self.windows.lock();
            let w = windows
                .get(&window)
                .ok_or(PlatformError::UnknownWindow(window))?;
            w.context.resize_surface(size);
        }
        debug!("Resized {} to {}x{}", window, size.x, size.y);
        self.emit(window, WindowEvent::Resized(size));
        Ok(())
    }

    /// Simulate the user closing a window.
    pub fn close(&self, window: WindowId) {
        self.emit(window, WindowEvent::Closed);
    }

    /// The last frame presented on a window.
    pub fn presented_frame(&self, window: WindowId) -> Option<RgbaImage> {
        self.windows
            .lock()
            .get(&window)
            .and_then(|w| w.presented.clone())
    }

    pub fn present_count(&self, window: WindowId) -> u64 {
        self.windows.lock().get(&window).map_or(0, |w| w.presents)
    }

    pub fn window_title(&self, window: WindowId) -> Option<String> {
        self.windows.lock().get(&window).map(|w| w.title.clone())
    }

    pub fn is_open(&self, window: WindowId) -> bool {
        self.windows.lock().contains_key(&window)
    }

    pub fn window_count(&self) -> usize {
        self.windows.lock().len()
    }
}

impl Default for HeadlessWindowSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowSystem for HeadlessWindowSystem {
    fn create_window(&self, size: UVec2, title: &str) -> Result<WindowId, PlatformError> {
        if size.x == 0 || size.y == 0 {
            return Err(PlatformError::WindowCreation(format!(
                "invalid size {}x{}",
                size.x, size.y
            )));
        }

        let id = WindowId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let window = HeadlessWindow {
            title: title.to_string(),
            context: (self.make_context)(size),
            presented: None,
            presents: 0,
        };
        self.windows.lock().insert(id, window);
        debug!("Created headless {} \"{}\"", id, title);
        Ok(id)
    }

    fn attach_context(&self, id: WindowId) -> Result<Arc<dyn RenderingContext>, PlatformError> {
        let context = self
            .windows
            .lock()
            .get(&id)
            .map(|w| w.context.clone())
            .ok_or(PlatformError::NoContext(id))?;

        // Mapped once a context is attached, like a real window coming up
        self.emit(id, WindowEvent::Mapped);
        Ok(context)
    }

    fn present(&self, id: WindowId, gl: &dyn RenderingContext) -> Result<(), PlatformError> {
        let size = gl.surface_size();
        let pixels = gl
            .read_pixels(Rect::from_size(size))
            .map_err(|e| PlatformError::Present {
                window: id,
                reason: e.to_string(),
            })?;
        let image = RgbaImage::from_raw(size.x, size.y, pixels).ok_or_else(|| {
            PlatformError::Present {
                window: id,
                reason: "surface read-back has the wrong length".to_string(),
            }
        })?;

        let mut windows = self.windows.lock();
        let w = windows.get_mut(&id).ok_or(PlatformError::UnknownWindow(id))?;
        w.presented = Some(image);
        w.presents += 1;
        trace!("Presented {} (frame {})", id, w.presents);
        Ok(())
    }

    fn destroy_window(&self, id: WindowId) {
        if self.windows.lock().remove(&id).is_some() {
            debug!("Destroyed headless {}", id);
        }
    }

    fn events(&self) -> Receiver<PlatformEvent> {
        self.events_rx.clone()
    }
}
