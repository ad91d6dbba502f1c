//! The screen: registry of open windows and entry point of the driver.

use crate::buffer::Buffer;
use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::event::{PlatformEvent, WindowEvent, WindowId, WindowOptions};
use crate::gl_mutex::{ContextId, ContextMutex, GlContext};
use crate::platform::{PlatformError, WindowSystem};
use crate::texture::Texture;
use crate::window::{Window, WindowInner};
use crossbeam_channel::{Receiver, Sender, bounded, select};
use glam::UVec2;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// State shared by the screen, its window handles and the event dispatcher.
pub(crate) struct Shared {
    pub(crate) config: DriverConfig,
    pub(crate) platform: Arc<dyn WindowSystem>,
    pub(crate) gl: Arc<ContextMutex>,
    /// Open windows, by id. Never held while waiting on the context mutex.
    windows: Mutex<BTreeMap<WindowId, Arc<WindowInner>>>,
}

impl Shared {
    pub(crate) fn window(&self, id: WindowId) -> Result<Arc<WindowInner>> {
        self.windows
            .lock()
            .get(&id)
            .cloned()
            .ok_or(DriverError::WindowClosed(id))
    }

    fn open_window(self: &Arc<Self>, options: WindowOptions) -> Result<Window> {
        let size = self.config.default_window_size.to_uvec2();
        let title = options
            .title
            .unwrap_or_else(|| self.config.default_title.clone());

        let id = self.platform.create_window(size, &title)?;
        let inner = Arc::new(WindowInner::new(id, title, size));
        {
            let mut windows = self.windows.lock();
            if windows.contains_key(&id) {
                return Err(PlatformError::WindowCreation(format!("{id} is already open")).into());
            }
            windows.insert(id, inner.clone());
        }

        let attached = self
            .platform
            .attach_context(id)
            .map_err(DriverError::from)
            .and_then(|gl| {
                inner.attach_context(self.gl.attach(gl));
                inner.start(self)
            });
        if let Err(e) = attached {
            warn!("Failed to set up {}: {}", id, e);
            self.windows.lock().remove(&id);
            self.platform.destroy_window(id);
            return Err(e);
        }

        info!(
            window_id = %id,
            width = size.x,
            height = size.y,
            "Opened window"
        );
        Ok(Window::new(&inner, self.clone()))
    }

    /// Deregister a window and stop its draw loop. Returns false if it was
    /// not open.
    pub(crate) fn close_window(&self, id: WindowId) -> bool {
        let Some(inner) = self.windows.lock().remove(&id) else {
            return false;
        };

        inner.stop(self.config.shutdown_timeout());

        if let Some(ctx) = inner.context() {
            if self.context_in_use(ctx.id()) {
                debug!("{} closed; {} is still in use", id, ctx.id());
            } else if !self.gl.held_by_current_thread() {
                self.gl.release_programs(ctx);
            } else if !inner.release_programs_on_exit() {
                warn!("{} closed under the context mutex; keeping its programs", id);
            }
        }

        inner.events.send(WindowEvent::Closed);
        inner.events.release();
        info!("Closed window: {}", id);
        true
    }

    /// Whether an open window draws on the context `id`.
    fn context_in_use(&self, id: ContextId) -> bool {
        self.windows
            .lock()
            .values()
            .any(|w| w.context().is_some_and(|c| c.id() == id))
    }

    /// Lowest-id window with an attached context.
    fn first_context(&self) -> Option<GlContext> {
        self.windows
            .lock()
            .values()
            .find_map(|w| w.context().cloned())
    }

    fn dispatch(&self, event: PlatformEvent) {
        let PlatformEvent { window: id, event } = event;
        trace!(window_id = %id, ?event, "Dispatching platform event");

        if event == WindowEvent::Closed {
            if self.close_window(id) {
                self.platform.destroy_window(id);
            }
            return;
        }

        let Ok(inner) = self.window(id) else {
            debug!("Dropping {:?} for unknown {}", event, id);
            return;
        };

        match &event {
            WindowEvent::Resized(size) => {
                inner.set_size(*size);
                inner.pump.request_draw();
            }
            WindowEvent::Mapped | WindowEvent::Paint => {
                inner.pump.request_draw();
            }
            WindowEvent::DrawFailed(_) | WindowEvent::Closed => {}
        }
        inner.events.send(event);
    }
}

/// Entry point of the driver.
///
/// Owns the window registry and a dispatcher thread that feeds platform
/// events to the windows. Dropping the screen closes every open window.
pub struct Screen {
    shared: Arc<Shared>,
    stop_tx: Sender<()>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Screen {
    /// Start a driver on `platform`.
    pub fn new(platform: Arc<dyn WindowSystem>, config: DriverConfig) -> Result<Self> {
        config.validate()?;
        info!("Initializing screen");

        let shared = Arc::new(Shared {
            config,
            platform,
            gl: Arc::new(ContextMutex::new()),
            windows: Mutex::new(BTreeMap::new()),
        });

        let (stop_tx, stop_rx) = bounded(1);
        let events = shared.platform.events();
        let dispatcher = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("pane-events".to_string())
                .spawn(move || run_dispatcher(shared, events, stop_rx))?
        };

        Ok(Self {
            shared,
            stop_tx,
            dispatcher: Some(dispatcher),
        })
    }

    /// Start a driver with the default configuration.
    pub fn with_defaults(platform: Arc<dyn WindowSystem>) -> Result<Self> {
        Self::new(platform, DriverConfig::default())
    }

    pub fn config(&self) -> &DriverConfig {
        &self.shared.config
    }

    /// The mutex serializing all context operations of this screen.
    pub fn context_mutex(&self) -> &Arc<ContextMutex> {
        &self.shared.gl
    }

    /// Open a window at the configured default size and start its draw loop.
    pub fn new_window(&self, options: WindowOptions) -> Result<Window> {
        self.shared.open_window(options)
    }

    /// Create a texture on the context of the lowest-id open window.
    ///
    /// Fails with [`DriverError::NoContextAvailable`] while no window is open.
    pub fn new_texture(&self, size: UVec2) -> Result<Texture> {
        let ctx = self
            .shared
            .first_context()
            .ok_or(DriverError::NoContextAvailable)?;
        Texture::create(self.shared.gl.clone(), ctx, size)
    }

    /// Create a texture on `window`'s context.
    pub fn new_texture_for(&self, window: &Window, size: UVec2) -> Result<Texture> {
        let ctx = window.context()?;
        Texture::create(self.shared.gl.clone(), ctx, size)
    }

    /// Create a CPU pixel buffer. Never fails.
    pub fn new_buffer(&self, size: UVec2) -> Buffer {
        Buffer::new(size)
    }

    /// Deliver a platform event as if it came from the window system.
    pub fn dispatch(&self, event: PlatformEvent) {
        self.shared.dispatch(event);
    }

    pub fn window(&self, id: WindowId) -> Result<Window> {
        let inner = self.shared.window(id)?;
        Ok(Window::new(&inner, self.shared.clone()))
    }

    pub fn window_ids(&self) -> Vec<WindowId> {
        self.shared.windows.lock().keys().copied().collect()
    }

    pub fn window_count(&self) -> usize {
        self.shared.windows.lock().len()
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                warn!("Event dispatcher panicked");
            }
        }

        for id in self.window_ids() {
            if self.shared.close_window(id) {
                self.shared.platform.destroy_window(id);
            }
        }
        info!("Screen shut down");
    }
}

fn run_dispatcher(shared: Arc<Shared>, events: Receiver<PlatformEvent>, stop_rx: Receiver<()>) {
    debug!("Event dispatcher started");
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(events) -> msg => match msg {
                Ok(event) => shared.dispatch(event),
                Err(_) => {
                    debug!("Platform event stream closed");
                    break;
                }
            },
        }
    }
    debug!("Event dispatcher stopped");
}
