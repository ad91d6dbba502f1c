//! The context mutex.
//!
//! A rendering context carries hidden global state, so an operation that is
//! conceptually one step (upload a texture, draw a window) but is issued as
//! several context calls must not interleave with any other such operation.
//! [`ContextMutex::with`] is the only way the driver reaches a context, and
//! the lock it takes also guards the per-context program cache.
//!
//! The lock is not reentrant. Acquiring it again on a thread that already
//! holds it is a bug and panics instead of deadlocking. Holding one screen's
//! mutex while taking another's is fine.
//!
//! Windows attached to the same underlying context share one [`ContextId`]:
//! [`ContextMutex::attach`] hands out the id already assigned to a context
//! that is still alive.

use crate::programs::{FillProgram, SharedPrograms, TextureProgram};
use pane_gl::{GlError, RenderingContext};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ptr;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Global context ID counter
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Addresses of the context mutexes held by this thread.
    static HOLDING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Process-unique identifier of an attached rendering context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context({})", self.0)
    }
}

/// A rendering context attached to the driver.
#[derive(Clone)]
pub struct GlContext {
    id: ContextId,
    gl: Arc<dyn RenderingContext>,
}

impl GlContext {
    /// Wrap `gl` under a fresh id. Contexts shared between windows should
    /// go through [`ContextMutex::attach`] instead.
    pub fn new(gl: Arc<dyn RenderingContext>) -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            gl,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }
}

impl fmt::Debug for GlContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlContext").field("id", &self.id).finish()
    }
}

/// Marks a mutex as held by this thread until dropped, also on unwind.
struct HeldFlag(usize);

impl HeldFlag {
    fn set(addr: usize) -> Self {
        HOLDING.with(|h| h.borrow_mut().push(addr));
        HeldFlag(addr)
    }
}

impl Drop for HeldFlag {
    fn drop(&mut self) {
        HOLDING.with(|h| {
            let mut held = h.borrow_mut();
            if let Some(pos) = held.iter().rposition(|&a| a == self.0) {
                held.remove(pos);
            }
        });
    }
}

/// Serializes multi-call operations on rendering contexts.
pub struct ContextMutex {
    programs: Mutex<HashMap<ContextId, SharedPrograms>>,
    /// Ids handed out by `attach`, by underlying context.
    contexts: Mutex<Vec<(Weak<dyn RenderingContext>, ContextId)>>,
}

impl ContextMutex {
    pub fn new() -> Self {
        Self {
            programs: Mutex::new(HashMap::new()),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Wrap a context obtained from the platform.
    ///
    /// Returns the id already given to `gl` if another window attached the
    /// same context and it is still alive, otherwise a fresh one.
    pub fn attach(&self, gl: Arc<dyn RenderingContext>) -> GlContext {
        let mut contexts = self.contexts.lock();
        contexts.retain(|(weak, _)| weak.strong_count() > 0);

        let known = contexts
            .iter()
            .find(|(weak, _)| ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(&gl)))
            .map(|(_, id)| *id);
        if let Some(id) = known {
            debug!(context_id = %id, "Reusing attached context");
            return GlContext { id, gl };
        }

        let ctx = GlContext::new(gl);
        contexts.push((Arc::downgrade(&ctx.gl), ctx.id));
        ctx
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    /// Whether the calling thread is currently inside [`ContextMutex::with`]
    /// on this mutex.
    pub fn held_by_current_thread(&self) -> bool {
        let addr = self.addr();
        HOLDING.with(|h| h.borrow().contains(&addr))
    }

    /// Whether shared programs are cached for `id`.
    pub fn has_programs(&self, id: ContextId) -> bool {
        self.programs.lock().contains_key(&id)
    }

    /// Run `op` with exclusive use of `ctx`.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds this mutex.
    pub fn with<R>(&self, ctx: &GlContext, op: impl FnOnce(&mut Locked<'_>) -> R) -> R {
        assert!(
            !self.held_by_current_thread(),
            "context mutex acquired reentrantly; context operations must not nest"
        );

        let mut programs = self.programs.lock();
        let _held = HeldFlag::set(self.addr());
        let mut locked = Locked {
            ctx,
            programs: programs.entry(ctx.id).or_default(),
        };
        op(&mut locked)
    }

    /// Delete the shared programs compiled for `ctx` and drop its cache entry.
    pub fn release_programs(&self, ctx: &GlContext) {
        self.with(ctx, |locked| {
            locked.programs.release(ctx.gl.as_ref());
        });
        self.programs.lock().remove(&ctx.id);
        debug!(context_id = %ctx.id, "Released shared programs");
    }
}

impl Default for ContextMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive view of one context, handed to operations run under the mutex.
pub struct Locked<'a> {
    ctx: &'a GlContext,
    programs: &'a mut SharedPrograms,
}

impl Locked<'_> {
    pub fn gl(&self) -> &dyn RenderingContext {
        self.ctx.gl.as_ref()
    }

    pub fn context(&self) -> &GlContext {
        self.ctx
    }

    /// The texture-blit program, compiled on first use.
    pub fn texture_program(&mut self) -> Result<TextureProgram, GlError> {
        self.programs.texture(self.ctx.gl.as_ref(), self.ctx.id)
    }

    /// The solid-fill program, compiled on first use.
    pub fn fill_program(&mut self) -> Result<FillProgram, GlError> {
        self.programs.fill(self.ctx.gl.as_ref(), self.ctx.id)
    }
}
