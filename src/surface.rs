//! Host drawing surface and its resize listeners.
//!
//! The host (winit window, browser canvas, offscreen target) owns a
//! [`HostSurface`] and calls [`HostSurface::notify_resize`] when its size
//! changes. Subscribers get the latest size in their listener slot and apply it
//! on their own schedule, so a resize arriving mid-frame never re-enters the
//! renderer.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel_ratio: 1.0,
        }
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug)]
struct SurfaceInner {
    dimensions: Cell<Dimensions>,
    next_listener: Cell<u64>,
    listeners: RefCell<Vec<(ListenerId, Rc<Cell<Option<Dimensions>>>)>>,
}

#[derive(Debug, Clone)]
pub struct HostSurface {
    inner: Rc<SurfaceInner>,
}

/// Subscription handed to a listener. Holds the most recent unapplied size.
#[derive(Debug)]
pub struct ResizeListener {
    id: ListenerId,
    pending: Rc<Cell<Option<Dimensions>>>,
}

impl ResizeListener {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Take the latest size delivered since the previous call.
    pub fn take(&self) -> Option<Dimensions> {
        self.pending.take()
    }
}

impl HostSurface {
    pub fn new(dimensions: Dimensions) -> Self {
        Self {
            inner: Rc::new(SurfaceInner {
                dimensions: Cell::new(dimensions),
                next_listener: Cell::new(1),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        self.inner.dimensions.get()
    }

    pub fn listen(&self) -> ResizeListener {
        let id = ListenerId(self.inner.next_listener.get());
        self.inner.next_listener.set(id.0 + 1);
        let pending = Rc::new(Cell::new(None));
        self.inner.listeners.borrow_mut().push((id, pending.clone()));
        ResizeListener { id, pending }
    }

    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(listener, _)| *listener != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Record a new size and deliver it to every listener.
    pub fn notify_resize(&self, dimensions: Dimensions) {
        self.inner.dimensions.set(dimensions);
        for (_, pending) in self.inner.listeners.borrow().iter() {
            pending.set(Some(dimensions));
        }
    }
}
