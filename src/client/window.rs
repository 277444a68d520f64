//! The window capability a client agent is given

use tokio::sync::mpsc;

use crate::ipc::Bounds;

/// Window lifecycle events a client agent forwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    Move,
    Resize,
    Closed,
}

/// One GUI window inside the child process
pub trait WindowHandle: Send + Sync + 'static {
    /// Numeric handle, stable for the window's lifetime
    fn id(&self) -> u64;

    fn bounds(&self) -> Bounds;

    fn set_bounds(&self, bounds: Bounds);

    /// Reload the window's content, bypassing caches
    fn reload(&self);

    /// Subscribe to the window's move/resize/closed events
    fn events(&self) -> mpsc::UnboundedReceiver<WindowEvent>;
}
