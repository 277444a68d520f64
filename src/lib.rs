//! electron-connect - live-reload plumbing for desktop GUI development
//!
//! A [`Supervisor`] launches the GUI host process and accepts one websocket
//! connection per window; a [`ClientAgent`] inside the process speaks for a
//! window. Between them they restart the process, reload windows and keep
//! window geometry across restarts.

pub mod cli;
pub mod client;
pub mod commands;
pub mod common;
pub mod ipc;
pub mod server;

pub use client::{ClientAgent, WindowEvent, WindowHandle};
pub use common::{Error, Result};
pub use ipc::{Bounds, ConnectionId};
pub use server::{LaunchArgs, LifecycleState, Supervisor};
