//! Supervisor side - child process lifecycle and window connections
//!
//! [`Supervisor`] is a cheap, cloneable handle to a task that owns the child
//! process, the listening endpoint and every window connection. The
//! controlling program drives it with start/restart/stop/reload:
//!
//! ```no_run
//! # async fn demo() -> electron_connect::Result<()> {
//! use electron_connect::common::config::ServerConfig;
//! use electron_connect::server::{completion, LaunchArgs, Supervisor};
//!
//! let supervisor = Supervisor::new(ServerConfig::default());
//! let (callback, started) = completion();
//! supervisor.start(LaunchArgs::none(), Some(callback))?;
//! started.await.map_err(|_| electron_connect::Error::SupervisorGone)??;
//!
//! // On file changes:
//! supervisor.reload(None)?;
//! # Ok(())
//! # }
//! ```

mod handler;
mod process;
mod registry;
mod supervisor;

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::common::config::ServerConfig;
use crate::common::{Error, Result};
use crate::ipc::{Connection, ConnectionId};

pub use handler::{Handler, Router};
pub use process::{resolve_executable, ChildProcess, LaunchArgs, PRELOAD_ARG};
pub use registry::ConnectionRegistry;
pub use supervisor::{Callback, LifecycleState, SupervisorStatus, RELOAD_SETTLE};

use supervisor::{Command, StateChannels};

/// Handle to a running supervisor
#[derive(Clone)]
pub struct Supervisor {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<LifecycleState>,
    transitions: broadcast::Sender<LifecycleState>,
}

impl Supervisor {
    /// Create a supervisor in the `init` state
    ///
    /// Must be called from within a tokio runtime. The supervisor task ends,
    /// killing the child, when [`Supervisor::shutdown`] is called or the last
    /// handle is dropped.
    pub fn new(config: ServerConfig) -> Self {
        let (current, state) = watch::channel(LifecycleState::Init);
        let (transitions, _) = broadcast::channel(64);
        let commands = supervisor::spawn(
            config,
            StateChannels {
                current,
                transitions: transitions.clone(),
            },
        );

        Self {
            commands,
            state,
            transitions,
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::SupervisorGone)
    }

    /// Open the endpoint and launch the child
    pub fn start(&self, args: impl Into<LaunchArgs>, callback: Option<Callback>) -> Result<()> {
        self.send(Command::Start {
            args: args.into(),
            callback,
        })
    }

    /// Kill the child and launch it again once its windows are gone
    ///
    /// A callback from an earlier restart that has not completed yet is
    /// dropped without being invoked.
    pub fn restart(&self, args: impl Into<LaunchArgs>, callback: Option<Callback>) -> Result<()> {
        self.send(Command::Restart {
            args: args.into(),
            callback,
        })
    }

    /// Kill the child and close the endpoint
    pub fn stop(&self, callback: Option<Callback>) -> Result<()> {
        self.send(Command::Stop { callback })
    }

    /// Ask windows to reload; `None` reloads every window
    pub fn reload(&self, ids: Option<Vec<ConnectionId>>) -> Result<()> {
        self.send(Command::Reload { ids })
    }

    /// Send a message to every window
    pub fn broadcast(&self, kind: impl Into<String>, data: Value) -> Result<()> {
        self.send(Command::Broadcast {
            kind: kind.into(),
            data,
        })
    }

    /// Send a message to selected windows; unknown ids are skipped
    pub fn send_to(&self, ids: Vec<ConnectionId>, kind: impl Into<String>, data: Value) -> Result<()> {
        self.send(Command::SendTo {
            ids,
            kind: kind.into(),
            data,
        })
    }

    /// Register a handler for messages of one type sent by windows
    pub fn on<F>(&self, kind: impl Into<String>, handler: F) -> Result<()>
    where
        F: FnMut(&Value, &mut Connection) + Send + 'static,
    {
        self.send(Command::On {
            kind: kind.into(),
            handler: Box::new(handler),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Receive every state transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleState> {
        self.transitions.subscribe()
    }

    /// Wait until the supervisor reaches a state
    pub async fn wait_for(&self, target: LifecycleState) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| Error::SupervisorGone)
    }

    pub async fn status(&self) -> Result<SupervisorStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply })?;
        rx.await.map_err(|_| Error::SupervisorGone)
    }

    /// Stored attributes of the window registered under `id`
    pub async fn attributes(&self, id: &ConnectionId) -> Result<Option<HashMap<String, Value>>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Attributes {
            id: id.clone(),
            reply,
        })?;
        rx.await.map_err(|_| Error::SupervisorGone)
    }

    /// Kill the child, close the endpoint and end the supervisor task
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply })?;
        rx.await.map_err(|_| Error::SupervisorGone)
    }
}

/// A callback that forwards its first invocation to a receiver
pub fn completion() -> (Callback, oneshot::Receiver<Result<LifecycleState>>) {
    let (tx, rx) = oneshot::channel();
    let mut tx = Some(tx);
    let callback: Callback = Box::new(move |result| {
        if let Some(tx) = tx.take() {
            let _ = tx.send(result);
        }
    });
    (callback, rx)
}
