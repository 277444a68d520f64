//! Supervisor lifecycle state machine
//!
//! All supervisor state lives in [`SupervisorCore`], which runs as a single
//! task and handles one event at a time. The accept loop, per-connection
//! tasks, kill tasks and the reload settle timer only post events back, so no
//! state change is ever split across a suspension point.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;

use crate::common::config::ServerConfig;
use crate::common::{Error, Result};
use crate::ipc::{transport, Connection, ConnectionEvent, ConnectionId, MessageKind};

use super::handler::{Handler, Router};
use super::process::{self, ChildProcess, LaunchArgs};
use super::registry::ConnectionRegistry;

/// Delay after a reload before the state settles to `reloaded`
pub const RELOAD_SETTLE: Duration = Duration::from_secs(3);

/// Completion callback for start, restart and stop
///
/// May be invoked more than once: a restart with windows still open reports
/// `restarting` after the kill and `restarted` after the respawn.
pub type Callback = Box<dyn FnMut(Result<LifecycleState>) + Send + 'static>;

/// Supervisor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Created, never started
    Init,
    /// Binding the listening endpoint
    Starting,
    /// Child running
    Started,
    /// Child killed, respawn pending
    Restarting,
    /// Child respawned
    Restarted,
    /// Killing the child and closing the endpoint
    Stopping,
    /// Child gone, endpoint closed
    Stopped,
    /// Reload just requested
    Reloading,
    /// Reload request no longer fresh
    Reloaded,
}

impl LifecycleState {
    /// Whether windows can be reloaded in this state
    pub fn accepts_reload(self) -> bool {
        matches!(
            self,
            Self::Started | Self::Restarted | Self::Reloading | Self::Reloaded
        )
    }

    /// Whether the child can be restarted or stopped in this state
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Init | Self::Stopping | Self::Stopped)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Starting => write!(f, "starting"),
            Self::Started => write!(f, "started"),
            Self::Restarting => write!(f, "restarting"),
            Self::Restarted => write!(f, "restarted"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Reloading => write!(f, "reloading"),
            Self::Reloaded => write!(f, "reloaded"),
        }
    }
}

/// Point-in-time view of the supervisor
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub state: LifecycleState,
    pub port: u16,
    pub connection_count: usize,
    pub connection_ids: Vec<ConnectionId>,
    pub child_pid: Option<u32>,
}

/// Requests from [`super::Supervisor`] handles
pub(crate) enum Command {
    Start {
        args: LaunchArgs,
        callback: Option<Callback>,
    },
    Restart {
        args: LaunchArgs,
        callback: Option<Callback>,
    },
    Stop {
        callback: Option<Callback>,
    },
    Reload {
        ids: Option<Vec<ConnectionId>>,
    },
    Broadcast {
        kind: String,
        data: Value,
    },
    SendTo {
        ids: Vec<ConnectionId>,
        kind: String,
        data: Value,
    },
    On {
        kind: String,
        handler: Handler,
    },
    Status {
        reply: oneshot::Sender<SupervisorStatus>,
    },
    Attributes {
        id: ConnectionId,
        reply: oneshot::Sender<Option<HashMap<String, Value>>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Events posted by the supervisor's own satellite tasks
enum Internal {
    Accepted {
        id: ConnectionId,
        ws: WebSocketStream<TcpStream>,
    },
    KillCompleted {
        pid: u32,
        result: Result<()>,
    },
    ReloadSettled {
        generation: u64,
    },
}

/// Child process slot; at most one live child
enum ChildSlot {
    Empty,
    Running(ChildProcess),
    /// Kill issued, exit not yet confirmed
    Killing { pid: u32 },
}

/// What to do once a pending kill is confirmed
enum AfterKill {
    Nothing,
    Respawn,
    Stop(Option<Callback>),
}

/// Channels the core publishes its state on
pub(crate) struct StateChannels {
    pub current: watch::Sender<LifecycleState>,
    pub transitions: broadcast::Sender<LifecycleState>,
}

/// The supervisor's exclusively owned state
pub(crate) struct SupervisorCore {
    config: ServerConfig,
    executable: PathBuf,
    state: LifecycleState,
    channels: StateChannels,
    child: ChildSlot,
    after_kill: AfterKill,
    listener: Option<JoinHandle<()>>,
    registry: ConnectionRegistry,
    connection_count: usize,
    next_key: u64,
    router: Router,
    launch_args: LaunchArgs,
    start_callback: Option<Callback>,
    restart_callback: Option<Callback>,
    reload_timer: Option<JoinHandle<()>>,
    reload_generation: u64,
    internal_tx: mpsc::UnboundedSender<Internal>,
    connection_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

/// Spawn the supervisor task and return its command channel
pub(crate) fn spawn(config: ServerConfig, channels: StateChannels) -> mpsc::UnboundedSender<Command> {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let (connection_tx, connection_rx) = mpsc::unbounded_channel();

    let executable = process::resolve_executable(&config);
    let core = SupervisorCore {
        config,
        executable,
        state: LifecycleState::Init,
        channels,
        child: ChildSlot::Empty,
        after_kill: AfterKill::Nothing,
        listener: None,
        registry: ConnectionRegistry::new(),
        connection_count: 0,
        next_key: 1,
        router: Router::new(),
        launch_args: LaunchArgs::none(),
        start_callback: None,
        restart_callback: None,
        reload_timer: None,
        reload_generation: 0,
        internal_tx,
        connection_tx,
    };

    tokio::spawn(core.run(command_rx, internal_rx, connection_rx));
    command_tx
}

fn invoke(callback: &mut Option<Callback>, result: Result<LifecycleState>) {
    if let Some(callback) = callback.as_mut() {
        callback(result);
    }
}

impl SupervisorCore {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
        mut connections: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            return;
                        }
                    }
                    None => break,
                },
                Some(event) = internal.recv() => self.handle_internal(event),
                Some(event) = connections.recv() => self.handle_connection_event(event),
            }
        }

        // Every handle is gone; release the child and the endpoint
        tracing::debug!("Supervisor handles dropped, shutting down");
        self.shutdown().await;
    }

    /// Returns false once the supervisor should exit
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start { args, callback } => self.start(args, callback).await,
            Command::Restart { args, callback } => self.restart(args, callback),
            Command::Stop { callback } => self.stop(callback),
            Command::Reload { ids } => self.reload(ids),
            Command::Broadcast { kind, data } => {
                let delivered = self.registry.broadcast_all(&kind, &data);
                tracing::debug!(kind = %kind, delivered, "Broadcast");
            }
            Command::SendTo { ids, kind, data } => {
                self.registry.send_to(&ids, &kind, &data);
            }
            Command::On { kind, handler } => self.router.on(kind, handler),
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Attributes { id, reply } => {
                let attributes = self.registry.lookup(&id).map(|c| c.attributes().clone());
                let _ = reply.send(attributes);
            }
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Accepted { id, ws } => {
                // Handshakes begun before a stop can finish after it
                if self.listener.is_none()
                    || matches!(self.state, LifecycleState::Stopping | LifecycleState::Stopped)
                {
                    tracing::debug!(window_id = %id, state = %self.state, "Dropping late connection");
                    drop(ws);
                    return;
                }
                let key = self.next_key;
                self.next_key += 1;
                let connection = Connection::spawn(key, id.clone(), ws, self.connection_tx.clone());
                self.registry.register(connection);
                self.connection_count += 1;
                tracing::info!(window_id = %id, connections = self.connection_count, "Client started");
            }
            Internal::KillCompleted { pid, result } => self.kill_completed(pid, result),
            Internal::ReloadSettled { generation } => {
                if generation == self.reload_generation && self.state == LifecycleState::Reloading {
                    self.reload_timer = None;
                    self.set_state(LifecycleState::Reloaded);
                }
            }
        }
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Message { key, envelope } => {
                if let Some(connection) = self.registry.by_key_mut(key) {
                    self.router.dispatch(&envelope, connection);
                }
            }
            ConnectionEvent::Closed { key } => {
                let Some(connection) = self.registry.remove_key(key) else {
                    return;
                };
                self.connection_count = self.connection_count.saturating_sub(1);
                tracing::info!(window_id = %connection.id(), connections = self.connection_count, "Client closed");
                if self.connection_count == 0 {
                    self.last_connection_closed();
                }
            }
        }
    }

    fn set_state(&mut self, state: LifecycleState) {
        tracing::debug!(from = %self.state, to = %state, "State transition");
        self.state = state;
        self.channels.current.send_replace(state);
        let _ = self.channels.transitions.send(state);
    }

    fn status(&self) -> SupervisorStatus {
        let child_pid = match &self.child {
            ChildSlot::Running(child) => Some(child.pid()),
            ChildSlot::Killing { pid } => Some(*pid),
            ChildSlot::Empty => None,
        };
        SupervisorStatus {
            state: self.state,
            port: self.config.port,
            connection_count: self.connection_count,
            connection_ids: self.registry.ids(),
            child_pid,
        }
    }

    // === Start ===

    async fn start(&mut self, args: LaunchArgs, mut callback: Option<Callback>) {
        if !matches!(self.state, LifecycleState::Init | LifecycleState::Stopped) {
            invoke(&mut callback, Err(Error::invalid_state("start", self.state)));
            return;
        }

        let previous = self.state;
        self.launch_args = args;
        self.start_callback = callback;
        self.set_state(LifecycleState::Starting);

        let listener = match transport::bind(self.config.port).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(port = self.config.port, error = %e, "Failed to open listening endpoint");
                self.set_state(previous);
                invoke(&mut self.start_callback.take(), Err(e));
                return;
            }
        };
        self.listener = Some(tokio::spawn(accept_loop(listener, self.internal_tx.clone())));
        tracing::info!(port = self.config.port, "Created and listening");

        match self.spawn_child() {
            Ok(()) => {
                self.set_state(LifecycleState::Started);
                invoke(&mut self.start_callback, Ok(LifecycleState::Started));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn electron process");
                invoke(&mut self.start_callback, Err(e));
            }
        }
    }

    fn spawn_child(&mut self) -> Result<()> {
        let child = ChildProcess::spawn(
            &self.executable,
            &self.launch_args,
            &self.config.path,
            &self.config.spawn_opt,
        )?;
        tracing::info!(pid = child.pid(), executable = %self.executable.display(), "Started electron process");
        self.child = ChildSlot::Running(child);
        Ok(())
    }

    // === Restart ===

    fn restart(&mut self, args: LaunchArgs, mut callback: Option<Callback>) {
        if !self.state.is_active() {
            invoke(&mut callback, Err(Error::invalid_state("restart", self.state)));
            return;
        }

        // At most one pending restart callback: an older one is dropped uninvoked
        self.restart_callback = callback;
        self.launch_args = args;
        self.cancel_reload_timer();
        self.set_state(LifecycleState::Restarting);

        match std::mem::replace(&mut self.child, ChildSlot::Empty) {
            ChildSlot::Running(child) => {
                tracing::info!(pid = child.pid(), "Restarting electron process");
                self.after_kill = AfterKill::Respawn;
                self.kill_child(child);
            }
            ChildSlot::Killing { pid } => {
                self.child = ChildSlot::Killing { pid };
                self.after_kill = AfterKill::Respawn;
            }
            ChildSlot::Empty => self.respawn_or_wait(),
        }
    }

    fn kill_child(&mut self, child: ChildProcess) {
        let pid = child.pid();
        tracing::info!(pid, "Killing electron process tree");
        self.child = ChildSlot::Killing { pid };
        let events = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = child.kill_tree().await;
            let _ = events.send(Internal::KillCompleted { pid, result });
        });
    }

    fn kill_completed(&mut self, pid: u32, result: Result<()>) {
        if let Err(e) = result {
            tracing::error!(pid, error = %e, "Failed to kill electron process tree");
        }
        if matches!(self.child, ChildSlot::Killing { pid: killing } if killing == pid) {
            self.child = ChildSlot::Empty;
        }

        match std::mem::replace(&mut self.after_kill, AfterKill::Nothing) {
            AfterKill::Respawn if self.state == LifecycleState::Restarting => self.respawn_or_wait(),
            AfterKill::Stop(callback) => self.finish_stop(callback),
            AfterKill::Respawn | AfterKill::Nothing => {}
        }
    }

    /// After the old child is confirmed gone: respawn now, or wait for windows to close
    fn respawn_or_wait(&mut self) {
        if self.connection_count > 0 {
            tracing::info!(
                connections = self.connection_count,
                "Waiting for open windows to close before respawning"
            );
            invoke(&mut self.restart_callback, Ok(self.state));
            return;
        }

        tracing::info!("Respawning electron process");
        match self.spawn_child() {
            Ok(()) => {
                self.set_state(LifecycleState::Restarted);
                invoke(&mut self.restart_callback.take(), Ok(LifecycleState::Restarted));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to respawn electron process");
                invoke(&mut self.restart_callback.take(), Err(e));
            }
        }
    }

    fn last_connection_closed(&mut self) {
        tracing::debug!("No more open windows");
        match self.state {
            LifecycleState::Started | LifecycleState::Restarted | LifecycleState::Reloaded
                if self.config.stop_on_close =>
            {
                tracing::debug!("stop_on_close is set, stopping");
                let callback = self.start_callback.take();
                self.stop(callback);
            }
            LifecycleState::Restarting if matches!(self.child, ChildSlot::Empty) => {
                self.respawn_or_wait();
            }
            _ => {}
        }
    }

    // === Stop ===

    fn stop(&mut self, mut callback: Option<Callback>) {
        if !self.state.is_active() {
            invoke(&mut callback, Err(Error::invalid_state("stop", self.state)));
            return;
        }

        tracing::info!("Stopping electron process");
        self.cancel_reload_timer();
        self.restart_callback = None;
        self.set_state(LifecycleState::Stopping);

        match std::mem::replace(&mut self.child, ChildSlot::Empty) {
            ChildSlot::Running(child) => {
                self.after_kill = AfterKill::Stop(callback);
                self.kill_child(child);
            }
            ChildSlot::Killing { pid } => {
                self.child = ChildSlot::Killing { pid };
                self.after_kill = AfterKill::Stop(callback);
            }
            ChildSlot::Empty => self.finish_stop(callback),
        }
    }

    fn finish_stop(&mut self, mut callback: Option<Callback>) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
            tracing::info!(port = self.config.port, "Closed listening endpoint");
        }
        self.set_state(LifecycleState::Stopped);
        invoke(&mut callback, Ok(LifecycleState::Stopped));
    }

    // === Reload ===

    fn reload(&mut self, ids: Option<Vec<ConnectionId>>) {
        if !self.state.accepts_reload() {
            tracing::warn!(state = %self.state, "Ignoring reload request");
            return;
        }

        self.set_state(LifecycleState::Reloading);
        let kind = MessageKind::Reload.as_str();
        match ids {
            None => {
                let delivered = self.registry.broadcast_all(kind, &json!({}));
                tracing::info!(delivered, "Reloading all windows");
            }
            Some(ids) => {
                for id in ids {
                    let delivered = self.registry.send_to(std::slice::from_ref(&id), kind, &json!({ "id": id }));
                    tracing::info!(window_id = %id, delivered, "Reloading window");
                }
            }
        }

        self.cancel_reload_timer();
        let generation = self.reload_generation;
        let events = self.internal_tx.clone();
        self.reload_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(RELOAD_SETTLE).await;
            let _ = events.send(Internal::ReloadSettled { generation });
        }));
    }

    /// Cancel the settle timer; an already-posted settle event becomes stale
    fn cancel_reload_timer(&mut self) {
        if let Some(timer) = self.reload_timer.take() {
            timer.abort();
        }
        self.reload_generation += 1;
    }

    // === Shutdown ===

    async fn shutdown(&mut self) {
        self.cancel_reload_timer();
        self.restart_callback = None;
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.registry.close_all();

        if let ChildSlot::Running(child) = std::mem::replace(&mut self.child, ChildSlot::Empty) {
            let pid = child.pid();
            if let Err(e) = child.kill_tree().await {
                tracing::error!(pid, error = %e, "Failed to kill electron process tree");
            }
        }
        if !matches!(self.state, LifecycleState::Init | LifecycleState::Stopped) {
            self.set_state(LifecycleState::Stopped);
        }
    }
}

async fn accept_loop(listener: TcpListener, events: mpsc::UnboundedSender<Internal>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let events = events.clone();
                tokio::spawn(async move {
                    match transport::accept(stream).await {
                        Ok((id, ws)) => {
                            let _ = events.send(Internal::Accepted { id, ws });
                        }
                        Err(e) => {
                            tracing::warn!(peer = %peer, error = %e, "WebSocket handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}
