//! CLI command handling
//!
//! Runs the supervisor in the foreground and drives it from stdin.

mod control;

pub use control::ControlLine;

use std::ops::ControlFlow;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commands::Commands;
use crate::common::config::{Config, LogLevel, ServerConfig};
use crate::common::{logging, paths, Error, Result};
use crate::server::{completion, Callback, LaunchArgs, LifecycleState, Supervisor};

/// Flags of the `serve` command that override the config file
#[derive(Debug, Default)]
pub struct ServeOverrides {
    pub port: Option<u16>,
    pub electron: Option<PathBuf>,
    pub path: Option<PathBuf>,
    pub stop_on_close: bool,
    pub use_global_electron: bool,
    pub verbose: u8,
}

impl ServeOverrides {
    /// Layer the flags over file configuration
    pub fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(electron) = self.electron {
            config.electron = Some(electron);
        }
        if let Some(path) = self.path {
            config.path = path;
        }
        config.stop_on_close |= self.stop_on_close;
        config.use_global_electron |= self.use_global_electron;
        if self.verbose > 0 {
            config.log_level = LogLevel::Verbose;
            config.verbose = None;
        }
        config
    }
}

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Serve {
            port,
            electron,
            path,
            stop_on_close,
            use_global_electron,
            verbose,
            args,
        } => {
            let overrides = ServeOverrides {
                port,
                electron,
                path,
                stop_on_close,
                use_global_electron,
                verbose,
            };
            let config = overrides.apply(Config::load()?.server);
            logging::init(config.effective_log_level());
            serve(config, LaunchArgs::from(args)).await
        }

        Commands::ConfigPath => {
            match paths::config_path() {
                Some(path) => println!("{}", path.display()),
                None => return Err(Error::Config("no home directory".to_string())),
            }
            Ok(())
        }
    }
}

/// Start the supervisor and serve control lines until stopped
pub async fn serve(config: ServerConfig, args: LaunchArgs) -> Result<()> {
    let port = config.port;
    let supervisor = Supervisor::new(config);

    let (callback, started) = completion();
    supervisor.start(args, Some(callback))?;
    match started.await.map_err(|_| Error::SupervisorGone)? {
        Ok(_) => println!("Started, listening on port {}", port),
        Err(e) => {
            let _ = supervisor.shutdown().await;
            return Err(e);
        }
    }

    let result = control_loop(&supervisor).await;
    supervisor.shutdown().await?;
    result
}

async fn control_loop(supervisor: &Supervisor) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let signal = shutdown_signal();
    tokio::pin!(signal);
    let stopped = supervisor.wait_for(LifecycleState::Stopped);
    tokio::pin!(stopped);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::info!("stdin closed, stopping");
                    return Ok(());
                };
                match ControlLine::parse(&line) {
                    Ok(Some(control)) => {
                        if execute(supervisor, control).await?.is_break() {
                            return Ok(());
                        }
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("Error: {}", e),
                }
            }

            result = &mut signal => {
                let name = result?;
                tracing::info!("Received {}, shutting down", name);
                return Ok(());
            }

            result = &mut stopped => {
                result?;
                println!("stopped");
                return Ok(());
            }
        }
    }
}

/// Run one control line; `Break` once the supervisor has stopped
async fn execute(supervisor: &Supervisor, control: ControlLine) -> Result<ControlFlow<()>> {
    match control {
        ControlLine::Restart(args) => supervisor.restart(args, Some(print_outcome()))?,
        ControlLine::Reload(ids) => supervisor.reload(ids)?,
        ControlLine::Broadcast { kind, data } => supervisor.broadcast(kind, data)?,
        ControlLine::Send { id, kind, data } => supervisor.send_to(vec![id], kind, data)?,
        ControlLine::Status => {
            let status = supervisor.status().await?;
            println!("{}", serde_json::to_string(&status)?);
        }
        ControlLine::Stop => {
            let (callback, done) = completion();
            supervisor.stop(Some(callback))?;
            let state = done.await.map_err(|_| Error::SupervisorGone)??;
            println!("{}", state);
            return Ok(ControlFlow::Break(()));
        }
    }
    Ok(ControlFlow::Continue(()))
}

/// A callback that reports every lifecycle outcome on the terminal
fn print_outcome() -> Callback {
    Box::new(|result| match result {
        Ok(state) => println!("{}", state),
        Err(e) => eprintln!("Error: {}", e),
    })
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}
