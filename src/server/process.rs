//! Child process management
//!
//! The GUI host is launched as `<electron> "-r process" <args...> <path>`. On
//! Unix it leads its own process group so termination reaches every helper
//! process it forked.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::process::{Child, Command};

use crate::common::config::{ServerConfig, SpawnOptions, StdioMode};
use crate::common::{Error, Result};

/// Preload argument placed before caller-supplied arguments
pub const PRELOAD_ARG: &str = "-r process";

/// Time a terminated process tree gets to exit before it is force-killed
const KILL_GRACE: Duration = Duration::from_secs(5);

#[cfg(windows)]
const ELECTRON_BIN: &str = "electron.cmd";
#[cfg(not(windows))]
const ELECTRON_BIN: &str = "electron";

/// Extra arguments for the child, between the preload argument and the app path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchArgs(Vec<String>);

impl LaunchArgs {
    /// No extra arguments
    pub fn none() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for LaunchArgs {
    fn from(arg: &str) -> Self {
        Self(vec![arg.to_string()])
    }
}

impl From<String> for LaunchArgs {
    fn from(arg: String) -> Self {
        Self(vec![arg])
    }
}

impl From<Vec<String>> for LaunchArgs {
    fn from(args: Vec<String>) -> Self {
        Self(args)
    }
}

impl From<&[&str]> for LaunchArgs {
    fn from(args: &[&str]) -> Self {
        Self(args.iter().map(|a| a.to_string()).collect())
    }
}

impl TryFrom<Value> for LaunchArgs {
    type Error = Error;

    /// Normalize untyped arguments
    ///
    /// Accepts null, a string, an array of strings, or an object (which
    /// carries no arguments). Anything else is rejected.
    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Null | Value::Object(_) => Ok(Self::none()),
            Value::String(arg) => Ok(Self(vec![arg])),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(arg) => Ok(arg),
                    other => Err(Error::InvalidArgument(format!(
                        "args must be a string or an array of strings, found element {}",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(Self),
            other => Err(Error::InvalidArgument(format!(
                "args must be a string or an array of strings, got {}",
                other
            ))),
        }
    }
}

/// Pick the GUI host executable
///
/// Explicit config wins. Otherwise a bundled `node_modules/.bin/electron`
/// under the app path or working directory is preferred unless
/// `use_global_electron` is set, then `PATH`, then the bare name.
pub fn resolve_executable(config: &ServerConfig) -> PathBuf {
    if let Some(path) = &config.electron {
        return path.clone();
    }

    if !config.use_global_electron {
        let bases = std::iter::once(config.path.clone()).chain(std::env::current_dir().ok());
        for base in bases {
            let candidate = base.join("node_modules").join(".bin").join(ELECTRON_BIN);
            if candidate.is_file() {
                return candidate;
            }
        }
    }

    which::which(ELECTRON_BIN).unwrap_or_else(|_| PathBuf::from(ELECTRON_BIN))
}

/// A running GUI host process
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    pid: u32,
}

impl ChildProcess {
    /// Launch the child with the preload argument, `args` and the app path
    pub fn spawn(
        program: &Path,
        args: &LaunchArgs,
        app_path: &Path,
        options: &SpawnOptions,
    ) -> Result<Self> {
        let mut cmd = Command::new(program);
        cmd.arg(PRELOAD_ARG)
            .args(args.as_slice())
            .arg(app_path)
            .envs(&options.env)
            .kill_on_drop(true);

        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        match options.stdio {
            StdioMode::Inherit => {
                cmd.stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
            }
            StdioMode::Ignore => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());
            }
        }

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| Error::child_process(program.display(), e))?;
        let pid = child
            .id()
            .ok_or_else(|| Error::child_process(program.display(), "process exited during spawn"))?;

        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Terminate the whole process tree and wait for the child to exit
    ///
    /// A process that already exited is not an error. If the tree ignores
    /// SIGTERM for longer than the grace period it is force-killed.
    pub async fn kill_tree(mut self) -> Result<()> {
        let pid = self.pid;
        let signalled = terminate_tree(pid);

        match tokio::time::timeout(KILL_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(pid, %status, "Process tree exited");
                signalled
            }
            Ok(Err(e)) => Err(Error::KillFailure {
                pid,
                reason: e.to_string(),
            }),
            Err(_) => {
                tracing::warn!(pid, "Process tree ignored SIGTERM, force killing");
                force_kill_tree(pid);
                self.child.kill().await.map_err(|e| Error::KillFailure {
                    pid,
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        // `kill_on_drop` only reaches the group leader
        if matches!(self.child.try_wait(), Ok(None)) {
            tracing::debug!(pid = self.pid, "Dropped while running, killing process tree");
            force_kill_tree(self.pid);
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> Result<()> {
    // The child leads its own group, so a negative pid addresses the whole tree
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        tracing::debug!(pid, "Process tree already gone");
        Ok(())
    } else {
        Err(Error::KillFailure {
            pid,
            reason: err.to_string(),
        })
    }
}

#[cfg(unix)]
fn terminate_tree(pid: u32) -> Result<()> {
    signal_group(pid, libc::SIGTERM)
}

#[cfg(unix)]
fn force_kill_tree(pid: u32) {
    if let Err(e) = signal_group(pid, libc::SIGKILL) {
        tracing::warn!(pid, error = %e, "SIGKILL failed");
    }
}

#[cfg(windows)]
fn terminate_tree(pid: u32) -> Result<()> {
    let output = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output()
        .map_err(|e| Error::KillFailure {
            pid,
            reason: e.to_string(),
        })?;
    if !output.status.success() {
        // taskkill also fails for a pid that already exited
        tracing::debug!(pid, stderr = %String::from_utf8_lossy(&output.stderr), "taskkill reported failure");
    }
    Ok(())
}

#[cfg(windows)]
fn force_kill_tree(pid: u32) {
    let _ = terminate_tree(pid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_launch_args_normalization() {
        assert_eq!(LaunchArgs::try_from(Value::Null).unwrap(), LaunchArgs::none());
        assert_eq!(
            LaunchArgs::try_from(json!("Hoge!")).unwrap(),
            LaunchArgs::from("Hoge!")
        );
        assert_eq!(
            LaunchArgs::try_from(json!(["Hoge", "foo"])).unwrap().as_slice(),
            ["Hoge".to_string(), "foo".to_string()]
        );
        assert!(LaunchArgs::try_from(json!({"stdio": "inherit"})).unwrap().is_empty());
    }

    #[test]
    fn test_launch_args_rejects_other_shapes() {
        for value in [json!(42), json!(true), json!(["ok", 3])] {
            assert!(matches!(
                LaunchArgs::try_from(value),
                Err(Error::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_resolve_prefers_explicit_path() {
        let config = ServerConfig {
            electron: Some(PathBuf::from("/custom/electron")),
            ..Default::default()
        };
        assert_eq!(resolve_executable(&config), PathBuf::from("/custom/electron"));
    }

    #[test]
    fn test_resolve_finds_bundled_binary() {
        let dir = tempfile::tempdir().unwrap();
        let bin_dir = dir.path().join("node_modules").join(".bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        std::fs::write(bin_dir.join(ELECTRON_BIN), "").unwrap();

        let config = ServerConfig {
            path: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert_eq!(resolve_executable(&config), bin_dir.join(ELECTRON_BIN));

        let global = ServerConfig {
            path: dir.path().to_path_buf(),
            use_global_electron: true,
            ..Default::default()
        };
        assert_ne!(resolve_executable(&global), bin_dir.join(ELECTRON_BIN));
    }

    #[tokio::test]
    async fn test_spawn_missing_executable_fails() {
        let err = ChildProcess::spawn(
            Path::new("/definitely/not/here/electron"),
            &LaunchArgs::none(),
            Path::new("."),
            &SpawnOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ChildProcess { .. }));
    }

    #[cfg(unix)]
    fn fixture() -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("fake-electron.sh");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_passes_preload_args_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("argv.log");
        let mut options = SpawnOptions {
            stdio: StdioMode::Ignore,
            ..Default::default()
        };
        options
            .env
            .insert("FAKE_ELECTRON_LOG".to_string(), log.display().to_string());
        options
            .env
            .insert("FAKE_ELECTRON_EXIT".to_string(), "1".to_string());

        let mut child = ChildProcess::spawn(
            &fixture(),
            &LaunchArgs::from(vec!["Hoge".to_string(), "foo".to_string()]),
            Path::new("/app"),
            &options,
        )
        .unwrap();
        child.child.wait().await.unwrap();

        let argv = std::fs::read_to_string(&log).unwrap();
        assert_eq!(argv.trim_end(), "-r process Hoge foo /app");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_tree_terminates_running_child() {
        let options = SpawnOptions {
            stdio: StdioMode::Ignore,
            ..Default::default()
        };
        let mut child =
            ChildProcess::spawn(&fixture(), &LaunchArgs::none(), Path::new("."), &options).unwrap();
        assert!(child.child.try_wait().unwrap().is_none());

        tokio::time::timeout(Duration::from_secs(10), child.kill_tree())
            .await
            .expect("kill_tree timed out")
            .unwrap();
    }

    #[cfg(target_os = "linux")]
    fn is_gone(pid: &str) -> bool {
        // Reparented helpers may linger as zombies when nothing reaps them
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map_or(false, |rest| rest.trim_start().starts_with('Z')),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_drop_kills_helper_processes() {
        let dir = tempfile::tempdir().unwrap();
        let helper_file = dir.path().join("helper.pid");
        let mut options = SpawnOptions {
            stdio: StdioMode::Ignore,
            ..Default::default()
        };
        options.env.insert(
            "FAKE_ELECTRON_HELPER_PID".to_string(),
            helper_file.display().to_string(),
        );
        let child =
            ChildProcess::spawn(&fixture(), &LaunchArgs::none(), Path::new("."), &options).unwrap();

        let mut helper = String::new();
        for _ in 0..100 {
            helper = std::fs::read_to_string(&helper_file)
                .unwrap_or_default()
                .trim()
                .to_string();
            if !helper.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!helper.is_empty(), "helper never started");
        assert!(!is_gone(&helper));

        drop(child);

        let mut gone = false;
        for _ in 0..100 {
            if is_gone(&helper) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(gone, "helper {} outlived the dropped child", helper);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_tree_of_exited_child_is_ok() {
        let mut options = SpawnOptions {
            stdio: StdioMode::Ignore,
            ..Default::default()
        };
        options
            .env
            .insert("FAKE_ELECTRON_EXIT".to_string(), "1".to_string());
        let mut child =
            ChildProcess::spawn(&fixture(), &LaunchArgs::none(), Path::new("."), &options).unwrap();
        child.child.wait().await.unwrap();

        child.kill_tree().await.unwrap();
    }
}
