//! Lifecycle control for the store daemon
//!
//! Spawns the `engram_daemon` binary, tracks it through a pid file, and
//! probes liveness through the request socket.

use std::env;
use std::path::Path;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use crate::protocol::{Envelope, Request, Response};

/// Start the daemon if it is not already running
pub async fn start(socket_path: &Path, pid_file: &Path) -> Result<()> {
  use std::{fs, process::Command};

  if socket_path.exists() {
    quill::warn!("daemon appears to already be running");
    quill::info!("use 'engram daemon status' to check");
    return Ok(());
  }

  quill::info!("starting daemon...");

  let mut cmd = Command::new("engram_daemon");
  cmd.envs(env::vars());
  if let Ok(home) = env::var("ENGRAM_HOME") {
    cmd.env("ENGRAM_HOME", home);
  }

  let mut child = match cmd.spawn() {
    Ok(child) => child,
    Err(e) => {
      quill::error!("failed to start daemon: {e}");
      quill::info!("make sure the 'engram_daemon' binary is in your PATH");
      return Ok(());
    }
  };

  if let Some(parent) = pid_file.parent() {
    fs::create_dir_all(parent)?;
  }
  fs::write(pid_file, child.id().to_string())?;

  // Socket creation signals a successful startup
  for _ in 0..100 {
    if let Ok(Some(status)) = child.try_wait() {
      let _ = fs::remove_file(pid_file);
      if status.success() {
        quill::error!("daemon exited unexpectedly");
      } else {
        quill::error!("daemon failed to start");
      }
      return Ok(());
    }

    if socket_path.exists() {
      quill::success!("daemon started");
      return Ok(());
    }

    sleep(Duration::from_millis(100)).await;
  }

  quill::error!("daemon did not create its socket in time");
  Ok(())
}

/// Probe the daemon with a statistics request
pub async fn status(socket_path: &Path) -> Result<()> {
  if !socket_path.exists() {
    quill::info!("daemon is not running");
    quill::info!("use 'engram daemon start' to start it");
    return Ok(());
  }

  match ping(socket_path).await {
    Ok(true) => quill::success!("daemon is running and responsive"),
    Ok(false) => quill::error!("daemon is running but not responding correctly"),
    Err(_) => {
      quill::error!("socket file exists but connection failed");
      quill::error!("daemon may be starting up or in a bad state");
    }
  }

  Ok(())
}

async fn ping(socket_path: &Path) -> Result<bool> {
  let mut stream = UnixStream::connect(socket_path).await?;

  let envelope = Envelope { id: Uuid::new_v4().to_string(), request: Request::Statistics };
  let mut line = serde_json::to_string(&envelope)?;
  line.push('\n');
  stream.write_all(line.as_bytes()).await?;

  let mut reader = BufReader::new(stream);
  let mut response_line = String::new();
  reader.read_line(&mut response_line).await?;

  let response: Response = serde_json::from_str(response_line.trim())?;
  Ok(response.id == envelope.id && response.success)
}

/// Stop the daemon and clean up its socket and pid file
pub async fn stop(socket_path: &Path, pid_file: &Path) -> Result<()> {
  use std::{fs, process::Command};

  if !socket_path.exists() {
    quill::info!("daemon is not running");
    return Ok(());
  }

  quill::info!("stopping daemon...");

  let pid = fs::read_to_string(pid_file)
    .ok()
    .and_then(|s| s.trim().parse::<u32>().ok())
    .unwrap_or(0);

  if pid == 0 {
    quill::warn!("pid file missing or unreadable, cleaning up socket");
    let _ = fs::remove_file(socket_path);
    return Ok(());
  }

  match Command::new("kill").arg(pid.to_string()).output() {
    Ok(result) if result.status.success() => {
      sleep(Duration::from_millis(500)).await;
      let _ = fs::remove_file(socket_path);
      let _ = fs::remove_file(pid_file);
      quill::success!("daemon stopped");
    }
    _ => {
      quill::warn!("kill failed, process may already be gone; cleaning up");
      let _ = fs::remove_file(socket_path);
      let _ = fs::remove_file(pid_file);
    }
  }

  Ok(())
}
