//! Child process output capture with cancellation.

use super::{RunControl, RunFailure};
use std::future::{Future, pending};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Grace period for pipes to drain once the child was killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

pub(crate) struct Captured {
    pub exit_code: Option<i32>,
    pub output: String,
    pub failure: Option<RunFailure>,
}

/// Spawn `command`, accumulate interleaved stdout and stderr, and stop early
/// when the control's cancel signal or timeout fires. `on_abort` runs after
/// the child was killed.
pub(crate) async fn run_captured<F>(mut command: Command, control: RunControl, on_abort: F) -> Captured
where
    F: Future<Output = ()>,
{
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return Captured {
                exit_code: None,
                output: String::new(),
                failure: Some(RunFailure::SpawnFailed(e.to_string())),
            };
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    if let Some(stdout) = child.stdout.take() {
        pump(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        pump(stderr, tx.clone());
    }
    drop(tx);

    let RunControl {
        mut cancel,
        timeout,
        output: sink,
    } = control;
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut buffer: Vec<u8> = Vec::new();
    let mut failure = None;

    loop {
        tokio::select! {
            chunk = rx.recv() => match chunk {
                Some(bytes) => {
                    if let Some(sink) = &sink {
                        let _ = sink.send(String::from_utf8_lossy(&bytes).into_owned());
                    }
                    buffer.extend_from_slice(&bytes);
                }
                None => break,
            },
            _ = cancelled(&mut cancel) => {
                failure = Some(RunFailure::Cancelled);
                break;
            }
            _ = expired(deadline) => {
                failure = timeout.map(RunFailure::TimedOut);
                break;
            }
        }
    }

    if failure.is_some() {
        kill_tree(&mut child).await;
        on_abort.await;
        let drain = async {
            while let Some(bytes) = rx.recv().await {
                buffer.extend_from_slice(&bytes);
            }
        };
        if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
            debug!("Output pipes still open after kill, keeping partial output");
        }
    }

    let exit_code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("Failed to reap verifier process: {}", e);
            None
        }
    };

    Captured {
        exit_code,
        output: String::from_utf8_lossy(&buffer).into_owned(),
        failure,
    }
}

fn pump<R>(mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = cancel else {
        return pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // handle dropped without cancelling
            return pending().await;
        }
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

/// Kill the child's whole process group, falling back to the child alone.
async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let status = Command::new("kill")
            .arg("-KILL")
            .arg(format!("-{pid}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if status.is_ok_and(|s| s.success()) {
            return;
        }
    }
    if let Err(e) = child.start_kill() {
        debug!("Kill failed, process may have exited already: {}", e);
    }
}
