//! Helpers shared by the subprocess-backed adapters.

use std::collections::VecDeque;
use std::process::ExitStatus;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Lines of stderr kept for error messages
const STDERR_TAIL_LINES: usize = 20;

/// Drain a child's output on a separate task, keeping only the last lines.
///
/// Draining matters: a child blocks once its pipe buffer fills up.
pub fn spawn_tail_reader<R>(reader: R, program: &'static str) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

        while let Ok(Some(line)) = lines.next_line().await {
            trace!(program, %line, "stderr");
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }

        tail.into_iter().collect::<Vec<_>>().join("\n")
    })
}

/// Wait for a child, killing it if `cancel` fires first.
///
/// Returns `None` when cancelled.
pub async fn wait_or_kill(
    child: &mut Child,
    cancel: &CancellationToken,
) -> std::io::Result<Option<ExitStatus>> {
    let status = tokio::select! {
        status = child.wait() => Some(status?),
        _ = cancel.cancelled() => None,
    };

    if status.is_none() {
        let _ = child.kill().await;
    }

    Ok(status)
}

/// Collect the tail from a reader task, tolerating a panicked task
pub async fn join_tail(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

/// Drop a reader task without waiting for it.
///
/// After a kill, a grandchild can still hold the pipe open, so the reader
/// may never see EOF.
pub fn abort_tail(handle: Option<JoinHandle<String>>) {
    if let Some(handle) = handle {
        handle.abort();
    }
}

/// Write an executable `sh` script standing in for an external tool
#[cfg(all(test, unix))]
pub(crate) fn write_script(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
