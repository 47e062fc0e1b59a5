//! Spawning the subprocess-based engines.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::engine::EngineError;

/// Keep at most this many characters of stderr in error messages.
const STDERR_TAIL_CHARS: usize = 2_000;

/// Run `cmd` to completion with stdout discarded and stderr captured.
///
/// A non-zero exit becomes [`EngineError::Exit`] carrying the tail of stderr.
pub(crate) async fn run(cmd: &mut Command) -> Result<(), EngineError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = cmd
        .output()
        .await
        .map_err(|source| EngineError::Spawn {
            program: program.clone(),
            source,
        })?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(EngineError::Exit {
        program,
        code: output.status.code(),
        stderr: tail(stderr.trim(), STDERR_TAIL_CHARS).to_string(),
    })
}

/// Readiness check: does `program args...` exit 0 within `timeout`?
pub(crate) async fn probe<S: AsRef<OsStr>>(program: S, args: &[&str], timeout: Duration) -> bool {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.status()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "probe could not start");
            false
        }
        Err(_) => {
            tracing::debug!(timeout_ms = timeout.as_millis() as u64, "probe timed out");
            false
        }
    }
}

fn tail(s: &str, max_chars: usize) -> &str {
    match s.char_indices().rev().nth(max_chars.saturating_sub(1)) {
        Some((idx, _)) if max_chars > 0 => &s[idx..],
        _ => s,
    }
}
