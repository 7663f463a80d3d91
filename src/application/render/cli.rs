use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` exited with {exit_code:?}: {stderr}")]
    Exit {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("`{program}` did not finish within {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
    #[error("`{program}` succeeded but produced no file at {}", .path.display())]
    MissingOutput { program: String, path: PathBuf },
    #[error("i/o error while waiting for `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl CliError {
    /// Text worth showing to a client: the tool's stderr when it has one,
    /// otherwise the error itself.
    pub fn diagnostic(&self) -> String {
        match self {
            CliError::Exit { stderr, .. } if !stderr.trim().is_empty() => stderr.trim().to_string(),
            other => other.to_string(),
        }
    }
}

/// Run `command` to completion and check that it wrote `output`.
///
/// The child is killed if the timeout fires or the calling future is dropped.
pub(super) async fn run_to_file(
    mut command: Command,
    program: &Path,
    timeout: Duration,
    output: &Path,
    target: &'static str,
) -> Result<(), CliError> {
    let program = program.display().to_string();
    let started_at = Instant::now();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|source| {
        warn!(
            target = target,
            op = "cli::spawn",
            result = "error",
            program = %program,
            error = %source,
            "Failed to spawn external tool"
        );
        CliError::Spawn {
            program: program.clone(),
            source,
        }
    })?;

    let finished = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| CliError::Io {
            program: program.clone(),
            source,
        })?,
        Err(_) => {
            warn!(
                target = target,
                op = "cli::wait",
                result = "timeout",
                program = %program,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "External tool timed out; killed"
            );
            return Err(CliError::Timeout { program, timeout });
        }
    };

    if !finished.status.success() {
        let exit_code = finished.status.code();
        let stderr = String::from_utf8_lossy(&finished.stderr).into_owned();
        warn!(
            target = target,
            op = "cli::wait",
            result = "error",
            program = %program,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            exit_code = exit_code.map(i64::from).unwrap_or(-1),
            stderr = %stderr,
            "External tool failed"
        );
        return Err(CliError::Exit {
            program,
            exit_code,
            stderr,
        });
    }

    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.is_file() => {}
        _ => {
            return Err(CliError::MissingOutput {
                program,
                path: output.to_path_buf(),
            });
        }
    }

    debug!(
        target = target,
        op = "cli::wait",
        result = "ok",
        program = %program,
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        output = %output.display(),
        "External tool finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_prefers_stderr() {
        let err = CliError::Exit {
            program: "markmap".to_string(),
            exit_code: Some(1),
            stderr: "  bad heading\n".to_string(),
        };
        assert_eq!(err.diagnostic(), "bad heading");

        let err = CliError::Exit {
            program: "markmap".to_string(),
            exit_code: None,
            stderr: String::new(),
        };
        assert!(err.diagnostic().contains("markmap"));
    }
}
