//! Runs one external tool and streams its output into a scan's live log.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::time::Instant;

use super::catalog::ToolInfo;
use super::checker::ToolChecker;
use crate::error::ToolError;
use crate::scan::{ActiveScan, SubprocessHandle};

/// How long to wait for stderr to drain once the tool has exited.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutput {
    /// Non-empty stdout lines joined with `\n`.
    pub stdout: String,
    pub line_count: usize,
    /// `None` when the tool was killed by a signal.
    pub exit_code: Option<i32>,
    /// True when the run was cut short by cancel or stop.
    pub terminated: bool,
}

enum Halt {
    Eof,
    Killed,
    TimedOut,
}

/// Spawns catalog tools with the checker's `PATH`.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    checker: Arc<ToolChecker>,
    stderr_line_limit: usize,
    stage_timeout: Option<Duration>,
}

/// Reads one line. Bytes of a line interrupted by a competing `select!`
/// branch stay in `buf` and are completed by the next call.
async fn read_line_lossy<R>(reader: &mut BufReader<R>, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let n = reader.read_until(b'\n', buf).await?;
    if n == 0 && buf.is_empty() {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf).trim().to_string();
    buf.clear();
    Ok(Some(line))
}

/// Keeps the first `limit` non-empty lines and drains the rest.
async fn collect_stderr<R>(pipe: R, limit: usize) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    let mut kept = Vec::new();
    while let Ok(Some(line)) = read_line_lossy(&mut reader, &mut buf).await {
        if !line.is_empty() && kept.len() < limit {
            kept.push(line);
        }
    }
    kept
}

fn terminate(child: &mut Child, tool: &str) {
    if let Err(e) = child.start_kill() {
        log::debug!("Kill of {} failed (already exited?): {}", tool, e);
    }
}

impl ToolRunner {
    pub fn new(
        checker: Arc<ToolChecker>,
        stderr_line_limit: usize,
        stage_timeout: Option<Duration>,
    ) -> Self {
        Self {
            checker,
            stderr_line_limit,
            stage_timeout,
        }
    }

    pub fn checker(&self) -> &ToolChecker {
        &self.checker
    }

    /// Runs `tool` with `args`, appending each non-empty stdout line to the
    /// scan log in arrival order.
    ///
    /// Before every line the pause gate is honoured and a cancel/stop is
    /// checked. A pause, a kill signal or the stage timeout also interrupts
    /// a silent tool; time spent paused does not count toward the timeout. The subprocess handle is attached to the scan for the duration
    /// of the call.
    pub async fn run(
        &self,
        scan: &ActiveScan,
        tool: &ToolInfo,
        args: &[String],
        stdin: Option<String>,
    ) -> Result<RunOutput, ToolError> {
        let program = self
            .checker
            .resolve(tool)
            .ok_or_else(|| ToolError::NotInstalled(tool.name.to_string()))?;

        let mut cmd = self.checker.command(&program);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| ToolError::Spawn {
            tool: tool.name.to_string(),
            source: e,
        })?;

        log::debug!(
            "Spawned {} (pid {:?}) for scan {}",
            tool.name,
            child.id(),
            scan.scan_id()
        );

        let handle = SubprocessHandle::new(tool.name, child.id());
        scan.attach_subprocess(handle.clone());
        let result = self.drive(scan, tool, &mut child, &handle, stdin).await;
        scan.detach_subprocess();
        result
    }

    async fn drive(
        &self,
        scan: &ActiveScan,
        tool: &ToolInfo,
        child: &mut Child,
        handle: &SubprocessHandle,
        stdin: Option<String>,
    ) -> Result<RunOutput, ToolError> {
        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            let tool_name = tool.name;
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(data.as_bytes()).await {
                    log::debug!("Writing stdin of {} failed: {}", tool_name, e);
                }
                // Dropping the pipe closes it so the tool sees EOF.
                drop(pipe);
            });
        }

        let stderr_task = child.stderr.take().map(|pipe| {
            let limit = self.stderr_line_limit;
            tokio::spawn(collect_stderr(pipe, limit))
        });

        let stdout = child.stdout.take().ok_or_else(|| ToolError::Io {
            tool: tool.name.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdout not captured"),
        })?;
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut lines: Vec<String> = Vec::new();
        let mut deadline = self.stage_timeout.map(|t| Instant::now() + t);

        let halt = loop {
            if scan.pause_gate().is_paused() {
                let paused_at = Instant::now();
                let killed = tokio::select! {
                    _ = scan.pause_gate().wait_if_paused() => false,
                    _ = handle.killed() => true,
                };
                if let Some(d) = deadline.as_mut() {
                    *d += paused_at.elapsed();
                }
                if killed {
                    break Halt::Killed;
                }
            }

            if scan.is_stopped() {
                break Halt::Killed;
            }

            let next = tokio::select! {
                read = read_line_lossy(&mut reader, &mut buf) => Some(read),
                _ = handle.killed() => None,
                // Back to the gate so paused time is added to the deadline.
                _ = scan.pause_gate().wait_for_pause() => continue,
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    break Halt::TimedOut;
                }
            };

            match next {
                None => break Halt::Killed,
                Some(Ok(None)) => break Halt::Eof,
                Some(Ok(Some(line))) => {
                    if !line.is_empty() {
                        scan.log(line.clone());
                        lines.push(line);
                    }
                }
                Some(Err(e)) => {
                    terminate(child, tool.name);
                    let _ = child.wait().await;
                    return Err(ToolError::Io {
                        tool: tool.name.to_string(),
                        source: e,
                    });
                }
            }
        };

        let terminated = matches!(halt, Halt::Killed | Halt::TimedOut);
        if terminated {
            terminate(child, tool.name);
        }
        match halt {
            Halt::Killed => scan.log(format!("[!] Scan {} by user", scan.status())),
            Halt::TimedOut => scan.log(format!(
                "[!] {} exceeded the stage timeout, terminating",
                tool.name
            )),
            Halt::Eof => {}
        }

        let status = child.wait().await.map_err(|e| ToolError::Io {
            tool: tool.name.to_string(),
            source: e,
        })?;

        if let Some(task) = stderr_task {
            match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await {
                Ok(Ok(stderr_lines)) => {
                    for line in stderr_lines {
                        scan.log(format!("[stderr] {}", line));
                    }
                }
                Ok(Err(e)) => log::warn!("stderr reader of {} failed: {}", tool.name, e),
                Err(_) => log::debug!("stderr of {} still open after exit, skipping", tool.name),
            }
        }

        if matches!(halt, Halt::TimedOut) {
            return Err(ToolError::StageTimedOut {
                tool: tool.name.to_string(),
                timeout: self.stage_timeout.unwrap_or_default(),
            });
        }

        let line_count = lines.len();
        Ok(RunOutput {
            stdout: lines.join("\n"),
            line_count,
            exit_code: status.code(),
            terminated,
        })
    }
}
