use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use aiecc_toolchain_common::tool_paths::{resolve_tool, ToolLocation};

use crate::error::ToolError;

pub const DEFAULT_MAX_CAPTURE_BYTES: usize = 4 * 1024 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Shared flag that aborts in-flight tool invocations and the rest of the run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub tool: String,
    pub command: String,
    pub exit_status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub elapsed: Duration,
}

impl ToolOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Runs external tools as blocking subprocesses with captured output.
#[derive(Debug, Clone)]
pub struct ToolInvoker {
    tool_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl ToolInvoker {
    pub fn new(tool_dir: Option<PathBuf>, timeout: Option<Duration>, cancel: CancelToken) -> Self {
        Self {
            tool_dir,
            timeout,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn invoke(&self, tool: &str, args: &[OsString]) -> Result<ToolOutput, ToolError> {
        let command = render_command(tool, args);
        if self.cancel.is_cancelled() {
            return Err(ToolError::Cancelled {
                tool: tool.to_string(),
                command,
            });
        }

        let location = resolve_tool(self.tool_dir.as_deref(), tool);
        if let ToolLocation::Pinned(path) = &location {
            if !path.is_file() {
                return Err(ToolError::ExecutableNotFound {
                    tool: tool.to_string(),
                    location: path.display().to_string(),
                });
            }
        }

        log::debug!("run: {command}");
        let start = Instant::now();

        let mut cmd = Command::new(location.program());
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt as _;
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::ExecutableNotFound {
                    tool: tool.to_string(),
                    location: match &location {
                        ToolLocation::Pinned(p) => p.display().to_string(),
                        ToolLocation::Search(_) => "PATH".to_string(),
                    },
                });
            }
            Err(source) => {
                return Err(ToolError::Spawn {
                    tool: tool.to_string(),
                    source,
                })
            }
        };

        let spawn_err = |source: std::io::Error| ToolError::Spawn {
            tool: tool.to_string(),
            source,
        };

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                kill_tree(&mut child);
                return Err(spawn_err(std::io::Error::other("child pipes unavailable")));
            }
        };

        let cap = DEFAULT_MAX_CAPTURE_BYTES;
        let stdout_thread = std::thread::spawn(move || read_to_end_capped(stdout, cap));
        let stderr_thread = std::thread::spawn(move || read_to_end_capped(stderr, cap));

        let waited = self.wait_child(&mut child).map_err(spawn_err);
        // The group outlives a tool that exits while its background processes still hold
        // the pipes; the readers below only see EOF once those are gone too.
        kill_tree(&mut child);
        if waited.is_err() {
            let _ = child.wait();
        }

        let (stdout, stdout_truncated) = stdout_thread
            .join()
            .unwrap_or_else(|_| Ok((Vec::new(), false)))
            .map_err(spawn_err)?;
        let (stderr, stderr_truncated) = stderr_thread
            .join()
            .unwrap_or_else(|_| Ok((Vec::new(), false)))
            .map_err(spawn_err)?;
        let elapsed = start.elapsed();

        let status = match waited? {
            WaitOutcome::Exited(status) => status,
            WaitOutcome::TimedOut(timeout) => {
                log::debug!("timed out after {}ms: {command}", elapsed.as_millis());
                return Err(ToolError::ToolTimedOut {
                    tool: tool.to_string(),
                    command,
                    timeout,
                });
            }
            WaitOutcome::Cancelled => {
                return Err(ToolError::Cancelled {
                    tool: tool.to_string(),
                    command,
                });
            }
        };

        let exit_status = exit_code_of(&status);
        log::debug!(
            "exit {exit_status} after {}ms: {tool}",
            elapsed.as_millis()
        );

        if !status.success() {
            let stderr_text = String::from_utf8_lossy(&stderr).trim_end().to_string();
            return Err(ToolError::ToolFailed {
                tool: tool.to_string(),
                command,
                exit_code: exit_status,
                stderr,
                stderr_text,
            });
        }

        Ok(ToolOutput {
            tool: tool.to_string(),
            command,
            exit_status,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            elapsed,
        })
    }

    fn wait_child(&self, child: &mut std::process::Child) -> std::io::Result<WaitOutcome> {
        let deadline = self.timeout.and_then(|t| Instant::now().checked_add(t));

        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(WaitOutcome::Exited(status));
            }
            if self.cancel.is_cancelled() {
                kill_tree(child);
                let _ = child.wait();
                return Ok(WaitOutcome::Cancelled);
            }
            if let (Some(deadline), Some(timeout)) = (deadline, self.timeout) {
                if Instant::now() >= deadline {
                    kill_tree(child);
                    let _ = child.wait();
                    return Ok(WaitOutcome::TimedOut(timeout));
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

enum WaitOutcome {
    Exited(std::process::ExitStatus),
    TimedOut(Duration),
    Cancelled,
}

/// Kills the child together with anything it spawned, so grandchildren holding the
/// output pipes cannot keep the readers blocked.
fn kill_tree(child: &mut std::process::Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // The child leads its own process group (see `process_group(0)`).
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
}

fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    let exit_signal = {
        use std::os::unix::process::ExitStatusExt as _;
        status.signal()
    };
    #[cfg(not(unix))]
    let exit_signal: Option<i32> = None;

    match status.code() {
        Some(code) => code,
        None => exit_signal.map(|s| 128 + s).unwrap_or(1),
    }
}

pub fn render_command(tool: &str, args: &[OsString]) -> String {
    let mut out = tool.to_string();
    for a in args {
        out.push(' ');
        let a = a.to_string_lossy();
        if a.is_empty() || a.contains(char::is_whitespace) {
            out.push('\'');
            out.push_str(&a);
            out.push('\'');
        } else {
            out.push_str(&a);
        }
    }
    out
}

pub fn read_to_end_capped<R: Read>(mut reader: R, cap: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut tmp)?;
        if n == 0 {
            break;
        }

        if truncated {
            continue;
        }

        let remaining = cap.saturating_sub(buf.len());
        if n <= remaining {
            buf.extend_from_slice(&tmp[..n]);
        } else {
            buf.extend_from_slice(&tmp[..remaining]);
            truncated = true;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<OsString> {
        items.iter().map(OsString::from).collect()
    }

    #[test]
    fn render_command_quotes_whitespace() {
        let cmd = render_command(
            "aie-opt",
            &args(&["--aie-llvm-lowering=tilecol=1 tilerow=2", "in.mlir"]),
        );
        assert_eq!(
            cmd,
            "aie-opt '--aie-llvm-lowering=tilecol=1 tilerow=2' in.mlir"
        );
    }

    #[test]
    fn read_to_end_capped_flags_truncation() {
        let data = vec![7u8; 100];
        let (buf, truncated) = read_to_end_capped(data.as_slice(), 10).expect("read");
        assert_eq!(buf.len(), 10);
        assert!(truncated);

        let (buf, truncated) = read_to_end_capped(data.as_slice(), 100).expect("read");
        assert_eq!(buf.len(), 100);
        assert!(!truncated);
    }

    #[test]
    fn missing_pinned_tool_is_not_found() {
        let dir = std::env::temp_dir().join(format!("aiecc_no_tools_{}", std::process::id()));
        let invoker = ToolInvoker::new(Some(dir), None, CancelToken::new());
        let err = invoker.invoke("aie-opt", &[]).expect_err("no tool");
        assert!(matches!(err, ToolError::ExecutableNotFound { .. }), "{err}");
        assert_eq!(err.code(), "AIECC_TOOL_NOT_FOUND");
    }

    #[test]
    fn missing_searched_tool_is_not_found() {
        let invoker = ToolInvoker::new(None, None, CancelToken::new());
        let err = invoker
            .invoke("aiecc-definitely-not-a-real-tool", &[])
            .expect_err("no tool");
        assert!(matches!(err, ToolError::ExecutableNotFound { .. }), "{err}");
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let invoker = ToolInvoker::new(None, None, cancel);
        let err = invoker.invoke("sh", &args(&["-c", "true"])).expect_err("cancelled");
        assert!(err.is_cancelled());
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_and_exit_status() {
        let invoker = ToolInvoker::new(None, None, CancelToken::new());
        let out = invoker
            .invoke("sh", &args(&["-c", "printf '[(0,1),]'; echo warn >&2"]))
            .expect("sh ok");
        assert_eq!(out.exit_status, 0);
        assert_eq!(out.stdout_text(), "[(0,1),]");
        assert_eq!(out.stderr, b"warn\n");
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_carries_code_and_stderr() {
        let invoker = ToolInvoker::new(None, None, CancelToken::new());
        let err = invoker
            .invoke("sh", &args(&["-c", "echo 'no such pass' >&2; exit 3"]))
            .expect_err("exit 3");
        match err {
            ToolError::ToolFailed {
                exit_code,
                stderr_text,
                ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr_text, "no such pass");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_the_process_group() {
        let invoker = ToolInvoker::new(
            None,
            Some(Duration::from_millis(200)),
            CancelToken::new(),
        );
        let start = Instant::now();
        let err = invoker
            .invoke("sh", &args(&["-c", "sleep 30; echo done"]))
            .expect_err("timeout");
        assert!(matches!(err, ToolError::ToolTimedOut { .. }), "{err}");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn background_process_holding_pipes_does_not_outlive_the_tool() {
        let invoker = ToolInvoker::new(
            None,
            Some(Duration::from_millis(200)),
            CancelToken::new(),
        );
        let start = Instant::now();
        let out = invoker
            .invoke("sh", &args(&["-c", "sleep 8 & echo started; exit 0"]))
            .expect("tool exits 0");
        assert!(
            start.elapsed() < Duration::from_secs(4),
            "elapsed={:?}",
            start.elapsed()
        );
        assert_eq!(out.exit_status, 0);
        assert_eq!(out.stdout_text(), "started\n");
    }

    #[cfg(unix)]
    #[test]
    fn cancel_from_another_thread_stops_the_tool() {
        let cancel = CancelToken::new();
        let invoker = ToolInvoker::new(None, None, cancel.clone());
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            cancel.cancel();
        });
        let start = Instant::now();
        let err = invoker
            .invoke("sh", &args(&["-c", "sleep 30"]))
            .expect_err("cancelled");
        canceller.join().expect("join canceller");
        assert!(err.is_cancelled(), "{err}");
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
