//! Blocking execution of one stage command.
//!
//! The command runs under `sh -c`. Both pipes are drained by reader threads
//! into one channel as lines arrive, so a chatty child can never block on a
//! full pipe. The child is killed and reaped if the caller unwinds early.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Lines of output kept for the error report.
pub const TAIL_LINES: usize = 20;

const SHELL: &str = "sh";

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to capture {0} of child process")]
    Pipe(&'static str),

    #[error("failed to wait for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    /// `-1` when the process was ended by a signal.
    pub exit_code: i32,
    pub tail: Vec<String>,
}

/// Runs stage commands. The orchestrator only talks to this trait.
pub trait StageExecutor {
    fn execute(
        &mut self,
        command: &str,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ExecOutcome, ExecError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cwd(mut self, cwd: &Path) -> Self {
        self.cwd = Some(cwd.to_path_buf());
        self
    }

    pub fn with_env<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(vars);
        self
    }
}

impl StageExecutor for ProcessExecutor {
    fn execute(
        &mut self,
        command: &str,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ExecOutcome, ExecError> {
        run_streaming(command, self.cwd.as_deref(), &self.env, on_line)
    }
}

/// Kills and reaps the child unless it was waited on.
struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    fn wait(mut self) -> std::io::Result<ExitStatus> {
        match self.child.take() {
            Some(mut child) => child.wait(),
            None => Err(std::io::Error::other("child already reaped")),
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Run `command` to completion, feeding every output line to `on_line` and
/// to the log as it arrives.
pub fn run_streaming(
    command: &str,
    cwd: Option<&Path>,
    env: &[(String, String)],
    on_line: &mut dyn FnMut(&str),
) -> Result<ExecOutcome, ExecError> {
    let mut cmd = Command::new(SHELL);
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in env {
        cmd.env(key, value);
    }

    debug!(command, "Spawning");
    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        command: command.to_string(),
        source,
    })?;
    let stdout = child.stdout.take().ok_or(ExecError::Pipe("stdout"))?;
    let stderr = child.stderr.take().ok_or(ExecError::Pipe("stderr"))?;
    let guard = ChildGuard { child: Some(child) };

    let (tx, rx) = mpsc::channel();
    let readers = [
        spawn_line_reader(stdout, tx.clone()),
        spawn_line_reader(stderr, tx),
    ];

    let mut tail = VecDeque::with_capacity(TAIL_LINES);
    // Ends once both readers hit EOF and drop their senders.
    for line in rx {
        info!(target: "reconflow::exec", "{}", line);
        on_line(&line);
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    for (stream, reader) in ["stdout", "stderr"].into_iter().zip(readers) {
        if reader.join().is_err() {
            warn!(stream, "Output reader panicked");
        }
    }

    let status = guard.wait().map_err(|source| ExecError::Wait {
        command: command.to_string(),
        source,
    })?;

    Ok(ExecOutcome {
        exit_code: status.code().unwrap_or(-1),
        tail: tail.into(),
    })
}

/// Forward each line of `stream`, decoded lossily. Keeps draining after the
/// receiver is gone so the child never sees a closed pipe.
fn spawn_line_reader<R>(stream: R, tx: Sender<String>) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        let mut forwarding = true;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if forwarding {
                        forwarding = tx.send(decode_line(&buf)).is_ok();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "Output stream closed");
                    break;
                }
            }
        }
    })
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
