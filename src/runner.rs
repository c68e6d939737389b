//! Process runner for host commands
//!
//! Every child runs in its own process group, so a Ctrl-C at the terminal
//! reaches vpsctl only and never interrupts a package install halfway. The
//! whole group is killed when a command outlives the per-command timeout,
//! including background processes that keep its output pipes open after
//! the child itself has exited.

use anyhow::{Context, Result};
use declarative::{CommandError, CommandOutput, CommandRunner, CommandSpec};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::io::{Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs commands on the local host with a timeout
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn timed_out(&self, command: String) -> anyhow::Error {
        CommandError::Timeout {
            command,
            timeout: self.timeout,
        }
        .into()
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl CommandRunner for SystemRunner {
    fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let display = spec.display();
        log::debug!("exec: {display}");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: display.clone(),
            source,
        })?;
        let group = i32::try_from(child.id()).ok().map(Pid::from_raw);

        if let Some(input) = &spec.stdin {
            let mut stdin = child.stdin.take().context("Child stdin was not piped")?;
            stdin
                .write_all(input)
                .with_context(|| format!("Failed to write stdin of `{}`", spec.program))?;
        }

        let (tx, rx) = mpsc::channel();
        drain(Stream::Stdout, child.stdout.take(), tx.clone());
        drain(Stream::Stderr, child.stderr.take(), tx);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("Failed to wait for `{display}`"))?
            {
                break status;
            }
            if Instant::now() >= deadline {
                kill_group(group);
                let _ = child.kill();
                let _ = child.wait();
                return Err(self.timed_out(display));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let mut output = CommandOutput {
            stdout: Vec::new(),
            stderr: Vec::new(),
            success: status.success(),
        };
        for _ in 0..2 {
            // One poll interval of grace so output written right at exit
            // still arrives when the deadline is already spent.
            let wait = deadline
                .saturating_duration_since(Instant::now())
                .max(POLL_INTERVAL);
            match rx.recv_timeout(wait) {
                Ok((Stream::Stdout, buf)) => output.stdout = buf,
                Ok((Stream::Stderr, buf)) => output.stderr = buf,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("`{display}` exited but a background process kept its output open");
                    kill_group(group);
                    return Err(self.timed_out(display));
                }
            }
        }
        log::trace!("exec: {display} -> {status}");
        Ok(output)
    }
}

/// Read a pipe to the end on its own thread and hand the bytes back
fn drain<R: Read + Send + 'static>(
    stream: Stream,
    pipe: Option<R>,
    tx: Sender<(Stream, Vec<u8>)>,
) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send((stream, buf));
    });
}

/// SIGKILL every process in the child's group
fn kill_group(group: Option<Pid>) {
    let Some(pgid) = group else { return };
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        log::debug!("killpg {pgid}: {e}");
    }
}
