use crate::task::error::{TaskError, TaskResult};
use crate::task::{Task, TaskCore, TaskListener};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use log::{debug, warn};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::ops::ControlFlow;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Lines of stderr kept for the error of a failed program.
const STDERR_TAIL: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Exit of a finished program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exit {
    /// `None` when killed by a signal.
    pub code: Option<i32>,
    /// Last lines written to stderr.
    pub stderr: String,
    /// Whether the task terminated the program itself.
    pub terminated: bool,
}

/// What a [`PopenTask`] does with its program's output.
pub trait ProcessHandler {
    /// Called once the program is running.
    fn spawned(&mut self) {}

    /// Called for every output line. `Break` terminates the program.
    fn line(
        &mut self,
        _stream: Stream,
        _line: &str,
        _core: &mut TaskCore,
        _listener: &mut dyn TaskListener,
    ) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    /// Called after the program exited successfully.
    fn done(&mut self) -> TaskResult<()> {
        Ok(())
    }

    /// Called after the program failed.
    fn failed(&mut self, program: &str, exit: Exit) -> TaskResult<()> {
        Err(TaskError::ReturnCode {
            program: program.to_string(),
            code: exit.code,
            stderr: exit.stderr,
        })
    }
}

/// Runs a program, feeding its output lines to a handler as they arrive.
pub struct PopenTask<H> {
    core: TaskCore,
    command: Vec<OsString>,
    /// Set while the program runs and has not been reaped.
    pid: Option<u32>,
    handler: H,
}

impl<H: ProcessHandler> PopenTask<H> {
    pub fn new<I, S>(description: impl Into<String>, command: I, handler: H) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            core: TaskCore::new(description),
            command: command.into_iter().map(Into::into).collect(),
            pid: None,
            handler,
        }
    }

    pub fn command(&self) -> &[OsString] {
        &self.command
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    pub fn program(&self) -> String {
        self.command
            .first()
            .map(|program| program.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    async fn execute(&mut self, listener: &mut dyn TaskListener) -> TaskResult<()> {
        let program = self.program();
        let Some((executable, args)) = self.command.split_first() else {
            return Err(TaskError::MissingDependency(program));
        };

        let mut command = Command::new(executable);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Running {:?}", self.command);
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TaskError::MissingDependency(program));
            }
            Err(e) => return Err(e.into()),
        };
        self.pid = child.id();
        debug!("Started {program} with pid {:?}", self.pid);
        self.handler.spawned();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr not captured"))?;
        let mut stdout = BufReader::new(stdout).split(b'\n');
        let mut stderr = BufReader::new(stderr).split(b'\n');

        let mut tail = VecDeque::with_capacity(STDERR_TAIL);
        let mut terminated = false;
        let (mut stdout_open, mut stderr_open) = (true, true);

        while stdout_open || stderr_open {
            let (stream, segment) = tokio::select! {
                segment = stdout.next_segment(), if stdout_open => (Stream::Stdout, segment?),
                segment = stderr.next_segment(), if stderr_open => (Stream::Stderr, segment?),
            };

            let Some(segment) = segment else {
                match stream {
                    Stream::Stdout => stdout_open = false,
                    Stream::Stderr => stderr_open = false,
                }
                continue;
            };

            let line = String::from_utf8_lossy(&segment);
            let line = line.trim_end_matches('\r');
            if stream == Stream::Stderr {
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line.to_string());
            }

            let flow = self.handler.line(stream, line, &mut self.core, &mut *listener);
            if flow.is_break() && !terminated {
                debug!("Terminating {program}");
                self.terminate();
                terminated = true;
            }
        }

        let status = child.wait().await?;
        self.pid = None;
        match status.code() {
            Some(code) => debug!("{program} exited with code {code}"),
            None => debug!("{program} was terminated by a signal"),
        }
        self.core.set_progress(1.0, listener);

        if status.success() {
            self.handler.done()
        } else {
            let exit = Exit {
                code: status.code(),
                stderr: Vec::from(tail).join("\n"),
                terminated,
            };
            self.handler.failed(&program, exit)
        }
    }

    fn terminate(&self) {
        let Some(pid) = self.pid else {
            return;
        };

        #[cfg(unix)]
        {
            debug!("Sending SIGTERM to {pid}");
            // SAFETY: kill takes plain integers. `pid` is only set between
            // spawning and waiting on the child, so it cannot have been reaped
            // and reused by another process.
            let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if result != 0 {
                warn!("Could not terminate {pid}: {}", std::io::Error::last_os_error());
            }
        }

        #[cfg(not(unix))]
        {
            warn!("Cannot terminate {pid} on this platform");
        }
    }
}

impl<H: ProcessHandler> Task for PopenTask<H> {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn run<'a>(&'a mut self, listener: &'a mut dyn TaskListener) -> LocalBoxFuture<'a, TaskResult<()>> {
        self.execute(listener).boxed_local()
    }

    /// Sends SIGTERM to a program left running by an interrupted run.
    fn abort(&mut self) {
        self.terminate();
        self.pid = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{NoListener, drive};

    #[derive(Default)]
    struct Lines {
        stdout: Vec<String>,
        stderr: Vec<String>,
        stop_at: Option<&'static str>,
        exit: Option<Exit>,
    }

    impl ProcessHandler for Lines {
        fn line(
            &mut self,
            stream: Stream,
            line: &str,
            _core: &mut TaskCore,
            _listener: &mut dyn TaskListener,
        ) -> ControlFlow<()> {
            match stream {
                Stream::Stdout => self.stdout.push(line.to_string()),
                Stream::Stderr => self.stderr.push(line.to_string()),
            }
            if self.stop_at == Some(line) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }

        fn failed(&mut self, program: &str, exit: Exit) -> TaskResult<()> {
            self.exit = Some(exit.clone());
            Err(TaskError::ReturnCode {
                program: program.to_string(),
                code: exit.code,
                stderr: exit.stderr,
            })
        }
    }

    fn sh(script: &str, handler: Lines) -> PopenTask<Lines> {
        PopenTask::new("Running sh", ["sh", "-c", script], handler)
    }

    #[tokio::test]
    async fn missing_program_is_missing_dependency() {
        let mut task = PopenTask::new("Running", ["cdrip-no-such-program"], Lines::default());

        let result = drive(&mut task, &mut NoListener).await;
        assert!(matches!(
            result,
            Err(TaskError::MissingDependency(program)) if program == "cdrip-no-such-program"
        ));
    }

    #[tokio::test]
    async fn streams_lines_from_both_outputs() {
        let mut task = sh("echo one; echo two >&2; printf 'three'", Lines::default());

        drive(&mut task, &mut NoListener).await.unwrap();
        let lines = task.into_handler();
        assert_eq!(lines.stdout, vec!["one", "three"]);
        assert_eq!(lines.stderr, vec!["two"]);
        assert_eq!(lines.exit, None);
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let mut task = sh("echo 'no disc' >&2; exit 3", Lines::default());

        let result = drive(&mut task, &mut NoListener).await;
        match result {
            Err(TaskError::ReturnCode { program, code, stderr }) => {
                assert_eq!(program, "sh");
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "no disc");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn break_terminates_program() {
        let handler = Lines {
            stop_at: Some("stop"),
            ..Default::default()
        };
        let mut task = sh("echo stop; exec sleep 30", handler);

        let result = drive(&mut task, &mut NoListener).await;
        assert!(matches!(result, Err(TaskError::ReturnCode { code: None, .. })));
        assert!(task.handler().exit.as_ref().is_some_and(|exit| exit.terminated));
    }
}
