//! Debugger driven over its console.
//!
//! The debugger runs as a child process with piped stdio. Each command is
//! written to stdin followed by an `echo` of a unique completion marker; the
//! call finishes when the marker comes back on the output stream, which
//! carries stdout and stderr merged into a single pipe. Interrupts
//! deliver `SIGINT` to the child, which aborts the running command in
//! gdb-style debuggers and lets the marker through.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{debug, info, warn};

use dbgbridge_config::EngineCommand;

use super::{ENGINE_TARGET, EngineError, InterruptHandle, NativeCall, NativeEngine, PreparedCall};
use crate::executor::CaptureSink;

const PROMPT: &str = "(gdb) ";

struct ConsoleIo {
    stdin: ChildStdin,
    lines: Receiver<String>,
}

/// Long-running debugger process hosting the native session.
pub struct ConsoleEngine {
    program: String,
    child: Mutex<Child>,
    io: Arc<Mutex<ConsoleIo>>,
    sequence: AtomicU64,
    nonce: u32,
}

impl std::fmt::Debug for ConsoleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleEngine")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

impl ConsoleEngine {
    /// Starts the configured debugger.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Launch`] if the process cannot be spawned and
    /// [`EngineError::Io`] if its output readers cannot be started.
    pub fn launch(command: &EngineCommand) -> Result<Self, EngineError> {
        // stdout and stderr share one pipe so error text stays ordered ahead
        // of the completion marker.
        let (output, writer) = io::pipe().map_err(|source| EngineError::Io { source })?;
        let mut child = {
            let error_writer = writer
                .try_clone()
                .map_err(|source| EngineError::Io { source })?;
            let mut spawn = Command::new(&command.program);
            spawn
                .args(&command.args)
                .stdin(Stdio::piped())
                .stdout(writer)
                .stderr(error_writer);
            spawn.spawn().map_err(|source| EngineError::Launch {
                program: command.program.clone(),
                source,
            })?
        };

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            return Err(EngineError::Unavailable {
                reason: "debugger stdin was not captured".to_owned(),
            });
        };

        let (sender, lines) = mpsc::channel();
        if let Err(source) = spawn_reader("dbgbridge-engine-out", output, sender) {
            let _ = child.kill();
            return Err(EngineError::Io { source });
        }

        info!(
            target: ENGINE_TARGET,
            program = %command.program,
            pid = child.id(),
            "debugger launched"
        );
        Ok(Self {
            program: command.program.clone(),
            child: Mutex::new(child),
            io: Arc::new(Mutex::new(ConsoleIo { stdin, lines })),
            sequence: AtomicU64::new(0),
            nonce: rand::random(),
        })
    }

    fn live_pid(&self) -> Result<u32, EngineError> {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        match child.try_wait() {
            Ok(None) => Ok(child.id()),
            Ok(Some(status)) => Err(EngineError::Unavailable {
                reason: format!("{} exited with {status}", self.program),
            }),
            Err(source) => Err(EngineError::Io { source }),
        }
    }
}

impl NativeEngine for ConsoleEngine {
    fn prepare(&self, command: &str) -> Result<PreparedCall, EngineError> {
        if command.contains(['\n', '\r']) {
            return Err(EngineError::Failed {
                message: "commands must fit on a single line".to_owned(),
            });
        }
        let pid = self.live_pid()?;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let call = ConsoleCall {
            io: Arc::clone(&self.io),
            command: command.to_owned(),
            marker: format!("__dbgbridge_done_{:08x}_{sequence}__", self.nonce),
        };
        Ok(PreparedCall::new(Box::new(call), Arc::new(SignalInterrupt { pid })))
    }
}

impl Drop for ConsoleEngine {
    fn drop(&mut self) {
        let child = self.child.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Ok(None) = child.try_wait() {
            if let Err(error) = child.kill() {
                warn!(target: ENGINE_TARGET, %error, "failed to stop debugger");
            }
            let _ = child.wait();
        }
    }
}

struct ConsoleCall {
    io: Arc<Mutex<ConsoleIo>>,
    command: String,
    marker: String,
}

impl NativeCall for ConsoleCall {
    fn run(self: Box<Self>, sink: &mut CaptureSink) -> Result<(), EngineError> {
        let mut io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        let stale = io.lines.try_iter().count();
        if stale > 0 {
            debug!(target: ENGINE_TARGET, lines = stale, "discarded unsolicited debugger output");
        }

        write!(io.stdin, "{}\necho {}\\n\n", self.command, self.marker)
            .and_then(|()| io.stdin.flush())
            .map_err(|source| EngineError::Io { source })?;

        loop {
            match io.lines.recv() {
                Ok(line) if line.contains(&self.marker) => return Ok(()),
                Ok(line) => sink.push_line(strip_prompt(&line)),
                Err(_) => return Err(EngineError::Exited),
            }
        }
    }
}

struct SignalInterrupt {
    pid: u32,
}

impl InterruptHandle for SignalInterrupt {
    #[cfg(unix)]
    fn interrupt(&self) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(self.pid) else {
            warn!(target: ENGINE_TARGET, pid = self.pid, "debugger pid out of range");
            return;
        };
        match kill(Pid::from_raw(raw), Signal::SIGINT) {
            Ok(()) => debug!(target: ENGINE_TARGET, pid = self.pid, "sent SIGINT to debugger"),
            Err(error) => warn!(target: ENGINE_TARGET, pid = self.pid, %error, "failed to interrupt debugger"),
        }
    }

    #[cfg(not(unix))]
    fn interrupt(&self) {
        warn!(target: ENGINE_TARGET, pid = self.pid, "interrupts are unsupported on this platform");
    }
}

fn spawn_reader<R>(name: &str, source: R, sender: Sender<String>) -> io::Result<()>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            for line in BufReader::new(source).lines() {
                let Ok(line) = line else { break };
                if sender.send(line).is_err() {
                    break;
                }
            }
        })
        .map(|_| ())
}

fn strip_prompt(mut line: &str) -> &str {
    while let Some(rest) = line.strip_prefix(PROMPT) {
        line = rest;
    }
    line
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::{Duration, Instant};

    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn shell() -> ConsoleEngine {
        ConsoleEngine::launch(&EngineCommand {
            program: "sh".to_owned(),
            args: Vec::new(),
        })
        .expect("launch sh")
    }

    fn run(engine: &ConsoleEngine, command: &str) -> Result<String, EngineError> {
        let (call, _interrupt) = engine.prepare(command)?.into_parts();
        let mut sink = CaptureSink::new();
        call.run(&mut sink)?;
        Ok(sink.into_output())
    }

    #[rstest]
    fn collects_output_until_marker(shell: ConsoleEngine) {
        let output = run(&shell, "printf 'alpha\\nbeta\\n'").expect("run");
        assert_eq!(output.trim_end(), "alpha\nbeta");
    }

    #[rstest]
    fn consecutive_calls_do_not_mix_output(shell: ConsoleEngine) {
        assert_eq!(run(&shell, "echo first").expect("first").trim(), "first");
        assert_eq!(run(&shell, "echo second").expect("second").trim(), "second");
    }

    #[rstest]
    fn error_output_stays_with_its_own_call(shell: ConsoleEngine) {
        for index in 0..200 {
            let output = run(&shell, &format!("echo err{index} 1>&2")).expect("run");
            assert_eq!(output.trim(), format!("err{index}"), "call {index}");
        }
    }

    #[rstest]
    fn interleaved_streams_keep_their_order(shell: ConsoleEngine) {
        let output = run(&shell, "echo out; echo err 1>&2; echo out-again").expect("run");
        assert_eq!(output.trim_end(), "out\nerr\nout-again");
    }

    #[rstest]
    fn rejects_multi_line_commands(shell: ConsoleEngine) {
        let error = shell.prepare("echo a\necho b").expect_err("multi-line");
        assert!(matches!(error, EngineError::Failed { .. }));
    }

    #[test]
    fn exited_debugger_is_unavailable() {
        let engine = ConsoleEngine::launch(&EngineCommand {
            program: "true".to_owned(),
            args: Vec::new(),
        })
        .expect("launch true");
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match engine.prepare("info registers") {
                Err(error) => {
                    assert!(error.is_unavailable(), "unexpected error: {error}");
                    break;
                }
                Ok(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                Ok(_) => panic!("debugger never reported exit"),
            }
        }
    }

    #[test]
    fn missing_program_fails_launch() {
        let error = ConsoleEngine::launch(&EngineCommand {
            program: "/nonexistent/dbgbridge-debugger".to_owned(),
            args: Vec::new(),
        })
        .expect_err("launch should fail");
        assert!(matches!(error, EngineError::Launch { .. }));
    }

    #[test]
    fn strips_repeated_prompts() {
        assert_eq!(strip_prompt("(gdb) (gdb) rax 0x0"), "rax 0x0");
        assert_eq!(strip_prompt("plain"), "plain");
    }
}
