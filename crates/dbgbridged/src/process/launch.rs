//! Daemon launch sequence and the supervision loop.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread;

use tracing::{info, warn};

use dbgbridge_config::Config;
use ortho_config::OrthoConfig;

use crate::commands::{CommandContext, register_builtin};
use crate::console::{OperatorCommand, forward_commands};
use crate::engine::{ConsoleEngine, NativeEngine, UnavailableEngine};
use crate::executor::CommandExecutor;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::server::{Server, ServerError};
use crate::session::SessionState;
use crate::telemetry;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

/// Collaborators required to run the daemon.
pub(crate) struct LaunchPlan<S, R> {
    pub(crate) config: Config,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) shutdown: S,
    pub(crate) console: R,
    pub(crate) status: Box<dyn Write + Send>,
}

enum DaemonEvent {
    Operator(OperatorCommand),
    Signal(Result<(), ShutdownError>),
}

impl From<OperatorCommand> for DaemonEvent {
    fn from(command: OperatorCommand) -> Self {
        Self::Operator(command)
    }
}

/// Runs the daemon with the production collaborators.
///
/// # Errors
///
/// Returns a [`LaunchError`] when configuration, telemetry, the channel or
/// the server cannot be brought up, or when shutdown handling fails.
pub fn run_daemon() -> Result<(), LaunchError> {
    let config = Config::load()?;
    run_daemon_with(LaunchPlan {
        config,
        reporter: Arc::new(StructuredHealthReporter::new()),
        shutdown: SystemShutdownSignal,
        console: io::BufReader::new(io::stdin()),
        status: Box::new(io::stdout()),
    })
}

/// Runs the daemon with injected collaborators.
pub(crate) fn run_daemon_with<S, R>(plan: LaunchPlan<S, R>) -> Result<(), LaunchError>
where
    S: ShutdownSignal,
    R: BufRead + Send + 'static,
{
    let LaunchPlan {
        config,
        reporter,
        shutdown,
        console,
        mut status,
    } = plan;

    telemetry::initialise(&config)?;
    info!(target: PROCESS_TARGET, channel = %config.channel(), "starting daemon runtime");
    config.channel().prepare_filesystem()?;

    let session = Arc::new(SessionState::new());
    let executor = CommandExecutor::new(launch_engine(&config), Arc::clone(&session))
        .with_grace_period(config.grace_period());
    let context = Arc::new(CommandContext::new(
        Arc::new(executor),
        Arc::clone(&session),
        config.default_timeout(),
    ));

    let server = Server::with_reporter(reporter);
    register_builtin(&server, &context)?;
    server.start(config.channel())?;
    info!(
        target: PROCESS_TARGET,
        session = session.session_id(),
        commands = server.commands().len(),
        "daemon ready"
    );

    let (sender, events) = mpsc::channel();
    spawn_signal_watcher(shutdown, sender.clone())?;
    spawn_console_reader(console, sender)?;

    let outcome = loop {
        match events.recv() {
            Ok(DaemonEvent::Operator(OperatorCommand::Start)) => {
                match server.start(config.channel()) {
                    Ok(()) => info!(target: PROCESS_TARGET, "server started by operator"),
                    Err(ServerError::AlreadyRunning) => {
                        info!(target: PROCESS_TARGET, "server already running");
                    }
                    Err(error) => warn!(target: PROCESS_TARGET, %error, "operator start failed"),
                }
            }
            Ok(DaemonEvent::Operator(OperatorCommand::Stop)) => {
                if let Err(error) = server.stop() {
                    warn!(target: PROCESS_TARGET, %error, "operator stop reported errors");
                }
            }
            Ok(DaemonEvent::Operator(OperatorCommand::Status)) => {
                write_status(&mut *status, &server, &config, &session);
            }
            Ok(DaemonEvent::Operator(OperatorCommand::Quit)) => {
                info!(target: PROCESS_TARGET, "quit requested by operator");
                break Ok(());
            }
            Ok(DaemonEvent::Signal(result)) => break result.map_err(LaunchError::from),
            Err(_) => break Ok(()),
        }
    };

    server.stop()?;
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    outcome
}

/// Starts the configured debugger, falling back to an engine that reports
/// every call as unavailable.
fn launch_engine(config: &Config) -> Arc<dyn NativeEngine> {
    let Some(command) = config.engine_command() else {
        warn!(target: PROCESS_TARGET, "no debugger configured; commands will report the session unavailable");
        return Arc::new(UnavailableEngine);
    };
    match ConsoleEngine::launch(&command) {
        Ok(engine) => Arc::new(engine),
        Err(error) => {
            warn!(target: PROCESS_TARGET, %error, "debugger launch failed; commands will report the session unavailable");
            Arc::new(UnavailableEngine)
        }
    }
}

fn spawn_signal_watcher<S>(shutdown: S, sender: Sender<DaemonEvent>) -> Result<(), LaunchError>
where
    S: ShutdownSignal,
{
    thread::Builder::new()
        .name("dbgbridge-signals".to_owned())
        .spawn(move || {
            let outcome = shutdown.wait();
            let _ = sender.send(DaemonEvent::Signal(outcome));
        })
        .map(|_| ())
        .map_err(|source| LaunchError::Spawn { source })
}

fn spawn_console_reader<R>(console: R, sender: Sender<DaemonEvent>) -> Result<(), LaunchError>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("dbgbridge-console".to_owned())
        .spawn(move || forward_commands(console, &sender))
        .map(|_| ())
        .map_err(|source| LaunchError::Spawn { source })
}

fn write_status(out: &mut dyn Write, server: &Server, config: &Config, session: &SessionState) {
    let snapshot = session.snapshot();
    let line = if server.is_running() {
        format!(
            "running on {} with {} connection(s); session {}, {} command(s), {} timeout(s)",
            config.channel(),
            server.connection_count(),
            snapshot.session_id,
            snapshot.commands,
            snapshot.timeouts,
        )
    } else {
        format!("stopped; session {}", snapshot.session_id)
    };
    if let Err(error) = writeln!(out, "{line}").and_then(|()| out.flush()) {
        warn!(target: PROCESS_TARGET, %error, "failed to write operator status");
    }
}
