//! Worker lifecycle plumbing
//!
//! Every pipeline stage (controller, streamer, handler, processor) runs
//! on its own named thread and talks to the orchestrator over a pair of
//! channels. [`ControlLink`] is the worker-side end; [`WorkerHandle`]
//! is the orchestrator-side end plus the join handle.
//!
//! Contract: a worker sends exactly one `InitSuccess`/`InitFail` after
//! construction, acknowledges every command with `CommandExecuted`
//! (even ones that failed; the failure travels separately as `Error`),
//! and returns from its run loop on `Exit`.

use crate::error::{Error, Result};
use crate::message::{Command, CommandKind, Status};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Worker-side end of the control channels
pub struct ControlLink {
    commands: Receiver<Command>,
    status: Sender<Status>,
}

impl ControlLink {
    /// Block until the next command arrives
    pub fn recv(&self) -> Result<Command> {
        self.commands.recv().map_err(|_| Error::Closed)
    }

    /// Non-blocking command poll; `Ok(None)` when no command is ready
    pub fn try_recv(&self) -> Result<Option<Command>> {
        match self.commands.try_recv() {
            Ok(cmd) => Ok(Some(cmd)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::Closed),
        }
    }

    /// Raw command receiver, for `select!` over commands and data
    pub fn commands(&self) -> &Receiver<Command> {
        &self.commands
    }

    /// Report construction outcome (sent exactly once per worker)
    pub fn send_init(&self, success: bool) {
        let status = if success {
            Status::InitSuccess
        } else {
            Status::InitFail
        };
        let _ = self.status.send(status);
    }

    /// Send a line for the operator terminal
    pub fn print(&self, message: impl Into<String>) {
        let _ = self.status.send(Status::Print(message.into()));
    }

    /// Ask the orchestrator to clear the operator terminal
    pub fn clear_terminal(&self) {
        let _ = self.status.send(Status::ClearTerminal);
    }

    /// Report an error; also printed so the operator sees the cause
    pub fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        let _ = self.status.send(Status::Print(message.clone()));
        let _ = self.status.send(Status::Error(message));
    }

    /// Acknowledge that a command finished processing
    pub fn executed(&self, kind: CommandKind) {
        let _ = self.status.send(Status::CommandExecuted(kind));
    }
}

/// Build a free-standing link plus its peer ends, for driving a worker
/// directly in unit tests
#[cfg(test)]
pub(crate) fn link_for_tests() -> (ControlLink, Sender<Command>, Receiver<Status>) {
    let (command_tx, command_rx) = unbounded();
    let (status_tx, status_rx) = unbounded();
    let link = ControlLink {
        commands: command_rx,
        status: status_tx,
    };
    (link, command_tx, status_rx)
}

/// Result of draining a worker's pending status messages
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusSummary {
    /// Number of `Error` statuses seen
    pub errors: usize,
    /// Worker thread has exited and dropped its link
    pub disconnected: bool,
}

/// Orchestrator-side end of a worker's control channels
pub struct WorkerHandle {
    name: &'static str,
    commands: Sender<Command>,
    status: Receiver<Status>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a worker on a named thread
    ///
    /// The closure receives the worker's [`ControlLink`] and is
    /// responsible for the init handshake before entering its run loop.
    pub fn spawn<F>(name: &'static str, body: F) -> Result<Self>
    where
        F: FnOnce(ControlLink) + Send + 'static,
    {
        let (command_tx, command_rx) = unbounded();
        let (status_tx, status_rx) = unbounded();
        let link = ControlLink {
            commands: command_rx,
            status: status_tx,
        };
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(link))?;
        Ok(WorkerHandle {
            name,
            commands: command_tx,
            status: status_rx,
            thread: Some(thread),
        })
    }

    /// Worker thread name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Send a command to the worker
    pub fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Closed)
    }

    /// Wait for the init handshake, relaying any terminal output
    ///
    /// Returns false on `InitFail`, timeout, or a dead worker.
    pub fn wait_for_init(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.status.recv_timeout(remaining) {
                Ok(Status::InitSuccess) => return true,
                Ok(Status::InitFail) => return false,
                Ok(status) => self.relay(status),
                Err(RecvTimeoutError::Timeout) => {
                    log::error!("{}: init timed out", self.name);
                    return false;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    log::error!("{}: worker exited before init", self.name);
                    return false;
                }
            }
        }
    }

    /// Wait for acknowledgement of the given command
    ///
    /// Terminal output is relayed while waiting. Returns false if the
    /// worker reports an error first, times out, or has exited.
    pub fn wait_for_executed(&self, kind: CommandKind, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.status.recv_timeout(remaining) {
                Ok(Status::CommandExecuted(k)) if k == kind => return true,
                Ok(Status::Error(message)) => {
                    log::error!("{}: {}", self.name, message);
                    return false;
                }
                Ok(status) => self.relay(status),
                Err(RecvTimeoutError::Timeout) => {
                    log::error!("{}: timed out waiting for {:?}", self.name, kind);
                    return false;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    log::error!("{}: worker exited waiting for {:?}", self.name, kind);
                    return false;
                }
            }
        }
    }

    /// Drain all pending status messages without blocking
    pub fn drain_status(&self) -> StatusSummary {
        let mut summary = StatusSummary::default();
        loop {
            match self.status.try_recv() {
                Ok(Status::Error(message)) => {
                    log::error!("{}: {}", self.name, message);
                    summary.errors += 1;
                }
                Ok(status) => self.relay(status),
                Err(TryRecvError::Empty) => return summary,
                Err(TryRecvError::Disconnected) => {
                    summary.disconnected = true;
                    return summary;
                }
            }
        }
    }

    fn relay(&self, status: Status) {
        match status {
            Status::Print(message) => log::info!("{}: {}", self.name, message),
            // ANSI clear + home, same as the demo firmware tooling
            Status::ClearTerminal => print!("\x1b[2J\x1b[H"),
            Status::CommandExecuted(kind) => {
                log::debug!("{}: executed {:?}", self.name, kind)
            }
            Status::InitSuccess | Status::InitFail | Status::Error(_) => {}
        }
    }

    /// Join the worker thread
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("{}: worker thread panicked", self.name);
            }
        }
    }
}
