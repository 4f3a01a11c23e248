//! Control-plane message protocol between the orchestrator and workers
//!
//! Commands flow orchestrator → worker, status messages flow back.
//! Payloads ride inside the enum variants so a command and its data
//! can never arrive separately or out of order.

use crate::config::{RadarConfig, RadarPerformance};
use std::path::PathBuf;

/// Configuration payload carried by [`Command::LoadConfig`]
///
/// The controller needs the path of the `.cfg` script it replays over
/// the CLI port; streamers and processors need the parsed config plus
/// the derived performance constants.
#[derive(Debug, Clone)]
pub enum ConfigUpdate {
    /// Path to the radar `.cfg` command script (controller)
    CliPath(PathBuf),
    /// Parsed radar config + derived performance (streamers, processors)
    Radar {
        config: RadarConfig,
        performance: RadarPerformance,
    },
}

/// Command sent from the orchestrator to a worker
#[derive(Debug, Clone)]
pub enum Command {
    /// Terminate the worker run loop
    Exit,
    /// Start the sensor (controller: send `sensorStart`)
    StartSensor,
    /// Stop the sensor (controller: send `sensorStop`)
    StopSensor,
    /// Replay the loaded config over the CLI port (controller)
    SendConfig,
    /// Deliver new configuration to the worker
    LoadConfig(ConfigUpdate),
    /// Enable the data path
    StartStreaming,
    /// Disable the data path
    StopStreaming,
    /// Accept the worker's external product listeners (processors)
    ConfigureListeners,
}

impl Command {
    /// Payload-free discriminant, used in [`Status::CommandExecuted`]
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Exit => CommandKind::Exit,
            Command::StartSensor => CommandKind::StartSensor,
            Command::StopSensor => CommandKind::StopSensor,
            Command::SendConfig => CommandKind::SendConfig,
            Command::LoadConfig(_) => CommandKind::LoadConfig,
            Command::StartStreaming => CommandKind::StartStreaming,
            Command::StopStreaming => CommandKind::StopStreaming,
            Command::ConfigureListeners => CommandKind::ConfigureListeners,
        }
    }
}

/// Discriminant of [`Command`], cheap to copy and compare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Exit,
    StartSensor,
    StopSensor,
    SendConfig,
    LoadConfig,
    StartStreaming,
    StopStreaming,
    ConfigureListeners,
}

/// Status message sent from a worker back to the orchestrator
#[derive(Debug, Clone)]
pub enum Status {
    /// Worker finished construction and is entering its run loop
    InitSuccess,
    /// Worker failed construction and has exited
    InitFail,
    /// Acknowledgement that a command finished processing
    CommandExecuted(CommandKind),
    /// Non-fatal-to-the-daemon error; the orchestrator decides whether
    /// to shut down
    Error(String),
    /// Human-readable line for the operator terminal
    Print(String),
    /// Request to clear the operator terminal
    ClearTerminal,
}
