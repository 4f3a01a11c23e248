//! Sensor CLI controller worker
//!
//! Drives the demo firmware's command console: replays the `.cfg`
//! script line by line and starts/stops the sensor. Every command is a
//! strict request/response unit terminated by the firmware prompt.

use crate::error::{Error, Result};
use crate::message::{Command, CommandKind, ConfigUpdate};
use crate::transport::Transport;
use crate::worker::ControlLink;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// CLI console baud rate (fixed by the demo firmware)
pub const CLI_BAUD: u32 = 115_200;

/// Firmware console prompt terminating every response
const PROMPT: &[u8] = b"mmwDemo:/>";

/// A healthy console answers well within this window
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(30);

/// CLI controller worker state
pub struct CliController<T: Transport> {
    transport: T,
    config_path: Option<PathBuf>,
    sensor_running: bool,
    flushed: bool,
    /// Set on the first transport failure; the console is not trusted
    /// with further commands afterwards
    port_failed: bool,
    verbose: bool,
}

impl<T: Transport> CliController<T> {
    pub fn new(transport: T, verbose: bool) -> Self {
        CliController {
            transport,
            config_path: None,
            sensor_running: false,
            flushed: false,
            port_failed: false,
            verbose,
        }
    }

    /// Command loop: block on the control channel until `Exit` or the
    /// orchestrator goes away, acknowledging every command
    pub fn run(mut self, link: ControlLink) {
        loop {
            match link.recv() {
                Ok(command) => {
                    let kind = command.kind();
                    self.execute(command, &link);
                    link.executed(kind);
                    if kind == CommandKind::Exit {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        self.shutdown(&link);
    }

    fn execute(&mut self, command: Command, link: &ControlLink) {
        match command {
            Command::Exit => {}
            Command::LoadConfig(ConfigUpdate::CliPath(path)) => {
                self.config_path = Some(path);
            }
            Command::LoadConfig(ConfigUpdate::Radar { .. }) => {
                link.report_error("controller takes a config path, not a parsed config");
            }
            Command::SendConfig => self.send_config(link),
            Command::StartSensor => self.start_sensor(link),
            Command::StopSensor => self.stop_sensor(link),
            other => {
                link.report_error(format!("controller cannot handle {:?}", other.kind()));
            }
        }
    }

    /// Replay the loaded `.cfg` script over the console
    ///
    /// `sensorStart` is held back so the sensor only starts on an
    /// explicit `StartSensor`. Comment and blank lines are skipped.
    fn send_config(&mut self, link: &ControlLink) {
        let path = match &self.config_path {
            Some(path) => path.clone(),
            None => {
                link.report_error(Error::NotConfigured.to_string());
                return;
            }
        };
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                link.report_error(format!("cannot read {}: {}", path.display(), e));
                return;
            }
        };

        // The sensor may hold config from a previous session
        if !self.flushed {
            if self.flush_stale_config(link).is_err() {
                return;
            }
            self.flushed = true;
        }

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('%') || line == "sensorStart" {
                continue;
            }
            match self.send_command(line) {
                Ok(response) => {
                    if response.contains("Error") {
                        link.report_error(format!("console rejected {:?}: {}", line, response));
                    } else if self.verbose {
                        link.print(response);
                    }
                }
                Err(e) => {
                    link.report_error(format!("config replay aborted at {:?}: {}", line, e));
                    return;
                }
            }
        }
        link.print(format!("configuration sent from {}", path.display()));
    }

    fn flush_stale_config(&mut self, link: &ControlLink) -> Result<()> {
        for command in ["sensorStop", "flushCfg"] {
            if let Err(e) = self.send_command(command) {
                link.report_error(format!("console flush failed at {:?}: {}", command, e));
                return Err(e);
            }
        }
        // Anything the console printed beyond the flushCfg prompt is
        // noise from the old session
        if let Err(e) = self.transport.discard_input() {
            link.report_error(format!("console flush failed: {}", e));
            return Err(e);
        }
        Ok(())
    }

    fn start_sensor(&mut self, link: &ControlLink) {
        if self.sensor_running {
            link.print("sensor already running");
            return;
        }
        match self.send_command("sensorStart") {
            Ok(_) => {
                self.sensor_running = true;
                link.print("sensor started");
            }
            Err(e) => link.report_error(format!("sensorStart failed: {}", e)),
        }
    }

    fn stop_sensor(&mut self, link: &ControlLink) {
        if !self.sensor_running {
            link.print("sensor already stopped");
            return;
        }
        match self.send_command("sensorStop") {
            Ok(_) => {
                self.sensor_running = false;
                link.print("sensor stopped");
            }
            Err(e) => link.report_error(format!("sensorStop failed: {}", e)),
        }
    }

    /// Leave the sensor stopped when the worker goes away
    fn shutdown(&mut self, link: &ControlLink) {
        if self.sensor_running {
            if self.send_command("sensorStop").is_ok() {
                self.sensor_running = false;
            }
            link.print("controller closed, sensor stopped");
        }
    }

    /// One request/response unit: write the command, read until the
    /// firmware prompt appears or the response window expires. A
    /// failed unit marks the console failed and refuses later units.
    fn send_command(&mut self, command: &str) -> Result<String> {
        if self.port_failed {
            return Err(Error::Closed);
        }
        let result = self.command_unit(command);
        if result.is_err() {
            self.port_failed = true;
        }
        result
    }

    fn command_unit(&mut self, command: &str) -> Result<String> {
        self.transport.write(command.as_bytes())?;
        self.transport.write(b"\n")?;
        self.transport.flush()?;
        self.read_response()
    }

    /// Byte-at-a-time read so one response never swallows the next;
    /// the console is a 115200-baud human-rate interface
    fn read_response(&mut self) -> Result<String> {
        let deadline = Instant::now() + RESPONSE_TIMEOUT;
        let mut response: Vec<u8> = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            // The deadline also bounds a console that chatters without
            // ever reaching the prompt
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            let n = self.transport.read(&mut byte)?;
            if n > 0 {
                response.push(byte[0]);
                if response.ends_with(PROMPT) {
                    return Ok(String::from_utf8_lossy(&response).into_owned());
                }
            } else {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}
