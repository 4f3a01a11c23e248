//! Serial frame streamer
//!
//! Reads demo firmware frames off the sensor's data serial port. The
//! port carries a continuous byte stream with each frame prefixed by
//! the sync word, so a frame is everything up to the next sync word
//! with the sync word re-prepended.

use crate::error::{Error, Result};
use crate::frame::{FrameHeader, HeaderLayout, MAGIC_WORD};
use crate::message::{Command, ConfigUpdate};
use crate::transport::Transport;
use crate::worker::ControlLink;
use crossbeam_channel::Sender;
use std::time::{Duration, Instant};

/// Data port baud rate (fixed by the demo firmware)
pub const DATA_BAUD: u32 = 921_600;

/// Frames arrive at the configured frame period (tens of ms); half a
/// second of silence means the sensor stopped
const FRAME_TIMEOUT: Duration = Duration::from_millis(500);

/// Serial streamer worker state
pub struct SerialStreamer<T: Transport> {
    transport: T,
    layout: HeaderLayout,
    frames: Sender<Vec<u8>>,
    pending: Vec<u8>,
    streaming_enabled: bool,
    config_loaded: bool,
    verbose: bool,
    detected_frames: u64,
    dropped_frames: u64,
}

impl<T: Transport> SerialStreamer<T> {
    pub fn new(transport: T, layout: HeaderLayout, frames: Sender<Vec<u8>>, verbose: bool) -> Self {
        SerialStreamer {
            transport,
            layout,
            frames,
            pending: Vec::new(),
            streaming_enabled: false,
            config_loaded: false,
            verbose,
            detected_frames: 0,
            dropped_frames: 0,
        }
    }

    /// Read until the next sync word, returning the bytes before it.
    /// The sync word itself is consumed.
    fn read_until_magic(&mut self) -> Result<Vec<u8>> {
        let deadline = Instant::now() + FRAME_TIMEOUT;
        let mut scan_from = 0usize;
        loop {
            if self.pending.len() >= MAGIC_WORD.len() {
                let found = self.pending[scan_from..]
                    .windows(MAGIC_WORD.len())
                    .position(|w| w == MAGIC_WORD)
                    .map(|i| scan_from + i);
                if let Some(pos) = found {
                    let mut chunk: Vec<u8> =
                        self.pending.drain(..pos + MAGIC_WORD.len()).collect();
                    chunk.truncate(pos);
                    return Ok(chunk);
                }
                // A sync word may straddle the next read
                scan_from = self.pending.len() - (MAGIC_WORD.len() - 1);
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            let mut buf = [0u8; 1024];
            let n = self.transport.read(&mut buf)?;
            if n > 0 {
                self.pending.extend_from_slice(&buf[..n]);
            } else {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// Drop buffered bytes and consume up to the first sync word so
    /// the next read starts on a frame boundary
    fn resync(&mut self) -> Result<()> {
        self.transport.discard_input()?;
        self.pending.clear();
        self.read_until_magic()?;
        Ok(())
    }

    /// Pull one frame off the port and forward it if valid
    fn pull_frame(&mut self, link: &ControlLink) {
        let body = match self.read_until_magic() {
            Ok(body) => body,
            Err(e) => {
                link.report_error(format!("serial stream failed: {}", e));
                self.streaming_enabled = false;
                return;
            }
        };

        let mut packet = Vec::with_capacity(MAGIC_WORD.len() + body.len());
        packet.extend_from_slice(&MAGIC_WORD);
        packet.extend_from_slice(&body);
        self.detected_frames += 1;

        match FrameHeader::decode(&packet, self.layout) {
            Ok(header) if header.packet_length as usize == packet.len() => {
                if self.verbose {
                    log::debug!(
                        "frame {}: {} bytes, {} TLVs",
                        header.frame_number,
                        packet.len(),
                        header.num_tlvs
                    );
                }
                if self.frames.send(packet).is_err() {
                    link.report_error("frame channel closed, stopping stream");
                    self.streaming_enabled = false;
                }
            }
            Ok(header) => {
                self.dropped_frames += 1;
                log::debug!(
                    "dropped frame {}: declared {} bytes, got {}",
                    header.frame_number,
                    header.packet_length,
                    packet.len()
                );
            }
            Err(e) => {
                self.dropped_frames += 1;
                log::debug!("dropped frame: {}", e);
            }
        }
    }

    fn start(&mut self, link: &ControlLink) {
        if self.streaming_enabled {
            return;
        }
        match self.resync() {
            Ok(()) => {
                self.streaming_enabled = true;
                self.detected_frames = 0;
                self.dropped_frames = 0;
                link.print("serial stream started");
            }
            Err(e) => link.report_error(format!("cannot sync to frame stream: {}", e)),
        }
    }

    fn stop(&mut self, link: &ControlLink) {
        if !self.streaming_enabled {
            return;
        }
        self.streaming_enabled = false;
        link.print(format!(
            "serial stream stopped: {} frames, {} dropped",
            self.detected_frames, self.dropped_frames
        ));
    }

    /// Returns true when the worker should exit
    fn handle(&mut self, command: Command, link: &ControlLink) -> bool {
        let kind = command.kind();
        match command {
            Command::Exit => {
                link.executed(kind);
                return true;
            }
            Command::LoadConfig(ConfigUpdate::Radar { .. }) => {
                self.config_loaded = true;
            }
            Command::LoadConfig(ConfigUpdate::CliPath(_)) => {
                link.report_error("streamer takes a parsed config, not a path");
            }
            Command::StartStreaming => self.start(link),
            Command::StopStreaming => self.stop(link),
            other => {
                link.report_error(format!("streamer cannot handle {:?}", other.kind()));
            }
        }
        link.executed(kind);
        false
    }

    /// Worker loop: pull frames while streaming, then service every
    /// command that became ready; block on commands while idle
    pub fn run(mut self, link: ControlLink) {
        loop {
            if self.streaming_enabled {
                self.pull_frame(&link);
                loop {
                    match link.try_recv() {
                        Ok(Some(command)) => {
                            if self.handle(command, &link) {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(_) => return,
                    }
                }
            } else {
                match link.recv() {
                    Ok(command) => {
                        if self.handle(command, &link) {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
        }
    }
}
