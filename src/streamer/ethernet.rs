//! Ethernet frame streamer
//!
//! The DCA1000 splits the raw LVDS capture into sequenced UDP packets:
//!
//! ```text
//! seq:u32 LE | byte_count:u48 LE | payload
//! ```
//!
//! `byte_count` is the cumulative number of capture bytes sent *before*
//! this packet, which makes lost packets recoverable: the gap between
//! the declared count and the bytes actually collected is filled with
//! zeros so frame boundaries stay aligned.

use crate::error::{Error, Result};
use crate::message::{Command, ConfigUpdate};
use crate::worker::ControlLink;
use crossbeam_channel::{Receiver, Sender};

/// Smallest valid data packet: sequence number + byte count, no payload
const PACKET_PREFIX: usize = 10;

/// Zero-fill recovery bound in frames; a declared byte count further
/// ahead than this is a corrupt packet, not packet loss
const MAX_PAD_FRAMES: u64 = 64;

/// Reassembles sequenced capture packets into fixed-size frames
#[derive(Debug)]
pub struct FrameAssembler {
    bytes_per_frame: usize,
    buffer: Vec<u8>,
    last_seq: u32,
    byte_count: u64,
    received_packets: u64,
    dropped_packets: u64,
}

impl FrameAssembler {
    /// `bytes_per_frame` comes from the radar config; see
    /// [`crate::config::RadarConfig::bytes_per_frame`]
    pub fn new(bytes_per_frame: usize) -> Self {
        FrameAssembler {
            bytes_per_frame,
            buffer: Vec::new(),
            last_seq: 0,
            byte_count: 0,
            received_packets: 0,
            dropped_packets: 0,
        }
    }

    /// Forget all reassembly state (new capture session)
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_seq = 0;
        self.byte_count = 0;
        self.received_packets = 0;
        self.dropped_packets = 0;
    }

    pub fn received_packets(&self) -> u64 {
        self.received_packets
    }

    /// Packets lost so far, inferred from sequence number gaps
    pub fn dropped_packets(&self) -> u64 {
        self.dropped_packets
    }

    /// Append one data packet; returns every frame completed by it
    pub fn push(&mut self, datagram: &[u8]) -> Result<Vec<Vec<u8>>> {
        if datagram.len() < PACKET_PREFIX {
            return Err(Error::InvalidPacket(format!(
                "capture packet too short: {} bytes",
                datagram.len()
            )));
        }
        let seq = u32::from_le_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]);
        let declared = u64::from_le_bytes([
            datagram[4],
            datagram[5],
            datagram[6],
            datagram[7],
            datagram[8],
            datagram[9],
            0,
            0,
        ]);
        let payload = &datagram[PACKET_PREFIX..];

        self.received_packets += 1;
        if seq > self.last_seq + 1 {
            self.dropped_packets += u64::from(seq - self.last_seq - 1);
        }
        self.last_seq = seq;

        // Zero-fill whatever the lost packets carried so every later
        // byte lands at its true frame offset
        if declared > self.byte_count {
            let missing = declared - self.byte_count;
            if missing > MAX_PAD_FRAMES * self.bytes_per_frame as u64 {
                return Err(Error::InvalidPacket(format!(
                    "declared byte count jumps {} bytes ahead",
                    missing
                )));
            }
            self.buffer.resize(self.buffer.len() + missing as usize, 0);
            self.byte_count = declared;
        }
        self.buffer.extend_from_slice(payload);
        self.byte_count += payload.len() as u64;

        let mut frames = Vec::new();
        while self.bytes_per_frame > 0 && self.buffer.len() >= self.bytes_per_frame {
            frames.push(self.buffer[..self.bytes_per_frame].to_vec());
            self.buffer.drain(..self.bytes_per_frame);
        }
        Ok(frames)
    }
}

/// Ethernet streamer worker state
pub struct EthernetStreamer {
    payloads: Receiver<Vec<u8>>,
    frames: Sender<Vec<u8>>,
    assembler: Option<FrameAssembler>,
    streaming_enabled: bool,
    verbose: bool,
    emitted_frames: u64,
}

impl EthernetStreamer {
    pub fn new(payloads: Receiver<Vec<u8>>, frames: Sender<Vec<u8>>, verbose: bool) -> Self {
        EthernetStreamer {
            payloads,
            frames,
            assembler: None,
            streaming_enabled: false,
            verbose,
            emitted_frames: 0,
        }
    }

    fn load_config(&mut self, config: &crate::config::RadarConfig, link: &ControlLink) {
        match config.bytes_per_frame() {
            Ok(bytes_per_frame) => {
                self.assembler = Some(FrameAssembler::new(bytes_per_frame));
                log::debug!("capture frame size: {} bytes", bytes_per_frame);
            }
            Err(e) => link.report_error(format!("cannot size capture frames: {}", e)),
        }
    }

    fn start(&mut self, link: &ControlLink) {
        if self.streaming_enabled {
            return;
        }
        match self.assembler.as_mut() {
            Some(assembler) => {
                assembler.reset();
                // Packets relayed before this session are stale
                while self.payloads.try_recv().is_ok() {}
                self.emitted_frames = 0;
                self.streaming_enabled = true;
                link.print("capture stream started");
            }
            None => link.report_error(Error::NotConfigured.to_string()),
        }
    }

    fn stop(&mut self, link: &ControlLink) {
        if !self.streaming_enabled {
            return;
        }
        self.streaming_enabled = false;
        if let Some(assembler) = &self.assembler {
            link.print(format!(
                "capture stream stopped: {} packets ({} dropped), {} frames",
                assembler.received_packets(),
                assembler.dropped_packets(),
                self.emitted_frames
            ));
        }
    }

    fn ingest(&mut self, datagram: Vec<u8>, link: &ControlLink) {
        let assembler = match self.assembler.as_mut() {
            Some(assembler) => assembler,
            None => return,
        };
        match assembler.push(&datagram) {
            Ok(frames) => {
                for frame in frames {
                    self.emitted_frames += 1;
                    if self.verbose {
                        log::debug!("capture frame {} assembled", self.emitted_frames);
                    }
                    if self.frames.send(frame).is_err() {
                        link.report_error("frame channel closed, stopping stream");
                        self.streaming_enabled = false;
                        return;
                    }
                }
            }
            Err(e) => {
                link.report_error(format!("capture stream corrupt: {}", e));
                self.streaming_enabled = false;
            }
        }
    }

    /// Returns true when the worker should exit
    fn handle(&mut self, command: Command, link: &ControlLink) -> bool {
        let kind = command.kind();
        match command {
            Command::Exit => {
                link.executed(kind);
                return true;
            }
            Command::LoadConfig(ConfigUpdate::Radar { config, .. }) => {
                self.load_config(&config, link);
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

    /// Worker loop: multiplex commands and relayed packets while
    /// streaming, block on commands while idle
    pub fn run(mut self, link: ControlLink) {
        let payloads = self.payloads.clone();
        loop {
            if self.streaming_enabled {
                crossbeam_channel::select! {
                    recv(link.commands()) -> message => match message {
                        Ok(command) => {
                            if self.handle(command, &link) {
                                return;
                            }
                        }
                        Err(_) => return,
                    },
                    recv(payloads) -> payload => match payload {
                        Ok(datagram) => self.ingest(datagram, &link),
                        Err(_) => {
                            link.report_error("capture handler went away");
                            self.streaming_enabled = false;
                        }
                    },
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RadarConfig;
    use crate::message::Status;
    use crate::worker::link_for_tests;
    use crossbeam_channel::unbounded;

    fn datagram(seq: u32, declared: u64, payload: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(PACKET_PREFIX + payload.len());
        packet.extend_from_slice(&seq.to_le_bytes());
        packet.extend_from_slice(&declared.to_le_bytes()[..6]);
        packet.extend_from_slice(payload);
        packet
    }

    #[test]
    fn test_frame_boundaries_ignore_packet_boundaries() {
        let mut assembler = FrameAssembler::new(8);
        // 20 payload bytes split 12/8; same frames regardless of split
        let frames = assembler.push(&datagram(1, 0, &[1; 12])).unwrap();
        assert_eq!(frames, vec![vec![1; 8]]);
        let frames = assembler.push(&datagram(2, 12, &[2; 8])).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..4], &[1, 1, 1, 1]);
        assert_eq!(&frames[0][4..], &[2, 2, 2, 2]);
        assert_eq!(assembler.dropped_packets(), 0);
    }

    #[test]
    fn test_multiple_frames_from_one_packet() {
        let mut assembler = FrameAssembler::new(4);
        let frames = assembler.push(&datagram(1, 0, &[7; 12])).unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f == &vec![7; 4]));
    }

    #[test]
    fn test_gap_accounting_accumulates() {
        let mut assembler = FrameAssembler::new(1024);
        assembler.push(&datagram(1, 0, &[0; 4])).unwrap();
        assembler.push(&datagram(5, 16, &[0; 4])).unwrap();
        assert_eq!(assembler.dropped_packets(), 3);
        assembler.push(&datagram(6, 20, &[0; 4])).unwrap();
        assembler.push(&datagram(9, 32, &[0; 4])).unwrap();
        assert_eq!(assembler.dropped_packets(), 5);
        assert_eq!(assembler.received_packets(), 4);
    }

    #[test]
    fn test_lost_packet_zero_filled() {
        let mut assembler = FrameAssembler::new(12);
        // seq 2 (4 bytes at offset 4) never arrives
        assembler.push(&datagram(1, 0, &[0xAA; 4])).unwrap();
        let frames = assembler.push(&datagram(3, 8, &[0xBB; 4])).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0],
            vec![0xAA, 0xAA, 0xAA, 0xAA, 0, 0, 0, 0, 0xBB, 0xBB, 0xBB, 0xBB]
        );
        assert_eq!(assembler.dropped_packets(), 1);
    }

    #[test]
    fn test_corrupt_byte_count_rejected() {
        let mut assembler = FrameAssembler::new(8);
        assembler.push(&datagram(1, 0, &[1; 4])).unwrap();
        // Claims a terabyte of lost capture; padding that would take
        // the process down with it
        assert!(assembler.push(&datagram(2, 1 << 40, &[2; 4])).is_err());
        // A loss within the bound still recovers
        let frames = assembler.push(&datagram(3, 12, &[3; 8])).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec![1, 1, 1, 1, 0, 0, 0, 0]);
        assert_eq!(frames[1], vec![0, 0, 0, 0, 3, 3, 3, 3]);
    }

    #[test]
    fn test_short_datagram_rejected() {
        let mut assembler = FrameAssembler::new(16);
        assert!(assembler.push(&[0; 9]).is_err());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut assembler = FrameAssembler::new(8);
        assembler.push(&datagram(4, 0, &[1; 4])).unwrap();
        assembler.reset();
        assert_eq!(assembler.received_packets(), 0);
        assert_eq!(assembler.dropped_packets(), 0);
        let frames = assembler.push(&datagram(1, 0, &[2; 8])).unwrap();
        assert_eq!(frames, vec![vec![2; 8]]);
    }

    #[test]
    fn test_start_without_config_is_refused() {
        let (_payload_tx, payload_rx) = unbounded();
        let (frame_tx, _frame_rx) = unbounded();
        let mut streamer = EthernetStreamer::new(payload_rx, frame_tx, false);
        let (link, _commands, status) = link_for_tests();

        assert!(!streamer.handle(Command::StartStreaming, &link));
        assert!(!streamer.streaming_enabled);

        let mut saw_error = false;
        while let Ok(message) = status.try_recv() {
            if let Status::Error(text) = message {
                assert!(text.contains("No radar configuration"));
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn test_config_sizes_frames_and_start_streams() {
        let config = RadarConfig::from_cfg_str(
            "profileCfg 0 77 7 3 24 0 0 98 1 64 9142 0 0 30\nframeCfg 0 1 32 0 100 1 0\n",
        )
        .unwrap();
        let (_payload_tx, payload_rx) = unbounded();
        let (frame_tx, _frame_rx) = unbounded();
        let mut streamer = EthernetStreamer::new(payload_rx, frame_tx, false);
        let (link, _commands, _status) = link_for_tests();

        streamer.load_config(&config, &link);
        assert_eq!(
            streamer.assembler.as_ref().unwrap().bytes_per_frame,
            64 * 64 * 4 * 4
        );
        assert!(!streamer.handle(Command::StartStreaming, &link));
        assert!(streamer.streaming_enabled);
    }
}
