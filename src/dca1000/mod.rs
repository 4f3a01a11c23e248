//! DCA1000 capture card handler
//!
//! Owns both UDP sockets to the capture card: the command socket for
//! the configuration protocol (see [`commands`]) and the data socket
//! the FPGA floods with raw LVDS capture packets. The handler worker
//! configures the FPGA once at construction, then relays data packets
//! to the ethernet streamer unmodified; reassembly happens there.

pub mod commands;

use crate::config::Dca1000Settings;
use crate::error::{Error, Result};
use crate::message::Command;
use crate::worker::ControlLink;
use commands::{
    config_fpga_gen, config_packet_data, decode_fpga_version, encode_command, parse_response,
    CommandCode, FpgaVersion, MAX_DATA_PACKET,
};
use crossbeam_channel::Sender;
use std::net::UdpSocket;
use std::time::Duration;

/// Command responses arrive within milliseconds on a healthy card
const CMD_TIMEOUT: Duration = Duration::from_secs(1);
/// Data packets are continuous while recording; a silent second means
/// the stream is gone
const DATA_TIMEOUT: Duration = Duration::from_secs(1);

/// Data packet size configured into the FPGA
const PACKET_SIZE: u16 = 1470;
/// Inter-packet delay configured into the FPGA, in microseconds
const PACKET_DELAY_US: u16 = 25;

/// DCA1000 handler worker state
pub struct Dca1000Handler {
    cmd_socket: UdpSocket,
    data_socket: UdpSocket,
    payloads: Sender<Vec<u8>>,
    streaming_enabled: bool,
    fpga_version: Option<FpgaVersion>,
    relayed_packets: u64,
}

impl Dca1000Handler {
    /// Bind both sockets and run the FPGA init sequence
    pub fn connect(settings: &Dca1000Settings, payloads: Sender<Vec<u8>>) -> Result<Self> {
        let cmd_socket = UdpSocket::bind((settings.system_ip.as_str(), settings.cmd_port))?;
        cmd_socket.set_read_timeout(Some(CMD_TIMEOUT))?;
        cmd_socket.connect((settings.fpga_ip.as_str(), settings.cmd_port))?;

        let data_socket = UdpSocket::bind((settings.system_ip.as_str(), settings.data_port))?;
        data_socket.set_read_timeout(Some(DATA_TIMEOUT))?;

        let mut handler = Dca1000Handler {
            cmd_socket,
            data_socket,
            payloads,
            streaming_enabled: false,
            fpga_version: None,
            relayed_packets: 0,
        };
        handler.init_fpga()?;
        Ok(handler)
    }

    /// FPGA version read during init
    pub fn fpga_version(&self) -> Option<FpgaVersion> {
        self.fpga_version
    }

    /// One command round trip over the command socket
    fn transact(&self, code: CommandCode, data: &[u8]) -> Result<commands::Response> {
        self.cmd_socket.send(&encode_command(code, data))?;

        let mut buf = [0u8; 2048];
        let n = match self.cmd_socket.recv(&mut buf) {
            Ok(n) => n,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Err(Error::Timeout);
            }
            Err(e) => return Err(e.into()),
        };
        let response = parse_response(&buf[..n])?;
        if response.code == CommandCode::SystemError {
            return Err(Error::Protocol(format!(
                "capture card system error {:#06x}",
                response.status
            )));
        }
        if response.code != code {
            return Err(Error::Protocol(format!(
                "response code {:?} does not match command {:?}",
                response.code, code
            )));
        }
        Ok(response)
    }

    /// Send a command and require a zero status
    fn execute(&self, code: CommandCode, data: &[u8]) -> Result<()> {
        let response = self.transact(code, data)?;
        if !response.is_success() {
            return Err(Error::Protocol(format!(
                "{:?} failed with status {:#06x}",
                code, response.status
            )));
        }
        Ok(())
    }

    /// Configuration sequence run once at construction
    ///
    /// Every step is attempted so a flaky link reports all failures at
    /// once instead of one per retry cycle.
    fn init_fpga(&mut self) -> Result<()> {
        let steps: [(CommandCode, Vec<u8>); 4] = [
            (CommandCode::SystemConnect, Vec::new()),
            (CommandCode::ResetFpga, Vec::new()),
            (
                CommandCode::ConfigPacketData,
                config_packet_data(PACKET_SIZE, PACKET_DELAY_US),
            ),
            (CommandCode::ConfigFpgaGen, config_fpga_gen().to_vec()),
        ];

        let mut failures = 0usize;
        for (code, data) in &steps {
            if let Err(e) = self.execute(*code, data) {
                log::error!("DCA1000 init: {:?}: {}", code, e);
                failures += 1;
            }
        }

        match self.transact(CommandCode::ReadFpgaVersion, &[]) {
            Ok(response) => {
                let version = decode_fpga_version(response.status);
                log::info!("DCA1000 FPGA version {}", version);
                self.fpga_version = Some(version);
            }
            Err(e) => {
                log::error!("DCA1000 init: ReadFpgaVersion: {}", e);
                failures += 1;
            }
        }

        if failures > 0 {
            return Err(Error::InitializationFailed(format!(
                "{} of {} DCA1000 init commands failed",
                failures,
                steps.len() + 1
            )));
        }
        Ok(())
    }

    fn start_recording(&mut self) -> Result<()> {
        if self.streaming_enabled {
            return Ok(());
        }
        self.execute(CommandCode::RecordStart, &[])?;
        self.streaming_enabled = true;
        self.relayed_packets = 0;
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<()> {
        if !self.streaming_enabled {
            return Ok(());
        }
        self.execute(CommandCode::RecordStop, &[])?;
        self.streaming_enabled = false;
        log::debug!("DCA1000 stopped after {} packets", self.relayed_packets);
        Ok(())
    }

    /// Relay one data packet to the streamer channel
    fn relay_once(&mut self, link: &ControlLink) {
        let mut buf = [0u8; MAX_DATA_PACKET];
        match self.data_socket.recv(&mut buf) {
            Ok(n) => {
                self.relayed_packets += 1;
                if self.payloads.send(buf[..n].to_vec()).is_err() {
                    link.report_error("data channel closed, stopping capture");
                    let _ = self.stop_recording();
                    self.streaming_enabled = false;
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                link.report_error("capture data stream timed out");
                let _ = self.stop_recording();
                self.streaming_enabled = false;
            }
            Err(e) => {
                link.report_error(format!("capture data socket error: {}", e));
                let _ = self.stop_recording();
                self.streaming_enabled = false;
            }
        }
    }

    /// Returns true when the worker should exit
    fn handle(&mut self, command: Command, link: &ControlLink) -> bool {
        let kind = command.kind();
        match command {
            Command::Exit => {
                let _ = self.stop_recording();
                link.executed(kind);
                return true;
            }
            Command::StartStreaming => {
                if let Err(e) = self.start_recording() {
                    link.report_error(format!("record start failed: {}", e));
                }
            }
            Command::StopStreaming => {
                if let Err(e) = self.stop_recording() {
                    link.report_error(format!("record stop failed: {}", e));
                }
            }
            other => {
                link.report_error(format!("capture handler cannot handle {:?}", other.kind()));
            }
        }
        link.executed(kind);
        false
    }

    /// Worker loop: relay packets while recording, block on commands
    /// while idle
    pub fn run(mut self, link: ControlLink) {
        loop {
            if self.streaming_enabled {
                self.relay_once(&link);
                loop {
                    match link.try_recv() {
                        Ok(Some(command)) => {
                            if self.handle(command, &link) {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(_) => {
                            let _ = self.stop_recording();
                            return;
                        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::link_for_tests;
    use crossbeam_channel::unbounded;
    use std::net::SocketAddr;

    /// Minimal FPGA stand-in: answers every command with status 0,
    /// except the version read which reports 0x1234
    fn spawn_fake_fpga() -> (SocketAddr, std::thread::JoinHandle<Vec<CommandCode>>) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let mut seen = Vec::new();
            let mut buf = [0u8; 2048];
            while let Ok((_, peer)) = socket.recv_from(&mut buf) {
                let raw_code = u16::from_le_bytes([buf[2], buf[3]]);
                let code = CommandCode::from_u16(raw_code).unwrap();
                seen.push(code);
                let status: u16 = if code == CommandCode::ReadFpgaVersion {
                    0x1234
                } else {
                    0
                };
                let mut reply = Vec::new();
                reply.extend_from_slice(&commands::CMD_HEADER.to_le_bytes());
                reply.extend_from_slice(&raw_code.to_le_bytes());
                reply.extend_from_slice(&status.to_le_bytes());
                reply.extend_from_slice(&commands::CMD_FOOTER.to_le_bytes());
                socket.send_to(&reply, peer).unwrap();
                if code == CommandCode::ReadFpgaVersion {
                    break;
                }
            }
            seen
        });
        (addr, handle)
    }

    fn loopback_handler(fpga_addr: SocketAddr, payloads: Sender<Vec<u8>>) -> Dca1000Handler {
        let cmd_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        cmd_socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        cmd_socket.connect(fpga_addr).unwrap();
        let data_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        data_socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        Dca1000Handler {
            cmd_socket,
            data_socket,
            payloads,
            streaming_enabled: false,
            fpga_version: None,
            relayed_packets: 0,
        }
    }

    #[test]
    fn test_init_sequence_order_and_version() {
        let (fpga_addr, fpga) = spawn_fake_fpga();
        let (payload_tx, _payload_rx) = unbounded();
        let mut handler = loopback_handler(fpga_addr, payload_tx);

        handler.init_fpga().unwrap();
        assert_eq!(
            handler.fpga_version(),
            Some(FpgaVersion {
                major: 36,
                minor: 52
            })
        );

        let seen = fpga.join().unwrap();
        assert_eq!(
            seen,
            vec![
                CommandCode::SystemConnect,
                CommandCode::ResetFpga,
                CommandCode::ConfigPacketData,
                CommandCode::ConfigFpgaGen,
                CommandCode::ReadFpgaVersion,
            ]
        );
    }

    #[test]
    fn test_init_reports_timeout_as_failure() {
        // Nothing listening on the peer socket
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let (payload_tx, _payload_rx) = unbounded();
        let mut handler = loopback_handler(silent.local_addr().unwrap(), payload_tx);
        // Shorten the wait so the test stays fast
        handler
            .cmd_socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        match handler.init_fpga() {
            Err(Error::InitializationFailed(message)) => {
                assert!(message.contains("5 of 5"));
            }
            other => panic!("expected init failure, got {:?}", other),
        }
    }

    #[test]
    fn test_relay_forwards_data_packets() {
        let (fpga_addr, _fpga) = spawn_fake_fpga();
        let (payload_tx, payload_rx) = unbounded();
        let mut handler = loopback_handler(fpga_addr, payload_tx);
        handler.streaming_enabled = true;

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let data_addr = handler.data_socket.local_addr().unwrap();
        sender.send_to(&[1, 2, 3, 4, 5], data_addr).unwrap();

        let (link, _commands, _status) = link_for_tests();
        handler.relay_once(&link);

        assert_eq!(payload_rx.try_recv().unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(handler.relayed_packets, 1);
        assert!(handler.streaming_enabled);
    }
}
