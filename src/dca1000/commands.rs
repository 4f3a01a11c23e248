//! DCA1000 configuration command protocol
//!
//! Commands and responses travel over the capture card's command UDP
//! port as little-endian framed packets:
//!
//! ```text
//! request:  0xA55A | code:u16 | data_len:u16 | data | 0xEEAA
//! response: 0xA55A | code:u16 | status:u16          | 0xEEAA
//! ```
//!
//! Status 0 means success for every command except `ReadFpgaVersion`,
//! where the status word carries the packed version number.

use crate::error::{Error, Result};

/// Packet header marker
pub const CMD_HEADER: u16 = 0xA55A;
/// Packet footer marker
pub const CMD_FOOTER: u16 = 0xEEAA;

/// Largest data payload carried by a single capture-card datagram
pub const MAX_DATA_PACKET: usize = 1472;

/// DCA1000 command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CommandCode {
    ResetFpga = 0x01,
    ResetArDevice = 0x02,
    ConfigFpgaGen = 0x03,
    ConfigEeprom = 0x04,
    RecordStart = 0x05,
    RecordStop = 0x06,
    PlaybackStart = 0x07,
    PlaybackStop = 0x08,
    SystemConnect = 0x09,
    SystemError = 0x0A,
    ConfigPacketData = 0x0B,
    ConfigDataModeArDevice = 0x0C,
    InitFpgaPlayback = 0x0D,
    ReadFpgaVersion = 0x0E,
}

impl CommandCode {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0x01 => Some(CommandCode::ResetFpga),
            0x02 => Some(CommandCode::ResetArDevice),
            0x03 => Some(CommandCode::ConfigFpgaGen),
            0x04 => Some(CommandCode::ConfigEeprom),
            0x05 => Some(CommandCode::RecordStart),
            0x06 => Some(CommandCode::RecordStop),
            0x07 => Some(CommandCode::PlaybackStart),
            0x08 => Some(CommandCode::PlaybackStop),
            0x09 => Some(CommandCode::SystemConnect),
            0x0A => Some(CommandCode::SystemError),
            0x0B => Some(CommandCode::ConfigPacketData),
            0x0C => Some(CommandCode::ConfigDataModeArDevice),
            0x0D => Some(CommandCode::InitFpgaPlayback),
            0x0E => Some(CommandCode::ReadFpgaVersion),
            _ => None,
        }
    }
}

/// Frame a command packet
pub fn encode_command(code: CommandCode, data: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(8 + data.len());
    packet.extend_from_slice(&CMD_HEADER.to_le_bytes());
    packet.extend_from_slice(&(code as u16).to_le_bytes());
    packet.extend_from_slice(&(data.len() as u16).to_le_bytes());
    packet.extend_from_slice(data);
    packet.extend_from_slice(&CMD_FOOTER.to_le_bytes());
    packet
}

/// Decoded command response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub code: CommandCode,
    pub status: u16,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// Parse a response packet, validating the frame markers
pub fn parse_response(buf: &[u8]) -> Result<Response> {
    if buf.len() < 8 {
        return Err(Error::InvalidPacket(format!(
            "response too short: {} bytes",
            buf.len()
        )));
    }
    let header = u16::from_le_bytes([buf[0], buf[1]]);
    let footer = u16::from_le_bytes([buf[6], buf[7]]);
    if header != CMD_HEADER || footer != CMD_FOOTER {
        return Err(Error::InvalidPacket(format!(
            "bad response markers: {:#06x}/{:#06x}",
            header, footer
        )));
    }
    let raw_code = u16::from_le_bytes([buf[2], buf[3]]);
    let code = CommandCode::from_u16(raw_code)
        .ok_or_else(|| Error::Protocol(format!("unknown response code {:#06x}", raw_code)))?;
    let status = u16::from_le_bytes([buf[4], buf[5]]);
    Ok(Response { code, status })
}

/// `ConfigPacketData` payload: data packet size, inter-packet delay in
/// microseconds, plus two reserved zero bytes
pub fn config_packet_data(packet_size: u16, delay_us: u16) -> Vec<u8> {
    let mut data = Vec::with_capacity(6);
    data.extend_from_slice(&packet_size.to_le_bytes());
    data.extend_from_slice(&delay_us.to_le_bytes());
    data.extend_from_slice(&[0, 0]);
    data
}

/// `ConfigFpgaGen` payload: raw LVDS mode for an AR device over
/// Ethernet with a 30-second inactivity timeout
pub fn config_fpga_gen() -> [u8; 6] {
    [0x01, 0x01, 0x01, 0x02, 0x03, 0x1E]
}

/// FPGA version unpacked from the `ReadFpgaVersion` status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpgaVersion {
    pub major: u16,
    pub minor: u16,
}

/// Unpack the version: low 7 bits are the minor number, the remaining
/// bits the major number
pub fn decode_fpga_version(status: u16) -> FpgaVersion {
    FpgaVersion {
        major: status >> 7,
        minor: status & 0x7F,
    }
}

impl std::fmt::Display for FpgaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_command_framing() {
        let packet = encode_command(CommandCode::RecordStart, &[]);
        assert_eq!(packet, vec![0x5A, 0xA5, 0x05, 0x00, 0x00, 0x00, 0xAA, 0xEE]);
    }

    #[test]
    fn test_encode_command_with_data() {
        let packet = encode_command(CommandCode::ConfigPacketData, &config_packet_data(1470, 25));
        assert_eq!(
            packet,
            vec![
                0x5A, 0xA5, // header
                0x0B, 0x00, // code
                0x06, 0x00, // data length
                0xBE, 0x05, // packet size 1470
                0x19, 0x00, // delay 25us
                0x00, 0x00, // reserved
                0xAA, 0xEE, // footer
            ]
        );
    }

    #[test]
    fn test_parse_response() {
        let buf = [0x5A, 0xA5, 0x09, 0x00, 0x00, 0x00, 0xAA, 0xEE];
        let response = parse_response(&buf).unwrap();
        assert_eq!(response.code, CommandCode::SystemConnect);
        assert!(response.is_success());
    }

    #[test]
    fn test_parse_response_failure_status() {
        let buf = [0x5A, 0xA5, 0x01, 0x00, 0x01, 0x00, 0xAA, 0xEE];
        let response = parse_response(&buf).unwrap();
        assert_eq!(response.code, CommandCode::ResetFpga);
        assert!(!response.is_success());
    }

    #[test]
    fn test_parse_response_rejects_bad_markers() {
        let buf = [0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0xAA, 0xEE];
        assert!(parse_response(&buf).is_err());
        let buf = [0x5A, 0xA5, 0x09, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(parse_response(&buf).is_err());
        assert!(parse_response(&[0x5A, 0xA5]).is_err());
    }

    #[test]
    fn test_fpga_version_unpack() {
        let version = decode_fpga_version(0x1234);
        assert_eq!(version.major, 36);
        assert_eq!(version.minor, 52);
        assert_eq!(version.to_string(), "36.52");
    }

    #[test]
    fn test_fpga_gen_payload() {
        assert_eq!(config_fpga_gen(), [0x01, 0x01, 0x01, 0x02, 0x03, 0x1E]);
    }
}
