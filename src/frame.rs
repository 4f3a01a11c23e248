//! Demo firmware frame packet format
//!
//! Frames on the data serial port start with an 8-byte sync word,
//! followed by a little-endian header and a sequence of TLV sections.
//! The header grew a sub-frame field between demo firmware generations,
//! so the layout is selected from the configured SDK version rather
//! than assumed.

use crate::error::{Error, Result};

/// Frame sync word preceding every packet
pub const MAGIC_WORD: [u8; 8] = [0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x08, 0x07];

/// Frame header layout, keyed by demo firmware SDK generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLayout {
    /// 36-byte header, no sub-frame field (SDK 2.1, IWR1443 demo)
    Sdk2_1,
    /// 40-byte header with sub-frame field (SDK 3.5, IWR6843 demo)
    Sdk3_5,
}

impl HeaderLayout {
    /// Select the layout for a configured SDK version string
    pub fn from_sdk_version(version: &str) -> Result<Self> {
        match version {
            "2.1" => Ok(HeaderLayout::Sdk2_1),
            "3.5" => Ok(HeaderLayout::Sdk3_5),
            other => Err(Error::InvalidParameter(format!(
                "unsupported SDK version: {}",
                other
            ))),
        }
    }

    /// Header size in bytes, including the sync word
    pub fn header_len(&self) -> usize {
        match self {
            HeaderLayout::Sdk2_1 => 36,
            HeaderLayout::Sdk3_5 => 40,
        }
    }
}

/// Decoded frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u32,
    /// Total packet length in bytes, sync word and header included
    pub packet_length: u32,
    pub platform: u32,
    pub frame_number: u32,
    pub time_cpu_cycles: u32,
    pub num_detected_objects: u32,
    pub num_tlvs: u32,
    /// Present only in the 40-byte layout
    pub sub_frame_number: Option<u32>,
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

impl FrameHeader {
    /// Decode a header from the start of a packet buffer
    ///
    /// The buffer must begin with the sync word.
    pub fn decode(buf: &[u8], layout: HeaderLayout) -> Result<Self> {
        if buf.len() < layout.header_len() {
            return Err(Error::InvalidPacket(format!(
                "header truncated: {} bytes, need {}",
                buf.len(),
                layout.header_len()
            )));
        }
        if buf[..8] != MAGIC_WORD {
            return Err(Error::InvalidPacket("bad sync word".to_string()));
        }

        let sub_frame_number = match layout {
            HeaderLayout::Sdk2_1 => None,
            HeaderLayout::Sdk3_5 => Some(read_u32(buf, 36)),
        };

        Ok(FrameHeader {
            version: read_u32(buf, 8),
            packet_length: read_u32(buf, 12),
            platform: read_u32(buf, 16),
            frame_number: read_u32(buf, 20),
            time_cpu_cycles: read_u32(buf, 24),
            num_detected_objects: read_u32(buf, 28),
            num_tlvs: read_u32(buf, 32),
            sub_frame_number,
        })
    }
}

/// TLV section tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvTag {
    DetectedPoints,
    RangeProfile,
    NoiseProfile,
    AzimuthStaticHeatmap,
    RangeDopplerHeatmap,
    Stats,
    /// Tag this build does not decode; the section is skipped by length
    Unknown(u32),
}

impl From<u32> for TlvTag {
    fn from(raw: u32) -> Self {
        match raw {
            1 => TlvTag::DetectedPoints,
            2 => TlvTag::RangeProfile,
            3 => TlvTag::NoiseProfile,
            4 => TlvTag::AzimuthStaticHeatmap,
            5 => TlvTag::RangeDopplerHeatmap,
            6 => TlvTag::Stats,
            other => TlvTag::Unknown(other),
        }
    }
}

/// One TLV section: tag plus payload slice (8-byte TLV header stripped)
#[derive(Debug, Clone, Copy)]
pub struct Tlv<'a> {
    pub tag: TlvTag,
    pub payload: &'a [u8],
}

/// Iterator over the TLV sections of a frame packet
///
/// Yields `Err` once and then stops if a section header or payload
/// runs past the end of the packet.
pub struct TlvIter<'a> {
    buf: &'a [u8],
    offset: usize,
    remaining: u32,
}

/// Walk the TLV sections of a complete frame packet
pub fn tlvs<'a>(packet: &'a [u8], header: &FrameHeader, layout: HeaderLayout) -> TlvIter<'a> {
    let start = layout.header_len().min(packet.len());
    TlvIter {
        buf: &packet[start..],
        offset: 0,
        remaining: header.num_tlvs,
    }
}

impl<'a> Iterator for TlvIter<'a> {
    type Item = Result<Tlv<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        if self.buf.len() - self.offset < 8 {
            self.remaining = 0;
            return Some(Err(Error::InvalidPacket(
                "TLV header truncated".to_string(),
            )));
        }
        let tag = TlvTag::from(read_u32(self.buf, self.offset));
        let length = read_u32(self.buf, self.offset + 4) as usize;
        let start = self.offset + 8;
        if self.buf.len() - start < length {
            self.remaining = 0;
            return Some(Err(Error::InvalidPacket(format!(
                "TLV payload truncated: {} bytes declared, {} available",
                length,
                self.buf.len() - start
            ))));
        }
        self.offset = start + length;
        self.remaining -= 1;
        Some(Ok(Tlv {
            tag,
            payload: &self.buf[start..start + length],
        }))
    }
}
