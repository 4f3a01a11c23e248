//! Detected-points TLV decoding
//!
//! The demo firmware changed the detected-points wire format between
//! SDK generations. SDK 2.1 sends fixed-point records scaled by a
//! per-frame Q format; SDK 3.5 sends plain floats. Both decode into
//! the same [`PointRecord`].

use crate::config::RadarPerformance;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// One detected point in physical units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    /// Cartesian position in meters
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Radial velocity in meters per second
    pub velocity: f32,
    /// Range in meters
    pub range: f32,
    /// Detection peak value; 0 when the firmware does not report one
    pub peak_value: f32,
}

/// A frame's worth of detected points
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    pub frame_number: u32,
    pub points: Vec<PointRecord>,
}

/// SDK 2.1 record: 6 little-endian int16 fields
const Q_RECORD_LEN: usize = 12;
/// SDK 3.5 record: 4 little-endian f32 fields
const FLOAT_RECORD_LEN: usize = 16;

fn read_i16(buf: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([buf[offset], buf[offset + 1]])
}

/// Decode SDK 2.1 fixed-point records
///
/// Layout: `{num_objects:u16, q_format:u16}` descriptor, then per
/// object `{range_idx, doppler_idx, peak, x, y, z}` as int16. Spatial
/// fields and the peak divide by `2^q_format`; the indices scale by
/// the derived performance constants. Doppler indices are FFT bin
/// numbers, so values in the upper half of the doppler FFT wrap to
/// negative velocities.
pub fn decode_points_q(payload: &[u8], performance: &RadarPerformance) -> Result<Vec<PointRecord>> {
    if payload.len() < 4 {
        return Err(Error::InvalidPacket(
            "detected points descriptor truncated".to_string(),
        ));
    }
    let num_objects = u16::from_le_bytes([payload[0], payload[1]]) as usize;
    let q_format = u16::from_le_bytes([payload[2], payload[3]]);
    let scale = f32::powi(2.0, i32::from(q_format));

    let records = &payload[4..];
    if records.len() < num_objects * Q_RECORD_LEN {
        return Err(Error::InvalidPacket(format!(
            "detected points truncated: {} objects need {} bytes, got {}",
            num_objects,
            num_objects * Q_RECORD_LEN,
            records.len()
        )));
    }

    let bins = performance.num_doppler_bins as i32;
    let mut points = Vec::with_capacity(num_objects);
    for i in 0..num_objects {
        let base = i * Q_RECORD_LEN;
        let range_idx = read_i16(records, base) as u16;
        let mut doppler_idx = i32::from(read_i16(records, base + 2) as u16);
        if bins > 0 && doppler_idx >= bins / 2 {
            doppler_idx -= bins;
        }
        points.push(PointRecord {
            x: f32::from(read_i16(records, base + 6)) / scale,
            y: f32::from(read_i16(records, base + 8)) / scale,
            z: f32::from(read_i16(records, base + 10)) / scale,
            velocity: doppler_idx as f32 * performance.vel_idx_to_m_per_s as f32,
            range: f32::from(range_idx) * performance.range_idx_to_m as f32,
            peak_value: f32::from(read_i16(records, base + 4)) / scale,
        });
    }
    Ok(points)
}

/// Decode SDK 3.5 float records
///
/// Layout: `{x, y, z, velocity}` as f32 per object, no descriptor.
/// Range is recovered from the position; no peak value is reported.
pub fn decode_points_float(payload: &[u8]) -> Result<Vec<PointRecord>> {
    if payload.len() % FLOAT_RECORD_LEN != 0 {
        return Err(Error::InvalidPacket(format!(
            "detected points length {} not a record multiple",
            payload.len()
        )));
    }
    let mut points = Vec::with_capacity(payload.len() / FLOAT_RECORD_LEN);
    for record in payload.chunks_exact(FLOAT_RECORD_LEN) {
        let mut fields = [0f32; 4];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = f32::from_le_bytes([
                record[i * 4],
                record[i * 4 + 1],
                record[i * 4 + 2],
                record[i * 4 + 3],
            ]);
        }
        let [x, y, z, velocity] = fields;
        points.push(PointRecord {
            x,
            y,
            z,
            velocity,
            range: (x * x + y * y + z * z).sqrt(),
            peak_value: 0.0,
        });
    }
    Ok(points)
}
