//! Raw ADC capture processing
//!
//! The DCA1000 interleaves the four LVDS lanes into the capture
//! stream: each group of eight int16 values holds the four lanes' I
//! samples followed by their Q samples, advancing one sample per
//! group. [`deinterleave`] unpacks a frame of that stream into an
//! [`AdcCube`] indexed by lane, chirp, and sample.

use crate::config::{ListenersConfig, RadarConfig, LVDS_LANES};
use crate::error::{Error, Result};
use crate::listeners::{ListenerSet, Product};
use crate::message::{Command, ConfigUpdate};
use crate::processor::FrameSink;
use crate::worker::ControlLink;
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

/// One frame of raw ADC samples, split by lane and chirp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdcCube {
    pub lanes: usize,
    pub samples_per_chirp: usize,
    pub chirps: usize,
    /// In-phase samples, indexed `[lane][chirp][sample]`
    pub i: Vec<i16>,
    /// Quadrature samples, same indexing
    pub q: Vec<i16>,
}

impl AdcCube {
    fn index(&self, lane: usize, chirp: usize, sample: usize) -> usize {
        (lane * self.chirps + chirp) * self.samples_per_chirp + sample
    }

    /// Complex sample as an (I, Q) pair
    pub fn sample(&self, lane: usize, chirp: usize, sample: usize) -> (i16, i16) {
        let index = self.index(lane, chirp, sample);
        (self.i[index], self.q[index])
    }
}

/// Unpack one frame of the interleaved capture stream
pub fn deinterleave(frame: &[u8], samples_per_chirp: usize, chirps: usize) -> Result<AdcCube> {
    let expected = samples_per_chirp * chirps * LVDS_LANES * 4;
    if frame.len() != expected {
        return Err(Error::InvalidPacket(format!(
            "capture frame is {} bytes, config implies {}",
            frame.len(),
            expected
        )));
    }

    let total = samples_per_chirp * chirps;
    let mut cube = AdcCube {
        lanes: LVDS_LANES,
        samples_per_chirp,
        chirps,
        i: vec![0; LVDS_LANES * total],
        q: vec![0; LVDS_LANES * total],
    };

    let word = |index: usize| i16::from_le_bytes([frame[index * 2], frame[index * 2 + 1]]);
    for k in 0..total {
        let chirp = k / samples_per_chirp;
        let sample = k % samples_per_chirp;
        for lane in 0..LVDS_LANES {
            let out = cube.index(lane, chirp, sample);
            cube.i[out] = word(k * 2 * LVDS_LANES + lane);
            cube.q[out] = word(k * 2 * LVDS_LANES + lane + LVDS_LANES);
        }
    }
    Ok(cube)
}

/// A dense 2D product derived from a cube
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    pub rows: usize,
    pub cols: usize,
    /// Row-major values
    pub values: Vec<f32>,
}

/// Seam for pluggable FFT/ML response computation over the raw cube
///
/// Implementations live outside this crate; the processor only routes
/// a cube in and heatmaps out. Returning `None` skips the product for
/// that frame.
pub trait ResponseProcessor: Send {
    fn range_azimuth(&mut self, cube: &AdcCube) -> Option<Heatmap>;
    fn range_doppler(&mut self, cube: &AdcCube) -> Option<Heatmap>;
}

/// Processor worker for the ethernet capture path
pub struct AdcProcessor {
    frames: Receiver<Vec<u8>>,
    listeners_config: ListenersConfig,
    listeners: ListenerSet,
    /// (samples per chirp, chirps per frame), set by LoadConfig
    dims: Option<(usize, usize)>,
    response: Option<Box<dyn ResponseProcessor>>,
    streaming_enabled: bool,
    verbose: bool,
    processed_frames: u64,
}

impl AdcProcessor {
    pub fn new(
        frames: Receiver<Vec<u8>>,
        listeners_config: ListenersConfig,
        verbose: bool,
    ) -> Self {
        AdcProcessor {
            frames,
            listeners_config,
            listeners: ListenerSet::disabled(),
            dims: None,
            response: None,
            streaming_enabled: false,
            verbose,
            processed_frames: 0,
        }
    }

    /// Attach a response computation backend
    pub fn with_response_processor(mut self, response: Box<dyn ResponseProcessor>) -> Self {
        self.response = Some(response);
        self
    }

    /// Worker entry point
    pub fn run(self, link: ControlLink) {
        crate::processor::run_processor(self, link);
    }

    fn load_config(&mut self, config: &RadarConfig, link: &ControlLink) {
        match (config.adc_samples(), config.chirps_per_frame()) {
            (Ok(samples), Ok(chirps)) => {
                self.dims = Some((samples as usize, chirps as usize));
            }
            (Err(e), _) | (_, Err(e)) => {
                link.report_error(format!("cannot size capture cube: {}", e));
            }
        }
    }

    fn configure_listeners(&mut self, link: &ControlLink) {
        let (listeners, errors) = ListenerSet::accept_all(
            &self.listeners_config,
            &[Product::AdcCube, Product::RangeAzimuth, Product::RangeDoppler],
        );
        // A consumer that fails the handshake loses only its own
        // product; the pipeline keeps running
        for error in errors {
            link.print(format!("listener disabled: {}", error));
        }
        link.print(format!("{} product consumers connected", listeners.len()));
        self.listeners = listeners;
    }
}

impl FrameSink for AdcProcessor {
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
                link.report_error("processor takes a parsed config, not a path");
            }
            Command::ConfigureListeners => self.configure_listeners(link),
            Command::StartStreaming => {
                if self.dims.is_none() {
                    link.report_error(Error::NotConfigured.to_string());
                } else if !self.streaming_enabled {
                    self.processed_frames = 0;
                    self.streaming_enabled = true;
                }
            }
            Command::StopStreaming => {
                if self.streaming_enabled {
                    self.streaming_enabled = false;
                    link.print(format!("{} capture frames processed", self.processed_frames));
                }
            }
            other => {
                link.report_error(format!("processor cannot handle {:?}", other.kind()));
            }
        }
        link.executed(kind);
        false
    }

    fn streaming(&self) -> bool {
        self.streaming_enabled
    }

    fn disable_streaming(&mut self) {
        self.streaming_enabled = false;
    }

    fn frames(&self) -> &Receiver<Vec<u8>> {
        &self.frames
    }

    fn process_frame(&mut self, frame: Vec<u8>, _link: &ControlLink) {
        let (samples, chirps) = match self.dims {
            Some(dims) => dims,
            None => return,
        };
        let cube = match deinterleave(&frame, samples, chirps) {
            Ok(cube) => cube,
            Err(e) => {
                log::debug!("dropped capture frame: {}", e);
                return;
            }
        };
        self.processed_frames += 1;
        if self.verbose {
            log::debug!(
                "capture frame {}: {} chirps x {} samples",
                self.processed_frames,
                cube.chirps,
                cube.samples_per_chirp
            );
        }

        self.listeners.send(Product::AdcCube, &cube);
        if let Some(response) = self.response.as_mut() {
            if self.listeners.is_active(Product::RangeAzimuth) {
                if let Some(heatmap) = response.range_azimuth(&cube) {
                    self.listeners.send(Product::RangeAzimuth, &heatmap);
                }
            }
            if self.listeners.is_active(Product::RangeDoppler) {
                if let Some(heatmap) = response.range_doppler(&cube) {
                    self.listeners.send(Product::RangeDoppler, &heatmap);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Status;
    use crate::worker::link_for_tests;
    use crossbeam_channel::unbounded;

    /// Interleave a synthetic stream the way the FPGA does
    fn interleaved_frame(samples: usize, chirps: usize) -> Vec<u8> {
        let mut frame = Vec::new();
        for k in 0..samples * chirps {
            let chirp = (k / samples) as i16;
            let sample = (k % samples) as i16;
            for lane in 0..LVDS_LANES as i16 {
                frame.extend_from_slice(&(lane * 10 + sample + chirp * 100).to_le_bytes());
            }
            for lane in 0..LVDS_LANES as i16 {
                frame.extend_from_slice(&(1000 + lane * 10 + sample + chirp * 100).to_le_bytes());
            }
        }
        frame
    }

    #[test]
    fn test_deinterleave_lane_order() {
        let cube = deinterleave(&interleaved_frame(2, 3), 2, 3).unwrap();
        assert_eq!(cube.lanes, 4);
        assert_eq!(cube.samples_per_chirp, 2);
        assert_eq!(cube.chirps, 3);
        for lane in 0..4i16 {
            for chirp in 0..3i16 {
                for sample in 0..2i16 {
                    let expected_i = lane * 10 + sample + chirp * 100;
                    let (i, q) = cube.sample(lane as usize, chirp as usize, sample as usize);
                    assert_eq!(i, expected_i);
                    assert_eq!(q, 1000 + expected_i);
                }
            }
        }
    }

    #[test]
    fn test_deinterleave_rejects_wrong_length() {
        assert!(deinterleave(&[0u8; 30], 2, 3).is_err());
    }

    #[test]
    fn test_start_refused_before_config() {
        let (_frame_tx, frame_rx) = unbounded();
        let listeners = crate::config::AppConfig::iwr1443_defaults().listeners;
        let mut processor = AdcProcessor::new(frame_rx, listeners, false);
        let (link, _commands, status) = link_for_tests();

        assert!(!processor.handle(Command::StartStreaming, &link));
        assert!(!processor.streaming());

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
    fn test_config_then_start_and_process() {
        let (_frame_tx, frame_rx) = unbounded();
        let listeners = crate::config::AppConfig::iwr1443_defaults().listeners;
        let mut processor = AdcProcessor::new(frame_rx, listeners, false);
        let (link, _commands, _status) = link_for_tests();

        let config = RadarConfig::from_cfg_str(
            "profileCfg 0 77 7 3 24 0 0 98 1 2 9142 0 0 30\nframeCfg 0 0 3 0 100 1 0\n",
        )
        .unwrap();
        processor.handle(
            Command::LoadConfig(ConfigUpdate::Radar {
                config,
                performance: crate::processor::pointcloud::tests::test_performance(),
            }),
            &link,
        );
        assert_eq!(processor.dims, Some((2, 3)));

        processor.handle(Command::StartStreaming, &link);
        assert!(processor.streaming());

        processor.process_frame(interleaved_frame(2, 3), &link);
        processor.process_frame(vec![0u8; 5], &link); // malformed, dropped
        assert_eq!(processor.processed_frames, 1);
    }
}
