//! Demo firmware TLV processor
//!
//! Decodes the frames produced by the TI demo firmware: walks the TLV
//! sections, turns detected points into a [`PointCloud`], and
//! publishes it. Section types without a decoder are skipped by
//! length, so firmware additions do not break the walk.

use crate::config::{ListenersConfig, RadarPerformance};
use crate::error::Error;
use crate::frame::{tlvs, FrameHeader, HeaderLayout, TlvTag};
use crate::listeners::{ListenerSet, Product};
use crate::message::{Command, ConfigUpdate};
use crate::processor::pointcloud::{decode_points_float, decode_points_q, PointCloud};
use crate::processor::FrameSink;
use crate::worker::ControlLink;
use crossbeam_channel::Receiver;

/// Processor worker for the serial demo-firmware path
pub struct DemoProcessor {
    frames: Receiver<Vec<u8>>,
    layout: HeaderLayout,
    listeners_config: ListenersConfig,
    listeners: ListenerSet,
    performance: Option<RadarPerformance>,
    streaming_enabled: bool,
    verbose: bool,
    processed_frames: u64,
}

impl DemoProcessor {
    pub fn new(
        frames: Receiver<Vec<u8>>,
        layout: HeaderLayout,
        listeners_config: ListenersConfig,
        verbose: bool,
    ) -> Self {
        DemoProcessor {
            frames,
            layout,
            listeners_config,
            listeners: ListenerSet::disabled(),
            performance: None,
            streaming_enabled: false,
            verbose,
            processed_frames: 0,
        }
    }

    fn configure_listeners(&mut self, link: &ControlLink) {
        let (listeners, errors) =
            ListenerSet::accept_all(&self.listeners_config, &[Product::PointCloud]);
        // A consumer that fails the handshake loses only its own
        // product; the pipeline keeps running
        for error in errors {
            link.print(format!("listener disabled: {}", error));
        }
        link.print(format!("{} product consumers connected", listeners.len()));
        self.listeners = listeners;
    }

    /// Worker entry point
    pub fn run(self, link: ControlLink) {
        crate::processor::run_processor(self, link);
    }

    fn decode_cloud(&self, frame: &[u8], header: &FrameHeader) -> PointCloud {
        let mut cloud = PointCloud {
            frame_number: header.frame_number,
            points: Vec::new(),
        };
        for section in tlvs(frame, header, self.layout) {
            let section = match section {
                Ok(section) => section,
                Err(e) => {
                    log::debug!("frame {}: {}", header.frame_number, e);
                    break;
                }
            };
            if section.tag != TlvTag::DetectedPoints {
                continue;
            }
            let decoded = match self.layout {
                HeaderLayout::Sdk2_1 => {
                    // Streaming is gated on LoadConfig, so the
                    // performance constants are present here
                    match self.performance.as_ref() {
                        Some(performance) => decode_points_q(section.payload, performance),
                        None => continue,
                    }
                }
                HeaderLayout::Sdk3_5 => decode_points_float(section.payload),
            };
            match decoded {
                Ok(points) => cloud.points = points,
                Err(e) => log::debug!("frame {}: bad detected points: {}", header.frame_number, e),
            }
        }
        cloud
    }
}

impl FrameSink for DemoProcessor {
    fn handle(&mut self, command: Command, link: &ControlLink) -> bool {
        let kind = command.kind();
        match command {
            Command::Exit => {
                link.executed(kind);
                return true;
            }
            Command::LoadConfig(ConfigUpdate::Radar { performance, .. }) => {
                self.performance = Some(performance);
            }
            Command::LoadConfig(ConfigUpdate::CliPath(_)) => {
                link.report_error("processor takes a parsed config, not a path");
            }
            Command::ConfigureListeners => self.configure_listeners(link),
            Command::StartStreaming => {
                if self.performance.is_none() {
                    link.report_error(Error::NotConfigured.to_string());
                } else if !self.streaming_enabled {
                    self.processed_frames = 0;
                    self.streaming_enabled = true;
                }
            }
            Command::StopStreaming => {
                if self.streaming_enabled {
                    self.streaming_enabled = false;
                    link.print(format!("{} frames processed", self.processed_frames));
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

    fn process_frame(&mut self, frame: Vec<u8>, link: &ControlLink) {
        let header = match FrameHeader::decode(&frame, self.layout) {
            Ok(header) => header,
            Err(e) => {
                log::debug!("dropped frame: {}", e);
                return;
            }
        };
        let cloud = self.decode_cloud(&frame, &header);
        self.processed_frames += 1;

        if self.verbose {
            link.clear_terminal();
            link.print(format!(
                "frame {}: {} points",
                cloud.frame_number,
                cloud.points.len()
            ));
        }
        self.listeners.send(Product::PointCloud, &cloud);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::build_packet;
    use crate::processor::pointcloud::tests::test_performance;
    use crate::worker::link_for_tests;
    use crossbeam_channel::unbounded;

    fn processor(layout: HeaderLayout) -> DemoProcessor {
        let (_frame_tx, frame_rx) = unbounded();
        let listeners = crate::config::AppConfig::iwr1443_defaults().listeners;
        DemoProcessor::new(frame_rx, layout, listeners, false)
    }

    #[test]
    fn test_start_refused_before_config() {
        let mut demo = processor(HeaderLayout::Sdk2_1);
        let (link, _commands, status) = link_for_tests();

        assert!(!demo.handle(Command::StartStreaming, &link));
        assert!(!demo.streaming());
        let mut saw_error = false;
        while let Ok(message) = status.try_recv() {
            if let crate::message::Status::Error(text) = message {
                assert!(text.contains("No radar configuration"));
                saw_error = true;
            }
        }
        assert!(saw_error);

        // After config the same command succeeds
        demo.handle(
            Command::LoadConfig(ConfigUpdate::Radar {
                config: crate::config::RadarConfig::default(),
                performance: test_performance(),
            }),
            &link,
        );
        demo.handle(Command::StartStreaming, &link);
        assert!(demo.streaming());
    }

    #[test]
    fn test_detected_points_decoded_from_frame() {
        let mut demo = processor(HeaderLayout::Sdk2_1);
        demo.performance = Some(test_performance());

        // range_idx 10, doppler 2, peak/xyz at q=9
        let points_payload = crate::processor::pointcloud::tests::q_payload(
            9,
            &[{
                let mut record = Vec::new();
                for value in [10i16, 2, 512, 512, 512, 0] {
                    record.extend_from_slice(&value.to_le_bytes());
                }
                record
            }],
        );
        let packet = build_packet(
            HeaderLayout::Sdk2_1,
            7,
            &[(99, vec![0; 8]), (1, points_payload)],
        );

        let header = FrameHeader::decode(&packet, HeaderLayout::Sdk2_1).unwrap();
        let cloud = demo.decode_cloud(&packet, &header);
        assert_eq!(cloud.frame_number, 7);
        assert_eq!(cloud.points.len(), 1);
        assert!((cloud.points[0].range - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rejected_consumer_leaves_pipeline_running() {
        use std::io::Write;

        let mut listeners = crate::config::AppConfig::iwr1443_defaults().listeners;
        listeners.enabled = true;
        listeners.point_cloud.port = 57412;

        let (_frame_tx, frame_rx) = unbounded();
        let worker = crate::worker::WorkerHandle::spawn("demo-processor", move |link| {
            link.send_init(true);
            DemoProcessor::new(frame_rx, HeaderLayout::Sdk2_1, listeners, false).run(link);
        })
        .unwrap();
        assert!(worker.wait_for_init(std::time::Duration::from_secs(1)));

        let client = std::thread::spawn(|| {
            for _ in 0..200 {
                if let Ok(mut stream) = std::net::TcpStream::connect(("127.0.0.1", 57412)) {
                    let key = b"not-the-authkey";
                    stream.write_all(&(key.len() as u32).to_be_bytes()).unwrap();
                    stream.write_all(key).unwrap();
                    return;
                }
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            panic!("listener never came up");
        });

        // The failed handshake must not surface as an Error status, so
        // the acknowledgement wait succeeds
        worker.send(Command::ConfigureListeners).unwrap();
        assert!(worker.wait_for_executed(
            crate::message::CommandKind::ConfigureListeners,
            std::time::Duration::from_secs(5),
        ));
        client.join().unwrap();

        worker.send(Command::Exit).unwrap();
        worker.join();
    }

    #[test]
    fn test_malformed_frame_dropped_not_fatal() {
        let mut demo = processor(HeaderLayout::Sdk2_1);
        demo.performance = Some(test_performance());
        demo.streaming_enabled = true;
        let (link, _commands, _status) = link_for_tests();

        demo.process_frame(vec![0u8; 12], &link);
        assert_eq!(demo.processed_frames, 0);
        assert!(demo.streaming());
    }

    #[test]
    fn test_float_frames_need_no_performance() {
        let demo = {
            let mut demo = processor(HeaderLayout::Sdk3_5);
            demo.performance = None;
            demo
        };
        let mut payload = Vec::new();
        for value in [3.0f32, 4.0, 0.0, 1.0] {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        let packet = build_packet(HeaderLayout::Sdk3_5, 3, &[(1, payload)]);
        let header = FrameHeader::decode(&packet, HeaderLayout::Sdk3_5).unwrap();
        let cloud = demo.decode_cloud(&packet, &header);
        assert_eq!(cloud.points.len(), 1);
        assert!((cloud.points[0].range - 5.0).abs() < 1e-6);
    }
}
