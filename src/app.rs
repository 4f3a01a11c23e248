//! Daemon orchestration
//!
//! Spawns the worker pipeline for the configured frame source, drives
//! the gated bring-up sequence (config replay, listener accept, stream
//! start, sensor start), pumps worker status while running, and tears
//! everything down in reverse order on exit.

use crate::config::{AppConfig, FrameSource, RadarConfig};
use crate::controller::{CliController, CLI_BAUD};
use crate::dca1000::Dca1000Handler;
use crate::error::{Error, Result};
use crate::frame::HeaderLayout;
use crate::message::{Command, CommandKind, ConfigUpdate};
use crate::processor::{AdcProcessor, DemoProcessor};
use crate::streamer::{EthernetStreamer, SerialStreamer, DATA_BAUD};
use crate::transport::SerialTransport;
use crate::worker::WorkerHandle;
use crossbeam_channel::bounded;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Serial receive timeout; reads poll at this granularity
const PORT_TIMEOUT: Duration = Duration::from_millis(10);

/// Frames buffered between streamer and processor
const FRAME_QUEUE_DEPTH: usize = 64;
/// Capture packets buffered between handler and streamer
const PAYLOAD_QUEUE_DEPTH: usize = 256;

const INIT_TIMEOUT: Duration = Duration::from_secs(10);
const EXECUTE_TIMEOUT: Duration = Duration::from_secs(10);
/// External consumers connect at their own pace
const LISTENER_ACCEPT_TIMEOUT: Duration = Duration::from_secs(600);
const STATUS_POLL: Duration = Duration::from_millis(10);

/// The worker set for one frame source
struct Pipeline {
    controller: WorkerHandle,
    streamer: WorkerHandle,
    processor: WorkerHandle,
    /// Present only on the ethernet path
    handler: Option<WorkerHandle>,
}

impl Pipeline {
    fn all(&self) -> Vec<&WorkerHandle> {
        let mut workers = vec![&self.controller, &self.streamer, &self.processor];
        if let Some(handler) = &self.handler {
            workers.push(handler);
        }
        workers
    }
}

/// Run the daemon until the configured duration elapses, a worker
/// fails, or a shutdown signal arrives
pub fn run(config: AppConfig) -> Result<()> {
    let layout = HeaderLayout::from_sdk_version(&config.radar.sdk_version)?;
    let radar_config = RadarConfig::from_cfg_file(&config.radar.config_path)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&shutdown))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&shutdown))?;

    let pipeline = spawn_pipeline(&config, layout)?;
    let result = drive(&pipeline, &config, radar_config, &shutdown);

    stop_pipeline(&pipeline);
    join_pipeline(pipeline);
    result
}

fn spawn_pipeline(config: &AppConfig, layout: HeaderLayout) -> Result<Pipeline> {
    let verbose = config.streamer.verbose;
    let (frame_tx, frame_rx) = bounded::<Vec<u8>>(FRAME_QUEUE_DEPTH);

    let cli_port = config.hardware.cli_port.clone();
    let controller = WorkerHandle::spawn("cli-controller", move |link| {
        match SerialTransport::open(&cli_port, CLI_BAUD, PORT_TIMEOUT) {
            Ok(transport) => {
                link.send_init(true);
                CliController::new(transport, verbose).run(link);
            }
            Err(e) => {
                link.print(format!("cannot open CLI port {}: {}", cli_port, e));
                link.send_init(false);
            }
        }
    })?;

    let listeners_config = config.listeners.clone();
    match config.streamer.source {
        FrameSource::Serial => {
            let data_port = config.hardware.data_port.clone();
            let streamer = WorkerHandle::spawn("serial-streamer", move |link| {
                match SerialTransport::open(&data_port, DATA_BAUD, PORT_TIMEOUT) {
                    Ok(transport) => {
                        link.send_init(true);
                        SerialStreamer::new(transport, layout, frame_tx, verbose).run(link);
                    }
                    Err(e) => {
                        link.print(format!("cannot open data port {}: {}", data_port, e));
                        link.send_init(false);
                    }
                }
            })?;
            let processor = WorkerHandle::spawn("demo-processor", move |link| {
                link.send_init(true);
                DemoProcessor::new(frame_rx, layout, listeners_config, verbose).run(link);
            })?;
            Ok(Pipeline {
                controller,
                streamer,
                processor,
                handler: None,
            })
        }
        FrameSource::Ethernet => {
            let (payload_tx, payload_rx) = bounded::<Vec<u8>>(PAYLOAD_QUEUE_DEPTH);
            let settings = config.dca1000.clone();
            let handler = WorkerHandle::spawn("dca1000-handler", move |link| {
                match Dca1000Handler::connect(&settings, payload_tx) {
                    Ok(handler) => {
                        link.send_init(true);
                        handler.run(link);
                    }
                    Err(e) => {
                        link.print(format!("DCA1000 bring-up failed: {}", e));
                        link.send_init(false);
                    }
                }
            })?;
            let streamer = WorkerHandle::spawn("ethernet-streamer", move |link| {
                link.send_init(true);
                EthernetStreamer::new(payload_rx, frame_tx, verbose).run(link);
            })?;
            let processor = WorkerHandle::spawn("adc-processor", move |link| {
                link.send_init(true);
                AdcProcessor::new(frame_rx, listeners_config, verbose).run(link);
            })?;
            Ok(Pipeline {
                controller,
                streamer,
                processor,
                handler: Some(handler),
            })
        }
    }
}

/// Bring-up and main status pump; the caller tears down afterwards
fn drive(
    pipeline: &Pipeline,
    config: &AppConfig,
    radar_config: RadarConfig,
    shutdown: &AtomicBool,
) -> Result<()> {
    for worker in pipeline.all() {
        if !worker.wait_for_init(INIT_TIMEOUT) {
            return Err(Error::InitializationFailed(format!(
                "{} failed to start",
                worker.name()
            )));
        }
    }
    log::info!("all workers initialized");

    // Configuration fan-out
    pipeline
        .controller
        .send(Command::LoadConfig(ConfigUpdate::CliPath(
            config.radar.config_path.clone().into(),
        )))?;
    let update = ConfigUpdate::Radar {
        config: radar_config,
        performance: config.performance,
    };
    pipeline.streamer.send(Command::LoadConfig(update.clone()))?;
    pipeline.processor.send(Command::LoadConfig(update))?;
    for worker in [&pipeline.controller, &pipeline.streamer, &pipeline.processor] {
        if !worker.wait_for_executed(CommandKind::LoadConfig, EXECUTE_TIMEOUT) {
            return Err(Error::Other(format!(
                "{} rejected the configuration",
                worker.name()
            )));
        }
    }

    pipeline.controller.send(Command::SendConfig)?;
    if !pipeline
        .controller
        .wait_for_executed(CommandKind::SendConfig, EXECUTE_TIMEOUT)
    {
        return Err(Error::Other("sensor configuration failed".to_string()));
    }

    if config.listeners.enabled {
        log::info!("waiting for product consumers to connect...");
        pipeline.processor.send(Command::ConfigureListeners)?;
        if !pipeline
            .processor
            .wait_for_executed(CommandKind::ConfigureListeners, LISTENER_ACCEPT_TIMEOUT)
        {
            return Err(Error::Other("listener setup failed".to_string()));
        }
    }

    // Data path first, sensor last, so no frame is ever unobserved
    if let Some(handler) = &pipeline.handler {
        handler.send(Command::StartStreaming)?;
    }
    pipeline.streamer.send(Command::StartStreaming)?;
    pipeline.processor.send(Command::StartStreaming)?;
    pipeline.controller.send(Command::StartSensor)?;

    let deadline = if config.runtime.duration_secs > 0 {
        Some(Instant::now() + Duration::from_secs(config.runtime.duration_secs))
    } else {
        None
    };
    log::info!("radar running");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            log::info!("shutdown signal received");
            return Ok(());
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                log::info!("run duration elapsed");
                return Ok(());
            }
        }
        for worker in pipeline.all() {
            let summary = worker.drain_status();
            if summary.errors > 0 {
                return Err(Error::Other(format!(
                    "{} reported an error",
                    worker.name()
                )));
            }
            if summary.disconnected {
                return Err(Error::Other(format!(
                    "{} exited unexpectedly",
                    worker.name()
                )));
            }
        }
        std::thread::sleep(STATUS_POLL);
    }
}

/// Reverse-order teardown: sensor off, streams off, workers out.
/// Failed sends just mean the worker is already gone.
fn stop_pipeline(pipeline: &Pipeline) {
    if pipeline.controller.send(Command::StopSensor).is_ok() {
        pipeline
            .controller
            .wait_for_executed(CommandKind::StopSensor, EXECUTE_TIMEOUT);
    }
    if let Some(handler) = &pipeline.handler {
        let _ = handler.send(Command::StopStreaming);
    }
    let _ = pipeline.streamer.send(Command::StopStreaming);
    let _ = pipeline.processor.send(Command::StopStreaming);
    for worker in pipeline.all() {
        let _ = worker.send(Command::Exit);
    }
}

fn join_pipeline(pipeline: Pipeline) {
    let Pipeline {
        controller,
        streamer,
        processor,
        handler,
    } = pipeline;
    for worker in [Some(controller), Some(streamer), Some(processor), handler]
        .into_iter()
        .flatten()
    {
        worker.drain_status();
        worker.join();
    }
    log::info!("all workers stopped");
}
