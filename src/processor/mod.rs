//! Processor workers
//!
//! A processor drains the frame channel, decodes frames into typed
//! products, and publishes them to the external listeners. The demo
//! processor handles TLV frames from the serial path; the ADC
//! processor handles raw capture frames from the ethernet path.

mod adc;
mod demo;
pub mod pointcloud;

pub use adc::{deinterleave, AdcCube, AdcProcessor, Heatmap, ResponseProcessor};
pub use demo::DemoProcessor;
pub use pointcloud::{PointCloud, PointRecord};

use crate::message::Command;
use crate::worker::ControlLink;
use crossbeam_channel::Receiver;

/// Shared worker-loop contract for the processors
pub(crate) trait FrameSink {
    /// Handle one command; returns true when the worker should exit
    fn handle(&mut self, command: Command, link: &ControlLink) -> bool;
    fn streaming(&self) -> bool;
    fn disable_streaming(&mut self);
    fn frames(&self) -> &Receiver<Vec<u8>>;
    fn process_frame(&mut self, frame: Vec<u8>, link: &ControlLink);
}

/// Processor run loop
///
/// Idle: block on the command channel. Streaming: wait on commands and
/// frames together, then service every command that became ready
/// before touching the frame, and process at most one frame per wake
/// so a command is never starved by a fast stream.
pub(crate) fn run_processor<P: FrameSink>(mut processor: P, link: ControlLink) {
    let frames = processor.frames().clone();
    loop {
        if !processor.streaming() {
            match link.recv() {
                Ok(command) => {
                    if processor.handle(command, &link) {
                        return;
                    }
                }
                Err(_) => return,
            }
            continue;
        }

        let mut pending: Option<Vec<u8>> = None;
        crossbeam_channel::select! {
            recv(link.commands()) -> message => match message {
                Ok(command) => {
                    if processor.handle(command, &link) {
                        return;
                    }
                }
                Err(_) => return,
            },
            recv(frames) -> frame => match frame {
                Ok(frame) => pending = Some(frame),
                Err(_) => {
                    link.report_error("frame stream went away");
                    processor.disable_streaming();
                }
            },
        }

        loop {
            match link.try_recv() {
                Ok(Some(command)) => {
                    if processor.handle(command, &link) {
                        return;
                    }
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }

        if let Some(frame) = pending {
            if processor.streaming() {
                processor.process_frame(frame, &link);
            }
        }
    }
}
