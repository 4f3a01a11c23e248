//! mmwave-io - acquisition and control daemon for TI mmWave radars
//!
//! Drives an IWR-series sensor over its CLI serial port and streams
//! radar data from either the sensor's data serial port (demo firmware
//! TLV frames) or a DCA1000 capture card over Ethernet (raw ADC
//! samples). Decoded products are published to external consumers over
//! localhost TCP as length-prefixed MessagePack.
//!
//! ## Architecture
//!
//! Each pipeline stage is a worker on its own thread, connected to the
//! orchestrator by command/status channels ([`worker`]) and to its
//! neighbors by data channels. Workers share nothing; all coordination
//! is message passing.
//!
//! ```text
//! serial:   CliController   SerialStreamer ──frames──> DemoProcessor
//! ethernet: CliController   Dca1000Handler ──packets──> EthernetStreamer ──frames──> AdcProcessor
//! ```

pub mod app;
pub mod config;
pub mod controller;
pub mod dca1000;
pub mod error;
pub mod frame;
pub mod listeners;
pub mod message;
pub mod processor;
pub mod streamer;
pub mod transport;
pub mod worker;

pub use config::AppConfig;
pub use error::{Error, Result};
