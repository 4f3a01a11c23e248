//! Frame streamer workers
//!
//! A streamer turns its byte source into complete, validated frame
//! buffers on the processor channel: the serial streamer syncs on the
//! demo firmware's magic word, the ethernet streamer reassembles the
//! DCA1000's sequenced UDP packets.

mod ethernet;
mod serial;

pub use ethernet::{EthernetStreamer, FrameAssembler};
pub use serial::{SerialStreamer, DATA_BAUD};
