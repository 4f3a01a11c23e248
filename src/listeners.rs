//! External product listeners
//!
//! Processors publish decoded products (point clouds, ADC cubes,
//! heatmaps) to external consumers over localhost TCP. Each product
//! gets its own port. A consumer proves itself with a shared authkey
//! before any data flows, then receives length-prefixed MessagePack
//! messages: a 4-byte big-endian payload length followed by the
//! payload.

use crate::config::{ListenerEndpoint, ListenersConfig};
use crate::error::{Error, Result};
use serde::Serialize;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

/// An authenticating client must finish the handshake in this window
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest accepted authkey
const MAX_AUTHKEY_LEN: u32 = 64;

/// Data products published to external consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Product {
    PointCloud,
    AdcCube,
    RangeAzimuth,
    RangeDoppler,
}

impl Product {
    pub fn name(&self) -> &'static str {
        match self {
            Product::PointCloud => "point_cloud",
            Product::AdcCube => "adc_cube",
            Product::RangeAzimuth => "range_azimuth",
            Product::RangeDoppler => "range_doppler",
        }
    }

    fn endpoint<'a>(&self, config: &'a ListenersConfig) -> &'a ListenerEndpoint {
        match self {
            Product::PointCloud => &config.point_cloud,
            Product::AdcCube => &config.adc_cube,
            Product::RangeAzimuth => &config.range_azimuth,
            Product::RangeDoppler => &config.range_doppler,
        }
    }
}

/// A bound but not yet accepted product listener
pub struct BoundListener {
    product: Product,
    listener: TcpListener,
}

impl BoundListener {
    /// Bind the product's localhost port; consumers are expected on
    /// the same machine
    pub fn bind(product: Product, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        Ok(BoundListener { product, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Block until a consumer connects and authenticates
    ///
    /// Handshake: the client sends its authkey length-prefixed; on a
    /// match the listener answers with an `ok` message and the channel
    /// is live. A wrong key closes the connection with no reply.
    pub fn accept(self, authkey: &str) -> Result<ProductChannel> {
        let (stream, peer) = self.listener.accept()?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        stream.set_nodelay(true)?;

        let mut channel = ProductChannel {
            product: self.product,
            stream,
        };
        channel.authenticate(authkey, peer)?;
        channel.stream.set_read_timeout(None)?;
        log::info!("{} listener: client {} connected", self.product.name(), peer);
        Ok(channel)
    }
}

/// An authenticated consumer connection for one product
pub struct ProductChannel {
    product: Product,
    stream: TcpStream,
}

impl ProductChannel {
    fn authenticate(&mut self, authkey: &str, peer: SocketAddr) -> Result<()> {
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_AUTHKEY_LEN {
            return Err(Error::Authentication(format!(
                "{}: oversized authkey from {}",
                self.product.name(),
                peer
            )));
        }
        let mut key = vec![0u8; len as usize];
        self.stream.read_exact(&mut key)?;
        if key != authkey.as_bytes() {
            return Err(Error::Authentication(format!(
                "{}: bad authkey from {}",
                self.product.name(),
                peer
            )));
        }
        self.write_framed(b"ok")
    }

    fn write_framed(&mut self, payload: &[u8]) -> Result<()> {
        let mut framed = Vec::with_capacity(4 + payload.len());
        framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        framed.extend_from_slice(payload);
        self.stream.write_all(&framed)?;
        Ok(())
    }

    pub fn product(&self) -> Product {
        self.product
    }

    /// Send one product message, length-prefixed MessagePack
    pub fn send<T: Serialize>(&mut self, data: &T) -> Result<()> {
        let payload = rmp_serde::to_vec_named(data)?;
        self.write_framed(&payload)
    }
}

/// The set of live product channels owned by one processor
#[derive(Default)]
pub struct ListenerSet {
    channels: Vec<ProductChannel>,
}

impl ListenerSet {
    /// A set that publishes nothing
    pub fn disabled() -> Self {
        ListenerSet::default()
    }

    /// Accept consumers for every enabled product concurrently
    ///
    /// Each accept runs on its own thread so consumers may connect in
    /// any order. A product whose handshake fails is left disabled;
    /// its error is returned alongside the channels that did come up.
    pub fn accept_all(config: &ListenersConfig, products: &[Product]) -> (Self, Vec<String>) {
        let mut errors = Vec::new();
        if !config.enabled {
            return (ListenerSet::disabled(), errors);
        }

        let mut pending = Vec::new();
        for &product in products {
            let endpoint = product.endpoint(config);
            if !endpoint.enabled {
                continue;
            }
            match BoundListener::bind(product, endpoint.port) {
                Ok(bound) => {
                    let authkey = config.authkey.clone();
                    pending.push(std::thread::spawn(move || bound.accept(&authkey)));
                }
                Err(e) => errors.push(format!("{} listener: {}", product.name(), e)),
            }
        }

        let mut channels = Vec::new();
        for handle in pending {
            match handle.join() {
                Ok(Ok(channel)) => channels.push(channel),
                Ok(Err(e)) => errors.push(e.to_string()),
                Err(_) => errors.push("listener accept thread panicked".to_string()),
            }
        }
        (ListenerSet { channels }, errors)
    }

    /// Whether a consumer is connected for the product
    pub fn is_active(&self, product: Product) -> bool {
        self.channels.iter().any(|c| c.product == product)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Publish to the product's consumer, if any; a dead consumer is
    /// dropped from the set
    pub fn send<T: Serialize>(&mut self, product: Product, data: &T) {
        let mut failed = false;
        if let Some(channel) = self.channels.iter_mut().find(|c| c.product == product) {
            if let Err(e) = channel.send(data) {
                log::warn!("{} consumer dropped: {}", product.name(), e);
                failed = true;
            }
        }
        if failed {
            self.channels.retain(|c| c.product != product);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        frame: u32,
        values: Vec<f32>,
    }

    fn client_handshake(addr: SocketAddr, authkey: &str) -> TcpStream {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .write_all(&(authkey.len() as u32).to_be_bytes())
            .unwrap();
        stream.write_all(authkey.as_bytes()).unwrap();
        stream
    }

    fn read_framed(stream: &mut TcpStream) -> Vec<u8> {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut payload).unwrap();
        payload
    }

    #[test]
    fn test_handshake_and_message_roundtrip() {
        let bound = BoundListener::bind(Product::PointCloud, 0).unwrap();
        let addr = bound.local_addr().unwrap();

        let client = std::thread::spawn(move || {
            let mut stream = client_handshake(addr, "secret");
            assert_eq!(read_framed(&mut stream), b"ok");
            let payload = read_framed(&mut stream);
            rmp_serde::from_slice::<Sample>(&payload).unwrap()
        });

        let mut channel = bound.accept("secret").unwrap();
        channel
            .send(&Sample {
                frame: 42,
                values: vec![1.0, 2.5],
            })
            .unwrap();

        let received = client.join().unwrap();
        assert_eq!(
            received,
            Sample {
                frame: 42,
                values: vec![1.0, 2.5],
            }
        );
    }

    #[test]
    fn test_wrong_authkey_rejected() {
        let bound = BoundListener::bind(Product::AdcCube, 0).unwrap();
        let addr = bound.local_addr().unwrap();

        let client = std::thread::spawn(move || {
            let _stream = client_handshake(addr, "wrong");
            // Connection is closed without an ok message
        });

        match bound.accept("secret") {
            Err(Error::Authentication(message)) => assert!(message.contains("adc_cube")),
            other => panic!("expected auth failure, got {:?}", other.map(|_| ())),
        }
        client.join().unwrap();
    }

    #[test]
    fn test_disabled_config_accepts_nothing() {
        let mut config = crate::config::AppConfig::iwr1443_defaults().listeners;
        config.enabled = false;
        let (set, errors) = ListenerSet::accept_all(&config, &[Product::PointCloud]);
        assert!(set.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn test_send_to_inactive_product_is_noop() {
        let mut set = ListenerSet::disabled();
        assert!(!set.is_active(Product::RangeDoppler));
        // Must not panic or block
        set.send(
            Product::RangeDoppler,
            &Sample {
                frame: 1,
                values: vec![],
            },
        );
    }
}
