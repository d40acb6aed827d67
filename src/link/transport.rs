//! Blocking byte-stream transport and device-discovery seams.
//!
//! The retrieved example pack has no Bluetooth Classic/RFCOMM crate anywhere
//! in its dependency graph. On Linux, an RFCOMM channel bound with
//! `rfcomm bind` exposes itself as a `/dev/rfcommN` character device that is
//! byte-for-byte indistinguishable from a serial port, so `serialport` (the
//! pack's established choice for raw serial links) backs the production
//! [`Transport`] impl. The actual Bluetooth inquiry used to resolve a device
//! address is platform-specific and, like RFCOMM itself, outside this
//! crate's dependency budget — [`DeviceDiscovery`] is the seam a host
//! application plugs a real inquiry into.

use std::io;
use std::time::Duration;

/// A blocking, byte-oriented connection to the device. One implementation
/// backs production (`SerialTransport`); tests use an in-memory double.
pub trait Transport: Send {
    /// Write `bytes` to the wire.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Blocking read of up to `buf.len()` bytes.
    ///
    /// `Ok(0)` means the stream ended (the peer closed the connection) and
    /// the caller should treat this as a transport fault. A read timeout
    /// must be surfaced as `Err` with `ErrorKind::TimedOut` (or
    /// `WouldBlock`) so the link engine's loop can distinguish "no data
    /// arrived yet" from "the link is gone".
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens a [`Transport`] to a given device address/channel. Kept separate
/// from `Transport` itself so the link engine can retry connection attempts
/// without needing to reconstruct the whole trait object graph.
pub trait TransportFactory: Send + Sync {
    fn connect(&self, address: &str, port: u8, read_timeout: Duration) -> io::Result<Box<dyn Transport>>;
}

/// Discovers nearby Bluetooth peers as `(address, friendly_name)` pairs.
/// The link engine filters these for the `BH*BHT*` naming convention; the
/// actual over-the-air inquiry is left to the host application.
pub trait DeviceDiscovery: Send + Sync {
    fn discover(&self) -> io::Result<Vec<(String, String)>>;
}

/// Production transport: an RFCOMM channel already bound to a serial-like
/// device node (e.g. `/dev/rfcomm0`), opened and driven through the
/// `serialport` crate.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl Transport for SerialTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

/// Opens a [`SerialTransport`] against a path such as `/dev/rfcommN`.
///
/// `port` (the RFCOMM channel number) is informational here: binding the
/// channel to a device node is a host-level step (`rfcomm bind <addr>
/// <channel>`) performed before this crate ever sees the resulting path.
pub struct SerialTransportFactory;

impl TransportFactory for SerialTransportFactory {
    fn connect(&self, address: &str, _port: u8, read_timeout: Duration) -> io::Result<Box<dyn Transport>> {
        let port = serialport::new(address, 115_200)
            .timeout(read_timeout)
            .open()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(Box::new(SerialTransport { port }))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// An in-memory transport double. `inbound` is a queue of byte chunks
    /// returned one at a time by `recv`; when it runs dry, `recv` reports a
    /// read timeout (not EOF) so the engine loop keeps polling. Call
    /// `close()` to simulate the peer hanging up (`recv` then returns
    /// `Ok(0)`).
    #[derive(Clone, Default)]
    pub struct MockTransport {
        pub inbound: Arc<Mutex<VecDeque<Vec<u8>>>>,
        pub outbound: Arc<Mutex<Vec<Vec<u8>>>>,
        pub closed: Arc<Mutex<bool>>,
    }

    impl MockTransport {
        pub fn push_inbound(&self, bytes: Vec<u8>) {
            self.inbound.lock().unwrap().push_back(bytes);
        }

        pub fn close(&self) {
            *self.closed.lock().unwrap() = true;
        }

        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.outbound.lock().unwrap().clone()
        }
    }

    impl Transport for MockTransport {
        fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.outbound.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(chunk) = self.inbound.lock().unwrap().pop_front() {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                return Ok(n);
            }
            if *self.closed.lock().unwrap() {
                return Ok(0);
            }
            Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
        }
    }

    /// A [`TransportFactory`] that replays a fixed script of connection
    /// outcomes, one per call to `connect`: either a fresh `MockTransport`
    /// or a simulated connect failure. Once the script is exhausted, further
    /// connects fail — tests size the script to the number of (re)connect
    /// attempts they expect.
    pub struct ScriptedTransportFactory {
        script: Arc<Mutex<VecDeque<io::Result<MockTransport>>>>,
    }

    impl ScriptedTransportFactory {
        pub fn new(script: Vec<io::Result<MockTransport>>) -> Self {
            Self { script: Arc::new(Mutex::new(script.into())) }
        }
    }

    impl TransportFactory for ScriptedTransportFactory {
        fn connect(&self, _address: &str, _port: u8, _read_timeout: Duration) -> io::Result<Box<dyn Transport>> {
            let mut script = self.script.lock().unwrap();
            match script.pop_front() {
                Some(Ok(t)) => Ok(Box::new(t)),
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(io::ErrorKind::NotConnected, "connection script exhausted")),
            }
        }
    }

    /// A [`DeviceDiscovery`] fake returning a fixed set of peers.
    pub struct FakeDiscovery(pub Vec<(String, String)>);

    impl DeviceDiscovery for FakeDiscovery {
        fn discover(&self) -> io::Result<Vec<(String, String)>> {
            Ok(self.0.clone())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn mock_recv_is_timeout_when_empty_and_not_closed() {
            let mut t = MockTransport::default();
            let mut buf = [0u8; 8];
            let err = t.recv(&mut buf).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        }

        #[test]
        fn mock_recv_returns_zero_once_closed() {
            let mut t = MockTransport::default();
            t.close();
            let mut buf = [0u8; 8];
            assert_eq!(t.recv(&mut buf).unwrap(), 0);
        }

        #[test]
        fn mock_recv_drains_pushed_chunks_in_order() {
            let mut t = MockTransport::default();
            t.push_inbound(vec![1, 2, 3]);
            t.push_inbound(vec![4, 5]);
            let mut buf = [0u8; 8];
            assert_eq!(t.recv(&mut buf).unwrap(), 3);
            assert_eq!(&buf[..3], &[1, 2, 3]);
            assert_eq!(t.recv(&mut buf).unwrap(), 2);
            assert_eq!(&buf[..2], &[4, 5]);
        }

        #[test]
        fn scripted_factory_replays_failures_then_success() {
            let factory = ScriptedTransportFactory::new(vec![
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "nope")),
                Ok(MockTransport::default()),
            ]);
            assert!(factory.connect("addr", 1, Duration::from_millis(1)).is_err());
            assert!(factory.connect("addr", 1, Duration::from_millis(1)).is_ok());
            assert!(factory.connect("addr", 1, Duration::from_millis(1)).is_err());
        }

        #[test]
        fn fake_discovery_filters_by_caller() {
            let discovery = FakeDiscovery(vec![
                ("AA:BB".to_string(), "OtherDevice".to_string()),
                ("CC:DD".to_string(), "BH123BHT".to_string()),
            ]);
            let found = discovery
                .discover()
                .unwrap()
                .into_iter()
                .find(|(_, name)| name.starts_with("BH") && name.contains("BHT"));
            assert_eq!(found, Some(("CC:DD".to_string(), "BH123BHT".to_string())));
        }
    }
}
