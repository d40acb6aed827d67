//! Device link: transport, reconnect engine, and RPC/streaming façade.

pub mod dispatch;
pub mod engine;
pub mod handler;
pub mod transport;

pub use dispatch::{BioHarnessLink, DeviceInfoSummary};
pub use engine::LinkEngine;
pub use handler::{Handler, StreamKind};
pub use transport::{DeviceDiscovery, SerialTransport, SerialTransportFactory, Transport, TransportFactory};
