//! Owns the transport and drives the reconnecting transmit/receive loop.
//!
//! The worker runs on a dedicated blocking thread ([`tokio::task::spawn_blocking`])
//! because the transport is a blocking socket, not an async one — the same
//! split the teacher uses for its own device I/O (`AntManager`'s router
//! thread, blocking FE-C calls) rather than forcing the transport itself to
//! be async.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::encoder::encode;
use crate::codec::framer::{FrameEvent, Framer};
use crate::codec::message::{Fin, Message, MessageId};
use crate::config::{LinkConfig, CHANNEL_CAPACITY, RECONNECT_BACKOFF_MS, RECV_CHUNK_SIZE};
use crate::error::LinkError;

use super::transport::{DeviceDiscovery, Transport, TransportFactory};

/// How long a single blocking `recv` call waits before giving the loop a
/// chance to check the lifesign timer and outbound queue. Short relative to
/// the minimum sane `lifesign_interval` so keepalives stay on schedule.
const SOCKET_READ_TIMEOUT: Duration = Duration::from_millis(250);

type OutboundFrame = Vec<u8>;

/// Drives the connection state machine described in spec.md §4.7:
/// `Disconnected -> Connected -> {Disconnected | Stopped}`. Construction
/// resolves the device address (explicit or via discovery) and spawns the
/// worker; [`LinkEngine::enqueue`] is the only way in, and the returned
/// `mpsc::Receiver<Message>` is the only way out.
pub struct LinkEngine {
    shutdown: Arc<AtomicBool>,
    outbound_tx: mpsc::Sender<OutboundFrame>,
    worker: Option<JoinHandle<()>>,
}

impl LinkEngine {
    /// Resolve the device address, then spawn the dedicated I/O worker.
    /// Returns the engine handle plus the channel of decoded messages the
    /// caller (the dispatch façade) should drain — the "bounded channel
    /// drained by the event loop" cross-plane mechanism spec.md §9 calls
    /// for.
    pub fn start(
        config: LinkConfig,
        factory: Arc<dyn TransportFactory>,
        discovery: Arc<dyn DeviceDiscovery>,
    ) -> Result<(Self, mpsc::Receiver<Message>), LinkError> {
        let address = resolve_address(&config, discovery.as_ref())?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let worker_shutdown = shutdown.clone();
        let worker = tokio::task::spawn_blocking(move || {
            run(address, config, factory, outbound_rx, inbound_tx, worker_shutdown);
        });

        Ok((Self { shutdown, outbound_tx, worker: Some(worker) }, inbound_rx))
    }

    /// Encode and enqueue a message for transmission. Backpressure comes
    /// from the bounded channel; callers are async so they simply await it.
    pub async fn enqueue(&self, msgid: MessageId, payload: &[u8], fin: Fin) -> Result<(), LinkError> {
        let bytes = encode(msgid, payload, fin)?;
        self.outbound_tx
            .send(bytes)
            .await
            .map_err(|_| LinkError::Transport(io::Error::new(io::ErrorKind::BrokenPipe, "link worker has stopped")))
    }

    /// Cooperative shutdown: flips the flag the worker checks at the top of
    /// every loop iteration, then waits for it to close the socket and exit.
    pub async fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

fn resolve_address(config: &LinkConfig, discovery: &dyn DeviceDiscovery) -> Result<String, LinkError> {
    if let Some(address) = &config.address {
        return Ok(address.clone());
    }
    info!("No device address configured; starting discovery...");
    let found = discovery
        .discover()
        .map_err(LinkError::Transport)?
        .into_iter()
        .find(|(_, name)| {
            name.starts_with(crate::config::DISCOVERY_NAME_PREFIX) && name.contains(crate::config::DISCOVERY_NAME_SUBSTRING)
        });
    match found {
        Some((address, name)) => {
            info!("Discovered device {name} ({address})");
            Ok(address)
        }
        None => {
            error!("Found no applicable BHT device in range. Make sure the device is on and in range.");
            Err(LinkError::NoDeviceFound)
        }
    }
}

/// Reconnect loop: `Disconnected -> Connected -> Disconnected | Stopped`.
fn run(
    address: String,
    config: LinkConfig,
    factory: Arc<dyn TransportFactory>,
    mut outbound_rx: mpsc::Receiver<OutboundFrame>,
    inbound_tx: mpsc::Sender<Message>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        info!("Connecting to device {address}...");
        let mut transport = match factory.connect(&address, config.port, SOCKET_READ_TIMEOUT) {
            Ok(t) => t,
            Err(e) => {
                warn!("Connection attempt failed: {e}");
                if config.reconnect {
                    std::thread::sleep(Duration::from_millis(RECONNECT_BACKOFF_MS));
                    continue;
                } else {
                    error!("Connection attempt failed, stopping (reconnect disabled).");
                    return;
                }
            }
        };
        info!("Connected; now transferring...");
        let outcome = transmit_receive_loop(transport.as_mut(), &config, &mut outbound_rx, &inbound_tx, &shutdown);
        info!("Transmission stopped; closing socket.");
        drop(transport);
        match outcome {
            Ok(()) => return, // shutdown flag was set
            Err(e) => {
                warn!("Transport error: {e}");
                if !config.reconnect {
                    error!("Reconnect disabled, stopping.");
                    return;
                }
            }
        }
    }
}

/// One connected session: sends lifesigns, drains the outbound queue, feeds
/// received bytes through the framer, and forwards decoded messages.
/// Returns `Ok(())` on a cooperative shutdown, `Err` on any transport fault.
fn transmit_receive_loop(
    transport: &mut dyn Transport,
    config: &LinkConfig,
    outbound_rx: &mut mpsc::Receiver<OutboundFrame>,
    inbound_tx: &mpsc::Sender<Message>,
    shutdown: &AtomicBool,
) -> Result<(), LinkError> {
    let mut framer = Framer::new();
    // Force an immediate lifesign on connect, matching the source's initial
    // `last_lifesign_sent_at = 0`, but reset to `now` afterwards rather than
    // back to a sentinel — see spec.md §9's lifesign-reset open question.
    let mut last_lifesign = Instant::now() - config.lifesign_interval;
    let mut buf = [0u8; RECV_CHUNK_SIZE];

    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now.duration_since(last_lifesign) >= config.lifesign_interval {
            debug!("Sending life sign...");
            match encode(MessageId::Lifesign, &[], Fin::Etx) {
                Ok(bytes) => transport.send(&bytes)?,
                Err(e) => warn!("Failed to encode lifesign: {e}"),
            }
            last_lifesign = now;
        }

        while let Ok(frame) = outbound_rx.try_recv() {
            transport.send(&frame)?;
        }

        match transport.recv(&mut buf) {
            Ok(0) => return Err(LinkError::Transport(io::Error::new(io::ErrorKind::UnexpectedEof, "stream ended"))),
            Ok(n) => {
                framer.feed(&buf[..n]);
                for event in framer.drain() {
                    match event {
                        FrameEvent::Message(msg) => {
                            if inbound_tx.blocking_send(msg).is_err() {
                                // dispatcher side is gone; nothing left to serve.
                                return Ok(());
                            }
                        }
                        FrameEvent::Dropped(reason) => warn!("Dropped frame: {reason}"),
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
                // no data within the read window; loop to recheck timers/queue
            }
            Err(e) => return Err(LinkError::Transport(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::transport::mock::{FakeDiscovery, MockTransport, ScriptedTransportFactory};
    use super::*;
    use crate::codec::encoder::encode;

    fn config() -> LinkConfig {
        LinkConfig {
            address: Some("mock://device".to_string()),
            port: 1,
            lifesign_interval: Duration::from_millis(20),
            reconnect: true,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn forwards_a_decoded_message_and_sends_lifesigns() {
        let transport = MockTransport::default();
        let lifesign_bytes = encode(MessageId::Lifesign, &[], Fin::Etx).unwrap();
        transport.push_inbound(lifesign_bytes);
        let factory = Arc::new(ScriptedTransportFactory::new(vec![Ok(transport.clone())]));
        let discovery = Arc::new(FakeDiscovery(vec![]));

        let (mut engine, mut inbound) = LinkEngine::start(config(), factory, discovery).unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), inbound.recv()).await.unwrap().unwrap();
        assert_eq!(msg.frame.msgid, MessageId::Lifesign);

        // give the worker a couple of ticks to emit its own lifesign
        tokio::time::sleep(Duration::from_millis(60)).await;
        engine.shutdown().await;
        assert!(transport.sent().iter().any(|f| f == &encode(MessageId::Lifesign, &[], Fin::Etx).unwrap()));
    }

    #[tokio::test]
    async fn enqueued_commands_are_sent_on_the_wire() {
        let transport = MockTransport::default();
        let factory = Arc::new(ScriptedTransportFactory::new(vec![Ok(transport.clone())]));
        let discovery = Arc::new(FakeDiscovery(vec![]));
        let (mut engine, _inbound) = LinkEngine::start(config(), factory, discovery).unwrap();

        engine.enqueue(MessageId::GetSerialNumber, &[], Fin::Etx).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        engine.shutdown().await;

        let expected = encode(MessageId::GetSerialNumber, &[], Fin::Etx).unwrap();
        assert!(transport.sent().contains(&expected));
    }

    #[tokio::test]
    async fn reconnects_after_a_transport_fault() {
        let first = MockTransport::default();
        first.close(); // immediately reports EOF -> transport fault
        let second = MockTransport::default();
        let lifesign_bytes = encode(MessageId::Lifesign, &[], Fin::Etx).unwrap();
        second.push_inbound(lifesign_bytes);

        let factory = Arc::new(ScriptedTransportFactory::new(vec![Ok(first), Ok(second.clone())]));
        let discovery = Arc::new(FakeDiscovery(vec![]));
        let mut cfg = config();
        cfg.lifesign_interval = Duration::from_millis(10);
        let (mut engine, mut inbound) = LinkEngine::start(cfg, factory, discovery).unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), inbound.recv()).await.unwrap().unwrap();
        assert_eq!(msg.frame.msgid, MessageId::Lifesign);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn no_reconnect_when_disabled_stops_after_first_fault() {
        let first = MockTransport::default();
        first.close();
        let factory = Arc::new(ScriptedTransportFactory::new(vec![Ok(first)]));
        let discovery = Arc::new(FakeDiscovery(vec![]));
        let mut cfg = config();
        cfg.reconnect = false;
        let (engine, mut inbound) = LinkEngine::start(cfg, factory, discovery).unwrap();

        // channel closes once the worker exits without reconnecting
        assert!(inbound.recv().await.is_none());
        drop(engine);
    }

    #[tokio::test]
    async fn discovery_failure_is_fatal() {
        let factory = Arc::new(ScriptedTransportFactory::new(vec![]));
        let discovery = Arc::new(FakeDiscovery(vec![("AA".to_string(), "NotAMatch".to_string())]));
        let err = LinkEngine::start(config_with_no_address(), factory, discovery).unwrap_err();
        assert!(matches!(err, LinkError::NoDeviceFound));
    }

    fn config_with_no_address() -> LinkConfig {
        let mut c = config();
        c.address = None;
        c
    }

    #[tokio::test]
    async fn discovery_picks_first_bh_bht_match() {
        let transport = MockTransport::default();
        let factory = Arc::new(ScriptedTransportFactory::new(vec![Ok(transport)]));
        let discovery = Arc::new(FakeDiscovery(vec![
            ("00:00".to_string(), "SomeOtherDevice".to_string()),
            ("11:11".to_string(), "BH001BHT".to_string()),
        ]));
        let (mut engine, _inbound) = LinkEngine::start(config_with_no_address(), factory, discovery).unwrap();
        engine.shutdown().await;
    }
}
