//! RPC and streaming façade on top of [`LinkEngine`].
//!
//! Mirrors `core/interface.py`'s `BioHarness`: a per-message-id FIFO of
//! pending replies for request/response calls, plus a handler table for
//! periodic streams. `dispatch_task` is the "event loop" the original
//! dispatches onto via `loop.call_soon_threadsafe`; here that's a `tokio`
//! task reading the engine's inbound channel, with `tokio::spawn` used to
//! post each handler invocation rather than call it inline.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::codec::message::{Fin, Message, MessageId, PERIODIC_MESSAGES};
use crate::config::LinkConfig;
use crate::error::LinkError;

use super::engine::LinkEngine;
use super::handler::{Handler, StreamKind};
use super::transport::{DeviceDiscovery, TransportFactory};

type PendingFifo = HashMap<MessageId, VecDeque<oneshot::Sender<Message>>>;
type HandlerTable = HashMap<MessageId, Arc<dyn Handler>>;

/// Typed summary for [`BioHarnessLink::get_infos`], mirroring the field set
/// the original gathers via `asyncio.gather` in `get_infos()`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceInfoSummary {
    pub serial_number: String,
    pub boot_software_version: Vec<u8>,
    pub application_software_version: Vec<u8>,
    pub hardware_part_number: String,
    pub bootloader_part_number: String,
    pub application_part_number: String,
    pub unit_mac_address: String,
    pub bluetooth_friendly_name: String,
    pub network_id: String,
}

/// A live connection to the device: enqueue commands, await replies, and
/// subscribe to periodic streams.
pub struct BioHarnessLink {
    engine: LinkEngine,
    pending: Arc<Mutex<PendingFifo>>,
    handlers: Arc<RwLock<HandlerTable>>,
    timeout: std::time::Duration,
    dispatcher: Option<JoinHandle<()>>,
}

impl BioHarnessLink {
    /// Start the link engine and the dispatch task that drains its inbound
    /// channel.
    pub fn start(
        config: LinkConfig,
        factory: Arc<dyn TransportFactory>,
        discovery: Arc<dyn DeviceDiscovery>,
    ) -> Result<Self, LinkError> {
        let timeout = config.timeout;
        let (engine, inbound) = LinkEngine::start(config, factory, discovery)?;
        let pending: Arc<Mutex<PendingFifo>> = Arc::new(Mutex::new(HashMap::new()));
        let handlers: Arc<RwLock<HandlerTable>> = Arc::new(RwLock::new(HashMap::new()));

        let dispatcher = tokio::spawn(dispatch_loop(inbound, pending.clone(), handlers.clone()));

        Ok(Self { engine, pending, handlers, timeout, dispatcher: Some(dispatcher) })
    }

    pub async fn shutdown(&mut self) {
        self.engine.shutdown().await;
        if let Some(d) = self.dispatcher.take() {
            let _ = d.await;
        }
    }

    /// Send `msgid`/`payload` and await its reply, honoring the per-id FIFO
    /// ordering the device replies in. Times out after the configured
    /// RPC deadline.
    pub async fn call(&self, msgid: MessageId, payload: &[u8]) -> Result<Message, LinkError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.entry(msgid).or_default().push_back(tx);
        }
        self.engine.enqueue(msgid, payload, Fin::Etx).await?;

        let msg = tokio::time::timeout(self.timeout, rx)
            .await
            .map_err(|_| LinkError::Timeout { msgid })?
            .map_err(|_| LinkError::Timeout { msgid })?;
        msg.frame.ensure_fin_ok()?;
        Ok(msg)
    }

    // --- queries, grounded on BioHarness's Get* methods in core/interface.py ---

    pub async fn get_serial_number(&self) -> Result<String, LinkError> {
        Ok(self.call(MessageId::GetSerialNumber, &[]).await?.frame.payload_str())
    }

    pub async fn get_boot_software_version(&self) -> Result<Vec<u8>, LinkError> {
        Ok(self.call(MessageId::GetBootSoftwareVersion, &[]).await?.frame.payload)
    }

    pub async fn get_application_software_version(&self) -> Result<Vec<u8>, LinkError> {
        Ok(self.call(MessageId::GetApplicationSoftwareVersion, &[]).await?.frame.payload)
    }

    pub async fn get_hardware_part_number(&self) -> Result<String, LinkError> {
        Ok(self.call(MessageId::GetHardwarePartNumber, &[]).await?.frame.payload_str())
    }

    pub async fn get_bootloader_part_number(&self) -> Result<String, LinkError> {
        Ok(self.call(MessageId::GetBootloaderPartNumber, &[]).await?.frame.payload_str())
    }

    pub async fn get_application_part_number(&self) -> Result<String, LinkError> {
        Ok(self.call(MessageId::GetApplicationPartNumber, &[]).await?.frame.payload_str())
    }

    pub async fn get_unit_mac_address(&self) -> Result<String, LinkError> {
        Ok(self.call(MessageId::GetUnitMacAddress, &[]).await?.frame.payload_str())
    }

    pub async fn get_bluetooth_friendly_name(&self) -> Result<String, LinkError> {
        Ok(self.call(MessageId::GetUnitBluetoothFriendlyName, &[]).await?.frame.payload_str())
    }

    pub async fn get_network_id(&self) -> Result<String, LinkError> {
        Ok(self.call(MessageId::GetNetworkId, &[]).await?.frame.payload_str())
    }

    /// Gathers every device-identity query concurrently, mirroring
    /// `get_infos()`'s `asyncio.gather` over the same nine coroutines.
    pub async fn get_infos(&self) -> Result<DeviceInfoSummary, LinkError> {
        let (
            serial_number,
            boot_software_version,
            application_software_version,
            hardware_part_number,
            bootloader_part_number,
            application_part_number,
            unit_mac_address,
            bluetooth_friendly_name,
            network_id,
        ) = tokio::try_join!(
            self.get_serial_number(),
            self.get_boot_software_version(),
            self.get_application_software_version(),
            self.get_hardware_part_number(),
            self.get_bootloader_part_number(),
            self.get_application_part_number(),
            self.get_unit_mac_address(),
            self.get_bluetooth_friendly_name(),
            self.get_network_id(),
        )?;
        Ok(DeviceInfoSummary {
            serial_number,
            boot_software_version,
            application_software_version,
            hardware_part_number,
            bootloader_part_number,
            application_part_number,
            unit_mac_address,
            bluetooth_friendly_name,
            network_id,
        })
    }

    // --- stream toggles, grounded on toggle_general/accel/... in core/interface.py ---

    /// Enable or disable a periodic stream. `handler = None` disables it
    /// (`payload_off = [0]`); `Some(handler)` enables it (`payload_on =
    /// [1]`) and registers the handler.
    async fn toggle_handler(&self, kind: StreamKind, handler: Option<Arc<dyn Handler>>) -> Result<(), LinkError> {
        let data_id = kind.data_msgid();
        if let Some(toggle_id) = kind.toggle_msgid() {
            let payload: [u8; 1] = if handler.is_some() { [1] } else { [0] };
            self.call(toggle_id, &payload).await?;
        }
        let mut table = self.handlers.write().await;
        match &handler {
            Some(h) => {
                table.insert(data_id, h.clone());
            }
            None => {
                table.remove(&data_id);
            }
        }
        Ok(())
    }

    pub async fn toggle_general(&self, handler: Option<Arc<dyn Handler>>) -> Result<(), LinkError> {
        self.toggle_handler(StreamKind::General, handler).await
    }

    pub async fn toggle_breathing(&self, handler: Option<Arc<dyn Handler>>) -> Result<(), LinkError> {
        self.toggle_handler(StreamKind::Breathing, handler).await
    }

    pub async fn toggle_ecg(&self, handler: Option<Arc<dyn Handler>>) -> Result<(), LinkError> {
        self.toggle_handler(StreamKind::Ecg, handler).await
    }

    pub async fn toggle_rtor(&self, handler: Option<Arc<dyn Handler>>) -> Result<(), LinkError> {
        self.toggle_handler(StreamKind::RtoR, handler).await
    }

    pub async fn toggle_accelerometer(&self, handler: Option<Arc<dyn Handler>>) -> Result<(), LinkError> {
        self.toggle_handler(StreamKind::Accelerometer, handler).await
    }

    pub async fn toggle_accelerometer_100mg(&self, handler: Option<Arc<dyn Handler>>) -> Result<(), LinkError> {
        self.toggle_handler(StreamKind::Accelerometer100Mg, handler).await
    }

    /// Like the other toggles but with a configurable update interval
    /// (`payload_on = [interval_secs, 0]`), matching `toggle_summary(handler,
    /// ival=1)`.
    pub async fn toggle_summary(&self, handler: Option<Arc<dyn Handler>>, interval_secs: u8) -> Result<(), LinkError> {
        let data_id = StreamKind::Summary.data_msgid();
        let payload: [u8; 2] = if handler.is_some() { [interval_secs, 0] } else { [0, 0] };
        self.call(MessageId::SetSummaryDataPacketUpdateRate, &payload).await?;
        let mut table = self.handlers.write().await;
        match &handler {
            Some(h) => {
                table.insert(data_id, h.clone());
            }
            None => {
                table.remove(&data_id);
            }
        }
        Ok(())
    }

    /// Event packets are unconditional on the wire; this only registers (or
    /// clears) the handler, matching `toggle_events` making no `_call`.
    pub async fn toggle_events(&self, handler: Option<Arc<dyn Handler>>) -> Result<(), LinkError> {
        self.toggle_handler(StreamKind::Events, handler).await
    }
}

/// Drains the engine's inbound channel: periodic messages (those in
/// [`PERIODIC_MESSAGES`]) go to their registered handler if any, everything
/// else completes the oldest pending reply for that message id.
async fn dispatch_loop(mut inbound: mpsc::Receiver<Message>, pending: Arc<Mutex<PendingFifo>>, handlers: Arc<RwLock<HandlerTable>>) {
    while let Some(msg) = inbound.recv().await {
        if msg.frame.msgid == MessageId::Lifesign {
            continue;
        }
        if PERIODIC_MESSAGES.contains(&msg.frame.msgid) {
            let handler = handlers.read().await.get(&msg.frame.msgid).cloned();
            match handler {
                Some(h) => {
                    tokio::spawn(async move { h.handle(msg) });
                }
                None => debug!("No handler registered for periodic message {:?}", msg.frame.msgid),
            }
            continue;
        }
        let waiter = {
            let mut pending = pending.lock().await;
            pending.get_mut(&msg.frame.msgid).and_then(|q| q.pop_front())
        };
        match waiter {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            None => warn!("Received unsolicited reply for {:?}", msg.frame.msgid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encoder::encode;
    use crate::link::transport::mock::{FakeDiscovery, MockTransport, ScriptedTransportFactory};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn config() -> LinkConfig {
        LinkConfig {
            address: Some("mock://device".to_string()),
            port: 1,
            lifesign_interval: Duration::from_secs(5),
            reconnect: false,
            timeout: Duration::from_millis(500),
        }
    }

    async fn start(transport: MockTransport) -> BioHarnessLink {
        let factory = Arc::new(ScriptedTransportFactory::new(vec![Ok(transport)]));
        let discovery = Arc::new(FakeDiscovery(vec![]));
        BioHarnessLink::start(config(), factory, discovery).unwrap()
    }

    #[tokio::test]
    async fn get_serial_number_round_trips_through_the_mock_transport() {
        let transport = MockTransport::default();
        let mut link = start(transport.clone()).await;

        // reply arrives asynchronously once call() has enqueued the request
        let reply_transport = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            reply_transport.push_inbound(encode(MessageId::GetSerialNumber, b"SN12345\0", Fin::Ack).unwrap());
        });

        let serial = link.get_serial_number().await.unwrap();
        assert_eq!(serial, "SN12345");
        link.shutdown().await;
    }

    #[tokio::test]
    async fn call_times_out_when_no_reply_arrives() {
        let transport = MockTransport::default();
        let mut link = start(transport).await;
        let err = link.call(MessageId::GetSerialNumber, &[]).await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout { msgid: MessageId::GetSerialNumber }));
        link.shutdown().await;
    }

    #[tokio::test]
    async fn nak_reply_surfaces_as_protocol_error() {
        let transport = MockTransport::default();
        let reply_transport = transport.clone();
        let mut link = start(transport).await;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            reply_transport.push_inbound(encode(MessageId::GetSerialNumber, &[], Fin::Nak).unwrap());
        });
        let err = link.call(MessageId::GetSerialNumber, &[]).await.unwrap_err();
        assert!(matches!(err, LinkError::Protocol { msgid: MessageId::GetSerialNumber }));
        link.shutdown().await;
    }

    #[tokio::test]
    async fn periodic_messages_reach_the_registered_handler() {
        let transport = MockTransport::default();
        let reply_transport = transport.clone();
        let mut link = start(transport).await;

        // ack the toggle call itself, concurrently with awaiting it below
        let ack_transport = reply_transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ack_transport.push_inbound(encode(MessageId::SetGeneralDataPacketTransmitState, &[], Fin::Ack).unwrap());
        });

        let count = Arc::new(AtomicU32::new(0));
        let count2 = count.clone();
        link.toggle_general(Some(Arc::new(move |_msg: Message| {
            count2.fetch_add(1, Ordering::SeqCst);
        })))
        .await
        .unwrap();

        // now feed a General packet for the newly installed handler
        reply_transport.push_inbound(encode(MessageId::GeneralDataPacket, &[0u8; 53], Fin::Etx).unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        link.shutdown().await;
    }

    #[tokio::test]
    async fn disabling_a_stream_clears_its_handler() {
        let transport = MockTransport::default();
        let mut link = start(transport.clone()).await;

        let ack_transport = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ack_transport.push_inbound(encode(MessageId::SetGeneralDataPacketTransmitState, &[], Fin::Ack).unwrap());
        });
        link.toggle_general(Some(Arc::new(|_msg: Message| {}))).await.unwrap();

        let ack_transport = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ack_transport.push_inbound(encode(MessageId::SetGeneralDataPacketTransmitState, &[], Fin::Ack).unwrap());
        });
        link.toggle_general(None).await.unwrap();
        assert!(!link.handlers.read().await.contains_key(&MessageId::GeneralDataPacket));
        link.shutdown().await;
    }

    #[tokio::test]
    async fn toggle_events_never_calls_the_wire() {
        let transport = MockTransport::default();
        let mut link = start(transport.clone()).await;
        link.toggle_events(Some(Arc::new(|_msg: Message| {}))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(transport.sent().is_empty());
        link.shutdown().await;
    }

    #[tokio::test]
    async fn toggle_ecg_sends_single_byte_enable_and_disable_payloads() {
        let transport = MockTransport::default();
        let mut link = start(transport.clone()).await;

        let ack_transport = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ack_transport.push_inbound(encode(MessageId::SetEcgWaveformPacketTransmitState, &[], Fin::Ack).unwrap());
        });
        link.toggle_ecg(Some(Arc::new(|_msg: Message| {}))).await.unwrap();
        assert!(transport.sent().contains(&encode(MessageId::SetEcgWaveformPacketTransmitState, &[1], Fin::Etx).unwrap()));

        let ack_transport = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ack_transport.push_inbound(encode(MessageId::SetEcgWaveformPacketTransmitState, &[], Fin::Ack).unwrap());
        });
        link.toggle_ecg(None).await.unwrap();
        assert!(transport.sent().contains(&encode(MessageId::SetEcgWaveformPacketTransmitState, &[0], Fin::Etx).unwrap()));

        link.shutdown().await;
    }

    #[tokio::test]
    async fn toggle_summary_encodes_interval_and_off_payloads() {
        let transport = MockTransport::default();
        let mut link = start(transport.clone()).await;

        let ack_transport = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ack_transport.push_inbound(encode(MessageId::SetSummaryDataPacketUpdateRate, &[], Fin::Ack).unwrap());
        });
        link.toggle_summary(Some(Arc::new(|_msg: Message| {})), 5).await.unwrap();
        assert!(transport.sent().contains(&encode(MessageId::SetSummaryDataPacketUpdateRate, &[5, 0], Fin::Etx).unwrap()));

        let ack_transport = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ack_transport.push_inbound(encode(MessageId::SetSummaryDataPacketUpdateRate, &[], Fin::Ack).unwrap());
        });
        link.toggle_summary(None, 5).await.unwrap();
        assert!(transport.sent().contains(&encode(MessageId::SetSummaryDataPacketUpdateRate, &[0, 0], Fin::Etx).unwrap()));

        link.shutdown().await;
    }

    #[tokio::test]
    async fn lifesign_messages_are_ignored_by_the_dispatcher() {
        let transport = MockTransport::default();
        let reply_transport = transport.clone();
        let mut link = start(transport).await;
        reply_transport.push_inbound(encode(MessageId::Lifesign, &[], Fin::Etx).unwrap());
        // no pending call for Lifesign; if it were treated as an unsolicited
        // reply this would just warn-log, so assert get_infos still works
        tokio::time::sleep(Duration::from_millis(20)).await;
        link.shutdown().await;
    }
}
