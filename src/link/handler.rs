//! Consumer-facing streaming handler contract.

use crate::codec::message::{Message, MessageId};

/// A unary callback invoked once per decoded periodic record.
///
/// Implemented for plain closures so callers don't need to define a type
/// just to subscribe to a stream: `link.toggle_ecg(Some(Arc::new(|msg| {
/// ... }))).await`.
pub trait Handler: Send + Sync {
    fn handle(&self, message: Message);
}

impl<F> Handler for F
where
    F: Fn(Message) + Send + Sync,
{
    fn handle(&self, message: Message) {
        self(message)
    }
}

/// The periodic data streams a consumer can toggle on or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    General,
    Breathing,
    Ecg,
    RtoR,
    Accelerometer,
    Accelerometer100Mg,
    Summary,
    Events,
}

impl StreamKind {
    /// The command id that enables/disables this stream. `Events` has none:
    /// the device emits event packets unconditionally — see
    /// [`crate::link::dispatch::BioHarnessLink::toggle_events`].
    pub fn toggle_msgid(self) -> Option<MessageId> {
        use MessageId::*;
        Some(match self {
            StreamKind::General => SetGeneralDataPacketTransmitState,
            StreamKind::Breathing => SetBreathingWaveformPacketTransmitState,
            StreamKind::Ecg => SetEcgWaveformPacketTransmitState,
            StreamKind::RtoR => SetRtoRDataPacketTransmitState,
            StreamKind::Accelerometer => SetAccelerometerPacketTransmitState,
            StreamKind::Accelerometer100Mg => SetAccelerometer100mgPacketTransmitState,
            StreamKind::Summary => SetSummaryDataPacketUpdateRate,
            StreamKind::Events => return None,
        })
    }

    /// The periodic message id this stream's handler is registered against.
    pub fn data_msgid(self) -> MessageId {
        use MessageId::*;
        match self {
            StreamKind::General => GeneralDataPacket,
            StreamKind::Breathing => BreathingWaveformPacket,
            StreamKind::Ecg => EcgWaveformPacket,
            StreamKind::RtoR => RtoRPacket,
            StreamKind::Accelerometer => AccelerometerPacket,
            StreamKind::Accelerometer100Mg => Accelerometer100MgPacket,
            StreamKind::Summary => SummaryDataPacket,
            StreamKind::Events => EventPacket,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_satisfy_the_handler_trait() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(0u32));
        let seen2 = seen.clone();
        let handler: std::sync::Arc<dyn Handler> = std::sync::Arc::new(move |_msg: Message| {
            *seen2.lock().unwrap() += 1;
        });
        let frame = crate::codec::message::Frame::ack(MessageId::Lifesign, vec![]);
        let record = crate::codec::parsers::parse_raw(MessageId::Lifesign, &[]);
        handler.handle(Message { frame, record });
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn events_stream_has_no_wire_toggle() {
        assert_eq!(StreamKind::Events.toggle_msgid(), None);
        assert_eq!(StreamKind::Summary.toggle_msgid(), Some(MessageId::SetSummaryDataPacketUpdateRate));
    }
}
