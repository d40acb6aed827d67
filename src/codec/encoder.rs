//! Encodes an outbound message to its wire form.

use super::bits::crc8;
use super::message::{Fin, MessageId};
use crate::error::LinkError;

/// `STX ‖ MSGID ‖ LEN(payload) ‖ payload ‖ crc8(payload) ‖ fin`.
pub fn encode(msgid: MessageId, payload: &[u8], fin: Fin) -> Result<Vec<u8>, LinkError> {
    if payload.len() > 128 {
        return Err(LinkError::Framing(format!("payload length {} exceeds 128", payload.len())));
    }
    let mut out = Vec::with_capacity(4 + payload.len());
    out.push(0x02);
    out.push(msgid.into());
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
    out.push(crc8(payload));
    out.push(fin.to_byte());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifesign_encodes_to_the_documented_bytes() {
        let bytes = encode(MessageId::Lifesign, &[], Fin::Etx).unwrap();
        assert_eq!(bytes, vec![0x02, 0x23, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn rejects_payload_over_128_bytes() {
        let payload = vec![0u8; 129];
        assert!(encode(MessageId::GeneralDataPacket, &payload, Fin::Etx).is_err());
    }

    #[test]
    fn encode_then_decode_preserves_an_opaque_frame() {
        use super::super::framer::{FrameEvent, Framer};
        let payload = vec![1u8, 2, 3, 4];
        let bytes = encode(MessageId::SetEcgWaveformPacketTransmitState, &payload, Fin::Ack).unwrap();
        let mut framer = Framer::new();
        framer.feed(&bytes);
        let events = framer.drain();
        assert_eq!(events.len(), 1);
        match &events[0] {
            FrameEvent::Message(msg) => {
                assert_eq!(msg.frame.msgid, MessageId::SetEcgWaveformPacketTransmitState);
                assert_eq!(msg.frame.payload, payload);
                assert_eq!(msg.frame.fin, Fin::Ack);
            }
            _ => panic!("expected a decoded message"),
        }
    }
}
