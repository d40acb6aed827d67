//! Pull-style byte-stream framer: consumes bytes lazily and yields one
//! decoded message (or a drop reason) per [`Framer::poll`] call.

use std::collections::VecDeque;
use std::convert::TryFrom;

use super::bits::crc8;
use super::message::{Fin, Message, MessageId};
use super::parsers::parse_payload;

const STX: u8 = 0x02;

/// Why a frame was dropped rather than emitted. Every variant corresponds to
/// one of the framing-error cases enumerated in the error-handling design.
#[derive(Debug, Clone)]
pub enum DropReason {
    UnknownId(u8),
    LengthExceeds128(u8),
    CrcMismatch,
    BadTerminator(u8),
    ParseFailed(crate::error::LinkError),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::UnknownId(id) => write!(f, "unknown message id 0x{id:02x}"),
            DropReason::LengthExceeds128(len) => write!(f, "invalid payload length > 128 ({len})"),
            DropReason::CrcMismatch => write!(f, "payload CRC mismatch"),
            DropReason::BadTerminator(b) => write!(f, "invalid terminator byte 0x{b:02x}"),
            DropReason::ParseFailed(e) => write!(f, "payload parse failed: {e}"),
        }
    }
}

/// Outcome of one framer step.
pub enum FrameEvent {
    Message(Message),
    Dropped(DropReason),
}

/// Stateful byte-stream framer. Feed it raw bytes as they arrive from the
/// transport; drain decoded messages (and drop reasons, for logging) with
/// repeated calls to [`poll`](Framer::poll) until it returns `None`.
#[derive(Default)]
pub struct Framer {
    buf: VecDeque<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self { buf: VecDeque::new() }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes.iter().copied());
    }

    /// Attempt to decode exactly one frame from the buffered bytes.
    ///
    /// Returns `None` when there isn't yet enough data to make progress;
    /// callers should feed more bytes and poll again.
    pub fn poll(&mut self) -> Option<FrameEvent> {
        // scan forward discarding bytes until STX
        while matches!(self.buf.front(), Some(&b) if b != STX) {
            self.buf.pop_front();
        }
        if self.buf.is_empty() {
            return None;
        }
        if self.buf.len() < 3 {
            return None;
        }
        let msgid_byte = self.buf[1];
        let len = self.buf[2];

        if len > 128 {
            // scan forward until a valid terminator, then restart; we must
            // wait if one hasn't arrived yet.
            let pos = self.buf.iter().skip(3).position(|&b| Fin::from_byte(b).is_some());
            return match pos {
                Some(p) => {
                    let consume = 3 + p + 1;
                    self.buf.drain(0..consume);
                    Some(FrameEvent::Dropped(DropReason::LengthExceeds128(len)))
                }
                None => None,
            };
        }

        let len = len as usize;
        let total_needed = 3 + len + 1 + 1;
        if self.buf.len() < total_needed {
            return None;
        }

        let payload: Vec<u8> = self.buf.iter().skip(3).take(len).copied().collect();
        let crc = self.buf[3 + len];
        let fin_byte = self.buf[3 + len + 1];
        self.buf.drain(0..total_needed);

        let msgid = match MessageId::try_from(msgid_byte) {
            Ok(msgid) => msgid,
            Err(_) => return Some(FrameEvent::Dropped(DropReason::UnknownId(msgid_byte))),
        };
        if crc8(&payload) != crc {
            return Some(FrameEvent::Dropped(DropReason::CrcMismatch));
        }
        let fin = match Fin::from_byte(fin_byte) {
            Some(fin) => fin,
            None => return Some(FrameEvent::Dropped(DropReason::BadTerminator(fin_byte))),
        };
        match parse_payload(msgid, &payload) {
            Ok(record) => Some(FrameEvent::Message(Message {
                frame: super::message::Frame::new(msgid, payload, fin),
                record,
            })),
            Err(e) => Some(FrameEvent::Dropped(DropReason::ParseFailed(e))),
        }
    }

    /// Drain all currently decodable frames (messages and drops).
    pub fn drain(&mut self) -> Vec<FrameEvent> {
        let mut out = Vec::new();
        while let Some(ev) = self.poll() {
            out.push(ev);
        }
        out
    }
}
