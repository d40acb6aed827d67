//! Wire protocol codec: bit utilities, bit-packing decoder, message model,
//! payload parsers, byte-stream framer, and encoder.

pub mod bits;
pub mod encoder;
pub mod framer;
pub mod message;
pub mod parsers;
pub mod unpack;

pub use encoder::encode;
pub use framer::{DropReason, FrameEvent, Framer};
pub use message::{Fin, Frame, Message, MessageId, Record};
