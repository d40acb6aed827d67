use thiserror::Error;

use crate::codec::message::MessageId;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("framing error: {0}")]
    Framing(String),

    #[error("failed to parse payload for message {msgid:?}: {reason}")]
    Parse { msgid: MessageId, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("device rejected message {msgid:?} (NAK)")]
    Protocol { msgid: MessageId },

    #[error("timed out waiting for a reply to {msgid:?}")]
    Timeout { msgid: MessageId },

    #[error("no BHT device found during discovery")]
    NoDeviceFound,
}

impl serde::Serialize for LinkError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let code = match self {
            LinkError::Framing(_) => "framing_error",
            LinkError::Parse { .. } => "parse_error",
            LinkError::Transport(_) => "transport_error",
            LinkError::Protocol { .. } => "protocol_error",
            LinkError::Timeout { .. } => "timeout_error",
            LinkError::NoDeviceFound => "no_device_found",
        };
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("code", code)?;
        map.serialize_entry("message", &self.to_string())?;
        map.end()
    }
}

pub type LinkResult<T> = Result<T, LinkError>;
