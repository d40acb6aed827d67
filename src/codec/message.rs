//! Message ids, frame terminators, and the typed record model.

use std::collections::BTreeMap;
use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

/// Frame terminator byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fin {
    Etx,
    Ack,
    Nak,
}

impl Fin {
    pub const ETX: u8 = 0x03;
    pub const ACK: u8 = 0x06;
    pub const NAK: u8 = 0x15;

    pub fn to_byte(self) -> u8 {
        match self {
            Fin::Etx => Self::ETX,
            Fin::Ack => Self::ACK,
            Fin::Nak => Self::NAK,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            Self::ETX => Some(Fin::Etx),
            Self::ACK => Some(Fin::Ack),
            Self::NAK => Some(Fin::Nak),
            _ => None,
        }
    }
}

/// Closed enumeration of known message ids: periodic data kinds, queries,
/// stream toggles, and configuration commands. Numeric values follow the
/// device's own id assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageId {
    // --- periodic data packets ---
    Lifesign = 0x23,
    GeneralDataPacket = 0x20,
    BreathingWaveformPacket = 0x21,
    EcgWaveformPacket = 0x22,
    RtoRPacket = 0x24,
    AccelerometerPacket = 0x25,
    BluetoothDeviceDataPacket = 0x27,
    ExtendedDataPacket = 0x28,
    Accelerometer100MgPacket = 0x2A,
    SummaryDataPacket = 0x2B,
    EventPacket = 0x2C,
    LoggingDataPacket = 0x3F,
    LiveLogAccessDataPacket = 0x60,

    // --- stream toggles ---
    SetGeneralDataPacketTransmitState = 0x14,
    SetBreathingWaveformPacketTransmitState = 0x15,
    SetEcgWaveformPacketTransmitState = 0x16,
    SetRtoRDataPacketTransmitState = 0x19,
    SetAccelerometerPacketTransmitState = 0x1E,
    SetAccelerometer100mgPacketTransmitState = 0xBC,
    SetExtendedDataPacketTransmitState = 0xB8,
    SetSummaryDataPacketUpdateRate = 0xBD,

    // --- queries ---
    GetRtcDateTime = 0x08,
    GetBootSoftwareVersion = 0x09,
    GetApplicationSoftwareVersion = 0x0A,
    GetSerialNumber = 0x0B,
    GetHardwarePartNumber = 0x0C,
    GetBootloaderPartNumber = 0x0D,
    GetApplicationPartNumber = 0x0E,
    GetUnitMacAddress = 0x12,
    GetUnitBluetoothFriendlyName = 0x17,
    GetBluetoothUserConfig = 0xA3,
    GetBtLinkConfig = 0xA5,
    GetBioHarnessUserConfig = 0xA7,
    GetBatteryStatus = 0xAC,
    GetAccelerometerAxisMapping = 0xB5,
    GetAlgorithmConfig = 0xB7,
    GetRogSettings = 0x9C,
    GetSubjectInfoSettings = 0xBF,
    GetRemoteMacAddressAndPin = 0xD1,
    GetNetworkId = 0x11,
    GetRemoteDeviceDescription = 0xD4,

    // --- benign configuration ---
    SetRtcDateTime = 0x07,
    SetNetworkId = 0x10,

    // --- not-so-benign commands ---
    SetBluetoothUserConfig = 0xA2,
    SetBtLinkConfig = 0xA4,
    SetBioHarnessUserConfig = 0xA6,
    RebootUnit = 0x1F,
    SetRogSettings = 0x9B,
    BluetoothPeripheralMessage = 0xB0,
    ResetConfiguration = 0xB3,
    SetAccelerometerAxisMapping = 0xB4,
    SetAlgorithmConfig = 0xB6,
    SetBioHarnessUserConfigItem = 0xB9,
    SetSubjectInfoSettings = 0xBE,
    SetRemoteMacAddressAndPin = 0xD0,

    // --- log access ---
    GetSupportedLogFormats = 0xD5,
    ReadLoggingData = 0x01,
    SendLoggingData = 0xE2,
    DeleteLogfile = 0x02,
    LiveLogAccessCommand = 0xE5,
}

impl TryFrom<u8> for MessageId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        use MessageId::*;
        const ALL: &[MessageId] = &[
            Lifesign, GeneralDataPacket, BreathingWaveformPacket, EcgWaveformPacket, RtoRPacket,
            AccelerometerPacket, BluetoothDeviceDataPacket, ExtendedDataPacket,
            Accelerometer100MgPacket, SummaryDataPacket, EventPacket, LoggingDataPacket,
            LiveLogAccessDataPacket, SetGeneralDataPacketTransmitState,
            SetBreathingWaveformPacketTransmitState, SetEcgWaveformPacketTransmitState,
            SetRtoRDataPacketTransmitState, SetAccelerometerPacketTransmitState,
            SetAccelerometer100mgPacketTransmitState, SetExtendedDataPacketTransmitState,
            SetSummaryDataPacketUpdateRate, GetRtcDateTime, GetBootSoftwareVersion,
            GetApplicationSoftwareVersion, GetSerialNumber, GetHardwarePartNumber,
            GetBootloaderPartNumber, GetApplicationPartNumber, GetUnitMacAddress,
            GetUnitBluetoothFriendlyName, GetBluetoothUserConfig, GetBtLinkConfig,
            GetBioHarnessUserConfig, GetBatteryStatus, GetAccelerometerAxisMapping,
            GetAlgorithmConfig, GetRogSettings, GetSubjectInfoSettings,
            GetRemoteMacAddressAndPin, GetNetworkId, GetRemoteDeviceDescription, SetRtcDateTime,
            SetNetworkId, SetBluetoothUserConfig, SetBtLinkConfig, SetBioHarnessUserConfig,
            RebootUnit, SetRogSettings, BluetoothPeripheralMessage, ResetConfiguration,
            SetAccelerometerAxisMapping, SetAlgorithmConfig, SetBioHarnessUserConfigItem,
            SetSubjectInfoSettings, SetRemoteMacAddressAndPin, GetSupportedLogFormats,
            ReadLoggingData, SendLoggingData, DeleteLogfile, LiveLogAccessCommand,
        ];
        ALL.iter().copied().find(|m| *m as u8 == value).ok_or(value)
    }
}

impl From<MessageId> for u8 {
    fn from(id: MessageId) -> u8 {
        id as u8
    }
}

/// Message kinds that are emitted repeatedly by the device once their
/// corresponding stream toggle is enabled.
pub const PERIODIC_MESSAGES: &[MessageId] = &[
    MessageId::GeneralDataPacket,
    MessageId::BreathingWaveformPacket,
    MessageId::EcgWaveformPacket,
    MessageId::RtoRPacket,
    MessageId::AccelerometerPacket,
    MessageId::BluetoothDeviceDataPacket,
    MessageId::ExtendedDataPacket,
    MessageId::Accelerometer100MgPacket,
    MessageId::SummaryDataPacket,
    MessageId::EventPacket,
    MessageId::LoggingDataPacket,
    MessageId::LiveLogAccessDataPacket,
];

/// Maps a transmit-state toggle command to the data packet id it controls.
pub fn transmit_state_to_data_packet(toggle: MessageId) -> Option<MessageId> {
    use MessageId::*;
    Some(match toggle {
        SetGeneralDataPacketTransmitState => GeneralDataPacket,
        SetBreathingWaveformPacketTransmitState => BreathingWaveformPacket,
        SetEcgWaveformPacketTransmitState => EcgWaveformPacket,
        SetRtoRDataPacketTransmitState => RtoRPacket,
        SetAccelerometerPacketTransmitState => AccelerometerPacket,
        SetAccelerometer100mgPacketTransmitState => Accelerometer100MgPacket,
        SetExtendedDataPacketTransmitState => ExtendedDataPacket,
        SetSummaryDataPacketUpdateRate => SummaryDataPacket,
        _ => return None,
    })
}

/// Raw frame as produced by the framer or consumed by the encoder: message
/// id, opaque payload, and terminator. Typed records (below) are layered on
/// top of this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub msgid: MessageId,
    pub payload: Vec<u8>,
    pub fin: Fin,
}

impl Frame {
    pub fn new(msgid: MessageId, payload: impl Into<Vec<u8>>, fin: Fin) -> Self {
        Self { msgid, payload: payload.into(), fin }
    }

    pub fn ack(msgid: MessageId, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(msgid, payload, Fin::Ack)
    }

    /// Decode the payload as a (lossy) UTF-8 string, trimming trailing NULs.
    pub fn payload_str(&self) -> String {
        let bytes: Vec<u8> = self.payload.iter().copied().take_while(|&b| b != 0).collect();
        String::from_utf8_lossy(&bytes).trim().to_string()
    }

    pub fn ensure_fin_ok(&self) -> Result<(), crate::error::LinkError> {
        match self.fin {
            Fin::Etx | Fin::Ack => Ok(()),
            Fin::Nak => Err(crate::error::LinkError::Protocol { msgid: self.msgid }),
        }
    }
}

/// Generic value type used by [`Record::as_map`] so downstream consumers can
/// iterate a record's fields without matching on the concrete variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Bool(bool),
    Text(String),
    Numbers(Vec<f64>),
}

/// A decoded, strongly-typed record. Every periodic message begins with a
/// shared header (sequence number and absolute timestamp); one-off command
/// replies carry only `msgid`/payload and are represented as [`Record::Raw`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Record {
    Raw(super::parsers::RawReply),
    General(super::parsers::GeneralData),
    SummaryV2(super::parsers::SummaryDataV2),
    SummaryV3(super::parsers::SummaryDataV3),
    Ecg(super::parsers::EcgWaveform),
    Breathing(super::parsers::BreathingWaveform),
    Accelerometer(super::parsers::AccelerometerWaveform),
    Accelerometer100Mg(super::parsers::Accelerometer100MgWaveform),
    RtoR(super::parsers::RtoR),
    Event(super::parsers::Event),
}

impl Record {
    /// Common "as key-value map" view for consumers that iterate fields
    /// generically rather than matching on the concrete record type.
    pub fn as_map(&self) -> BTreeMap<String, FieldValue> {
        match self {
            Record::Raw(r) => r.as_map(),
            Record::General(r) => r.as_map(),
            Record::SummaryV2(r) => r.as_map(),
            Record::SummaryV3(r) => r.as_map(),
            Record::Ecg(r) => r.as_map(),
            Record::Breathing(r) => r.as_map(),
            Record::Accelerometer(r) => r.as_map(),
            Record::Accelerometer100Mg(r) => r.as_map(),
            Record::RtoR(r) => r.as_map(),
            Record::Event(r) => r.as_map(),
        }
    }
}

/// A fully decoded message: the raw frame plus its typed interpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub frame: Frame,
    pub record: Record,
}

/// Shared 9-byte header present at the start of every periodic message payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Header {
    pub seq_no: u8,
    /// Seconds since the Unix epoch, derived from `midnight(Y,M,D) + ms*1e-3`.
    pub stamp: f64,
}

pub fn parse_header(payload: &[u8]) -> Header {
    let seq_no = payload[0];
    let stamp = parse_timestamp(&payload[1..9]);
    Header { seq_no, stamp }
}

fn parse_timestamp(encoded: &[u8]) -> f64 {
    use super::unpack::parse_num;
    let year = parse_num(&encoded[0..2], false, None) as i32;
    let month = encoded[2] as u32;
    let day = encoded[3] as u32;
    let msec = parse_num(&encoded[4..8], false, None);
    let midnight = chrono::NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp() as f64)
        .unwrap_or(f64::NAN);
    midnight + msec * 0.001
}
