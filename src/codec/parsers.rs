//! One parser per message id: validates payload length, then decodes fields
//! into SI-unit typed records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::LinkError;

use super::message::{parse_header, FieldValue, Header, MessageId, Record};
use super::unpack::{decode_accelerometry, decode_gps_position, decode_sequence, parse_num, SampleMode};

fn assert_length(msgid: MessageId, payload: &[u8], expected: usize, at_least: bool) -> Result<(), LinkError> {
    let ok = if at_least { payload.len() >= expected } else { payload.len() == expected };
    if ok {
        Ok(())
    } else {
        Err(LinkError::Parse {
            msgid,
            reason: format!("expected {}{} bytes of payload, got {}", if at_least { "at least " } else { "" }, expected, payload.len()),
        })
    }
}

macro_rules! as_map_impl {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $ty {
            pub fn as_map(&self) -> BTreeMap<String, FieldValue> {
                let mut m = BTreeMap::new();
                m.insert("seq_no".to_string(), FieldValue::Number(self.header.seq_no as f64));
                m.insert("stamp".to_string(), FieldValue::Number(self.header.stamp));
                $( m.insert(stringify!($field).to_string(), self.$field.clone().into()); )*
                m
            }
        }
    };
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}
impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}
impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}
impl From<Vec<f64>> for FieldValue {
    fn from(v: Vec<f64>) -> Self {
        FieldValue::Numbers(v)
    }
}
impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        FieldValue::Number(v as f64)
    }
}
impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Number(v as f64)
    }
}
impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Number(v as f64)
    }
}

/// A command reply carrying only its raw payload (queries, acks, toggles).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReply {
    pub msgid: MessageId,
    pub payload: Vec<u8>,
}

impl RawReply {
    pub fn as_map(&self) -> BTreeMap<String, FieldValue> {
        let mut m = BTreeMap::new();
        m.insert("msgid".to_string(), FieldValue::Number(u8::from(self.msgid) as f64));
        m.insert("payload_str".to_string(), FieldValue::Text(self.payload_str()));
        m
    }

    pub fn payload_str(&self) -> String {
        let bytes: Vec<u8> = self.payload.iter().copied().take_while(|&b| b != 0).collect();
        String::from_utf8_lossy(&bytes).trim().to_string()
    }
}

pub fn parse_raw(msgid: MessageId, payload: &[u8]) -> Record {
    Record::Raw(RawReply { msgid, payload: payload.to_vec() })
}

/// GeneralData (payload 53B).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralData {
    pub header: Header,
    pub heart_rate: f64,
    pub respiration_rate: f64,
    pub skin_temperature: f64,
    pub posture: f64,
    pub vmu_activity: f64,
    pub peak_acceleration: f64,
    pub battery_voltage: f64,
    pub breathing_wave_amplitude: f64,
    pub ecg_amplitude: f64,
    pub ecg_noise: f64,
    pub vertical_accel_min: f64,
    pub vertical_accel_peak: f64,
    pub lateral_accel_min: f64,
    pub lateral_accel_peak: f64,
    pub sagittal_accel_min: f64,
    pub sagittal_accel_peak: f64,
    pub system_channel: f64,
    pub gsr: f64,
    pub rog: f64,
    pub physio_monitor_worn: bool,
    pub ui_button_pressed: bool,
    pub heart_rate_is_low_quality: bool,
    pub external_sensors_connected: bool,
    pub battery_percent: f64,
}
as_map_impl!(GeneralData {
    heart_rate, respiration_rate, skin_temperature, posture, vmu_activity, peak_acceleration,
    battery_voltage, breathing_wave_amplitude, ecg_amplitude, ecg_noise, vertical_accel_min,
    vertical_accel_peak, lateral_accel_min, lateral_accel_peak, sagittal_accel_min,
    sagittal_accel_peak, system_channel, gsr, rog, physio_monitor_worn, ui_button_pressed,
    heart_rate_is_low_quality, external_sensors_connected, battery_percent,
});

pub fn parse_general_data(payload: &[u8]) -> Result<Record, LinkError> {
    assert_length(MessageId::GeneralDataPacket, payload, 53, false)?;
    let header = parse_header(payload);
    let status = parse_num(&payload[51..53], false, None) as u32;
    Ok(Record::General(GeneralData {
        header,
        heart_rate: parse_num(&payload[9..11], false, Some(0xFFFF)),
        respiration_rate: parse_num(&payload[11..13], false, Some(0xFFFF)) * 0.1,
        skin_temperature: parse_num(&payload[13..15], true, Some(0x8000)) * 0.1,
        posture: parse_num(&payload[15..17], true, Some(0x8000)),
        vmu_activity: parse_num(&payload[17..19], false, Some(0xFFFF)) * 0.01,
        peak_acceleration: parse_num(&payload[19..21], false, Some(0xFFFF)) * 0.01,
        battery_voltage: parse_num(&payload[21..23], false, Some(0xFFFF)) * 0.001,
        breathing_wave_amplitude: parse_num(&payload[23..25], false, Some(0xFFFF)),
        ecg_amplitude: parse_num(&payload[25..27], false, Some(0xFFFF)) * 0.000_001,
        ecg_noise: parse_num(&payload[27..29], false, Some(0xFFFF)) * 0.000_001,
        vertical_accel_min: parse_num(&payload[29..31], true, Some(0x8000)) * 0.01,
        vertical_accel_peak: parse_num(&payload[31..33], true, Some(0x8000)) * 0.01,
        lateral_accel_min: parse_num(&payload[33..35], true, Some(0x8000)) * 0.01,
        lateral_accel_peak: parse_num(&payload[35..37], true, Some(0x8000)) * 0.01,
        sagittal_accel_min: parse_num(&payload[37..39], true, Some(0x8000)) * 0.01,
        sagittal_accel_peak: parse_num(&payload[39..41], true, Some(0x8000)) * 0.01,
        system_channel: parse_num(&payload[41..43], false, None),
        gsr: parse_num(&payload[43..45], false, Some(0xFFFF)),
        rog: parse_num(&payload[49..51], false, Some(0xFFFF)),
        physio_monitor_worn: status & (1 << 15) != 0,
        ui_button_pressed: status & (1 << 14) != 0,
        heart_rate_is_low_quality: status & (1 << 13) != 0,
        external_sensors_connected: status & (1 << 12) != 0,
        battery_percent: (status & 0x7F) as f64,
    }))
}

/// Status-info flags shared by the V2 and V3 summary records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatusInfo {
    pub device_worn_confidence: f64,
    pub button_pressed: bool,
    pub not_fitted_to_garment: bool,
    pub heart_rate_unreliable: bool,
    pub respiration_rate_unreliable: bool,
    pub skin_temperature_unreliable: bool,
    pub posture_unreliable: bool,
    pub activity_unreliable: bool,
    pub hrv_unreliable: bool,
    pub estimated_core_temp_unreliable: bool,
    pub usb_power_connected: bool,
    pub resting_state_detected: bool,
    pub external_sensors_connected: bool,
}

fn decode_status_info(status_info: u32) -> StatusInfo {
    StatusInfo {
        device_worn_confidence: 1.0 - (status_info & 3) as f64 / 3.0,
        button_pressed: status_info & (1 << 2) != 0,
        not_fitted_to_garment: status_info & (1 << 3) != 0,
        heart_rate_unreliable: status_info & (1 << 4) != 0,
        respiration_rate_unreliable: status_info & (1 << 5) != 0,
        skin_temperature_unreliable: status_info & (1 << 6) != 0,
        posture_unreliable: status_info & (1 << 7) != 0,
        activity_unreliable: status_info & (1 << 8) != 0,
        hrv_unreliable: status_info & (1 << 9) != 0,
        estimated_core_temp_unreliable: status_info & (1 << 10) != 0,
        usb_power_connected: status_info & (1 << 11) != 0,
        resting_state_detected: status_info & (1 << 14) != 0,
        external_sensors_connected: status_info & (1 << 15) != 0,
    }
}

/// Extended-status word decoded for V2 summary records.
///
/// The source computes this as `(x & 2**k) > 0 + flags_valid`, which due to
/// operator precedence compares against `0 + flags_valid` instead of gating
/// each flag on validity. Here each flag is simply `valid && bit set`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExtStatus {
    pub valid: bool,
    pub resp_rate_low: bool,
    pub resp_rate_high: bool,
    pub br_amplitude_low: bool,
    pub br_amplitude_high: bool,
    pub br_amplitude_variance_high: bool,
    pub br_signal_eval_state: u8,
}

fn decode_ext_status(ext_status_info: u32) -> ExtStatus {
    let valid = ext_status_info & (1 << 15) != 0;
    ExtStatus {
        valid,
        resp_rate_low: valid && ext_status_info & (1 << 0) != 0,
        resp_rate_high: valid && ext_status_info & (1 << 1) != 0,
        br_amplitude_low: valid && ext_status_info & (1 << 2) != 0,
        br_amplitude_high: valid && ext_status_info & (1 << 3) != 0,
        br_amplitude_variance_high: valid && ext_status_info & (1 << 4) != 0,
        br_signal_eval_state: ((ext_status_info >> 5) & 3) as u8,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryDataV2 {
    pub header: Header,
    pub heart_rate: f64,
    pub respiration_rate: f64,
    pub skin_temperature: f64,
    pub posture: f64,
    pub activity: f64,
    pub peak_acceleration: f64,
    pub battery_voltage: f64,
    pub battery_percent: f64,
    pub breathing_wave_amplitude: f64,
    pub breathing_wave_noise: f64,
    pub breathing_rate_confidence: f64,
    pub ecg_amplitude: f64,
    pub ecg_noise: f64,
    pub heart_rate_confidence: f64,
    pub heart_rate_variability: f64,
    pub system_confidence: f64,
    pub gsr: f64,
    pub rog: f64,
    pub vertical_accel_min: f64,
    pub vertical_accel_peak: f64,
    pub lateral_accel_min: f64,
    pub lateral_accel_peak: f64,
    pub sagittal_accel_min: f64,
    pub sagittal_accel_peak: f64,
    pub device_internal_temp: f64,
    pub status: StatusInfo,
    pub link_quality_pct: f64,
    pub rssi: f64,
    pub tx_power: f64,
    pub estimated_core_temperature: f64,
    pub aux_adc_chan1: f64,
    pub aux_adc_chan2: f64,
    pub aux_adc_chan3: f64,
    pub ext_status: ExtStatus,
}

impl SummaryDataV2 {
    pub fn as_map(&self) -> BTreeMap<String, FieldValue> {
        let mut m = BTreeMap::new();
        m.insert("seq_no".to_string(), FieldValue::Number(self.header.seq_no as f64));
        m.insert("stamp".to_string(), FieldValue::Number(self.header.stamp));
        m.insert("heart_rate".to_string(), self.heart_rate.into());
        m.insert("respiration_rate".to_string(), self.respiration_rate.into());
        m.insert("skin_temperature".to_string(), self.skin_temperature.into());
        m.insert("posture".to_string(), self.posture.into());
        m.insert("activity".to_string(), self.activity.into());
        m.insert("peak_acceleration".to_string(), self.peak_acceleration.into());
        m.insert("battery_voltage".to_string(), self.battery_voltage.into());
        m.insert("battery_percent".to_string(), self.battery_percent.into());
        m.insert("link_quality_pct".to_string(), self.link_quality_pct.into());
        m.insert("rssi".to_string(), self.rssi.into());
        m.insert("estimated_core_temperature".to_string(), self.estimated_core_temperature.into());
        m.insert("device_worn_confidence".to_string(), self.status.device_worn_confidence.into());
        m
    }
}

pub fn parse_summary_v2(payload: &[u8]) -> Result<Record, LinkError> {
    assert_length(MessageId::SummaryDataPacket, payload, 71, false)?;
    let header = parse_header(payload);
    let status_info = parse_num(&payload[56..58], false, Some(0)) as u32;
    let ext_status_info = parse_num(&payload[69..71], false, Some(0xFFFF)) as u32;
    let link_quality = parse_num(&payload[58..59], false, Some(0xFF));
    Ok(Record::SummaryV2(SummaryDataV2 {
        header,
        heart_rate: parse_num(&payload[10..12], false, Some(0xFFFF)),
        respiration_rate: parse_num(&payload[12..14], false, Some(0xFFFF)) * 0.1,
        skin_temperature: parse_num(&payload[14..16], true, Some(0x8000)) * 0.1,
        posture: parse_num(&payload[16..18], true, Some(0x8000)),
        activity: parse_num(&payload[18..20], false, Some(0xFFFF)) * 0.01,
        peak_acceleration: parse_num(&payload[20..22], false, Some(0xFFFF)) * 0.01,
        battery_voltage: parse_num(&payload[22..24], false, Some(0xFFFF)) * 0.001,
        battery_percent: parse_num(&payload[24..25], false, Some(0xFF)),
        breathing_wave_amplitude: parse_num(&payload[25..27], false, Some(0xFFFF)),
        breathing_wave_noise: parse_num(&payload[27..29], false, Some(0xFFFF)),
        breathing_rate_confidence: parse_num(&payload[29..30], false, Some(0xFF)),
        ecg_amplitude: parse_num(&payload[30..32], false, Some(0xFFFF)) * 0.000_001,
        ecg_noise: parse_num(&payload[32..34], false, Some(0xFFFF)) * 0.000_001,
        heart_rate_confidence: parse_num(&payload[34..35], false, Some(0xFF)),
        heart_rate_variability: parse_num(&payload[35..37], false, Some(0xFFFF)),
        system_confidence: parse_num(&payload[37..38], false, Some(0xFF)),
        gsr: parse_num(&payload[38..40], false, Some(0xFFFF)),
        rog: parse_num(&payload[40..42], false, Some(0)),
        vertical_accel_min: parse_num(&payload[42..44], true, Some(0x8000)) * 0.01,
        vertical_accel_peak: parse_num(&payload[44..46], true, Some(0x8000)) * 0.01,
        lateral_accel_min: parse_num(&payload[46..48], true, Some(0x8000)) * 0.01,
        lateral_accel_peak: parse_num(&payload[48..50], true, Some(0x8000)) * 0.01,
        sagittal_accel_min: parse_num(&payload[50..52], true, Some(0x8000)) * 0.01,
        sagittal_accel_peak: parse_num(&payload[52..54], true, Some(0x8000)) * 0.01,
        device_internal_temp: parse_num(&payload[54..56], true, Some(0x8000)) * 0.1,
        status: decode_status_info(status_info),
        link_quality_pct: link_quality * 100.0 / 254.0,
        rssi: parse_num(&payload[59..60], true, Some(0x80)),
        tx_power: parse_num(&payload[60..61], true, Some(0x80)),
        estimated_core_temperature: parse_num(&payload[61..63], false, Some(0xFFFF)) * 0.1,
        aux_adc_chan1: parse_num(&payload[63..65], false, Some(0xFFFF)),
        aux_adc_chan2: parse_num(&payload[65..67], false, Some(0xFFFF)),
        aux_adc_chan3: parse_num(&payload[67..69], false, Some(0xFFFF)),
        ext_status: decode_ext_status(ext_status_info),
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryDataV3 {
    pub header: Header,
    pub heart_rate: f64,
    pub respiration_rate: f64,
    pub posture: f64,
    pub activity: f64,
    pub peak_acceleration: f64,
    pub battery_percent: f64,
    pub breathing_wave_amplitude: f64,
    pub ecg_amplitude: f64,
    pub ecg_noise: f64,
    pub heart_rate_confidence: f64,
    pub heart_rate_variability: f64,
    pub rog: f64,
    pub status: StatusInfo,
    pub link_quality_pct: f64,
    pub rssi: f64,
    pub tx_power: f64,
    pub estimated_core_temperature: f64,
    pub gps: super::unpack::GpsPosition,
    pub gps_speed: f64,
    pub accel: super::unpack::Accelerometry,
}

impl SummaryDataV3 {
    pub fn as_map(&self) -> BTreeMap<String, FieldValue> {
        let mut m = BTreeMap::new();
        m.insert("seq_no".to_string(), FieldValue::Number(self.header.seq_no as f64));
        m.insert("stamp".to_string(), FieldValue::Number(self.header.stamp));
        m.insert("heart_rate".to_string(), self.heart_rate.into());
        m.insert("respiration_rate".to_string(), self.respiration_rate.into());
        m.insert("posture".to_string(), self.posture.into());
        m.insert("activity".to_string(), self.activity.into());
        m.insert("battery_percent".to_string(), self.battery_percent.into());
        m.insert("link_quality_pct".to_string(), self.link_quality_pct.into());
        m.insert("estimated_core_temperature".to_string(), self.estimated_core_temperature.into());
        m.insert("gps_speed".to_string(), self.gps_speed.into());
        m.insert("gps_altitude".to_string(), self.gps.altitude.into());
        m.insert("accel_impulse_load".to_string(), self.accel.impulse_load.into());
        m
    }
}

pub fn parse_summary_v3(payload: &[u8]) -> Result<Record, LinkError> {
    assert_length(MessageId::SummaryDataPacket, payload, 71, false)?;
    let header = parse_header(payload);
    let status_info = parse_num(&payload[32..34], false, Some(0)) as u32;
    let link_quality = parse_num(&payload[34..35], false, Some(0xFF));
    let gps = decode_gps_position(&payload[39..49]);
    let gps_speed = (parse_num(&payload[49..51], false, None) as u32 & 0x3FFF) as f64;
    let accel = decode_accelerometry(&payload[51..71]);
    Ok(Record::SummaryV3(SummaryDataV3 {
        header,
        heart_rate: parse_num(&payload[10..12], false, Some(0xFFFF)),
        respiration_rate: parse_num(&payload[12..14], false, Some(0xFFFF)) * 0.1,
        posture: parse_num(&payload[14..16], true, Some(0x8000)),
        activity: parse_num(&payload[16..18], false, Some(0xFFFF)) * 0.01,
        peak_acceleration: parse_num(&payload[18..20], false, Some(0xFFFF)) * 0.01,
        battery_percent: parse_num(&payload[20..21], false, None),
        breathing_wave_amplitude: parse_num(&payload[21..23], false, Some(0xFFFF)),
        ecg_amplitude: parse_num(&payload[23..25], false, Some(0xFFFF)) * 0.000_001,
        ecg_noise: parse_num(&payload[25..27], false, Some(0xFFFF)) * 0.000_001,
        heart_rate_confidence: parse_num(&payload[27..28], false, None),
        heart_rate_variability: parse_num(&payload[28..30], false, Some(0xFFFF)),
        rog: parse_num(&payload[30..32], false, Some(0)),
        status: decode_status_info(status_info),
        link_quality_pct: link_quality * 100.0 / 254.0,
        rssi: parse_num(&payload[35..36], true, Some(0x80)),
        tx_power: parse_num(&payload[36..37], true, Some(0x80)),
        // corrected: read two real payload bytes rather than [payload[37], 256]
        estimated_core_temperature: parse_num(&payload[37..39], false, Some(0xFFFF)) * 0.1,
        gps,
        gps_speed,
        accel,
    }))
}

macro_rules! waveform_record {
    ($name:ident) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            pub header: Header,
            pub samples: Vec<f64>,
        }

        impl $name {
            pub fn as_map(&self) -> BTreeMap<String, FieldValue> {
                let mut m = BTreeMap::new();
                m.insert("seq_no".to_string(), FieldValue::Number(self.header.seq_no as f64));
                m.insert("stamp".to_string(), FieldValue::Number(self.header.stamp));
                m.insert("samples".to_string(), self.samples.clone().into());
                m
            }
        }
    };
}

waveform_record!(EcgWaveform);
waveform_record!(BreathingWaveform);

pub fn parse_ecg_waveform(payload: &[u8]) -> Result<Record, LinkError> {
    assert_length(MessageId::EcgWaveformPacket, payload, 88, false)?;
    let header = parse_header(payload);
    let samples = decode_sequence(&payload[9..], 5, 10, SampleMode::Shifted, 63)
        .into_iter()
        .map(|v| v * 0.025)
        .collect();
    Ok(Record::Ecg(EcgWaveform { header, samples }))
}

pub fn parse_breathing_waveform(payload: &[u8]) -> Result<Record, LinkError> {
    assert_length(MessageId::BreathingWaveformPacket, payload, 32, false)?;
    let header = parse_header(payload);
    let samples = decode_sequence(&payload[9..], 5, 10, SampleMode::Shifted, 18);
    Ok(Record::Breathing(BreathingWaveform { header, samples }))
}

macro_rules! triaxial_waveform_record {
    ($name:ident) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            pub header: Header,
            pub accel_x: Vec<f64>,
            pub accel_y: Vec<f64>,
            pub accel_z: Vec<f64>,
        }

        impl $name {
            pub fn as_map(&self) -> BTreeMap<String, FieldValue> {
                let mut m = BTreeMap::new();
                m.insert("seq_no".to_string(), FieldValue::Number(self.header.seq_no as f64));
                m.insert("stamp".to_string(), FieldValue::Number(self.header.stamp));
                m.insert("accel_x".to_string(), self.accel_x.clone().into());
                m.insert("accel_y".to_string(), self.accel_y.clone().into());
                m.insert("accel_z".to_string(), self.accel_z.clone().into());
                m
            }
        }
    };
}

triaxial_waveform_record!(AccelerometerWaveform);
triaxial_waveform_record!(Accelerometer100MgWaveform);

fn split_triples(samples: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let x = samples.iter().step_by(3).copied().collect();
    let y = samples.iter().skip(1).step_by(3).copied().collect();
    let z = samples.iter().skip(2).step_by(3).copied().collect();
    (x, y, z)
}

pub fn parse_accelerometer_waveform(payload: &[u8]) -> Result<Record, LinkError> {
    assert_length(MessageId::AccelerometerPacket, payload, 84, false)?;
    let header = parse_header(payload);
    let samples = decode_sequence(&payload[9..], 15, 10, SampleMode::Shifted, 60);
    let (accel_x, accel_y, accel_z) = split_triples(&samples);
    Ok(Record::Accelerometer(AccelerometerWaveform { header, accel_x, accel_y, accel_z }))
}

pub fn parse_accelerometer_100mg_waveform(payload: &[u8]) -> Result<Record, LinkError> {
    assert_length(MessageId::Accelerometer100MgPacket, payload, 84, false)?;
    let header = parse_header(payload);
    let samples: Vec<f64> = decode_sequence(&payload[9..], 15, 10, SampleMode::Signed, 60)
        .into_iter()
        .map(|v| v * 0.1)
        .collect();
    let (accel_x, accel_y, accel_z) = split_triples(&samples);
    Ok(Record::Accelerometer100Mg(Accelerometer100MgWaveform { header, accel_x, accel_y, accel_z }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtoR {
    pub header: Header,
    pub values: Vec<f64>,
}
as_map_impl!(RtoR { values });

pub fn parse_rtor(payload: &[u8]) -> Result<Record, LinkError> {
    assert_length(MessageId::RtoRPacket, payload, 45, false)?;
    let header = parse_header(payload);
    let values = payload[9..].chunks_exact(2).map(|c| parse_num(c, true, None)).collect();
    Ok(Record::RtoR(RtoR { header, values }))
}

/// Known event codes, per the device's event table; unrecognized codes are
/// carried through as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventCode {
    ButtonPress,
    EmergencyButtonPress,
    BatteryLevelLow,
    SelfTestResult,
    RogChange,
    WornStatusChange,
    HrReliabilityChange,
    FallDetected,
    JumpDetected,
    DashDetected,
    Other(u16),
}

impl EventCode {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0040 => EventCode::ButtonPress,
            0x0041 => EventCode::EmergencyButtonPress,
            0x0080 => EventCode::BatteryLevelLow,
            0x00C0 => EventCode::SelfTestResult,
            0x1000 => EventCode::RogChange,
            0x1040 => EventCode::WornStatusChange,
            0x1080 => EventCode::HrReliabilityChange,
            0x10C0 => EventCode::FallDetected,
            0x1100 => EventCode::JumpDetected,
            0x1140 => EventCode::DashDetected,
            other => EventCode::Other(other),
        }
    }

    pub fn as_str(&self) -> String {
        match self {
            EventCode::ButtonPress => "button press".to_string(),
            EventCode::EmergencyButtonPress => "emergency button press".to_string(),
            EventCode::BatteryLevelLow => "battery level low".to_string(),
            EventCode::SelfTestResult => "self test result".to_string(),
            EventCode::RogChange => "ROG change".to_string(),
            EventCode::WornStatusChange => "worn status change".to_string(),
            EventCode::HrReliabilityChange => "HR reliability change".to_string(),
            EventCode::FallDetected => "fall detected".to_string(),
            EventCode::JumpDetected => "jump detected".to_string(),
            EventCode::DashDetected => "dash detected".to_string(),
            EventCode::Other(code) => format!("unknown:{code}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub header: Header,
    pub event_code: EventCode,
    pub event_data: Vec<u8>,
}

impl Event {
    pub fn as_map(&self) -> BTreeMap<String, FieldValue> {
        let mut m = BTreeMap::new();
        m.insert("seq_no".to_string(), FieldValue::Number(self.header.seq_no as f64));
        m.insert("stamp".to_string(), FieldValue::Number(self.header.stamp));
        m.insert("event".to_string(), FieldValue::Text(self.event_code.as_str()));
        m
    }
}

pub fn parse_event(payload: &[u8]) -> Result<Record, LinkError> {
    assert_length(MessageId::EventPacket, payload, 11, true)?;
    let header = parse_header(payload);
    let code = parse_num(&payload[9..11], false, None) as u16;
    Ok(Record::Event(Event {
        header,
        event_code: EventCode::from_code(code),
        event_data: payload[11..].to_vec(),
    }))
}

/// Dispatch a decoded payload to the parser for its message id.
pub fn parse_payload(msgid: MessageId, payload: &[u8]) -> Result<Record, LinkError> {
    use MessageId::*;
    match msgid {
        GeneralDataPacket => parse_general_data(payload),
        SummaryDataPacket => {
            if payload.len() < 10 {
                return Err(LinkError::Parse { msgid, reason: "summary payload too short to carry a version byte".into() });
            }
            match payload[9] {
                2 => parse_summary_v2(payload),
                3 => parse_summary_v3(payload),
                other => Err(LinkError::Parse { msgid, reason: format!("unsupported summary data version {other}") }),
            }
        }
        EcgWaveformPacket => parse_ecg_waveform(payload),
        BreathingWaveformPacket => parse_breathing_waveform(payload),
        AccelerometerPacket => parse_accelerometer_waveform(payload),
        Accelerometer100MgPacket => parse_accelerometer_100mg_waveform(payload),
        RtoRPacket => parse_rtor(payload),
        EventPacket => parse_event(payload),
        other => Ok(parse_raw(other, payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(seq: u8, year: u16, month: u8, day: u8, ms: u32) -> Vec<u8> {
        let mut v = vec![seq];
        v.extend_from_slice(&year.to_le_bytes());
        v.push(month);
        v.push(day);
        v.extend_from_slice(&ms.to_le_bytes());
        v
    }

    #[test]
    fn general_data_rejects_wrong_length() {
        let err = parse_general_data(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, LinkError::Parse { .. }));
    }

    #[test]
    fn general_data_all_sentinels_are_nan() {
        let mut payload = header_bytes(0, 2024, 1, 1, 0);
        payload.extend_from_slice(&[0xFF; 44]);
        let record = parse_general_data(&payload).unwrap();
        if let Record::General(g) = record {
            assert!(g.heart_rate.is_nan());
            assert!(g.skin_temperature.is_nan());
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn ecg_all_zero_payload_yields_63_missing_samples() {
        let mut payload = header_bytes(0, 2024, 1, 1, 0);
        payload.extend_from_slice(&[0u8; 79]);
        let record = parse_ecg_waveform(&payload).unwrap();
        if let Record::Ecg(ecg) = record {
            assert_eq!(ecg.samples.len(), 63);
            assert!(ecg.samples.iter().all(|v| v.is_nan()));
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn breathing_waveform_length() {
        let mut payload = header_bytes(0, 2024, 1, 1, 0);
        payload.extend_from_slice(&[0u8; 23]);
        let record = parse_breathing_waveform(&payload).unwrap();
        if let Record::Breathing(b) = record {
            assert_eq!(b.samples.len(), 18);
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn accelerometer_waveform_triple_lengths() {
        let mut payload = header_bytes(0, 2024, 1, 1, 0);
        payload.extend_from_slice(&[0u8; 75]);
        let record = parse_accelerometer_waveform(&payload).unwrap();
        if let Record::Accelerometer(a) = record {
            assert_eq!(a.accel_x.len(), 20);
            assert_eq!(a.accel_y.len(), 20);
            assert_eq!(a.accel_z.len(), 20);
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn rtor_length_and_signedness() {
        let mut payload = header_bytes(0, 2024, 1, 1, 0);
        // one value = -2 (0xFFFE little-endian), rest zero
        payload.extend_from_slice(&[0xFE, 0xFF]);
        payload.extend_from_slice(&[0u8; 34]);
        let record = parse_rtor(&payload).unwrap();
        if let Record::RtoR(r) = record {
            assert_eq!(r.values.len(), 18);
            assert_eq!(r.values[0], -2.0);
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn event_maps_known_code() {
        let mut payload = header_bytes(0, 2024, 1, 1, 0);
        payload.extend_from_slice(&0x0040u16.to_le_bytes());
        let record = parse_event(&payload).unwrap();
        if let Record::Event(e) = record {
            assert_eq!(e.event_code, EventCode::ButtonPress);
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn event_unknown_code_is_preserved() {
        assert_eq!(EventCode::from_code(0x1234), EventCode::Other(0x1234));
    }

    #[test]
    fn summary_v3_gps_and_accel_blocks_decode() {
        let mut payload = header_bytes(0, 2024, 1, 1, 0);
        payload.push(3); // version
        payload.extend_from_slice(&[0u8; 61]); // fields through core temp + gps + speed + accel = 61 bytes
        assert_eq!(payload.len(), 71);
        let record = parse_summary_v3(&payload).unwrap();
        assert!(matches!(record, Record::SummaryV3(_)));
    }

    #[test]
    fn summary_version_byte_selects_variant() {
        let mut v2 = header_bytes(0, 2024, 1, 1, 0);
        v2.push(2);
        v2.extend_from_slice(&[0u8; 61]);
        assert!(matches!(parse_payload(MessageId::SummaryDataPacket, &v2).unwrap(), Record::SummaryV2(_)));

        let mut bad = header_bytes(0, 2024, 1, 1, 0);
        bad.push(9);
        bad.extend_from_slice(&[0u8; 61]);
        assert!(parse_payload(MessageId::SummaryDataPacket, &bad).is_err());
    }
}
