//! Little-endian byte and bit-packing decoders shared by the payload parsers.

use super::bits::reverse_bytes;

/// Parse a little-endian unsigned (or two's-complement signed) integer from
/// up to 4 bytes, optionally mapping a sentinel "invalid" value to NaN.
///
/// Mirrors the device's own parser: the sentinel substitution happens on the
/// *unsigned* accumulated value, before two's-complement conversion is
/// applied (a sentinel is defined in terms of the raw encoding, not the
/// decoded signed value).
pub fn parse_num(bytes: &[u8], signed: bool, inval: Option<u32>) -> f64 {
    assert!(!bytes.is_empty() && bytes.len() <= 4, "num_bytes must be 1..=4");
    let mut num: u32 = 0;
    for &b in bytes.iter().rev() {
        num = num * 256 + b as u32;
    }
    if let Some(inval) = inval {
        if num == inval {
            return f64::NAN;
        }
    }
    let top = bytes[bytes.len() - 1];
    if signed && top > 127 {
        (num as i64 - (1i64 << (8 * bytes.len()))) as f64
    } else {
        num as f64
    }
}

/// Little-endian bit-stream reader over a byte slice whose bytes have
/// already been bit-reversed (per the BHT packing convention: the stream
/// reads LSB-first across the whole reversed buffer).
pub struct BitReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, cursor: 0 }
    }

    fn bit(&self, index: usize) -> u64 {
        let byte = self.bytes[index / 8];
        ((byte >> (index % 8)) & 1) as u64
    }

    /// Read `width` bits as an unsigned little-endian value and advance the cursor.
    pub fn read_u(&mut self, width: u32) -> u64 {
        let mut value: u64 = 0;
        for k in 0..width as usize {
            value |= self.bit(self.cursor + k) << k;
        }
        self.cursor += width as usize;
        value
    }

    /// Read `width` bits as a two's-complement signed value.
    pub fn read_s(&mut self, width: u32) -> i64 {
        let raw = self.read_u(width);
        sign_extend(raw, width)
    }

    /// Read `width` bits as a "shifted" sample: `raw - 2^(width-1)`, with raw
    /// `0` reserved to mean "missing".
    pub fn read_shifted(&mut self, width: u32) -> f64 {
        let raw = self.read_u(width);
        if raw == 0 {
            f64::NAN
        } else {
            raw as f64 - (1u64 << (width - 1)) as f64
        }
    }
}

/// Little-endian bit-stream writer, the inverse of [`BitReader`]: bits are
/// packed LSB-first into a byte buffer that, once bit-reversed per byte,
/// is the device's own on-wire encoding.
pub struct BitWriter {
    bits: Vec<u8>,
}

impl BitWriter {
    pub fn new() -> Self {
        Self { bits: Vec::new() }
    }

    /// Write the low `width` bits of `value`.
    pub fn write_u(&mut self, value: u64, width: u32) {
        for k in 0..width as usize {
            self.bits.push(((value >> k) & 1) as u8);
        }
    }

    /// Write `value` as a two's-complement field of `width` bits.
    pub fn write_s(&mut self, value: i64, width: u32) {
        let mask = (1u64 << width) - 1;
        self.write_u((value as u64) & mask, width);
    }

    /// Pack the written bits into bytes (zero-padded to a byte boundary),
    /// then bit-reverse each byte to produce the on-wire encoding.
    pub fn finish(self) -> Vec<u8> {
        let nbytes = self.bits.len().div_ceil(8);
        let mut bytes = vec![0u8; nbytes];
        for (i, &bit) in self.bits.iter().enumerate() {
            bytes[i / 8] |= bit << (i % 8);
        }
        reverse_bytes(&bytes)
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn sign_extend(raw: u64, width: u32) -> i64 {
    let half = 1i64 << (width - 1);
    let signed = raw as i64;
    if signed >= half {
        signed - (1i64 << width)
    } else {
        signed
    }
}

/// How successive fixed-width samples in a bit-packed chunk are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    Unsigned,
    Signed,
    Shifted,
}

/// Decode a bit-packed waveform, chunk by chunk.
///
/// `bytes_per_chunk` bytes hold `bytes_per_chunk * 8 / bits_per_val` samples;
/// the device packs the whole payload as a sequence of such chunks, and the
/// final chunk of a payload may carry fewer than the nominal count — tracked
/// here via `total_values` so the decoder never reads past what was asked
/// for, regardless of how much zero padding trails the raw bytes.
pub fn decode_sequence(
    data: &[u8],
    bytes_per_chunk: usize,
    bits_per_val: u32,
    mode: SampleMode,
    total_values: usize,
) -> Vec<f64> {
    let vals_per_chunk = (bytes_per_chunk * 8) / bits_per_val as usize;
    let mut out = Vec::with_capacity(total_values);
    let mut values_remaining = total_values;
    let mut offset = 0;
    while values_remaining > 0 && offset < data.len() {
        let end = (offset + bytes_per_chunk).min(data.len());
        let mut chunk = data[offset..end].to_vec();
        if chunk.len() < bytes_per_chunk {
            chunk.resize(bytes_per_chunk, 0);
        }
        let reversed = reverse_bytes(&chunk);
        let mut reader = BitReader::new(&reversed);
        let take = vals_per_chunk.min(values_remaining);
        for _ in 0..take {
            let v = match mode {
                SampleMode::Unsigned => reader.read_u(bits_per_val) as f64,
                SampleMode::Signed => reader.read_s(bits_per_val) as f64,
                SampleMode::Shifted => reader.read_shifted(bits_per_val),
            };
            out.push(v);
        }
        values_remaining -= take;
        offset += bytes_per_chunk;
    }
    out
}

/// Bit-packed GPS position block (bytes 39..49 of a V3 summary payload).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsPosition {
    pub lat_degrees: u64,
    pub lat_minutes: u64,
    pub lat_decimal_minutes: u64,
    pub lat_dir: i64,
    pub long_degrees: u64,
    pub long_minutes: u64,
    pub long_decimal_minutes: u64,
    pub long_dir: i64,
    pub qual_indication: u64,
    pub altitude: u64,
    pub horz_dilution_of_precision: u64,
}

pub fn decode_gps_position(raw: &[u8]) -> GpsPosition {
    let reversed = reverse_bytes(raw);
    let mut r = BitReader::new(&reversed);
    GpsPosition {
        lat_degrees: r.read_u(7),
        lat_minutes: r.read_u(6),
        lat_decimal_minutes: r.read_u(14),
        lat_dir: r.read_s(1),
        long_degrees: r.read_u(8),
        long_minutes: r.read_u(6),
        long_decimal_minutes: r.read_u(14),
        long_dir: r.read_s(1),
        qual_indication: r.read_u(1),
        altitude: r.read_u(15),
        horz_dilution_of_precision: r.read_u(6),
    }
}

/// Inverse of [`decode_gps_position`]: packs field values back into the
/// 10-byte on-wire block.
pub fn encode_gps_position(gps: &GpsPosition) -> [u8; 10] {
    let mut w = BitWriter::new();
    w.write_u(gps.lat_degrees, 7);
    w.write_u(gps.lat_minutes, 6);
    w.write_u(gps.lat_decimal_minutes, 14);
    w.write_s(gps.lat_dir, 1);
    w.write_u(gps.long_degrees, 8);
    w.write_u(gps.long_minutes, 6);
    w.write_u(gps.long_decimal_minutes, 14);
    w.write_s(gps.long_dir, 1);
    w.write_u(gps.qual_indication, 1);
    w.write_u(gps.altitude, 15);
    w.write_u(gps.horz_dilution_of_precision, 6);
    w.finish().try_into().expect("GPS block packs to exactly 10 bytes")
}

/// Bit-packed accelerometry aggregate block (bytes 51..71 of a V3 summary payload).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accelerometry {
    pub impulse_load: u64,
    pub walk_step_count: u64,
    pub run_step_count: u64,
    pub bound_count: u64,
    pub jump_count: u64,
    pub impact_count3g: u64,
    pub impact_count7g: u64,
    pub avg_rate_of_force_development: f64,
    pub avg_step_impulse: f64,
    pub avg_step_period: f64,
    pub last_jump_flight_time: f64,
    pub peak_accel_phi: u64,
    pub peak_accel_theta: i64,
}

pub fn decode_accelerometry(raw: &[u8]) -> Accelerometry {
    let reversed = reverse_bytes(raw);
    let mut r = BitReader::new(&reversed);
    Accelerometry {
        impulse_load: r.read_u(20),
        walk_step_count: r.read_u(18),
        run_step_count: r.read_u(18),
        bound_count: r.read_u(10),
        jump_count: r.read_u(10),
        impact_count3g: r.read_u(10),
        impact_count7g: r.read_u(10),
        avg_rate_of_force_development: r.read_u(12) as f64 * 0.01,
        avg_step_impulse: r.read_u(10) as f64 * 0.01,
        avg_step_period: r.read_u(10) as f64 * 0.001,
        last_jump_flight_time: r.read_u(8) as f64 * 0.01,
        peak_accel_phi: r.read_u(8),
        peak_accel_theta: r.read_s(10),
    }
}

/// Inverse of [`decode_accelerometry`]: packs field values back into the
/// 20-byte on-wire block. The four scaled fields are un-scaled and rounded
/// back to their raw integer encoding before packing.
pub fn encode_accelerometry(accel: &Accelerometry) -> [u8; 20] {
    let mut w = BitWriter::new();
    w.write_u(accel.impulse_load, 20);
    w.write_u(accel.walk_step_count, 18);
    w.write_u(accel.run_step_count, 18);
    w.write_u(accel.bound_count, 10);
    w.write_u(accel.jump_count, 10);
    w.write_u(accel.impact_count3g, 10);
    w.write_u(accel.impact_count7g, 10);
    w.write_u((accel.avg_rate_of_force_development / 0.01).round() as u64, 12);
    w.write_u((accel.avg_step_impulse / 0.01).round() as u64, 10);
    w.write_u((accel.avg_step_period / 0.001).round() as u64, 10);
    w.write_u((accel.last_jump_flight_time / 0.01).round() as u64, 8);
    w.write_u(accel.peak_accel_phi, 8);
    w.write_s(accel.peak_accel_theta, 10);
    w.finish().try_into().expect("accelerometry block packs to exactly 20 bytes")
}
