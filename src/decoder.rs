//! Parsers for the standard GATT notifications this app subscribes to.
//!
//! Both decoders are purely syntactic: they never judge whether a value is
//! physiologically plausible, they only refuse to read past the end of a payload.

use std::collections::BTreeMap;

use thiserror::Error;
use uuid::Uuid;

use crate::metrics::Metric;

pub const FITNESS_MACHINE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x00001826_0000_1000_8000_00805f9b34fb);
pub const INDOOR_BIKE_DATA_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002ad2_0000_1000_8000_00805f9b34fb);

pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
pub const HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

// Recognised while scanning, never subscribed to
pub const CYCLING_POWER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x00001818_0000_1000_8000_00805f9b34fb);

/// (service, measurement characteristic) pairs a session subscribes to.
pub const SUBSCRIBED_CHARACTERISTICS: [(Uuid, Uuid); 2] = [
    (
        FITNESS_MACHINE_SERVICE_UUID,
        INDOOR_BIKE_DATA_CHARACTERISTIC_UUID,
    ),
    (
        HEART_RATE_SERVICE_UUID,
        HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID,
    ),
];

pub const FITNESS_SERVICE_UUIDS: [Uuid; 3] = [
    FITNESS_MACHINE_SERVICE_UUID,
    HEART_RATE_SERVICE_UUID,
    CYCLING_POWER_SERVICE_UUID,
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,
    #[error("payload truncated reading {field}: needed {needed} bytes, got {len}")]
    Truncated {
        field: &'static str,
        needed: usize,
        len: usize,
    },
}

/// Little-endian reader that only ever moves forward.
struct FieldCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FieldCursor<'a> {
    fn new(data: &'a [u8], offset: usize) -> Self {
        Self { data, offset }
    }

    fn take(&mut self, field: &'static str, width: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.offset + width;
        let bytes = self.data.get(self.offset..end).ok_or(DecodeError::Truncated {
            field,
            needed: end,
            len: self.data.len(),
        })?;
        self.offset = end;
        Ok(bytes)
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        let bytes = self.take(field, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u24(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        let bytes = self.take(field, 3)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]))
    }
}

/// Heart Rate Measurement (0x2A37).
///
/// Flag bit 0 selects a u16 value at offsets 1-2, otherwise the u8 at offset 1 is used.
pub fn decode_heart_rate(data: &[u8]) -> Result<f64, DecodeError> {
    let flags = *data.first().ok_or(DecodeError::Empty)?;
    let mut cursor = FieldCursor::new(data, 1);
    let bpm = if flags & 0x01 != 0 {
        cursor.u16("heart_rate")?
    } else {
        u16::from(cursor.take("heart_rate", 1)?[0])
    };
    Ok(f64::from(bpm))
}

#[derive(Clone, Copy)]
enum Width {
    U16,
    U24,
}

/// Flag bit, field, width and divisor, in the order fields appear on the wire.
const INDOOR_BIKE_FIELDS: [(u8, Metric, Width, f64); 7] = [
    (1, Metric::AvgSpeed, Width::U16, 100.0),
    (2, Metric::Cadence, Width::U16, 2.0),
    (3, Metric::AvgCadence, Width::U16, 2.0),
    (4, Metric::Distance, Width::U24, 1.0),
    (5, Metric::Resistance, Width::U16, 1.0),
    (6, Metric::Power, Width::U16, 1.0),
    (7, Metric::AvgPower, Width::U16, 1.0),
];

/// Indoor Bike Data (0x2AD2).
///
/// Byte 0 carries the presence flags. Bytes 0-1 are skipped as a unit (flags and the
/// mandatory speed slot this decoder ignores), so optional fields start at offset 2.
/// Every set bit both marks a field present and advances the cursor by its width.
pub fn decode_indoor_bike_data(data: &[u8]) -> Result<BTreeMap<Metric, f64>, DecodeError> {
    let flags = *data.first().ok_or(DecodeError::Empty)?;
    if data.len() < 2 {
        return Err(DecodeError::Truncated {
            field: "flags",
            needed: 2,
            len: data.len(),
        });
    }

    let mut cursor = FieldCursor::new(data, 2);
    let mut metrics = BTreeMap::new();
    for (bit, metric, width, divisor) in INDOOR_BIKE_FIELDS {
        if flags & (1 << bit) == 0 {
            continue;
        }
        let field = metric.as_str();
        let raw = match width {
            Width::U16 => u32::from(cursor.u16(field)?),
            Width::U24 => cursor.u24(field)?,
        };
        metrics.insert(metric, f64::from(raw) / divisor);
    }
    Ok(metrics)
}

/// Decodes a notification by the characteristic it came from.
///
/// `Ok(None)` means the characteristic isn't one we understand.
pub fn decode_notification(
    characteristic: Uuid,
    data: &[u8],
) -> Result<Option<BTreeMap<Metric, f64>>, DecodeError> {
    if characteristic == HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID {
        let bpm = decode_heart_rate(data)?;
        Ok(Some(BTreeMap::from([(Metric::HeartRate, bpm)])))
    } else if characteristic == INDOOR_BIKE_DATA_CHARACTERISTIC_UUID {
        decode_indoor_bike_data(data).map(Some)
    } else {
        Ok(None)
    }
}
