//! Inbound sensor payload decoding
//!
//! Devices publish `{"i": id, "d": height, "t": temperature, "b": battery,
//! "rssi": .., "snr": ..}`. Gateways are inconsistent about quoting, so ids
//! may be strings or integers and numeric fields may arrive as strings.

use chrono::{DateTime, Utc};
use riverwatch_core::{DeviceId, SensorReading};
use serde::Deserialize;

/// Payload rejected before any processing
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Number(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    i: RawId,
    d: RawNumber,
    t: RawNumber,
    b: RawNumber,
    rssi: RawNumber,
    snr: RawNumber,
}

fn device_id(raw: RawId) -> Result<DeviceId, DecodeError> {
    let id = match raw {
        RawId::Text(s) => s.trim().to_string(),
        RawId::Signed(n) => n.to_string(),
        RawId::Unsigned(n) => n.to_string(),
    };
    if id.is_empty() {
        return Err(DecodeError::InvalidField {
            field: "i",
            reason: "empty device id".to_string(),
        });
    }
    Ok(DeviceId::new(id))
}

fn number(field: &'static str, raw: RawNumber) -> Result<f64, DecodeError> {
    let value = match raw {
        RawNumber::Number(n) => n,
        RawNumber::Text(s) => s.trim().parse::<f64>().map_err(|e| DecodeError::InvalidField {
            field,
            reason: e.to_string(),
        })?,
    };
    if !value.is_finite() {
        return Err(DecodeError::InvalidField {
            field,
            reason: "not a finite number".to_string(),
        });
    }
    Ok(value)
}

/// Decode one message, stamping it with `observed_at`
pub fn decode_reading(bytes: &[u8], observed_at: DateTime<Utc>) -> Result<SensorReading, DecodeError> {
    let raw: RawPayload = serde_json::from_slice(bytes)?;
    Ok(SensorReading {
        device_id: device_id(raw.i)?,
        height: number("d", raw.d)?,
        temperature: number("t", raw.t)?,
        battery: number("b", raw.b)?,
        rssi: number("rssi", raw.rssi)?,
        snr: number("snr", raw.snr)?,
        observed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_payload() {
        let now = Utc::now();
        let reading = decode_reading(
            br#"{"i":"U1","d":123.4,"t":22.5,"b":3.9,"rssi":-97,"snr":8.25}"#,
            now,
        )
        .unwrap();

        assert_eq!(reading.device_id.as_str(), "U1");
        assert_eq!(reading.height, 123.4);
        assert_eq!(reading.rssi, -97.0);
        assert_eq!(reading.observed_at, now);
    }

    #[test]
    fn test_decode_lenient_types() {
        let reading = decode_reading(
            br#"{"i":17,"d":"10.5","t":" 20 ","b":4,"rssi":"-101","snr":"7.5"}"#,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(reading.device_id.as_str(), "17");
        assert_eq!(reading.height, 10.5);
        assert_eq!(reading.temperature, 20.0);
    }

    #[test]
    fn test_missing_field_rejected() {
        let err = decode_reading(br#"{"i":"U1","d":1.0,"t":2.0,"b":3.0,"rssi":-90}"#, Utc::now());
        assert!(matches!(err, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_non_numeric_height_rejected() {
        let err = decode_reading(
            br#"{"i":"U1","d":"high","t":2.0,"b":3.0,"rssi":-90,"snr":1}"#,
            Utc::now(),
        );
        assert!(matches!(err, Err(DecodeError::InvalidField { field: "d", .. })));
    }

    #[test]
    fn test_bare_number_rejected() {
        assert!(decode_reading(b"42.0", Utc::now()).is_err());
        assert!(decode_reading(b"not json", Utc::now()).is_err());
    }

    #[test]
    fn test_empty_id_and_nan_rejected() {
        assert!(decode_reading(
            br#"{"i":"  ","d":1,"t":2,"b":3,"rssi":4,"snr":5}"#,
            Utc::now()
        )
        .is_err());
        assert!(decode_reading(
            br#"{"i":"U1","d":"NaN","t":2,"b":3,"rssi":4,"snr":5}"#,
            Utc::now()
        )
        .is_err());
    }
}
