//! Decodes upstream JSON payloads into telemetry records (§4.6).
//!
//! The JSON parser itself is a collaborator interface (§6): this
//! module only shapes `serde_json`'s output into the record type the
//! rest of the pipeline expects.

use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
  Number(f64),
  Text(String),
}

#[derive(Deserialize)]
struct RawRecord {
  title: String,
  value: RawValue,
  timestamp: Option<u64>,
}

/// One `{title,value,timestamp?}` entry, after numeric-string coercion.
pub struct DecodedRecord {
  pub name: String,
  pub value: f64,
  pub timestamp_ns: Option<u64>,
}

/// Decodes a JSON array payload. A record whose `value` is a string
/// that does not parse as a number is dropped rather than failing the
/// whole batch — one malformed sensor reading should not take down
/// telemetry for the rest.
pub fn decode(payload: &[u8]) -> Result<Vec<DecodedRecord>, serde_json::Error> {
  let raws: Vec<RawRecord> = serde_json::from_slice(payload)?;
  Ok(
    raws
      .into_iter()
      .filter_map(|r| {
        let value = match r.value {
          RawValue::Number(n) => n,
          RawValue::Text(s) => s.trim().parse().ok()?,
        };
        Some(DecodedRecord {
          name: r.title,
          value,
          timestamp_ns: r.timestamp,
        })
      })
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decodes_numeric_and_string_values() {
    let payload = br#"[{"title":"temp","value":21.5,"timestamp":100},{"title":"volts","value":"12.2"}]"#;
    let records = decode(payload).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name, "temp");
    assert_eq!(records[0].value, 21.5);
    assert_eq!(records[0].timestamp_ns, Some(100));
    assert_eq!(records[1].value, 12.2);
    assert_eq!(records[1].timestamp_ns, None);
  }

  #[test]
  fn drops_unparseable_string_value() {
    let payload = br#"[{"title":"bad","value":"not-a-number"}]"#;
    let records = decode(payload).unwrap();
    assert!(records.is_empty());
  }
}
