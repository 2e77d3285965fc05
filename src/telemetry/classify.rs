//! Warning classification: a pure function of `(name, value)` (§4.6).
//! The relay treats the actual thresholds as a domain-specific,
//! opaque collaborator — this is a representative stand-in with the
//! documented default-to-zero behavior for unknown sensors.

/// Returns `warning ∈ {0,1,2}`. Unknown sensor names default to 0.
pub fn classify(name: &str, value: f64) -> u8 {
  match name {
    "temperature" => {
      if value >= 85.0 {
        2
      } else if value >= 65.0 {
        1
      } else {
        0
      }
    }
    "voltage" => {
      if !(10.5..=13.5).contains(&value) {
        2
      } else if !(11.0..=13.0).contains(&value) {
        1
      } else {
        0
      }
    }
    "rpm" => {
      if value >= 8000.0 {
        2
      } else if value >= 6500.0 {
        1
      } else {
        0
      }
    }
    _ => 0,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_sensor_defaults_to_zero() {
    assert_eq!(classify("frobnicator", 1e9), 0);
  }

  #[test]
  fn temperature_thresholds() {
    assert_eq!(classify("temperature", 50.0), 0);
    assert_eq!(classify("temperature", 70.0), 1);
    assert_eq!(classify("temperature", 90.0), 2);
  }
}
