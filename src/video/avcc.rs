//! MPEG-4 Part 15 `avcC` configuration record and Annex B NAL
//! scanning, used to build the video channel's sticky config frame
//! (§4.4, §9).

/// NAL unit types carrying SPS/PPS in an Annex B bitstream.
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;

/// Builds an `avcC` record:
/// `[0x01][profile][compat][level][0xFF][0xE1][sps_len:2][sps][0x01][pps_len:2][pps]`.
/// Only a single SPS/PPS pair is supported, matching what the upstream
/// decoder ever hands the relay in practice.
pub fn build_avcc(sps: &[u8], pps: &[u8]) -> Vec<u8> {
  let mut out = Vec::with_capacity(11 + sps.len() + pps.len());
  out.push(0x01);
  out.push(sps.get(1).copied().unwrap_or(0));
  out.push(sps.get(2).copied().unwrap_or(0));
  out.push(sps.get(3).copied().unwrap_or(0));
  out.push(0xFF);
  out.push(0xE1);
  out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
  out.extend_from_slice(sps);
  out.push(0x01);
  out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
  out.extend_from_slice(pps);
  out
}

/// Scans an Annex B access unit for SPS and PPS NAL units, accepting
/// both 3-byte (`00 00 01`) and 4-byte (`00 00 00 01`) start codes —
/// the original scanner only recognized the 4-byte form and silently
/// dropped streams muxed with the shorter one.
pub fn find_sps_pps(access_unit: &[u8]) -> (Option<&[u8]>, Option<&[u8]>) {
  let starts = start_code_offsets(access_unit);
  let mut sps = None;
  let mut pps = None;

  for (i, &(start, code_len)) in starts.iter().enumerate() {
    let nal_start = start + code_len;
    if nal_start >= access_unit.len() {
      continue;
    }
    let nal_end = starts
      .get(i + 1)
      .map(|&(next, _)| next)
      .unwrap_or(access_unit.len());
    let nal = &access_unit[nal_start..nal_end];
    let Some(&header) = nal.first() else { continue };
    match header & 0x1F {
      NAL_TYPE_SPS => sps = Some(nal),
      NAL_TYPE_PPS => pps = Some(nal),
      _ => {}
    }
  }

  (sps, pps)
}

/// Returns `(offset, start_code_len)` for every start code found.
fn start_code_offsets(data: &[u8]) -> Vec<(usize, usize)> {
  let mut offsets = Vec::new();
  let mut i = 0;
  while i + 3 <= data.len() {
    if data[i] == 0 && data[i + 1] == 0 {
      if data[i + 2] == 1 {
        offsets.push((i, 3));
        i += 3;
        continue;
      }
      if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
        offsets.push((i, 4));
        i += 4;
        continue;
      }
    }
    i += 1;
  }
  offsets
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builds_avcc_record_layout() {
    let sps = [0x67, 0x42, 0x00, 0x1E, 0xAB, 0xCD];
    let pps = [0x68, 0xCE, 0x3C, 0x80];
    let record = build_avcc(&sps, &pps);

    assert_eq!(record[0], 0x01);
    assert_eq!(&record[1..4], &[0x42, 0x00, 0x1E]);
    assert_eq!(record[4], 0xFF);
    assert_eq!(record[5], 0xE1);
    assert_eq!(u16::from_be_bytes([record[6], record[7]]), sps.len() as u16);
    assert_eq!(&record[8..8 + sps.len()], &sps[..]);
    let after_sps = 8 + sps.len();
    assert_eq!(record[after_sps], 0x01);
    assert_eq!(
      u16::from_be_bytes([record[after_sps + 1], record[after_sps + 2]]),
      pps.len() as u16
    );
  }

  #[test]
  fn finds_sps_pps_with_three_byte_start_codes() {
    let mut unit = vec![0, 0, 1, 0x67, 0xAA, 0xBB];
    unit.extend_from_slice(&[0, 0, 1, 0x68, 0xCC, 0xDD]);
    unit.extend_from_slice(&[0, 0, 1, 0x65, 0x01, 0x02]);

    let (sps, pps) = find_sps_pps(&unit);
    assert_eq!(sps, Some(&[0x67, 0xAA, 0xBB][..]));
    assert_eq!(pps, Some(&[0x68, 0xCC, 0xDD][..]));
  }

  #[test]
  fn finds_sps_pps_with_four_byte_start_codes() {
    let mut unit = vec![0, 0, 0, 1, 0x67, 0xAA];
    unit.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xCC]);

    let (sps, pps) = find_sps_pps(&unit);
    assert_eq!(sps, Some(&[0x67, 0xAA][..]));
    assert_eq!(pps, Some(&[0x68, 0xCC][..]));
  }

  #[test]
  fn missing_nals_yield_none() {
    let unit = [0, 0, 1, 0x65, 0x01];
    let (sps, pps) = find_sps_pps(&unit);
    assert!(sps.is_none());
    assert!(pps.is_none());
  }
}
