/// XORs `payload` in place with `key`, repeating the 4-byte key as needed.
///
/// Processes the buffer a `usize` at a time where alignment allows,
/// falling back to byte-at-a-time for the remainder.
pub fn unmask(payload: &mut [u8], key: [u8; 4]) {
  let (prefix, middle, suffix) = unsafe { payload.align_to_mut::<usize>() };

  for (i, byte) in prefix.iter_mut().enumerate() {
    *byte ^= key[i % 4];
  }

  // `middle` starts `prefix.len()` bytes into the logical key stream,
  // so the word-sized key must be rotated by that offset or every
  // word in a non-4-aligned payload gets XORed against the wrong
  // phase of the key.
  let offset = prefix.len() % 4;
  let mut wide_key = [0u8; 8];
  for i in 0..8 {
    wide_key[i] = key[(offset + i) % 4];
  }
  let wide_key = usize::from_ne_bytes(
    wide_key[..std::mem::size_of::<usize>()].try_into().unwrap(),
  );

  for word in middle.iter_mut() {
    *word ^= wide_key;
  }

  for (i, byte) in suffix.iter_mut().enumerate() {
    *byte ^= key[(offset + i) % 4];
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unmasks_short_payload() {
    let mut payload = [0x7F, 0x9F, 0x4D, 0x51, 0x58];
    let key = [0x37, 0xFA, 0x21, 0x3D];
    unmask(&mut payload, key);
    assert_eq!(&payload, b"Hello");
  }

  #[test]
  fn unmasks_long_payload_crossing_word_boundary() {
    let original = b"the quick brown fox jumps over the lazy dog 0123456789";
    let key = [0x11, 0x22, 0x33, 0x44];
    let mut masked: Vec<u8> = original
      .iter()
      .enumerate()
      .map(|(i, b)| b ^ key[i % 4])
      .collect();
    unmask(&mut masked, key);
    assert_eq!(masked.as_slice(), &original[..]);
  }

  #[test]
  fn unmasks_payload_at_non_aligned_offset() {
    // Mimic a masked control frame, where the payload begins a few
    // bytes into a larger buffer and so is not 4-aligned on entry —
    // `align_to_mut` then yields a non-empty, non-multiple-of-4 prefix.
    let original = b"the quick brown fox jumps over the lazy dog 0123456789";
    let key = [0x11, 0x22, 0x33, 0x44];
    let masked: Vec<u8> = original
      .iter()
      .enumerate()
      .map(|(i, b)| b ^ key[i % 4])
      .collect();

    for pad in 1..8 {
      let mut buf = vec![0u8; pad];
      buf.extend_from_slice(&masked);
      unmask(&mut buf[pad..], key);
      assert_eq!(&buf[pad..], &original[..], "pad={pad}");
    }
  }
}
