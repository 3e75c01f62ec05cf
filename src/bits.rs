/*!
  Access to arbitrary inclusive bit ranges of a little-endian byte buffer. Every instruction
  layout in `bytecode::binary` is expressed in terms of these two functions.

  A field may be at most 57 bits wide and is read from (or written to) the seven bytes starting
  at `start / 8`, so any field whose last bit lies within those seven bytes is reachable.

  `set_bits` ORs the new value into place without first clearing the range. Callers must hand
  it a zeroed buffer and must never write two fields that share a bit; `binary::encode` checks
  the first half of that contract on entry.
*/

/// Widest field that fits in the seven byte window.
pub const MAX_FIELD_WIDTH: usize = 57;

const WINDOW_BYTES: usize = 7;

fn field_mask(start: usize, end: usize) -> u64 {
  debug_assert!(end >= start && end - start < MAX_FIELD_WIDTH);
  !(u64::max_value() << (end - start + 1))
}

fn read_window(buffer: &[u8], first_byte: usize) -> u64 {
  buffer[first_byte..]
    .iter()
    .take(WINDOW_BYTES)
    .enumerate()
    .fold(0u64, |window, (i, byte)| window | (*byte as u64) << (i * 8))
}

/**
  Reads bits `start..=end`. A range whose last bit lies beyond the buffer reads as zero, which
  lets the decoder probe optional trailing fields of variable-length instructions.
*/
pub fn get_bits(buffer: &[u8], start: usize, end: usize) -> u64 {
  if end / 8 >= buffer.len() {
    return 0;
  }
  let window = read_window(buffer, start / 8);
  (window >> (start % 8)) & field_mask(start, end)
}

/**
  ORs `value` (truncated to the field width) into bits `start..=end`. Silently does nothing if
  either end of the range lies beyond the buffer.
*/
pub fn set_bits(buffer: &mut [u8], start: usize, end: usize, value: u64) {
  if start / 8 >= buffer.len() || end / 8 >= buffer.len() {
    return;
  }
  let first_byte = start / 8;
  let window = read_window(buffer, first_byte) | (value & field_mask(start, end)) << (start % 8);

  for (i, byte) in buffer[first_byte..].iter_mut().take(WINDOW_BYTES).enumerate() {
    *byte = (window >> (i * 8)) as u8;
  }
}

/// Sign-extends the low `width` bits of `value`.
pub fn sign_extend(value: u64, width: usize) -> i64 {
  let unused = 64 - width;
  ((value << unused) as i64) >> unused
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reads_fields_across_byte_boundaries() {
    let bytes = [0x45, 0x31, 0x12, 0x05, 0x20, 0xC8, 0xF2, 0x00];
    assert_eq!(get_bits(&bytes, 0, 6), 0x45);
    assert_eq!(get_bits(&bytes, 7, 9), 2);
    assert_eq!(get_bits(&bytes, 10, 15), 12);
    assert_eq!(get_bits(&bytes, 42, 43), 2);
    assert_eq!(get_bits(&bytes, 52, 55), 0xF);
    assert_eq!(get_bits(&bytes, 56, 63), 0);
  }

  #[test]
  fn out_of_range_reads_are_zero() {
    let bytes = [0xFF, 0xFF];
    assert_eq!(get_bits(&bytes, 16, 31), 0);
    assert_eq!(get_bits(&bytes, 8, 23), 0);
    assert_eq!(get_bits(&bytes, 8, 15), 0xFF);
  }

  #[test]
  fn writes_are_or_merged_and_bounded() {
    let mut bytes = [0u8; 4];
    set_bits(&mut bytes, 7, 8, 2);
    set_bits(&mut bytes, 9, 14, 12);
    set_bits(&mut bytes, 16, 31, 0x1_0001); // truncated to 16 bits
    assert_eq!(bytes, [0x00, 0x19, 0x01, 0x00]);

    set_bits(&mut bytes, 30, 33, 0xF);
    assert_eq!(bytes, [0x00, 0x19, 0x01, 0x00]);
  }

  #[test]
  fn wide_fields_survive_a_write_read_cycle() {
    let mut bytes = [0u8; 8];
    set_bits(&mut bytes, 16, 47, 0xDEAD_BEEF);
    assert_eq!(get_bits(&bytes, 16, 47), 0xDEAD_BEEF);
    assert_eq!(sign_extend(0xFFF, 12), -1);
    assert_eq!(sign_extend(0x7FF, 12), 2047);
  }
}
