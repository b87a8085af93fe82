//! Length-prefixed binary helpers shared by the snapshot formats.
//!
//! Every integer is written as a 4-byte big-endian value and every byte string is prefixed
//! with its length. Workflows can use the same helpers to encode their own snapshot bytes.

use bytes::{Buf, BufMut, Bytes};

use crate::error::CoreError;

/// Write a 4-byte big-endian length followed by `bytes`.
///
/// # Panics
///
/// Panics if `bytes` is longer than `u32::MAX`.
pub fn put_bytes_with_length(buf: &mut impl BufMut, bytes: &[u8]) {
  let len = u32::try_from(bytes.len()).expect("snapshot segment exceeds u32::MAX bytes");
  buf.put_u32(len);
  buf.put_slice(bytes);
}

/// Write a length-prefixed UTF-8 string.
pub fn put_utf8_with_length(buf: &mut impl BufMut, value: &str) {
  put_bytes_with_length(buf, value.as_bytes());
}

/// Read a 4-byte big-endian unsigned integer.
pub fn get_u32(buf: &mut impl Buf) -> Result<u32, CoreError> {
  if buf.remaining() < 4 {
    return Err(CoreError::malformed(format!(
      "expected 4 bytes for an integer, found {}",
      buf.remaining()
    )));
  }
  Ok(buf.get_u32())
}

/// Read a single byte.
pub fn get_u8(buf: &mut impl Buf) -> Result<u8, CoreError> {
  if !buf.has_remaining() {
    return Err(CoreError::malformed("expected 1 byte, found end of input"));
  }
  Ok(buf.get_u8())
}

/// Read a length-prefixed byte string without copying.
pub fn get_bytes_with_length(buf: &mut Bytes) -> Result<Bytes, CoreError> {
  let len = get_u32(buf)? as usize;
  if buf.remaining() < len {
    return Err(CoreError::malformed(format!(
      "segment declares {} bytes but only {} remain",
      len,
      buf.remaining()
    )));
  }
  Ok(buf.split_to(len))
}

/// Read a length-prefixed UTF-8 string.
pub fn get_utf8_with_length(buf: &mut Bytes) -> Result<String, CoreError> {
  let bytes = get_bytes_with_length(buf)?;
  String::from_utf8(bytes.to_vec())
    .map_err(|e| CoreError::malformed(format!("invalid utf-8 in string segment: {}", e)))
}

/// Fail if any bytes are left over after a complete value was read.
pub(crate) fn expect_exhausted(buf: &Bytes, what: &str) -> Result<(), CoreError> {
  if buf.has_remaining() {
    return Err(CoreError::malformed(format!(
      "{} trailing bytes after {}",
      buf.remaining(),
      what
    )));
  }
  Ok(())
}
