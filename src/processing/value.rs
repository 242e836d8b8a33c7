//! Human-readable rendering of raw cell values.

/// Best-effort decoding of a raw value for display.
///
/// Eight-byte values are read as a big-endian `u64` (the common encoding of counters), anything
/// else as UTF-8, falling back to lowercase hex.
pub fn decode_value(raw: &[u8]) -> String {
    if let Ok(bytes) = <[u8; 8]>::try_from(raw) {
        return u64::from_be_bytes(bytes).to_string();
    }
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => raw.iter().map(|b| format!("{b:02x}")).collect(),
    }
}
