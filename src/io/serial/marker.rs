// src/io/serial/marker.rs
//
// Resolves the operator-entered marker text ("STX", "0x03", "3", "\r\n")
// into the byte sequence the framer searches for.

/// Start-of-text control byte
pub const STX: u8 = 0x02;
/// End-of-text control byte
pub const ETX: u8 = 0x03;

/// Resolve a marker specification into bytes.
///
/// - `""` resolves to no bytes (marker not in use)
/// - `STX` / `ETX` (any case, surrounding whitespace ignored) resolve to 0x02 / 0x03
/// - `0x..` / `0X..` is a single hex byte
/// - all-digit text is a single decimal byte
/// - anything else is the literal text as UTF-8
///
/// Never fails. A hex literal that does not parse into one byte falls back to
/// the literal text, so `"0xZZ"` resolves to the four bytes `0 x Z Z`.
/// Decimal values above 255 also fall back to the literal text; settings
/// validation rejects them before a session starts (see [`check_decimal_range`]).
pub fn resolve(spec: &str) -> Vec<u8> {
    if spec.is_empty() {
        return Vec::new();
    }

    let trimmed = spec.trim();
    if trimmed.eq_ignore_ascii_case("STX") {
        return vec![STX];
    }
    if trimmed.eq_ignore_ascii_case("ETX") {
        return vec![ETX];
    }

    if let Some(digits) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return match parse_hex_byte(digits) {
            Some(b) => vec![b],
            None => spec.as_bytes().to_vec(),
        };
    }

    if is_decimal(trimmed) {
        if let Ok(b) = trimmed.parse::<u8>() {
            return vec![b];
        }
    }

    spec.as_bytes().to_vec()
}

/// Reject decimal markers that do not fit in one byte.
/// Returns the offending value as the error.
pub fn check_decimal_range(spec: &str) -> Result<(), String> {
    let trimmed = spec.trim();
    if is_decimal(trimmed) && trimmed.parse::<u8>().is_err() {
        return Err(format!("decimal value {} does not fit in one byte", trimmed));
    }
    Ok(())
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_hex_byte(digits: &str) -> Option<u8> {
    // from_str_radix accepts a leading '+', which is not a hex literal
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(digits, 16).ok()
}
