//! Strict decimal parsing for numeric event properties.

/// Largest sync percentage value, 100.00 % in hundredths.
pub const MAX_SYNC_PERC: u16 = 10_000;

/// Parses an unsigned decimal number into `T`.
///
/// Only ASCII digits are accepted: no sign, no whitespace, no empty string.
/// Values that do not fit the target width are rejected.
pub fn parse_unsigned<T: TryFrom<u64>>(text: &str) -> Option<T> {
    if text.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for byte in text.bytes() {
        if !byte.is_ascii_digit() {
            return None;
        }
        value = value
            .checked_mul(10)?
            .checked_add(u64::from(byte - b'0'))?;
    }
    T::try_from(value).ok()
}

/// Parses a sync percentage of the form `<integer>.<fraction>` into
/// hundredths of a percent.
///
/// The fraction has exactly two digits. The integer part must not exceed
/// 100 and the combined value must not exceed [`MAX_SYNC_PERC`].
pub fn parse_sync_perc(text: &str) -> Option<u16> {
    let (integer, fraction) = text.split_once('.')?;
    if fraction.len() != 2 {
        return None;
    }
    let integer: u16 = parse_unsigned(integer)?;
    let fraction: u16 = parse_unsigned(fraction)?;
    if integer > 100 || fraction > 99 {
        return None;
    }
    let value = integer * 100 + fraction;
    (value <= MAX_SYNC_PERC).then_some(value)
}
