//! Signed decimal effect strings.

use alloy_primitives::I256;

/// A parsed `effect` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Amount {
    Known(I256),
    /// `+?` or `-?`: direction known, amount hidden.
    Unknown { negative: bool },
}

/// Marker for a hidden inflow.
pub const UNKNOWN_INFLOW: &str = "+?";
/// Marker for a hidden outflow.
pub const UNKNOWN_OUTFLOW: &str = "-?";

/// Parse an effect string.
///
/// Accepts `-?[0-9]+` without leading zeros (and not `-0`), plus the two
/// unknown markers. Anything wider than 255 bits of magnitude is rejected.
pub fn parse_effect(s: &str) -> Result<Amount, String> {
    match s {
        UNKNOWN_INFLOW => return Ok(Amount::Unknown { negative: false }),
        UNKNOWN_OUTFLOW => return Ok(Amount::Unknown { negative: true }),
        _ => {}
    }

    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("effect '{s}' is not a signed integer"));
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return Err(format!("effect '{s}' has leading zeros"));
    }
    if s == "-0" {
        return Err("effect '-0' is not canonical".into());
    }

    I256::from_dec_str(s)
        .map(Amount::Known)
        .map_err(|e| format!("effect '{s}' out of range: {e}"))
}

/// Flip the sign of a canonical decimal string (`"0"` stays `"0"`).
pub fn negate(s: &str) -> String {
    match s.strip_prefix('-') {
        Some(rest) => rest.to_string(),
        None if s == "0" => s.to_string(),
        None => format!("-{s}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_beyond_u64() {
        let v = parse_effect("-340282366920938463463374607431768211456").unwrap();
        match v {
            Amount::Known(n) => assert!(n.is_negative()),
            _ => panic!("expected known amount"),
        }
    }

    #[test]
    fn rejects_non_canonical() {
        assert!(parse_effect("").is_err());
        assert!(parse_effect("-").is_err());
        assert!(parse_effect("007").is_err());
        assert!(parse_effect("-0").is_err());
        assert!(parse_effect("1.5").is_err());
        assert!(parse_effect("+5").is_err());
        assert!(parse_effect("0").is_ok());
    }

    #[test]
    fn unknown_markers() {
        assert_eq!(parse_effect("+?").unwrap(), Amount::Unknown { negative: false });
        assert_eq!(parse_effect("-?").unwrap(), Amount::Unknown { negative: true });
    }

    #[test]
    fn negation() {
        assert_eq!(negate("15"), "-15");
        assert_eq!(negate("-15"), "15");
        assert_eq!(negate("0"), "0");
    }
}
