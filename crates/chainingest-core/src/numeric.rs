//! Precision-preserving pre-pass over raw JSON bodies.
//!
//! Node responses routinely carry integers wider than 64 bits as bare JSON
//! numbers. Decoding them as numbers loses digits, so unsigned integer and
//! decimal literals appearing as object values are wrapped in quotes before
//! the body is parsed.
//!
//! Known limitations, kept on purpose: exponent notation (`1e18`), negative
//! numbers and bare array elements (`[1, 2]`) are left untouched.

/// Quote every bare unsigned numeric object value in `body`.
pub fn quote_numbers(body: &str) -> String {
    let bytes = body.as_bytes();
    let mut out = String::with_capacity(body.len() + 16);
    let mut copied = 0;
    let mut in_string = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                b'\\' => {
                    i += 2;
                    continue;
                }
                b'"' => in_string = false,
                _ => {}
            }
            i += 1;
            continue;
        }

        match b {
            b'"' => in_string = true,
            b':' => {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                    j += 1;
                }
                let start = j;
                while j < bytes.len() && (bytes[j].is_ascii_digit() || bytes[j] == b'.') {
                    j += 1;
                }
                let is_number = j > start && bytes[start].is_ascii_digit();
                let has_exponent = matches!(bytes.get(j), Some(b'e' | b'E'));
                if is_number && !has_exponent {
                    out.push_str(&body[copied..start]);
                    out.push('"');
                    out.push_str(&body[start..j]);
                    out.push('"');
                    copied = j;
                    i = j;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }

    out.push_str(&body[copied..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_wide_integers() {
        let body = r#"{"value": 115792089237316195423570985008687907853269984665640564039457584007913129639935,"n":1}"#;
        let v: serde_json::Value = serde_json::from_str(&quote_numbers(body)).unwrap();
        assert_eq!(
            v["value"],
            "115792089237316195423570985008687907853269984665640564039457584007913129639935"
        );
        assert_eq!(v["n"], "1");
    }

    #[test]
    fn leaves_strings_alone() {
        let body = r#"{"memo":"a:12 \"b\":34","x":"5"}"#;
        assert_eq!(quote_numbers(body), body);
    }

    #[test]
    fn quotes_decimals_and_nested_values() {
        let body = r#"{"a":{"fee":0.0001},"b":[{"c":7}]}"#;
        assert_eq!(
            quote_numbers(body),
            r#"{"a":{"fee":"0.0001"},"b":[{"c":"7"}]}"#
        );
    }

    #[test]
    fn known_limitations_are_untouched() {
        let exp = r#"{"a":1e18}"#;
        assert_eq!(quote_numbers(exp), exp);
        let neg = r#"{"a":-5}"#;
        assert_eq!(quote_numbers(neg), neg);
        let arr = r#"{"a":[1,2,3]}"#;
        assert_eq!(quote_numbers(arr), arr);
    }
}
