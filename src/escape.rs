//! Client-side quoting and escaping.
//!
//! These assume a UTF-8 client encoding, which is what `PgLink` negotiates at
//! startup.

use crate::error::{Error, Result};

/// Escape text for use inside a single-quoted SQL literal.
///
/// With `standard_conforming_strings` off, backslashes are doubled too.
pub fn escape_string(text: &str, standard_strings: bool) -> Result<String> {
    if text.contains('\0') {
        return Err(Error::InvalidArgument(
            "String to be escaped contains a zero byte".into(),
        ));
    }
    let mut out = String::with_capacity(text.len() + 2);
    for ch in text.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\\' if !standard_strings => out.push_str("\\\\"),
            _ => out.push(ch),
        }
    }
    Ok(out)
}

/// Quote an identifier, doubling any embedded double quotes.
pub fn quote_identifier(identifier: &str) -> Result<String> {
    if identifier.contains('\0') {
        return Err(Error::InvalidArgument(
            "Identifier contains a zero byte".into(),
        ));
    }
    let mut out = String::with_capacity(identifier.len() + 2);
    out.push('"');
    for ch in identifier.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    Ok(out)
}

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Escape binary data in bytea hex format, ready to go inside quotes.
pub fn escape_bytea(data: &[u8], standard_strings: bool) -> String {
    let prefix = if standard_strings { "\\x" } else { "\\\\x" };
    let mut out = String::with_capacity(prefix.len() + data.len() * 2);
    out.push_str(prefix);
    for &byte in data {
        out.push(HEX[usize::from(byte >> 4)] as char);
        out.push(HEX[usize::from(byte & 0x0f)] as char);
    }
    out
}

fn hex_value(digit: u8) -> Result<u8> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        _ => Err(Error::InvalidArgument(format!(
            "Invalid hex digit in bytea: {:?}",
            digit as char
        ))),
    }
}

/// Decode bytea text output, in either hex (`\x...`) or escape format.
///
/// The result carries its own length and may contain zero bytes.
pub fn unescape_bytea(text: &str) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    if let Some(hex) = bytes.strip_prefix(b"\\x") {
        let mut out = Vec::with_capacity(hex.len() / 2);
        let mut digits = hex.iter().copied().filter(|b| !b.is_ascii_whitespace());
        while let Some(high) = digits.next() {
            let low = digits.next().ok_or_else(|| {
                Error::InvalidArgument("Odd number of hex digits in bytea".into())
            })?;
            out.push((hex_value(high)? << 4) | hex_value(low)?);
        }
        return Ok(out);
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut rest = bytes;
    while let Some((&first, tail)) = rest.split_first() {
        if first != b'\\' {
            out.push(first);
            rest = tail;
            continue;
        }
        match tail {
            [b'\\', more @ ..] => {
                out.push(b'\\');
                rest = more;
            }
            [a @ b'0'..=b'3', b @ b'0'..=b'7', c @ b'0'..=b'7', more @ ..] => {
                out.push(((a - b'0') << 6) | ((b - b'0') << 3) | (c - b'0'));
                rest = more;
            }
            _ => {
                return Err(Error::InvalidArgument(
                    "Invalid escape sequence in bytea".into(),
                ));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_literals() {
        assert_eq!(escape_string("it's", true).unwrap(), "it''s");
        assert_eq!(escape_string("a\\b", true).unwrap(), "a\\b");
        assert_eq!(escape_string("a\\b", false).unwrap(), "a\\\\b");
        assert!(escape_string("nul\0", true).is_err());
    }

    #[test]
    fn identifiers() {
        assert_eq!(quote_identifier("users").unwrap(), "\"users\"");
        assert_eq!(quote_identifier("we\"ird").unwrap(), "\"we\"\"ird\"");
    }

    #[test]
    fn bytea_hex_and_escape_formats() {
        let data = [0u8, 1, 0xab, b'\\', 0xff];
        let escaped = escape_bytea(&data, true);
        assert_eq!(escaped, "\\x0001ab5cff");
        assert_eq!(unescape_bytea(&escaped).unwrap(), data);

        assert_eq!(
            unescape_bytea("a\\000b\\\\c\\377").unwrap(),
            vec![b'a', 0, b'b', b'\\', b'c', 0xff]
        );
        assert!(unescape_bytea("\\x0").is_err());
        assert!(unescape_bytea("bad\\9").is_err());
    }
}
