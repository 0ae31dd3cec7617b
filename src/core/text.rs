//! Text encoding helpers
//!
//! Decoding never fails on bad bytes: undecodable sequences become U+FFFD.
//! Only an unknown encoding label is an error.
//!
//! Labels are matched against the WHATWG table first, then against the
//! common codec spellings manifests use in practice (`latin-1`, `utf_16`,
//! `utf-16-le`, ...). ISO-8859-1 is handled as windows-1252, which maps
//! every byte to a character and back.

use crate::error::{CodexError, Result};
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};

/// Encoding assumed when a source does not declare one
pub const DEFAULT_ENCODING: &str = "utf-8";

/// Rewrite codec spellings the WHATWG table does not know
fn alias(label: &str) -> String {
    let normalized = label.to_ascii_lowercase().replace('_', "-");
    let canonical = match normalized.as_str() {
        "latin-1" | "latin1" | "l1" | "iso8859-1" | "8859" | "cp819" | "iso-ir-100" => {
            "iso-8859-1"
        }
        "utf" | "u8" | "utf8" | "cp65001" => "utf-8",
        "utf16" | "u16" | "utf-16-le" | "utf16le" => "utf-16le",
        "utf-16-be" | "utf16be" => "utf-16be",
        other => other,
    };
    canonical.to_string()
}

fn lookup(label: &str) -> Result<&'static Encoding> {
    let trimmed = label.trim();
    Encoding::for_label(trimmed.as_bytes())
        .or_else(|| Encoding::for_label(alias(trimmed).as_bytes()))
        .ok_or_else(|| CodexError::UnsupportedEncoding(label.to_string()))
}

/// Decode bytes, substituting replacement characters for invalid input
///
/// Byte-order marks are kept as content so that re-encoding reproduces the
/// original bytes.
pub fn decode_lossy(bytes: &[u8], label: &str) -> Result<String> {
    let encoding = lookup(label)?;
    if encoding == UTF_8 {
        return Ok(String::from_utf8_lossy(bytes).into_owned());
    }
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        tracing::debug!("Replaced undecodable bytes while decoding as {}", encoding.name());
    }
    Ok(text.into_owned())
}

/// Encode text with the given encoding
///
/// Characters the target encoding cannot represent are written as HTML
/// numeric character references (encoding_rs behaviour). encoding_rs only
/// decodes UTF-16, so both byte orders are serialized here.
pub fn encode(text: &str, label: &str) -> Result<Vec<u8>> {
    let encoding = lookup(label)?;
    if encoding == UTF_8 {
        return Ok(text.as_bytes().to_vec());
    }
    if encoding == UTF_16LE {
        return Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect());
    }
    if encoding == UTF_16BE {
        return Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect());
    }
    // `replacement` has no encoder of its own
    if encoding.output_encoding() != encoding {
        return Err(CodexError::UnsupportedEncoding(label.to_string()));
    }
    let (bytes, _, _) = encoding.encode(text);
    Ok(bytes.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_lossy() {
        let text = decode_lossy(b"caf\xc3\xa9 \xff", "utf-8").unwrap();
        assert_eq!(text, "caf\u{e9} \u{fffd}");
    }

    #[test]
    fn test_latin1_roundtrip() {
        let bytes = b"caf\xe9";
        let text = decode_lossy(bytes, "latin-1").unwrap();
        assert_eq!(text, "caf\u{e9}");
        assert_eq!(encode(&text, "latin-1").unwrap(), bytes.to_vec());
    }

    #[test]
    fn test_codec_aliases() {
        for label in ["latin-1", "latin_1", "Latin1", "ISO8859-1", "iso-8859-1", "cp1252"] {
            assert_eq!(decode_lossy(b"\xe9", label).unwrap(), "\u{e9}", "{label}");
            assert_eq!(encode("\u{e9}", label).unwrap(), b"\xe9", "{label}");
        }
        for label in ["utf_16", "utf-16", "UTF-16-LE", "utf_16_le", "utf-16le"] {
            assert_eq!(encode("hi", label).unwrap(), b"h\0i\0", "{label}");
        }
        for label in ["utf_16_be", "utf-16-be", "utf-16be"] {
            assert_eq!(encode("hi", label).unwrap(), b"\0h\0i", "{label}");
        }
        assert_eq!(encode("é", "utf_8").unwrap(), "é".as_bytes());
    }

    #[test]
    fn test_latin1_covers_every_byte() {
        let bytes: Vec<u8> = (0..=255).collect();
        let text = decode_lossy(&bytes, "latin-1").unwrap();
        assert!(!text.contains('\u{fffd}'));
        assert_eq!(encode(&text, "latin-1").unwrap(), bytes);
    }

    #[test]
    fn test_utf16_roundtrip() {
        let text = "hello \u{e9}\u{1f600}";
        let le = encode(text, "utf-16le").unwrap();
        assert_eq!(le.len(), 2 * text.encode_utf16().count());
        assert_eq!(&le[..4], b"h\0e\0");
        assert_eq!(decode_lossy(&le, "utf-16le").unwrap(), text);

        let be = encode(text, "utf-16be").unwrap();
        assert_eq!(&be[..4], b"\0h\0e");
        assert_eq!(decode_lossy(&be, "utf-16be").unwrap(), text);
    }

    #[test]
    fn test_utf16_bom_is_kept() {
        let bytes = b"\xff\xfeh\0i\0";
        let text = decode_lossy(bytes, "utf-16").unwrap();
        assert_eq!(text, "\u{feff}hi");
        assert_eq!(encode(&text, "utf-16").unwrap(), bytes.to_vec());
    }

    #[test]
    fn test_unknown_label() {
        assert!(matches!(
            decode_lossy(b"x", "klingon-8"),
            Err(CodexError::UnsupportedEncoding(_))
        ));
        assert!(encode("x", "klingon-8").is_err());
        assert!(matches!(
            encode("x", "replacement"),
            Err(CodexError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_utf8_label_variants() {
        assert_eq!(encode("é", "UTF-8").unwrap(), "é".as_bytes());
        assert_eq!(decode_lossy("é".as_bytes(), " utf8 ").unwrap(), "é");
    }
}
