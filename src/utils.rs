use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{AppError, AppResult};

/// Compare two dotted-decimal version strings. Missing components compare as
/// zero, so "7.8" == "7.8.0" and "8" > "7.12".
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let mut left = a.split('.').map(|p| p.trim().parse::<u64>().unwrap_or(0));
    let mut right = b.split('.').map(|p| p.trim().parse::<u64>().unwrap_or(0));
    loop {
        match (left.next(), right.next()) {
            (None, None) => return std::cmp::Ordering::Equal,
            (l, r) => {
                let l = l.unwrap_or(0);
                let r = r.unwrap_or(0);
                if l != r {
                    return l.cmp(&r);
                }
            }
        }
    }
}

pub fn version_at_least(version: &str, minimum: &str) -> bool {
    compare_versions(version, minimum) != std::cmp::Ordering::Less
}

/// Decode the `contents` field of `-data-read-memory-bytes` (a bare hex
/// string, two digits per byte).
pub fn hex_to_bytes(hex: &str) -> AppResult<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return Err(AppError::ParseError(format!(
            "odd-length hex string: {} digits",
            hex.len()
        )));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| AppError::ParseError(format!("bad hex byte at {}: {}", i, e)))
        })
        .collect()
}

pub fn hex_to_base64(hex: &str) -> AppResult<String> {
    Ok(BASE64.encode(hex_to_bytes(hex)?))
}

pub fn base64_to_hex(data: &str) -> AppResult<String> {
    let bytes = BASE64
        .decode(data.trim())
        .map_err(|e| AppError::ParseError(format!("bad base64: {}", e)))?;
    Ok(bytes.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Parse a DAP memory reference ("0x555555554000" or decimal) into an
/// address.
pub fn parse_memory_reference(reference: &str) -> AppResult<u64> {
    let r = reference.trim();
    let parsed = if let Some(hex) = r.strip_prefix("0x").or_else(|| r.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        r.parse::<u64>()
    };
    parsed.map_err(|_| AppError::Protocol(format!("invalid memory reference: {}", reference)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_version_at_least() {
        assert!(version_at_least("7.12", "7.8"));
        assert!(version_at_least("8", "7.12"));
        assert!(version_at_least("7.8.0", "7.8"));
        assert!(version_at_least("7.8", "7.8.0"));
        assert!(!version_at_least("7.7.1", "7.8"));
        assert!(!version_at_least("6.8.1", "7"));
    }

    #[test]
    fn test_hex_base64_round_trip() {
        assert_eq!(hex_to_base64("00ff10").unwrap(), "AP8Q");
        assert_eq!(base64_to_hex("AP8Q").unwrap(), "00ff10");
        assert!(hex_to_bytes("abc").is_err());
        assert!(hex_to_bytes("zz").is_err());
    }

    #[test]
    fn test_parse_memory_reference() {
        assert_eq!(parse_memory_reference("0x10").unwrap(), 16);
        assert_eq!(parse_memory_reference("16").unwrap(), 16);
        assert!(parse_memory_reference("main+4").is_err());
    }
}
