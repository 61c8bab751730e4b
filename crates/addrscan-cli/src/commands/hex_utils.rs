//! Hex address parsing and formatting utilities.

use anyhow::Result;

/// Parse a hex address string (with or without 0x prefix).
pub fn parse_hex_address(s: &str) -> Result<u64> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(s, 16).map_err(|e| anyhow::anyhow!("Invalid hex address: {}", e))
}

/// Address with its distance from the module base, e.g. `0x140001200 (+0x1200)`.
pub fn format_with_offset(address: u64, base: u64) -> String {
    format!("0x{:X} (+0x{:X})", address, address.wrapping_sub(base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_address_with_prefix() {
        assert_eq!(parse_hex_address("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_hex_address("0X7FF600000000").unwrap(), 0x7FF6_0000_0000);
    }

    #[test]
    fn test_parse_hex_address_without_prefix() {
        assert_eq!(parse_hex_address("140000000").unwrap(), 0x1_4000_0000);
    }

    #[test]
    fn test_parse_hex_address_invalid() {
        assert!(parse_hex_address("GHIJK").is_err());
        assert!(parse_hex_address("0x").is_err());
    }

    #[test]
    fn test_format_with_offset() {
        assert_eq!(
            format_with_offset(0x1_4000_1200, 0x1_4000_0000),
            "0x140001200 (+0x1200)"
        );
    }
}
