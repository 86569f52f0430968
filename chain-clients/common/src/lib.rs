//! Shared normalization helpers for cross-chain client libraries.
//!
//! Every address and topic hash that moves between the RPC facade, the
//! pool detector, and the event filter hook passes through here first, so
//! that "lowercase, 0x-prefixed" is enforced in exactly one place.

/// Normalizes a hex string to lowercase with a single `0x` prefix.
///
/// Idempotent: `normalize_hex(normalize_hex(x)) == normalize_hex(x)`.
pub fn normalize_hex(value: &str) -> String {
    let trimmed = value.strip_prefix("0x").unwrap_or(value);
    format!("0x{}", trimmed.to_lowercase())
}

/// Normalizes a contract/account address for comparison purposes.
///
/// Addresses are always compared lowercase; checksum form is only used
/// when talking to the RPC facade itself.
pub fn normalize_address(address: &str) -> String {
    normalize_hex(address)
}

/// Parses a `0x`-prefixed hex-encoded unsigned integer, as used for
/// `blockNumber`, `transactionIndex`, and `logIndex` fields in JSON-RPC
/// responses.
pub fn parse_hex_u64(value: &str) -> Result<u64, std::num::ParseIntError> {
    let trimmed = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(trimmed, 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_hex_adds_prefix_and_lowercases() {
        assert_eq!(normalize_hex("ABCDEF"), "0xabcdef");
        assert_eq!(normalize_hex("0xABCDEF"), "0xabcdef");
    }

    #[test]
    fn normalize_hex_is_idempotent() {
        let once = normalize_hex("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
        let twice = normalize_hex(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn parse_hex_u64_handles_prefix() {
        assert_eq!(parse_hex_u64("0x10").unwrap(), 16);
        assert_eq!(parse_hex_u64("2a").unwrap(), 42);
    }
}
