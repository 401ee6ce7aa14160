use alloy::primitives::{B256, U256};

/// Strip a `0x` prefix and surrounding whitespace.
pub fn clean_hex(s: &str) -> &str {
    let s = s.trim();
    if let Some(stripped) = s.strip_prefix("0x") {
        stripped
    } else if let Some(stripped) = s.strip_prefix("0X") {
        stripped
    } else {
        s
    }
}

/// Parse a hex (`0x`-prefixed) or decimal quantity into a word.
///
/// Trace stacks from some clients omit the `0x` prefix, so unprefixed strings
/// containing hex letters are read as hex as well.
pub fn to_u256(s: &str) -> Option<U256> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex.is_empty() {
            return Some(U256::ZERO);
        }
        return U256::from_str_radix(hex, 16).ok();
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
        return U256::from_str_radix(s, 10).ok();
    }

    if s.chars().all(|c| c.is_ascii_hexdigit()) {
        return U256::from_str_radix(s, 16).ok();
    }

    None
}

/// Trace stack entries are always hex, prefixed or not. Unlike [`to_u256`],
/// an all-digit entry is still read as hex.
pub fn stack_word(s: &str) -> Option<U256> {
    let hex = clean_hex(s);
    if hex.is_empty() {
        return Some(U256::ZERO);
    }
    if hex.len() > 64 {
        return None;
    }
    U256::from_str_radix(hex, 16).ok()
}

/// Parse a 32-byte storage word, left-padding short quantities.
pub fn to_word(s: &str) -> Option<B256> {
    stack_word(s).map(B256::from)
}

/// `0x`-prefixed, zero-padded 32-byte hex rendering of a word.
pub fn word_hex(value: U256) -> String {
    format!("0x{}", hex::encode(value.to_be_bytes::<32>()))
}

/// Minimal `0x`-prefixed quantity rendering (no leading zeros), as JSON-RPC
/// expects for slot indices and balances.
pub fn quantity_hex(value: U256) -> String {
    format!("{value:#x}")
}
