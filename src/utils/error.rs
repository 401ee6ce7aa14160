use std::fmt::Display;

/// Longest ledger error text kept in a failure reason, in characters.
const MAX_REASON_CHARS: usize = 240;

/// Past these markers a ledger error only echoes the response body or a backtrace.
const NOISE_MARKERS: [&str; 2] = [" text: ", "Stack backtrace:"];

/// Render a ledger/transport error as one bounded line for a `ForgeError` reason.
pub(crate) fn compact_ledger_error(err: impl Display) -> String {
    let full = err.to_string();
    let noise_at = NOISE_MARKERS
        .iter()
        .filter_map(|marker| full.find(marker))
        .min();
    let kept = noise_at.map_or(full.as_str(), |at| &full[..at]);

    let mut reason = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    if noise_at.is_some() {
        reason.push_str(" (rest omitted)");
    }
    shorten(reason, MAX_REASON_CHARS)
}

fn shorten(reason: String, max_chars: usize) -> String {
    match reason.char_indices().nth(max_chars) {
        Some((at, _)) => {
            let dropped = reason[at..].chars().count();
            format!("{} [+{dropped} chars]", &reason[..at])
        }
        None => reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_echo_and_backtrace_are_dropped() {
        let raw = "deserialization error: missing field `result`, text: {\"jsonrpc\":\"2.0\"}\n\nStack backtrace:\n   0: main";
        assert_eq!(
            compact_ledger_error(raw),
            "deserialization error: missing field `result`, (rest omitted)"
        );
    }

    #[test]
    fn test_multiline_error_becomes_one_line() {
        let raw = "server returned an error response:\n    error code -32601:\tmethod not found";
        assert_eq!(
            compact_ledger_error(raw),
            "server returned an error response: error code -32601: method not found"
        );
    }

    #[test]
    fn test_long_reason_is_cut_on_char_boundary() {
        let raw = "ü".repeat(MAX_REASON_CHARS + 10);
        let compact = compact_ledger_error(&raw);
        assert!(compact.starts_with(&"ü".repeat(MAX_REASON_CHARS)));
        assert!(compact.ends_with(" [+10 chars]"));
        assert_eq!(shorten("short".to_string(), 5), "short");
    }
}
