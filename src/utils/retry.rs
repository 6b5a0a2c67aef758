//! Transaction identity for retried attempts.

/// Transaction id for the `retry`-th retry of `original`.
///
/// Formats `{original}-{retry}` and keeps the trailing `len` characters, so
/// ids stay bounded while the retry counter still distinguishes attempts.
pub fn retry_transaction_id(original: &str, retry: u32, len: usize) -> String {
    let id = format!("{}-{}", original, retry);
    let skip = id.chars().count().saturating_sub(len);
    id.chars().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_id_keeps_trailing_characters() {
        assert_eq!(retry_transaction_id("abcdefghijkl", 1, 12), "cdefghijkl-1");
        assert_eq!(retry_transaction_id("abcdefghijkl", 12, 12), "defghijkl-12");
    }

    #[test]
    fn test_short_ids_are_not_padded() {
        assert_eq!(retry_transaction_id("tx", 3, 12), "tx-3");
    }

    #[test]
    fn test_retry_ids_differ_per_attempt() {
        let original = "0123456789ab";
        let ids: std::collections::HashSet<String> = (1..=100)
            .map(|n| retry_transaction_id(original, n, 12))
            .collect();
        assert_eq!(ids.len(), 100);
        assert!(!ids.contains(original));
    }
}
