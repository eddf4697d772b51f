//! Byte pattern search.

/// Return the index of the first occurrence of `needle` in `haystack`.
///
/// Scans left to right. Returns `None` when the needle is absent, empty, or
/// longer than the haystack. Matches never span two separate buffers; callers
/// that read in chunks must keep enough overlap themselves.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
