/// Split `content` into consecutive, non-overlapping windows of at most
/// `max_chars` characters.
///
/// Lengths are counted in Unicode scalar values, never bytes, so a window
/// never splits a multi-byte character. Every window except possibly the
/// last holds exactly `max_chars` characters, and concatenating the windows
/// yields `content` again. Empty input produces no chunks.
///
/// A `max_chars` of zero is treated as one.
pub fn chunk_text(content: &str, max_chars: usize) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }

    let max_chars = max_chars.max(1);
    let mut chunks = Vec::with_capacity(content.len() / max_chars + 1);
    let mut start = 0;
    let mut count = 0;

    for (offset, _) in content.char_indices() {
        if count == max_chars {
            chunks.push(content[start..offset].to_string());
            start = offset;
            count = 0;
        }
        count += 1;
    }

    // Flush the tail (always non-empty here).
    chunks.push(content[start..].to_string());
    chunks
}
