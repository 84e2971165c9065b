//! Fixed-width C string slots.

/// Reads a NUL-terminated string out of a fixed-width slot.
///
/// The string ends at the first NUL or at the end of the slot. Control bytes
/// (`<= 0x19`, `0x7F` and `>= 0x90`) are dropped. Bytes that are not valid
/// UTF-8 afterwards (the `0x80..=0x8F` colour codes) are rendered as `\xNN`
/// escapes so [`strip_colors`] can find them.
pub fn read(slot: &[u8]) -> String {
    let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    let scrubbed: Vec<u8> = slot[..end]
        .iter()
        .map(|&b| if is_control(b) { 0 } else { b })
        .collect();

    let mut out = String::with_capacity(scrubbed.len());
    for chunk in scrubbed.utf8_chunks() {
        out.extend(chunk.valid().chars().filter(|&c| c != '\0'));
        for byte in chunk.invalid() {
            out.push_str(&format!("\\x{byte:02x}"));
        }
    }
    out
}

/// Writes `s` into a slot of `width` bytes, truncating so the slot always
/// keeps a terminating NUL.
pub fn write(buf: &mut Vec<u8>, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(width.saturating_sub(1));
    buf.extend_from_slice(&bytes[..len]);
    buf.resize(buf.len() + width - len, 0);
}

fn is_control(b: u8) -> bool {
    b <= 0x19 || b == 0x7F || b >= 0x90
}

/// Removes the sixteen in-band colour codes (`\x80` through `\x8f`) from a
/// string produced by [`read`].
pub fn strip_colors(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(idx) = rest.find("\\x8") {
        let (head, tail) = rest.split_at(idx);
        out.push_str(head);
        match tail.as_bytes().get(3) {
            Some(d) if d.is_ascii_digit() || (b'a'..=b'f').contains(d) => {
                rest = &tail[4..];
            }
            _ => {
                out.push_str(&tail[..3]);
                rest = &tail[3..];
            }
        }
    }
    out.push_str(rest);
    out
}
