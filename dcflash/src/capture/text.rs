//! Turning raw boot output into displayable text.

/// Drain buffered bytes into displayable UTF-8 text without stalling on invalid bytes.
///
/// - Valid UTF-8 is emitted as-is.
/// - Invalid byte sequences emit the replacement char `�` and continue.
/// - An incomplete UTF-8 suffix is kept in `buffer` for the next chunk.
pub fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if let Ok(valid) = std::str::from_utf8(&buffer[..valid_up_to]) {
                    output.push_str(valid);
                }

                if let Some(invalid_len) = err.error_len() {
                    output.push('�');
                    let drain_to = valid_up_to
                        .saturating_add(invalid_len)
                        .min(buffer.len());
                    buffer.drain(..drain_to);
                } else {
                    buffer.drain(..valid_up_to);
                    break;
                }
            },
        }
    }

    output
}

/// Drop control characters that would garble a terminal.
///
/// Keeps `\n`, `\t` and printable characters; `\r\n` and lone `\r` both
/// become `\n`.
pub fn printable(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    let mut out = String::with_capacity(normalized.len());
    for ch in normalized.chars() {
        match ch {
            '\n' | '\t' => out.push(ch),
            '\r' => out.push('\n'),
            _ if ch.is_control() => {},
            _ => out.push(ch),
        }
    }
    out
}

/// Whole transcript as display text.
pub fn transcript_text(bytes: &[u8]) -> String {
    printable(&String::from_utf8_lossy(bytes))
}
