//! Escape-sequence stripping for clean pattern matching.
//!
//! Terminal output is dense with escape codes for color, cursor movement
//! and titles. Classification matches against clean text, so completed
//! lines are stripped before any pattern sees them; stripping after line
//! reassembly also means a code split across two reads can never break a
//! substring match.

/// Strip escape sequences from decoded text.
///
/// Handles CSI (`ESC [ ... <final>`), OSC (`ESC ] ... BEL` or `ESC \`),
/// simple two-byte escapes, and the bare CSI byte (0x9B). Carriage
/// returns and backspaces are dropped as well, since they only move the
/// cursor. A sequence truncated at the end of input is discarded.
pub fn strip_ansi(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            // ESC
            0x1B => {
                i += 1;
                if i >= bytes.len() {
                    break;
                }
                match bytes[i] {
                    // CSI: ESC [
                    b'[' => {
                        i += 1;
                        // Parameter and intermediate bytes (0x20-0x3F).
                        while i < bytes.len() && (0x20..=0x3F).contains(&bytes[i]) {
                            i += 1;
                        }
                        // Final byte (0x40-0x7E).
                        if i < bytes.len() && (0x40..=0x7E).contains(&bytes[i]) {
                            i += 1;
                        }
                    }
                    // OSC: ESC ] ... (BEL or ESC \)
                    b']' => {
                        i += 1;
                        while i < bytes.len() {
                            if bytes[i] == 0x07 {
                                i += 1;
                                break;
                            }
                            if bytes[i] == 0x1B && i + 1 < bytes.len() && bytes[i + 1] == b'\\' {
                                i += 2;
                                break;
                            }
                            i += 1;
                        }
                    }
                    // Two-byte escape (ESC M, ESC 7, ESC =, charset selects...)
                    0x20..=0x7E => {
                        i += 1;
                    }
                    _ => {
                        i += 1;
                    }
                }
            }
            // Bare CSI byte. In decoded text this only appears inside a
            // multi-byte character, but raw it still marks a sequence.
            0x9B => {
                i += 1;
                while i < bytes.len() && (0x20..=0x3F).contains(&bytes[i]) {
                    i += 1;
                }
                if i < bytes.len() && (0x40..=0x7E).contains(&bytes[i]) {
                    i += 1;
                }
            }
            // Cursor-motion control characters.
            b'\r' | 0x08 => {
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}
